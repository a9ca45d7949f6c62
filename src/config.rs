//! Engine configuration.
//!
//! [`EngineConfig`] sizes the worker pool, supplies the default task count for
//! stages that do not set one, optionally bounds how long [`run`] may wait, and
//! toggles capture of each stage's delivered input for debugging.
//!
//! Configs can be built in code with the `with_*` setters or loaded from JSON:
//!
//! ```
//! use stagebeam::EngineConfig;
//!
//! let cfg = EngineConfig::from_json(r#"{ "threads": 2, "capture_input": true }"#).unwrap();
//! assert_eq!(cfg.threads, Some(2));
//! assert!(cfg.capture_input);
//! ```
//!
//! [`run`]: crate::Orchestrator::run

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size. `None` uses one thread per logical CPU.
    pub threads: Option<usize>,
    /// Task count for stages that never called [`Stage::tasks`](crate::Stage::tasks).
    pub default_tasks: usize,
    /// Upper bound on a single run. `None` waits indefinitely.
    #[serde(with = "duration_millis")]
    pub run_timeout: Option<Duration>,
    /// Record every stage's delivered input in the raw-data registry.
    pub capture_input: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            default_tasks: 2 * num_cpus::get().max(2),
            run_timeout: None,
            capture_input: false,
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON; missing fields take their default values.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] when the document is not valid JSON or a
    /// field has the wrong type.
    pub fn from_json(s: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(s)?)
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    #[must_use]
    pub fn with_default_tasks(mut self, tasks: usize) -> Self {
        self.default_tasks = tasks.max(1);
        self
    }

    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_capture_input(mut self, capture: bool) -> Self {
        self.capture_input = capture;
        self
    }

    pub(crate) fn pool_threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Timeouts are written as whole milliseconds (`"run_timeout": 5000`).
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
