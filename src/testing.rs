//! Testing utilities for stage graphs.
//!
//! - **Assertions**: compare stage outputs with expected results, with or
//!   without regard to order.
//! - **Fixtures**: small datasets and a pre-configured orchestrator that
//!   fails fast instead of hanging when a run stalls.
//!
//! ```
//! use stagebeam::*;
//! use stagebeam::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let orch = test_orchestrator::<i64>()?;
//! let g = StageGraph::new();
//! let s = g.stage().data(vec![3, 1, 2]).tasks(3).sorted_ascending();
//! orch.run(&g)?;
//!
//! assert_collections_equal(&orch.result(&s)?, &[1, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
