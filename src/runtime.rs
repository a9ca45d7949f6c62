//! Minimal in-process actor runtime on top of a rayon thread pool.
//!
//! Every stage coordinator and partition worker is an [`Actor`]: a piece of
//! state plus a message handler. Each actor owns a FIFO mailbox. Sending a
//! message enqueues it and, if the mailbox is idle, schedules a drain task on
//! the pool. At most one drain task runs per mailbox, so an actor handles its
//! messages one at a time and messages from one sender arrive in send order.
//! Handlers never block a pool thread; an actor that has nothing to do simply
//! returns and waits for its next message.
//!
//! On top of addresses the module provides the two primitives the engine
//! needs from a host runtime:
//!
//! - [`Group`]: a fixed, ranked set of addresses with broadcast and scatter.
//! - [`Directory`]: keyed, idempotent lookup-or-spawn, used to keep join
//!   points single-instanced when several predecessors race to create them.

use crate::error::EngineError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::VecDeque;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// Stable identity of a spawned actor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ActorId(u64);

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "actor-{}", self.0)
    }
}

/// What an actor wants after handling a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub(crate) trait Actor: Send + 'static {
    type Msg: Send + 'static;

    fn handle(&mut self, msg: Self::Msg, ctx: &Context<Self::Msg>) -> Flow;
}

/// Handle passed to [`Actor::handle`].
pub(crate) struct Context<M> {
    myself: Addr<M>,
    runtime: Arc<Runtime>,
}

impl<M: Send + 'static> Context<M> {
    pub fn myself(&self) -> &Addr<M> {
        &self.myself
    }

    /// Spawn a child actor on the same pool.
    pub fn spawn<A: Actor>(&self, actor: A) -> Addr<A::Msg> {
        self.runtime.spawn(actor)
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }
}

trait Mailbox<M>: Send + Sync {
    fn enqueue(self: Arc<Self>, msg: M) -> bool;
}

/// Address of a live (or stopped) actor.
pub(crate) struct Addr<M> {
    id: ActorId,
    mailbox: Arc<dyn Mailbox<M>>,
}

impl<M> Clone for Addr<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<M: Send + 'static> Addr<M> {
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Enqueue `msg`. Returns `false` if the actor has already stopped, in
    /// which case the message is dropped.
    pub fn send(&self, msg: M) -> bool {
        Arc::clone(&self.mailbox).enqueue(msg)
    }
}

struct CellState<A: Actor> {
    actor: Option<A>,
    queue: VecDeque<A::Msg>,
    scheduled: bool,
    stopped: bool,
}

struct Cell<A: Actor> {
    id: ActorId,
    runtime: Arc<Runtime>,
    state: Mutex<CellState<A>>,
}

impl<A: Actor> Mailbox<A::Msg> for Cell<A> {
    fn enqueue(self: Arc<Self>, msg: A::Msg) -> bool {
        let mut st = self.state.lock();
        if st.stopped {
            trace!(actor = %self.id, "dropping message for stopped actor");
            return false;
        }
        st.queue.push_back(msg);
        if !st.scheduled {
            st.scheduled = true;
            drop(st);
            let cell = Arc::clone(&self);
            self.runtime.pool.spawn(move || cell.drain());
        }
        true
    }
}

impl<A: Actor> Cell<A> {
    fn drain(self: Arc<Self>) {
        let ctx = Context {
            myself: Addr {
                id: self.id,
                mailbox: Arc::clone(&self) as Arc<dyn Mailbox<A::Msg>>,
            },
            runtime: Arc::clone(&self.runtime),
        };
        loop {
            let (msg, mut actor) = {
                let mut st = self.state.lock();
                let Some(msg) = st.queue.pop_front() else {
                    st.scheduled = false;
                    return;
                };
                let Some(actor) = st.actor.take() else {
                    st.queue.clear();
                    st.scheduled = false;
                    return;
                };
                (msg, actor)
            };

            let flow = actor.handle(msg, &ctx);

            let mut st = self.state.lock();
            if flow == Flow::Stop {
                st.stopped = true;
                st.scheduled = false;
                let dropped = st.queue.len();
                st.queue.clear();
                drop(st);
                trace!(actor = %self.id, dropped, "actor stopped");
                return;
            }
            st.actor = Some(actor);
        }
    }
}

/// Owns the worker pool every actor runs on.
pub struct Runtime {
    pool: ThreadPool,
    next_actor: AtomicU64,
}

impl Runtime {
    pub(crate) fn new(threads: usize) -> Result<Arc<Self>, EngineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("stagebeam-worker-{i}"))
            .build()?;
        Ok(Arc::new(Self {
            pool,
            next_actor: AtomicU64::new(0),
        }))
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn spawn<A: Actor>(self: &Arc<Self>, actor: A) -> Addr<A::Msg> {
        let id = ActorId(self.next_actor.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(Cell {
            id,
            runtime: Arc::clone(self),
            state: Mutex::new(CellState {
                actor: Some(actor),
                queue: VecDeque::new(),
                scheduled: false,
                stopped: false,
            }),
        });
        Addr {
            id,
            mailbox: cell as Arc<dyn Mailbox<A::Msg>>,
        }
    }
}

/// A ranked set of sibling addresses.
pub(crate) struct Group<M> {
    members: Arc<[Addr<M>]>,
}

impl<M> Clone for Group<M> {
    fn clone(&self) -> Self {
        Self {
            members: Arc::clone(&self.members),
        }
    }
}

impl<M: Send + 'static> Group<M> {
    pub fn new(members: Vec<Addr<M>>) -> Self {
        Self {
            members: members.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn get(&self, rank: usize) -> Option<&Addr<M>> {
        self.members.get(rank)
    }

    /// Send a copy of `msg` to every member.
    pub fn broadcast(&self, msg: M)
    where
        M: Clone,
    {
        for member in self.members.iter() {
            member.send(msg.clone());
        }
    }

    /// Send `parts[i]` to member `i`, wrapped by `wrap`.
    pub fn scatter<P>(&self, parts: Vec<P>, mut wrap: impl FnMut(usize, P) -> M) {
        for (rank, (member, part)) in self.members.iter().zip(parts).enumerate() {
            member.send(wrap(rank, part));
        }
    }
}

/// Keyed registry of live actors with atomic lookup-or-spawn.
///
/// Once [`close`](Directory::close) has been called no further actor is
/// spawned, so a teardown that drains the directory cannot miss a late entry.
pub(crate) struct Directory<K: Eq + Hash, M> {
    entries: DashMap<K, Addr<M>>,
    closed: AtomicBool,
}

impl<K: Eq + Hash + Copy, M: Send + 'static> Directory<K, M> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn get(&self, key: &K) -> Option<Addr<M>> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Return the actor registered under `key`, spawning it from `make` when
    /// absent. Concurrent callers for the same key observe a single actor.
    /// Returns `None` for an absent key once the directory is closed.
    pub fn get_or_spawn<A, F>(&self, runtime: &Arc<Runtime>, key: K, make: F) -> Option<Addr<M>>
    where
        A: Actor<Msg = M>,
        F: FnOnce() -> A,
    {
        match self.entries.entry(key) {
            Entry::Occupied(e) => Some(e.get().clone()),
            // Checked under the shard lock so `drain` observes every insert.
            Entry::Vacant(_) if self.is_closed() => None,
            Entry::Vacant(v) => {
                let addr = runtime.spawn(make());
                v.insert(addr.clone());
                Some(addr)
            }
        }
    }

    /// Refuse every later spawn.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remove and return every registered address.
    pub fn drain(&self) -> Vec<Addr<M>> {
        let keys: Vec<K> = self.entries.iter().map(|r| *r.key()).collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|(_, addr)| addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
