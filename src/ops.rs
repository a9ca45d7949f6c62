//! The operation pipeline attached to a stage.
//!
//! An [`OpPipeline`] is pure data: a bundle of user closures that a partition
//! worker invokes. It holds
//!
//! - a **lazy triad** of `filter`, `map` and `for_each` (each optional, repeated
//!   calls compose in call order),
//! - or an **eager** whole-partition transform ([`Eager::Bulk`] or
//!   [`Eager::Sequence`]), which takes precedence over the lazy triad,
//! - an optional **sort finisher** applied to every partition's output,
//! - an optional **reduce** combiner used while tree-reducing partial results,
//! - and the `partition`/`merge` pair used by recursive decomposition.
//!
//! When no reduce combiner is set the pipeline concatenates partial results
//! (left operand first). When a sort finisher is set, the default combiner
//! becomes an order-preserving merge so the stage's final output stays sorted.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Bound shared by every element type flowing through a stage graph.
pub trait Element: 'static + Send + Sync + Clone {}
impl<T> Element for T where T: 'static + Send + Sync + Clone {}

/// Owned element stream handed to [`Eager::Sequence`] transforms.
pub type ElementIter<T> = Box<dyn Iterator<Item = T> + Send>;

pub type FilterFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type MapFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;
pub type ForEachFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type BulkFn<T> = Arc<dyn Fn(Vec<T>) -> Vec<T> + Send + Sync>;
pub type SequenceFn<T> = Arc<dyn Fn(ElementIter<T>) -> ElementIter<T> + Send + Sync>;
pub type CombineFn<T> = Arc<dyn Fn(Vec<T>, Vec<T>) -> Vec<T> + Send + Sync>;
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;
pub type PartitionFn<T> = Arc<dyn Fn(Vec<T>, usize) -> Split<T> + Send + Sync>;
pub type MergeFn<T> = Arc<dyn Fn(BTreeMap<usize, Vec<T>>, Vec<T>) -> Vec<T> + Send + Sync>;

/// Output of a recursive partition function.
///
/// `parts[i]` is routed to child `i`; `criterion` is handed back to the merge
/// function unchanged once every child has reported (a quicksort pivot, for
/// example).
#[derive(Clone, Debug, PartialEq)]
pub struct Split<T> {
    pub criterion: Vec<T>,
    pub parts: Vec<Vec<T>>,
}

impl<T> Split<T> {
    pub fn new(criterion: Vec<T>, parts: Vec<Vec<T>>) -> Self {
        Self { criterion, parts }
    }
}

/// Whole-partition transform. Setting one variant replaces the other.
pub enum Eager<T> {
    Bulk(BulkFn<T>),
    Sequence(SequenceFn<T>),
}

impl<T> Clone for Eager<T> {
    fn clone(&self) -> Self {
        match self {
            Eager::Bulk(f) => Eager::Bulk(Arc::clone(f)),
            Eager::Sequence(f) => Eager::Sequence(Arc::clone(f)),
        }
    }
}

/// Immutable descriptor of the operations a stage applies to each partition.
pub struct OpPipeline<T> {
    pub(crate) filter: Option<FilterFn<T>>,
    pub(crate) map: Option<MapFn<T>>,
    pub(crate) for_each: Option<ForEachFn<T>>,
    pub(crate) eager: Option<Eager<T>>,
    pub(crate) sort: Option<CompareFn<T>>,
    pub(crate) reduce: Option<CombineFn<T>>,
    pub(crate) partition: Option<PartitionFn<T>>,
    pub(crate) merge: Option<MergeFn<T>>,
}

impl<T> Default for OpPipeline<T> {
    fn default() -> Self {
        Self {
            filter: None,
            map: None,
            for_each: None,
            eager: None,
            sort: None,
            reduce: None,
            partition: None,
            merge: None,
        }
    }
}

impl<T> Clone for OpPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            map: self.map.clone(),
            for_each: self.for_each.clone(),
            eager: self.eager.clone(),
            sort: self.sort.clone(),
            reduce: self.reduce.clone(),
            partition: self.partition.clone(),
            merge: self.merge.clone(),
        }
    }
}

impl<T> Debug for OpPipeline<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let eager = match &self.eager {
            Some(Eager::Bulk(_)) => Some("bulk"),
            Some(Eager::Sequence(_)) => Some("sequence"),
            None => None,
        };
        f.debug_struct("OpPipeline")
            .field("filter", &self.filter.is_some())
            .field("map", &self.map.is_some())
            .field("for_each", &self.for_each.is_some())
            .field("eager", &eager)
            .field("sorted", &self.sort.is_some())
            .field("reduce", &self.reduce.is_some())
            .field("partition", &self.partition.is_some())
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

impl<T: Element> OpPipeline<T> {
    pub(crate) fn push_filter(&mut self, pred: FilterFn<T>) {
        self.filter = Some(match self.filter.take() {
            Some(prev) => Arc::new(move |t: &T| prev(t) && pred(t)),
            None => pred,
        });
    }

    pub(crate) fn push_map(&mut self, f: MapFn<T>) {
        self.map = Some(match self.map.take() {
            Some(prev) => Arc::new(move |t: &T| f(&prev(t))),
            None => f,
        });
    }

    pub(crate) fn push_for_each(&mut self, f: ForEachFn<T>) {
        self.for_each = Some(match self.for_each.take() {
            Some(prev) => Arc::new(move |t: &T| {
                prev(t);
                f(t);
            }),
            None => f,
        });
    }

    /// True when a partition function and a merge function are both present.
    pub fn is_recursive_ready(&self) -> bool {
        self.partition.is_some() && self.merge.is_some()
    }

    /// Run this stage's execution mode over one partition, then the sort finisher.
    pub fn run(&self, partition: Vec<T>) -> Vec<T> {
        let mut out = match &self.eager {
            Some(Eager::Bulk(f)) => f(partition),
            Some(Eager::Sequence(f)) => f(Box::new(partition.into_iter())).collect(),
            None => self.run_lazy(partition),
        };
        if let Some(cmp) = &self.sort {
            out.sort_by(|a, b| cmp(a, b));
        }
        out
    }

    /// Fused filter -> map -> for_each over the partition.
    fn run_lazy(&self, partition: Vec<T>) -> Vec<T> {
        if self.filter.is_none() && self.map.is_none() && self.for_each.is_none() {
            return partition;
        }
        let mut out = Vec::with_capacity(partition.len());
        for item in partition {
            if let Some(pred) = &self.filter
                && !pred(&item)
            {
                continue;
            }
            let item = match &self.map {
                Some(f) => f(&item),
                None => item,
            };
            if let Some(f) = &self.for_each {
                f(&item);
            }
            out.push(item);
        }
        out
    }

    /// Combine two partial results during reduction.
    ///
    /// `left` always belongs to the lower-ranked worker.
    pub fn combine(&self, left: Vec<T>, right: Vec<T>) -> Vec<T> {
        if let Some(f) = &self.reduce {
            return f(left, right);
        }
        match &self.sort {
            Some(cmp) => merge_sorted(left, right, cmp.as_ref()),
            None => concat(left, right),
        }
    }
}

/// Default combiner: the left operand's elements, then the right operand's.
pub fn concat<T>(mut left: Vec<T>, right: Vec<T>) -> Vec<T> {
    left.extend(right);
    left
}

/// Two-way merge of already sorted inputs. Ties keep the left element first.
pub fn merge_sorted<T, F>(left: Vec<T>, right: Vec<T>, cmp: &F) -> Vec<T>
where
    F: Fn(&T, &T) -> Ordering + ?Sized,
{
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        let take_left = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => cmp(a, b) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { l.next() } else { r.next() };
        out.extend(next);
    }
    out
}
