use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::ConfigError;

use super::Rejection;
use super::Strategy;
use super::Token;
use super::PARTITION_CONTEXT_KEY;

const PERCENT_SUM_TOLERANCE: f64 = 1e-6;

type Predicate = Box<dyn Fn(&Context) -> bool + Send + Sync>;
type Lookup = Box<dyn Fn(&Context) -> String + Send + Sync>;

/// A named share of a predicate-partitioned limit.
pub struct PredicatePartition {
    name: String,
    percent: f64,
    predicate: Predicate,
}

impl PredicatePartition {
    pub fn new(
        name: impl Into<String>,
        percent: f64,
        predicate: impl Fn(&Context) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            percent,
            predicate: Box::new(predicate),
        }
    }
}

struct Slot {
    name: String,
    percent: f64,
    predicate: Option<Predicate>,
    reserved: usize,
    busy: usize,
}

impl Slot {
    fn reserve(&mut self, limit: usize) {
        self.reserved = ((limit as f64 * self.percent).floor() as usize).max(1);
    }
}

struct PartitionState {
    slots: Vec<Slot>,
    total_busy: usize,
    limit: usize,
}

impl PartitionState {
    /// Admission rule shared by both partition strategies: reject only when
    /// the total limit is spent and the matched partition has used up its
    /// own reservation. Unused reservations may be borrowed, so the total
    /// busy count can transiently exceed the limit by at most one per
    /// partition.
    fn admit(&mut self, index: usize) -> ControlFlow<Rejection, usize> {
        let slot = &self.slots[index];
        if self.total_busy >= self.limit && slot.busy >= slot.reserved {
            return ControlFlow::Break(Rejection::Exhausted {
                in_flight: self.total_busy,
            });
        }
        let slot = &mut self.slots[index];
        slot.busy += 1;
        self.total_busy += 1;
        ControlFlow::Continue(slot.busy)
    }

    fn release(&mut self, name: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.name == name) {
            slot.busy -= 1;
        }
        self.total_busy -= 1;
    }

    fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        let limit = self.limit;
        for slot in &mut self.slots {
            slot.reserve(limit);
        }
    }
}

fn validate_slots(slots: &[Slot]) -> Result<(), ConfigError> {
    if slots.is_empty() {
        return Err(ConfigError::NoPartitions);
    }
    let mut seen = HashMap::new();
    let mut sum = 0.0;
    for slot in slots {
        if !(slot.percent > 0.0 && slot.percent <= 1.0) {
            return Err(ConfigError::PartitionPercent {
                name: slot.name.clone(),
                percent: slot.percent,
            });
        }
        if seen.insert(slot.name.clone(), ()).is_some() {
            return Err(ConfigError::DuplicatePartition(slot.name.clone()));
        }
        sum += slot.percent;
    }
    if (sum - 1.0).abs() > PERCENT_SUM_TOLERANCE {
        return Err(ConfigError::PartitionPercentSum { total: sum });
    }
    Ok(())
}

/// Partitioned admission gate dispatching on ordered predicates.
///
/// Each partition reserves `max(1, floor(limit * percent))` slots; a
/// partition may borrow capacity that other partitions are not using.
/// Shrinking the limit does not evict in-flight operations: a partition
/// above its new reservation simply drains naturally.
pub struct PredicatePartitionStrategy {
    inner: Arc<Mutex<PartitionState>>,
}

impl PredicatePartitionStrategy {
    pub fn new(
        partitions: Vec<PredicatePartition>,
        initial_limit: usize,
    ) -> Result<Self, ConfigError> {
        let mut slots: Vec<Slot> = partitions
            .into_iter()
            .map(|p| Slot {
                name: p.name,
                percent: p.percent,
                predicate: Some(p.predicate),
                reserved: 0,
                busy: 0,
            })
            .collect();
        validate_slots(&slots)?;
        let limit = initial_limit.max(1);
        for slot in &mut slots {
            slot.reserve(limit);
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(PartitionState {
                slots,
                total_busy: 0,
                limit,
            })),
        })
    }

    pub fn busy_count(&self) -> usize {
        self.inner.lock().total_busy
    }

    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }

    /// Busy count of the named partition.
    pub fn partition_busy_count(&self, name: &str) -> Option<usize> {
        let state = self.inner.lock();
        state
            .slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.busy)
    }

    /// Reserved limit of the named partition.
    pub fn partition_limit(&self, name: &str) -> Option<usize> {
        let state = self.inner.lock();
        state
            .slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.reserved)
    }
}

impl Strategy for PredicatePartitionStrategy {
    fn try_acquire(&self, ctx: &Context) -> ControlFlow<Rejection, Token> {
        let mut state = self.inner.lock();
        let index = state.slots.iter().position(|slot| {
            slot.predicate
                .as_ref()
                .map(|predicate| predicate(ctx))
                .unwrap_or(false)
        });
        let Some(index) = index else {
            return ControlFlow::Break(Rejection::Exhausted {
                in_flight: state.total_busy,
            });
        };

        let busy = state.admit(index)?;
        let name = state.slots[index].name.clone();
        let inner = Arc::clone(&self.inner);
        ControlFlow::Continue(Token::new(busy, move || {
            inner.lock().release(&name);
        }))
    }

    fn set_limit(&self, limit: usize) {
        self.inner.lock().set_limit(limit);
    }
}

impl fmt::Debug for PredicatePartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        write!(
            f,
            "PredicatePartitionStrategy{{busy={}, limit={}, partitions={}}}",
            state.total_busy,
            state.limit,
            state.slots.len()
        )
    }
}

/// A named share of a lookup-partitioned limit.
#[derive(Debug, Clone)]
pub struct LookupPartition {
    name: String,
    percent: f64,
}

impl LookupPartition {
    pub fn new(name: impl Into<String>, percent: f64) -> Self {
        Self {
            name: name.into(),
            percent,
        }
    }
}

/// Partitioned admission gate keyed by a string extracted from the context.
///
/// The default lookup reads the `"partition"` context value and falls back
/// to the empty string, so a partition named `""` acts as the catch-all.
/// Unlike the predicate strategy, partitions can be added and removed at
/// runtime.
pub struct LookupPartitionStrategy {
    lookup: Lookup,
    inner: Arc<Mutex<PartitionState>>,
}

impl LookupPartitionStrategy {
    pub fn new(
        partitions: Vec<LookupPartition>,
        initial_limit: usize,
    ) -> Result<Self, ConfigError> {
        Self::with_lookup(partitions, initial_limit, |ctx| {
            ctx.value(PARTITION_CONTEXT_KEY).unwrap_or("").to_string()
        })
    }

    pub fn with_lookup(
        partitions: Vec<LookupPartition>,
        initial_limit: usize,
        lookup: impl Fn(&Context) -> String + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        let mut slots: Vec<Slot> = partitions
            .into_iter()
            .map(|p| Slot {
                name: p.name,
                percent: p.percent,
                predicate: None,
                reserved: 0,
                busy: 0,
            })
            .collect();
        validate_slots(&slots)?;
        let limit = initial_limit.max(1);
        for slot in &mut slots {
            slot.reserve(limit);
        }
        Ok(Self {
            lookup: Box::new(lookup),
            inner: Arc::new(Mutex::new(PartitionState {
                slots,
                total_busy: 0,
                limit,
            })),
        })
    }

    /// Add a partition at runtime. Its reservation is computed from the
    /// current limit; existing partitions keep their shares.
    pub fn add_partition(&self, partition: LookupPartition) -> Result<(), ConfigError> {
        if !(partition.percent > 0.0 && partition.percent <= 1.0) {
            return Err(ConfigError::PartitionPercent {
                name: partition.name,
                percent: partition.percent,
            });
        }
        let mut state = self.inner.lock();
        if state.slots.iter().any(|slot| slot.name == partition.name) {
            return Err(ConfigError::DuplicatePartition(partition.name));
        }
        let limit = state.limit;
        let mut slot = Slot {
            name: partition.name,
            percent: partition.percent,
            predicate: None,
            reserved: 0,
            busy: 0,
        };
        slot.reserve(limit);
        state.slots.push(slot);
        Ok(())
    }

    /// Remove a partition. Outstanding tokens for it keep counting against
    /// the total until released.
    pub fn remove_partition(&self, name: &str) -> bool {
        let mut state = self.inner.lock();
        let before = state.slots.len();
        state.slots.retain(|slot| slot.name != name);
        state.slots.len() != before
    }

    pub fn busy_count(&self) -> usize {
        self.inner.lock().total_busy
    }

    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }

    pub fn partition_busy_count(&self, name: &str) -> Option<usize> {
        let state = self.inner.lock();
        state
            .slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.busy)
    }

    pub fn partition_limit(&self, name: &str) -> Option<usize> {
        let state = self.inner.lock();
        state
            .slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.reserved)
    }
}

impl Strategy for LookupPartitionStrategy {
    fn try_acquire(&self, ctx: &Context) -> ControlFlow<Rejection, Token> {
        let key = (self.lookup)(ctx);
        let mut state = self.inner.lock();
        let Some(index) = state.slots.iter().position(|slot| slot.name == key) else {
            return ControlFlow::Break(Rejection::Exhausted {
                in_flight: state.total_busy,
            });
        };

        let busy = state.admit(index)?;
        let inner = Arc::clone(&self.inner);
        ControlFlow::Continue(Token::new(busy, move || {
            inner.lock().release(&key);
        }))
    }

    fn set_limit(&self, limit: usize) {
        self.inner.lock().set_limit(limit);
    }
}

impl fmt::Debug for LookupPartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        write!(
            f,
            "LookupPartitionStrategy{{busy={}, limit={}, partitions={}}}",
            state.total_busy,
            state.limit,
            state.slots.len()
        )
    }
}
