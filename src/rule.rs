//! Exclusivity rules checked by the execution service before a job starts.
//!
//! [`ConflictRule`] is the only mutual-exclusion primitive: two rules conflict
//! when their lock keys are equal by value. The service does the locking; a
//! rule only answers the equality question, so it needs no locking itself.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{JobError, Result};

/// A type-erased, equality-comparable value used as a lock key or job family.
///
/// Keys of different concrete types are never equal.
pub trait Key: Any + Send + Sync + fmt::Debug {
    fn key_eq(&self, other: &dyn Key) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Key for T
where
    T: Any + PartialEq + Send + Sync + fmt::Debug,
{
    fn key_eq(&self, other: &dyn Key) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to a type-erased key.
pub type SharedKey = Arc<dyn Key>;

/// A predicate the execution service uses to keep jobs from overlapping.
pub trait SchedulingRule: Send + Sync + fmt::Debug {
    /// Whether this rule is satisfied by holding `other`.
    fn contains(&self, other: &dyn SchedulingRule) -> bool;

    /// Whether a job holding this rule may not run alongside one holding `other`.
    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Lets two jobs sharing the same lock key run one after another, never together.
#[derive(Clone)]
pub struct ConflictRule {
    lock: SharedKey,
}

impl ConflictRule {
    pub fn new<K: Key>(lock: K) -> Self {
        Self {
            lock: Arc::new(lock),
        }
    }

    /// Builds a rule from an optional key, rejecting a missing one.
    pub fn try_new<K: Key>(lock: Option<K>) -> Result<Self> {
        lock.map(Self::new)
            .ok_or_else(|| JobError::invalid_argument("the conflict rule lock is missing"))
    }

    pub(crate) fn from_shared(lock: SharedKey) -> Self {
        Self { lock }
    }

    pub fn lock(&self) -> &dyn Key {
        self.lock.as_ref()
    }

    /// True iff `other` is also a `ConflictRule` with an equal lock.
    pub fn conflicts_with(&self, other: &dyn SchedulingRule) -> bool {
        other
            .as_any()
            .downcast_ref::<ConflictRule>()
            .is_some_and(|that| self.lock.key_eq(that.lock.as_ref()))
    }
}

impl SchedulingRule for ConflictRule {
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        std::ptr::addr_eq(self as *const Self, other as *const dyn SchedulingRule)
    }

    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool {
        self.conflicts_with(other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for ConflictRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictRule")
            .field("lock", &self.lock)
            .finish()
    }
}
