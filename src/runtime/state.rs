//! Hashed program states.
//!
//! At every scheduling point the scheduler captures a digest of the current
//! execution state for the running operation. The state-aware strategies
//! (greedy random, Q-learning) key their tables by these digests, so the
//! granularity of the digest decides which executions they consider "the
//! same place".

use core::fmt;
use core::str::FromStr;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};

use super::operation::AsyncOperation;
use crate::util::DetHasher;

/// Granularity at which program state is hashed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbstractionLevel {
    /// Operation ids, statuses and pending scheduling points.
    #[default]
    Default,
    /// Operation ids and statuses only.
    InboxOnly,
    /// The value controlled code last reported with `set_custom_state`.
    Custom,
    /// Everything `Default` hashes plus pending targets and the custom value.
    Full,
}

impl AbstractionLevel {
    /// All levels, in the order they are stored in a [`HashedState`].
    pub const ALL: [Self; 4] = [Self::Default, Self::InboxOnly, Self::Custom, Self::Full];

    const fn index(self) -> usize {
        match self {
            Self::Default => 0,
            Self::InboxOnly => 1,
            Self::Custom => 2,
            Self::Full => 3,
        }
    }
}

impl fmt::Display for AbstractionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::InboxOnly => "inbox-only",
            Self::Custom => "custom",
            Self::Full => "full",
        };
        f.write_str(name)
    }
}

impl FromStr for AbstractionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "inbox-only" | "inbox_only" | "inboxonly" => Ok(Self::InboxOnly),
            "custom" => Ok(Self::Custom),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown abstraction level '{other}'")),
        }
    }
}

/// One digest per [`AbstractionLevel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HashedState([u64; 4]);

impl HashedState {
    /// Returns the digest for `level`.
    #[must_use]
    pub const fn get(&self, level: AbstractionLevel) -> u64 {
        self.0[level.index()]
    }

    /// Sets the digest for `level`.
    pub fn set(&mut self, level: AbstractionLevel, value: u64) {
        self.0[level.index()] = value;
    }
}

/// Computes state digests from the operation registry.
///
/// Implementations must be pure: the same registry contents and custom value
/// must always produce the same digest.
pub trait StateHasher: Send + Sync {
    /// Digests `operations` (ordered by id) at `level`.
    fn hash_state(
        &self,
        level: AbstractionLevel,
        operations: &[&AsyncOperation],
        custom: Option<u64>,
    ) -> u64;

    /// Digests every level at once.
    fn capture(&self, operations: &[&AsyncOperation], custom: Option<u64>) -> HashedState {
        let mut state = HashedState::default();
        for level in AbstractionLevel::ALL {
            state.set(level, self.hash_state(level, operations, custom));
        }
        state
    }
}

/// The default [`StateHasher`], built on [`DetHasher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationStateHasher;

impl StateHasher for OperationStateHasher {
    fn hash_state(
        &self,
        level: AbstractionLevel,
        operations: &[&AsyncOperation],
        custom: Option<u64>,
    ) -> u64 {
        let (with_type, full) = match level {
            AbstractionLevel::Default => (true, false),
            AbstractionLevel::InboxOnly => (false, false),
            AbstractionLevel::Custom => match custom {
                Some(value) => {
                    let mut hasher = DetHasher::default();
                    hasher.write_u64(value);
                    return hasher.finish();
                }
                None => (true, false),
            },
            AbstractionLevel::Full => (true, true),
        };

        let mut hasher = DetHasher::default();
        for op in operations {
            op.hash_into(&mut hasher, with_type, full);
        }
        if full {
            hasher.write_u64(custom.unwrap_or_default());
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::operation::{OperationId, OperationStatus, OperationType, OperationTarget};

    fn registry() -> Vec<AsyncOperation> {
        (0..3)
            .map(|i| AsyncOperation::new(OperationId::new(i), format!("op{i}")))
            .collect()
    }

    fn hash(level: AbstractionLevel, ops: &[AsyncOperation], custom: Option<u64>) -> u64 {
        let refs: Vec<&AsyncOperation> = ops.iter().collect();
        OperationStateHasher.hash_state(level, &refs, custom)
    }

    #[test]
    fn same_registry_same_digest() {
        let a = registry();
        let b = registry();
        for level in AbstractionLevel::ALL {
            assert_eq!(hash(level, &a, None), hash(level, &b, None));
        }
    }

    #[test]
    fn status_change_changes_every_level() {
        let a = registry();
        let mut b = registry();
        b[1].set_status(OperationStatus::BlockedOnResource);
        assert_ne!(
            hash(AbstractionLevel::Default, &a, None),
            hash(AbstractionLevel::Default, &b, None)
        );
        assert_ne!(
            hash(AbstractionLevel::InboxOnly, &a, None),
            hash(AbstractionLevel::InboxOnly, &b, None)
        );
    }

    #[test]
    fn inbox_only_ignores_pending_type() {
        let a = registry();
        let mut b = registry();
        b[0].set_pending(OperationType::Yield, OperationTarget::Task, 0);
        assert_eq!(
            hash(AbstractionLevel::InboxOnly, &a, None),
            hash(AbstractionLevel::InboxOnly, &b, None)
        );
        assert_ne!(
            hash(AbstractionLevel::Default, &a, None),
            hash(AbstractionLevel::Default, &b, None)
        );
    }

    #[test]
    fn full_sees_targets_and_custom() {
        let a = registry();
        let mut b = registry();
        b[0].set_pending(OperationType::Start, OperationTarget::Lock, 0);
        assert_eq!(
            hash(AbstractionLevel::Default, &a, None),
            hash(AbstractionLevel::Default, &b, None)
        );
        assert_ne!(
            hash(AbstractionLevel::Full, &a, None),
            hash(AbstractionLevel::Full, &b, None)
        );
        assert_ne!(
            hash(AbstractionLevel::Full, &a, Some(1)),
            hash(AbstractionLevel::Full, &a, Some(2))
        );
    }

    #[test]
    fn custom_level_uses_reported_value() {
        let a = registry();
        let mut b = registry();
        b[2].set_status(OperationStatus::Completed);
        assert_eq!(
            hash(AbstractionLevel::Custom, &a, Some(9)),
            hash(AbstractionLevel::Custom, &b, Some(9))
        );
        assert_eq!(
            hash(AbstractionLevel::Custom, &a, None),
            hash(AbstractionLevel::Default, &a, None)
        );
    }

    #[test]
    fn level_names_round_trip() {
        for level in AbstractionLevel::ALL {
            assert_eq!(level.to_string().parse::<AbstractionLevel>(), Ok(level));
        }
        assert!("bogus".parse::<AbstractionLevel>().is_err());
    }
}
