//! Stable hashing for program states and strategy tables.
//!
//! `std`'s `RandomState` is keyed per process. State hashes and the maps the
//! learning strategies iterate over use [`DetHasher`] instead so that a seed
//! reproduces the same schedules in every process.

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the written bytes, finished with a splitmix64 avalanche.
#[derive(Debug, Clone, Copy)]
pub struct DetHasher(u64);

impl Default for DetHasher {
    fn default() -> Self {
        Self(FNV_OFFSET)
    }
}

impl Hasher for DetHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0 = bytes
            .iter()
            .fold(self.0, |acc, &b| (acc ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    }

    fn finish(&self) -> u64 {
        let mut z = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

/// Builds [`DetHasher`]s.
pub type DetBuildHasher = BuildHasherDefault<DetHasher>;

/// `HashMap` whose iteration order only depends on its contents.
pub type DetHashMap<K, V> = HashMap<K, V, DetBuildHasher>;

/// `HashSet` whose iteration order only depends on its contents.
pub type DetHashSet<K> = HashSet<K, DetBuildHasher>;

/// Stable hash of one value.
#[must_use]
pub fn det_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    DetBuildHasher::default().hash_one(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(det_hash("main"), det_hash("main"));
        assert_ne!(det_hash("main"), det_hash("child"));
        assert_ne!(det_hash(&7u64), det_hash(&8u64));
    }

    #[test]
    fn split_writes_hash_like_one_write() {
        let mut whole = DetHasher::default();
        whole.write(b"stepwise");
        let mut split = DetHasher::default();
        split.write(b"step");
        split.write(b"wise");
        assert_eq!(whole.finish(), split.finish());
    }

    #[test]
    fn set_order_is_stable() {
        let collect = || {
            (0..100u64)
                .map(|i| i.wrapping_mul(0x2545_f491_4f6c_dd1d))
                .collect::<DetHashSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(), collect());
    }
}
