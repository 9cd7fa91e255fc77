//! Deterministic building blocks shared by the scheduler and strategies.

pub mod det_hash;
pub mod det_rng;

pub use det_hash::{det_hash, DetBuildHasher, DetHashMap, DetHashSet, DetHasher};
pub use det_rng::DetRng;
