//! Seeded pseudo-random source for the exploration strategies.
//!
//! Every random decision a strategy makes is drawn from a [`DetRng`], so two
//! campaigns started with the same seed take the same decisions in the same
//! order and produce identical schedule traces.

/// splitmix64 generator. Any seed, including zero, is valid.
#[derive(Debug, Clone)]
pub struct DetRng {
    seed: u64,
    counter: u64,
}

impl DetRng {
    const GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

    /// Creates a generator from `seed`.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: seed,
        }
    }

    /// The seed this generator was created with.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(Self::GAMMA);
        let mut z = self.counter;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform value in `[0, bound)` by multiply-shift reduction.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    pub fn next_usize(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "bound must be non-zero");
        let wide = u128::from(self.next_u64()) * bound as u128;
        (wide >> 64) as usize
    }

    /// Like [`next_usize`](Self::next_usize) for `u32` ranges.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    pub fn next_below(&mut self, bound: u32) -> u32 {
        assert!(bound > 0, "bound must be non-zero");
        let wide = u128::from(self.next_u64()) * u128::from(bound);
        (wide >> 64) as u32
    }

    /// Uniform `f64` in `[0, 1)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Fair coin.
    pub fn next_bool(&mut self) -> bool {
        self.next_u64() >> 63 == 1
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for upper in (1..items.len()).rev() {
            let pick = self.next_usize(upper + 1);
            items.swap(upper, pick);
        }
    }
}
