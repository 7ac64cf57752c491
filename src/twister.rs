//! MT19937 pseudo-random generator.
//!
//! The sequence must be reproducible by the offline patching tool, so the
//! generator is written out in full rather than pulled from a randomness
//! crate with its own seeding conventions. Parameters follow the published
//! MT19937 description.

/// Degree of recurrence, the number of words of internal state.
pub const STATE_SIZE: usize = 624;

/// Coefficients of the rational normal form twist matrix.
const MATRIX_A: u32 = 0x9908_b0df;

/// Tempering bitmask, `b` parameter.
const TEMPER_B: u32 = 0x9d2c_5680;

/// Tempering bitmask, `c` parameter.
const TEMPER_C: u32 = 0xefc6_0000;

/// Seeding multiplier, `f` parameter.
const SEED_F: u32 = 0x6c07_8965;

/// Middle word offset used by the recurrence, `m` parameter.
const MIDDLE_M: usize = 0x18d;

/// Tempering shifts `u`, `s`, `t` and `l`.
const SHIFT_U: u32 = 11;
const SHIFT_S: u32 = 7;
const SHIFT_T: u32 = 15;
const SHIFT_L: u32 = 18;

/// Most significant bit of a state word.
const UPPER_MASK: u32 = 1 << 31;

/// Remaining bits of a state word.
const LOWER_MASK: u32 = !UPPER_MASK;

/// Mersenne twister generator state.
///
/// A pure value type. Copying the struct is the only way to save or restore
/// a position in the sequence; reseeding requires a new instance.
#[derive(Clone)]
pub struct MersenneTwister {
    state: [u32; STATE_SIZE],
    index: usize,
}

impl MersenneTwister {
    /// Creates a new generator initialised from the given seed.
    ///
    /// # Arguments
    ///
    /// * `seed` - The seed value used to derive the initial state.
    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; STATE_SIZE];
        state[0] = seed;

        for index in 1..STATE_SIZE {
            let previous = state[index - 1];
            state[index] = SEED_F
                .wrapping_mul(previous ^ (previous >> 30))
                .wrapping_add(index as u32);
        }

        Self { state, index: STATE_SIZE }
    }

    /// Creates a new generator from a 64-bit seed.
    ///
    /// The wide seed adds no entropy, its halves are folded together with
    /// XOR. This is a convenience for callers that carry 64-bit values.
    pub fn from_wide_seed(seed: u64) -> Self {
        let high = (seed >> 32) as u32;
        let low = seed as u32;
        Self::new(high ^ low)
    }

    /// Generates the next 32-bit word of the sequence.
    pub fn next_u32(&mut self) -> u32 {
        if self.index >= STATE_SIZE {
            self.twist();
        }

        let mut word = self.state[self.index];
        self.index += 1;

        word ^= word >> SHIFT_U;
        word ^= (word << SHIFT_S) & TEMPER_B;
        word ^= (word << SHIFT_T) & TEMPER_C;
        word ^= word >> SHIFT_L;
        word
    }

    /// Regenerates the internal state once every word has been consumed.
    fn twist(&mut self) {
        for index in 0..STATE_SIZE {
            let next = (index + 1) % STATE_SIZE;
            let take = (index + MIDDLE_M) % STATE_SIZE;

            let split = (self.state[index] & UPPER_MASK) | (self.state[next] & LOWER_MASK);
            let mut shifted = split >> 1;
            if split & 1 != 0 {
                shifted ^= MATRIX_A;
            }

            self.state[index] = self.state[take] ^ shifted;
        }

        self.index = 0;
    }
}

/// Byte-granular view over a [`MersenneTwister`] sequence.
///
/// Byte `i` of the stream is byte `i % 4` (little-endian) of the word
/// produced by the `i / 4`-th draw. Words are drawn lazily, four bytes at a
/// time, so the expanded stream never exists as a buffer. Indices must be
/// fed in increasing order starting from zero.
#[derive(Clone)]
pub struct KeyStream {
    twister: MersenneTwister,
    word: u32,
}

impl KeyStream {
    /// Wraps an existing generator.
    pub fn new(twister: MersenneTwister) -> Self {
        Self { twister, word: 0 }
    }

    /// Creates a stream from a 64-bit seed, folding as
    /// [`MersenneTwister::from_wide_seed`] does.
    pub fn from_wide_seed(seed: u64) -> Self {
        Self::new(MersenneTwister::from_wide_seed(seed))
    }

    /// Returns byte `index` of the stream, drawing a fresh word on every
    /// fourth byte.
    pub fn byte_at(&mut self, index: usize) -> u8 {
        if index % 4 == 0 {
            self.word = self.twister.next_u32();
        }

        self.word.to_le_bytes()[index % 4]
    }
}
