//! Incremental integrity hash chain.
//!
//! A single 64-bit value is threaded through every checkpoint the program
//! passes. Each advance hashes a set of memory regions described by a table
//! the offline patcher bakes into the binary, so the value a given
//! checkpoint observes depends on every region hashed before it, in order.
//! Skipping a checkpoint, reordering two of them, or patching a hashed
//! region all surface as a silently different chain value, never as an
//! explicit failure.

use crate::pool::{MemoryPool, PAGE_SIZE};

/// Length value that terminates a region descriptor table.
pub const REGION_SENTINEL: u32 = u32::MAX;

/// Multiplier of the one-at-a-time hash step.
const HASH_MULTIPLIER: u64 = 0x5bd1_e995_5bd1_e995;

/// Fold shift of the one-at-a-time hash step.
const HASH_FOLD_SHIFT: u32 = 47;

/// One span of memory the chain must cover.
///
/// `offset` is relative to the base address carried by the table that owns
/// the descriptor. The layout is fixed; the offline patcher writes these
/// entries directly into the reserved table in the binary image.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RegionDescriptor {
    /// Number of bytes to hash, or [`REGION_SENTINEL`] to stop.
    pub length: u32,

    /// Start of the span, relative to the table base.
    pub offset: u32,
}

impl RegionDescriptor {
    /// The terminator entry.
    pub const SENTINEL: Self = Self { length: REGION_SENTINEL, offset: 0 };

    /// Creates a descriptor covering `length` bytes at `offset`.
    pub const fn new(length: u32, offset: u32) -> Self {
        Self { length, offset }
    }

    /// Reports whether this entry terminates the table.
    pub fn is_sentinel(&self) -> bool {
        self.length == REGION_SENTINEL
    }
}

/// A region descriptor table together with the base its offsets resolve
/// against.
///
/// The base is carried as a plain integer so the table can live in a
/// static. In the shipped binary both the entries and the base anchor are
/// patcher-owned; tests build tables over fixture buffers instead.
#[derive(Clone, Copy)]
pub struct HashPatchTable<'a> {
    base: u64,
    entries: &'a [RegionDescriptor],
}

impl<'a> HashPatchTable<'a> {
    /// Creates a table over the given entries.
    ///
    /// # Safety
    ///
    /// Every entry before the first sentinel must describe `length`
    /// readable bytes at `base + offset`, and those bytes must stay
    /// readable for as long as the table is used.
    pub const unsafe fn new(base: u64, entries: &'a [RegionDescriptor]) -> Self {
        Self { base, entries }
    }

    /// The base address the entry offsets are relative to.
    pub fn base(&self) -> *const u8 {
        self.base as *const u8
    }

    /// The raw entry slice, sentinel included.
    pub fn entries(&self) -> &'a [RegionDescriptor] {
        self.entries
    }
}

/// One-at-a-time multiplicative hash update.
///
/// Streaming: feeding `[A][B]` in one call is the same as hashing `A` and
/// passing the result in as the state for `B`. Determinism matters more
/// than collision resistance here, the expected outputs are computed
/// offline and baked in.
///
/// # Arguments
///
/// * `data` - The bytes to fold into the state.
/// * `state` - The current hash state, or a seed for the first buffer.
///
/// # Returns
///
/// * The state after consuming `data`.
pub fn murmur_oaat64(data: &[u8], mut state: u64) -> u64 {
    for &byte in data {
        state ^= u64::from(byte);
        state = state.wrapping_mul(HASH_MULTIPLIER);
        state ^= state >> HASH_FOLD_SHIFT;
    }

    state
}

/// Advances the chain over every region the table describes.
///
/// The descriptor entries are first copied into a pool-allocated scratch
/// page so the working copy sits at a randomized address, then walked in
/// order up to the sentinel, threading the hash state through each span.
/// If no scratch page can be had the state passes through unchanged; a
/// starved pool quietly skips the advance rather than failing the run.
///
/// # Arguments
///
/// * `state` - The chain state going in.
/// * `table` - The regions to cover and their base.
/// * `pool` - Scratch allocator for the working copy of the table.
///
/// # Returns
///
/// * The chain state after every region has been hashed.
pub fn advance_chain(state: u64, table: &HashPatchTable<'_>, pool: &mut MemoryPool) -> u64 {
    let Some(scratch) = pool.allocate(PAGE_SIZE) else {
        return state;
    };

    let capacity = PAGE_SIZE / size_of::<RegionDescriptor>();
    let count = table.entries().len().min(capacity);

    let working = unsafe {
        let entries = scratch.as_ptr().cast::<RegionDescriptor>();
        core::ptr::copy_nonoverlapping(table.entries().as_ptr(), entries, count);
        core::slice::from_raw_parts(entries, count)
    };

    let mut state = state;
    for entry in working {
        if entry.is_sentinel() {
            break;
        }

        let region = unsafe {
            core::slice::from_raw_parts(table.base().add(entry.offset as usize), entry.length as usize)
        };
        state = murmur_oaat64(region, state);
    }

    pool.release(scratch.as_ptr());
    state
}
