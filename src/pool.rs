//! Page pool allocator.
//!
//! All scratch buffers come out of one pre-mapped region managed as a pool
//! of fixed-size pages. The allocation bitmap lives *inside* the pool at
//! page indices chosen at random when the pool is created, so there is no
//! fixed "allocator metadata here" signature for a memory dump to key on.
//! Freed pages are overwritten with random bytes rather than zeros, which
//! keeps released buffers from standing out as obviously dead.

use core::ptr::NonNull;

use anyhow::{Result, bail};
use obfstr::obfstring as s;

use crate::sys;

/// The size of a single pool page, in bytes.
pub const PAGE_SIZE: usize = 256;

/// The number of pages in the pool.
pub const PAGE_COUNT: usize = (1024 * 1024) / PAGE_SIZE;

/// The total size of the pool region, in bytes.
pub const POOL_BYTES: usize = PAGE_SIZE * PAGE_COUNT;

/// Pages tracked per bitmap row.
const BITS_PER_ROW: usize = u64::BITS as usize;

/// Bitmap rows that fit in one pool page.
const ROWS_PER_PAGE: usize = PAGE_SIZE / size_of::<u64>();

/// Rows required to track every page in the pool.
const ROW_COUNT: usize = PAGE_COUNT / BITS_PER_ROW;

/// Pool pages required to hold the whole page table.
const TABLE_PAGE_COUNT: usize = ROW_COUNT / ROWS_PER_PAGE;

/// Upper bound on attempts to place the page table at distinct offsets.
const PLACEMENT_ATTEMPTS: usize = 100;

/// A bounded pool of fixed-size pages carved from one mapped region.
///
/// Only whole-page allocations are served. There is no sub-page carving, no
/// coalescing and no growth; the one consumer of this allocator only ever
/// needs a handful of same-sized scratch buffers at a time.
pub struct MemoryPool {
    /// Base address of the mapped region.
    base: NonNull<u8>,

    /// Indices of the pages that hold the allocation bitmap.
    table_pages: [usize; TABLE_PAGE_COUNT],
}

impl MemoryPool {
    /// Creates a new pool backed by a fresh anonymous mapping.
    ///
    /// # Returns
    ///
    /// * `Ok(MemoryPool)` with the page-table pages placed at random,
    ///   zeroed, and marked allocated.
    /// * `Err(anyhow::Error)` if the randomness source under-delivers, the
    ///   placement draw keeps colliding, or the kernel refuses the mapping.
    pub fn create() -> Result<Self> {
        let table_pages = Self::pick_table_pages()?;

        let Some(base) = sys::map_region(POOL_BYTES) else {
            bail!(s!("failed to map the pool region"));
        };

        let mut pool = Self { base, table_pages };

        for &page in &pool.table_pages {
            unsafe { pool.page_ptr(page).write_bytes(0, PAGE_SIZE) };
        }

        for index in 0..TABLE_PAGE_COUNT {
            pool.mark_allocated(pool.table_pages[index]);
        }

        Ok(pool)
    }

    /// Draws mutually distinct page indices for the page table.
    ///
    /// A collision discards the whole candidate set and redraws it, rather
    /// than replacing the colliding entry.
    fn pick_table_pages() -> Result<[usize; TABLE_PAGE_COUNT]> {
        let mut entropy = [0u8; TABLE_PAGE_COUNT * size_of::<u64>()];

        'attempt: for _ in 0..PLACEMENT_ATTEMPTS {
            if sys::fill_random(&mut entropy) != entropy.len() {
                bail!(s!("randomness source under-delivered"));
            }

            let mut pages = [0usize; TABLE_PAGE_COUNT];
            for (slot, chunk) in pages.iter_mut().zip(entropy.chunks_exact(size_of::<u64>())) {
                let mut word = [0u8; size_of::<u64>()];
                word.copy_from_slice(chunk);
                *slot = (u64::from_ne_bytes(word) % PAGE_COUNT as u64) as usize;
            }

            for index in 1..TABLE_PAGE_COUNT {
                if pages[..index].contains(&pages[index]) {
                    continue 'attempt;
                }
            }

            return Ok(pages);
        }

        bail!(s!("page table placement kept colliding"))
    }

    /// Allocates one page from the pool.
    ///
    /// The scan starts at a page index drawn from the kernel randomness
    /// source and wraps, so which free page is handed out is not
    /// predictable across runs. A randomness shortfall degrades to scanning
    /// from page zero.
    ///
    /// # Arguments
    ///
    /// * `length` - The requested buffer size, at most [`PAGE_SIZE`].
    ///
    /// # Returns
    ///
    /// * A pointer to the start of a page, or `None` if `length` exceeds a
    ///   page or every page is allocated.
    pub fn allocate(&mut self, length: usize) -> Option<NonNull<u8>> {
        if length > PAGE_SIZE {
            return None;
        }

        let mut entropy = [0u8; size_of::<u64>()];
        let mut start = 0usize;
        if sys::fill_random(&mut entropy) == entropy.len() {
            start = (u64::from_ne_bytes(entropy) % PAGE_COUNT as u64) as usize;
        }

        for step in 0..PAGE_COUNT {
            let page = (start + step) % PAGE_COUNT;
            if !self.is_allocated(page) {
                self.mark_allocated(page);
                return Some(unsafe { NonNull::new_unchecked(self.page_ptr(page)) });
            }
        }

        None
    }

    /// Releases a page back to the pool.
    ///
    /// Pointers outside the pool and pages that are already free are
    /// ignored, so a double release is harmless. A released page is
    /// overwritten with random bytes before this returns; the previous
    /// contents do not survive into the next allocation.
    ///
    /// # Arguments
    ///
    /// * `address` - Any address inside the page to release.
    pub fn release(&mut self, address: *mut u8) {
        let base = self.base.as_ptr() as usize;
        let address = address as usize;

        if address < base {
            return;
        }

        let offset = address - base;
        if offset >= POOL_BYTES {
            return;
        }

        let page = offset / PAGE_SIZE;
        if !self.is_allocated(page) {
            return;
        }

        self.mark_free(page);
        self.scramble(page);
    }

    /// Overwrites a page with random junk.
    ///
    /// Random rather than zero: a zeroed page advertises that it was
    /// scrubbed, junk still looks in use. A randomness shortfall quietly
    /// reuses whatever is already in the refill buffer.
    fn scramble(&mut self, page: usize) {
        let mut noise = [0u8; 64];
        let start = self.page_ptr(page);

        for chunk in 0..PAGE_SIZE / noise.len() {
            let _ = sys::fill_random(&mut noise);
            unsafe {
                core::ptr::copy_nonoverlapping(
                    noise.as_ptr(),
                    start.add(chunk * noise.len()),
                    noise.len(),
                );
            }
        }
    }

    /// Returns a pointer to the start of the given page.
    fn page_ptr(&self, page: usize) -> *mut u8 {
        unsafe { self.base.as_ptr().add(page * PAGE_SIZE) }
    }

    /// Returns a pointer to the bitmap row that tracks the given page.
    ///
    /// The index is not range-checked; callers stay within the pool.
    fn row_ptr(&self, page: usize) -> *mut u64 {
        let row = page / BITS_PER_ROW;
        let section = self.table_pages[row / ROWS_PER_PAGE];
        let slot = row % ROWS_PER_PAGE;
        unsafe { self.page_ptr(section).cast::<u64>().add(slot) }
    }

    /// Reports whether the given page is currently allocated.
    fn is_allocated(&self, page: usize) -> bool {
        let mask = 1u64 << (page % BITS_PER_ROW);
        unsafe { self.row_ptr(page).read() & mask != 0 }
    }

    /// Sets the allocation bit for the given page.
    fn mark_allocated(&mut self, page: usize) {
        let row = self.row_ptr(page);
        let mask = 1u64 << (page % BITS_PER_ROW);
        unsafe { row.write(row.read() | mask) };
    }

    /// Clears the allocation bit for the given page.
    fn mark_free(&mut self, page: usize) {
        let row = self.row_ptr(page);
        let mask = !(1u64 << (page % BITS_PER_ROW));
        unsafe { row.write(row.read() & mask) };
    }
}

impl Drop for MemoryPool {
    /// Unmaps the whole region. Pointers into the pool are dead after this.
    fn drop(&mut self) {
        sys::unmap_region(self.base.as_ptr(), POOL_BYTES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocated_pages(pool: &MemoryPool) -> Vec<usize> {
        (0..PAGE_COUNT).filter(|&page| pool.is_allocated(page)).collect()
    }

    #[test]
    fn a_fresh_pool_only_holds_its_own_table() {
        let pool = MemoryPool::create().expect("pool creation failed");

        let mut expected = pool.table_pages.to_vec();
        expected.sort_unstable();

        let mut found = allocated_pages(&pool);
        found.sort_unstable();

        assert_eq!(found, expected);
    }

    #[test]
    fn table_pages_are_mutually_distinct() {
        let pool = MemoryPool::create().expect("pool creation failed");
        for index in 1..TABLE_PAGE_COUNT {
            assert!(!pool.table_pages[..index].contains(&pool.table_pages[index]));
        }
    }

    #[test]
    fn oversized_requests_are_refused() {
        let mut pool = MemoryPool::create().expect("pool creation failed");
        assert!(pool.allocate(PAGE_SIZE + 1).is_none());
        assert!(pool.allocate(PAGE_SIZE).is_some());
    }

    #[test]
    fn allocate_never_hands_out_a_page_twice() {
        let mut pool = MemoryPool::create().expect("pool creation failed");
        let mut seen = std::collections::HashSet::new();

        while let Some(buffer) = pool.allocate(PAGE_SIZE) {
            assert!(seen.insert(buffer.as_ptr() as usize));
        }

        assert_eq!(seen.len(), PAGE_COUNT - TABLE_PAGE_COUNT);
    }

    #[test]
    fn released_pages_are_scrambled() {
        let mut pool = MemoryPool::create().expect("pool creation failed");
        let buffer = pool.allocate(PAGE_SIZE).expect("pool is empty");

        unsafe { buffer.as_ptr().write_bytes(0x41, PAGE_SIZE) };
        pool.release(buffer.as_ptr());

        let after = unsafe { core::slice::from_raw_parts(buffer.as_ptr(), PAGE_SIZE) };
        assert!(after.iter().any(|&byte| byte != 0x41));
        assert!(after.iter().any(|&byte| byte != 0x00));
    }

    #[test]
    fn double_release_leaves_the_table_intact() {
        let mut pool = MemoryPool::create().expect("pool creation failed");
        let before = allocated_pages(&pool).len();

        let buffer = pool.allocate(PAGE_SIZE).expect("pool is empty");
        assert_eq!(allocated_pages(&pool).len(), before + 1);

        pool.release(buffer.as_ptr());
        pool.release(buffer.as_ptr());
        assert_eq!(allocated_pages(&pool).len(), before);
    }

    #[test]
    fn foreign_pointers_are_ignored() {
        let mut pool = MemoryPool::create().expect("pool creation failed");
        let before = allocated_pages(&pool);

        let mut outside = [0u8; 8];
        pool.release(outside.as_mut_ptr());
        pool.release(unsafe { pool.base.as_ptr().add(POOL_BYTES) });

        assert_eq!(allocated_pages(&pool), before);
    }

    #[test]
    fn interior_pointers_release_the_containing_page() {
        let mut pool = MemoryPool::create().expect("pool creation failed");
        let buffer = pool.allocate(PAGE_SIZE).expect("pool is empty");

        pool.release(unsafe { buffer.as_ptr().add(PAGE_SIZE / 2) });

        let base = pool.base.as_ptr() as usize;
        let page = (buffer.as_ptr() as usize - base) / PAGE_SIZE;
        assert!(!pool.is_allocated(page));
    }
}
