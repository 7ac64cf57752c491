//! Password gate and flag release.
//!
//! The gatekeeper walks a fixed sequence of checkpoints, advancing the
//! integrity chain at each one. The keystreams that decode the reference
//! password and the flag are seeded from the chain state at specific
//! checkpoints, XOR-masked to a value computed offline. Reaching those
//! call sites in any order other than the intended one leaves the chain
//! somewhere else entirely, the derived seeds become noise, and the run
//! dead-ends in a refusal without a single explicit tamper check.

use anyhow::Result;
use obfstr::obfbytes as b;

use crate::integrity::{advance_chain, murmur_oaat64};
use crate::pool::{MemoryPool, PAGE_SIZE};
use crate::secrets::SecretProfile;
use crate::sys;
use crate::twister::KeyStream;

/// Derives one byte of the decoded reference value at `index`.
///
/// The reference span is consumed modulo its length and XORed against the
/// lazily drawn keystream byte, so neither the decoded password nor the
/// decoded flag ever exists as a contiguous buffer during verification.
pub fn next_password_character(index: usize, stream: &mut KeyStream, reference: &[u8]) -> u8 {
    reference[index % reference.len()] ^ stream.byte_at(index)
}

/// Session state for one verification run.
///
/// Drives `Init -> Prompted -> PasswordRead -> (Accepted | Rejected) ->
/// Done` through [`Gatekeeper::run`]. The states are not reified; they are
/// the call sites the chain advances at, which is the point.
pub struct Gatekeeper<'a> {
    /// Current integrity chain state.
    chain: u64,

    /// Pool backing every scratch buffer of the run.
    pool: MemoryPool,

    /// Baked constants and encoded reference spans.
    profile: &'a SecretProfile<'a>,

    /// Descriptor the password line is read from.
    input: i32,

    /// Descriptor the prompt and verdict are written to.
    output: i32,
}

impl<'a> Gatekeeper<'a> {
    /// Creates the session: maps the pool and performs the first chain
    /// advance, seeded from the baked chain seed.
    ///
    /// # Arguments
    ///
    /// * `profile` - The constants and spans to verify against.
    /// * `input` - Descriptor to read the candidate password from.
    /// * `output` - Descriptor to write responses to.
    ///
    /// # Returns
    ///
    /// * `Err(anyhow::Error)` if the pool cannot be created. Nothing has
    ///   been written to `output` in that case; there is no safe scratch
    ///   buffer to write from.
    pub fn new(profile: &'a SecretProfile<'a>, input: i32, output: i32) -> Result<Self> {
        let mut pool = MemoryPool::create()?;
        let chain = advance_chain(profile.chain_seed, &profile.regions, &mut pool);

        Ok(Self { chain, pool, profile, input, output })
    }

    /// Runs the session to completion.
    ///
    /// Prompts, reads one line, verifies it, and emits exactly one of the
    /// three responses. Resource exhaustion anywhere along the way skips
    /// the affected step and falls through; it never aborts the process.
    pub fn run(&mut self) {
        let Some(buffer) = self.pool.allocate(PAGE_SIZE) else {
            return;
        };
        let page = unsafe { core::slice::from_raw_parts_mut(buffer.as_ptr(), PAGE_SIZE) };

        let prompt = b!(b"Password: ");
        page[..prompt.len()].copy_from_slice(prompt);

        if sys::write_all(self.output, &page[..prompt.len()]) {
            self.chain = advance_chain(self.chain, &self.profile.regions, &mut self.pool);

            let line = sys::read_line(self.input, &mut page[..PAGE_SIZE - 1]);
            let accepted = line != 0 && self.check_password(&page[..line]) == 0;

            if accepted {
                self.release_flag();
            } else {
                let verdict = b!(b"Sorry, thats not it.\n");
                page[..verdict.len()].copy_from_slice(verdict);
                let _ = sys::write_all(self.output, &page[..verdict.len()]);
            }
        }

        self.pool.release(buffer.as_ptr());
    }

    /// Verifies a candidate password against the encoded reference.
    ///
    /// Every character is compared; mismatches accumulate instead of
    /// short-circuiting, and one extra derivation at `candidate.len()`
    /// requires the decoded reference to terminate exactly there. The
    /// accumulation is load-bearing: switching it to an early-exit
    /// comparison changes acceptance behavior.
    ///
    /// # Returns
    ///
    /// * `0` when every byte matched and the lengths agree, non-zero
    ///   otherwise.
    pub fn check_password(&mut self, candidate: &[u8]) -> u64 {
        let mut result: u64 = 0;

        let Some(buffer) = self.pool.allocate(PAGE_SIZE) else {
            return result;
        };

        // Only the intended execution history lands this seed on the value
        // the reference span was encoded against.
        let mut stream = KeyStream::from_wide_seed(self.chain ^ self.profile.password_gate_mask);

        self.chain = advance_chain(self.chain, &self.profile.regions, &mut self.pool);

        let reference = unsafe {
            core::slice::from_raw_parts_mut(buffer.as_ptr(), self.profile.password_mask.len())
        };
        reference.copy_from_slice(self.profile.password_mask);

        for (index, &byte) in candidate.iter().enumerate() {
            result += u64::from(next_password_character(index, &mut stream, reference) ^ byte);
        }

        self.chain = advance_chain(self.chain, &self.profile.regions, &mut self.pool);

        // The decoded reference must terminate exactly where the candidate
        // ends; a prefix of the real password stays rejected.
        if next_password_character(candidate.len(), &mut stream, reference) != 0x00 {
            result += 1;
        }

        self.pool.release(buffer.as_ptr());
        result
    }

    /// Decodes the flag and emits the final response.
    ///
    /// The decode always runs. Its result is only emitted if a hash of the
    /// decoded bytes, seeded with the final chain state, matches the baked
    /// expectation; otherwise a fixed warning goes out and the decoded
    /// buffer is discarded with the page. A run that forged its way past
    /// the password check still fails here.
    pub fn release_flag(&mut self) {
        let Some(buffer) = self.pool.allocate(PAGE_SIZE) else {
            return;
        };

        self.chain = advance_chain(self.chain, &self.profile.regions, &mut self.pool);

        let mut stream = KeyStream::from_wide_seed(self.chain ^ self.profile.flag_gate_mask);

        let page = unsafe { core::slice::from_raw_parts_mut(buffer.as_ptr(), PAGE_SIZE) };
        let prefix = b!(b"OK - Flag: ");
        let prefix_len = prefix.len();
        page[..prefix_len].copy_from_slice(prefix);

        let mask_len = self.profile.flag_mask.len();
        let flag_region = &mut page[prefix_len..];
        flag_region[..mask_len].copy_from_slice(self.profile.flag_mask);

        // In-place decode, one byte at a time, stopping at the first
        // terminator or the end of the page.
        let limit = PAGE_SIZE - prefix_len;
        let mut cursor = 0usize;
        loop {
            let decoded = flag_region[cursor % mask_len] ^ stream.byte_at(cursor);
            flag_region[cursor] = decoded;
            cursor += 1;
            if cursor >= limit || decoded == 0 {
                break;
            }
        }

        self.chain = advance_chain(self.chain, &self.profile.regions, &mut self.pool);

        let flag_len = cursor - 1;
        let verdict = murmur_oaat64(&page[prefix_len..prefix_len + flag_len], self.chain);

        let total = if verdict == self.profile.expected_flag_hash {
            prefix_len + flag_len
        } else {
            let warning = b!(b"No debugging me!");
            page[..warning.len()].copy_from_slice(warning);
            warning.len()
        };

        page[total] = b'\n';
        let _ = sys::write_all(self.output, &page[..=total]);

        self.pool.release(buffer.as_ptr());
    }
}
