//! Build-time constants and patcher-owned memory spans.
//!
//! Nothing in this module is computed at runtime. The statics below are
//! reserved, self-describing spans that an offline tool rewrites in the
//! compiled binary once its layout is final: the chain seed, the per-gate
//! XOR masks, the expected flag hash, the encoded reference strings, and
//! the region descriptor table the integrity chain walks. The values
//! compiled in here are development placeholders; a binary that has not
//! been patched decodes garbage and reveals nothing, by construction.
//!
//! Reads of the scalar constants go through `read_volatile` so the
//! compiler cannot fold the placeholder values into the code it emits;
//! the patched bytes in the image are the ones that must win.

use core::ptr::read_volatile;

use spin::Once;

use crate::integrity::{HashPatchTable, RegionDescriptor};

/// Maximum number of region descriptors the reserved table can hold.
pub const MAX_REGIONS: usize = 24;

/// Encoded length of the password reference string, terminator included.
pub const PASSWORD_MASK_LEN: usize = 13;

/// Encoded length of the flag, terminator included.
pub const FLAG_MASK_LEN: usize = 10;

/// Scalar constants the patch tool rewrites as one block.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BakedConstants {
    /// Seed fed to the very first chain advance.
    pub chain_seed: u64,

    /// Mask that turns the chain state at password time into the keystream
    /// seed. Chosen offline so that a correct execution history lands on a
    /// known seed; any other history lands somewhere useless.
    pub password_gate_mask: u64,

    /// Mask that turns the chain state at flag time into the flag
    /// keystream seed.
    pub flag_gate_mask: u64,

    /// Expected hash of the decoded flag, seeded with the final chain
    /// state.
    pub expected_flag_hash: u64,
}

/// Reserved block for the scalar constants.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".wdn.consts")]
pub static BAKED_CONSTANTS: BakedConstants = BakedConstants {
    chain_seed: 0x1eaf_5adc_a75f_00d5,
    password_gate_mask: 0x5afe_70be_c0d3_ab1e,
    flag_gate_mask: 0x5afe_70be_c0d3_ab1e,
    expected_flag_hash: 0xfea7_5ba5_e64b_10b5,
};

/// Anchor the region descriptor offsets resolve against.
///
/// The patch tool computes every [`RegionDescriptor::offset`] relative to
/// this symbol, which it places ahead of the spans it wants covered.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".wdn.anchor")]
pub static REGION_ANCHOR: u64 = 0xca11_ab1e_0ddb_a115;

/// Reserved region descriptor table.
///
/// The development table is empty, a lone sentinel; the patch tool fills
/// in whichever spans of the final image it decided matter.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".wdn.regions")]
pub static HASH_REGIONS: [RegionDescriptor; MAX_REGIONS] =
    [RegionDescriptor::SENTINEL; MAX_REGIONS];

/// Encoded password reference string.
///
/// XOR of the expected password (terminator included) against the
/// keystream of the known password seed. The development bytes pair with
/// the placeholder constants above and decode to nothing useful until the
/// patch tool rewrites both sides consistently.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".wdn.masks")]
pub static PASSWORD_MASK: [u8; PASSWORD_MASK_LEN] =
    *b"\x82\xa0\x47\x25\x67\x72\x49\xc6\x06\x24\x23\xc8\x00";

/// Encoded flag, same construction as [`PASSWORD_MASK`].
#[unsafe(no_mangle)]
#[unsafe(link_section = ".wdn.masks")]
pub static FLAG_MASK: [u8; FLAG_MASK_LEN] = *b"\x4e\x0a\xf6\xf9\x49\x35\xb5\x38\x4b\x00";

/// Everything the gatekeeper consumes, gathered in one place.
///
/// The gatekeeper only ever sees this type, never the statics above, so
/// tests can hand it an internally consistent profile built over fixture
/// buffers.
pub struct SecretProfile<'a> {
    /// Seed for the first chain advance.
    pub chain_seed: u64,

    /// Mask applied to the chain state to derive the password keystream
    /// seed.
    pub password_gate_mask: u64,

    /// Mask applied to the chain state to derive the flag keystream seed.
    pub flag_gate_mask: u64,

    /// Expected hash of the decoded flag under the final chain state.
    pub expected_flag_hash: u64,

    /// Encoded password reference span.
    pub password_mask: &'a [u8],

    /// Encoded flag span.
    pub flag_mask: &'a [u8],

    /// Regions the chain covers on every advance.
    pub regions: HashPatchTable<'a>,
}

/// Profile assembled from the baked statics, resolved once.
static PROFILE: Once<SecretProfile<'static>> = Once::new();

/// Returns the profile carried in the binary image.
///
/// Resolution happens on the first call and is reused afterwards. The
/// scalar block is read back volatile so the patched image values are the
/// ones that end up in the profile.
pub fn baked_profile() -> &'static SecretProfile<'static> {
    PROFILE.call_once(|| {
        let constants = unsafe { read_volatile(&raw const BAKED_CONSTANTS) };

        SecretProfile {
            chain_seed: constants.chain_seed,
            password_gate_mask: constants.password_gate_mask,
            flag_gate_mask: constants.flag_gate_mask,
            expected_flag_hash: constants.expected_flag_hash,
            password_mask: &PASSWORD_MASK,
            flag_mask: &FLAG_MASK,
            // The patch tool guarantees every non-sentinel entry it writes
            // describes readable bytes of the loaded image.
            regions: unsafe { HashPatchTable::new(&raw const REGION_ANCHOR as u64, &HASH_REGIONS) },
        }
    })
}
