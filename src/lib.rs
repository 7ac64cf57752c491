//! # warden
//!
//! A tamper-evident password gate. The binary asks for a password and
//! reveals a hidden flag only when the password is correct **and** the
//! program's own control flow ran in exactly the expected order with
//! exactly the expected code present.
//!
//! Three mechanisms carry that property:
//! - An **integrity hash chain**: one 64-bit value advanced over
//!   patcher-designated regions of the loaded image at fixed checkpoints,
//!   so skipping, reordering, or patching any step lands the chain on a
//!   different value.
//! - **Chain-seeded keystreams**: the reference password and the flag are
//!   stored XOR-encoded and decoded lazily against an MT19937 stream whose
//!   seed is derived from the chain state. A wrong history means a wrong
//!   seed means noise, with no explicit check to patch out.
//! - A **randomized page pool**: every scratch buffer lives in a page pool
//!   whose bookkeeping sits at random offsets inside the pool itself, and
//!   released pages are overwritten with random junk.
//!
//! ## Example
//!
//! ```no_run
//! use warden::{Gatekeeper, secrets, sys};
//!
//! fn main() {
//!     let profile = secrets::baked_profile();
//!     if let Ok(mut gatekeeper) = Gatekeeper::new(profile, sys::STDIN, sys::STDOUT) {
//!         gatekeeper.run();
//!     }
//! }
//! ```
//!
//! The constants and encoded spans in [`secrets`] are placeholders until
//! an offline patch tool rewrites them in the compiled image; an unpatched
//! binary refuses everything, by construction.

mod gatekeeper;
mod integrity;
mod pool;
mod twister;

pub mod secrets;
pub mod sys;

pub use gatekeeper::*;
pub use integrity::*;
pub use pool::*;
pub use twister::*;
