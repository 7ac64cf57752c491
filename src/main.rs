use std::process::ExitCode;

use warden::{Gatekeeper, secrets, sys};

/// Exit status when the memory pool cannot be created. Every other path,
/// acceptance and rejection alike, exits zero.
const EXIT_NO_POOL: u8 = 1;

fn main() -> ExitCode {
    let profile = secrets::baked_profile();

    let Ok(mut gatekeeper) = Gatekeeper::new(profile, sys::STDIN, sys::STDOUT) else {
        return ExitCode::from(EXIT_NO_POOL);
    };

    gatekeeper.run();
    ExitCode::SUCCESS
}
