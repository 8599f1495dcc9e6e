//! `ghostable version`: display version and algorithm identifiers.

use console::style;

use crate::crypto::signing::{AGREEMENT_ALGORITHM, SIGNING_ALGORITHM};
use crate::crypto::SECRET_ALGORITHM;
use crate::envelope::ENVELOPE_ALGORITHM;
use crate::errors::Result;

/// Execute the `version` command.
pub fn execute() -> Result<()> {
    let current = env!("CARGO_PKG_VERSION");
    println!("ghostable {current}");

    println!(
        "{} {}, {}, {}, {}",
        style("Algorithms:").dim(),
        SECRET_ALGORITHM,
        ENVELOPE_ALGORITHM,
        SIGNING_ALGORITHM,
        AGREEMENT_ALGORITHM
    );
    println!(
        "{} {}",
        style("OS keyring:").dim(),
        if cfg!(feature = "keyring-store") {
            style("available").green()
        } else {
            style("not compiled in").yellow()
        }
    );

    Ok(())
}
