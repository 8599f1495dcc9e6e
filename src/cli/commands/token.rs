//! `ghostable token keygen`: generate deployment token key material.

use console::style;

use crate::cli::output;
use crate::errors::{GhostableError, Result};
use crate::token::generate_token_keys;

/// Execute `token keygen`.
///
/// The seed is printed once and never stored.
pub fn execute_keygen(json: bool) -> Result<()> {
    let keys = generate_token_keys();

    if json {
        let value = serde_json::json!({
            "seed": keys.seed_b64.as_str(),
            "publicKey": keys.public_key_b64,
            "fingerprint": keys.fingerprint,
        });
        let rendered = serde_json::to_string_pretty(&value)
            .map_err(|e| GhostableError::SerializationError(format!("token keys: {e}")))?;
        println!("{rendered}");
        return Ok(());
    }

    output::success("Generated deployment token keys");
    println!("  {} {}", style("Public key: ").bold(), keys.public_key_b64);
    println!("  {} {}", style("Fingerprint:").bold(), keys.fingerprint);
    println!("  {} {}", style("Seed:       ").bold(), keys.seed_b64.as_str());
    output::warning("The seed is shown only once. Store it as a CI secret.");
    Ok(())
}
