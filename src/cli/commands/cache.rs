//! `ghostable cache clear`: forget a cached environment key.

use crate::cli::output;
use crate::envkey::KeyCache;
use crate::errors::Result;
use crate::keystore::KeyStore;

/// Execute `cache clear`.
pub fn execute_clear(store: &dyn KeyStore, project: &str, env: &str) -> Result<()> {
    let cache = KeyCache::new(store);

    if !cache.contains(project, env)? {
        output::info(&format!("No cached key for '{project}/{env}'."));
        return Ok(());
    }

    cache.invalidate(project, env)?;
    output::success(&format!("Cleared cached key for '{project}/{env}'"));
    output::tip("The key will be unwrapped from the server on next use.");
    Ok(())
}
