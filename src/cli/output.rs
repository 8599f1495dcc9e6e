//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::identity::IdentitySummary;

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Print a device identity as a two-column table.
pub fn print_identity(summary: &IdentitySummary) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field", "Value"]);

    let encryption_source = if summary.derived_from_signing_key {
        "derived from signing key"
    } else {
        "independent"
    };

    table.add_row(vec!["Device ID", summary.device_id.as_str()]);
    table.add_row(vec!["Name", summary.name.as_str()]);
    table.add_row(vec!["Platform", summary.platform.as_str()]);
    table.add_row(vec![
        "Created".to_string(),
        summary.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]);
    table.add_row(vec!["Signing key (Ed25519)", summary.signing_public_key.as_str()]);
    table.add_row(vec!["Signing fingerprint", summary.signing_fingerprint.as_str()]);
    table.add_row(vec![
        "Encryption key (X25519)",
        summary.encryption_public_key.as_str(),
    ]);
    table.add_row(vec![
        "Encryption fingerprint",
        summary.encryption_fingerprint.as_str(),
    ]);
    table.add_row(vec!["Encryption key source", encryption_source]);

    println!("{table}");
}
