//! Terminal output and the confirmation asked before destructive runs.
//!
//! [formatter] holds the pure string builders; this module owns the
//! interactive part.

use anyhow::Result;
use console::Term;

pub mod formatter;

pub use formatter::{
    display_error, display_states, display_status, display_success, format_release, format_tagged,
};

/// Ask on stderr whether `release` or `delete-tag` may go ahead.
///
/// Only "y" or "yes" in any case count as consent.
pub fn confirm_action(prompt: &str) -> Result<bool> {
    let term = Term::stderr();
    term.write_str(&format!("\n{} (y/N): ", prompt))?;
    let answer = term.read_line()?;
    Ok(is_confirmation(&answer))
}

fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
