//! Pure formatting functions for UI output.
//!
//! Functions returning `String` are testable without a terminal; the
//! `display_*` wrappers print them.

use console::style;
use serde_json::Value;

use crate::release::ReleaseState;

/// Format and print an error message in red.
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("ERROR:").red().bold(), message);
}

/// Format and print a success message with green checkmark.
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

/// Format and print a status message with yellow arrow.
pub fn display_status(message: &str) {
    println!("{} {}", style("→").yellow(), message);
}

/// One line per state a release run reached
pub fn format_states(reached: ReleaseState) -> Vec<String> {
    [
        ReleaseState::Preparing,
        ReleaseState::Tagged,
        ReleaseState::ManifestValidated,
        ReleaseState::Published,
    ]
    .iter()
    .map(|state| {
        let mark = if *state <= reached { "✓" } else { " " };
        format!("[{}] {}", mark, state)
    })
    .collect()
}

pub fn display_states(reached: ReleaseState) {
    for line in format_states(reached) {
        println!("  {}", line);
    }
}

/// Pretty JSON of a release list entry
pub fn format_release(entry: &Value) -> String {
    serde_json::to_string_pretty(entry).unwrap_or_else(|_| entry.to_string())
}

/// Summary of a tagging run over several repositories
pub fn format_tagged(tag: &str, repositories: &[String]) -> String {
    if repositories.is_empty() {
        format!("No repository was tagged with {}", tag)
    } else {
        format!("Tagged {} in {}", tag, repositories.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_states_marks_reached() {
        assert_eq!(
            format_states(ReleaseState::Tagged),
            vec![
                "[✓] preparing",
                "[✓] tagged",
                "[ ] manifest validated",
                "[ ] published"
            ]
        );
    }

    #[test]
    fn test_format_release_is_pretty_json() {
        let text = format_release(&json!({"version": "6.3.1.0", "public": "0"}));
        assert_eq!(text, "{\n  \"version\": \"6.3.1.0\",\n  \"public\": \"0\"\n}");
    }

    #[test]
    fn test_format_tagged() {
        assert_eq!(
            format_tagged("v6.3.1.0", &["core".to_string(), "storefront".to_string()]),
            "Tagged v6.3.1.0 in core, storefront"
        );
        assert_eq!(format_tagged("v6.3.1.0", &[]), "No repository was tagged with v6.3.1.0");
    }
}
