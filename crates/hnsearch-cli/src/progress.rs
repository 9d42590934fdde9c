//! Progress feedback utilities for CLI commands
//!
//! Spinners for long-running operations, suppressed by --quiet.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Create a spinner with a message
pub fn spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Finish a spinner with a success message
pub fn finish_spinner(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.green} {msg}")
                .expect("Invalid finish template"),
        );
        pb.set_prefix("✓");
        pb.finish_with_message(message.to_string());
    }
}

/// Finish a spinner with an error message
pub fn finish_spinner_error(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.red} {msg}")
                .expect("Invalid error template"),
        );
        pb.set_prefix("✗");
        pb.finish_with_message(message.to_string());
    }
}
