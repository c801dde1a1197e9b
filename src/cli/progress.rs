//! Terminal progress rendering.

use colored::Colorize;

use crate::transfer::ProgressSink;

/// Prints engine progress to stderr, keeping stdout for the summary.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleProgress {
    silent: bool,
}

impl ConsoleProgress {
    /// A silent sink still lets warnings through to `tracing`.
    #[must_use]
    pub const fn new(silent: bool) -> Self {
        Self { silent }
    }
}

impl ProgressSink for ConsoleProgress {
    fn start(&self, label: &str, total: usize) {
        if !self.silent {
            eprintln!("{} {label} ({total})", "▸".cyan().bold());
        }
    }

    fn update(&self, done: usize, total: usize) {
        if !self.silent {
            eprintln!("  {}", format!("[{done}/{total}]").dimmed());
        }
    }

    fn stop(&self, message: &str) {
        if !self.silent {
            eprintln!("{} {message}", "✓".green().bold());
        }
    }

    fn fail(&self, message: &str) {
        if !self.silent {
            eprintln!("{} {message}", "✗".yellow().bold());
        }
    }

    fn log(&self, message: &str) {
        if !self.silent {
            eprintln!("  {message}");
        }
    }

    fn warn(&self, message: &str) {
        if self.silent {
            tracing::warn!("{message}");
        } else {
            eprintln!("{} {message}", "warning:".yellow().bold());
        }
    }
}
