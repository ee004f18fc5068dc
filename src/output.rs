//! Output formatting and styling module.
//!
//! Everything printed for the user (as opposed to logged) goes through
//! [`OutputFormatter`]: status lines, the top-level progress bar and the run
//! summary.

use crate::run_state::RunResult;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::warn;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - The traversal progress bar
/// - The end-of-run summary table
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sortcopy::output::OutputFormatter;
    /// OutputFormatter::success("Copy complete");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar over `total` entries.
    ///
    /// The bar draws to stderr and stays hidden when stderr is not a terminal.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sortcopy::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_and_clear();
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints the run summary table.
    ///
    /// Each unprocessed path is also emitted as a warning so it lands in the
    /// log alongside the per-file diagnostics.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sortcopy::output::OutputFormatter;
    /// use sortcopy::run_state::RunResult;
    /// use std::time::Duration;
    ///
    /// let result = RunResult {
    ///     unique_extension_count: 3,
    ///     sub_dir_count: 1,
    ///     copied_count: 3,
    ///     unprocessed: Vec::new(),
    ///     elapsed: Duration::from_millis(420),
    ///     cancelled: false,
    /// };
    /// OutputFormatter::run_summary(&result, false);
    /// ```
    pub fn run_summary(result: &RunResult, dry_run: bool) {
        Self::header(if dry_run { "DRY RUN SUMMARY" } else { "SUMMARY" });

        let copied_label = if dry_run { "Planned copies" } else { "Copied files" };
        let rows = [
            ("Unique extensions", result.unique_extension_count.to_string().green()),
            ("Sub-directories", result.sub_dir_count.to_string().green()),
            (copied_label, result.copied_count.to_string().green()),
            ("Unprocessed files", Self::unprocessed_count(result.unprocessed.len())),
            ("Elapsed", format_elapsed(result.elapsed).normal()),
        ];

        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        println!("{}", "-".repeat(width + 12));
        for (label, value) in &rows {
            println!("{:<width$} | {}", label, value, width = width);
        }
        println!("{}", "-".repeat(width + 12));

        for path in &result.unprocessed {
            warn!(path = %path.display(), "unprocessed file");
        }

        if result.cancelled {
            Self::warning("Run was cancelled; the destination tree is incomplete.");
        } else if result.unprocessed.is_empty() {
            Self::success("All eligible files were copied.");
        } else {
            Self::warning(&format!(
                "{} {} could not be copied, see warnings above.",
                result.unprocessed.len(),
                if result.unprocessed.len() == 1 { "file" } else { "files" }
            ));
        }
    }

    fn unprocessed_count(count: usize) -> ColoredString {
        if count == 0 {
            count.to_string().green()
        } else {
            count.to_string().yellow().bold()
        }
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}

/// Renders a byte count with a binary unit, e.g. `1.5 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Renders a duration as `1m 05.2s` or `3.41s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        let minutes = (secs / 60.0).floor();
        format!("{}m {:04.1}s", minutes as u64, secs - minutes * 60.0)
    } else {
        format!("{:.2}s", secs)
    }
}
