//! Terminal progress display for table fetches

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

use super::job::TableStatus;

const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// Factory for per-table spinners. Hidden when disabled or when stderr is
/// not a terminal.
#[derive(Debug, Clone)]
pub struct BackupProgress {
    multi: MultiProgress,
    visible: bool,
}

impl BackupProgress {
    /// Spinners on stderr when `enabled` and attached to a terminal
    pub fn new(enabled: bool) -> Self {
        let visible = enabled && std::io::stderr().is_terminal();
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            visible,
        }
    }

    /// Never draw anything
    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Whether spinners are drawn
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Start a spinner for one table
    pub fn table(&self, base_name: &str, table_name: &str) -> TableSpinner {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {prefix} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(format!("{base_name} / {table_name}"));
        bar.set_message("starting");
        if self.visible {
            bar.enable_steady_tick(TICK_INTERVAL);
        }
        TableSpinner { bar }
    }
}

impl Default for BackupProgress {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Spinner of one table
#[derive(Debug)]
pub struct TableSpinner {
    bar: ProgressBar,
}

impl TableSpinner {
    /// Show running counts
    pub fn update(&self, pages: u32, records: u64, attachments: u64) {
        self.bar.set_message(format!(
            "{records} records, {pages} pages, {attachments} attachments"
        ));
    }

    /// Stop with the table's final status
    pub fn finish(&self, status: TableStatus, records: u64) {
        self.bar
            .finish_with_message(format!("{status} ({records} records)"));
    }
}
