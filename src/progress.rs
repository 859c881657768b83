//! Progress bars, spinners and native terminal progress for long-running
//! operations.
//!
//! Nothing is drawn unless stdout is a terminal and the session is
//! interactive, so piped and JSON output stay clean.

use crate::appstore::DownloadProgress;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

/// OSC 9;4 progress states understood by Ghostty, WezTerm and Windows Terminal.
#[derive(Debug, Clone, Copy)]
enum TerminalState {
    Off = 0,
    Normal = 1,
    Indeterminate = 3,
}

fn set_terminal_progress(state: TerminalState, percent: u8) {
    print!("\x1b]9;4;{};{}\x1b\\", state as u8, percent.min(100));
    let _ = io::stdout().flush();
}

/// True when progress indicators should be drawn.
pub fn should_show_progress(interactive: bool) -> bool {
    interactive && io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err()
}

/// Spinner for a single request; hidden when `show` is false.
pub fn spinner(message: impl Into<String>, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Byte progress for a package transfer, mirrored to the terminal's native
/// progress indicator.
pub struct DownloadBar {
    bar: ProgressBar,
    native: bool,
}

impl DownloadBar {
    pub fn new(label: &str, show: bool) -> Self {
        if !show {
            return Self {
                bar: ProgressBar::hidden(),
                native: false,
            };
        }

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(format!("⬇ {label}"));

        Self { bar, native: true }
    }

    fn percent(&self, position: u64) -> u8 {
        match self.bar.length() {
            Some(total) if total > 0 => ((position as f64 / total as f64) * 100.0).min(100.0) as u8,
            _ => 0,
        }
    }
}

impl DownloadProgress for DownloadBar {
    fn start(&self, total: Option<u64>, position: u64) {
        match total {
            Some(total) => self.bar.set_length(total),
            None => self.bar.unset_length(),
        }
        self.bar.set_position(position);

        if self.native {
            if total.is_some() {
                set_terminal_progress(TerminalState::Normal, self.percent(position));
            } else {
                set_terminal_progress(TerminalState::Indeterminate, 0);
            }
        }
    }

    fn advance(&self, position: u64) {
        let before = self.percent(self.bar.position());
        self.bar.set_position(position);

        let after = self.percent(position);
        if self.native && after != before {
            set_terminal_progress(TerminalState::Normal, after);
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        if self.native {
            set_terminal_progress(TerminalState::Off, 0);
        }
    }
}

impl Drop for DownloadBar {
    fn drop(&mut self) {
        // Never leave the terminal indicator stuck after an error
        if self.native {
            set_terminal_progress(TerminalState::Off, 0);
        }
    }
}
