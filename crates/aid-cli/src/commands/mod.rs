pub mod build;
pub mod completions;
pub mod create;
pub mod daemon;
pub mod dockerfile;
pub mod env;
pub mod generate;
pub mod infer;
pub mod inspect;
pub mod list;
pub mod logs;
pub mod man_pages;
pub mod remove;
pub mod start;
pub mod stop;

use aid_core::{CoreError, ErrorKind};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_NOT_FOUND: u8 = 3;
pub const EXIT_INVALID_TRANSITION: u8 = 4;

/// A failed command: the message printed to stderr and the process exit code.
#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub msg: String,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl From<CoreError> for CliError {
    fn from(e: CoreError) -> Self {
        let code = match e.kind() {
            ErrorKind::MalformedDescriptor => EXIT_DESCRIPTOR_ERROR,
            ErrorKind::NotFound => EXIT_NOT_FOUND,
            ErrorKind::InvalidTransition => EXIT_INVALID_TRANSITION,
            ErrorKind::InvalidArgument | ErrorKind::Runtime | ErrorKind::Internal => EXIT_FAILURE,
        };
        Self {
            code,
            msg: e.to_string(),
        }
    }
}

impl From<String> for CliError {
    fn from(msg: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            msg,
        }
    }
}

pub type CmdResult = Result<u8, CliError>;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` behind a spinner unless JSON output was requested.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    if json {
        return op();
    }
    let pb = spinner(msg);
    let result = op();
    match &result {
        Ok(_) => spin_ok(&pb, done),
        Err(_) => spin_fail(&pb, "failed"),
    }
    result
}

pub fn colorize_running(running: bool) -> String {
    use console::Style;
    if running {
        Style::new().cyan().bold().apply_to("running").to_string()
    } else {
        Style::new().dim().apply_to("stopped").to_string()
    }
}
