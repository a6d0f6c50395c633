use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use std::sync::Arc;

use crate::host::{Host, LogLevel};

pub const USER_INPUT_PLACEHOLDER: &str = "$UserInput$";

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("(?i){}", regex::escape(USER_INPUT_PLACEHOLDER)))
        .expect("valid placeholder regex")
});

/// Prefix every `"` with a backslash so user text cannot close the quoting of
/// the command it is substituted into.
pub fn escape_command_argument(input: &str) -> String {
    input.replace('"', "\\\"")
}

/// Substitute the escaped `text` for every placeholder in `template`.
pub fn render_template(template: &str, text: &str) -> String {
    if template.is_empty() {
        return String::new();
    }
    let escaped = escape_command_argument(text);
    PLACEHOLDER_RE
        .replace_all(template, NoExpand(&escaped))
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Enter,
    Escape,
    Dismiss,
    Invalid,
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Enter => "Enter",
            Self::Escape => "ESC",
            Self::Dismiss => "Dismiss",
            Self::Invalid => "Invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Template rendered to nothing executable.
    Skipped,
    Executed(String),
    Failed { command: String, error: String },
}

impl DispatchOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }
}

/// Host log lines gated by the `Logging` option. Every line is also emitted
/// through `tracing`.
#[derive(Clone)]
pub struct SessionLog {
    host: Arc<dyn Host>,
    enabled: bool,
}

impl SessionLog {
    pub fn new(host: Arc<dyn Host>, enabled: bool) -> Self {
        Self { host, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn notice(&self, message: &str) {
        tracing::debug!("{message}");
        if self.enabled {
            self.host.log(LogLevel::Notice, message);
        }
    }

    pub fn error(&self, message: &str) {
        tracing::warn!("{message}");
        if self.enabled {
            self.host.log(LogLevel::Error, message);
        }
    }
}

/// Runs action templates against the host.
#[derive(Clone)]
pub struct ActionDispatcher {
    host: Arc<dyn Host>,
    log: SessionLog,
}

impl ActionDispatcher {
    pub fn new(host: Arc<dyn Host>, log: SessionLog) -> Self {
        Self { host, log }
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Render `template` with `text` and execute it. Failures are logged and
    /// returned, never propagated.
    pub fn dispatch(&self, kind: ActionKind, template: &str, text: &str) -> DispatchOutcome {
        let command = render_template(template, text);
        if command.trim().is_empty() {
            return DispatchOutcome::Skipped;
        }

        self.log
            .notice(&format!("Final {} command: {command}", kind.label()));
        match self.host.execute(&command) {
            Ok(()) => DispatchOutcome::Executed(command),
            Err(err) => {
                self.log.error(&format!(
                    "Error executing {} command: {err:#}",
                    kind.label()
                ));
                DispatchOutcome::Failed {
                    command,
                    error: format!("{err:#}"),
                }
            }
        }
    }
}
