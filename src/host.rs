//! Boundary to the application that embeds the overlay.
//!
//! The host supplies configuration values, path variables, command execution,
//! a log sink and (optionally) the window the overlay sits on top of.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Notice,
}

pub trait Host: Send + Sync {
    fn read_string(&self, key: &str, default: &str) -> String;

    fn read_int(&self, key: &str, default: i32) -> i32 {
        self.read_string(key, "")
            .trim()
            .parse()
            .unwrap_or(default)
    }

    fn read_double(&self, key: &str, default: f64) -> f64 {
        self.read_string(key, "")
            .trim()
            .parse()
            .unwrap_or(default)
    }

    fn replace_variables(&self, text: &str) -> String;

    fn execute(&self, command: &str) -> Result<()>;

    fn log(&self, level: LogLevel, message: &str);

    fn host_window(&self) -> Option<Arc<dyn HostWindow>> {
        None
    }
}

/// The window the overlay is attached to. It is disabled while an overlay is
/// open so clicks cannot reach it.
pub trait HostWindow: Send + Sync {
    fn set_enabled(&self, enabled: bool) -> Result<()>;

    /// Native handle used to stack the host directly below the overlay.
    fn raw_handle(&self) -> Option<isize> {
        None
    }
}

/// Disables a host window at most once and re-enables it at most once.
///
/// Both the overlay thread and `Unload` may try to restore the window; the
/// atomic flag makes whichever comes second a no-op.
#[derive(Clone)]
pub struct HostWindowGuard {
    window: Arc<dyn HostWindow>,
    disabled: Arc<AtomicBool>,
}

impl HostWindowGuard {
    pub fn new(window: Arc<dyn HostWindow>) -> Self {
        Self {
            window,
            disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn window(&self) -> &Arc<dyn HostWindow> {
        &self.window
    }

    /// Returns `true` when this call disabled the window.
    pub fn disable(&self) -> bool {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(err) = self.window.set_enabled(false) {
            tracing::warn!(?err, "failed to disable host window");
        }
        true
    }

    /// Returns `true` when this call re-enabled the window.
    pub fn restore(&self) -> bool {
        if !self.disabled.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Err(err) = self.window.set_enabled(true) {
            tracing::warn!(?err, "failed to re-enable host window");
        }
        true
    }
}

#[cfg(windows)]
pub use native::NativeHostWindow;

#[cfg(windows)]
mod native {
    use super::HostWindow;
    use anyhow::Result;
    use windows::Win32::Foundation::{BOOL, HWND};
    use windows::Win32::UI::Input::KeyboardAndMouse::EnableWindow;

    /// A host window identified by its raw `HWND`.
    #[derive(Debug, Clone, Copy)]
    pub struct NativeHostWindow(pub isize);

    impl HostWindow for NativeHostWindow {
        fn set_enabled(&self, enabled: bool) -> Result<()> {
            if self.0 == 0 {
                return Ok(());
            }
            // EnableWindow returns the previous state, not success.
            unsafe {
                let _ = EnableWindow(HWND(self.0 as *mut core::ffi::c_void), BOOL::from(enabled));
            }
            Ok(())
        }

        fn raw_handle(&self) -> Option<isize> {
            (self.0 != 0).then_some(self.0)
        }
    }
}

/// Host backed by an in-memory option table.
///
/// Commands passed to [`Host::execute`] are recorded instead of run, which
/// makes it suitable for the demo binary and for tests.
#[derive(Default)]
pub struct MemoryHost {
    options: Mutex<HashMap<String, String>>,
    variables: Mutex<HashMap<String, String>>,
    executed: Mutex<Vec<String>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
    failing_commands: Mutex<Vec<String>>,
    window: Option<Arc<dyn HostWindow>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: Arc<dyn HostWindow>) -> Self {
        self.window = Some(window);
        self
    }

    /// Load options from a JSON object. Non-string values are stored using
    /// their JSON text, so `{"W": 200}` and `{"W": "200"}` read the same.
    /// A nested `"variables"` object defines `#NAME#` variables.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("parse overlay options json")?;
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("overlay options must be a json object"))?;
        let host = Self::new();
        for (key, value) in object {
            if key == "variables" {
                if let Some(variables) = value.as_object() {
                    for (name, value) in variables {
                        let text = value
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| value.to_string());
                        host.set_variable(name, text);
                    }
                }
                continue;
            }
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                other => other.to_string(),
            };
            host.set_option(key, text);
        }
        Ok(host)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read overlay options file {}", path.display()))?;
        Self::from_json_str(&content)
    }

    pub fn set_option(&self, key: &str, value: impl Into<String>) {
        if let Ok(mut options) = self.options.lock() {
            options.insert(key.to_ascii_lowercase(), value.into());
        }
    }

    /// Defines a `#NAME#` style variable.
    pub fn set_variable(&self, name: &str, value: impl Into<String>) {
        if let Ok(mut variables) = self.variables.lock() {
            variables.insert(name.to_string(), value.into());
        }
    }

    /// Makes [`Host::execute`] fail for the given command.
    pub fn fail_command(&self, command: impl Into<String>) {
        if let Ok(mut failing) = self.failing_commands.lock() {
            failing.push(command.into());
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Host for MemoryHost {
    fn read_string(&self, key: &str, default: &str) -> String {
        self.options
            .lock()
            .ok()
            .and_then(|options| options.get(&key.to_ascii_lowercase()).cloned())
            .unwrap_or_else(|| default.to_string())
    }

    fn replace_variables(&self, text: &str) -> String {
        let Ok(variables) = self.variables.lock() else {
            return text.to_string();
        };
        let mut out = text.to_string();
        for (name, value) in variables.iter() {
            out = out.replace(&format!("#{name}#"), value);
        }
        out
    }

    fn execute(&self, command: &str) -> Result<()> {
        let failing = self
            .failing_commands
            .lock()
            .map(|f| f.iter().any(|c| c == command))
            .unwrap_or(false);
        if failing {
            return Err(anyhow!("command rejected by host: {command}"));
        }
        self.executed
            .lock()
            .map_err(|_| anyhow!("executed command log lock poisoned"))?
            .push(command.to_string());
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.push((level, message.to_string()));
        }
    }

    fn host_window(&self) -> Option<Arc<dyn HostWindow>> {
        self.window.clone()
    }
}

/// Host window stand-in that counts enable/disable calls.
#[derive(Debug, Default)]
pub struct RecordingWindow {
    enabled: AtomicBool,
    disable_calls: AtomicUsize,
    enable_calls: AtomicUsize,
}

impl RecordingWindow {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }
}

impl HostWindow for RecordingWindow {
    fn set_enabled(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.enable_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.disable_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_disables_and_restores_exactly_once() {
        let window = Arc::new(RecordingWindow::new());
        let guard = HostWindowGuard::new(window.clone());

        assert!(guard.disable());
        assert!(!guard.disable());
        assert!(!window.is_enabled());

        let clone = guard.clone();
        assert!(guard.restore());
        assert!(!clone.restore());
        assert!(window.is_enabled());
        assert_eq!(window.disable_calls(), 1);
        assert_eq!(window.enable_calls(), 1);
    }

    #[test]
    fn restore_without_disable_is_a_no_op() {
        let window = Arc::new(RecordingWindow::new());
        let guard = HostWindowGuard::new(window.clone());
        assert!(!guard.restore());
        assert_eq!(window.enable_calls(), 0);
    }

    #[test]
    fn memory_host_reads_json_options_case_insensitively() {
        let host = MemoryHost::from_json_str(r#"{"W": 250, "FontFace": "Arial", "Password": true}"#)
            .expect("valid options");
        assert_eq!(host.read_int("w", 300), 250);
        assert_eq!(host.read_string("FONTFACE", "Segoe UI"), "Arial");
        assert_eq!(host.read_int("Password", 0), 1);
        assert_eq!(host.read_int("H", 40), 40);
        assert_eq!(host.read_double("MinValue", f64::MIN), f64::MIN);
    }

    #[test]
    fn memory_host_rejects_non_object_json() {
        assert!(MemoryHost::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn memory_host_replaces_known_variables_only() {
        let host = MemoryHost::new();
        host.set_variable("CURRENTCONFIGX", "100");
        assert_eq!(host.replace_variables("#CURRENTCONFIGX#"), "100");
        assert_eq!(host.replace_variables("#CURRENTCONFIGY#"), "#CURRENTCONFIGY#");
    }

    #[test]
    fn memory_host_records_and_fails_commands() {
        let host = MemoryHost::new();
        host.fail_command("[!Bad]");
        assert!(host.execute("[!Good]").is_ok());
        assert!(host.execute("[!Bad]").is_err());
        assert_eq!(host.executed(), vec!["[!Good]".to_string()]);
    }
}
