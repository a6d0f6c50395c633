use crate::host::{Host, HostWindowGuard};
use crate::overlay::dispatch::SessionLog;
use crate::overlay::messages::{CloseReason, MainToOverlay, OverlayToMain};
use crate::overlay::settings::OverlaySettings;
use crate::overlay::state::{can_transition, SessionLifecycle};
use crate::overlay::surface::{Placement, SurfaceFactory};
use crate::overlay::window::{default_surface_factory, spawn_overlay, SessionContext};
use anyhow::{anyhow, bail, Result};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const OVERLAY_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

struct ServiceState {
    lifecycle: SessionLifecycle,
    settings: Arc<OverlaySettings>,
    current_text: String,
    overlay_thread_handle: Option<JoinHandle<()>>,
    main_to_overlay_tx: Option<Sender<MainToOverlay>>,
    overlay_to_main_rx: Option<Receiver<OverlayToMain>>,
    host_window: Option<HostWindowGuard>,
    last_close_reason: Option<CloseReason>,
}

/// Host-facing runtime for the input overlay: owns the single session slot,
/// routes `Start`/`Stop` and answers value queries.
pub struct OverlayService {
    host: Arc<dyn Host>,
    surface_factory: SurfaceFactory,
    state: Mutex<ServiceState>,
}

impl OverlayService {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_surface_factory(host, default_surface_factory())
    }

    pub fn with_surface_factory(host: Arc<dyn Host>, surface_factory: SurfaceFactory) -> Self {
        let settings = Arc::new(OverlaySettings::from_host(host.as_ref()));
        Self {
            host,
            surface_factory,
            state: Mutex::new(ServiceState {
                lifecycle: SessionLifecycle::Idle,
                settings,
                current_text: String::new(),
                overlay_thread_handle: None,
                main_to_overlay_tx: None,
                overlay_to_main_rx: None,
                host_window: None,
                last_close_reason: None,
            }),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ServiceState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("overlay service lock poisoned"))
    }

    fn session_log(&self, settings: &OverlaySettings) -> SessionLog {
        SessionLog::new(self.host.clone(), settings.logging)
    }

    /// Re-read every option. A running session keeps the snapshot it started
    /// with.
    pub fn reload(&self) -> Result<()> {
        let settings = Arc::new(OverlaySettings::from_host(self.host.as_ref()));
        self.lock_state()?.settings = settings;
        Ok(())
    }

    pub fn settings(&self) -> Arc<OverlaySettings> {
        self.state
            .lock()
            .map(|s| s.settings.clone())
            .unwrap_or_default()
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        self.state
            .lock()
            .map(|s| s.lifecycle)
            .unwrap_or(SessionLifecycle::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle().is_active()
    }

    pub fn last_close_reason(&self) -> Option<CloseReason> {
        self.state.lock().ok().and_then(|s| s.last_close_reason)
    }

    /// Run a host command. Only `Start` and `Stop` are understood.
    pub fn execute_command(&self, command: &str) -> Result<()> {
        let log = self.session_log(&self.settings());
        log.notice(&format!("ExecuteCommand received: {command}"));

        let command = command.trim();
        if command.eq_ignore_ascii_case("start") {
            self.start().map(|_| ())
        } else if command.eq_ignore_ascii_case("stop") {
            self.stop()
        } else {
            log.error(&format!("Unknown command: {command}"));
            Ok(())
        }
    }

    pub fn start(&self) -> Result<StartOutcome> {
        self.process_overlay_notifications()?;

        let context = {
            let mut state = self.lock_state()?;
            if state.lifecycle != SessionLifecycle::Idle {
                tracing::debug!(lifecycle = ?state.lifecycle, "input overlay already active");
                return Ok(StartOutcome::AlreadyActive);
            }
            Self::transition_locked(&mut state, SessionLifecycle::Starting)?;

            let settings = state.settings.clone();
            let log = self.session_log(&settings);
            log.notice("Start command received.");

            let host_window = self.host.host_window().map(HostWindowGuard::new);
            let placement = Placement {
                x: self.anchor("#CURRENTCONFIGX#", &log) + settings.offset_x,
                y: self.anchor("#CURRENTCONFIGY#", &log) + settings.offset_y,
                owner: host_window.as_ref().and_then(|g| g.window().raw_handle()),
            };
            log.notice(&format!(
                "Calculated position: {}, {}",
                placement.x, placement.y
            ));

            state.host_window = host_window.clone();
            state.last_close_reason = None;
            SessionContext {
                settings,
                placement,
                host: self.host.clone(),
                host_window,
                surface_factory: self.surface_factory.clone(),
            }
        };

        let handles = match spawn_overlay(context) {
            Ok(handles) => handles,
            Err(err) => {
                tracing::error!(?err, "input overlay start failed");
                self.restore_pipeline(CloseReason::StartFailure, "start failure rollback")?;
                return Err(err);
            }
        };

        let mut state = self.lock_state()?;
        state.overlay_thread_handle = Some(handles.overlay_thread_handle);
        state.main_to_overlay_tx = Some(handles.main_to_overlay_tx);
        state.overlay_to_main_rx = Some(handles.overlay_to_main_rx);
        Self::transition_locked(&mut state, SessionLifecycle::Active)?;
        Ok(StartOutcome::Started)
    }

    /// Ask the running session to close without dispatching anything.
    pub fn stop(&self) -> Result<()> {
        self.process_overlay_notifications()?;

        let mut state = self.lock_state()?;
        let log = self.session_log(&state.settings);
        if state.lifecycle != SessionLifecycle::Active {
            log.notice("No active input overlay to stop.");
            return Ok(());
        }
        log.notice("Stop command received.");
        Self::transition_locked(&mut state, SessionLifecycle::Closing)?;
        Self::send_overlay_message_locked(
            &mut state,
            MainToOverlay::Close {
                reason: CloseReason::Stop,
            },
        );
        Ok(())
    }

    /// Close any running session and wait for it to finish. The host window
    /// is re-enabled even if the session thread does not exit in time.
    pub fn unload(&self) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            if state.lifecycle == SessionLifecycle::Idle {
                return Ok(());
            }
            self.session_log(&state.settings)
                .notice("Unloading input overlay...");
            if state.lifecycle == SessionLifecycle::Active {
                Self::transition_locked(&mut state, SessionLifecycle::Closing)?;
            }
            Self::send_overlay_message_locked(
                &mut state,
                MainToOverlay::Close {
                    reason: CloseReason::Unload,
                },
            );
        }
        self.restore_pipeline(CloseReason::Unload, "unload")
    }

    /// Numeric value: length of the current text in characters.
    pub fn update(&self) -> f64 {
        if let Err(err) = self.process_overlay_notifications() {
            tracing::warn!(?err, "failed to process overlay notifications");
        }
        self.state
            .lock()
            .map(|s| s.current_text.chars().count() as f64)
            .unwrap_or(0.0)
    }

    pub fn string(&self) -> String {
        if let Err(err) = self.process_overlay_notifications() {
            tracing::warn!(?err, "failed to process overlay notifications");
        }
        self.state
            .lock()
            .map(|s| s.current_text.clone())
            .unwrap_or_default()
    }

    /// Poll until the current session (if any) has been reaped.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Err(err) = self.process_overlay_notifications() {
                tracing::warn!(?err, "failed to process overlay notifications");
                return false;
            }
            if self.lifecycle() == SessionLifecycle::Idle {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
        }
    }

    fn anchor(&self, variable: &str, log: &SessionLog) -> i32 {
        let raw = self.host.replace_variables(variable);
        match raw.trim().parse::<i32>() {
            Ok(value) => value,
            Err(_) => {
                log.error(&format!("Could not parse {variable} value '{raw}'; using 0."));
                0
            }
        }
    }

    fn transition_locked(state: &mut ServiceState, next: SessionLifecycle) -> Result<()> {
        if !can_transition(state.lifecycle, next) {
            bail!(
                "invalid overlay lifecycle transition: {:?} -> {:?}",
                state.lifecycle,
                next
            );
        }
        state.lifecycle = next;
        Ok(())
    }

    fn send_overlay_message_locked(state: &mut ServiceState, message: MainToOverlay) {
        if let Some(tx) = &state.main_to_overlay_tx {
            if tx.send(message).is_err() {
                tracing::warn!("input overlay thread is no longer listening");
            }
        }
    }

    fn process_overlay_notifications(&self) -> Result<()> {
        let mut terminal_reason = None;
        {
            let mut state = self.lock_state()?;
            if !matches!(
                state.lifecycle,
                SessionLifecycle::Active | SessionLifecycle::Closing
            ) {
                return Ok(());
            }
            let mut texts = Vec::new();
            if let Some(rx) = &state.overlay_to_main_rx {
                loop {
                    match rx.try_recv() {
                        Ok(OverlayToMain::TextChanged { text }) => texts.push(text),
                        Ok(OverlayToMain::Shown) => {
                            tracing::debug!("input overlay reported shown");
                        }
                        Ok(OverlayToMain::Exited { reason }) => {
                            terminal_reason = Some(reason);
                            break;
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            terminal_reason = Some(CloseReason::OverlayFailure);
                            break;
                        }
                    }
                }
            }
            if let Some(text) = texts.pop() {
                if state.settings.logging {
                    self.session_log(&state.settings)
                        .notice(&format!("Text updated: {text}"));
                }
                state.current_text = text;
            }
        }

        if let Some(reason) = terminal_reason {
            self.restore_pipeline(reason, "overlay exited notification")?;
        }
        Ok(())
    }

    fn restore_pipeline(&self, reason: CloseReason, source: &str) -> Result<()> {
        let (overlay_thread_handle, host_window) = {
            let mut state = self.lock_state()?;
            if matches!(
                state.lifecycle,
                SessionLifecycle::Idle | SessionLifecycle::Restoring
            ) {
                return Ok(());
            }
            Self::transition_locked(&mut state, SessionLifecycle::Restoring)?;

            let handle = state.overlay_thread_handle.take();
            let host_window = state.host_window.take();
            state.main_to_overlay_tx = None;
            state.overlay_to_main_rx = None;
            (handle, host_window)
        };

        join_overlay_thread_with_timeout(overlay_thread_handle, source);
        if let Some(guard) = host_window {
            if guard.restore() {
                tracing::warn!(source, "host window re-enabled by the service");
            }
        }

        let mut state = self.lock_state()?;
        state.last_close_reason = Some(reason);
        Self::transition_locked(&mut state, SessionLifecycle::Idle)?;
        self.session_log(&state.settings)
            .notice(&format!("Input overlay closed ({reason:?})."));
        tracing::debug!(?reason, source, "input overlay session reaped");
        Ok(())
    }
}

impl Drop for OverlayService {
    fn drop(&mut self) {
        if let Err(err) = self.unload() {
            tracing::error!(?err, "failed to unload input overlay");
        }
    }
}

fn join_overlay_thread_with_timeout(handle: Option<JoinHandle<()>>, source: &str) {
    let Some(handle) = handle else {
        return;
    };

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let join_result = handle.join();
        let _ = done_tx.send(join_result);
    });

    match done_rx.recv_timeout(OVERLAY_JOIN_TIMEOUT) {
        Ok(Ok(())) => {}
        Ok(Err(_)) => {
            tracing::error!("input overlay thread panicked while joining during {source}");
        }
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
            tracing::error!("input overlay thread join timed out during {source}");
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
            tracing::error!("input overlay thread join channel disconnected during {source}");
        }
    }
}
