use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;

use crate::overlay::dispatch::{ActionDispatcher, ActionKind, DispatchOutcome};
use crate::overlay::input::{map_key_event_to_command, KeyCommand, KeyEvent};
use crate::overlay::messages::{CloseReason, MainToOverlay, OverlayToMain};
use crate::overlay::settings::OverlaySettings;
use crate::overlay::surface::{EventDisposition, SurfaceEvent};
use crate::overlay::validation::{check_range, validate_char, RangeCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerLifecycle {
    Open,
    Closing,
    Closed,
}

/// Trigger and dispatch state machine for one overlay session. Lives on the
/// overlay thread.
pub struct OverlayController {
    settings: Arc<OverlaySettings>,
    dispatcher: ActionDispatcher,
    main_to_overlay_rx: Receiver<MainToOverlay>,
    overlay_to_main_tx: Sender<OverlayToMain>,
    lifecycle: ControllerLifecycle,
    close_reason: Option<CloseReason>,
    text: String,
}

impl OverlayController {
    pub fn new(
        settings: Arc<OverlaySettings>,
        dispatcher: ActionDispatcher,
        main_to_overlay_rx: Receiver<MainToOverlay>,
        overlay_to_main_tx: Sender<OverlayToMain>,
    ) -> Self {
        Self {
            settings,
            dispatcher,
            main_to_overlay_rx,
            overlay_to_main_tx,
            lifecycle: ControllerLifecycle::Open,
            close_reason: None,
            text: String::new(),
        }
    }

    pub fn lifecycle(&self) -> ControllerLifecycle {
        self.lifecycle
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle == ControllerLifecycle::Open
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn handle_surface_event(&mut self, event: SurfaceEvent) -> EventDisposition {
        match event {
            SurfaceEvent::KeyDown { key, field_text } => {
                self.handle_text_changed(field_text);
                self.handle_key_down(key)
            }
            SurfaceEvent::Char {
                ch,
                field_text,
                cursor,
            } => self.handle_char(ch, &field_text, cursor),
            SurfaceEvent::TextChanged(text) => {
                self.handle_text_changed(text);
                EventDisposition::Pass
            }
            SurfaceEvent::FocusLost { field_text } => {
                self.handle_text_changed(field_text);
                self.handle_focus_lost();
                EventDisposition::Pass
            }
            SurfaceEvent::Closed => {
                self.request_close(CloseReason::SurfaceClosed);
                EventDisposition::Pass
            }
        }
    }

    /// Character filter, run before the character reaches the field.
    pub fn handle_char(&mut self, ch: char, field_text: &str, cursor: usize) -> EventDisposition {
        if !self.is_open() {
            return EventDisposition::Suppress;
        }
        let settings = &self.settings;
        if validate_char(
            ch,
            settings.input_type,
            field_text,
            cursor,
            &settings.allowed_chars,
        ) {
            return EventDisposition::Pass;
        }

        self.dispatcher
            .log()
            .notice(&format!("Invalid character detected: {ch}"));
        self.dispatcher
            .dispatch(ActionKind::Invalid, &settings.actions.on_invalid, field_text);
        EventDisposition::Suppress
    }

    pub fn handle_key_down(&mut self, event: KeyEvent) -> EventDisposition {
        if !self.is_open() {
            return EventDisposition::Suppress;
        }
        match map_key_event_to_command(self.settings.multiline, event) {
            None => EventDisposition::Pass,
            Some(KeyCommand::Cancel) => {
                self.dispatch(ActionKind::Escape);
                self.request_close(CloseReason::Escape);
                EventDisposition::Suppress
            }
            Some(KeyCommand::Submit) => {
                self.submit();
                EventDisposition::Suppress
            }
        }
    }

    fn submit(&mut self) {
        let settings = &self.settings;
        let range = check_range(
            settings.input_type,
            &self.text,
            settings.min_value,
            settings.max_value,
        );
        if let RangeCheck::OutOfRange(value) = range {
            self.dispatcher.log().notice(&format!(
                "{:?} value {value} out of range [{}, {}].",
                settings.input_type, settings.min_value, settings.max_value
            ));
            // Runs even if the character filter already fired OnInvalid.
            self.dispatch(ActionKind::Invalid);
            return;
        }

        self.dispatch(ActionKind::Enter);
        self.request_close(CloseReason::Enter);
    }

    pub fn handle_focus_lost(&mut self) {
        if !self.is_open() || !self.settings.unfocus_dismiss {
            return;
        }
        self.dispatch(ActionKind::Dismiss);
        self.request_close(CloseReason::FocusLost);
    }

    pub fn handle_text_changed(&mut self, text: String) {
        if self.lifecycle == ControllerLifecycle::Closed || text == self.text {
            return;
        }
        self.publish_text(text);
    }

    /// Report the field contents the session starts with.
    pub fn publish_text(&mut self, text: String) {
        self.text = text.clone();
        let _ = self
            .overlay_to_main_tx
            .send(OverlayToMain::TextChanged { text });
    }

    pub fn pump_runtime_messages(&mut self) {
        loop {
            match self.main_to_overlay_rx.try_recv() {
                Ok(MainToOverlay::Close { reason }) => {
                    self.request_close(reason);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("overlay command channel disconnected; closing session");
                    self.request_close(CloseReason::OverlayFailure);
                    break;
                }
            }
        }
    }

    /// Move from `Open` to `Closing`. Returns `false` when the session was
    /// already closing, in which case nothing happens.
    pub fn request_close(&mut self, reason: CloseReason) -> bool {
        if !self.is_open() {
            return false;
        }
        self.lifecycle = ControllerLifecycle::Closing;
        self.close_reason = Some(reason);
        self.dispatcher
            .log()
            .notice(&format!("Closing input overlay ({reason:?})."));
        true
    }

    /// Hand out the close reason exactly once, moving to `Closed`. The caller
    /// runs the teardown side effects.
    pub fn complete_close(&mut self) -> Option<CloseReason> {
        if self.lifecycle != ControllerLifecycle::Closing {
            return None;
        }
        self.lifecycle = ControllerLifecycle::Closed;
        self.close_reason
    }

    fn dispatch(&self, kind: ActionKind) -> DispatchOutcome {
        let actions = &self.settings.actions;
        let template = match kind {
            ActionKind::Enter => &actions.on_enter,
            ActionKind::Escape => &actions.on_escape,
            ActionKind::Dismiss => &actions.on_dismiss,
            ActionKind::Invalid => &actions.on_invalid,
        };
        self.dispatcher.dispatch(kind, template, &self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::{ControllerLifecycle, OverlayController};
    use crate::host::MemoryHost;
    use crate::overlay::dispatch::{ActionDispatcher, SessionLog};
    use crate::overlay::input::{KeyCode, KeyEvent};
    use crate::overlay::messages::{CloseReason, MainToOverlay, OverlayToMain};
    use crate::overlay::settings::{ActionTemplates, OverlaySettings};
    use crate::overlay::surface::{EventDisposition, SurfaceEvent};
    use crate::overlay::validation::InputType;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::Arc;

    struct Harness {
        controller: OverlayController,
        host: Arc<MemoryHost>,
        main_tx: Sender<MainToOverlay>,
        overlay_rx: Receiver<OverlayToMain>,
    }

    fn actions() -> ActionTemplates {
        ActionTemplates {
            on_enter: "enter:$UserInput$".into(),
            on_escape: "esc:$UserInput$".into(),
            on_dismiss: "dismiss:$UserInput$".into(),
            on_invalid: "invalid:$UserInput$".into(),
        }
    }

    fn harness(settings: OverlaySettings) -> Harness {
        let host = Arc::new(MemoryHost::new());
        let (main_tx, main_rx) = channel();
        let (overlay_tx, overlay_rx) = channel();
        let dispatcher = ActionDispatcher::new(host.clone(), SessionLog::new(host.clone(), false));
        Harness {
            controller: OverlayController::new(Arc::new(settings), dispatcher, main_rx, overlay_tx),
            host,
            main_tx,
            overlay_rx,
        }
    }

    fn with_actions(settings: OverlaySettings) -> OverlaySettings {
        OverlaySettings {
            actions: actions(),
            ..settings
        }
    }

    fn type_text(controller: &mut OverlayController, text: &str) {
        for ch in text.chars() {
            let field = controller.text().to_string();
            let cursor = field.chars().count();
            if controller.handle_char(ch, &field, cursor) == EventDisposition::Pass {
                controller.handle_text_changed(format!("{field}{ch}"));
            }
        }
    }

    #[test]
    fn enter_dispatches_once_and_closes() {
        let mut h = harness(with_actions(OverlaySettings::default()));
        type_text(&mut h.controller, "hello");

        let disposition = h.controller.handle_key_down(KeyEvent::plain(KeyCode::Enter));
        assert_eq!(disposition, EventDisposition::Suppress);
        assert_eq!(h.controller.lifecycle(), ControllerLifecycle::Closing);
        assert_eq!(h.host.executed(), vec!["enter:hello".to_string()]);

        h.controller.handle_key_down(KeyEvent::plain(KeyCode::Enter));
        h.controller.handle_key_down(KeyEvent::plain(KeyCode::Escape));
        h.controller.handle_focus_lost();
        assert_eq!(h.host.executed(), vec!["enter:hello".to_string()]);
    }

    #[test]
    fn out_of_range_enter_fires_invalid_and_stays_open() {
        let mut h = harness(with_actions(OverlaySettings {
            input_type: InputType::Integer,
            min_value: 0.0,
            max_value: 10.0,
            ..OverlaySettings::default()
        }));
        type_text(&mut h.controller, "15");

        assert_eq!(
            h.controller.handle_key_down(KeyEvent::plain(KeyCode::Enter)),
            EventDisposition::Suppress
        );
        assert!(h.controller.is_open());
        assert_eq!(h.host.executed(), vec!["invalid:15".to_string()]);
        assert_eq!(h.controller.complete_close(), None);
    }

    #[test]
    fn enter_uses_field_text_delivered_with_the_key() {
        let mut h = harness(with_actions(OverlaySettings {
            input_type: InputType::Integer,
            min_value: 0.0,
            max_value: 10.0,
            ..OverlaySettings::default()
        }));
        // Native edit controls report EN_CHANGE after the whole input batch.
        for (ch, field) in [('1', ""), ('5', "1")] {
            let event = SurfaceEvent::Char {
                ch,
                field_text: field.into(),
                cursor: field.len(),
            };
            assert_eq!(h.controller.handle_surface_event(event), EventDisposition::Pass);
        }
        h.controller.handle_surface_event(SurfaceEvent::KeyDown {
            key: KeyEvent::plain(KeyCode::Enter),
            field_text: "15".into(),
        });
        h.controller
            .handle_surface_event(SurfaceEvent::TextChanged("1".into()));
        h.controller
            .handle_surface_event(SurfaceEvent::TextChanged("15".into()));

        assert_eq!(h.host.executed(), vec!["invalid:15".to_string()]);
        assert!(h.controller.is_open());
        assert_eq!(h.controller.text(), "15");
    }

    #[test]
    fn focus_loss_dismisses_with_field_text_delivered_with_the_event() {
        let mut h = harness(with_actions(OverlaySettings::default()));
        h.controller.handle_surface_event(SurfaceEvent::FocusLost {
            field_text: "late".into(),
        });
        assert_eq!(h.host.executed(), vec!["dismiss:late".to_string()]);
    }

    #[test]
    fn unparsable_numeric_text_skips_range_gate() {
        let mut h = harness(with_actions(OverlaySettings {
            input_type: InputType::Float,
            min_value: 0.0,
            max_value: 1.0,
            ..OverlaySettings::default()
        }));
        type_text(&mut h.controller, "-");
        h.controller.handle_key_down(KeyEvent::plain(KeyCode::Enter));
        assert_eq!(h.host.executed(), vec!["enter:-".to_string()]);
        assert_eq!(h.controller.close_reason(), Some(CloseReason::Enter));
    }

    #[test]
    fn rejected_character_dispatches_invalid_and_is_suppressed() {
        let mut h = harness(with_actions(OverlaySettings {
            input_type: InputType::Integer,
            ..OverlaySettings::default()
        }));
        type_text(&mut h.controller, "4a2");
        assert_eq!(h.controller.text(), "42");
        assert_eq!(h.host.executed(), vec!["invalid:4".to_string()]);
        assert!(h.controller.is_open());
    }

    #[test]
    fn escape_always_closes_regardless_of_range() {
        let mut h = harness(with_actions(OverlaySettings {
            input_type: InputType::Integer,
            min_value: 0.0,
            max_value: 10.0,
            ..OverlaySettings::default()
        }));
        type_text(&mut h.controller, "99");
        h.controller.handle_key_down(KeyEvent::ctrl(KeyCode::Escape));
        assert_eq!(h.host.executed(), vec!["esc:99".to_string()]);
        assert_eq!(h.controller.close_reason(), Some(CloseReason::Escape));
    }

    #[test]
    fn multiline_enter_passes_through_but_ctrl_enter_submits() {
        let mut h = harness(with_actions(OverlaySettings {
            multiline: true,
            ..OverlaySettings::default()
        }));
        assert_eq!(
            h.controller.handle_key_down(KeyEvent::plain(KeyCode::Enter)),
            EventDisposition::Pass
        );
        assert!(h.controller.is_open());
        h.controller.handle_key_down(KeyEvent::ctrl(KeyCode::Enter));
        assert_eq!(h.controller.close_reason(), Some(CloseReason::Enter));
    }

    #[test]
    fn focus_loss_respects_dismiss_option() {
        let mut ignored = harness(with_actions(OverlaySettings {
            unfocus_dismiss: false,
            ..OverlaySettings::default()
        }));
        ignored.controller.handle_focus_lost();
        assert!(ignored.controller.is_open());
        assert!(ignored.host.executed().is_empty());

        let mut dismissed = harness(with_actions(OverlaySettings::default()));
        type_text(&mut dismissed.controller, "bye");
        dismissed.controller.handle_focus_lost();
        assert_eq!(dismissed.host.executed(), vec!["dismiss:bye".to_string()]);
        assert_eq!(
            dismissed.controller.close_reason(),
            Some(CloseReason::FocusLost)
        );
    }

    #[test]
    fn external_close_dispatches_nothing_and_completes_once() {
        let mut h = harness(with_actions(OverlaySettings::default()));
        h.main_tx
            .send(MainToOverlay::Close {
                reason: CloseReason::Stop,
            })
            .expect("stop send");
        h.main_tx
            .send(MainToOverlay::Close {
                reason: CloseReason::Unload,
            })
            .expect("unload send");

        h.controller.pump_runtime_messages();
        assert!(h.host.executed().is_empty());
        assert_eq!(h.controller.complete_close(), Some(CloseReason::Stop));
        assert_eq!(h.controller.complete_close(), None);
        assert_eq!(h.controller.lifecycle(), ControllerLifecycle::Closed);
    }

    #[test]
    fn dropped_service_channel_closes_session() {
        let mut h = harness(OverlaySettings::default());
        drop(h.main_tx);
        h.controller.pump_runtime_messages();
        assert_eq!(
            h.controller.close_reason(),
            Some(CloseReason::OverlayFailure)
        );
    }

    #[test]
    fn text_changes_are_mirrored_to_the_service() {
        let mut h = harness(OverlaySettings::default());
        h.controller.publish_text("seed".into());
        h.controller
            .handle_surface_event(SurfaceEvent::TextChanged("seed!".into()));
        h.controller
            .handle_surface_event(SurfaceEvent::TextChanged("seed!".into()));

        let received: Vec<_> = h.overlay_rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                OverlayToMain::TextChanged {
                    text: "seed".into()
                },
                OverlayToMain::TextChanged {
                    text: "seed!".into()
                },
            ]
        );
    }

    #[test]
    fn input_after_close_is_suppressed() {
        let mut h = harness(with_actions(OverlaySettings::default()));
        assert!(h.controller.request_close(CloseReason::Stop));
        assert!(!h.controller.request_close(CloseReason::Escape));
        assert_eq!(
            h.controller.handle_char('a', "", 0),
            EventDisposition::Suppress
        );
        assert_eq!(
            h.controller.handle_surface_event(SurfaceEvent::Closed),
            EventDisposition::Pass
        );
        assert_eq!(h.controller.close_reason(), Some(CloseReason::Stop));
    }
}
