#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Escape,
    Enter,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub shift: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyEvent {
    pub fn plain(key: KeyCode) -> Self {
        Self {
            key,
            modifiers: KeyModifiers::default(),
        }
    }

    pub fn ctrl(key: KeyCode) -> Self {
        Self {
            key,
            modifiers: KeyModifiers {
                ctrl: true,
                shift: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Cancel,
    Submit,
}

/// Escape always cancels. Enter submits a single-line field; a multi-line
/// field needs Ctrl+Enter so plain Enter can insert a newline.
pub fn map_key_event_to_command(multiline: bool, event: KeyEvent) -> Option<KeyCommand> {
    match (event.key, event.modifiers) {
        (KeyCode::Escape, _) => Some(KeyCommand::Cancel),
        (KeyCode::Enter, _) if !multiline => Some(KeyCommand::Submit),
        (KeyCode::Enter, KeyModifiers { ctrl: true, .. }) => Some(KeyCommand::Submit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_cancels_with_any_modifiers() {
        assert_eq!(
            map_key_event_to_command(false, KeyEvent::plain(KeyCode::Escape)),
            Some(KeyCommand::Cancel)
        );
        assert_eq!(
            map_key_event_to_command(true, KeyEvent::ctrl(KeyCode::Escape)),
            Some(KeyCommand::Cancel)
        );
    }

    #[test]
    fn enter_submits_single_line_fields() {
        assert_eq!(
            map_key_event_to_command(false, KeyEvent::plain(KeyCode::Enter)),
            Some(KeyCommand::Submit)
        );
        assert_eq!(
            map_key_event_to_command(false, KeyEvent::ctrl(KeyCode::Enter)),
            Some(KeyCommand::Submit)
        );
    }

    #[test]
    fn multiline_needs_ctrl_enter() {
        assert_eq!(
            map_key_event_to_command(true, KeyEvent::plain(KeyCode::Enter)),
            None
        );
        assert_eq!(
            map_key_event_to_command(true, KeyEvent::ctrl(KeyCode::Enter)),
            Some(KeyCommand::Submit)
        );
    }

    #[test]
    fn other_keys_map_to_nothing() {
        assert_eq!(
            map_key_event_to_command(false, KeyEvent::ctrl(KeyCode::Other)),
            None
        );
    }
}
