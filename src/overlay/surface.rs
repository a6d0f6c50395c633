//! The edit surface the overlay runs on.
//!
//! A surface owns the text field (native edit control or an in-memory
//! buffer). It reports raw input to the overlay loop and applies or drops
//! each keystroke according to the loop's answer.

use anyhow::Result;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::overlay::input::{KeyCode, KeyEvent};
use crate::overlay::settings::OverlaySettings;

/// Screen position of the overlay and the host window it sits above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub owner: Option<isize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// `field_text` is the field as it reads when the key goes down.
    KeyDown {
        key: KeyEvent,
        field_text: String,
    },
    /// A character about to be inserted at `cursor` (character index).
    Char {
        ch: char,
        field_text: String,
        cursor: usize,
    },
    TextChanged(String),
    FocusLost {
        field_text: String,
    },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Pass,
    Suppress,
}

pub trait OverlaySurface {
    fn show(&mut self);

    fn text(&self) -> String;

    /// Wait up to `timeout` for input and hand every event to `handler`.
    /// `KeyDown` and `Char` events are only applied when the handler passes
    /// them.
    fn pump(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
    );

    fn close(&mut self);
}

/// Builds a surface on the overlay thread.
pub type SurfaceFactory =
    Arc<dyn Fn(&OverlaySettings, Placement) -> Result<Box<dyn OverlaySurface>> + Send + Sync>;

/// Convert a UTF-16 offset (as reported by native edit controls) into a
/// character index into `text`.
pub fn utf16_offset_to_char_index(text: &str, offset: usize) -> usize {
    let mut units = 0;
    for (index, ch) in text.chars().enumerate() {
        if units >= offset {
            return index;
        }
        units += ch.len_utf16();
    }
    text.chars().count()
}

/// Outcome of feeding one UTF-16 unit from a `WM_CHAR` into [`Utf16Assembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf16Unit {
    /// A high surrogate waiting for its low half.
    Pending,
    Char(char),
    /// A surrogate half that cannot form a character.
    Unpaired,
}

/// Joins surrogate pairs so non-BMP characters are validated as one `char`.
#[derive(Debug, Default)]
pub struct Utf16Assembler {
    high: Option<u16>,
}

impl Utf16Assembler {
    pub fn push(&mut self, unit: u16) -> Utf16Unit {
        if (0xD800..=0xDBFF).contains(&unit) {
            self.high = Some(unit);
            return Utf16Unit::Pending;
        }
        let high = self.high.take();
        let decoded = match (high, unit) {
            (Some(high), 0xDC00..=0xDFFF) => char::decode_utf16([high, unit]).next(),
            (None, 0xDC00..=0xDFFF) => None,
            (_, unit) => char::decode_utf16([unit]).next(),
        };
        match decoded {
            Some(Ok(ch)) => Utf16Unit::Char(ch),
            _ => Utf16Unit::Unpaired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedInput {
    Type(char),
    Key(KeyEvent),
    FocusLost,
    CloseWindow,
}

/// Feeds input into headless surfaces. Input sent while no session is open is
/// picked up by the next one.
#[derive(Clone)]
pub struct HeadlessDriver {
    tx: Sender<ScriptedInput>,
}

impl HeadlessDriver {
    pub fn send(&self, input: ScriptedInput) {
        let _ = self.tx.send(input);
    }

    pub fn type_text(&self, text: &str) {
        for ch in text.chars() {
            self.send(ScriptedInput::Type(ch));
        }
    }

    pub fn press(&self, event: KeyEvent) {
        self.send(ScriptedInput::Key(event));
    }

    pub fn press_enter(&self) {
        self.press(KeyEvent::plain(KeyCode::Enter));
    }

    pub fn press_escape(&self) {
        self.press(KeyEvent::plain(KeyCode::Escape));
    }

    pub fn lose_focus(&self) {
        self.send(ScriptedInput::FocusLost);
    }

    pub fn close_window(&self) {
        self.send(ScriptedInput::CloseWindow);
    }
}

/// Factory for [`HeadlessSurface`]s plus the driver that feeds them.
pub fn headless_surface_factory() -> (SurfaceFactory, HeadlessDriver) {
    let (tx, rx) = channel();
    let input = Arc::new(Mutex::new(rx));
    let factory: SurfaceFactory =
        Arc::new(move |settings: &OverlaySettings, _placement: Placement| {
            Ok(Box::new(HeadlessSurface::new(settings, input.clone())) as Box<dyn OverlaySurface>)
        });
    (factory, HeadlessDriver { tx })
}

/// In-memory single/multi-line edit buffer with a caret at the end.
pub struct HeadlessSurface {
    text: String,
    multiline: bool,
    limit: usize,
    closed: bool,
    input: Arc<Mutex<Receiver<ScriptedInput>>>,
}

impl HeadlessSurface {
    pub fn new(settings: &OverlaySettings, input: Arc<Mutex<Receiver<ScriptedInput>>>) -> Self {
        let mut text = settings.default_value.clone();
        if settings.input_limit > 0 {
            text = text.chars().take(settings.input_limit).collect();
        }
        Self {
            text,
            multiline: settings.multiline,
            limit: settings.input_limit,
            closed: false,
            input,
        }
    }

    fn cursor(&self) -> usize {
        self.text.chars().count()
    }

    fn has_room(&self) -> bool {
        self.limit == 0 || self.text.chars().count() < self.limit
    }

    /// Apply an accepted character the way a plain edit control would.
    fn apply_char(&mut self, ch: char) -> bool {
        match ch {
            '\u{8}' => self.text.pop().is_some(),
            '\r' | '\n' if self.multiline && self.has_room() => {
                self.text.push('\n');
                true
            }
            c if c.is_control() => false,
            c if self.has_room() => {
                self.text.push(c);
                true
            }
            _ => false,
        }
    }

    fn type_char(
        &mut self,
        ch: char,
        handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
    ) {
        let event = SurfaceEvent::Char {
            ch,
            field_text: self.text.clone(),
            cursor: self.cursor(),
        };
        if handler(event) == EventDisposition::Suppress {
            return;
        }
        if self.apply_char(ch) {
            handler(SurfaceEvent::TextChanged(self.text.clone()));
        }
    }

    fn apply_input(
        &mut self,
        input: ScriptedInput,
        handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
    ) {
        match input {
            ScriptedInput::Type(ch) => self.type_char(ch, handler),
            ScriptedInput::Key(event) => {
                let key_down = SurfaceEvent::KeyDown {
                    key: event,
                    field_text: self.text.clone(),
                };
                if handler(key_down) == EventDisposition::Suppress {
                    return;
                }
                if event.key == KeyCode::Enter {
                    self.type_char('\r', handler);
                }
            }
            ScriptedInput::FocusLost => {
                handler(SurfaceEvent::FocusLost {
                    field_text: self.text.clone(),
                });
            }
            ScriptedInput::CloseWindow => {
                handler(SurfaceEvent::Closed);
            }
        }
    }
}

impl OverlaySurface for HeadlessSurface {
    fn show(&mut self) {}

    fn text(&self) -> String {
        self.text.clone()
    }

    fn pump(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(SurfaceEvent) -> EventDisposition,
    ) {
        if self.closed {
            std::thread::sleep(timeout);
            return;
        }

        let batch = {
            let Ok(rx) = self.input.lock() else {
                std::thread::sleep(timeout);
                return;
            };
            let mut batch = Vec::new();
            match rx.recv_timeout(timeout) {
                Ok(input) => batch.push(input),
                Err(RecvTimeoutError::Timeout) => return,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(timeout);
                    return;
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(input) => batch.push(input),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
            batch
        };

        for input in batch {
            self.apply_input(input, handler);
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::input::KeyEvent;

    fn surface(settings: OverlaySettings) -> (HeadlessSurface, HeadlessDriver) {
        let (tx, rx) = channel();
        (
            HeadlessSurface::new(&settings, Arc::new(Mutex::new(rx))),
            HeadlessDriver { tx },
        )
    }

    fn collect(
        surface: &mut HeadlessSurface,
        mut decide: impl FnMut(&SurfaceEvent) -> EventDisposition,
    ) -> Vec<SurfaceEvent> {
        let mut events = Vec::new();
        surface.pump(Duration::from_millis(50), &mut |event| {
            let disposition = decide(&event);
            events.push(event);
            disposition
        });
        events
    }

    #[test]
    fn accepted_characters_are_inserted_and_reported() {
        let (mut surface, driver) = surface(OverlaySettings::default());
        driver.type_text("ab");

        let events = collect(&mut surface, |_| EventDisposition::Pass);
        assert_eq!(surface.text(), "ab");
        assert_eq!(
            events,
            vec![
                SurfaceEvent::Char {
                    ch: 'a',
                    field_text: String::new(),
                    cursor: 0
                },
                SurfaceEvent::TextChanged("a".into()),
                SurfaceEvent::Char {
                    ch: 'b',
                    field_text: "a".into(),
                    cursor: 1
                },
                SurfaceEvent::TextChanged("ab".into()),
            ]
        );
    }

    #[test]
    fn suppressed_characters_never_reach_the_buffer() {
        let (mut surface, driver) = surface(OverlaySettings::default());
        driver.type_text("x1");

        let events = collect(&mut surface, |event| match event {
            SurfaceEvent::Char { ch: 'x', .. } => EventDisposition::Suppress,
            _ => EventDisposition::Pass,
        });
        assert_eq!(surface.text(), "1");
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn input_limit_and_default_value_are_respected() {
        let (mut surface, driver) = surface(OverlaySettings {
            default_value: "abcdef".into(),
            input_limit: 4,
            ..OverlaySettings::default()
        });
        assert_eq!(surface.text(), "abcd");
        driver.type_text("z");
        collect(&mut surface, |_| EventDisposition::Pass);
        assert_eq!(surface.text(), "abcd");

        driver.type_text("\u{8}z");
        collect(&mut surface, |_| EventDisposition::Pass);
        assert_eq!(surface.text(), "abcz");
    }

    #[test]
    fn passed_enter_inserts_newline_only_in_multiline_fields() {
        let (mut single, single_driver) = surface(OverlaySettings::default());
        single_driver.press_enter();
        collect(&mut single, |_| EventDisposition::Pass);
        assert_eq!(single.text(), "");

        let (mut multi, multi_driver) = surface(OverlaySettings {
            multiline: true,
            ..OverlaySettings::default()
        });
        multi_driver.type_text("a");
        multi_driver.press(KeyEvent::plain(KeyCode::Enter));
        multi_driver.type_text("b");
        collect(&mut multi, |_| EventDisposition::Pass);
        assert_eq!(multi.text(), "a\nb");
    }

    #[test]
    fn utf16_offsets_map_to_character_indices() {
        assert_eq!(utf16_offset_to_char_index("abc", 0), 0);
        assert_eq!(utf16_offset_to_char_index("abc", 2), 2);
        assert_eq!(utf16_offset_to_char_index("a😀b", 3), 2);
        assert_eq!(utf16_offset_to_char_index("a😀b", 99), 3);
    }

    #[test]
    fn surrogate_pairs_are_joined_before_validation() {
        let mut assembler = Utf16Assembler::default();
        let units: Vec<u16> = "😀".encode_utf16().collect();
        assert_eq!(assembler.push(units[0]), Utf16Unit::Pending);
        assert_eq!(assembler.push(units[1]), Utf16Unit::Char('😀'));
        assert_eq!(assembler.push('7' as u16), Utf16Unit::Char('7'));
    }

    #[test]
    fn stray_surrogate_halves_are_unpaired() {
        let mut assembler = Utf16Assembler::default();
        assert_eq!(assembler.push(0xDE00), Utf16Unit::Unpaired);
        assert_eq!(assembler.push(0xD83D), Utf16Unit::Pending);
        assert_eq!(assembler.push('a' as u16), Utf16Unit::Char('a'));
        assert_eq!(assembler.push(0xDE00), Utf16Unit::Unpaired);
    }

    #[test]
    fn key_and_focus_events_carry_the_current_field_text() {
        let (mut surface, driver) = surface(OverlaySettings {
            default_value: "12".into(),
            ..OverlaySettings::default()
        });
        driver.press_escape();
        driver.lose_focus();

        let events = collect(&mut surface, |_| EventDisposition::Suppress);
        assert_eq!(
            events,
            vec![
                SurfaceEvent::KeyDown {
                    key: KeyEvent::plain(KeyCode::Escape),
                    field_text: "12".into()
                },
                SurfaceEvent::FocusLost {
                    field_text: "12".into()
                },
            ]
        );
    }
}
