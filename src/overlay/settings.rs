use serde::Serialize;

use crate::host::{Host, LogLevel};
use crate::overlay::fonts::resolve_font_face;
use crate::overlay::validation::InputType;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Win32 `COLORREF` layout (`0x00BBGGRR`).
    pub fn to_colorref(self) -> u32 {
        (self.r as u32) | ((self.g as u32) << 8) | ((self.b as u32) << 16)
    }
}

/// Parse `"R,G,B"`. Extra components are ignored; anything unparsable yields
/// `default`.
pub fn parse_color(value: &str, default: Rgb) -> Rgb {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() < 3 {
        return default;
    }
    let component = |s: &str| s.trim().parse::<u8>().ok();
    match (component(parts[0]), component(parts[1]), component(parts[2])) {
        (Some(r), Some(g), Some(b)) => Rgb::new(r, g, b),
        _ => default,
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

impl TextAlign {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" => Self::Left,
            "right" => Self::Right,
            _ => Self::Center,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextDirection {
    #[default]
    LeftToRight,
    RightToLeft,
    Inherit,
}

impl TextDirection {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" => Self::RightToLeft,
            "inherit" => Self::Inherit,
            _ => Self::LeftToRight,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    #[default]
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bolditalic" => Self::BoldItalic,
            "bold" => Self::Bold,
            "italic" => Self::Italic,
            _ => Self::Regular,
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, Self::Bold | Self::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, Self::Italic | Self::BoldItalic)
    }

    /// Name used to pick a style-specific font file, if any.
    pub fn file_suffix(self) -> Option<&'static str> {
        match self {
            Self::Regular => None,
            Self::Bold => Some("Bold"),
            Self::Italic => Some("Italic"),
            Self::BoldItalic => Some("BoldItalic"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Border {
    pub color: Rgb,
    pub thickness: i32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ActionTemplates {
    pub on_enter: String,
    pub on_escape: String,
    pub on_dismiss: String,
    pub on_invalid: String,
}

/// Resolved overlay configuration. Built once per reload and shared read-only
/// with the overlay thread.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OverlaySettings {
    pub width: i32,
    pub height: i32,
    pub offset_x: i32,
    pub offset_y: i32,

    pub background: Rgb,
    pub font_color: Rgb,
    pub font_size: i32,
    /// Configured family name.
    pub font_face: String,
    /// Font file resolved from the skin's font folder, or the family name
    /// unchanged when nothing matched.
    pub font_source: String,
    pub font_style: FontStyle,
    pub align: TextAlign,
    pub direction: TextDirection,
    pub border: Option<Border>,

    pub multiline: bool,
    pub allow_scroll: bool,
    pub input_limit: usize,
    pub default_value: String,
    pub password: bool,
    pub unfocus_dismiss: bool,
    pub top_most: bool,
    pub logging: bool,

    pub input_type: InputType,
    pub allowed_chars: String,
    pub min_value: f64,
    pub max_value: f64,

    pub actions: ActionTemplates,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            width: 300,
            height: 40,
            offset_x: 20,
            offset_y: 20,
            background: Rgb::WHITE,
            font_color: Rgb::BLACK,
            font_size: 12,
            font_face: DEFAULT_FONT_FACE.to_string(),
            font_source: DEFAULT_FONT_FACE.to_string(),
            font_style: FontStyle::Regular,
            align: TextAlign::Center,
            direction: TextDirection::LeftToRight,
            border: None,
            multiline: false,
            allow_scroll: false,
            input_limit: 0,
            default_value: String::new(),
            password: false,
            unfocus_dismiss: true,
            top_most: false,
            logging: false,
            input_type: InputType::String,
            allowed_chars: String::new(),
            min_value: f64::MIN,
            max_value: f64::MAX,
            actions: ActionTemplates::default(),
        }
    }
}

pub const DEFAULT_FONT_FACE: &str = "Segoe UI";

impl OverlaySettings {
    /// Read every option from the host, applying defaults for anything
    /// missing or malformed.
    pub fn from_host(host: &dyn Host) -> Self {
        let logging = host.read_int("Logging", 0) == 1;
        if logging {
            host.log(LogLevel::Notice, "Reloading measure...");
        }

        let font_style = FontStyle::parse(&host.read_string("FontStyle", "Normal"));
        let font_face = host.read_string("FontFace", DEFAULT_FONT_FACE);
        let fonts_dir = std::path::Path::new(&host.replace_variables("#@#")).join("Fonts");
        let font_source = resolve_font_face(&font_face, font_style, &fonts_dir);

        let border = (host.read_int("AllowBorder", 0) == 1).then(|| Border {
            color: parse_color(&host.read_string("BorderColor", "0,0,0"), Rgb::BLACK),
            thickness: host.read_int("BorderThickness", 2),
        });

        let settings = Self {
            width: host.read_int("W", 300),
            height: host.read_int("H", 40),
            offset_x: host.read_int("X", 20),
            offset_y: host.read_int("Y", 20),
            background: parse_color(&host.read_string("SolidColor", "255,255,255"), Rgb::WHITE),
            font_color: parse_color(&host.read_string("FontColor", "0,0,0"), Rgb::BLACK),
            font_size: host.read_int("FontSize", 12),
            font_face,
            font_source,
            font_style,
            align: TextAlign::parse(&host.read_string("Align", "Center")),
            direction: TextDirection::parse(&host.read_string("RightToLeft", "No")),
            border,
            multiline: host.read_int("Multiline", 0) == 1,
            allow_scroll: host.read_int("AllowScroll", 0) == 1,
            input_limit: host.read_int("InputLimit", 0).max(0) as usize,
            default_value: host.read_string("DefaultValue", ""),
            password: host.read_int("Password", 0) == 1,
            unfocus_dismiss: host.read_int("UnFocusDismiss", 1) == 1,
            top_most: host.read_int("TopMost", 0) == 1,
            logging,
            input_type: InputType::parse(&host.read_string("InputType", "String")),
            allowed_chars: host.read_string("AllowedChars", ""),
            min_value: host.read_double("MinValue", f64::MIN),
            max_value: host.read_double("MaxValue", f64::MAX),
            actions: ActionTemplates {
                on_enter: host.read_string("OnEnterAction", ""),
                on_escape: host.read_string("OnESCAction", ""),
                on_dismiss: host.read_string("OnDismissAction", ""),
                on_invalid: host.read_string("InValidAction", ""),
            },
        };

        if logging {
            host.log(
                LogLevel::Notice,
                &format!(
                    "Reload complete. Input dimensions: {}x{}, SolidColor: {:?}, TopMost: {}, Logging: {}",
                    settings.width,
                    settings.height,
                    settings.background,
                    settings.top_most,
                    settings.logging
                ),
            );
        }
        tracing::debug!(
            width = settings.width,
            height = settings.height,
            input_type = ?settings.input_type,
            "overlay settings resolved"
        );
        settings
    }

    /// Scrollbars only apply to multi-line fields.
    pub fn shows_scrollbar(&self) -> bool {
        self.multiline && self.allow_scroll
    }

    /// Border drawn around the field, if enabled with a positive thickness.
    pub fn visible_border(&self) -> Option<Border> {
        self.border.filter(|b| b.thickness > 0)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
