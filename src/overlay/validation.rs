use serde::Serialize;

/// Character policy applied to every keystroke.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// Accept anything.
    #[default]
    String,
    Integer,
    Float,
    Letters,
    Alphanumeric,
    Hexadecimal,
    Email,
    /// Only characters from the configured allowed set.
    Custom,
}

const EMAIL_SYMBOLS: &str = "@.-_+";

impl InputType {
    /// Case-insensitive match on the option vocabulary. Unknown values fall
    /// back to [`InputType::String`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "integer" => Self::Integer,
            "float" => Self::Float,
            "letters" | "lettersonly" => Self::Letters,
            "alphanumeric" | "alphanumericonly" => Self::Alphanumeric,
            "hexadecimal" => Self::Hexadecimal,
            "email" => Self::Email,
            "custom" | "customcharset" => Self::Custom,
            _ => Self::String,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// Decide whether `ch` may be inserted at `cursor` (a character index) into
/// `field_text`.
pub fn validate_char(
    ch: char,
    input_type: InputType,
    field_text: &str,
    cursor: usize,
    allowed_chars: &str,
) -> bool {
    if ch.is_control() {
        return true;
    }
    match input_type {
        InputType::String => true,
        InputType::Integer => ch.is_ascii_digit() || accepts_sign(ch, field_text, cursor),
        InputType::Float => {
            ch.is_ascii_digit()
                || accepts_sign(ch, field_text, cursor)
                || (ch == '.' && !field_text.contains('.'))
        }
        InputType::Letters => ch.is_alphabetic(),
        InputType::Alphanumeric => ch.is_alphanumeric(),
        InputType::Hexadecimal => ch.is_ascii_hexdigit(),
        InputType::Email => ch.is_alphanumeric() || EMAIL_SYMBOLS.contains(ch),
        InputType::Custom => allowed_chars.is_empty() || allowed_chars.contains(ch),
    }
}

fn accepts_sign(ch: char, field_text: &str, cursor: usize) -> bool {
    ch == '-' && cursor == 0 && !field_text.contains('-')
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeCheck {
    /// Policy has no numeric range.
    NotApplicable,
    /// Text does not parse as the policy's number type; submission proceeds.
    Unparsed,
    InRange(f64),
    OutOfRange(f64),
}

/// Numeric gate evaluated when the user submits with Enter.
pub fn check_range(input_type: InputType, text: &str, min: f64, max: f64) -> RangeCheck {
    let value = match input_type {
        InputType::Integer => text.trim().parse::<i32>().ok().map(f64::from),
        InputType::Float => text.trim().parse::<f64>().ok(),
        _ => return RangeCheck::NotApplicable,
    };
    match value {
        None => RangeCheck::Unparsed,
        Some(v) if v < min || v > max => RangeCheck::OutOfRange(v),
        Some(v) => RangeCheck::InRange(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepts(ch: char, input_type: InputType) -> bool {
        validate_char(ch, input_type, "", 0, "")
    }

    #[test]
    fn control_characters_pass_every_policy() {
        for input_type in [
            InputType::String,
            InputType::Integer,
            InputType::Float,
            InputType::Letters,
            InputType::Alphanumeric,
            InputType::Hexadecimal,
            InputType::Email,
            InputType::Custom,
        ] {
            for ch in ['\u{8}', '\u{7f}', '\r', '\n', '\t', '\u{1b}'] {
                assert!(
                    validate_char(ch, input_type, "", 0, "xyz"),
                    "{ch:?} rejected by {input_type:?}"
                );
            }
        }
    }

    #[test]
    fn integer_accepts_digits_and_single_leading_minus() {
        assert!(accepts('7', InputType::Integer));
        assert!(!accepts('a', InputType::Integer));
        assert!(!accepts('.', InputType::Integer));
        assert!(validate_char('-', InputType::Integer, "12", 0, ""));
        assert!(!validate_char('-', InputType::Integer, "12", 1, ""));
        assert!(!validate_char('-', InputType::Integer, "-12", 0, ""));
    }

    #[test]
    fn float_accepts_one_decimal_point_anywhere() {
        assert!(validate_char('.', InputType::Float, "12", 2, ""));
        assert!(validate_char('.', InputType::Float, "12", 0, ""));
        assert!(!validate_char('.', InputType::Float, "1.2", 3, ""));
        assert!(validate_char('-', InputType::Float, "1.2", 0, ""));
        assert!(!validate_char('-', InputType::Float, "1.2", 2, ""));
        assert!(!accepts('e', InputType::Float));
    }

    #[test]
    fn letter_and_alphanumeric_policies() {
        assert!(accepts('q', InputType::Letters));
        assert!(accepts('é', InputType::Letters));
        assert!(!accepts('1', InputType::Letters));
        assert!(!accepts(' ', InputType::Letters));
        assert!(accepts('1', InputType::Alphanumeric));
        assert!(accepts('Z', InputType::Alphanumeric));
        assert!(!accepts('-', InputType::Alphanumeric));
    }

    #[test]
    fn hexadecimal_is_case_insensitive() {
        for ch in ['0', '9', 'a', 'f', 'A', 'F'] {
            assert!(accepts(ch, InputType::Hexadecimal), "{ch} rejected");
        }
        for ch in ['g', 'G', 'x', '-', ' '] {
            assert!(!accepts(ch, InputType::Hexadecimal), "{ch} accepted");
        }
    }

    #[test]
    fn email_accepts_alphanumerics_and_address_symbols() {
        for ch in ['a', '5', '@', '.', '-', '_', '+'] {
            assert!(accepts(ch, InputType::Email), "{ch} rejected");
        }
        for ch in [' ', '!', ',', '#'] {
            assert!(!accepts(ch, InputType::Email), "{ch} accepted");
        }
    }

    #[test]
    fn custom_policy_uses_allowed_set() {
        assert!(validate_char('x', InputType::Custom, "", 0, "xyz"));
        assert!(!validate_char('a', InputType::Custom, "", 0, "xyz"));
        assert!(validate_char('a', InputType::Custom, "", 0, ""));
        assert!(validate_char('%', InputType::Custom, "", 0, ""));
    }

    #[test]
    fn validation_is_deterministic() {
        for _ in 0..3 {
            assert!(validate_char('-', InputType::Integer, "5", 0, ""));
            assert!(!validate_char('-', InputType::Integer, "5", 1, ""));
        }
    }

    #[test]
    fn parse_is_case_insensitive_with_aliases() {
        assert_eq!(InputType::parse("INTEGER"), InputType::Integer);
        assert_eq!(InputType::parse("float"), InputType::Float);
        assert_eq!(InputType::parse("LettersOnly"), InputType::Letters);
        assert_eq!(InputType::parse("hexadecimal"), InputType::Hexadecimal);
        assert_eq!(InputType::parse("CustomCharset"), InputType::Custom);
        assert_eq!(InputType::parse("Any"), InputType::String);
        assert_eq!(InputType::parse("phone"), InputType::String);
    }

    #[test]
    fn range_check_gates_parsed_values_only() {
        assert_eq!(
            check_range(InputType::Integer, "15", 0.0, 10.0),
            RangeCheck::OutOfRange(15.0)
        );
        assert_eq!(
            check_range(InputType::Integer, " 5 ", 0.0, 10.0),
            RangeCheck::InRange(5.0)
        );
        assert_eq!(
            check_range(InputType::Integer, "1.5", 0.0, 10.0),
            RangeCheck::Unparsed
        );
        assert_eq!(
            check_range(InputType::Integer, "", 0.0, 10.0),
            RangeCheck::Unparsed
        );
        assert_eq!(
            check_range(InputType::Float, "-0.5", 0.0, 10.0),
            RangeCheck::OutOfRange(-0.5)
        );
        assert_eq!(
            check_range(InputType::Float, "10.0", 0.0, 10.0),
            RangeCheck::InRange(10.0)
        );
        assert_eq!(
            check_range(InputType::String, "99", 0.0, 10.0),
            RangeCheck::NotApplicable
        );
        assert_eq!(
            check_range(InputType::Integer, "99999999999", 0.0, 10.0),
            RangeCheck::Unparsed
        );
    }
}
