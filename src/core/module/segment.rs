//! Seven-segment encoding for the number module

/// Decimal point bit
const DOT: u8 = 0x01;

/// Glyphs for `-` through `:`, indexed by `char - 45`
const GLYPHS: [Option<u8>; 14] = [
    Some(0x02), // -
    Some(DOT),  // .
    None,       // /
    Some(0xFC), // 0
    Some(0x60), // 1
    Some(0xDA), // 2
    Some(0xF2), // 3
    Some(0x66), // 4
    Some(0xB6), // 5
    Some(0xBE), // 6
    Some(0xE0), // 7
    Some(0xFE), // 8
    Some(0xF6), // 9
    None,       // : is a separate flag
];

/// Visible digit positions
pub const DIGITS: usize = 4;

const DEFAULT_BRIGHTNESS: u8 = 128;

/// Contents of a four digit display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBuffer {
    /// Segment masks, left to right
    pub digits: [u8; DIGITS],
    /// Centre colon lit
    pub colon: bool,
    /// Upper apostrophe lit
    pub apostrophe: bool,
    /// Brightness, 0-255
    pub brightness: u8,
}

impl Default for SegmentBuffer {
    fn default() -> Self {
        Self {
            digits: [0; DIGITS],
            colon: false,
            apostrophe: false,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

impl SegmentBuffer {
    /// Values for an `s` update: four digits, colon, apostrophe, brightness
    pub fn values(&self) -> Vec<i32> {
        let mut values: Vec<i32> = self.digits.iter().map(|d| i32::from(*d)).collect();
        values.push(i32::from(self.colon));
        values.push(i32::from(self.apostrophe));
        values.push(i32::from(self.brightness));
        values
    }
}

fn glyph(ch: char) -> Option<u8> {
    let index = (ch as u32).checked_sub(45)? as usize;
    GLYPHS.get(index).copied().flatten()
}

/// Encode `text` into display digits, keeping the brightness of `buffer`.
///
/// Digits, `-` and space take a position; `.` lights the decimal point of
/// the previous position; `:` and `'` set their flags. Other characters are
/// skipped. Encoding stops at the first glyph beyond the fourth position.
pub fn encode_segments(text: &str, buffer: &mut SegmentBuffer) {
    let mut digits: Vec<u8> = Vec::with_capacity(DIGITS);
    buffer.colon = false;
    buffer.apostrophe = false;

    for ch in text.chars() {
        let mask = match ch {
            ':' => {
                buffer.colon = true;
                continue;
            }
            '\'' => {
                buffer.apostrophe = true;
                continue;
            }
            '.' => {
                if let Some(last) = digits.last_mut() {
                    *last |= DOT;
                    continue;
                }
                DOT
            }
            ' ' => 0,
            other => match glyph(other) {
                Some(mask) => mask,
                None => continue,
            },
        };
        if digits.len() == DIGITS {
            break;
        }
        digits.push(mask);
    }

    buffer.digits = [0; DIGITS];
    buffer.digits[..digits.len()].copy_from_slice(&digits);
}

/// Format `value` for a four digit display.
///
/// Up to three decimals. The value is clamped to what fits (`-999` to `9999`
/// before scaling) and right-aligned with `pad`; a pad of `:`, `.` or `'`
/// would change the display so it becomes a space.
pub fn format_number(value: f64, decimals: u8, pad: char) -> String {
    let decimals = decimals.min(3);
    let scale = 10f64.powi(i32::from(decimals));
    let value = if value.is_nan() { 0.0 } else { value };
    let clamped = value.clamp(-999.0 / scale, 9999.0 / scale);

    let rounded = (clamped * scale).round() / scale;
    // Avoid "-0" after rounding
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };

    let text = format!("{:.*}", decimals as usize, rounded);
    let width = DIGITS + usize::from(decimals > 0);
    let pad = if matches!(pad, ':' | '.' | '\'') { ' ' } else { pad };

    let padding: String = std::iter::repeat(pad)
        .take(width.saturating_sub(text.chars().count()))
        .collect();
    padding + &text
}
