//! Uncontracted (grade 1) braille into Unicode braille cells

const BLANK: u32 = 0x2800;
const CAPITAL: char = '\u{2820}';
const NUMBER: char = '\u{283C}';
const GRADE_ONE: char = '\u{2830}';
const UNKNOWN: char = '\u{283F}';

/// Dot patterns for a..z, bit n-1 set for dot n
const LETTERS: [u8; 26] = [
    0x01, 0x03, 0x09, 0x19, 0x11, 0x0B, 0x1B, 0x13, 0x0A, 0x1A, // a-j
    0x05, 0x07, 0x0D, 0x1D, 0x15, 0x0F, 0x1F, 0x17, 0x0E, 0x1E, // k-t
    0x25, 0x27, 0x3A, 0x2D, 0x3D, 0x35, // u-z
];

fn cell(dots: u8) -> char {
    char::from_u32(BLANK + u32::from(dots)).unwrap_or(UNKNOWN)
}

fn letter(c: char) -> Option<char> {
    let lower = c.to_ascii_lowercase();
    lower
        .is_ascii_lowercase()
        .then(|| cell(LETTERS[(lower as u8 - b'a') as usize]))
}

/// Digits use the a-j patterns
fn digit(c: char) -> Option<char> {
    let value = c.to_digit(10)?;
    let index = if value == 0 { 9 } else { value as usize - 1 };
    Some(cell(LETTERS[index]))
}

fn punctuation(c: char) -> Option<char> {
    let dots = match c {
        ',' => 0x02,
        ';' => 0x06,
        ':' => 0x12,
        '.' => 0x32,
        '!' => 0x16,
        '?' => 0x26,
        '\'' => 0x04,
        '-' => 0x24,
        '"' => 0x36,
        '/' => 0x0C,
        _ => return None,
    };
    Some(cell(dots))
}

/// Transcribe print text cell by cell.
///
/// Capitals get the capital sign, digit runs the number sign. A letter a-j
/// right after a digit run gets the grade 1 indicator so it cannot be read
/// as a digit. Whitespace is kept so the text can be wrapped.
#[must_use]
pub fn transcribe(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 3);
    let mut in_number = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(d) = digit(c) {
            if !in_number {
                out.push(NUMBER);
                in_number = true;
            }
            out.push(d);
            continue;
        }

        if in_number && matches!(c, '.' | ',') && chars.peek().is_some_and(char::is_ascii_digit) {
            out.extend(punctuation(c));
            continue;
        }

        if let Some(l) = letter(c) {
            if in_number && c.is_ascii_lowercase() && c <= 'j' {
                out.push(GRADE_ONE);
            }
            if c.is_ascii_uppercase() {
                out.push(CAPITAL);
            }
            out.push(l);
        } else if c.is_whitespace() {
            out.push(' ');
        } else {
            out.push(punctuation(c).unwrap_or(UNKNOWN));
        }
        in_number = false;
    }
    out
}
