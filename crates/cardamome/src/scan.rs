//! `$name` and `${expr}` interpolation
//!
//! Markup text, attribute values and text templates all use the same rules:
//!
//! ```text
//! Hello $user.name, you owe ${amount * 2}$$
//! └─ text ┘└─ expr ──┘└ text ┘└─ expr ──┘└ "$"
//! ```
//!
//! A `$` that starts neither form is literal.

/// One piece of interpolated text.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Text { text: String, offset: usize },
    Expr { code: String, offset: usize },
}

impl Piece {
    /// Byte offset of the piece in the scanned text
    pub fn offset(&self) -> usize {
        match self {
            Piece::Text { offset, .. } | Piece::Expr { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanError {
    pub offset: usize,
    pub message: String,
}

fn is_name_start(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphabetic()
}

fn is_name_char(b: u8) -> bool {
    b == b'_' || b == b'.' || b.is_ascii_alphanumeric()
}

/// Split `text` into literal text and expressions.
pub fn scan(text: &str) -> Result<Vec<Piece>, ScanError> {
    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while let Some(found) = text[pos..].find('$') {
        let dollar = pos + found;
        literal.push_str(&text[pos..dollar]);
        match bytes.get(dollar + 1) {
            Some(b'$') => {
                literal.push('$');
                pos = dollar + 2;
            }
            Some(b'{') => {
                let end = braced_end(text, dollar + 1).ok_or_else(|| ScanError {
                    offset: dollar,
                    message: "Braced expression not terminated".to_string(),
                })?;
                flush(&mut pieces, &mut literal, literal_start);
                pieces.push(Piece::Expr {
                    code: text[dollar + 2..end - 1].trim().to_string(),
                    offset: dollar,
                });
                pos = end;
                literal_start = pos;
            }
            Some(&b) if is_name_start(b) => {
                let mut end = dollar + 1;
                while end < bytes.len() && is_name_char(bytes[end]) {
                    end += 1;
                }
                // `$name.` at the end of a sentence
                while bytes[end - 1] == b'.' {
                    end -= 1;
                }
                flush(&mut pieces, &mut literal, literal_start);
                pieces.push(Piece::Expr {
                    code: text[dollar + 1..end].to_string(),
                    offset: dollar,
                });
                pos = end;
                literal_start = pos;
            }
            _ => {
                literal.push('$');
                pos = dollar + 1;
            }
        }
    }
    literal.push_str(&text[pos..]);
    flush(&mut pieces, &mut literal, literal_start);
    Ok(pieces)
}

fn flush(pieces: &mut Vec<Piece>, literal: &mut String, offset: usize) {
    if !literal.is_empty() {
        pieces.push(Piece::Text {
            text: std::mem::take(literal),
            offset,
        });
    }
}

/// Index just past the `}` matching the `{` at `open`, skipping over string
/// literals.
pub fn braced_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut pos = open;
    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos + 1);
                }
            }
            quote @ (b'\'' | b'"') => {
                pos += 1;
                while pos < bytes.len() && bytes[pos] != quote {
                    if bytes[pos] == b'\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return None;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}
