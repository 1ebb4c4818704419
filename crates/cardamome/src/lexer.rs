//! Tokenizer for template expressions
//!
//! Works on the whole expression text at once and hands the parser a
//! `Vec<Token>` ending in [`Tok::End`]. In statement mode (embedded code)
//! line breaks outside brackets become [`Tok::Newline`].

use crate::ast::{Span, span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Else,
    True,
    False,
    None,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::In => "in",
            Keyword::Is => "is",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::True => "True",
            Keyword::False => "False",
            Keyword::None => "None",
        }
    }

    fn from_name(name: &str) -> Option<Keyword> {
        Some(match name {
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "True" => Keyword::True,
            "False" => Keyword::False,
            "None" => Keyword::None,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Pipe,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

/// Longest spellings first, so `**` wins over `*`.
const OPERATORS: &[(&str, Op)] = &[
    ("**", Op::DoubleStar),
    ("//", Op::DoubleSlash),
    ("==", Op::EqEq),
    ("!=", Op::NotEq),
    ("<=", Op::LessEq),
    (">=", Op::GreaterEq),
    ("(", Op::LParen),
    (")", Op::RParen),
    ("[", Op::LBracket),
    ("]", Op::RBracket),
    ("{", Op::LBrace),
    ("}", Op::RBrace),
    (",", Op::Comma),
    (":", Op::Colon),
    (";", Op::Semi),
    (".", Op::Dot),
    ("=", Op::Assign),
    ("+", Op::Plus),
    ("-", Op::Minus),
    ("*", Op::Star),
    ("/", Op::Slash),
    ("%", Op::Percent),
    ("|", Op::Pipe),
    ("<", Op::Less),
    (">", Op::Greater),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(Keyword),
    Op(Op),
    Int(i64),
    Float(f64),
    Str(String),
    Newline,
    End,
}

impl Tok {
    /// How the token reads in an error message.
    pub fn describe(&self) -> String {
        match self {
            Tok::Name(name) => format!("name `{name}`"),
            Tok::Keyword(kw) => format!("`{}`", kw.as_str()),
            Tok::Op(op) => {
                let spelling = OPERATORS
                    .iter()
                    .find(|(_, o)| o == op)
                    .map_or("?", |(s, _)| *s);
                format!("`{spelling}`")
            }
            Tok::Int(_) | Tok::Float(_) => "number".to_string(),
            Tok::Str(_) => "string".to_string(),
            Tok::Newline => "end of line".to_string(),
            Tok::End => "end of expression".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
}

/// A character sequence that is not a token.
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

/// Split `src` into tokens. With `statements` set, line breaks outside
/// brackets separate statements.
pub fn tokenize(src: &str, statements: bool) -> Result<Vec<Token>, LexError> {
    let mut tokenizer = Tokenizer {
        src,
        pos: 0,
        depth: 0,
        statements,
        tokens: Vec::new(),
    };
    tokenizer.run()?;
    Ok(tokenizer.tokens)
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    statements: bool,
    tokens: Vec<Token>,
}

impl Tokenizer<'_> {
    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn push(&mut self, tok: Tok, start: usize) {
        self.tokens.push(Token {
            tok,
            span: span(start, self.pos - start),
        });
    }

    fn error(&self, message: impl Into<String>, start: usize) -> LexError {
        LexError {
            message: message.into(),
            span: span(start, (self.pos - start).max(1)),
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            let start = self.pos;
            match c {
                '\n' => {
                    self.bump();
                    let after_statement = self
                        .tokens
                        .last()
                        .is_some_and(|t| !matches!(t.tok, Tok::Newline | Tok::Op(Op::Semi)));
                    if self.statements && self.depth == 0 && after_statement {
                        self.push(Tok::Newline, start);
                    }
                }
                '\\' if self.peek_second() == Some('\n') => {
                    self.pos += 2;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '\'' | '"' => self.string(false)?,
                '0'..='9' => self.number()?,
                '.' if self.peek_second().is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.name()?,
                _ => self.operator()?,
            }
        }
        let end = self.src.len();
        self.tokens.push(Token {
            tok: Tok::End,
            span: span(end, 0),
        });
        Ok(())
    }

    fn operator(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let Some(&(spelling, op)) = OPERATORS.iter().find(|(s, _)| self.rest().starts_with(s)) else {
            self.bump();
            return Err(self.error(format!("unexpected character `{}`", &self.src[start..self.pos]), start));
        };
        self.pos += spelling.len();
        match op {
            Op::LParen | Op::LBracket | Op::LBrace => self.depth += 1,
            Op::RParen | Op::RBracket | Op::RBrace => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.push(Tok::Op(op), start);
        Ok(())
    }

    fn name(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let word = &self.src[start..self.pos];
        let prefix = matches!(word, "r" | "R" | "u" | "U");
        let raw = matches!(word, "r" | "R");
        // String prefixes: r'..', u'..'
        if prefix && matches!(self.peek(), Some('\'' | '"')) {
            self.string(raw)?;
            if let Some(last) = self.tokens.last_mut() {
                last.span = span(start, self.pos - start);
            }
            return Ok(());
        }
        let word = &self.src[start..self.pos];
        let tok = match Keyword::from_name(word) {
            Some(kw) => Tok::Keyword(kw),
            None => Tok::Name(word.to_string()),
        };
        self.push(tok, start);
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<(), LexError> {
        let start = self.pos;
        let Some(quote) = self.bump() else {
            return Err(self.error("expected a string", start));
        };
        let triple = self.rest().starts_with(&format!("{quote}{quote}"));
        if triple {
            self.pos += 2;
        }

        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string", start));
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.rest().starts_with(&format!("{quote}{quote}")) {
                    self.pos += 2;
                    break;
                }
                value.push(c);
            } else if c == '\n' && !triple {
                return Err(self.error("unterminated string", start));
            } else if c == '\\' {
                let escape_start = self.pos - 1;
                let Some(e) = self.bump() else {
                    return Err(self.error("unterminated string", start));
                };
                if raw {
                    value.push('\\');
                    value.push(e);
                    continue;
                }
                match e {
                    '\n' => {}
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    '\\' | '\'' | '"' => value.push(e),
                    'x' | 'u' => {
                        let digits = if e == 'x' { 2 } else { 4 };
                        let hex = self.rest().get(..digits).unwrap_or_default();
                        let decoded = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
                        match decoded {
                            Some(ch) if hex.len() == digits => {
                                self.pos += digits;
                                value.push(ch);
                            }
                            _ => return Err(self.error(format!("invalid \\{e} escape"), escape_start)),
                        }
                    }
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            } else {
                value.push(c);
            }
        }
        self.push(Tok::Str(value), start);
        Ok(())
    }

    fn digits(&mut self, radix: u32) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '_' {
                self.bump();
            } else if c.is_digit(radix) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    fn number(&mut self) -> Result<(), LexError> {
        let start = self.pos;

        if self.peek() == Some('0')
            && let Some(radix) = match self.peek_second() {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            }
        {
            self.pos += 2;
            let digits = self.digits(radix);
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.error("invalid integer literal", start))?;
            self.push(Tok::Int(value), start);
            return Ok(());
        }

        let mut text = self.digits(10);
        let mut float = false;
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            text.push('.');
            text.push_str(&self.digits(10));
            float = true;
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.bump();
            let mut exponent = String::from("e");
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.bump();
                exponent.push(sign);
            }
            let digits = self.digits(10);
            if digits.is_empty() {
                self.pos = mark;
            } else {
                text.push_str(&exponent);
                text.push_str(&digits);
                float = true;
            }
        }

        let tok = if float {
            Tok::Float(text.parse().map_err(|_| self.error("invalid float literal", start))?)
        } else {
            Tok::Int(text.parse().map_err(|_| self.error("integer literal too large", start))?)
        };
        self.push(tok, start);
        Ok(())
    }
}
