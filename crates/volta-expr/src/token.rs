//! Expression tokenizer.

use crate::error::{ParseError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

/// A token plus its byte offset in the source, for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Tokenize an expression. The display forms `×` and `÷` are accepted
/// as synonyms for `*` and `/`.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
            }
            '+' => {
                tokens.push(Spanned { token: Token::Plus, offset });
                i += 1;
            }
            '-' | '−' => {
                tokens.push(Spanned { token: Token::Minus, offset });
                i += 1;
            }
            '*' | '×' => {
                tokens.push(Spanned { token: Token::Star, offset });
                i += 1;
            }
            '/' | '÷' => {
                tokens.push(Spanned { token: Token::Slash, offset });
                i += 1;
            }
            '^' => {
                tokens.push(Spanned { token: Token::Caret, offset });
                i += 1;
            }
            '(' => {
                tokens.push(Spanned { token: Token::LParen, offset });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, offset });
                i += 1;
            }
            ',' => {
                tokens.push(Spanned { token: Token::Comma, offset });
                i += 1;
            }
            '0'..='9' | '.' => {
                while i < chars.len() && matches!(chars[i].1, '0'..='9' | '.') {
                    i += 1;
                }
                // Exponent suffix: 1e-3, 2.5E6
                if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].1.is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].1.is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let end = if i < chars.len() { chars[i].0 } else { input.len() };
                let text = &input[offset..end];
                let value: f64 = text
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber(offset))?;
                tokens.push(Spanned { token: Token::Number(value), offset });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start_off = offset;
                while i < chars.len()
                    && (chars[i].1.is_alphanumeric() || chars[i].1 == '_')
                {
                    i += 1;
                }
                let end = if i < chars.len() { chars[i].0 } else { input.len() };
                tokens.push(Spanned {
                    token: Token::Ident(input[start_off..end].to_string()),
                    offset: start_off,
                });
            }
            other => return Err(ParseError::UnexpectedChar(other, offset)),
        }
    }

    Ok(tokens)
}
