//! Tokenizer for policy expressions.

use crate::error::{PolicyError, PolicyResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    In,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Eof,
}

/// A token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(src: &str) -> PolicyResult<Vec<Spanned>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let two = bytes.get(i + 1).copied();

        let token = match c {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b'.' if !two.is_some_and(|n| n.is_ascii_digit()) => Token::Dot,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'&' if two == Some(b'&') => {
                i += 1;
                Token::AndAnd
            }
            b'|' if two == Some(b'|') => {
                i += 1;
                Token::OrOr
            }
            b'=' if two == Some(b'=') => {
                i += 1;
                Token::EqEq
            }
            b'!' if two == Some(b'=') => {
                i += 1;
                Token::NotEq
            }
            b'!' => Token::Bang,
            b'<' if two == Some(b'=') => {
                i += 1;
                Token::Le
            }
            b'<' => Token::Lt,
            b'>' if two == Some(b'=') => {
                i += 1;
                Token::Ge
            }
            b'>' => Token::Gt,
            b'"' | b'\'' => {
                let (s, end) = lex_string(src, i)?;
                out.push(Spanned {
                    token: Token::Str(s),
                    pos: start,
                });
                i = end;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                let mut end = i;
                while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
                    end += 1;
                }
                let text = &src[i..end];
                let n: f64 = text.parse().map_err(|_| PolicyError::Lex {
                    pos: start,
                    message: format!("invalid number `{text}`"),
                })?;
                out.push(Spanned {
                    token: Token::Number(n),
                    pos: start,
                });
                i = end;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut end = i;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                let word = &src[i..end];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    _ => Token::Ident(word.to_string()),
                };
                out.push(Spanned { token, pos: start });
                i = end;
                continue;
            }
            other => {
                return Err(PolicyError::Lex {
                    pos: start,
                    message: format!("unexpected character `{}`", other as char),
                });
            }
        };
        out.push(Spanned { token, pos: start });
        i += 1;
    }

    out.push(Spanned {
        token: Token::Eof,
        pos: src.len(),
    });
    Ok(out)
}

/// Lex a quoted string starting at `start`; returns the value and the
/// offset just past the closing quote.
fn lex_string(src: &str, start: usize) -> PolicyResult<(String, usize)> {
    let quote = src.as_bytes()[start] as char;
    let mut value = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((off, ch)) = chars.next() {
        match ch {
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, '\\')) => '\\',
                    Some((_, '"')) => '"',
                    Some((_, '\'')) => '\'',
                    Some((_, other)) => {
                        return Err(PolicyError::Lex {
                            pos: start + 1 + off,
                            message: format!("unknown escape `\\{other}`"),
                        });
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c if c == quote => return Ok((value, start + 1 + off + 1)),
            c => value.push(c),
        }
    }

    Err(PolicyError::Lex {
        pos: start,
        message: "unterminated string".to_string(),
    })
}
