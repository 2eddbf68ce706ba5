//! Tokeniser for rate expressions.

use phylo_core::{Error, Real, Result};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Numeric literal.
    Num(Real),
    /// Identifier (parameter, state variable, definition, or function name).
    Ident(String),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `^`
    Caret,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `==`
    EqEq,
    /// `!=`
    Ne,
}

/// A token tagged with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedTok {
    /// The token.
    pub tok: Tok,
    /// Byte offset of the token's first character.
    pub pos: usize,
}

fn parse_err(position: usize, msg: impl Into<String>) -> Error {
    Error::Parse {
        position,
        msg: msg.into(),
    }
}

/// Tokenise `src` into a vector of spanned tokens.
pub fn tokenize(src: &str) -> Result<Vec<SpannedTok>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'+' => {
                out.push(SpannedTok { tok: Tok::Plus, pos: start });
                i += 1;
            }
            b'-' => {
                out.push(SpannedTok { tok: Tok::Minus, pos: start });
                i += 1;
            }
            b'*' => {
                out.push(SpannedTok { tok: Tok::Star, pos: start });
                i += 1;
            }
            b'/' => {
                out.push(SpannedTok { tok: Tok::Slash, pos: start });
                i += 1;
            }
            b'^' => {
                out.push(SpannedTok { tok: Tok::Caret, pos: start });
                i += 1;
            }
            b'(' => {
                out.push(SpannedTok { tok: Tok::LParen, pos: start });
                i += 1;
            }
            b')' => {
                out.push(SpannedTok { tok: Tok::RParen, pos: start });
                i += 1;
            }
            b',' => {
                out.push(SpannedTok { tok: Tok::Comma, pos: start });
                i += 1;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(SpannedTok { tok: Tok::Le, pos: start });
                    i += 2;
                } else {
                    out.push(SpannedTok { tok: Tok::Lt, pos: start });
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(SpannedTok { tok: Tok::Ge, pos: start });
                    i += 2;
                } else {
                    out.push(SpannedTok { tok: Tok::Gt, pos: start });
                    i += 1;
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(SpannedTok { tok: Tok::EqEq, pos: start });
                    i += 2;
                } else {
                    return Err(parse_err(start, "single `=` is not an operator"));
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(SpannedTok { tok: Tok::Ne, pos: start });
                    i += 2;
                } else {
                    return Err(parse_err(start, "expected `!=`"));
                }
            }
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b'.' {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &src[start..i];
                let value: Real = text
                    .parse()
                    .map_err(|_| parse_err(start, format!("invalid number `{text}`")))?;
                out.push(SpannedTok { tok: Tok::Num(value), pos: start });
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                out.push(SpannedTok {
                    tok: Tok::Ident(src[start..i].to_string()),
                    pos: start,
                });
            }
            _ => {
                return Err(parse_err(
                    start,
                    format!("unexpected character `{}`", &src[start..start + 1]),
                ));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("1 2.5 1e3 2.5e-2"), vec![
            Tok::Num(1.0),
            Tok::Num(2.5),
            Tok::Num(1000.0),
            Tok::Num(0.025),
        ]);
        // A trailing `e` is not an exponent: `2e` lexes as `2` then ident `e`.
        assert_eq!(toks("2e"), vec![Tok::Num(2.0), Tok::Ident("e".into())]);
    }

    #[test]
    fn operators() {
        assert_eq!(toks("<= >= == != < >"), vec![
            Tok::Le,
            Tok::Ge,
            Tok::EqEq,
            Tok::Ne,
            Tok::Lt,
            Tok::Gt,
        ]);
    }

    #[test]
    fn idents_keep_positions() {
        let spanned = tokenize("beta0 * I_a").unwrap();
        assert_eq!(spanned[0].pos, 0);
        assert_eq!(spanned[1].pos, 6);
        assert_eq!(spanned[2].tok, Tok::Ident("I_a".into()));
    }

    #[test]
    fn rejects_stray_equals() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a ! b").is_err());
        assert!(tokenize("a # b").is_err());
    }

    proptest::proptest! {
        #[test]
        fn never_panics(s in ".{0,64}") {
            let _ = tokenize(&s);
        }
    }
}
