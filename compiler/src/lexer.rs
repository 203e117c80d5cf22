// Lexer for equation text (right-hand sides and conditions).
//
// Tokenizes the expression language used inside model documents. Uses the
// `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in equation text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Expression token types.
///
/// Names carry their full dotted text (`$up.x'`, `A.$live`); the resolver
/// splits them into path components later.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // ── Operators ──
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    // ── Punctuation ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("@")]
    At,

    // ── Literals ──
    /// Numeric literal (int, float, exponent). Sign is a separate token.
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_number)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    /// Variable or function name, possibly dotted and primed.
    #[regex(r"\$?[a-zA-Z_][a-zA-Z0-9_]*'*(\.\$?[a-zA-Z_][a-zA-Z0-9_]*'*)*", |lex| lex.slice().to_string())]
    Name(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Caret => write!(f, "^"),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::EqEq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::At => write!(f, "@"),
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Name(n) => write!(f, "{}", n),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex equation text into tokens.
///
/// Errors for unrecognised characters are collected and lexing continues.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span::new(range.start, range.end);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn operators() {
        let tokens = lex_ok("+ - * / % ^ < <= > >= == != && || !");
        assert_eq!(
            tokens,
            vec![
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::Caret,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::EqEq,
                Token::Ne,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn dotted_primed_names() {
        assert_eq!(
            lex_ok("$up.x' A.$live $t'"),
            vec![
                Token::Name("$up.x'".into()),
                Token::Name("A.$live".into()),
                Token::Name("$t'".into()),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex_ok("1 2.5 1e-3 .5"),
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(0.001),
                Token::Number(0.5),
            ]
        );
    }

    #[test]
    fn negative_is_two_tokens() {
        assert_eq!(lex_ok("-3"), vec![Token::Minus, Token::Number(3.0)]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex_ok(r#""out\"put.csv""#),
            vec![Token::Str("out\"put.csv".into())]
        );
    }

    #[test]
    fn condition_separator() {
        assert_eq!(
            lex_ok("1 @ $init"),
            vec![
                Token::Number(1.0),
                Token::At,
                Token::Name("$init".into())
            ]
        );
    }

    #[test]
    fn bad_character_is_reported() {
        let result = lex("x # y");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.errors[0].span, Span::new(2, 3));
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("ab + cd");
        assert_eq!(result.tokens[0].1, Span::new(0, 2));
        assert_eq!(result.tokens[2].1, Span::new(5, 7));
    }
}
