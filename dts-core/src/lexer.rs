//! DTS tokenizer.
//!
//! Splits source text into a flat token stream. Whitespace and comments are
//! dropped; every token remembers the line and column where it starts.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace1, not_line_ending, one_of, satisfy},
    combinator::{map, recognize},
    multi::many0,
    sequence::{pair, preceded, tuple},
    InputTake,
};
use nom_locate::LocatedSpan;

use crate::error::{Error, Location, Result};
use crate::node::is_property_name_char;

pub(crate) type Span<'a> = LocatedSpan<&'a str>;

type IResult<'a, T> = nom::IResult<Span<'a>, T>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// The `/dts-v1/` keyword.
    Version,
    /// The `/memreserve/` keyword.
    MemReserve,
    /// A run of name characters: node and property names, labels, unit
    /// addresses and numbers all lex to words.
    Word(String),
    /// A string literal with escapes resolved.
    Str(String),
    /// A `&label` reference. Only label characters are taken, so a
    /// following comma stays a separate token.
    Ref(String),
    /// A single punctuation character.
    Punct(char),
    /// End of input.
    Eof,
}

impl Token {
    /// A short description used in error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Version => "`/dts-v1/`".into(),
            Token::MemReserve => "`/memreserve/`".into(),
            Token::Word(w) => format!("`{w}`"),
            Token::Str(_) => "string literal".into(),
            Token::Ref(label) => format!("`&{label}`"),
            Token::Punct(c) => format!("`{c}`"),
            Token::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) location: Location,
}

/// Tokenize a DTS source. The returned stream always ends with [`Token::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut input = Span::new(source);

    loop {
        // `ws` cannot fail: it accepts zero repetitions.
        if let Ok((rest, _)) = ws(input) {
            input = rest;
        }
        let location = location_of(&input);

        if input.fragment().is_empty() {
            tokens.push(Spanned {
                token: Token::Eof,
                location,
            });
            return Ok(tokens);
        }

        // A comment opener left over by `ws` was never closed.
        let parsed = if input.fragment().starts_with("/*") {
            None
        } else {
            token(input).ok()
        };

        match parsed {
            Some((rest, token)) => {
                tokens.push(Spanned { token, location });
                input = rest;
            }
            None => {
                return Err(Error::InvalidToken {
                    message: lex_failure(input.fragment()),
                    location,
                })
            }
        }
    }
}

fn location_of(span: &Span<'_>) -> Location {
    Location::new(span.location_line(), span.get_utf8_column())
}

fn lex_failure(rest: &str) -> String {
    if rest.starts_with("/*") {
        "unterminated block comment".into()
    } else if rest.starts_with('"') {
        "unterminated string literal".into()
    } else {
        let c = rest.chars().next().unwrap_or_default();
        format!("unexpected character `{}`", c.escape_default())
    }
}

/// Parse a single token. Ordering is important here: keywords must be tried
/// before the bare `/` punctuation, and references before a bare `&`.
fn token(input: Span<'_>) -> IResult<'_, Token> {
    alt((
        map(dts_v1_keyword, |_| Token::Version),
        map(memreserve_keyword, |_| Token::MemReserve),
        map(string_literal, Token::Str),
        map(word, |w: Span<'_>| Token::Word((*w.fragment()).to_owned())),
        map(reference, |r: Span<'_>| Token::Ref((*r.fragment()).to_owned())),
        map(one_of("<>[]{};,&:@=/"), Token::Punct),
    ))(input)
}

/// Recognize the `/dts-v1/` keyword.
fn dts_v1_keyword(input: Span<'_>) -> IResult<'_, Span<'_>> {
    tag("/dts-v1/")(input)
}

/// Recognize the `/memreserve/` keyword.
fn memreserve_keyword(input: Span<'_>) -> IResult<'_, Span<'_>> {
    tag("/memreserve/")(input)
}

/// Recognize a word: a name, a label, a unit address or a number.
///
/// Commas are name characters (`sony,imx219`) but a word never starts with
/// one, so value separators lex as punctuation.
fn word(input: Span<'_>) -> IResult<'_, Span<'_>> {
    recognize(pair(
        satisfy(|c| c != ',' && is_property_name_char(c)),
        take_while(is_property_name_char),
    ))(input)
}

/// Recognize `&label`, returning the label.
fn reference(input: Span<'_>) -> IResult<'_, Span<'_>> {
    preceded(
        char('&'),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    )(input)
}

/// Parse a string literal, resolving escape sequences.
///
/// Supported escapes are `\"`, `\\`, `\n`, `\t`, `\r` and `\xHH`; any other
/// escaped character stands for itself.
fn string_literal(input: Span<'_>) -> IResult<'_, String> {
    let (body, _) = char('"')(input)?;
    let mut value = String::new();
    let mut chars = body.fragment().char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => {
                let (rest, _) = body.take_split(idx + 1);
                return Ok((rest, value));
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, 'x')) => {
                    let mut code = 0u32;
                    let mut digits = 0;
                    while digits < 2 {
                        match chars.peek().and_then(|&(_, d)| d.to_digit(16)) {
                            Some(d) => {
                                code = code * 16 + d;
                                digits += 1;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    if digits == 0 {
                        value.push('x');
                    } else {
                        value.extend(char::from_u32(code));
                    }
                }
                Some((_, other)) => value.push(other),
                None => break,
            },
            c => value.push(c),
        }
    }

    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/* === Whitespace and comments === */

/// Consume zero or more whitespace characters or comments.
fn ws(input: Span<'_>) -> IResult<'_, Span<'_>> {
    recognize(many0(alt((multispace1, line_comment, block_comment))))(input)
}

/// Parse a block comment. Block comments do not nest.
fn block_comment(input: Span<'_>) -> IResult<'_, Span<'_>> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Parse a single line comment.
///
/// The parser stops just before the newline character but doesn't consume the newline.
fn line_comment(input: Span<'_>) -> IResult<'_, Span<'_>> {
    recognize(pair(tag("//"), not_line_ending))(input)
}
