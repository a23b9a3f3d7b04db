//! Source text to expressions.
//!
//! ```text
//! ; comments run to the end of the line
//! (defun scale ((x float)) (+ x 0.5))
//! (set big 1_000_000)
//! (print "tab\tseparated" 'sym true)
//! ```
//!
//! `true` and `false` read as booleans, `'x` reads as `(quote x)` and integer
//! literals may use `_` between digits. Each top-level form is returned with the
//! 1-based line it starts on.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending},
    combinator::{opt, recognize},
    error::ErrorKind,
    multi::many0,
    sequence::pair,
};

use crate::ast::{
    Expression, FloatType, IntType, SYMBOL_SPECIAL_CHARS, SourceForm, is_valid_symbol, sym, val,
};
use crate::{Error, MAX_PARSE_DEPTH};

type ParseErr<'a> = nom::Err<nom::error::Error<&'a str>>;

/// An unrecoverable error: stops `alt` from trying other branches
fn failure(input: &str, kind: ErrorKind) -> ParseErr<'_> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// 1-based line of the position where `rest` starts within `src`
fn line_of(src: &str, rest: &str) -> usize {
    let offset = src.len().saturating_sub(rest.len());
    src[..offset].matches('\n').count() + 1
}

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(src: &str, error: ParseErr<'_>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let line = line_of(src, e.input);
            match e.code {
                ErrorKind::TooLarge => format!(
                    "Expression too deeply nested (max depth: {MAX_PARSE_DEPTH}) at line {line}"
                ),
                ErrorKind::Digit => format!("Integer literal out of range at line {line}"),
                ErrorKind::Float => format!("Malformed number at line {line}"),
                ErrorKind::Escaped => format!("Invalid escape sequence at line {line}"),
                ErrorKind::Eof => format!("Unterminated string literal at line {line}"),
                ErrorKind::Char => format!("Unclosed list, expected ')' at line {line}"),
                _ if e.input.is_empty() => "Unexpected end of input".into(),
                _ => {
                    let near: String = e.input.chars().take(10).collect();
                    format!("Invalid syntax near '{near}' at line {line}")
                }
            }
        }
        nom::Err::Incomplete(_) => "Incomplete input".into(),
    }
}

/// Skip whitespace and `;` comments
fn skip_ws(input: &str) -> IResult<&str, ()> {
    let (input, _) = many0(alt((
        multispace1,
        recognize(pair(char(';'), not_line_ending)),
    )))
    .parse(input)?;
    Ok((input, ()))
}

/// Parse an integer or float literal
fn parse_number(input: &str) -> IResult<&str, Expression> {
    let (rest, text) = recognize((
        opt(char('-')),
        digit1,
        take_while(|c: char| c.is_ascii_digit() || c == '_' || c == '.'),
    ))
    .parse(input)?;

    // `12abc` is neither a number nor a symbol
    if rest.starts_with(is_symbol_char) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        )));
    }

    let digits: String = text.chars().filter(|&c| c != '_').collect();
    if text.contains('.') {
        if text.matches('.').count() > 1 || text.ends_with('.') {
            return Err(failure(input, ErrorKind::Float));
        }
        match digits.parse::<FloatType>() {
            Ok(x) => Ok((rest, val(x))),
            Err(_) => Err(failure(input, ErrorKind::Float)),
        }
    } else {
        match digits.parse::<IntType>() {
            Ok(n) => Ok((rest, val(n))),
            Err(_) => Err(failure(input, ErrorKind::Digit)),
        }
    }
}

/// Parse a symbol, or a boolean when the name is `true`/`false`
fn parse_symbol(input: &str) -> IResult<&str, Expression> {
    let (remaining, candidate) = take_while1(is_symbol_char).parse(input)?;

    if !is_valid_symbol(candidate) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Alpha,
        )));
    }

    let expr = match candidate {
        "true" => val(true),
        "false" => val(false),
        name => sym(name),
    };
    Ok((remaining, expr))
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Expression> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), val(text))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => return Err(failure(remaining, ErrorKind::Escaped)),
                    // Backslash at end of input
                    None => return Err(failure(input, ErrorKind::Eof)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            None => return Err(failure(input, ErrorKind::Eof)),
        }
    }
}

/// Parse a parenthesized list; elements may be separated by whitespace or comments
fn parse_list(input: &str, depth: usize) -> IResult<&str, Expression> {
    let (mut input, _) = char('(').parse(input)?;
    let mut elements = Vec::new();

    loop {
        let (rest, ()) = skip_ws(input)?;
        if let Some(rest) = rest.strip_prefix(')') {
            return Ok((rest, Expression::List(elements)));
        }
        if rest.is_empty() {
            return Err(failure(rest, ErrorKind::Char));
        }
        let (rest, element) = parse_sexpr(rest, depth + 1)?;
        elements.push(element);
        input = rest;
    }
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize) -> IResult<&str, Expression> {
    let (input, _) = char('\'').parse(input)?;
    let (input, ()) = skip_ws(input)?;
    let (input, expr) = parse_sexpr(input, depth + 1)?;
    Ok((input, val(vec![sym("quote"), expr])))
}

/// Parse one expression starting exactly at `input`
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Expression> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(failure(input, ErrorKind::TooLarge));
    }
    alt((
        |input| parse_quote(input, depth),
        |input| parse_list(input, depth),
        parse_number,
        parse_string,
        parse_symbol,
    ))
    .parse(input)
}

/// Read every top-level form in `src`
pub fn parse_program(src: &str) -> Result<Vec<SourceForm>, Error> {
    let to_error = |e| Error::ParseError(parse_error_to_message(src, e));
    let mut forms = Vec::new();
    let mut input = src;

    loop {
        let (rest, ()) = skip_ws(input).map_err(to_error)?;
        if rest.is_empty() {
            return Ok(forms);
        }
        let line = line_of(src, rest);
        if rest.starts_with(')') {
            return Err(Error::ParseError(format!("Unexpected ')' at line {line}")));
        }
        let (rest, expr) = parse_sexpr(rest, 0).map_err(to_error)?;
        forms.push(SourceForm::new(line, expr));
        input = rest;
    }
}

/// Read exactly one expression; anything after it is an error
pub fn parse_expression(src: &str) -> Result<Expression, Error> {
    let mut forms = parse_program(src)?;
    match forms.len() {
        1 => Ok(forms.remove(0).expr),
        0 => Err(Error::ParseError("Unexpected end of input".into())),
        n => Err(Error::ParseError(format!(
            "Unexpected remaining input: expected one expression, found {n}"
        ))),
    }
}
