//! Arguments of interpolation tags: `{{ truncate name count=10 ellipsis="..." }}`.
//!
//! Tokens are cut out of the tag with a regex built from the live close
//! delimiter and then classified by the pest grammar in `args.pest`.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use regex::Regex;

use crate::ast::{Argument, Fetch, HashArgs, HashValue};
use crate::cursor::Cursor;
use crate::error::SyntaxError;

/// Scan attempts allowed per tag, closing delimiter included.
pub const MAX_ARGUMENT_SCANS: usize = 31;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A\s+").expect("valid regex"));

#[derive(Parser)]
#[grammar = "src/args.pest"]
struct ArgumentGrammar;

/// A classified argument token.
#[derive(Debug, Clone, PartialEq)]
enum ArgToken<'a> {
    Positional(Argument<'a>),
    Pair(&'a str, HashValue<'a>),
}

/// Regex matching one argument token that stops at any character of `close`.
pub(crate) fn token_pattern(close: &str) -> Result<Regex, regex::Error> {
    let stop: String = close
        .chars()
        .map(|c| regex::escape(c.encode_utf8(&mut [0; 4])))
        .collect();
    let bare = format!(r#"[^\s"'={stop}]+"#);
    Regex::new(&format!(
        r#"\A(?:{bare}=)?(?:"[^"]*"|'[^']*'|{bare})"#
    ))
}

/// Read arguments up to and including `close`.
///
/// Key/value arguments are gathered into one trailing [`Argument::Hash`].
pub(crate) fn scan_arguments<'a>(
    cursor: &mut Cursor<'a>,
    close: &str,
    token: &Regex,
) -> Result<Vec<Argument<'a>>, SyntaxError> {
    let mut args = Vec::new();
    let mut hash = HashArgs::default();

    for _ in 0..MAX_ARGUMENT_SCANS {
        cursor.skip(&WHITESPACE);
        if cursor.skip_str(close) {
            if !hash.is_empty() {
                args.push(Argument::Hash(hash));
            }
            return Ok(args);
        }

        let start = cursor.pos();
        let classified = cursor.scan(token).and_then(classify);
        match classified {
            Some(ArgToken::Positional(arg)) => args.push(arg),
            Some(ArgToken::Pair(key, value)) => hash.0.push((Cow::Borrowed(key), value)),
            None => {
                cursor.reset(start);
                break;
            }
        }
    }

    Err(SyntaxError::at(cursor.source(), cursor.pos(), "Unclosed tag"))
}

fn classify(token: &str) -> Option<ArgToken<'_>> {
    let argument = ArgumentGrammar::parse(Rule::argument, token).ok()?.next()?;
    let inner = argument.into_inner().next()?;

    match inner.as_rule() {
        Rule::pair => {
            let mut parts = inner.into_inner();
            let key = parts.next()?.as_str();
            let value = parts.next()?;
            let value = match value.as_rule() {
                Rule::double_quoted | Rule::single_quoted => {
                    HashValue::Static(Cow::Borrowed(unquote(value)))
                }
                Rule::numeric => HashValue::Number(Cow::Borrowed(value.as_str())),
                Rule::path => HashValue::Fetch(Fetch::from_path(value.as_str())),
                _ => return None,
            };
            Some(ArgToken::Pair(key, value))
        }
        Rule::double_quoted | Rule::single_quoted => Some(ArgToken::Positional(
            Argument::Static(Cow::Borrowed(unquote(inner))),
        )),
        Rule::numeral => Some(ArgToken::Positional(Argument::Number(Cow::Borrowed(
            inner.as_str(),
        )))),
        Rule::path => Some(ArgToken::Positional(Argument::Fetch(Fetch::from_path(
            inner.as_str(),
        )))),
        _ => None,
    }
}

fn unquote<'a>(quoted: Pair<'a, Rule>) -> &'a str {
    quoted
        .into_inner()
        .next()
        .map(|inner| inner.as_str())
        .unwrap_or("")
}
