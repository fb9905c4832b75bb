//! Symbol identity: what a token is and how it is classified.
//!
//! A *variable* starts with an ASCII capital and does not end in
//! [`NON_REWRITE_SUFFIX`]; everything else is a *constant*. A variable whose
//! name ends in a canonical decimal number (`S3`, `Branch12`) is a counter
//! instance of its base symbol (`S`, `Branch`).

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Marks a capitalised symbol as non-rewritable (`L_`).
pub const NON_REWRITE_SUFFIX: char = '_';

/// Counter value at which decrementing stops.
pub const COUNTER_FLOOR: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(Box<str>);

/// Ordered so that id assignment is deterministic.
pub type TokenSet = BTreeSet<Token>;

impl Token {
    pub fn new(symbol: impl Into<Box<str>>) -> Self {
        Token(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_variable(&self) -> bool {
        is_variable(&self.0)
    }

    /// Splits a counter instance into `(base, value)`.
    ///
    /// Only variables carry counters. The suffix must be `1..=255` without a
    /// leading zero so that the name round-trips through `format!("{base}{value}")`.
    pub fn counter(&self) -> Option<(&str, u8)> {
        if !self.is_variable() {
            return None;
        }
        split_counter(&self.0)
    }

    /// Canonical name of the counter instance `value` of `base`.
    pub fn counter_instance(base: &str, value: u8) -> Token {
        Token::new(format!("{base}{value}"))
    }
}

pub fn is_variable(symbol: &str) -> bool {
    let Some(first) = symbol.chars().next() else {
        return false;
    };
    first.is_ascii_uppercase() && !symbol.ends_with(NON_REWRITE_SUFFIX)
}

fn split_counter(symbol: &str) -> Option<(&str, u8)> {
    let base = symbol.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &symbol[base.len()..];
    if base.is_empty() || digits.is_empty() || digits.starts_with('0') {
        return None;
    }
    let value: u8 = digits.parse().ok()?;
    (value >= COUNTER_FLOOR).then_some((base, value))
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::new(s)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::new(s)
    }
}
