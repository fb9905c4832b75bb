//! Rule DSL.
//!
//! A rule body is a `;`-separated list of alternatives, each made of
//! whitespace-separated fields:
//!
//! ```text
//! <probability> [*<catalyst>] <successor-token>...
//! ```
//!
//! Alternatives whose probability is not a finite non-negative number are
//! skipped without error.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

use crate::rule::{Alternative, ProductionRule};
use crate::token::{Token, TokenSet};

const ALTERNATIVE_PAT: &str = r"^\s*(?P<p>\S+)(?:\s+\*(?P<catalyst>\S+))?(?P<successor>(?:\s+\S+)*)\s*$";

fn alternative_regex() -> &'static fancy_regex::Regex {
    static RE: OnceLock<fancy_regex::Regex> = OnceLock::new();
    RE.get_or_init(|| fancy_regex::Regex::new(ALTERNATIVE_PAT).expect("invalid alternative regex"))
}

fn normalize(text: &str) -> String {
    text.nfc().filter(|&c| c != '\n' && c != '\r').collect()
}

fn parse_alternative(group: &str) -> Option<Alternative> {
    let caps = alternative_regex().captures(group).ok()??;
    let probability: f64 = caps.name("p")?.as_str().parse().ok()?;
    if !probability.is_finite() || probability < 0.0 {
        return None;
    }
    let successor = caps
        .name("successor")
        .map(|m| symbols_to_tokens(m.as_str()))
        .unwrap_or_default();
    Some(Alternative {
        probability,
        catalyst: caps.name("catalyst").map(|m| Token::from(m.as_str())),
        successor,
    })
}

/// Parses one rule body into its alternatives, in order.
pub fn parse_rule(body: &str) -> Vec<Alternative> {
    normalize(body)
        .split(';')
        .filter(|group| !group.trim().is_empty())
        .filter_map(parse_alternative)
        .collect()
}

/// Parses a whitespace-separated token sequence.
pub fn parse_state(state: &str) -> Vec<Token> {
    symbols_to_tokens(&normalize(state))
}

fn symbols_to_tokens(text: &str) -> Vec<Token> {
    text.split_whitespace().map(Token::from).collect()
}

/// Rules plus the variable and constant sets they imply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRules {
    pub variables: TokenSet,
    pub constants: TokenSet,
    pub rules: Vec<ProductionRule>,
}

impl ParsedRules {
    fn classify(&mut self, t: &Token) {
        if t.is_variable() {
            self.variables.insert(t.clone());
        } else {
            self.constants.insert(t.clone());
        }
    }
}

/// Parses a predecessor → body map and classifies every token it mentions.
pub fn parse_rules<K, V>(bodies: &BTreeMap<K, V>) -> ParsedRules
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut parsed = ParsedRules::default();
    for (key, body) in bodies {
        let predecessor = Token::from(normalize(key.as_ref()).trim());
        let rule = ProductionRule::new(predecessor, parse_rule(body.as_ref()));
        for t in rule.tokens() {
            parsed.classify(t);
        }
        parsed.rules.push(rule);
    }
    parsed
}
