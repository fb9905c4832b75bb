//! Bijective mapping between tokens and 8-bit ids.
//!
//! Bit layout of an [`EncodedId`]:
//!
//! ```text
//!   7   6               0
//! +---+-------------------+
//! | C |   symbol index    |
//! +---+-------------------+
//! ```
//!
//! `C` set means the id is a counter instance. Counter instances of one base
//! symbol get adjacent indices in ascending counter order (`S1`, `S2`, `S3`),
//! so "decrement the counter" is `id - 1`.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{EngineError, IdSpace};
use crate::token::{Token, TokenSet, COUNTER_FLOOR};

/// Number of addressable ids; also the length of every id-indexed table.
pub const RULE_SLOTS: usize = 255;

pub const MAX_PLAIN_SYMBOLS: usize = 128;
/// `0xFF` would index past the end of a [`RULE_SLOTS`] table.
pub const MAX_COUNTER_INSTANCES: usize = RULE_SLOTS - MAX_PLAIN_SYMBOLS;

const COUNTER_BIT: u8 = 0x80;
const INDEX_MASK: u8 = 0x7F;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EncodedId(u8);

impl EncodedId {
    #[inline(always)]
    pub const fn new(index: u8, counter: bool) -> Self {
        let flag = if counter { COUNTER_BIT } else { 0 };
        EncodedId(flag | (index & INDEX_MASK))
    }

    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Self {
        EncodedId(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn index(self) -> u8 {
        self.0 & INDEX_MASK
    }

    #[inline(always)]
    pub const fn has_counter(self) -> bool {
        self.0 & COUNTER_BIT != 0
    }

    /// Position in a [`RULE_SLOTS`]-sized table.
    #[inline(always)]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }

    /// Id of the next lower counter value. Only valid above the floor.
    #[inline(always)]
    const fn decremented(self) -> Self {
        EncodedId(self.0 - 1)
    }
}

/// Id tables produced by [`SymbolTable::assign`].
#[derive(Debug, Clone)]
pub struct SymbolTable {
    ids: HashMap<Token, EncodedId>,
    reverse: Box<[Option<Token>; RULE_SLOTS]>,
    /// Counter value of each counter index; 0 where unassigned.
    counter_values: [u8; MAX_PLAIN_SYMBOLS],
    ceilings: BTreeMap<Token, u8>,
    plain_count: usize,
    counter_count: usize,
}

impl SymbolTable {
    /// Assigns ids to plain variables, then constants, then one contiguous
    /// run per counter base covering values `1..=ceiling`.
    pub fn assign(variables: &TokenSet, constants: &TokenSet) -> Result<Self, EngineError> {
        let mut ceilings: BTreeMap<Token, u8> = BTreeMap::new();
        let mut plain: Vec<&Token> = Vec::new();

        for t in variables {
            match t.counter() {
                Some((base, value)) => {
                    let ceiling = ceilings.entry(Token::from(base)).or_insert(value);
                    *ceiling = (*ceiling).max(value);
                }
                None => plain.push(t),
            }
        }
        for t in constants {
            if !variables.contains(t) {
                plain.push(t);
            }
        }

        if plain.len() > MAX_PLAIN_SYMBOLS {
            return Err(EngineError::CapacityExceeded {
                space: IdSpace::Plain,
                required: plain.len(),
                limit: MAX_PLAIN_SYMBOLS,
            });
        }
        let counter_count: usize = ceilings.values().map(|&c| c as usize).sum();
        if counter_count > MAX_COUNTER_INSTANCES {
            return Err(EngineError::CapacityExceeded {
                space: IdSpace::Counter,
                required: counter_count,
                limit: MAX_COUNTER_INSTANCES,
            });
        }

        let mut table = SymbolTable {
            ids: HashMap::with_capacity(plain.len() + counter_count),
            reverse: Box::new(std::array::from_fn(|_| None)),
            counter_values: [0; MAX_PLAIN_SYMBOLS],
            ceilings: BTreeMap::new(),
            plain_count: plain.len(),
            counter_count,
        };

        for (i, t) in plain.into_iter().enumerate() {
            table.bind(t.clone(), EncodedId::new(i as u8, false));
        }

        let mut next = 0u8;
        for (base, &ceiling) in &ceilings {
            for value in COUNTER_FLOOR..=ceiling {
                let id = EncodedId::new(next, true);
                table.bind(Token::counter_instance(base.as_str(), value), id);
                table.counter_values[next as usize] = value;
                next += 1;
            }
        }
        table.ceilings = ceilings;

        debug!(
            plain = table.plain_count,
            counters = table.counter_count,
            bases = table.ceilings.len(),
            "assigned token ids"
        );
        Ok(table)
    }

    fn bind(&mut self, token: Token, id: EncodedId) {
        self.reverse[id.slot()] = Some(token.clone());
        self.ids.insert(token, id);
    }

    pub fn id(&self, token: &str) -> Option<EncodedId> {
        self.ids.get(token).copied()
    }

    /// Exact reverse lookup, no fallback.
    pub fn token(&self, id: EncodedId) -> Option<&Token> {
        self.reverse.get(id.slot())?.as_ref()
    }

    /// Reverse lookup that falls back to the plain entry sharing the id's
    /// index when a counter id has no entry of its own.
    pub fn decode_id(&self, id: EncodedId) -> Option<&Token> {
        self.token(id).or_else(|| {
            if id.has_counter() {
                self.token(EncodedId::new(id.index(), false))
            } else {
                None
            }
        })
    }

    pub fn encode<T: AsRef<str>>(&self, tokens: &[T]) -> Result<Vec<EncodedId>, EngineError> {
        tokens
            .iter()
            .map(|t| {
                let t = t.as_ref();
                self.id(t).ok_or_else(|| EngineError::UnknownToken(t.to_string()))
            })
            .collect()
    }

    pub fn decode<'a>(&'a self, ids: &[EncodedId]) -> Vec<&'a str> {
        ids.iter()
            .map(|&id| self.decode_id(id).map(Token::as_str).unwrap_or(""))
            .collect()
    }

    /// Counter value carried by `id`, if it is a counter instance.
    pub fn counter_value(&self, id: EncodedId) -> Option<u8> {
        if !id.has_counter() {
            return None;
        }
        match self.counter_values[id.index() as usize] {
            0 => None,
            v => Some(v),
        }
    }

    /// Highest counter value seen for `base`.
    pub fn ceiling(&self, base: &str) -> Option<u8> {
        self.ceilings.get(base).copied()
    }

    pub fn ceilings(&self) -> impl Iterator<Item = (&Token, u8)> {
        self.ceilings.iter().map(|(t, &c)| (t, c))
    }

    /// Id whose rule applies to `id` this generation: counters above the
    /// floor step down one value, everything else is used as is.
    #[inline(always)]
    pub fn rewrite_id(&self, id: EncodedId) -> EncodedId {
        if id.has_counter() && self.counter_values[id.index() as usize] > COUNTER_FLOOR {
            id.decremented()
        } else {
            id
        }
    }

    pub fn len(&self) -> usize {
        self.plain_count + self.counter_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tokens: &[&str]) -> TokenSet {
        tokens.iter().map(|&t| Token::from(t)).collect()
    }

    fn numbered(prefix: &str, n: usize) -> TokenSet {
        (0..n).map(|i| Token::new(format!("{prefix}{i}_"))).collect()
    }

    #[test]
    fn bit_layout() {
        let id = EncodedId::new(5, true);
        assert_eq!(id.raw(), 0x85);
        assert_eq!(id.index(), 5);
        assert!(id.has_counter());

        let id = EncodedId::new(127, false);
        assert_eq!(id.raw(), 0x7F);
        assert!(!id.has_counter());
    }

    #[test]
    fn plain_ids_are_contiguous_from_zero() {
        let table = SymbolTable::assign(&set(&["A", "B"]), &set(&["u", "["])).unwrap();
        let mut raws: Vec<u8> = ["A", "B", "[", "u"]
            .iter()
            .map(|t| table.id(t).unwrap().raw())
            .collect();
        raws.sort();
        assert_eq!(raws, vec![0, 1, 2, 3]);
    }

    #[test]
    fn counter_ids_descend_by_one() {
        let table = SymbolTable::assign(&set(&["S3", "S1", "T2", "A"]), &set(&[])).unwrap();
        assert_eq!(table.ceiling("S"), Some(3));
        assert_eq!(table.ceiling("T"), Some(2));

        let s3 = table.id("S3").unwrap();
        let s2 = table.id("S2").unwrap();
        let s1 = table.id("S1").unwrap();
        assert!(s3.has_counter());
        assert_eq!(s3.raw() - 1, s2.raw());
        assert_eq!(s2.raw() - 1, s1.raw());

        assert_eq!(table.rewrite_id(s3), s2);
        assert_eq!(table.rewrite_id(s2), s1);
        assert_eq!(table.rewrite_id(s1), s1);
        assert_eq!(table.counter_value(s3), Some(3));
    }

    #[test]
    fn intermediate_counter_values_are_interned() {
        let table = SymbolTable::assign(&set(&["C6"]), &set(&[])).unwrap();
        for v in 1..=6 {
            assert!(table.id(&format!("C{v}")).is_some(), "C{v} missing");
        }
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn decode_inverts_encode() {
        let vars = set(&["Seed", "L", "S3", "S1", "X"]);
        let consts = set(&["u", "[", "]"]);
        let table = SymbolTable::assign(&vars, &consts).unwrap();
        let tokens: Vec<Token> = vars.iter().chain(consts.iter()).cloned().collect();
        let ids = table.encode(&tokens).unwrap();
        let decoded = table.decode(&ids);
        let expected: Vec<&str> = tokens.iter().map(Token::as_str).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn decode_falls_back_to_plain_entry() {
        let table = SymbolTable::assign(&set(&["A", "B", "C", "D", "E", "F", "S2"]), &set(&[])).unwrap();
        assert_eq!(table.id("F").unwrap(), EncodedId::new(5, false));

        let orphan = EncodedId::new(5, true);
        assert!(table.token(orphan).is_none());
        assert_eq!(table.decode_id(orphan).map(Token::as_str), Some("F"));

        let unassigned = EncodedId::new(100, true);
        assert!(table.decode_id(unassigned).is_none());
        assert_eq!(table.decode(&[unassigned]), vec![""]);
    }

    #[test]
    fn encode_rejects_unknown_tokens() {
        let table = SymbolTable::assign(&set(&["A"]), &set(&[])).unwrap();
        let err = table.encode(&[Token::from("B")]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownToken(t) if t == "B"));
    }

    #[test]
    fn full_id_space_fits() {
        let consts = numbered("c", MAX_PLAIN_SYMBOLS);
        let vars = set(&["S127"]);
        let table = SymbolTable::assign(&vars, &consts).unwrap();
        assert_eq!(table.len(), RULE_SLOTS);
        assert_eq!(table.id("S127").unwrap().raw(), 0xFE);
    }

    #[test]
    fn too_many_plain_symbols_fail() {
        let consts = numbered("c", 300);
        let err = SymbolTable::assign(&TokenSet::new(), &consts).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded { space: IdSpace::Plain, required: 300, limit: 128 }
        ));
    }

    #[test]
    fn too_many_counter_instances_fail() {
        let vars = set(&["S100", "T28"]);
        let err = SymbolTable::assign(&vars, &TokenSet::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded { space: IdSpace::Counter, required: 128, limit: 127 }
        ));
    }
}
