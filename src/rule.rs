//! Weighted production rules, in source form and compiled into id space.
//!
//! A [`CompiledRule`] stores every alternative as a half-open interval
//! `[lower, upper)` over the rule's total weight, laid out in declaration
//! order. Selection is a binary search over those intervals. An optional
//! pre-sample cache holds [`PRESAMPLE_SIZE`] outcomes drawn up front so the
//! hot path becomes a cursor increment instead of a draw plus a search.

use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::encoding::{EncodedId, SymbolTable, RULE_SLOTS};
use crate::error::EngineError;
use crate::token::Token;

/// Outcomes held by a pre-sample cache. A `u8` cursor wraps at exactly this size.
pub const PRESAMPLE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub probability: f64,
    /// Required immediately-preceding token.
    pub catalyst: Option<Token>,
    pub successor: Vec<Token>,
}

impl Alternative {
    pub fn new(probability: f64, successor: Vec<Token>) -> Self {
        Alternative { probability, catalyst: None, successor }
    }

    pub fn with_catalyst(mut self, catalyst: impl Into<Token>) -> Self {
        self.catalyst = Some(catalyst.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductionRule {
    pub predecessor: Token,
    pub alternatives: Vec<Alternative>,
}

impl ProductionRule {
    pub fn new(predecessor: impl Into<Token>, alternatives: Vec<Alternative>) -> Self {
        ProductionRule { predecessor: predecessor.into(), alternatives }
    }

    /// Every token the rule mentions: predecessor, catalysts and successors.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        std::iter::once(&self.predecessor).chain(self.alternatives.iter().flat_map(|alt| {
            alt.catalyst.iter().chain(alt.successor.iter())
        }))
    }

    /// Encodes the rule into id space. Alternatives keep declaration order.
    pub fn compile(&self, symbols: &SymbolTable) -> Result<CompiledRule, EngineError> {
        let encode = |t: &Token| {
            symbols
                .id(t.as_str())
                .ok_or_else(|| EngineError::UnknownToken(t.to_string()))
        };

        let mut alternatives = Vec::with_capacity(self.alternatives.len());
        for alt in &self.alternatives {
            let catalyst = alt.catalyst.as_ref().map(encode).transpose()?;
            let successor = alt.successor.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
            alternatives.push(CompiledAlternative {
                lower: 0.0,
                upper: 0.0,
                catalyst,
                successor: successor.into_boxed_slice(),
            });
        }

        let weights: Vec<f64> = self.alternatives.iter().map(|a| a.probability).collect();
        let mut rule = CompiledRule { alternatives, total: 0.0, presample: None };
        rule.set_intervals(&weights);
        Ok(rule)
    }
}

impl fmt::Display for ProductionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\": `", self.predecessor)?;
        for (i, alt) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{:.2}", alt.probability)?;
            if let Some(c) = &alt.catalyst {
                write!(f, " *{c}")?;
            }
            for t in &alt.successor {
                write!(f, " {t}")?;
            }
        }
        f.write_str("`")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAlternative {
    pub lower: f64,
    pub upper: f64,
    pub catalyst: Option<EncodedId>,
    pub successor: Box<[EncodedId]>,
}

impl CompiledAlternative {
    pub fn weight(&self) -> f64 {
        self.upper - self.lower
    }

    /// Whether the alternative may fire after `previous`. Alternatives
    /// without a catalyst always may; a catalyst never matches when there
    /// is no left neighbour.
    #[inline(always)]
    pub fn accepts(&self, previous: Option<EncodedId>) -> bool {
        match self.catalyst {
            None => true,
            Some(c) => previous == Some(c),
        }
    }
}

/// A rule in id space. The default value has no alternatives and rewrites
/// its token to itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledRule {
    alternatives: Vec<CompiledAlternative>,
    total: f64,
    presample: Option<Box<[u32; PRESAMPLE_SIZE]>>,
}

impl CompiledRule {
    pub fn alternatives(&self) -> &[CompiledAlternative] {
        &self.alternatives
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    #[inline(always)]
    pub fn is_passthrough(&self) -> bool {
        self.alternatives.is_empty()
    }

    pub fn is_presampled(&self) -> bool {
        self.presample.is_some()
    }

    /// Current weight of each alternative, in declaration order.
    pub fn weights(&self) -> Vec<f64> {
        self.alternatives.iter().map(CompiledAlternative::weight).collect()
    }

    /// Lays out contiguous intervals. Negative and non-finite weights count as zero.
    fn set_intervals(&mut self, weights: &[f64]) {
        let mut acc = 0.0;
        for (alt, &w) in self.alternatives.iter_mut().zip(weights) {
            let w = if w.is_finite() && w > 0.0 { w } else { 0.0 };
            alt.lower = acc;
            acc += w;
            alt.upper = acc;
        }
        self.total = acc;
    }

    /// Index of the alternative whose interval contains `draw`.
    #[inline]
    pub fn locate(&self, draw: f64) -> Option<usize> {
        let i = self.alternatives.partition_point(|alt| alt.upper <= draw);
        let alt = self.alternatives.get(i)?;
        (alt.lower <= draw && draw < alt.upper).then_some(i)
    }

    /// Binary search for `draw` in `[0, total)`. A draw outside every
    /// interval selects nothing, which drops the token.
    #[inline]
    pub fn select(&self, draw: f64) -> Option<&CompiledAlternative> {
        self.locate(draw).map(|i| &self.alternatives[i])
    }

    /// One fresh draw scaled to the total weight.
    #[inline]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&CompiledAlternative> {
        if !(self.total > 0.0) {
            return None;
        }
        self.select(rng.gen_range(0.0..self.total))
    }

    /// Takes the cached outcome at `cursor` and advances it, or falls back to
    /// [`sample`](Self::sample) when the rule has no cache.
    #[inline]
    pub fn sample_cached<R: Rng + ?Sized>(
        &self,
        cursor: &mut u8,
        rng: &mut R,
    ) -> Option<&CompiledAlternative> {
        match &self.presample {
            Some(cache) => {
                let i = cache[*cursor as usize] as usize;
                *cursor = cursor.wrapping_add(1);
                self.alternatives.get(i)
            }
            None => self.sample(rng),
        }
    }

    /// Rebuilds the cache from the current intervals: one uniform draw in
    /// each of [`PRESAMPLE_SIZE`] equal strata of `[0, total)`, shuffled.
    /// Every outcome's share of the cache is within `1 / PRESAMPLE_SIZE` of
    /// its weight. Rules that cannot select anything get no cache.
    pub fn presample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let Some(fallback) = self.alternatives.iter().rposition(|a| a.upper > a.lower) else {
            self.presample = None;
            return;
        };

        let stratum = self.total / PRESAMPLE_SIZE as f64;
        let mut cache = Box::new([0u32; PRESAMPLE_SIZE]);
        for (i, slot) in cache.iter_mut().enumerate() {
            let draw = (i as f64 + rng.gen::<f64>()) * stratum;
            *slot = self.locate(draw).unwrap_or(fallback) as u32;
        }
        cache.shuffle(rng);
        self.presample = Some(cache);
    }

    /// Replaces the weights and rebuilds the intervals. Any cache is dropped
    /// since it no longer reflects the distribution.
    pub fn reweight(&mut self, weights: &[f64]) -> Result<(), usize> {
        if weights.len() != self.alternatives.len() {
            return Err(self.alternatives.len());
        }
        self.set_intervals(weights);
        self.presample = None;
        Ok(())
    }

    /// Renders the rule through `symbols`, in the same layout as
    /// [`ProductionRule`]'s `Display`.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let mut out = String::from("`");
        for (i, alt) in self.alternatives.iter().enumerate() {
            if i > 0 {
                out.push_str("; ");
            }
            out.push_str(&format!("{:.2}", alt.weight()));
            if let Some(c) = alt.catalyst {
                out.push_str(" *");
                out.push_str(symbols.decode(&[c])[0]);
            }
            for t in symbols.decode(&alt.successor) {
                out.push(' ');
                out.push_str(t);
            }
        }
        out.push('`');
        out
    }
}

/// Compiled rules indexed by predecessor id. Every slot is populated; slots
/// without a rule hold a passthrough rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    slots: Box<[CompiledRule]>,
}

impl Default for RuleTable {
    fn default() -> Self {
        RuleTable { slots: vec![CompiledRule::default(); RULE_SLOTS].into_boxed_slice() }
    }
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn get(&self, id: EncodedId) -> &CompiledRule {
        &self.slots[id.slot()]
    }

    pub fn get_mut(&mut self, id: EncodedId) -> &mut CompiledRule {
        &mut self.slots[id.slot()]
    }

    pub fn insert(&mut self, id: EncodedId, rule: CompiledRule) {
        self.slots[id.slot()] = rule;
    }

    /// Non-passthrough rules with their predecessor ids.
    pub fn iter(&self) -> impl Iterator<Item = (EncodedId, &CompiledRule)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_passthrough())
            .map(|(slot, r)| (EncodedId::from_raw(slot as u8), r))
    }

    pub fn presample_all<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for rule in self.slots.iter_mut().filter(|r| !r.is_passthrough()) {
            rule.presample(rng);
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toks(s: &str) -> Vec<Token> {
        s.split_whitespace().map(Token::from).collect()
    }

    fn symbols(vars: &str, consts: &str) -> SymbolTable {
        let v: TokenSet = toks(vars).into_iter().collect();
        let c: TokenSet = toks(consts).into_iter().collect();
        SymbolTable::assign(&v, &c).unwrap()
    }

    fn biased_rule() -> (SymbolTable, CompiledRule) {
        let table = symbols("A B", "");
        let rule = ProductionRule::new(
            "A",
            vec![Alternative::new(0.9, toks("A")), Alternative::new(0.1, toks("B"))],
        );
        let compiled = rule.compile(&table).unwrap();
        (table, compiled)
    }

    #[test]
    fn intervals_follow_declaration_order() {
        let table = symbols("A B C", "");
        let rule = ProductionRule::new(
            "A",
            vec![
                Alternative::new(0.5, toks("B")),
                Alternative::new(0.0, toks("C")),
                Alternative::new(1.5, toks("A")),
            ],
        );
        let c = rule.compile(&table).unwrap();
        let bounds: Vec<(f64, f64)> = c.alternatives().iter().map(|a| (a.lower, a.upper)).collect();
        assert_eq!(bounds, vec![(0.0, 0.5), (0.5, 0.5), (0.5, 2.0)]);
        assert_eq!(c.total(), 2.0);
    }

    #[test]
    fn select_binary_searches_intervals() {
        let table = symbols("A B C", "");
        let rule = ProductionRule::new(
            "A",
            vec![
                Alternative::new(1.0, toks("A")),
                Alternative::new(0.0, toks("B")),
                Alternative::new(1.0, toks("C")),
            ],
        );
        let c = rule.compile(&table).unwrap();
        assert_eq!(c.locate(0.0), Some(0));
        assert_eq!(c.locate(0.999), Some(0));
        assert_eq!(c.locate(1.0), Some(2));
        assert_eq!(c.locate(1.999), Some(2));
        assert_eq!(c.locate(2.0), None);
        assert!(c.select(-0.1).is_none());
    }

    #[test]
    fn empty_rule_is_passthrough() {
        let table = symbols("A", "");
        let c = ProductionRule::new("A", vec![]).compile(&table).unwrap();
        assert!(c.is_passthrough());
        assert!(CompiledRule::default().is_passthrough());
    }

    #[test]
    fn zero_total_selects_nothing() {
        let table = symbols("A", "");
        let mut c = ProductionRule::new("A", vec![Alternative::new(0.0, toks("A"))])
            .compile(&table)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!c.is_passthrough());
        assert!(c.sample(&mut rng).is_none());
        c.presample(&mut rng);
        assert!(!c.is_presampled());
    }

    #[test]
    fn compile_encodes_catalysts() {
        let table = symbols("A B", "x");
        let rule = ProductionRule::new(
            "B",
            vec![Alternative::new(1.0, toks("x")).with_catalyst("A")],
        );
        let c = rule.compile(&table).unwrap();
        let alt = &c.alternatives()[0];
        assert_eq!(alt.catalyst, table.id("A"));
        assert!(alt.accepts(table.id("A")));
        assert!(!alt.accepts(table.id("B")));
        assert!(!alt.accepts(None));
    }

    #[test]
    fn compile_rejects_unknown_successor() {
        let table = symbols("A", "");
        let rule = ProductionRule::new("A", vec![Alternative::new(1.0, toks("A Z"))]);
        assert!(matches!(rule.compile(&table), Err(EngineError::UnknownToken(t)) if t == "Z"));
    }

    #[test]
    fn fresh_sampling_matches_weights() {
        let (_, rule) = biased_rule();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 100_000;
        let first = (0..n)
            .filter(|_| std::ptr::eq(rule.sample(&mut rng).unwrap(), &rule.alternatives()[0]))
            .count();
        let freq = first as f64 / n as f64;
        assert!((freq - 0.9).abs() < 0.01, "frequency {freq}");
    }

    #[test]
    fn presampled_sampling_matches_weights() {
        let (_, mut rule) = biased_rule();
        let mut rng = StdRng::seed_from_u64(11);
        rule.presample(&mut rng);
        assert!(rule.is_presampled());

        let mut cursor = 0u8;
        let n = 100_000;
        let first = (0..n)
            .filter(|_| {
                let alt = rule.sample_cached(&mut cursor, &mut rng).unwrap();
                std::ptr::eq(alt, &rule.alternatives()[0])
            })
            .count();
        let freq = first as f64 / n as f64;
        assert!((freq - 0.9).abs() < 0.01, "frequency {freq}");
    }

    #[test]
    fn presample_cache_is_within_one_stratum() {
        let (_, mut rule) = biased_rule();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            rule.presample(&mut rng);
            let mut cursor = 0u8;
            let first = (0..PRESAMPLE_SIZE)
                .filter(|_| {
                    let alt = rule.sample_cached(&mut cursor, &mut rng).unwrap();
                    std::ptr::eq(alt, &rule.alternatives()[0])
                })
                .count();
            assert!((230..=231).contains(&first), "cache held {first} first outcomes");
            assert_eq!(cursor, 0, "cursor wraps after a full cycle");
        }
    }

    #[test]
    fn reweight_rebuilds_intervals_and_drops_cache() {
        let (_, mut rule) = biased_rule();
        let mut rng = StdRng::seed_from_u64(5);
        rule.presample(&mut rng);
        rule.reweight(&[0.0, 2.0]).unwrap();
        assert!(!rule.is_presampled());
        assert_eq!(rule.weights(), vec![0.0, 2.0]);
        assert_eq!(rule.locate(0.0), Some(1));
        assert_eq!(rule.reweight(&[1.0]), Err(2));
    }

    #[test]
    fn rule_displays_like_the_dsl() {
        let rule = ProductionRule::new(
            "L",
            vec![
                Alternative::new(0.1, toks("L u")).with_catalyst("F"),
                Alternative::new(1.0, toks("L")),
            ],
        );
        assert_eq!(rule.to_string(), "\"L\": `0.10 *F L u; 1.00 L`");
    }

    #[test]
    fn rule_table_defaults_to_passthrough() {
        let (table, rule) = biased_rule();
        let mut rules = RuleTable::new();
        assert!(rules.is_empty());
        let a = table.id("A").unwrap();
        rules.insert(a, rule);
        assert_eq!(rules.len(), 1);
        assert!(rules.get(table.id("B").unwrap()).is_passthrough());
        assert_eq!(rules.get(a).render(&table), "`0.90 A; 0.10 B`");
    }
}
