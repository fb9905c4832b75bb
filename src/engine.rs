//! The generation engine, [`LSystem`].
//!
//! ## Scheduling
//!
//! * **Sequential**: every generation rewrites lane 0 into its own write buffer
//!   (read buffer → write buffer, then swap). Used below
//!   [`EngineConfig::parallel_threshold`] generations.
//! * **Parallel**: lane 0 is first primed for
//!   [`EngineConfig::prime_generations`] generations, then its sequence is
//!   cut into one contiguous range per lane. Every lane then runs its
//!   remaining generations on its own rayon task; the call joins all lanes
//!   before returning and [`Pool::read_all`] stitches the ranges back
//!   together in lane order.
//!
//! ## Lane-private sampling state
//!
//! Compiled rules are shared read-only by all lanes. The mutable part of
//! sampling (RNG and pre-sample cursors) lives in one sampler per lane, so
//! parallel generations never write to shared state.
//!
//! ## Catalysts at lane boundaries
//!
//! The first token of a lane has no left neighbour inside that lane, so a
//! catalyst never matches there, exactly as for the first token of the
//! whole sequence.

use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::encoding::{EncodedId, SymbolTable, RULE_SLOTS};
use crate::error::EngineError;
use crate::pool::{Pool, DEFAULT_BUFFER_CAPACITY, DEFAULT_LANES};
use crate::rule::{CompiledAlternative, CompiledRule, ProductionRule, RuleTable, PRESAMPLE_SIZE};
use crate::token::{Token, TokenSet, COUNTER_FLOOR};

/// Generation count from which `iterate_until` switches to parallel mode.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 15;
/// Sequential generations run on lane 0 before distributing.
pub const DEFAULT_PRIME_GENERATIONS: usize = 10;

const LANE_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of lanes, and therefore of parallel tasks.
    pub lanes: usize,
    pub parallel_threshold: usize,
    pub prime_generations: usize,
    /// Build a pre-sample cache for every rule.
    pub presample: bool,
    /// Fixed seed. With a seed, `reset` replays the same random streams.
    pub seed: Option<u64>,
    /// Initial capacity of every buffer, in ids.
    pub initial_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            lanes: DEFAULT_LANES,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            prime_generations: DEFAULT_PRIME_GENERATIONS,
            presample: false,
            seed: None,
            initial_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_prime_generations(mut self, generations: usize) -> Self {
        self.prime_generations = generations;
        self
    }

    pub fn with_presample(mut self, presample: bool) -> Self {
        self.presample = presample;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

fn lane_seed(seed: u64, lane: usize) -> u64 {
    seed ^ (lane as u64 + 1).wrapping_mul(LANE_SEED_MIX)
}

/// Mutable sampling state owned by exactly one lane.
#[derive(Debug, Clone)]
struct LaneSampler {
    rng: StdRng,
    cursors: [u8; RULE_SLOTS],
}

impl LaneSampler {
    fn new(seed: u64, lane: usize, lanes: usize) -> Self {
        // Staggered start so lanes do not replay the same cached outcomes in lockstep.
        let start = (lane * PRESAMPLE_SIZE / lanes.max(1)) as u8;
        LaneSampler {
            rng: StdRng::seed_from_u64(lane_seed(seed, lane)),
            cursors: [start; RULE_SLOTS],
        }
    }

    #[inline(always)]
    fn choose<'r>(&mut self, id: EncodedId, rule: &'r CompiledRule) -> Option<&'r CompiledAlternative> {
        rule.sample_cached(&mut self.cursors[id.slot()], &mut self.rng)
    }
}

/// One generation over `input`, appended to `output`.
fn rewrite(
    input: &[EncodedId],
    output: &mut Buffer,
    symbols: &SymbolTable,
    rules: &RuleTable,
    sampler: &mut LaneSampler,
) {
    let mut previous = None;
    for &token in input {
        let id = symbols.rewrite_id(token);
        let rule = rules.get(id);
        if rule.is_passthrough() {
            output.push(id);
        } else {
            match sampler.choose(id, rule) {
                Some(alt) if alt.accepts(previous) => output.extend_from_slice(&alt.successor),
                Some(_) => output.push(id),
                None => {}
            }
        }
        previous = Some(token);
    }
}

/// A compiled grammar plus the buffers it grows its sequence in.
#[derive(Debug, Clone)]
pub struct LSystem {
    axiom: Token,
    axiom_id: EncodedId,
    source_rules: BTreeMap<Token, ProductionRule>,
    symbols: SymbolTable,
    rules: RuleTable,
    pool: Pool,
    samplers: Vec<LaneSampler>,
    rule_rng: StdRng,
    config: EngineConfig,
    seed: u64,
}

impl LSystem {
    /// Compiles a grammar.
    ///
    /// Tokens mentioned by the axiom or the rules but missing from
    /// `variables`/`constants` are classified and added, so the only
    /// possible failure is [`EngineError::CapacityExceeded`].
    pub fn new(
        axiom: impl Into<Token>,
        rules: impl IntoIterator<Item = ProductionRule>,
        variables: &TokenSet,
        constants: &TokenSet,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let axiom = axiom.into();
        let source_rules: BTreeMap<Token, ProductionRule> = rules
            .into_iter()
            .map(|rule| (rule.predecessor.clone(), rule))
            .collect();

        let mut variables = variables.clone();
        let mut constants = constants.clone();
        let mentioned = std::iter::once(&axiom).chain(source_rules.values().flat_map(ProductionRule::tokens));
        for t in mentioned {
            if variables.contains(t) || constants.contains(t) {
                continue;
            }
            if t.is_variable() {
                variables.insert(t.clone());
            } else {
                constants.insert(t.clone());
            }
        }

        let symbols = SymbolTable::assign(&variables, &constants)?;
        let lookup = |t: &Token| {
            symbols
                .id(t.as_str())
                .ok_or_else(|| EngineError::UnknownToken(t.to_string()))
        };
        let axiom_id = lookup(&axiom)?;

        let mut table = RuleTable::new();
        for (predecessor, rule) in &source_rules {
            table.insert(lookup(predecessor)?, rule.compile(&symbols)?);
        }
        // A floor instance without a rule of its own inherits its base's rule.
        for (base, _) in symbols.ceilings() {
            let floor = Token::counter_instance(base.as_str(), COUNTER_FLOOR);
            if source_rules.contains_key(&floor) {
                continue;
            }
            if let Some(rule) = source_rules.get(base) {
                table.insert(lookup(&floor)?, rule.compile(&symbols)?);
            }
        }

        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rule_rng = StdRng::seed_from_u64(seed);
        if config.presample {
            table.presample_all(&mut rule_rng);
        }

        let lanes = config.lanes.max(1);
        let samplers = (0..lanes).map(|i| LaneSampler::new(seed, i, lanes)).collect();

        debug!(
            axiom = %axiom,
            symbols = symbols.len(),
            rules = table.len(),
            lanes,
            presample = config.presample,
            "compiled grammar"
        );

        let mut engine = LSystem {
            axiom,
            axiom_id,
            source_rules,
            symbols,
            rules: table,
            pool: Pool::new(lanes, config.initial_capacity),
            samplers,
            rule_rng,
            config,
            seed,
        };
        engine.reset();
        Ok(engine)
    }

    /// Back to the single-axiom state. Idempotent.
    ///
    /// Sampling state carries over unless a seed is configured, in which
    /// case every lane restarts its stream from that seed.
    pub fn reset(&mut self) {
        self.pool.reset();
        self.pool.lane_mut(0).read_mut().push(self.axiom_id);
        if self.config.seed.is_some() {
            let lanes = self.samplers.len();
            for (i, sampler) in self.samplers.iter_mut().enumerate() {
                *sampler = LaneSampler::new(self.seed, i, lanes);
            }
        }
    }

    /// One sequential generation on lane 0.
    pub fn step(&mut self) {
        let (input, output) = self.pool.lane_mut(0).split();
        rewrite(input.as_slice(), output, &self.symbols, &self.rules, &mut self.samplers[0]);
        self.pool.swap(0);
    }

    /// One sequential generation; returns lane 0's new sequence.
    pub fn iterate_once(&mut self) -> &[EncodedId] {
        self.step();
        self.pool.read(0).as_slice()
    }

    /// `generations` parallel generations from the current state, no reset.
    pub fn iterate(&mut self, generations: usize) -> Vec<EncodedId> {
        self.run_lanes(generations);
        self.pool.read_all()
    }

    /// Resets, then runs `generations` generations, switching to parallel
    /// lanes once the count reaches the configured threshold.
    pub fn iterate_until(&mut self, generations: usize) -> Vec<EncodedId> {
        self.reset();
        if generations < self.config.parallel_threshold {
            debug!(generations, "sequential run");
            for _ in 0..generations {
                self.step();
            }
        } else {
            let primed = self.config.prime_generations.min(generations);
            debug!(generations, primed, lanes = self.pool.lane_count(), "parallel run");
            self.prime(primed);
            self.run_lanes(generations - primed);
        }
        self.pool.read_all()
    }

    fn prime(&mut self, generations: usize) {
        for _ in 0..generations {
            self.step();
        }
        let len = self.pool.read(0).len();
        let chunk = self.pool.distribute();
        debug!(len, chunk, lanes = self.pool.lane_count(), "distributed sequence");
    }

    fn run_lanes(&mut self, generations: usize) {
        if generations == 0 {
            return;
        }
        let symbols = &self.symbols;
        let rules = &self.rules;
        self.pool
            .lanes_mut()
            .par_iter_mut()
            .zip(self.samplers.par_iter_mut())
            .enumerate()
            .for_each(|(i, (lane, sampler))| {
                for _ in 0..generations {
                    let (input, output) = lane.split();
                    rewrite(input.as_slice(), output, symbols, rules, sampler);
                    lane.swap();
                }
                trace!(lane = i, len = lane.read().len(), "lane finished");
            });
    }

    pub fn encode<T: AsRef<str>>(&self, tokens: &[T]) -> Result<Vec<EncodedId>, EngineError> {
        self.symbols.encode(tokens)
    }

    pub fn decode(&self, ids: &[EncodedId]) -> Vec<&str> {
        self.symbols.decode(ids)
    }

    /// Decoded tokens joined by single spaces.
    pub fn render(&self, ids: &[EncodedId]) -> String {
        self.decode(ids).join(" ")
    }

    /// Replaces the weights of `predecessor`'s compiled rule, keeping its
    /// alternatives. The pre-sample cache is rebuilt when pre-sampling is on.
    pub fn reweight(&mut self, predecessor: &str, weights: &[f64]) -> Result<(), EngineError> {
        let id = self
            .symbols
            .id(predecessor)
            .ok_or_else(|| EngineError::UnknownRule(predecessor.to_string()))?;
        let rule = self.rules.get_mut(id);
        if rule.is_passthrough() {
            return Err(EngineError::UnknownRule(predecessor.to_string()));
        }
        rule.reweight(weights).map_err(|expected| EngineError::WeightCount {
            predecessor: predecessor.to_string(),
            expected,
            actual: weights.len(),
        })?;
        if self.config.presample {
            rule.presample(&mut self.rule_rng);
        }
        let rule = rule.clone();

        // A floor instance compiled from this rule follows its weights.
        if let Some(floor) = self.inherited_floor(predecessor) {
            self.rules.insert(floor, rule);
        }
        debug!(predecessor, ?weights, "reweighted rule");
        Ok(())
    }

    /// Id of `base`'s floor instance when that instance has no rule of its
    /// own and runs `base`'s rule instead.
    fn inherited_floor(&self, base: &str) -> Option<EncodedId> {
        self.symbols.ceiling(base)?;
        let floor = Token::counter_instance(base, COUNTER_FLOOR);
        if self.source_rules.contains_key(&floor) || !self.source_rules.contains_key(base) {
            return None;
        }
        self.symbols.id(floor.as_str())
    }

    /// A copy of this engine running on a different compiled rule table,
    /// reset to the axiom.
    pub fn with_rule_table(&self, rules: RuleTable) -> Self {
        let mut clone = self.clone();
        clone.rules = rules;
        clone.reset();
        clone
    }

    pub fn axiom(&self) -> &Token {
        &self.axiom
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl fmt::Display for LSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, rule) in self.rules.iter() {
            let name = self.symbols.decode(&[id])[0];
            writeln!(f, "\"{}\": {},", name, rule.render(&self.symbols))?;
        }
        Ok(())
    }
}
