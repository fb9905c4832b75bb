use std::fmt;

/// Which half of the 8-bit id space ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    /// Variables and constants without counter state (`0x00..=0x7F`).
    Plain,
    /// Counter instances (`0x80..=0xFE`).
    Counter,
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpace::Plain => f.write_str("plain symbol"),
            IdSpace::Counter => f.write_str("counter instance"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{space} id space exhausted: {required} ids required, limit is {limit}")]
    CapacityExceeded {
        space: IdSpace,
        required: usize,
        limit: usize,
    },

    #[error("unknown token `{0}`")]
    UnknownToken(String),

    #[error("no production rule for `{0}`")]
    UnknownRule(String),

    #[error("rule `{predecessor}` has {expected} alternatives but {actual} weights were given")]
    WeightCount {
        predecessor: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("failed to read grammar: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid grammar JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("grammar has an empty axiom")]
    EmptyAxiom,

    #[error(transparent)]
    Engine(#[from] EngineError),
}
