//! Stochastic L-system rewriting.
//!
//! | Module       | Contents                                              |
//! |--------------|-------------------------------------------------------|
//! | [`token`]    | token strings, variable/counter classification        |
//! | [`encoding`] | 8-bit ids with a counter flag, the symbol table       |
//! | [`rule`]     | weighted rules, interval search, pre-sample cache     |
//! | [`buffer`]   | growable id buffers                                   |
//! | [`pool`]     | double-buffered lanes                                 |
//! | [`engine`]   | [`LSystem`], sequential and parallel generations      |
//! | [`parse`]    | rule DSL                                              |
//! | [`grammar`]  | JSON grammar files                                    |
//! | [`analysis`] | growth-rate sampling                                  |

pub mod analysis;
pub mod buffer;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod parse;
pub mod pool;
pub mod rule;
pub mod token;

pub use encoding::{EncodedId, SymbolTable};
pub use engine::{EngineConfig, LSystem};
pub use error::{EngineError, GrammarError, IdSpace};
pub use grammar::Grammar;
pub use rule::{Alternative, CompiledRule, ProductionRule, RuleTable};
pub use token::{Token, TokenSet};
