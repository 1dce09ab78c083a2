//! Rule synthesis (deterministic request generation)

pub mod naming;
pub mod rule_builder;

pub use rule_builder::{RuleContext, RuleKind, RuleSynthesizer, SynthesisOptions, SynthesizedRule};
