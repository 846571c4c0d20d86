//! The reasoning side of mindloop.
//!
//! - [`engine`]: one contextualize → generate → persist cycle
//! - [`patterns`]: strategies that compose steps into a result
//!
//! Nothing here knows about events, retries or execution state. Patterns
//! reach the outside world only through a [`patterns::StepDriver`].

pub mod engine;
pub mod patterns;

pub use engine::{ReasoningEngine, StepRequest};
pub use patterns::{
    CombinationRule, Combined, Directive, LabeledConcatenation, LowestUncertainty,
    OutputClassifier, ParallelExploration, PatternRegistry, PatternResult, ReactClassifier,
    ReflectiveRefinement, SequentialReflection, StepDriver, ToolAugmentedPlanning,
    WorkflowPattern,
};
