//! Rigor - declarative test orchestration for devices under test
//!
//! Test procedures are YAML documents of tagged action nodes. The pipeline:
//! raw document -> [`compile::Compiler`] (variant-aware tree builder) ->
//! [`node::Action`] tree -> [`propagate`] (scope inheritance and lazy
//! binding resolution) -> [`runner::Runner`] (sequential execution with
//! continue-on-fail status propagation).

pub mod compile;
pub mod config;
pub mod effects;
pub mod error;
pub mod expr;
pub mod node;
pub mod propagate;
pub mod runner;
pub mod search;
pub mod suggest;
pub mod template;
pub mod value;
pub mod variant;

pub use compile::Compiler;
pub use config::Config;
pub use effects::{Effects, MockEffects, ShellEffects};
pub use error::{FixSuggestion, RigorError};
pub use expr::Expr;
pub use node::Action;
pub use propagate::propagate_root;
pub use runner::{Runner, Status};
pub use search::SearchPaths;
pub use template::Template;
pub use value::{ParamMap, ScopeRef, Value};
pub use variant::VariantContext;
