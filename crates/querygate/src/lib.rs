//! Querygate: parse mongo-shell query text into a typed, allow-listed store operation.
//!
//! The pipeline is pure and network-free:
//! [`tokenize`] → [`parse_shell_args`] → [`scan_chain`] → [`plan_call`].
//! [`plan_query`] runs all of it in one step.

pub mod args;
pub mod chain;
pub mod normalize;
pub mod operation;
pub mod tokenizer;
pub mod types;

pub use args::{parse_args, parse_shell_args, parse_value};
pub use chain::{apply_post_path, parse_post_path, retained_modifiers, scan_chain};
pub use normalize::normalize_literals;
pub use operation::{
    plan_call, plan_query, AggregateSpec, CollectionOp, CountSpec, FindAndModifySpec,
    FindOneSpec, FindSpec, IndexRef, IndexSpec, Operation, OperationClass, OperationKind, Plan,
    PreviewModifier, QueryPreview, UpdateModification, WriteSpec, DEFAULT_FIND_LIMIT,
};
pub use tokenizer::{clean_query, tokenize};
pub use types::*;
