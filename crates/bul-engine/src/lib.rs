//! Instruction insertion engine
//!
//! Entry points describe insertions with an [`InsertionBuilder`]; each
//! commit is applied to its unit atomically by the patch emitter: symbols
//! are interned, a bootstrap entry is appended when needed and the
//! instruction is appended to the target method. Units are processed in
//! parallel by the [`Pipeline`], and a TOML [`Plan`] can stand in for
//! hand-written entry points.

#![warn(rust_2018_idioms)]

pub mod argument;
pub mod builder;
pub mod emitter;
pub mod error;
pub mod handle;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod scanner;
pub mod unit;

pub use argument::{ConstantValue, InsertionArgument};
pub use builder::{FieldOp, InsertionBuilder, InsertionKind, InsertionRequest};
pub use emitter::InstructionPosition;
pub use error::{InsertError, PlanError, UnitError};
pub use handle::{handle, DispatchKind, HandleDescriptor};
pub use pipeline::{
    process_unit, Pipeline, PipelineConfig, PipelineReport, UnitInput, UnitOutcome,
};
pub use plan::{ArgumentPlan, HandlePlan, InsertionPlan, Plan, PlanKind, UnitPlan};
pub use registry::{EntryPoint, ProcessorRegistry};
pub use scanner::{Selection, SkipReason, UnitScanner, DEFAULT_MARKER};
pub use unit::{MethodPatchLog, MethodTarget, PatchEntry, PatchedUnit, UnitHandle};
