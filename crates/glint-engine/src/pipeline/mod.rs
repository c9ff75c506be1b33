//! Pipelines: ordered operation lists and the contract they execute against.
//!
//! Responsibilities:
//! - store backend-agnostic operations in insertion order
//! - dispatch them, one execution context per `execute()`
//! - define the `ExecutionContext` interface every backend implements

mod binding;
mod exec;
mod list;
mod operation;

pub use binding::{ArrayBinding, DrawOp, PrimitiveMode, TextureBinding, VertexFormat};
pub use exec::{Bindings, ExecutionContext};
pub use list::Pipeline;
pub use operation::{Operation, OperationKind};
