//! # Marten VM Core
//!
//! Execution core for the Marten object runtime.
//!
//! ## Design Principles
//!
//! - **Shapes**: hidden-class property layouts, hash-consed so equal
//!   addition sequences share identity
//! - **Inline caches**: bounded polymorphic caches per send and field site,
//!   monotonic up to a terminal megamorphic state
//! - **Meta-object protocol**: frame- and object-scoped environments can
//!   intercept sends, field accesses, and frame locals
//! - **Pay-as-you-go reflection**: a global assumption keeps the meta layer
//!   out of the dispatch path until it is activated

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod activation;
pub mod assumption;
pub mod ast;
pub mod class;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod interpreter;
pub mod method;
pub mod mop;
pub mod object;
pub mod shape;
pub mod symbol;
pub mod universe;
pub mod value;

pub use activation::{Activation, ExecutionLevel};
pub use assumption::{Assumption, ReflectionSwitch};
pub use ast::Expr;
pub use class::{Class, ClassDescriptor};
pub use dispatch::{
    CacheLookup, CacheSite, CallSite, FieldAccess, FieldSite, Guard, INLINE_CACHE_SIZE,
    InstallOutcome,
};
pub use environment::{Environment, ReflectiveOp};
pub use error::{StorageError, VmError, VmResult};
pub use interpreter::Interpreter;
pub use method::{Method, MethodBody};
pub use mop::Resolution;
pub use object::{ObjectRecord, ObjectRef};
pub use shape::{
    Location, ObjectKind, PropertyDescriptor, PropertyFlags, PropertyKey, Shape, ShapeTable,
    StorageKind,
};
pub use symbol::Symbol;
pub use universe::{Universe, UniverseConfig};
pub use value::{Value, ValueKind, VmArray};
