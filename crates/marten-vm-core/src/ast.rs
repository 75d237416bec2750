//! Expression trees
//!
//! Front ends lower code to these nodes. Every send and field access node
//! owns its dispatch site, so the caches and override resolutions a node
//! accumulates are local to that program point.

use crate::dispatch::{CallSite, FieldAccess, FieldSite};
use crate::shape::PropertyKey;
use crate::value::Value;

/// An executable expression
#[derive(Debug)]
pub enum Expr {
    /// A constant value
    Literal(Value),
    /// The frame's receiver
    ReadSelf,
    /// Argument at an index
    ReadArgument(usize),
    /// Frame local at an index
    ReadLocal {
        /// The local's index
        index: usize,
    },
    /// Store into a frame local, yielding the stored value
    WriteLocal {
        /// The local's index
        index: usize,
        /// The value expression
        value: Box<Expr>,
    },
    /// A message send through an inline-cached site
    Send {
        /// The send site
        site: CallSite,
        /// The receiver expression
        receiver: Box<Expr>,
        /// The argument expressions
        arguments: Vec<Expr>,
    },
    /// A property read through an inline-cached site
    FieldRead {
        /// The access site
        site: FieldSite,
        /// The receiver expression
        receiver: Box<Expr>,
    },
    /// A property write through an inline-cached site, yielding the value
    FieldWrite {
        /// The access site
        site: FieldSite,
        /// The receiver expression
        receiver: Box<Expr>,
        /// The value expression
        value: Box<Expr>,
    },
    /// Evaluate in order, yielding the last value (nil when empty)
    Sequence(Vec<Expr>),
}

impl Expr {
    /// A constant value
    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    /// The frame's receiver
    pub fn read_self() -> Expr {
        Expr::ReadSelf
    }

    /// Argument at `index`
    pub fn read_argument(index: usize) -> Expr {
        Expr::ReadArgument(index)
    }

    /// Frame local at `index`
    pub fn read_local(index: usize) -> Expr {
        Expr::ReadLocal { index }
    }

    /// Store into frame local `index`
    pub fn write_local(index: usize, value: Expr) -> Expr {
        Expr::WriteLocal {
            index,
            value: Box::new(value),
        }
    }

    /// A send of `selector` with a fresh uninitialized site
    pub fn send(selector: &str, receiver: Expr, arguments: Vec<Expr>) -> Expr {
        Expr::Send {
            site: CallSite::new(selector),
            receiver: Box::new(receiver),
            arguments,
        }
    }

    /// A send with an explicit inline cache bound
    pub fn send_with_bound(
        selector: &str,
        bound: usize,
        receiver: Expr,
        arguments: Vec<Expr>,
    ) -> Expr {
        Expr::Send {
            site: CallSite::with_bound(selector, bound),
            receiver: Box::new(receiver),
            arguments,
        }
    }

    /// A property read with a fresh uninitialized site
    pub fn field_read(key: impl Into<PropertyKey>, receiver: Expr) -> Expr {
        Expr::FieldRead {
            site: FieldSite::new(key, FieldAccess::Read),
            receiver: Box::new(receiver),
        }
    }

    /// A property write with a fresh uninitialized site
    pub fn field_write(key: impl Into<PropertyKey>, receiver: Expr, value: Expr) -> Expr {
        Expr::FieldWrite {
            site: FieldSite::new(key, FieldAccess::Write),
            receiver: Box::new(receiver),
            value: Box::new(value),
        }
    }

    /// Evaluate in order, yielding the last value
    pub fn sequence(exprs: Vec<Expr>) -> Expr {
        Expr::Sequence(exprs)
    }
}
