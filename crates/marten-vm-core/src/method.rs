//! Executable methods
//!
//! A method is either a native primitive or an expression tree evaluated by
//! the interpreter. Methods are shared immutably behind `Arc`; dispatch
//! guards that key on a specific method compare by pointer identity.

use crate::activation::Activation;
use crate::ast::Expr;
use crate::error::VmResult;
use crate::interpreter::Interpreter;
use crate::symbol::Symbol;
use crate::value::Value;
use std::sync::Arc;

/// Native method entry point
pub type PrimitiveFn = fn(&Interpreter<'_>, &mut Activation) -> VmResult<Value>;

/// What a method executes
pub enum MethodBody {
    /// A native primitive
    Primitive(PrimitiveFn),
    /// An interpreted expression tree
    Expression(Expr),
}

/// An executable method
pub struct Method {
    selector: Symbol,
    local_count: usize,
    body: MethodBody,
}

impl Method {
    /// Create a native primitive method
    pub fn primitive(selector: &str, f: PrimitiveFn) -> Arc<Self> {
        Arc::new(Self {
            selector: Symbol::intern(selector),
            local_count: 0,
            body: MethodBody::Primitive(f),
        })
    }

    /// Create an interpreted method with `local_count` frame locals
    pub fn expression(selector: &str, local_count: usize, body: Expr) -> Arc<Self> {
        Arc::new(Self {
            selector: Symbol::intern(selector),
            local_count,
            body: MethodBody::Expression(body),
        })
    }

    /// The method's selector
    pub fn selector(&self) -> &Symbol {
        &self.selector
    }

    /// Number of frame locals an activation of this method needs
    pub fn local_count(&self) -> usize {
        self.local_count
    }

    /// The method's body
    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Stable identity of a shared method, for dispatch guards
    pub fn identity_of(method: &Arc<Method>) -> usize {
        Arc::as_ptr(method) as usize
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.body {
            MethodBody::Primitive(_) => "primitive",
            MethodBody::Expression(_) => "expression",
        };
        f.debug_struct("Method")
            .field("selector", &self.selector)
            .field("kind", &kind)
            .finish()
    }
}
