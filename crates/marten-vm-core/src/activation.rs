//! Method activations
//!
//! An activation is one frame of execution: the running method, its receiver
//! and arguments, frame locals, the frame's environment, and the execution
//! level. Handler invocations run at the meta level with no environment of
//! their own, so a handler's base operations are never themselves intercepted.

use crate::environment::Environment;
use crate::method::Method;
use crate::value::Value;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Whether a frame runs application code or meta-level handler code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionLevel {
    /// Ordinary application execution, subject to interception
    Base,
    /// Handler execution, never intercepted
    Meta,
}

/// One frame of execution
#[derive(Debug)]
pub struct Activation {
    method: Arc<Method>,
    receiver: Value,
    arguments: Vec<Value>,
    locals: SmallVec<[Value; 4]>,
    environment: Option<Arc<Environment>>,
    level: ExecutionLevel,
    depth: usize,
}

impl Activation {
    /// Create a base-level frame with nil-initialized locals
    pub fn new(method: Arc<Method>, receiver: Value, arguments: Vec<Value>) -> Self {
        let locals = smallvec![Value::Nil; method.local_count()];
        Self {
            method,
            receiver,
            arguments,
            locals,
            environment: None,
            level: ExecutionLevel::Base,
            depth: 0,
        }
    }

    /// Attach a frame environment
    pub fn with_environment(mut self, environment: Option<Arc<Environment>>) -> Self {
        self.environment = environment;
        self
    }

    /// Set the execution level
    pub fn with_level(mut self, level: ExecutionLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the call depth
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Replace the frame environment in place
    pub fn set_environment(&mut self, environment: Option<Arc<Environment>>) {
        self.environment = environment;
    }

    /// The running method
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// The receiver of this frame
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// The frame's arguments
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Argument at `index`, or nil when out of range
    pub fn argument(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or(Value::Nil)
    }

    /// Frame local at `index`, or nil when out of range
    pub fn local(&self, index: usize) -> Value {
        self.locals.get(index).cloned().unwrap_or(Value::Nil)
    }

    /// Store a frame local; out-of-range stores are ignored
    pub fn set_local(&mut self, index: usize, value: Value) {
        if index < self.locals.len() {
            self.locals[index] = value;
        }
    }

    /// The frame's environment, if any
    pub fn environment(&self) -> Option<&Arc<Environment>> {
        self.environment.as_ref()
    }

    /// The frame's execution level
    pub fn level(&self) -> ExecutionLevel {
        self.level
    }

    /// The frame's call depth
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<Method> {
        Method::primitive("noop", |_, _| Ok(Value::Nil))
    }

    #[test]
    fn test_locals_start_nil() {
        let m = Method::expression("m", 2, crate::ast::Expr::literal(Value::Nil));
        let frame = Activation::new(m, Value::Nil, vec![]);
        assert_eq!(frame.local(0), Value::Nil);
        assert_eq!(frame.local(1), Value::Nil);
    }

    #[test]
    fn test_local_read_write() {
        let m = Method::expression("m", 1, crate::ast::Expr::literal(Value::Nil));
        let mut frame = Activation::new(m, Value::Nil, vec![]);
        frame.set_local(0, Value::integer(9));
        assert_eq!(frame.local(0), Value::integer(9));

        frame.set_local(7, Value::integer(1));
        assert_eq!(frame.local(7), Value::Nil);
    }

    #[test]
    fn test_out_of_range_argument_is_nil() {
        let frame = Activation::new(noop(), Value::Nil, vec![Value::integer(1)]);
        assert_eq!(frame.argument(0), Value::integer(1));
        assert_eq!(frame.argument(1), Value::Nil);
    }

    #[test]
    fn test_builders() {
        let env = crate::environment::Environment::named("e");
        let frame = Activation::new(noop(), Value::Nil, vec![])
            .with_environment(Some(Arc::clone(&env)))
            .with_level(ExecutionLevel::Meta)
            .with_depth(4);
        assert!(Arc::ptr_eq(frame.environment().unwrap(), &env));
        assert_eq!(frame.level(), ExecutionLevel::Meta);
        assert_eq!(frame.depth(), 4);
    }
}
