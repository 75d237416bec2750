//! Expression evaluation and dispatch
//!
//! The interpreter drives the two-stage dispatch of every intercepted
//! operation. Stage one asks the operation's `MopSite` whether an environment
//! overrides it, but only while the global reflection switch is active and
//! the frame runs at the base level. Stage two is the plain operation through
//! the site's inline cache. Handlers execute at the meta level with no frame
//! environment, so the operations they perform are never re-intercepted.

use crate::activation::{Activation, ExecutionLevel};
use crate::ast::Expr;
use crate::dispatch::{CacheLookup, CallSite, FieldSite, Guard, InstallOutcome};
use crate::environment::ReflectiveOp;
use crate::error::{VmError, VmResult};
use crate::method::{Method, MethodBody};
use crate::mop::Resolution;
use crate::shape::{Location, PropertyKey};
use crate::symbol::Symbol;
use crate::universe::Universe;
use crate::value::Value;
use marten_profiler::DispatchStats;
use std::sync::Arc;

/// Selector consulted when ordinary method lookup fails
const DOES_NOT_UNDERSTAND: &str = "doesNotUnderstand:arguments:";

/// The expression interpreter for one universe
pub struct Interpreter<'a> {
    universe: &'a Universe,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter over `universe`
    pub fn new(universe: &'a Universe) -> Self {
        Self { universe }
    }

    /// The universe this interpreter executes in
    pub fn universe(&self) -> &Universe {
        self.universe
    }

    fn stats(&self) -> &DispatchStats {
        self.universe.stats()
    }

    /// Whether operations in `frame` are subject to interception
    fn intercepting(&self, frame: &Activation) -> bool {
        self.universe.reflection().is_active() && frame.level() == ExecutionLevel::Base
    }

    /// Run a method as a fresh top-level activation
    pub fn run_method(
        &self,
        method: &Arc<Method>,
        receiver: Value,
        arguments: Vec<Value>,
    ) -> VmResult<Value> {
        let mut frame = Activation::new(Arc::clone(method), receiver, arguments);
        self.execute(&mut frame)
    }

    fn execute(&self, frame: &mut Activation) -> VmResult<Value> {
        let method = Arc::clone(frame.method());
        match method.body() {
            MethodBody::Primitive(f) => f(self, frame),
            MethodBody::Expression(expr) => self.evaluate(frame, expr),
        }
    }

    /// Evaluate an expression in `frame`
    pub fn evaluate(&self, frame: &mut Activation, expr: &Expr) -> VmResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::ReadSelf => Ok(frame.receiver().clone()),
            Expr::ReadArgument(index) => Ok(frame.argument(*index)),
            Expr::ReadLocal { index } => self.read_local(frame, *index),
            Expr::WriteLocal { index, value } => {
                let value = self.evaluate(frame, value)?;
                self.write_local(frame, *index, value)
            }
            Expr::Send {
                site,
                receiver,
                arguments,
            } => {
                let receiver = self.evaluate(frame, receiver)?;
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    args.push(self.evaluate(frame, argument)?);
                }
                self.send_message(frame, site, receiver, args)
            }
            Expr::FieldRead { site, receiver } => {
                let receiver = self.evaluate(frame, receiver)?;
                self.read_field(frame, site, receiver)
            }
            Expr::FieldWrite {
                site,
                receiver,
                value,
            } => {
                let receiver = self.evaluate(frame, receiver)?;
                let value = self.evaluate(frame, value)?;
                self.write_field(frame, site, receiver, value)
            }
            Expr::Sequence(exprs) => {
                let mut result = Value::Nil;
                for expr in exprs {
                    result = self.evaluate(frame, expr)?;
                }
                Ok(result)
            }
        }
    }

    /// Frame-local read, interceptable through the frame environment only
    fn read_local(&self, frame: &mut Activation, index: usize) -> VmResult<Value> {
        if self.intercepting(frame) {
            self.stats().record_mop_resolution();
            if let Some(env) = frame.environment()
                && let Some(handler) = env.handler_for(ReflectiveOp::LocalRead)
            {
                self.stats().record_mop_override();
                let receiver = frame.receiver().clone();
                let args = vec![Value::integer(index as i64)];
                return self.call_handler(&handler, receiver, args, frame);
            }
        }
        Ok(frame.local(index))
    }

    /// Frame-local write, interceptable through the frame environment only
    fn write_local(&self, frame: &mut Activation, index: usize, value: Value) -> VmResult<Value> {
        if self.intercepting(frame) {
            self.stats().record_mop_resolution();
            if let Some(env) = frame.environment()
                && let Some(handler) = env.handler_for(ReflectiveOp::LocalWrite)
            {
                self.stats().record_mop_override();
                let receiver = frame.receiver().clone();
                let args = vec![Value::integer(index as i64), value];
                return self.call_handler(&handler, receiver, args, frame);
            }
        }
        frame.set_local(index, value.clone());
        Ok(value)
    }

    /// Dispatch a message send through `site`
    pub fn send_message(
        &self,
        frame: &Activation,
        site: &CallSite,
        receiver: Value,
        arguments: Vec<Value>,
    ) -> VmResult<Value> {
        self.stats().record_send();

        let token = self.universe.reflection().current_token();
        if site.cache.revalidate(&token) {
            site.mop.clear();
        }

        if self.intercepting(frame)
            && let Resolution::Handler(handler) =
                site.mop.resolve(self.stats(), frame, &receiver)
        {
            let args = vec![
                Value::Symbol(site.selector().clone()),
                Value::array(arguments),
            ];
            return self.call_handler(&handler, receiver, args, frame);
        }

        match site.cache.lookup(&receiver) {
            CacheLookup::Hit(method) => {
                self.stats().record_cache_hit();
                self.call_method(&method, receiver, arguments, frame)
            }
            CacheLookup::Megamorphic => {
                self.stats().record_cache_miss();
                let method = self.resolve_method(&receiver, site.selector())?;
                self.invoke_resolved(method, receiver, arguments, frame)
            }
            CacheLookup::Miss => {
                self.stats().record_cache_miss();
                let method = self.resolve_method(&receiver, site.selector())?;
                if let ResolvedSend::Method(method) = &method {
                    match site.cache.install(Guard::for_send(&receiver), Arc::clone(method)) {
                        InstallOutcome::Cached | InstallOutcome::Extended => {
                            self.stats().record_cache_transition();
                        }
                        InstallOutcome::Collapsed => {
                            self.stats().record_cache_transition();
                            self.stats().record_megamorphic_collapse();
                            log::trace!("send site {} went megamorphic", site.selector());
                        }
                        InstallOutcome::AlreadyMegamorphic => {}
                    }
                }
                self.invoke_resolved(method, receiver, arguments, frame)
            }
        }
    }

    /// Dispatch a property read through `site`
    pub fn read_field(
        &self,
        frame: &Activation,
        site: &FieldSite,
        receiver: Value,
    ) -> VmResult<Value> {
        let token = self.universe.reflection().current_token();
        if site.cache.revalidate(&token) {
            site.mop.clear();
        }

        if self.intercepting(frame)
            && let Resolution::Handler(handler) =
                site.mop.resolve(self.stats(), frame, &receiver)
        {
            let args = vec![key_to_value(site.key())];
            return self.call_handler(&handler, receiver, args, frame);
        }

        match site.cache.lookup(&receiver) {
            CacheLookup::Hit(location) => {
                self.stats().record_cache_hit();
                let object = receiver
                    .as_object()
                    .ok_or_else(|| VmError::internal("shape guard held on non-object"))?;
                Ok(location.get(object))
            }
            CacheLookup::Megamorphic => {
                self.stats().record_cache_miss();
                let Some(object) = receiver.as_object() else {
                    return Ok(Value::Nil);
                };
                Ok(object.get(site.key()).unwrap_or(Value::Nil))
            }
            CacheLookup::Miss => {
                self.stats().record_cache_miss();
                let Some(object) = receiver.as_object() else {
                    return Ok(Value::Nil);
                };
                let Some(location) = object.shape().location_of(site.key()) else {
                    // Missing property reads yield nil and are not cached:
                    // the next write will change the shape anyway
                    return Ok(Value::Nil);
                };
                let value = location.get(object);
                self.install_field(site, Guard::for_field(&receiver), location);
                Ok(value)
            }
        }
    }

    /// Dispatch a property write through `site`, yielding the written value
    pub fn write_field(
        &self,
        frame: &Activation,
        site: &FieldSite,
        receiver: Value,
        value: Value,
    ) -> VmResult<Value> {
        let token = self.universe.reflection().current_token();
        if site.cache.revalidate(&token) {
            site.mop.clear();
        }

        if self.intercepting(frame)
            && let Resolution::Handler(handler) =
                site.mop.resolve(self.stats(), frame, &receiver)
        {
            let args = vec![key_to_value(site.key()), value];
            return self.call_handler(&handler, receiver, args, frame);
        }

        match site.cache.lookup(&receiver) {
            CacheLookup::Hit(location) => {
                self.stats().record_cache_hit();
                let object = receiver
                    .as_object()
                    .ok_or_else(|| VmError::internal("shape guard held on non-object"))?;
                location.set(object, value.clone())?;
                Ok(value)
            }
            CacheLookup::Megamorphic => {
                self.stats().record_cache_miss();
                let object = receiver
                    .as_object()
                    .ok_or_else(|| VmError::internal("field write on non-object receiver"))?;
                object.set(self.universe.shapes(), site.key().clone(), value.clone())?;
                Ok(value)
            }
            CacheLookup::Miss => {
                self.stats().record_cache_miss();
                let object = receiver
                    .as_object()
                    .ok_or_else(|| VmError::internal("field write on non-object receiver"))?;
                if let Some(location) = object.shape().location_of(site.key()) {
                    location.set(object, value.clone())?;
                    self.install_field(site, Guard::for_field(&receiver), location);
                    return Ok(value);
                }
                // Adding the property transitions the shape, so the guard
                // taken before the write would be stale; leave the site cold
                object.set(self.universe.shapes(), site.key().clone(), value.clone())?;
                Ok(value)
            }
        }
    }

    fn install_field(&self, site: &FieldSite, guard: Guard, location: Location) {
        match site.cache.install(guard, location) {
            InstallOutcome::Cached | InstallOutcome::Extended => {
                self.stats().record_cache_transition();
            }
            InstallOutcome::Collapsed => {
                self.stats().record_cache_transition();
                self.stats().record_megamorphic_collapse();
                log::trace!("field site {} went megamorphic", site.key());
            }
            InstallOutcome::AlreadyMegamorphic => {}
        }
    }

    fn resolve_method(&self, receiver: &Value, selector: &Symbol) -> VmResult<ResolvedSend> {
        if let Some(method) = self.universe.lookup_method(receiver, selector) {
            return Ok(ResolvedSend::Method(method));
        }
        let class = self.universe.class_of(receiver);
        if let Some(fallback) = class.lookup_method(&Symbol::intern(DOES_NOT_UNDERSTAND)) {
            return Ok(ResolvedSend::NotUnderstood {
                fallback,
                selector: selector.clone(),
            });
        }
        Err(VmError::MessageNotUnderstood {
            class: class.name().clone(),
            selector: selector.clone(),
        })
    }

    fn invoke_resolved(
        &self,
        resolved: ResolvedSend,
        receiver: Value,
        arguments: Vec<Value>,
        caller: &Activation,
    ) -> VmResult<Value> {
        match resolved {
            ResolvedSend::Method(method) => self.call_method(&method, receiver, arguments, caller),
            ResolvedSend::NotUnderstood { fallback, selector } => {
                let args = vec![Value::Symbol(selector), Value::array(arguments)];
                self.call_method(&fallback, receiver, args, caller)
            }
        }
    }

    /// Activate `method` as a callee of `caller`.
    ///
    /// The callee inherits the caller's frame environment and execution
    /// level, so a handler's callees stay at the meta level.
    pub fn call_method(
        &self,
        method: &Arc<Method>,
        receiver: Value,
        arguments: Vec<Value>,
        caller: &Activation,
    ) -> VmResult<Value> {
        let depth = caller.depth() + 1;
        if depth > self.universe.max_stack_depth() {
            return Err(VmError::StackOverflow);
        }
        let mut frame = Activation::new(Arc::clone(method), receiver, arguments)
            .with_environment(caller.environment().cloned())
            .with_level(caller.level())
            .with_depth(depth);
        self.execute(&mut frame)
    }

    /// Activate a handler at the meta level with no frame environment
    fn call_handler(
        &self,
        handler: &Arc<Method>,
        receiver: Value,
        arguments: Vec<Value>,
        caller: &Activation,
    ) -> VmResult<Value> {
        let depth = caller.depth() + 1;
        if depth > self.universe.max_stack_depth() {
            return Err(VmError::StackOverflow);
        }
        let mut frame = Activation::new(Arc::clone(handler), receiver, arguments)
            .with_level(ExecutionLevel::Meta)
            .with_depth(depth);
        self.execute(&mut frame)
    }

    /// Perform the base behavior of an intercepted operation.
    ///
    /// Handlers call this to delegate to the behavior they displaced. The
    /// operation runs uncached from the handler's frame, which is already at
    /// the meta level, so it cannot be intercepted again.
    pub fn perform_base_operation(
        &self,
        frame: &Activation,
        op: ReflectiveOp,
        receiver: Value,
        arguments: &[Value],
    ) -> VmResult<Value> {
        match op {
            ReflectiveOp::MessageSend => {
                let selector = arguments
                    .first()
                    .and_then(|v| v.as_symbol())
                    .cloned()
                    .ok_or_else(|| VmError::internal("messageSend expects a selector"))?;
                let args = arguments
                    .get(1)
                    .and_then(|v| v.as_array())
                    .map(|a| a.to_vec())
                    .unwrap_or_default();
                self.stats().record_send();
                let resolved = self.resolve_method(&receiver, &selector)?;
                self.invoke_resolved(resolved, receiver, args, frame)
            }
            ReflectiveOp::FieldRead => {
                let key = value_to_key(arguments.first())?;
                let Some(object) = receiver.as_object() else {
                    return Ok(Value::Nil);
                };
                Ok(object.get(&key).unwrap_or(Value::Nil))
            }
            ReflectiveOp::FieldWrite => {
                let key = value_to_key(arguments.first())?;
                let value = arguments.get(1).cloned().unwrap_or(Value::Nil);
                let object = receiver
                    .as_object()
                    .ok_or_else(|| VmError::internal("field write on non-object receiver"))?;
                object.set(self.universe.shapes(), key, value.clone())?;
                Ok(value)
            }
            ReflectiveOp::LocalRead | ReflectiveOp::LocalWrite => Err(VmError::internal(
                "local operations are bound to their own frame",
            )),
        }
    }
}

enum ResolvedSend {
    Method(Arc<Method>),
    NotUnderstood {
        fallback: Arc<Method>,
        selector: Symbol,
    },
}

fn key_to_value(key: &PropertyKey) -> Value {
    match key {
        PropertyKey::Symbol(s) => Value::Symbol(s.clone()),
        PropertyKey::Index(i) => Value::integer(*i as i64),
    }
}

fn value_to_key(value: Option<&Value>) -> VmResult<PropertyKey> {
    match value {
        Some(Value::Symbol(s)) => Ok(PropertyKey::Symbol(s.clone())),
        Some(Value::Integer(i)) if *i >= 0 => Ok(PropertyKey::Index(*i as u32)),
        _ => Err(VmError::internal("expected a symbol or index key")),
    }
}
