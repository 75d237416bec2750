//! The universe: classes, shapes, the reflection switch, and statistics
//!
//! One universe owns everything dispatch needs to agree on globally. Sites
//! and shapes are per-universe, so two universes in one process never share
//! cached state.

use crate::activation::Activation;
use crate::assumption::ReflectionSwitch;
use crate::class::{Class, ClassDescriptor};
use crate::environment::Environment;
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::method::Method;
use crate::object::{ObjectRecord, ObjectRef};
use crate::shape::{ObjectKind, ShapeTable};
use crate::symbol::Symbol;
use crate::value::Value;
use marten_profiler::DispatchStats;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Tunables for a universe
#[derive(Debug, Clone)]
pub struct UniverseConfig {
    /// Maximum activation depth before a send fails with `StackOverflow`
    pub max_stack_depth: usize,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 1024,
        }
    }
}

/// Shared runtime state for one isolated execution world
pub struct Universe {
    classes: RwLock<FxHashMap<Symbol, Arc<Class>>>,
    shapes: ShapeTable,
    reflection: ReflectionSwitch,
    stats: Arc<DispatchStats>,
    max_stack_depth: usize,
    nil_class: Arc<Class>,
    boolean_class: Arc<Class>,
    integer_class: Arc<Class>,
    double_class: Arc<Class>,
    symbol_class: Arc<Class>,
    array_class: Arc<Class>,
    object_class: Arc<Class>,
    block_class: Arc<Class>,
}

impl Universe {
    /// Create a universe with default configuration
    pub fn new() -> Self {
        Self::with_config(UniverseConfig::default())
    }

    /// Create a universe with explicit configuration
    pub fn with_config(config: UniverseConfig) -> Self {
        let object_class = Class::new("Object", None);
        let nil_class = Class::new("Nil", Some(Arc::clone(&object_class)));
        let boolean_class = Class::new("Boolean", Some(Arc::clone(&object_class)));
        let integer_class = Class::new("Integer", Some(Arc::clone(&object_class)));
        let double_class = Class::new("Double", Some(Arc::clone(&object_class)));
        let symbol_class = Class::new("Symbol", Some(Arc::clone(&object_class)));
        let array_class = Class::new("Array", Some(Arc::clone(&object_class)));
        let block_class = Class::new("Block", Some(Arc::clone(&object_class)));

        block_class.install_method(Method::primitive("value", block_value));
        block_class.install_method(Method::primitive("value:", block_value));
        block_class.install_method(Method::primitive("value:value:", block_value));

        let universe = Self {
            classes: RwLock::new(FxHashMap::default()),
            shapes: ShapeTable::new(),
            reflection: ReflectionSwitch::new(),
            stats: Arc::new(DispatchStats::new()),
            max_stack_depth: config.max_stack_depth,
            nil_class,
            boolean_class,
            integer_class,
            double_class,
            symbol_class,
            array_class,
            object_class: Arc::clone(&object_class),
            block_class,
        };
        {
            let mut classes = universe.classes.write();
            for class in [
                &universe.object_class,
                &universe.nil_class,
                &universe.boolean_class,
                &universe.integer_class,
                &universe.double_class,
                &universe.symbol_class,
                &universe.array_class,
                &universe.block_class,
            ] {
                classes.insert(class.name().clone(), Arc::clone(class));
            }
        }
        universe
    }

    /// The universe's shape table
    pub fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }

    /// The global reflection switch
    pub fn reflection(&self) -> &ReflectionSwitch {
        &self.reflection
    }

    /// Dispatch statistics
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Shared handle to the dispatch statistics
    pub fn stats_handle(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Maximum activation depth
    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    /// Activate reflection globally. Returns true when the switch flipped.
    pub fn activate_reflection(&self) -> bool {
        if self.reflection.activate() {
            self.stats.record_assumption_invalidation();
            true
        } else {
            false
        }
    }

    /// Deactivate reflection globally. Returns true when the switch flipped.
    pub fn deactivate_reflection(&self) -> bool {
        if self.reflection.deactivate() {
            self.stats.record_assumption_invalidation();
            true
        } else {
            false
        }
    }

    /// Install a class from its descriptor and register it by name.
    ///
    /// The class's instance shape is built by adding the descriptor's
    /// properties to a fresh root, so instances of classes with identical
    /// property sequences still get distinct roots (one per class).
    pub fn install_class(&self, descriptor: ClassDescriptor) -> Arc<Class> {
        let class = Class::new(&descriptor.name, descriptor.superclass.clone());
        let kind = if descriptor.reflective {
            ObjectKind::Reflective
        } else {
            ObjectKind::Plain
        };
        let mut shape = self.shapes.root(kind, Some(&class));
        for property in &descriptor.instance_properties {
            shape = self.shapes.transition_add(&shape, property.clone());
        }
        class.set_instance_shape(shape);
        self.classes
            .write()
            .insert(class.name().clone(), Arc::clone(&class));
        log::debug!("installed class {}", class.name());
        class
    }

    /// Look up a registered class by name
    pub fn class_named(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.read().get(&Symbol::intern(name)).cloned()
    }

    /// Allocate an instance of `class` from its installed shape
    pub fn new_instance(&self, class: &Arc<Class>) -> VmResult<ObjectRef> {
        let shape = class
            .instance_shape()
            .ok_or_else(|| VmError::internal("class has no instance shape installed"))?;
        Ok(ObjectRecord::new(shape))
    }

    /// Attach an environment to an object's current shape.
    ///
    /// The attachment is visible through every shape derived from this one,
    /// and to every object currently sharing the shape.
    pub fn attach_environment(&self, object: &ObjectRef, environment: Arc<Environment>) {
        object.shape().attach_environment(environment);
    }

    /// Detach the environment from an object's current shape
    pub fn detach_environment(&self, object: &ObjectRef) -> Option<Arc<Environment>> {
        object.shape().detach_environment()
    }

    /// The class of a runtime value
    pub fn class_of(&self, value: &Value) -> Arc<Class> {
        match value {
            Value::Object(object) => object
                .shape()
                .class()
                .unwrap_or_else(|| Arc::clone(&self.object_class)),
            Value::Nil => Arc::clone(&self.nil_class),
            Value::Boolean(_) => Arc::clone(&self.boolean_class),
            Value::Integer(_) => Arc::clone(&self.integer_class),
            Value::Double(_) => Arc::clone(&self.double_class),
            Value::Symbol(_) => Arc::clone(&self.symbol_class),
            Value::Array(_) => Arc::clone(&self.array_class),
            Value::Method(_) => Arc::clone(&self.block_class),
        }
    }

    /// Uncached method resolution: the receiver's class chain
    pub fn lookup_method(&self, receiver: &Value, selector: &Symbol) -> Option<Arc<Method>> {
        self.class_of(receiver).lookup_method(selector)
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Universe")
            .field("classes", &self.classes.read().len())
            .field("reflection_active", &self.reflection.is_active())
            .finish()
    }
}

/// `value`, `value:`, `value:value:` on blocks: run the receiver itself
fn block_value(interpreter: &Interpreter<'_>, frame: &mut Activation) -> VmResult<Value> {
    let receiver = frame.receiver().clone();
    let block = receiver
        .as_method()
        .cloned()
        .ok_or_else(|| VmError::internal("value sent to a non-block receiver"))?;
    let arguments = frame.arguments().to_vec();
    interpreter.call_method(&block, receiver, arguments, frame)
}
