//! Classes and method tables
//!
//! Method lookup walks the superclass chain. The instance shape installed
//! for a class is the root shape new instances start from; its identity is
//! what send-site guards key on.

use crate::method::Method;
use crate::shape::{PropertyDescriptor, Shape};
use crate::symbol::Symbol;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A class: a name, an optional superclass, and a method table
pub struct Class {
    name: Symbol,
    superclass: Option<Arc<Class>>,
    methods: RwLock<FxHashMap<Symbol, Arc<Method>>>,
    instance_shape: RwLock<Option<Arc<Shape>>>,
}

impl Class {
    /// Create a class with an empty method table
    pub fn new(name: &str, superclass: Option<Arc<Class>>) -> Arc<Self> {
        Arc::new(Self {
            name: Symbol::intern(name),
            superclass,
            methods: RwLock::new(FxHashMap::default()),
            instance_shape: RwLock::new(None),
        })
    }

    /// The class name
    pub fn name(&self) -> &Symbol {
        &self.name
    }

    /// The superclass, if any
    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    /// Install (or replace) a method under its selector
    pub fn install_method(&self, method: Arc<Method>) {
        self.methods
            .write()
            .insert(method.selector().clone(), method);
    }

    /// Resolve a selector, walking the superclass chain
    pub fn lookup_method(&self, selector: &Symbol) -> Option<Arc<Method>> {
        if let Some(method) = self.methods.read().get(selector).cloned() {
            return Some(method);
        }
        let mut current = self.superclass.clone();
        while let Some(class) = current {
            if let Some(method) = class.methods.read().get(selector).cloned() {
                return Some(method);
            }
            current = class.superclass.clone();
        }
        None
    }

    /// The root shape new instances start from, once installed
    pub fn instance_shape(&self) -> Option<Arc<Shape>> {
        self.instance_shape.read().clone()
    }

    /// Install the root shape for new instances
    pub fn set_instance_shape(&self, shape: Arc<Shape>) {
        *self.instance_shape.write() = Some(shape);
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("methods", &self.methods.read().len())
            .finish()
    }
}

/// Declarative description of a class, consumed by the universe
#[derive(Debug)]
pub struct ClassDescriptor {
    /// The class name
    pub name: String,
    /// The superclass, if any
    pub superclass: Option<Arc<Class>>,
    /// Properties every instance starts with
    pub instance_properties: Vec<PropertyDescriptor>,
    /// Whether instances participate in object-scoped MOP lookup
    pub reflective: bool,
}

impl ClassDescriptor {
    /// A plain class with no initial properties
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            instance_properties: Vec::new(),
            reflective: false,
        }
    }

    /// A reflective class with no initial properties
    pub fn reflective(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            instance_properties: Vec::new(),
            reflective: true,
        }
    }

    /// Set the superclass
    pub fn with_superclass(mut self, superclass: Arc<Class>) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Add an initial instance property
    pub fn with_property(mut self, descriptor: PropertyDescriptor) -> Self {
        self.instance_properties.push(descriptor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn noop(selector: &str) -> Arc<Method> {
        Method::primitive(selector, |_, _| Ok(Value::Nil))
    }

    #[test]
    fn test_lookup_walks_superclass_chain() {
        let base = Class::new("Base", None);
        base.install_method(noop("greet"));
        let derived = Class::new("Derived", Some(Arc::clone(&base)));

        assert!(derived.lookup_method(&Symbol::intern("greet")).is_some());
        assert!(derived.lookup_method(&Symbol::intern("missing")).is_none());
    }

    #[test]
    fn test_subclass_method_shadows_superclass() {
        let base = Class::new("Base", None);
        base.install_method(noop("greet"));
        let derived = Class::new("Derived", Some(base));
        let own = noop("greet");
        derived.install_method(Arc::clone(&own));

        let found = derived.lookup_method(&Symbol::intern("greet")).unwrap();
        assert!(Arc::ptr_eq(&found, &own));
    }

    #[test]
    fn test_descriptor_builders() {
        let base = Class::new("Base", None);
        let descriptor = ClassDescriptor::reflective("Point")
            .with_superclass(base)
            .with_property(PropertyDescriptor::inline_integer("x"))
            .with_property(PropertyDescriptor::inline_integer("y"));
        assert!(descriptor.reflective);
        assert_eq!(descriptor.instance_properties.len(), 2);
        assert!(descriptor.superclass.is_some());
    }
}
