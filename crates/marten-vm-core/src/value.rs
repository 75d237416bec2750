//! Runtime values
//!
//! Marten values are either immediate primitives or shared references to
//! heap records. Reference values compare by identity.

use crate::method::Method;
use crate::object::{ObjectRecord, ObjectRef};
use crate::symbol::Symbol;
use parking_lot::RwLock;
use std::sync::Arc;

/// Coarse classification of a value's runtime type.
///
/// Used by dispatch guards for primitive receivers and by storage type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// The nil value
    Nil,
    /// A boolean
    Boolean,
    /// A 64-bit integer
    Integer,
    /// A 64-bit float
    Double,
    /// An interned symbol
    Symbol,
    /// An indexed array
    Array,
    /// A structured object record
    Object,
    /// A first-class method (block)
    Method,
}

impl ValueKind {
    /// Human-readable name, used in error messages
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "Nil",
            ValueKind::Boolean => "Boolean",
            ValueKind::Integer => "Integer",
            ValueKind::Double => "Double",
            ValueKind::Symbol => "Symbol",
            ValueKind::Array => "Array",
            ValueKind::Object => "Object",
            ValueKind::Method => "Method",
        }
    }
}

/// A mutable indexed collection of values
pub struct VmArray {
    elements: RwLock<Vec<Value>>,
}

impl VmArray {
    /// Create an array from existing elements
    pub fn from_vec(elements: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            elements: RwLock::new(elements),
        })
    }

    /// Create an array of `length` nil elements
    pub fn with_length(length: usize) -> Arc<Self> {
        Self::from_vec(vec![Value::Nil; length])
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }

    /// Element at `index`, or nil when out of bounds
    pub fn at(&self, index: usize) -> Value {
        self.elements
            .read()
            .get(index)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Store `value` at `index`; out-of-bounds stores are ignored
    pub fn at_put(&self, index: usize, value: Value) {
        let mut elements = self.elements.write();
        if index < elements.len() {
            elements[index] = value;
        }
    }

    /// Copy of the elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.elements.read().clone()
    }
}

impl std::fmt::Debug for VmArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmArray")
            .field("len", &self.len())
            .finish()
    }
}

/// A Marten runtime value
#[derive(Debug, Clone)]
pub enum Value {
    /// The nil value
    Nil,
    /// A boolean
    Boolean(bool),
    /// A 64-bit integer
    Integer(i64),
    /// A 64-bit float
    Double(f64),
    /// An interned symbol
    Symbol(Symbol),
    /// An indexed array
    Array(Arc<VmArray>),
    /// A structured object record
    Object(ObjectRef),
    /// A first-class method (block)
    Method(Arc<Method>),
}

impl Value {
    /// Create an integer value
    pub fn integer(i: i64) -> Self {
        Self::Integer(i)
    }

    /// Create a double value
    pub fn double(d: f64) -> Self {
        Self::Double(d)
    }

    /// Create a boolean value
    pub fn boolean(b: bool) -> Self {
        Self::Boolean(b)
    }

    /// Create a symbol value
    pub fn symbol(s: &str) -> Self {
        Self::Symbol(Symbol::intern(s))
    }

    /// Create an array value from elements
    pub fn array(elements: Vec<Value>) -> Self {
        Self::Array(VmArray::from_vec(elements))
    }

    /// The value's kind
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::Symbol(_) => ValueKind::Symbol,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Method(_) => ValueKind::Method,
        }
    }

    /// Whether this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// The integer payload, if any
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The double payload, if any
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The boolean payload, if any
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The symbol payload, if any
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// The object record, if this is a structured object
    pub fn as_object(&self) -> Option<&Arc<ObjectRecord>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The array payload, if any
    pub fn as_array(&self) -> Option<&Arc<VmArray>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The method payload, if any
    pub fn as_method(&self) -> Option<&Arc<Method>> {
        match self {
            Value::Method(m) => Some(m),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Primitives compare by value; reference values compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
