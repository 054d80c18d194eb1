//! Reference-counted runtime values
//!
//! Every GRT value lives behind an [`Arc`]; a [`ValueRef`] is a nullable
//! strong handle whose clone retains and whose drop releases. Containers and
//! objects use interior locks so handles can be shared across threads, while
//! structural mutation is expected to stay on one thread.
//!
//! Typed views over a [`ValueRef`] are provided by [`Ref`] and its aliases
//! ([`IntegerRef`], [`ListRef`], [`ObjectRef`], ...).

mod dict;
mod list;
mod object;
mod typed;

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use crate::error::{GrtError, GrtResult};
use crate::types::{SimpleTypeSpec, Type};

pub use dict::Dict;
pub use list::List;
pub use object::{Object, ObjectId};
pub use typed::{
    kind, DictRef, DoubleRef, GrtObject, IntegerRef, ListRef, ObjectRef, Ref, StringRef,
    ValueKind,
};

/// Payload of a runtime value
pub enum Value {
    /// Integer value
    Integer(i64),
    /// Floating point value
    Double(f64),
    /// String value
    String(String),
    /// List container
    List(List),
    /// Dict container
    Dict(Dict),
    /// Object instance
    Object(Object),
}

impl Value {
    /// Runtime type tag
    pub fn value_type(&self) -> Type {
        match self {
            Value::Integer(_) => Type::Integer,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::List(_) => Type::List,
            Value::Dict(_) => Type::Dict,
            Value::Object(_) => Type::Object,
        }
    }
}

// ============================================================================
// Interned values
// ============================================================================

static INT_ZERO: Lazy<ValueRef> = Lazy::new(|| ValueRef::from_value(Value::Integer(0)));
static INT_ONE: Lazy<ValueRef> = Lazy::new(|| ValueRef::from_value(Value::Integer(1)));
static DOUBLE_ZERO: Lazy<ValueRef> = Lazy::new(|| ValueRef::from_value(Value::Double(0.0)));
static DOUBLE_ONE: Lazy<ValueRef> = Lazy::new(|| ValueRef::from_value(Value::Double(1.0)));
static EMPTY_STRING: Lazy<ValueRef> =
    Lazy::new(|| ValueRef::from_value(Value::String(String::new())));

// ============================================================================
// ValueRef
// ============================================================================

/// Nullable strong handle to a runtime value
#[derive(Clone, Default)]
pub struct ValueRef(Option<Arc<Value>>);

impl ValueRef {
    /// The null handle
    pub fn invalid() -> Self {
        ValueRef(None)
    }

    pub(crate) fn from_value(value: Value) -> Self {
        ValueRef(Some(Arc::new(value)))
    }

    /// Integer value; 0 and 1 are shared instances
    pub fn integer(value: i64) -> Self {
        match value {
            0 => INT_ZERO.clone(),
            1 => INT_ONE.clone(),
            _ => Self::from_value(Value::Integer(value)),
        }
    }

    /// Double value; 0.0 and 1.0 are shared instances
    pub fn double(value: f64) -> Self {
        if value.to_bits() == 0.0f64.to_bits() {
            DOUBLE_ZERO.clone()
        } else if value == 1.0 {
            DOUBLE_ONE.clone()
        } else {
            Self::from_value(Value::Double(value))
        }
    }

    /// String value; the empty string is a shared instance
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            EMPTY_STRING.clone()
        } else {
            Self::from_value(Value::String(value))
        }
    }

    /// True unless this is the null handle
    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    /// Runtime type, [`Type::Unknown`] for null
    pub fn value_type(&self) -> Type {
        self.0.as_deref().map_or(Type::Unknown, Value::value_type)
    }

    /// Borrow the payload
    pub fn get(&self) -> Option<&Value> {
        self.0.as_deref()
    }

    /// Number of strong handles to the value (0 for null)
    pub fn refcount(&self) -> usize {
        self.0.as_ref().map_or(0, Arc::strong_count)
    }

    /// Take an additional strong reference
    pub fn retain(&self) -> ValueRef {
        self.clone()
    }

    /// Give up this reference; the value is destroyed when it was the last one
    pub fn release(self) {
        drop(self)
    }

    /// Weak handle that does not keep the value alive
    pub fn downgrade(&self) -> WeakValueRef {
        WeakValueRef(self.0.as_ref().map_or_else(Weak::new, Arc::downgrade))
    }

    /// Address based identity, 0 for null
    pub fn identity(&self) -> usize {
        self.0.as_ref().map_or(0, |v| Arc::as_ptr(v) as usize)
    }

    /// True when both handles point at the same value
    pub fn ptr_eq(&self, other: &ValueRef) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self.get() {
            Some(Value::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// Double payload
    pub fn as_double(&self) -> Option<f64> {
        match self.get() {
            Some(Value::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self.get() {
            Some(Value::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Value equality: identity, or same type and equal primitive contents
    ///
    /// Lists, dicts and objects are only equal to themselves.
    pub fn equals(&self, other: &ValueRef) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.get(), other.get()) {
            (Some(Value::Integer(a)), Some(Value::Integer(b))) => a == b,
            (Some(Value::Double(a)), Some(Value::Double(b))) => a == b,
            (Some(Value::String(a)), Some(Value::String(b))) => a == b,
            _ => false,
        }
    }

    /// Arbitrary total order: null first, then by type, then by contents or identity
    pub fn less_than(&self, other: &ValueRef) -> bool {
        match (self.get(), other.get()) {
            (None, None) => false,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => {
                let (ta, tb) = (a.value_type(), b.value_type());
                if ta != tb {
                    return ta < tb;
                }
                match (a, b) {
                    (Value::Integer(x), Value::Integer(y)) => x < y,
                    (Value::Double(x), Value::Double(y)) => x.total_cmp(y).is_lt(),
                    (Value::String(x), Value::String(y)) => x < y,
                    _ => self.identity() < other.identity(),
                }
            }
        }
    }

    /// Check the value against a content type; null only passes when allowed
    pub fn check_assignable(&self, spec: &SimpleTypeSpec, allow_null: bool) -> GrtResult<()> {
        let Some(value) = self.get() else {
            return if allow_null {
                Ok(())
            } else {
                Err(GrtError::NullValue(format!("null value where {} expected", spec)))
            };
        };
        let actual = value.value_type();
        if spec.kind == Type::Unknown {
            return Ok(());
        }
        if spec.kind != actual {
            return Err(GrtError::type_error(spec.kind, actual));
        }
        if let Value::Object(object) = value {
            if !spec.object_class.is_empty() && !object.class().is_a(&spec.object_class) {
                return Err(GrtError::class_error(&spec.object_class, object.class().name()));
            }
        }
        Ok(())
    }

    /// Textual dump of the value, cycle safe
    pub fn debug_description(&self) -> String {
        let mut out = String::new();
        let mut seen = FxHashSet::default();
        describe(self, 0, &mut seen, &mut out);
        out
    }
}

fn describe(value: &ValueRef, depth: usize, seen: &mut FxHashSet<usize>, out: &mut String) {
    let indent = "  ".repeat(depth);
    match value.get() {
        None => out.push_str("NULL"),
        Some(Value::Integer(v)) => out.push_str(&v.to_string()),
        Some(Value::Double(v)) => out.push_str(&v.to_string()),
        Some(Value::String(v)) => out.push_str(&format!("{:?}", v)),
        Some(Value::List(list)) => {
            if !seen.insert(value.identity()) {
                out.push_str("[...]");
                return;
            }
            out.push_str("[\n");
            for item in list.items() {
                out.push_str(&indent);
                out.push_str("  ");
                describe(&item, depth + 1, seen, out);
                out.push_str(",\n");
            }
            out.push_str(&indent);
            out.push(']');
        }
        Some(Value::Dict(dict)) => {
            if !seen.insert(value.identity()) {
                out.push_str("{...}");
                return;
            }
            out.push_str("{\n");
            for (key, item) in dict.entries() {
                out.push_str(&format!("{}  {} = ", indent, key));
                describe(&item, depth + 1, seen, out);
                out.push_str(";\n");
            }
            out.push_str(&indent);
            out.push('}');
        }
        Some(Value::Object(object)) => {
            out.push_str(&format!("{{{}:{}", object.class().name(), object.id()));
            if !seen.insert(value.identity()) {
                out.push_str(" ...}");
                return;
            }
            out.push('\n');
            let object_ref = ObjectRef::wrap(value.clone());
            object.class().foreach_member(|member| {
                if member.calculated {
                    return true;
                }
                let item = object_ref.get_member(&member.name).unwrap_or_default();
                out.push_str(&format!("{}  {} = ", indent, member.name));
                describe(&item, depth + 1, seen, out);
                out.push_str(";\n");
                true
            });
            out.push_str(&indent);
            out.push('}');
        }
    }
}

impl PartialEq for ValueRef {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl PartialOrd for ValueRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.equals(other) {
            Some(Ordering::Equal)
        } else if self.less_than(other) {
            Some(Ordering::Less)
        } else {
            Some(Ordering::Greater)
        }
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            None => f.write_str("NULL"),
            Some(Value::Integer(v)) => write!(f, "{}", v),
            Some(Value::Double(v)) => write!(f, "{:?}", v),
            Some(Value::String(v)) => write!(f, "{:?}", v),
            Some(Value::List(l)) => write!(f, "list<{}>[{}]", l.content_type(), l.count()),
            Some(Value::Dict(d)) => write!(f, "dict<{}>[{}]", d.content_type(), d.count()),
            Some(Value::Object(o)) => write!(f, "{}({})", o.class().name(), o.id()),
        }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_description())
    }
}

impl From<i64> for ValueRef {
    fn from(v: i64) -> Self {
        ValueRef::integer(v)
    }
}

impl From<i32> for ValueRef {
    fn from(v: i32) -> Self {
        ValueRef::integer(i64::from(v))
    }
}

impl From<f64> for ValueRef {
    fn from(v: f64) -> Self {
        ValueRef::double(v)
    }
}

impl From<&str> for ValueRef {
    fn from(v: &str) -> Self {
        ValueRef::string(v)
    }
}

impl From<String> for ValueRef {
    fn from(v: String) -> Self {
        ValueRef::string(v)
    }
}

// ============================================================================
// WeakValueRef
// ============================================================================

/// Non-owning handle; upgrading yields null once the value is gone
#[derive(Clone, Default)]
pub struct WeakValueRef(Weak<Value>);

impl WeakValueRef {
    /// Strong handle if the value is still alive
    pub fn upgrade(&self) -> ValueRef {
        ValueRef(self.0.upgrade())
    }

    /// True while some strong handle exists
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for WeakValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weak({:?})", self.upgrade())
    }
}
