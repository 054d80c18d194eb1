//! Typed views over [`ValueRef`]

use std::fmt;
use std::marker::PhantomData;

use super::{Value, ValueRef};
use crate::error::{GrtError, GrtResult};
use crate::types::Type;

/// Marker trait tying a view type to its runtime tag
pub trait ValueKind {
    /// Runtime tag accepted by the view
    const TYPE: Type;
}

/// View markers
pub mod kind {
    use super::ValueKind;
    use crate::types::Type;

    /// Integer view
    pub struct Integer;
    /// Double view
    pub struct Double;
    /// String view
    pub struct String;
    /// List view
    pub struct List;
    /// Dict view
    pub struct Dict;
    /// Object view
    pub struct Object;

    impl ValueKind for Integer {
        const TYPE: Type = Type::Integer;
    }
    impl ValueKind for Double {
        const TYPE: Type = Type::Double;
    }
    impl ValueKind for String {
        const TYPE: Type = Type::String;
    }
    impl ValueKind for List {
        const TYPE: Type = Type::List;
    }
    impl ValueKind for Dict {
        const TYPE: Type = Type::Dict;
    }
    impl ValueKind for Object {
        const TYPE: Type = Type::Object;
    }
}

/// A [`ValueRef`] known to be null or of type `K`
pub struct Ref<K> {
    value: ValueRef,
    _kind: PhantomData<fn() -> K>,
}

/// Integer view
pub type IntegerRef = Ref<kind::Integer>;
/// Double view
pub type DoubleRef = Ref<kind::Double>;
/// String view
pub type StringRef = Ref<kind::String>;
/// List view
pub type ListRef = Ref<kind::List>;
/// Dict view
pub type DictRef = Ref<kind::Dict>;
/// Object view
pub type ObjectRef = Ref<kind::Object>;

impl<K: ValueKind> Ref<K> {
    /// Checked cast; a null input gives a null view, a wrong type is an error
    pub fn cast_from(value: &ValueRef) -> GrtResult<Self> {
        if value.is_valid() && value.value_type() != K::TYPE {
            return Err(GrtError::type_error(K::TYPE, value.value_type()));
        }
        Ok(Self::wrap(value.clone()))
    }

    /// True if [`Ref::cast_from`] would succeed with a non-null view
    pub fn can_wrap(value: &ValueRef) -> bool {
        value.value_type() == K::TYPE
    }

    /// The null view
    pub fn invalid() -> Self {
        Self::wrap(ValueRef::invalid())
    }

    pub(crate) fn wrap(value: ValueRef) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }

    /// True unless null
    pub fn is_valid(&self) -> bool {
        self.value.is_valid()
    }

    /// Untyped handle
    pub fn as_value(&self) -> &ValueRef {
        &self.value
    }

    /// Consume into the untyped handle
    pub fn into_value(self) -> ValueRef {
        self.value
    }

    /// Number of strong handles
    pub fn refcount(&self) -> usize {
        self.value.refcount()
    }

    /// Same underlying value
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.value.ptr_eq(&other.value)
    }

    pub(crate) fn payload(&self) -> GrtResult<&Value> {
        self.value
            .get()
            .ok_or_else(|| GrtError::NullValue(format!("access to null {}", K::TYPE)))
    }
}

impl<K> Clone for Ref<K> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ValueKind> Default for Ref<K> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<K> PartialEq for Ref<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value.equals(&other.value)
    }
}

impl<K> fmt::Debug for Ref<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.value, f)
    }
}

impl<K> From<Ref<K>> for ValueRef {
    fn from(r: Ref<K>) -> Self {
        r.value
    }
}

impl<K> From<&Ref<K>> for ValueRef {
    fn from(r: &Ref<K>) -> Self {
        r.value.clone()
    }
}

// ============================================================================
// Primitive views
// ============================================================================

impl IntegerRef {
    /// New integer value
    pub fn new(value: i64) -> Self {
        Self::wrap(ValueRef::integer(value))
    }

    /// The integer, if not null
    pub fn value(&self) -> Option<i64> {
        self.value.as_int()
    }
}

impl DoubleRef {
    /// New double value
    pub fn new(value: f64) -> Self {
        Self::wrap(ValueRef::double(value))
    }

    /// The double, if not null
    pub fn value(&self) -> Option<f64> {
        self.value.as_double()
    }
}

impl StringRef {
    /// New string value
    pub fn new(value: impl Into<String>) -> Self {
        Self::wrap(ValueRef::string(value))
    }

    /// The string, if not null
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

// ============================================================================
// Class-typed object wrappers
// ============================================================================

/// A typed wrapper over objects of one metaclass
///
/// Implementors get checked downcasts through [`ObjectRef::downcast`] and
/// allocation through `Grt::create`.
pub trait GrtObject: Sized {
    /// Name of the metaclass the wrapper represents
    const CLASS_NAME: &'static str;

    /// Wrap an object already known to be an instance of `CLASS_NAME`
    fn from_object(object: ObjectRef) -> Self;

    /// The wrapped object
    fn object(&self) -> &ObjectRef;
}

impl ObjectRef {
    /// Cast that also requires the object to be an instance of `class_name`
    pub fn cast_to_class(value: &ValueRef, class_name: &str) -> GrtResult<Self> {
        let object = Self::cast_from(value)?;
        if let Ok(inner) = object.inner() {
            if !inner.class().is_a(class_name) {
                return Err(GrtError::class_error(class_name, inner.class().name()));
            }
        }
        Ok(object)
    }

    /// Checked conversion to a class-typed wrapper
    pub fn downcast<T: GrtObject>(&self) -> GrtResult<T> {
        let object = Self::cast_to_class(&self.value, T::CLASS_NAME)?;
        Ok(T::from_object(object))
    }
}
