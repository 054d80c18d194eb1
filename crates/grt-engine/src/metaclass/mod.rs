//! Runtime class descriptors
//!
//! A [`MetaClass`] describes one object class: its members, methods and
//! signals, its parent, and the native binding (allocator and member
//! delegates) that implements it. Classes are loaded from XML structure
//! descriptions by the [`MetaClassTable`] and frozen, parent first, once
//! loading ends.

mod loader;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{GrtError, GrtResult};
use crate::types::{ArgSpec, Type, TypeSpec};
use crate::value::{ListRef, ObjectRef, ValueRef};

pub use loader::{parse_structs, ClassDef, ParsedStructs};
pub use registry::{ClassRegistry, MetaClassTable, BASE_CLASS_NAME};

/// Creates new instances of a class
pub type Allocator = Arc<dyn Fn(&Arc<MetaClass>) -> GrtResult<ObjectRef> + Send + Sync>;
/// Computes a delegated member value
pub type MemberGetter = Arc<dyn Fn(&ObjectRef) -> GrtResult<ValueRef> + Send + Sync>;
/// Stores a delegated member value
pub type MemberSetter = Arc<dyn Fn(&ObjectRef, ValueRef) -> GrtResult<()> + Send + Sync>;
/// Native implementation of a method
pub type MethodImpl = Arc<dyn Fn(&ObjectRef, &ListRef) -> GrtResult<ValueRef> + Send + Sync>;

// ============================================================================
// Descriptors
// ============================================================================

/// A member variable of a class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassMember {
    /// Member name
    pub name: String,
    /// Declared type
    pub type_spec: TypeSpec,
    /// Default value as written in the description
    pub default_value: String,
    /// Not settable through the public setter
    pub read_only: bool,
    /// Getter is user implemented
    pub delegate_get: bool,
    /// Setter is user implemented
    pub delegate_set: bool,
    /// Not exposed or stored
    pub private: bool,
    /// Derived value, never stored or serialized
    pub calculated: bool,
    /// Referenced object or container is owned by the holder
    pub owned: bool,
    /// Redeclares a member of an ancestor
    pub overrides: bool,
    /// Null entries allowed in list or dict content
    pub allow_null: bool,
    /// Free-form `attr:*` attributes
    pub attributes: BTreeMap<String, String>,
}

impl ClassMember {
    /// Object members that are not owned are held weakly
    pub fn is_weak_reference(&self) -> bool {
        self.type_spec.base.kind == Type::Object && !self.owned
    }
}

/// A method of a class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassMethod {
    /// Method name
    pub name: String,
    /// Return type
    pub ret_type: TypeSpec,
    /// Arguments
    pub arg_types: Vec<ArgSpec>,
    /// Acts as a constructor
    pub constructor: bool,
    /// Has no implementation in this class
    pub is_abstract: bool,
}

/// A signal declared by a class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassSignal {
    /// Signal name
    pub name: String,
    /// Argument list
    pub arg_types: Vec<ArgSpec>,
}

// ============================================================================
// Native binding
// ============================================================================

/// Native implementation attached to a class
#[derive(Clone, Default)]
pub struct ClassBinding {
    allocator: Option<Allocator>,
    getters: FxHashMap<String, MemberGetter>,
    setters: FxHashMap<String, MemberSetter>,
    methods: FxHashMap<String, MethodImpl>,
}

impl ClassBinding {
    /// Binding without an allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding that allocates plain property-bag objects
    pub fn generic() -> Self {
        Self::with_allocator(|class: &Arc<MetaClass>| ObjectRef::new_generic(class))
    }

    /// Binding with a custom allocator
    pub fn with_allocator<F>(allocator: F) -> Self
    where
        F: Fn(&Arc<MetaClass>) -> GrtResult<ObjectRef> + Send + Sync + 'static,
    {
        Self {
            allocator: Some(Arc::new(allocator)),
            ..Self::default()
        }
    }

    /// Register a getter for a delegated or calculated member
    pub fn getter<F>(mut self, member: &str, getter: F) -> Self
    where
        F: Fn(&ObjectRef) -> GrtResult<ValueRef> + Send + Sync + 'static,
    {
        self.getters.insert(member.to_string(), Arc::new(getter));
        self
    }

    /// Register a setter for a delegated or calculated member
    pub fn setter<F>(mut self, member: &str, setter: F) -> Self
    where
        F: Fn(&ObjectRef, ValueRef) -> GrtResult<()> + Send + Sync + 'static,
    {
        self.setters.insert(member.to_string(), Arc::new(setter));
        self
    }

    /// Register a method implementation
    pub fn method<F>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&ObjectRef, &ListRef) -> GrtResult<ValueRef> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    /// True if instances can be allocated
    pub fn has_allocator(&self) -> bool {
        self.allocator.is_some()
    }
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding")
            .field("allocator", &self.allocator.is_some())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// MetaClass
// ============================================================================

/// Runtime descriptor of an object class
pub struct MetaClass {
    name: String,
    parent: Option<Arc<MetaClass>>,
    source: String,
    attributes: BTreeMap<String, String>,
    members: BTreeMap<String, ClassMember>,
    member_attributes: BTreeMap<String, BTreeMap<String, String>>,
    methods: BTreeMap<String, ClassMethod>,
    signals: Vec<ClassSignal>,
    impl_data: bool,
    force_impl: bool,
    watch_lists: bool,
    watch_dicts: bool,
    crc32: u32,
    binding: RwLock<ClassBinding>,
}

impl MetaClass {
    /// Freeze a loaded definition under an already frozen parent
    pub(crate) fn from_def(def: ClassDef, parent: Option<Arc<MetaClass>>) -> Self {
        let parent_name = parent.as_ref().map(|p| p.name.clone()).unwrap_or_default();
        let crc32 = compute_checksum(&def.name, &parent_name, &def.members, &def.methods);
        Self {
            name: def.name,
            parent,
            source: def.source,
            attributes: def.attributes,
            members: def.members,
            member_attributes: def.member_attributes,
            methods: def.methods,
            signals: def.signals,
            impl_data: def.impl_data,
            force_impl: def.force_impl,
            watch_lists: def.watch_lists,
            watch_dicts: def.watch_dicts,
            crc32,
            binding: RwLock::new(ClassBinding::default()),
        }
    }

    /// The built-in root class
    pub(crate) fn base() -> Self {
        Self::from_def(
            ClassDef {
                name: BASE_CLASS_NAME.to_string(),
                ..ClassDef::default()
            },
            None,
        )
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent class
    pub fn parent(&self) -> Option<&Arc<MetaClass>> {
        self.parent.as_ref()
    }

    /// Description file the class came from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// CRC32 of the class shape
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// `impl-data` flag from the description
    pub fn impl_data(&self) -> bool {
        self.impl_data
    }

    /// `force-impl` flag from the description
    pub fn force_impl(&self) -> bool {
        self.force_impl
    }

    /// `watch-lists` flag from the description
    pub fn watch_lists(&self) -> bool {
        self.watch_lists
    }

    /// `watch-dicts` flag from the description
    pub fn watch_dicts(&self) -> bool {
        self.watch_dicts
    }

    /// Signals declared by this class only
    pub fn own_signals(&self) -> &[ClassSignal] {
        &self.signals
    }

    /// Members declared by this class only
    pub fn own_members(&self) -> impl Iterator<Item = &ClassMember> {
        self.members.values()
    }

    fn ancestry(&self) -> impl Iterator<Item = &MetaClass> {
        std::iter::successors(Some(self), |&class| class.parent.as_deref())
    }

    /// True if this class or an ancestor is named `name`
    pub fn is_a(&self, name: &str) -> bool {
        self.ancestry().any(|class| class.name == name)
    }

    /// True if this class is `other` or derives from it
    pub fn is_a_class(&self, other: &MetaClass) -> bool {
        self.is_a(&other.name)
    }

    /// Attribute lookup walking up the parents
    pub fn get_attribute(&self, key: &str) -> Option<&str> {
        self.ancestry()
            .find_map(|class| class.attributes.get(key).map(String::as_str))
    }

    /// Attribute of a member, walking up the parents
    ///
    /// A class that only overrides attributes of an inherited member wins
    /// over the class declaring it.
    pub fn member_attribute(&self, member: &str, key: &str) -> Option<&str> {
        self.ancestry().find_map(|class| {
            class
                .member_attributes
                .get(member)
                .and_then(|attrs| attrs.get(key))
                .or_else(|| class.members.get(member).and_then(|m| m.attributes.get(key)))
                .map(String::as_str)
        })
    }

    /// Visit every member once, most-derived definition first
    ///
    /// Stops early and returns `false` when the callback does.
    pub fn foreach_member<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&ClassMember) -> bool,
    {
        let mut seen = FxHashSet::default();
        for class in self.ancestry() {
            for member in class.members.values() {
                if seen.insert(member.name.as_str()) && !f(member) {
                    return false;
                }
            }
        }
        true
    }

    /// Visit every method once, most-derived definition first
    pub fn foreach_method<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&ClassMethod) -> bool,
    {
        let mut seen = FxHashSet::default();
        for class in self.ancestry() {
            for method in class.methods.values() {
                if seen.insert(method.name.as_str()) && !f(method) {
                    return false;
                }
            }
        }
        true
    }

    /// Visit every signal once, most-derived definition first
    pub fn foreach_signal<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&ClassSignal) -> bool,
    {
        let mut seen = FxHashSet::default();
        for class in self.ancestry() {
            for signal in &class.signals {
                if seen.insert(signal.name.as_str()) && !f(signal) {
                    return false;
                }
            }
        }
        true
    }

    /// Most-derived member descriptor
    pub fn get_member_info(&self, name: &str) -> Option<&ClassMember> {
        self.ancestry().find_map(|class| class.members.get(name))
    }

    /// Most-derived method descriptor
    pub fn get_method_info(&self, name: &str) -> Option<&ClassMethod> {
        self.ancestry().find_map(|class| class.methods.get(name))
    }

    /// True if the member exists in this class or an ancestor
    pub fn has_member(&self, name: &str) -> bool {
        self.get_member_info(name).is_some()
    }

    /// True if the method exists in this class or an ancestor
    pub fn has_method(&self, name: &str) -> bool {
        self.get_method_info(name).is_some()
    }

    /// True if some resolved method is abstract and has no native implementation
    pub fn is_abstract(&self) -> bool {
        let mut found = false;
        self.foreach_method(|method| {
            if method.is_abstract && self.method_impl(&method.name).is_none() {
                found = true;
                return false;
            }
            true
        });
        found
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Attach a native implementation
    pub fn bind(&self, binding: ClassBinding) {
        *self.binding.write() = binding;
    }

    /// True if an allocator is bound
    pub fn is_bound(&self) -> bool {
        self.binding.read().allocator.is_some()
    }

    fn getter(&self, member: &str) -> Option<MemberGetter> {
        self.ancestry()
            .find_map(|class| class.binding.read().getters.get(member).cloned())
    }

    fn setter(&self, member: &str) -> Option<MemberSetter> {
        self.ancestry()
            .find_map(|class| class.binding.read().setters.get(member).cloned())
    }

    fn method_impl(&self, method: &str) -> Option<MethodImpl> {
        self.ancestry()
            .find_map(|class| class.binding.read().methods.get(method).cloned())
    }

    /// Create a new instance through the bound allocator
    pub fn allocate(self: &Arc<Self>) -> GrtResult<ObjectRef> {
        let allocator = self.binding.read().allocator.clone();
        match allocator {
            Some(allocator) => allocator(self),
            None if self.is_abstract() => Err(GrtError::Abstract(self.name.clone())),
            None => Err(GrtError::Unbound(self.name.clone())),
        }
    }

    // ------------------------------------------------------------------------
    // Reflective member access
    // ------------------------------------------------------------------------

    fn member_or_err(&self, name: &str) -> GrtResult<&ClassMember> {
        self.get_member_info(name)
            .ok_or_else(|| GrtError::BadItem(format!("{}::{}", self.name, name)))
    }

    /// Read a member, going through a getter when one is registered
    pub fn get_member_value(&self, object: &ObjectRef, name: &str) -> GrtResult<ValueRef> {
        let member = self.member_or_err(name)?;
        if let Some(getter) = self.getter(name) {
            return getter(object);
        }
        if member.calculated {
            return Err(GrtError::MissingDelegate {
                class: self.name.clone(),
                member: name.to_string(),
            });
        }
        Ok(object.inner()?.raw_get(name))
    }

    /// Public setter: read-only members are rejected
    pub fn set_member_value(&self, object: &ObjectRef, name: &str, value: ValueRef) -> GrtResult<()> {
        self.set_member_internal(object, name, value, false)
    }

    /// Setter used by the unserializer and undo; `force` bypasses read-only
    pub fn set_member_internal(
        &self,
        object: &ObjectRef,
        name: &str,
        value: ValueRef,
        force: bool,
    ) -> GrtResult<()> {
        let member = self.member_or_err(name)?;
        if member.read_only && !force {
            return Err(GrtError::ReadOnly {
                class: self.name.clone(),
                member: name.to_string(),
            });
        }
        value.check_assignable(&member.type_spec.base, true)?;
        if let Some(setter) = self.setter(name) {
            return setter(object, value);
        }
        if member.calculated {
            return Err(GrtError::MissingDelegate {
                class: self.name.clone(),
                member: name.to_string(),
            });
        }
        object
            .inner()?
            .raw_set(name, value, member.is_weak_reference());
        Ok(())
    }

    /// Invoke a method through its native implementation
    pub fn call_method(&self, object: &ObjectRef, name: &str, args: &ListRef) -> GrtResult<ValueRef> {
        let method = self
            .get_method_info(name)
            .ok_or_else(|| GrtError::BadItem(format!("{}::{}()", self.name, name)))?;
        if args.count() != method.arg_types.len() {
            return Err(GrtError::BadItem(format!(
                "{}::{}() takes {} arguments, {} given",
                self.name,
                name,
                method.arg_types.len(),
                args.count()
            )));
        }
        let implementation = self.method_impl(name).ok_or_else(|| GrtError::MissingDelegate {
            class: self.name.clone(),
            member: name.to_string(),
        })?;
        implementation(object, args)
    }
}

impl fmt::Debug for MetaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaClass")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .field("crc32", &format_args!("{:#010x}", self.crc32))
            .finish()
    }
}

// ============================================================================
// Shape checksum
// ============================================================================

fn flag(b: bool) -> i32 {
    i32::from(b)
}

/// CRC32 over a normalized dump of the declared members and methods
pub(crate) fn compute_checksum(
    name: &str,
    parent: &str,
    members: &BTreeMap<String, ClassMember>,
    methods: &BTreeMap<String, ClassMethod>,
) -> u32 {
    let mut lines: Vec<String> = Vec::with_capacity(members.len() + methods.len() + 1);
    for member in members.values() {
        let t = &member.type_spec;
        lines.push(format!(
            "{} {} {} {} {} {} {} {} {} {}",
            member.name,
            t.base.kind.code(),
            t.base.object_class,
            t.content.kind.code(),
            t.content.object_class,
            flag(member.read_only),
            flag(member.delegate_get),
            flag(member.delegate_set),
            flag(member.private),
            flag(member.calculated),
        ));
    }
    for method in methods.values() {
        let t = &method.ret_type;
        let mut line = format!(
            "{} {} {} {} {}",
            method.name,
            t.base.kind.code(),
            t.base.object_class,
            t.content.kind.code(),
            t.content.object_class
        );
        for arg in &method.arg_types {
            let a = &arg.type_spec;
            line.push_str(&format!(
                "= {} {} {} {} {}",
                arg.name,
                a.base.kind.code(),
                a.base.object_class,
                a.content.kind.code(),
                a.content.object_class
            ));
        }
        lines.push(line);
    }
    lines.sort();
    lines.insert(0, format!("{} : {}", name, parent));
    crc32fast::hash(lines.concat().as_bytes())
}
