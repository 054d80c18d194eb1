//! Object values

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{DictRef, ListRef, ObjectRef, Value, ValueRef, WeakValueRef};
use crate::error::{GrtError, GrtResult};
use crate::metaclass::MetaClass;
use crate::types::Type;
use crate::util::get_guid;

/// Unique object identifier
pub type ObjectId = String;

enum Slot {
    Strong(ValueRef),
    Weak(WeakValueRef),
}

impl Slot {
    fn value(&self) -> ValueRef {
        match self {
            Slot::Strong(v) => v.clone(),
            Slot::Weak(w) => w.upgrade(),
        }
    }
}

/// Instance storage: identity, class and member slots
///
/// Owned members and containers are held strongly. Object members that are
/// not owned are held weakly so back references do not form cycles.
pub struct Object {
    id: RwLock<ObjectId>,
    class: Arc<MetaClass>,
    slots: RwLock<FxHashMap<String, Slot>>,
}

impl Object {
    fn new(class: Arc<MetaClass>) -> Self {
        Self {
            id: RwLock::new(get_guid()),
            class,
            slots: RwLock::new(FxHashMap::default()),
        }
    }

    /// Object id
    pub fn id(&self) -> ObjectId {
        self.id.read().clone()
    }

    pub(crate) fn set_id(&self, id: &str) {
        *self.id.write() = id.to_string();
    }

    /// Metaclass of the object
    pub fn class(&self) -> &Arc<MetaClass> {
        &self.class
    }

    /// Stored member value without going through delegates
    pub fn raw_get(&self, name: &str) -> ValueRef {
        self.slots
            .read()
            .get(name)
            .map(Slot::value)
            .unwrap_or_default()
    }

    pub(crate) fn raw_set(&self, name: &str, value: ValueRef, weak: bool) {
        let slot = if weak {
            Slot::Weak(value.downgrade())
        } else {
            Slot::Strong(value)
        };
        self.slots.write().insert(name.to_string(), slot);
    }
}

// ============================================================================
// ObjectRef
// ============================================================================

impl ObjectRef {
    /// Allocate a property-bag instance with members set to their defaults
    ///
    /// List and dict members start out as empty containers of the declared
    /// content type.
    pub fn new_generic(class: &Arc<MetaClass>) -> GrtResult<ObjectRef> {
        let object = Object::new(class.clone());
        class.foreach_member(|member| {
            if member.calculated || member.private {
                return true;
            }
            let spec = &member.type_spec;
            let default = member.default_value.as_str();
            let value = match spec.base.kind {
                Type::Integer => ValueRef::integer(default.parse().unwrap_or(0)),
                Type::Double => ValueRef::double(default.parse().unwrap_or(0.0)),
                Type::String => ValueRef::string(default),
                Type::List => ListRef::with_null_policy(spec.content.clone(), member.allow_null).into(),
                Type::Dict => DictRef::with_null_policy(spec.content.clone(), member.allow_null).into(),
                Type::Object | Type::Unknown => return true,
            };
            object.raw_set(&member.name, value, false);
            true
        });
        Ok(Self::wrap(ValueRef::from_value(Value::Object(object))))
    }

    /// The object payload
    pub fn inner(&self) -> GrtResult<&Object> {
        match self.payload()? {
            Value::Object(object) => Ok(object),
            other => Err(GrtError::type_error(Type::Object, other.value_type())),
        }
    }

    /// Object id, empty for null
    pub fn id(&self) -> ObjectId {
        self.inner().map(Object::id).unwrap_or_default()
    }

    pub(crate) fn set_id(&self, id: &str) -> GrtResult<()> {
        self.inner()?.set_id(id);
        Ok(())
    }

    /// Metaclass, `None` for null
    pub fn class(&self) -> Option<Arc<MetaClass>> {
        self.inner().ok().map(|o| o.class().clone())
    }

    /// Class name, empty for null
    pub fn class_name(&self) -> String {
        self.inner()
            .map(|o| o.class().name().to_string())
            .unwrap_or_default()
    }

    /// True if the object's class is `class_name` or derives from it
    pub fn is_instance(&self, class_name: &str) -> bool {
        self.inner().map_or(false, |o| o.class().is_a(class_name))
    }

    /// True if the class declares the member
    pub fn has_member(&self, name: &str) -> bool {
        self.inner().map_or(false, |o| o.class().has_member(name))
    }

    /// Read a member through the metaclass
    pub fn get_member(&self, name: &str) -> GrtResult<ValueRef> {
        let object = self.inner()?;
        object.class().get_member_value(self, name)
    }

    /// Public member setter; read-only members are rejected
    pub fn set_member(&self, name: &str, value: impl Into<ValueRef>) -> GrtResult<()> {
        let object = self.inner()?;
        object.class().set_member_value(self, name, value.into())
    }

    /// Member setter that may bypass the read-only flag
    pub fn set_member_internal(&self, name: &str, value: ValueRef, force: bool) -> GrtResult<()> {
        let object = self.inner()?;
        object.class().set_member_internal(self, name, value, force)
    }

    /// String member
    pub fn get_string_member(&self, name: &str) -> GrtResult<String> {
        let value = self.get_member(name)?;
        match value.as_str() {
            Some(s) => Ok(s.to_string()),
            None if !value.is_valid() => Ok(String::new()),
            None => Err(GrtError::type_error(Type::String, value.value_type())),
        }
    }

    /// Integer member
    pub fn get_int_member(&self, name: &str) -> GrtResult<i64> {
        let value = self.get_member(name)?;
        value
            .as_int()
            .ok_or_else(|| GrtError::type_error(Type::Integer, value.value_type()))
    }

    /// Double member
    pub fn get_double_member(&self, name: &str) -> GrtResult<f64> {
        let value = self.get_member(name)?;
        value
            .as_double()
            .ok_or_else(|| GrtError::type_error(Type::Double, value.value_type()))
    }

    /// List member
    pub fn get_list_member(&self, name: &str) -> GrtResult<ListRef> {
        ListRef::cast_from(&self.get_member(name)?)
    }

    /// Dict member
    pub fn get_dict_member(&self, name: &str) -> GrtResult<DictRef> {
        DictRef::cast_from(&self.get_member(name)?)
    }

    /// Object member
    pub fn get_object_member(&self, name: &str) -> GrtResult<ObjectRef> {
        ObjectRef::cast_from(&self.get_member(name)?)
    }

    /// Call a method through the metaclass
    pub fn call_method(&self, name: &str, args: &ListRef) -> GrtResult<ValueRef> {
        let object = self.inner()?;
        object.class().call_method(self, name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metaclass::{parse_structs, ClassBinding, ClassRegistry, MetaClassTable};

    const SCHEMA: &str = r#"<gstructs>
      <gstruct name="t.Node"><members>
        <member name="name" type="string" default="node"/>
        <member name="weight" type="real" default="1.5"/>
        <member name="count" type="int"/>
        <member name="children" type="list" content-type="object" content-struct-name="t.Node" owned="1"/>
        <member name="owner" type="object" struct-name="t.Node"/>
        <member name="first" type="object" struct-name="t.Node" owned="1"/>
        <member name="label" type="string" calculated="1" delegate-get="1" read-only="1"/>
      </members></gstruct>
    </gstructs>"#;

    fn node_class() -> Arc<MetaClass> {
        let mut table = MetaClassTable::new();
        let mut registry = ClassRegistry::new();
        registry.register(
            "t.Node",
            ClassBinding::generic().getter("label", |obj| {
                Ok(ValueRef::string(format!("<{}>", obj.get_string_member("name")?)))
            }),
        );
        table
            .add_definitions(parse_structs(SCHEMA, "t.xml").unwrap().classes)
            .unwrap();
        table.end_loading(&registry, true).unwrap();
        table.get("t.Node").unwrap()
    }

    #[test]
    fn test_generic_defaults() {
        let class = node_class();
        let node = class.allocate().unwrap();
        assert_eq!(node.get_string_member("name").unwrap(), "node");
        assert_eq!(node.get_double_member("weight").unwrap(), 1.5);
        assert_eq!(node.get_int_member("count").unwrap(), 0);
        assert_eq!(node.get_list_member("children").unwrap().count(), 0);
        assert!(!node.get_member("owner").unwrap().is_valid());
        assert!(!node.id().is_empty());
    }

    #[test]
    fn test_set_member_checks() {
        let class = node_class();
        let node = class.allocate().unwrap();
        node.set_member("name", "root").unwrap();
        assert!(matches!(node.set_member("name", 5), Err(GrtError::TypeMismatch { .. })));
        assert!(matches!(
            node.set_member("children", ListRef::new_any()),
            Err(GrtError::ReadOnly { .. })
        ));
        assert!(matches!(node.set_member("nope", 1), Err(GrtError::BadItem(_))));
    }

    #[test]
    fn test_calculated_member_uses_getter() {
        let class = node_class();
        let node = class.allocate().unwrap();
        node.set_member("name", "x").unwrap();
        assert_eq!(node.get_string_member("label").unwrap(), "<x>");
    }

    #[test]
    fn test_non_owned_object_member_is_weak() {
        let class = node_class();
        let parent = class.allocate().unwrap();
        let child = class.allocate().unwrap();
        child.set_member("owner", parent.clone()).unwrap();
        parent.set_member("first", child.clone()).unwrap();

        // owner does not keep the parent alive
        assert_eq!(parent.refcount(), 1);
        assert!(child.get_object_member("owner").unwrap().ptr_eq(&parent));
        // owned member does keep the child alive
        assert_eq!(child.refcount(), 2);

        drop(parent);
        assert!(!child.get_member("owner").unwrap().is_valid());
    }

    #[test]
    fn test_object_member_class_checked() {
        let class = node_class();
        let node = class.allocate().unwrap();
        let base = ObjectRef::new_generic(&Arc::new(MetaClass::base())).unwrap();
        assert!(matches!(
            node.set_member("first", base),
            Err(GrtError::TypeMismatch { .. })
        ));
    }
}
