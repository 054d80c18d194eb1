//! Value Model Tests
//!
//! Tests validate the reference-counted value layer and metaclasses:
//! - Typed casts and class checks
//! - Checked vs unchecked container mutation
//! - Reference counting, including concurrent retain/release
//! - Member override resolution
//! - Path access, lookup by id and copying
//!
//! # Running Tests
//! ```bash
//! cargo test --test value_tests
//! ```

mod common;

use std::sync::Arc;

use common::test_grt;
use grt_engine::{
    append_contents, copy_object, copy_value, merge_contents_by_id, merge_contents_by_name,
    merge_dict_contents, merge_object_contents, replace_list_contents, update_ids, CopyContext,
    DictRef, GrtError, GrtObject, IntegerRef, ListRef, ObjectRef, SimpleTypeSpec, StringRef, Type,
    ValueRef,
};

// ===== Casts =====

#[test]
fn test_cast_wrong_type_is_error() {
    let value = ValueRef::string("not a number");
    match IntegerRef::cast_from(&value) {
        Err(GrtError::TypeMismatch { expected, got }) => {
            assert_eq!(expected, "type int");
            assert_eq!(got, "string");
        }
        other => panic!("expected type mismatch, got {:?}", other.map(|r| r.value())),
    }
}

#[test]
fn test_cast_null_gives_empty_ref() {
    let null = ValueRef::invalid();
    assert!(!IntegerRef::cast_from(&null).unwrap().is_valid());
    assert!(!StringRef::cast_from(&null).unwrap().is_valid());
    assert!(!ListRef::cast_from(&null).unwrap().is_valid());
    assert!(!DictRef::cast_from(&null).unwrap().is_valid());
    assert!(!ObjectRef::cast_from(&null).unwrap().is_valid());
}

#[test]
fn test_object_class_cast() {
    let grt = test_grt();
    let special = grt.create_object("test.SpecialBar").unwrap();
    let value: ValueRef = special.into();
    assert!(ObjectRef::cast_to_class(&value, "test.Bar").is_ok());
    assert!(ObjectRef::cast_to_class(&value, "Object").is_ok());
    assert!(matches!(
        ObjectRef::cast_to_class(&value, "test.Foo"),
        Err(GrtError::TypeMismatch { .. })
    ));
}

struct Bar(ObjectRef);

impl GrtObject for Bar {
    const CLASS_NAME: &'static str = "test.Bar";

    fn from_object(object: ObjectRef) -> Self {
        Bar(object)
    }

    fn object(&self) -> &ObjectRef {
        &self.0
    }
}

impl Bar {
    fn value(&self) -> i64 {
        self.0.get_int_member("value").unwrap()
    }
}

#[test]
fn test_typed_wrapper() {
    let grt = test_grt();
    let bar: Bar = grt.create::<Bar>().unwrap();
    assert_eq!(bar.value(), 7);
    assert_eq!(bar.object().class_name(), "test.Bar");

    let foo = grt.create_object("test.Foo").unwrap();
    assert!(foo.downcast::<Bar>().is_err());
}

// ===== Containers =====

#[test]
fn test_checked_insert_enforces_content_type() {
    let list = ListRef::new(SimpleTypeSpec::new(Type::Integer));
    list.ginsert(1).unwrap();
    assert!(matches!(list.ginsert("two"), Err(GrtError::TypeMismatch { .. })));
    assert!(matches!(list.ginsert(ValueRef::invalid()), Err(GrtError::NullValue(_))));
    assert_eq!(list.count(), 1);

    list.ginsert_unchecked("two").unwrap();
    assert_eq!(list.count(), 2);
    assert_eq!(list.get(1).unwrap().as_str(), Some("two"));
}

#[test]
fn test_object_list_accepts_subclasses() {
    let grt = test_grt();
    let list = ListRef::new_objects("test.Bar");
    list.ginsert(grt.create_object("test.SpecialBar").unwrap()).unwrap();
    assert!(list.ginsert(grt.create_object("test.Foo").unwrap()).is_err());
    assert_eq!(list.count(), 1);
}

#[test]
fn test_list_operations() {
    let list = ListRef::new_any();
    for s in ["a", "b", "c"] {
        list.ginsert(s).unwrap();
    }
    list.ginsert_at("z", 0).unwrap();
    list.reorder(0, 3).unwrap();
    let items: Vec<String> = list.items().iter().filter_map(|v| v.as_str().map(String::from)).collect();
    assert_eq!(items, vec!["a", "b", "c", "z"]);

    let removed = list.remove(1).unwrap();
    assert_eq!(removed.as_str(), Some("b"));
    assert!(matches!(list.get(9), Err(GrtError::IndexOutOfRange { index: 9, count: 3 })));
    assert_eq!(list.get_index(&list.get(2).unwrap()), Some(2));
}

#[test]
fn test_dict_typed_getters() {
    let dict = DictRef::new();
    dict.set("n", 4).unwrap();
    dict.set("s", "text").unwrap();
    assert_eq!(dict.get_int("n", 0).unwrap(), 4);
    assert_eq!(dict.get_int("missing", -1).unwrap(), -1);
    assert!(dict.get_int("s", 0).is_err());
    assert_eq!(dict.keys(), vec!["n".to_string(), "s".to_string()]);

    let typed = DictRef::with_content(SimpleTypeSpec::new(Type::String));
    assert!(typed.set("n", 1).is_err());
    assert!(!typed.has_key("n"));
}

// ===== Reference Counting =====

#[test]
fn test_retain_release_balance() {
    let value = ValueRef::string("counted");
    let weak = value.downgrade();
    let base = value.refcount();

    let retained: Vec<ValueRef> = (0..10).map(|_| value.retain()).collect();
    assert_eq!(value.refcount(), base + 10);
    for r in retained {
        r.release();
    }
    assert_eq!(value.refcount(), base);
    assert!(weak.is_alive());

    value.release();
    assert!(!weak.is_alive());
}

#[test]
fn test_concurrent_retain_release() {
    let list: ValueRef = ListRef::new_any().into();
    let weak = list.downgrade();
    let threads = 8;
    let rounds = 10_000;

    std::thread::scope(|scope| {
        for _ in 0..threads {
            let handle = list.clone();
            scope.spawn(move || {
                for _ in 0..rounds {
                    let extra = handle.retain();
                    let another = extra.clone();
                    drop(extra);
                    another.release();
                }
            });
        }
    });

    assert_eq!(list.refcount(), 1);
    drop(list);
    assert!(!weak.is_alive());
}

#[test]
fn test_concurrent_list_appends() {
    let list = ListRef::new(SimpleTypeSpec::new(Type::Integer));
    let shared = Arc::new(list.clone());
    std::thread::scope(|scope| {
        for t in 0..4i64 {
            let shared = shared.clone();
            scope.spawn(move || {
                for i in 0..250 {
                    shared.ginsert(t * 1000 + i).unwrap();
                }
            });
        }
    });
    assert_eq!(list.count(), 1000);
}

#[test]
fn test_non_owned_member_does_not_keep_target_alive() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let bar = grt.create_object("test.Bar").unwrap();
    foo.set_member("friend", bar.clone()).unwrap();
    assert!(foo.get_member("friend").unwrap().is_valid());

    drop(bar);
    assert!(!foo.get_member("friend").unwrap().is_valid());
}

// ===== Metaclasses =====

#[test]
fn test_override_visited_once_with_derived_descriptor() {
    let grt = test_grt();
    let class = grt.get_metaclass("test.SpecialBar").unwrap();
    let mut names = Vec::new();
    let mut name_default = None;
    class.foreach_member(|member| {
        names.push(member.name.clone());
        if member.name == "name" {
            name_default = Some(member.default_value.clone());
        }
        true
    });
    assert_eq!(names.iter().filter(|n| *n == "name").count(), 1);
    assert_eq!(name_default.as_deref(), Some("special"));
    assert!(names.contains(&"extra".to_string()));
    assert!(names.contains(&"value".to_string()));

    let special = grt.create_object("test.SpecialBar").unwrap();
    assert_eq!(special.get_string_member("name").unwrap(), "special");
}

#[test]
fn test_metaclasses_in_topological_order() {
    let grt = test_grt();
    let names: Vec<String> = grt
        .get_metaclasses()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let pos = |n: &str| names.iter().position(|x| x == n).unwrap();
    assert_eq!(pos("Object"), 0);
    assert!(pos("test.Bar") < pos("test.SpecialBar"));
    assert_eq!(
        grt.get_metaclass("test.Bar").unwrap().get_attribute("caption"),
        Some("Bar")
    );
}

#[test]
fn test_container_members_are_read_only() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let replacement = ListRef::new(SimpleTypeSpec::new(Type::Integer));
    assert!(matches!(
        foo.set_member("numbers", replacement),
        Err(GrtError::ReadOnly { .. })
    ));
    assert!(matches!(
        foo.set_member("nonexistent", 1),
        Err(GrtError::BadItem(_))
    ));
}

// ===== Paths, Lookup and Copies =====

#[test]
fn test_root_paths() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    foo.set_member("name", "pathy").unwrap();
    foo.get_list_member("numbers").unwrap().ginsert(11).unwrap();
    grt.set("/foo", foo.clone().into()).unwrap();

    assert_eq!(grt.get("/foo/name").unwrap().as_str(), Some("pathy"));
    assert_eq!(grt.get("/foo/numbers/0").unwrap().as_int(), Some(11));
    assert!(matches!(grt.get("/foo/numbers/5"), Err(GrtError::BadPath(_))));
    assert!(matches!(grt.get("foo"), Err(GrtError::BadPath(_))));

    grt.set("/foo/name", ValueRef::string("renamed")).unwrap();
    assert_eq!(foo.get_string_member("name").unwrap(), "renamed");
    grt.set("/foo/numbers/0", ValueRef::integer(12)).unwrap();
    assert_eq!(grt.get("/foo/numbers/0").unwrap().as_int(), Some(12));
    assert!(grt.set("/", ValueRef::integer(1)).is_err());
}

#[test]
fn test_find_object_by_id_deep() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let nested = grt.create_object("test.Bar").unwrap();
    nested.set_member("owner", foo.clone()).unwrap();
    foo.get_list_member("bars").unwrap().ginsert(nested.clone()).unwrap();
    let holder = DictRef::new();
    holder.set("foo", foo.clone()).unwrap();
    grt.set("/docs", holder.into()).unwrap();

    assert!(grt.find_object_by_id(&nested.id(), "/").ptr_eq(&nested));
    assert!(grt.find_object_by_id(&foo.id(), "/docs").ptr_eq(&foo));
    assert!(!grt.find_object_by_id("{00000000-0000-0000-0000-000000000000}", "/").is_valid());
}

#[test]
fn test_object_ids_are_unique_guids() {
    let grt = test_grt();
    let a = grt.create_object("test.Bar").unwrap();
    let b = grt.create_object("test.Bar").unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.id().len(), 38);
    assert!(a.id().starts_with('{') && a.id().ends_with('}'));
}

#[test]
fn test_copy_object_deep_and_shallow() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let child = grt.create_object("test.Bar").unwrap();
    child.set_member("value", 99).unwrap();
    foo.set_member("child", child.clone()).unwrap();
    foo.get_list_member("numbers").unwrap().ginsert(1).unwrap();

    let shallow = ObjectRef::cast_from(&copy_value(&foo.clone().into(), false).unwrap()).unwrap();
    assert_ne!(shallow.id(), foo.id());
    assert!(shallow.get_object_member("child").unwrap().ptr_eq(&child));

    let deep = ObjectRef::cast_from(&copy_value(&foo.into(), true).unwrap()).unwrap();
    let copied_child = deep.get_object_member("child").unwrap();
    assert!(!copied_child.ptr_eq(&child));
    assert_eq!(copied_child.get_int_member("value").unwrap(), 99);
    assert_eq!(deep.get_list_member("numbers").unwrap().count(), 1);
}

#[test]
fn test_deep_copy_repoints_shared_references() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let child = grt.create_object("test.Bar").unwrap();
    let outsider = grt.create_object("test.Bar").unwrap();
    foo.set_member("child", child.clone()).unwrap();
    foo.set_member("friend", child.clone()).unwrap();
    child.set_member("owner", foo.clone()).unwrap();
    let refs = foo.get_list_member("refs").unwrap();
    refs.ginsert(child.clone()).unwrap();
    refs.ginsert(outsider.clone()).unwrap();

    let copy = copy_object(&foo, &[]).unwrap();
    let copied_child = copy.get_object_member("child").unwrap();
    assert!(!copied_child.ptr_eq(&child));
    assert!(copy.get_object_member("friend").unwrap().ptr_eq(&copied_child));
    assert!(copied_child.get_object_member("owner").unwrap().ptr_eq(&copy));

    let copied_refs = copy.get_list_member("refs").unwrap();
    assert_eq!(copied_refs.count(), 2);
    assert!(ObjectRef::cast_from(&copied_refs.get(0).unwrap()).unwrap().ptr_eq(&copied_child));
    // objects outside the copied tree are left alone
    assert!(ObjectRef::cast_from(&copied_refs.get(1).unwrap()).unwrap().ptr_eq(&outsider));

    // the source is untouched
    assert!(foo.get_object_member("friend").unwrap().ptr_eq(&child));
    assert!(child.get_object_member("owner").unwrap().ptr_eq(&foo));
}

#[test]
fn test_copy_context_links_separately_copied_objects() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let bar = grt.create_object("test.Bar").unwrap();
    foo.set_member("friend", bar.clone()).unwrap();

    let mut context = CopyContext::new();
    let foo_copy = context.copy(&foo, &[]).unwrap();
    let bar_copy = context.copy(&bar, &[]).unwrap();
    // not yet repointed
    assert!(foo_copy.get_object_member("friend").unwrap().ptr_eq(&bar));

    context.update_references().unwrap();
    assert!(foo_copy.get_object_member("friend").unwrap().ptr_eq(&bar_copy));
    assert!(context.copy_for(&bar.id()).unwrap().ptr_eq(&bar_copy));
    assert!(context.copy_for("{missing}").is_none());
}

#[test]
fn test_copy_skips_named_members() {
    let grt = test_grt();
    let bar = grt.create_object("test.Bar").unwrap();
    bar.set_member("name", "kept").unwrap();
    bar.set_member("value", 1).unwrap();

    let copy = copy_object(&bar, &["name"]).unwrap();
    assert_eq!(copy.get_int_member("value").unwrap(), 1);
    assert_ne!(copy.get_string_member("name").unwrap(), "kept");
}

#[test]
fn test_update_ids_renews_owned_objects() {
    let grt = test_grt();
    let foo = grt.create_object("test.Foo").unwrap();
    let child = grt.create_object("test.Bar").unwrap();
    let listed = grt.create_object("test.Bar").unwrap();
    let friend = grt.create_object("test.Bar").unwrap();
    foo.set_member("child", child.clone()).unwrap();
    foo.set_member("friend", friend.clone()).unwrap();
    foo.get_list_member("bars").unwrap().ginsert(listed.clone()).unwrap();
    let before = [foo.id(), child.id(), listed.id(), friend.id()];

    update_ids(&foo, &[]).unwrap();
    assert_ne!(foo.id(), before[0]);
    assert_ne!(child.id(), before[1]);
    assert_ne!(listed.id(), before[2]);
    assert_eq!(friend.id(), before[3]);
}

#[test]
fn test_list_content_helpers() {
    let target = ListRef::new(SimpleTypeSpec::new(Type::Integer));
    target.ginsert(1).unwrap();
    let source = ListRef::new(SimpleTypeSpec::new(Type::Integer));
    source.ginsert(2).unwrap();
    source.ginsert(3).unwrap();

    append_contents(&target, &source).unwrap();
    assert_eq!(target.count(), 3);

    replace_list_contents(&target, &source).unwrap();
    assert_eq!(target.count(), 2);
    assert_eq!(IntegerRef::cast_from(&target.get(0).unwrap()).unwrap().value(), Some(2));

    let strings = ListRef::new(SimpleTypeSpec::new(Type::String));
    strings.ginsert("x").unwrap();
    assert!(append_contents(&target, &strings).is_err());
}

#[test]
fn test_merge_dict_contents_respects_overwrite() {
    let target = DictRef::new();
    target.set("a", 1).unwrap();
    let source = DictRef::new();
    source.set("a", 10).unwrap();
    source.set("b", 20).unwrap();

    merge_dict_contents(&target, &source, false).unwrap();
    assert_eq!(target.get_int("a", 0).unwrap(), 1);
    assert_eq!(target.get_int("b", 0).unwrap(), 20);

    merge_dict_contents(&target, &source, true).unwrap();
    assert_eq!(target.get_int("a", 0).unwrap(), 10);
}

#[test]
fn test_merge_object_lists_by_name_and_id() {
    let grt = test_grt();
    let named = |name: &str| {
        let bar = grt.create_object("test.Bar").unwrap();
        bar.set_member("name", name).unwrap();
        bar
    };
    let target = ListRef::new_objects("test.Bar");
    let first = named("first");
    target.ginsert(first.clone()).unwrap();

    let source = ListRef::new_objects("test.Bar");
    let other_first = named("first");
    source.ginsert(other_first.clone()).unwrap();
    source.ginsert(named("second")).unwrap();

    merge_contents_by_name(&target, &source, false).unwrap();
    assert_eq!(target.count(), 2);
    assert!(ObjectRef::cast_from(&target.get(0).unwrap()).unwrap().ptr_eq(&first));

    merge_contents_by_name(&target, &source, true).unwrap();
    assert_eq!(target.count(), 2);
    assert!(ObjectRef::cast_from(&target.get(0).unwrap()).unwrap().ptr_eq(&other_first));

    // same ids are not added twice
    merge_contents_by_id(&target, &source, false).unwrap();
    assert_eq!(target.count(), 2);
    let third = ListRef::new_objects("test.Bar");
    third.ginsert(named("third")).unwrap();
    merge_contents_by_id(&target, &third, false).unwrap();
    assert_eq!(target.count(), 3);
}

#[test]
fn test_merge_object_contents_skips_read_only_members() {
    let grt = test_grt();
    let target = grt.create_object("test.Foo").unwrap();
    let source = grt.create_object("test.Foo").unwrap();
    source.set_member("name", "merged").unwrap();
    source.get_list_member("numbers").unwrap().ginsert(5).unwrap();
    let numbers = target.get_list_member("numbers").unwrap();

    merge_object_contents(&target, &source).unwrap();
    assert_eq!(target.get_string_member("name").unwrap(), "merged");
    // container members are read-only and keep their identity
    assert!(target.get_list_member("numbers").unwrap().ptr_eq(&numbers));
    assert_eq!(numbers.count(), 0);
}

#[test]
fn test_debug_description_mentions_contents() {
    let dict = DictRef::new();
    dict.set("answer", 42).unwrap();
    let text = ValueRef::from(dict).debug_description();
    assert!(text.contains("answer"));
    assert!(text.contains("42"));
}
