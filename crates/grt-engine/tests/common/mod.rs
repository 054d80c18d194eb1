//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use grt_engine::{ClassBinding, Grt, GrtOptions, Message, MessageType};
use parking_lot::Mutex;

/// Foo/Bar schema used across the tests
pub const TEST_STRUCTS: &str = r#"<?xml version="1.0"?>
<gstructs xmlns:attr="http://www.mysql.com/grt/struct-attribute">
  <gstruct name="test.Bar" attr:caption="Bar">
    <members>
      <member name="name" type="string"/>
      <member name="value" type="int" default="7"/>
      <member name="ratio" type="real" default="0.5"/>
      <member name="owner" type="object" struct-name="test.Foo"/>
    </members>
  </gstruct>
  <gstruct name="test.Foo">
    <members>
      <member name="name" type="string"/>
      <member name="child" type="object" struct-name="test.Bar" owned="1"/>
      <member name="friend" type="object" struct-name="test.Bar"/>
      <member name="numbers" type="list" content-type="int"/>
      <member name="maybe" type="list" content-type="int" allow-null="1"/>
      <member name="bars" type="list" content-type="object" content-struct-name="test.Bar" owned="1"/>
      <member name="refs" type="list" content-type="object" content-struct-name="test.Bar"/>
      <member name="tags" type="dict" content-type="string"/>
    </members>
  </gstruct>
  <gstruct name="test.SpecialBar" parent="test.Bar">
    <members>
      <member name="name" type="string" default="special"/>
      <member name="extra" type="string"/>
    </members>
  </gstruct>
</gstructs>"#;

/// Fresh context with the test schema loaded and generic allocators bound
pub fn test_grt() -> Grt {
    test_grt_with(GrtOptions::default())
}

/// Fresh context built from `options` with the test schema loaded
pub fn test_grt_with(options: GrtOptions) -> Grt {
    let grt = Grt::new(options);
    for class in ["test.Bar", "test.Foo", "test.SpecialBar"] {
        grt.register_class(class, ClassBinding::generic());
    }
    grt.load_metaclasses_from_str(TEST_STRUCTS, "structs.test.xml")
        .expect("test schema parses");
    grt.end_loading_metaclasses(true)
        .expect("test schema validates");
    grt
}

/// Install a handler recording every message it sees
pub fn collect_messages(grt: &Grt) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    grt.push_message_handler(move |msg| {
        sink.lock().push(msg.clone());
        true
    });
    seen
}

/// Warnings among recorded messages
pub fn warnings(seen: &Mutex<Vec<Message>>) -> Vec<String> {
    seen.lock()
        .iter()
        .filter(|m| m.kind == MessageType::Warning)
        .map(|m| m.text.clone())
        .collect()
}
