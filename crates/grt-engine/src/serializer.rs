//! XML document writer
//!
//! Lists, dicts and objects are written in full the first time they are
//! reached and as `link` elements afterwards. Object members that are not
//! owned are always links; containers held by such members write their
//! objects as links too.

use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::GrtResult;
use crate::types::{SimpleTypeSpec, Type};
use crate::value::{ObjectRef, Value, ValueRef};
use crate::xml::XmlElement;

/// Format tag written on the document root
pub const GRT_FORMAT: &str = "2.0";

/// Per-call identity state
#[derive(Debug, Default)]
pub struct Serializer {
    seen: FxHashSet<usize>,
    markers: FxHashMap<usize, String>,
    next_marker: usize,
}

fn content_attributes(mut node: XmlElement, content: &SimpleTypeSpec) -> XmlElement {
    if content.kind != Type::Unknown {
        node = node.attr("content-type", content.kind.name());
    }
    if !content.object_class.is_empty() {
        node = node.attr("content-struct-name", content.object_class.as_str());
    }
    node
}

fn with_key(node: XmlElement, key: Option<&str>) -> XmlElement {
    match key {
        Some(key) => node.attr("key", key),
        None => node,
    }
}

/// Hex form of a struct checksum
pub fn format_checksum(crc: u32) -> String {
    format!("0x{:08x}", crc)
}

impl Serializer {
    /// Fresh serializer
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.markers.clear();
        self.next_marker = 0;
    }

    fn marker_for(&mut self, value: &ValueRef) -> String {
        let identity = value.identity();
        if let Some(marker) = self.markers.get(&identity) {
            return marker.clone();
        }
        self.next_marker += 1;
        let marker = format!("{:#x}", self.next_marker);
        self.markers.insert(identity, marker.clone());
        marker
    }

    /// Build the document tree for `value`
    pub fn serialize_to_element(
        &mut self,
        value: &ValueRef,
        doctype: &str,
        version: &str,
    ) -> GrtResult<XmlElement> {
        self.reset();
        let mut root = XmlElement::new("data").attr("grt_format", GRT_FORMAT);
        if !doctype.is_empty() {
            root = root.attr("document_type", doctype);
        }
        if !version.is_empty() {
            root = root.attr("version", version);
        }
        root.children.push(self.serialize_value(value, None, false)?);
        tracing::debug!(containers = self.markers.len(), values = self.seen.len(), "serialized document");
        Ok(root)
    }

    /// Serialize `value` to a document string
    pub fn serialize_to_string(&mut self, value: &ValueRef, doctype: &str, version: &str) -> GrtResult<String> {
        let root = self.serialize_to_element(value, doctype, version)?;
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        root.write_to(&mut out, 0);
        Ok(out)
    }

    /// Serialize `value` into a file
    pub fn save_to_xml(&mut self, value: &ValueRef, path: &Path, doctype: &str, version: &str) -> GrtResult<()> {
        let document = self.serialize_to_string(value, doctype, version)?;
        std::fs::write(path, document)?;
        tracing::info!(path = %path.display(), "document saved");
        Ok(())
    }

    fn serialize_value(&mut self, value: &ValueRef, key: Option<&str>, objects_as_links: bool) -> GrtResult<XmlElement> {
        let node = match value.get() {
            None => XmlElement::new("null"),
            Some(Value::Integer(i)) => XmlElement::new("value").attr("type", "int").with_text(i.to_string()),
            Some(Value::Double(d)) => XmlElement::new("value").attr("type", "real").with_text(d.to_string()),
            Some(Value::String(s)) => XmlElement::new("value").attr("type", "string").with_text(s.as_str()),
            Some(Value::List(list)) => {
                let marker = self.marker_for(value);
                if !self.seen.insert(value.identity()) {
                    XmlElement::new("link").attr("type", "list").with_text(marker)
                } else {
                    let mut node = XmlElement::new("value").attr("_ptr_", marker).attr("type", "list");
                    node = content_attributes(node, list.content_type());
                    for item in list.items() {
                        let child = self.serialize_item(&item, None, objects_as_links)?;
                        node.children.push(child);
                    }
                    node
                }
            }
            Some(Value::Dict(dict)) => {
                let marker = self.marker_for(value);
                if !self.seen.insert(value.identity()) {
                    XmlElement::new("link").attr("type", "dict").with_text(marker)
                } else {
                    let mut node = XmlElement::new("value").attr("_ptr_", marker).attr("type", "dict");
                    node = content_attributes(node, dict.content_type());
                    for (entry_key, item) in dict.entries() {
                        let child = self.serialize_item(&item, Some(entry_key.as_str()), objects_as_links)?;
                        node.children.push(child);
                    }
                    node
                }
            }
            Some(Value::Object(_)) => {
                let object = ObjectRef::cast_from(value)?;
                if !self.seen.insert(value.identity()) {
                    object_link(&object)
                } else {
                    self.serialize_object(&object)?
                }
            }
        };
        Ok(with_key(node, key))
    }

    fn serialize_item(&mut self, item: &ValueRef, key: Option<&str>, objects_as_links: bool) -> GrtResult<XmlElement> {
        if objects_as_links && item.value_type() == Type::Object {
            let object = ObjectRef::cast_from(item)?;
            return Ok(with_key(object_link(&object), key));
        }
        self.serialize_value(item, key, objects_as_links)
    }

    fn serialize_object(&mut self, object: &ObjectRef) -> GrtResult<XmlElement> {
        let inner = object.inner()?;
        let class = inner.class().clone();
        let mut node = XmlElement::new("value")
            .attr("type", "object")
            .attr("struct-name", class.name())
            .attr("id", inner.id())
            .attr("struct-checksum", format_checksum(class.crc32()));

        let mut members = Vec::new();
        class.foreach_member(|member| {
            if !member.calculated {
                members.push(member.clone());
            }
            true
        });

        for member in members {
            let value = object.get_member(&member.name)?;
            if !value.is_valid() {
                continue;
            }
            let child = match member.type_spec.base.kind {
                Type::Object if !member.owned => {
                    let target = ObjectRef::cast_from(&value)?;
                    with_key(object_link(&target), Some(member.name.as_str()))
                }
                Type::List | Type::Dict => self.serialize_value(&value, Some(member.name.as_str()), !member.owned)?,
                _ => self.serialize_value(&value, Some(member.name.as_str()), false)?,
            };
            node.children.push(child);
        }
        Ok(node)
    }
}

fn object_link(object: &ObjectRef) -> XmlElement {
    XmlElement::new("link")
        .attr("type", "object")
        .attr("struct-name", object.class_name())
        .with_text(object.id())
}
