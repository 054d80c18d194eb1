//! XML document reader
//!
//! Reading happens in two passes over the parsed element tree. The first
//! pass allocates every object in the document and caches it by id, the
//! second builds values and fills in members. Links can therefore point at
//! objects defined later in the document.
//!
//! Structural problems (unknown struct, missing `type` or `id`) abort the
//! call. Dangling links, unknown members and checksum drift are reported as
//! warnings and skipped.

use std::collections::BTreeSet;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::Grt;
use crate::error::{GrtError, GrtResult};
use crate::serializer::format_checksum;
use crate::types::{SimpleTypeSpec, Type};
use crate::value::{DictRef, ListRef, ObjectRef, ValueRef};
use crate::xml::{parse_document, XmlElement};

/// Document reader bound to a context
pub struct Unserializer<'g> {
    grt: &'g Grt,
    objects: FxHashMap<String, ObjectRef>,
    containers: FxHashMap<String, ValueRef>,
    populated: FxHashSet<String>,
    invalid: BTreeSet<String>,
    drift_reported: FxHashSet<String>,
    document_type: String,
    document_version: String,
}

fn required_attr<'a>(node: &'a XmlElement, name: &str) -> GrtResult<&'a str> {
    node.get_attr(name).ok_or_else(|| {
        GrtError::Document(format!("<{}> element without '{}' attribute", node.name, name))
    })
}

fn parse_checksum(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

fn content_spec(node: &XmlElement) -> SimpleTypeSpec {
    SimpleTypeSpec {
        kind: node.get_attr("content-type").map(Type::from_name).unwrap_or_default(),
        object_class: node
            .get_attr("content-struct-name")
            .unwrap_or_default()
            .to_string(),
    }
}

impl<'g> Unserializer<'g> {
    /// Reader resolving classes and global links through `grt`
    pub fn new(grt: &'g Grt) -> Self {
        Self {
            grt,
            objects: FxHashMap::default(),
            containers: FxHashMap::default(),
            populated: FxHashSet::default(),
            invalid: BTreeSet::new(),
            drift_reported: FxHashSet::default(),
            document_type: String::new(),
            document_version: String::new(),
        }
    }

    /// `document_type` of the last document read
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    /// `version` of the last document read
    pub fn document_version(&self) -> &str {
        &self.document_version
    }

    /// Object ids whose links could not be resolved
    pub fn invalid_links(&self) -> Vec<String> {
        self.invalid.iter().cloned().collect()
    }

    /// Read a document from a file
    pub fn load_from_xml(&mut self, path: &Path) -> GrtResult<ValueRef> {
        let data = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading document");
        self.unserialize_str(&data)
    }

    /// Read a document from a string
    pub fn unserialize_str(&mut self, data: &str) -> GrtResult<ValueRef> {
        let root = parse_document(data)?;
        self.unserialize_element(&root)
    }

    /// Read an already parsed document
    ///
    /// The id caches are released whether or not reading succeeds.
    pub fn unserialize_element(&mut self, root: &XmlElement) -> GrtResult<ValueRef> {
        self.populated.clear();
        self.invalid.clear();
        self.drift_reported.clear();
        let result = self.read_document(root);
        // objects not reachable from the result go away here
        self.objects.clear();
        self.containers.clear();
        result
    }

    fn read_document(&mut self, root: &XmlElement) -> GrtResult<ValueRef> {
        self.objects.clear();
        self.containers.clear();
        if root.name != "data" {
            return Err(GrtError::Document(format!(
                "expected <data> root element, found <{}>",
                root.name
            )));
        }
        self.document_type = root.get_attr("document_type").unwrap_or_default().to_string();
        self.document_version = root.get_attr("version").unwrap_or_default().to_string();
        if root.get_attr("grt_format").is_none() {
            tracing::warn!("document has no grt_format tag");
        }

        let top = root
            .children
            .iter()
            .find(|c| matches!(c.name.as_str(), "value" | "link" | "null"))
            .ok_or_else(|| GrtError::Document("document contains no value".to_string()))?;

        self.create_objects(top)?;
        tracing::debug!(objects = self.objects.len(), "allocated document objects");
        self.rebuild(top, true)
    }

    // ========================================================================
    // Pass 1: allocate objects
    // ========================================================================

    fn create_objects(&mut self, node: &XmlElement) -> GrtResult<()> {
        if node.name == "value" && node.get_attr("type") == Some("object") {
            self.create_object(node)?;
        }
        for child in &node.children {
            self.create_objects(child)?;
        }
        Ok(())
    }

    fn create_object(&mut self, node: &XmlElement) -> GrtResult<()> {
        let struct_name = required_attr(node, "struct-name")?;
        let id = required_attr(node, "id")?;
        if self.objects.contains_key(id) {
            tracing::warn!(id, "object defined twice in document");
            return Ok(());
        }
        let class = self
            .grt
            .get_metaclass(struct_name)
            .ok_or_else(|| GrtError::UnknownStruct(struct_name.to_string()))?;

        if self.grt.options().check_serialized_crc {
            if let Some(stored) = node.get_attr("struct-checksum") {
                let matches = parse_checksum(stored) == Some(class.crc32());
                if !matches && self.drift_reported.insert(struct_name.to_string()) {
                    self.grt.send_warning(
                        format!("Struct checksum mismatch for {}", struct_name),
                        format!(
                            "document has {}, loaded definition has {}",
                            stored,
                            format_checksum(class.crc32())
                        ),
                    );
                }
            }
        }

        let object = class.allocate()?;
        object.set_id(id)?;
        self.objects.insert(id.to_string(), object);
        Ok(())
    }

    // ========================================================================
    // Pass 2: build values
    // ========================================================================

    fn rebuild(&mut self, node: &XmlElement, allow_null: bool) -> GrtResult<ValueRef> {
        match node.name.as_str() {
            "null" => Ok(ValueRef::invalid()),
            "link" => self.resolve_link(node),
            "value" => self.rebuild_value(node, allow_null),
            other => Err(GrtError::Document(format!("unexpected element <{}>", other))),
        }
    }

    fn rebuild_value(&mut self, node: &XmlElement, allow_null: bool) -> GrtResult<ValueRef> {
        let kind = required_attr(node, "type")?;
        match kind {
            "int" => node
                .text
                .trim()
                .parse::<i64>()
                .map(ValueRef::integer)
                .map_err(|e| GrtError::Document(format!("bad int value '{}': {}", node.text, e))),
            "real" => node
                .text
                .trim()
                .parse::<f64>()
                .map(ValueRef::double)
                .map_err(|e| GrtError::Document(format!("bad real value '{}': {}", node.text, e))),
            "string" => Ok(ValueRef::string(node.text.as_str())),
            "list" => self.rebuild_list(node, allow_null),
            "dict" => self.rebuild_dict(node, allow_null),
            "object" => self.rebuild_object(node),
            other => Err(GrtError::Document(format!("unknown value type '{}'", other))),
        }
    }

    fn is_dangling(child: &XmlElement, value: &ValueRef) -> bool {
        child.name == "link" && !value.is_valid()
    }

    fn rebuild_list(&mut self, node: &XmlElement, allow_null: bool) -> GrtResult<ValueRef> {
        let marker = node.get_attr("_ptr_").map(str::to_string);
        if let Some(existing) = marker.as_ref().and_then(|m| self.containers.get(m)) {
            return Ok(existing.clone());
        }
        let list = ListRef::with_null_policy(content_spec(node), allow_null);
        if let Some(marker) = marker {
            self.containers.insert(marker, list.clone().into());
        }
        let inner = list.inner()?;
        for child in &node.children {
            if child.name == "null" && !allow_null {
                self.grt.send_warning(
                    "null value in list that does not allow nulls",
                    node.get_attr("_ptr_").unwrap_or_default(),
                );
            }
            let item = self.rebuild(child, true)?;
            // a dangling link stays as null so later items keep their index
            if Self::is_dangling(child, &item) && !allow_null {
                continue;
            }
            inner.ginsert_unchecked(item, None)?;
        }
        Ok(list.into())
    }

    fn rebuild_dict(&mut self, node: &XmlElement, allow_null: bool) -> GrtResult<ValueRef> {
        let marker = node.get_attr("_ptr_").map(str::to_string);
        if let Some(existing) = marker.as_ref().and_then(|m| self.containers.get(m)) {
            return Ok(existing.clone());
        }
        let dict = DictRef::with_null_policy(content_spec(node), allow_null);
        if let Some(marker) = marker {
            self.containers.insert(marker, dict.clone().into());
        }
        let inner = dict.inner()?;
        for child in &node.children {
            let key = required_attr(child, "key")?;
            let item = self.rebuild(child, true)?;
            if Self::is_dangling(child, &item) {
                continue;
            }
            inner.set(key, item);
        }
        Ok(dict.into())
    }

    fn rebuild_object(&mut self, node: &XmlElement) -> GrtResult<ValueRef> {
        let id = required_attr(node, "id")?;
        let object = self
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| GrtError::Document(format!("object {} was not allocated", id)))?;
        if !self.populated.insert(id.to_string()) {
            return Ok(object.into());
        }
        let class = object
            .class()
            .ok_or_else(|| GrtError::Document(format!("object {} has no class", id)))?;

        for child in &node.children {
            let key = required_attr(child, "key")?;
            let Some(member) = class.get_member_info(key) else {
                self.grt.send_warning(
                    format!("Unknown member {}::{} in document", class.name(), key),
                    format!("object {}", id),
                );
                continue;
            };
            if member.calculated {
                continue;
            }
            let allow_null = member.allow_null;
            let value = self.rebuild(child, allow_null)?;
            if Self::is_dangling(child, &value) {
                continue;
            }
            if let Err(err) = object.set_member_internal(key, value, true) {
                self.grt.send_warning(
                    format!("Could not set {}::{}", class.name(), key),
                    err.to_string(),
                );
            }
        }
        Ok(object.into())
    }

    // ========================================================================
    // Links
    // ========================================================================

    fn resolve_link(&mut self, node: &XmlElement) -> GrtResult<ValueRef> {
        let kind = required_attr(node, "type")?;
        let target = node.text.trim();
        match kind {
            "object" => {
                if let Some(object) = self.objects.get(target) {
                    return Ok(object.clone().into());
                }
                if self.invalid.contains(target) {
                    return Ok(ValueRef::invalid());
                }
                let found = self.grt.find_object_by_id(target, "/");
                if found.is_valid() {
                    return Ok(found.into());
                }
                self.invalid.insert(target.to_string());
                self.grt.send_warning(
                    format!("Unknown object {} referenced in document", target),
                    node.get_attr("struct-name").unwrap_or_default(),
                );
                Ok(ValueRef::invalid())
            }
            "list" | "dict" => match self.containers.get(target) {
                Some(value) => Ok(value.clone()),
                None => {
                    self.grt
                        .send_warning(format!("Unresolved {} link {}", kind, target), "");
                    Ok(ValueRef::invalid())
                }
            },
            other => Err(GrtError::Document(format!("bad link type '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_checksum() {
        assert_eq!(parse_checksum("0x00001a2b"), Some(0x1a2b));
        assert_eq!(parse_checksum("ff"), Some(0xff));
        assert_eq!(parse_checksum("0xzz"), None);
    }

    #[test]
    fn test_plain_values() {
        let grt = Grt::default();
        let mut reader = Unserializer::new(&grt);
        let value = reader
            .unserialize_str(
                r#"<?xml version="1.0"?>
<data grt_format="2.0" document_type="t" version="3">
  <value _ptr_="0x1" type="dict">
    <value type="int" key="n">42</value>
    <value type="real" key="r">0.25</value>
    <value type="string" key="s"> spaced </value>
    <null key="z"/>
  </value>
</data>"#,
            )
            .unwrap();
        let dict = DictRef::cast_from(&value).unwrap();
        assert_eq!(dict.get_int("n", 0).unwrap(), 42);
        assert_eq!(dict.get_double("r", 0.0).unwrap(), 0.25);
        assert_eq!(dict.get_string("s", "").unwrap(), " spaced ");
        assert!(dict.has_key("z"));
        assert_eq!(reader.document_type(), "t");
        assert_eq!(reader.document_version(), "3");
    }

    #[test]
    fn test_structural_errors() {
        let grt = Grt::default();
        let mut reader = Unserializer::new(&grt);
        assert!(matches!(
            reader.unserialize_str("<data><value>1</value></data>"),
            Err(GrtError::Document(_))
        ));
        assert!(matches!(
            reader.unserialize_str(r#"<data><value type="int">x</value></data>"#),
            Err(GrtError::Document(_))
        ));
        assert!(matches!(
            reader.unserialize_str(r#"<data><value type="blob"/></data>"#),
            Err(GrtError::Document(_))
        ));
        assert!(matches!(
            reader.unserialize_str(r#"<other/>"#),
            Err(GrtError::Document(_))
        ));
        assert!(matches!(
            reader.unserialize_str(r#"<data><value type="object" struct-name="nope.Nope" id="1"/></data>"#),
            Err(GrtError::UnknownStruct(_))
        ));
    }

    #[test]
    fn test_failed_read_releases_caches() {
        let grt = Grt::default();
        let mut reader = Unserializer::new(&grt);
        let err = reader.unserialize_str(
            r#"<data grt_format="2.0">
  <value _ptr_="0x1" type="list"><value type="int">x</value></value>
</data>"#,
        );
        assert!(matches!(err, Err(GrtError::Document(_))));
        assert!(reader.objects.is_empty());
        assert!(reader.containers.is_empty());

        // the same reader reads the next document normally
        let value = reader
            .unserialize_str(r#"<data grt_format="2.0"><value type="int">5</value></data>"#)
            .unwrap();
        assert_eq!(value.as_int(), Some(5));
    }

    #[test]
    fn test_shared_list_marker() {
        let grt = Grt::default();
        let mut reader = Unserializer::new(&grt);
        let value = reader
            .unserialize_str(
                r#"<data grt_format="2.0">
  <value _ptr_="0x1" type="list">
    <value _ptr_="0x2" type="list" content-type="int"><value type="int">1</value></value>
    <link type="list">0x2</link>
  </value>
</data>"#,
            )
            .unwrap();
        let outer = ListRef::cast_from(&value).unwrap();
        assert_eq!(outer.count(), 2);
        assert!(outer.get(0).unwrap().ptr_eq(&outer.get(1).unwrap()));
        let inner = ListRef::cast_from(&outer.get(0).unwrap()).unwrap();
        assert_eq!(inner.content_type().kind, Type::Integer);
    }
}
