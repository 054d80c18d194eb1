//! Structure description parsing
//!
//! Reads `<gstructs>` documents into mutable [`ClassDef`]s. Definitions are
//! only turned into [`MetaClass`](super::MetaClass)es when loading ends, so
//! references to classes that appear later can be recorded by name.

use std::collections::BTreeMap;

use super::{ClassMember, ClassMethod, ClassSignal};
use crate::error::{GrtError, GrtResult};
use crate::types::{ArgSpec, SimpleTypeSpec, Type, TypeSpec};
use crate::xml::{self, XmlElement};

/// A class definition as read from a description, before freezing
#[derive(Debug, Clone, Default)]
pub struct ClassDef {
    /// Class name
    pub name: String,
    /// Parent class name; `None` means the base class
    pub parent: Option<String>,
    /// File or label the definition came from
    pub source: String,
    /// `attr:*` attributes on the class
    pub attributes: BTreeMap<String, String>,
    /// Declared members
    pub members: BTreeMap<String, ClassMember>,
    /// Attributes layered over inherited members, by member name
    pub member_attributes: BTreeMap<String, BTreeMap<String, String>>,
    /// Declared methods
    pub methods: BTreeMap<String, ClassMethod>,
    /// Declared signals
    pub signals: Vec<ClassSignal>,
    /// `impl-data` flag
    pub impl_data: bool,
    /// `force-impl` flag
    pub force_impl: bool,
    /// `watch-lists` flag
    pub watch_lists: bool,
    /// `watch-dicts` flag
    pub watch_dicts: bool,
    /// Stand-in for a class referenced before its definition
    pub placeholder: bool,
}

impl ClassDef {
    /// Placeholder for a class referenced by name only
    pub fn placeholder(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            placeholder: true,
            ..Self::default()
        }
    }

    /// Names of classes this definition refers to
    pub fn referenced_classes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(parent) = &self.parent {
            out.push(parent);
        }
        for member in self.members.values() {
            for class in [
                &member.type_spec.base.object_class,
                &member.type_spec.content.object_class,
            ] {
                if !class.is_empty() {
                    out.push(class);
                }
            }
        }
        out
    }
}

/// Result of parsing one description document
#[derive(Debug, Default)]
pub struct ParsedStructs {
    /// Class definitions in document order
    pub classes: Vec<ClassDef>,
    /// Files named by `<requires file="..."/>`
    pub requires: Vec<String>,
    /// Non-fatal problems found while parsing
    pub warnings: Vec<String>,
}

/// Parse a `<gstructs>` document
pub fn parse_structs(input: &str, source: &str) -> GrtResult<ParsedStructs> {
    let root = xml::parse_document(input).map_err(|e| schema_error(source, e.to_string()))?;
    if root.name != "gstructs" {
        return Err(schema_error(
            source,
            format!("expected <gstructs> root, found <{}>", root.name),
        ));
    }

    let mut parsed = ParsedStructs::default();
    for node in &root.children {
        match node.name.as_str() {
            "requires" => {
                if let Some(file) = node.get_attr("file") {
                    parsed.requires.push(file.to_string());
                }
            }
            "gstruct" => {
                let def = parse_gstruct(node, source, &mut parsed.warnings)?;
                parsed.classes.push(def);
            }
            _ => {}
        }
    }
    Ok(parsed)
}

fn schema_error(source: &str, message: String) -> GrtError {
    GrtError::Schema {
        source_name: source.to_string(),
        message,
    }
}

/// `attr:*` attributes of a node, prefix stripped
fn load_attributes(node: &XmlElement) -> BTreeMap<String, String> {
    node.attributes
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("attr:").map(|k| (k.to_string(), v.clone())))
        .collect()
}

fn parse_gstruct(node: &XmlElement, source: &str, warnings: &mut Vec<String>) -> GrtResult<ClassDef> {
    let name = match node.get_attr("name") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(schema_error(source, "gstruct without a name".to_string())),
    };

    let mut def = ClassDef {
        parent: node
            .get_attr("parent")
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        source: source.to_string(),
        attributes: load_attributes(node),
        impl_data: node.get_flag("impl-data"),
        force_impl: node.get_flag("force-impl"),
        watch_lists: node.get_flag("watch-lists"),
        watch_dicts: node.get_flag("watch-dicts"),
        name,
        ..ClassDef::default()
    };

    for block in &node.children {
        if !matches!(block.name.as_str(), "members" | "methods" | "signals") {
            continue;
        }
        for item in &block.children {
            match item.name.as_str() {
                "member" if item.get_flag("override-attributes-only") => {
                    let name = item.get_attr("name").unwrap_or_default().to_string();
                    def.member_attributes.entry(name).or_default().extend(load_attributes(item));
                }
                "member" => {
                    let member = parse_member(&def.name, item, warnings);
                    def.members.insert(member.name.clone(), member);
                }
                "method" | "constructor" => {
                    let method = parse_method(&def.name, item, warnings);
                    def.methods.insert(method.name.clone(), method);
                }
                "signal" => def.signals.push(parse_signal(&def.name, item, warnings)),
                _ => {}
            }
        }
    }
    Ok(def)
}

/// Type spec from `type`, `content-type`, `struct-name`, `content-struct-name`
fn parse_type_spec(node: &XmlElement, allow_void: bool) -> Result<TypeSpec, String> {
    let type_name = node.get_attr("type").unwrap_or_default();
    let mut spec = TypeSpec::default();
    if allow_void && type_name == "void" {
        return Ok(spec);
    }
    spec.base.kind = Type::from_name(type_name);
    match spec.base.kind {
        Type::Unknown => return Err(format!("unknown type '{}'", type_name)),
        Type::List | Type::Dict => {
            if let Some(content) = node.get_attr("content-type").filter(|c| !c.is_empty()) {
                spec.content.kind = Type::from_name(content);
                if spec.content.kind == Type::Unknown {
                    return Err(format!("unknown content-type '{}'", content));
                }
            }
            if let Some(class) = node.get_attr("content-struct-name").filter(|c| !c.is_empty()) {
                spec.content.object_class = class.to_string();
            }
        }
        Type::Object => match node.get_attr("struct-name").filter(|c| !c.is_empty()) {
            Some(class) => spec.base.object_class = class.to_string(),
            None => return Err("object without struct-name".to_string()),
        },
        _ => {}
    }
    Ok(spec)
}

fn parse_member(class: &str, node: &XmlElement, warnings: &mut Vec<String>) -> ClassMember {
    let name = node.get_attr("name").unwrap_or_default().to_string();
    let mut member = ClassMember {
        default_value: node.get_attr("default").unwrap_or_default().to_string(),
        read_only: node.get_flag("read-only"),
        private: node.get_flag("private"),
        delegate_get: node.get_flag("delegate-get"),
        delegate_set: node.get_flag("delegate-set"),
        calculated: node.get_flag("calculated"),
        owned: node.get_flag("owned"),
        overrides: !matches!(node.get_attr("overrides"), None | Some("") | Some("0")),
        allow_null: node.get_flag("allow-null"),
        attributes: load_attributes(node),
        name,
        ..ClassMember::default()
    };

    match parse_type_spec(node, false) {
        Ok(spec) => member.type_spec = spec,
        Err(e) => warnings.push(format!("{}::{} contains invalid type specification: {}", class, member.name, e)),
    }

    let kind = member.type_spec.base.kind;
    if member.owned && !(kind.is_container() || kind == Type::Object) {
        warnings.push(format!("{}::{} marked as 'owned', but is not an object", class, member.name));
    }
    if member.calculated && (!member.delegate_get || (!member.read_only && !member.delegate_set)) {
        warnings.push(format!(
            "{}::{} marked as 'calculated', but accessors are not delegated",
            class, member.name
        ));
    }
    if member.calculated && member.private {
        warnings.push(format!("{}::{} marked as 'private' and 'calculated'", class, member.name));
    }
    if member.calculated && member.owned {
        warnings.push(format!("{}::{} marked as 'owned' and 'calculated'", class, member.name));
    }
    // containers are filled in place, never replaced
    if kind.is_container() {
        member.read_only = true;
    }
    member
}

fn parse_method(class: &str, node: &XmlElement, warnings: &mut Vec<String>) -> ClassMethod {
    let mut method = ClassMethod {
        name: node.get_attr("name").unwrap_or_default().to_string(),
        constructor: node.name == "constructor" || node.get_flag("constructor"),
        is_abstract: node.get_flag("abstract"),
        ..ClassMethod::default()
    };
    if method.constructor && method.is_abstract {
        warnings.push(format!("{}::{} cannot be both abstract and constructor", class, method.name));
    }

    let mut returns = 0;
    for arg in &node.children {
        match arg.name.as_str() {
            "argument" => {
                let name = arg.get_attr("name").unwrap_or_default().to_string();
                let type_spec = parse_type_spec(arg, false).unwrap_or_else(|e| {
                    warnings.push(format!("{}::{}::{} invalid argument type: {}", class, method.name, name, e));
                    TypeSpec::default()
                });
                method.arg_types.push(ArgSpec { name, type_spec });
            }
            "return" => {
                returns += 1;
                match parse_type_spec(arg, true) {
                    Ok(spec) if !method.constructor => method.ret_type = spec,
                    Ok(_) => warnings.push(format!("{}::{} constructor declares a return type", class, method.name)),
                    Err(e) => warnings.push(format!("{}::{} invalid return type: {}", class, method.name, e)),
                }
            }
            _ => {}
        }
    }
    if returns != 1 && !method.constructor {
        warnings.push(format!(
            "{}::{} has {} return value specifications",
            class, method.name, returns
        ));
    }
    method
}

fn parse_signal(class: &str, node: &XmlElement, warnings: &mut Vec<String>) -> ClassSignal {
    let mut signal = ClassSignal {
        name: node.get_attr("name").unwrap_or_default().to_string(),
        arg_types: Vec::new(),
    };
    for arg in node.children_named("argument") {
        let type_name = arg.get_attr("type").unwrap_or_default();
        let base = match type_name {
            // bool arguments travel as integers
            "bool" | "int" => SimpleTypeSpec::new(Type::Integer),
            "double" => SimpleTypeSpec::new(Type::Double),
            "string" => SimpleTypeSpec::new(Type::String),
            "object" => SimpleTypeSpec::object(arg.get_attr("struct-name").unwrap_or_default()),
            other => {
                warnings.push(format!(
                    "signal {}::{} has invalid argument type '{}'",
                    class, signal.name, other
                ));
                SimpleTypeSpec::default()
            }
        };
        signal.arg_types.push(ArgSpec {
            name: arg.get_attr("name").unwrap_or_default().to_string(),
            type_spec: TypeSpec {
                base,
                content: SimpleTypeSpec::default(),
            },
        });
    }
    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<gstructs xmlns:attr="http://www.mysql.com/grt/struct-attribute">
  <requires file="structs.base.xml"/>
  <gstruct name="test.Shape" attr:caption="Shape">
    <members>
      <member name="name" type="string" default="unnamed" attr:desc="display name"/>
      <member name="points" type="list" content-type="int"/>
      <member name="area" type="real" calculated="1" delegate-get="1" read-only="1"/>
      <member name="width" type="int" owned="1"/>
      <method name="scale">
        <argument name="factor" type="real"/>
        <return type="void"/>
      </method>
      <signal name="changed">
        <argument name="flag" type="bool"/>
      </signal>
    </members>
  </gstruct>
  <gstruct name="test.Circle" parent="test.Shape" impl-data="1">
    <members>
      <member name="center" type="object" struct-name="test.Point" owned="1"/>
      <member name="name" override-attributes-only="1" attr:desc="circle name"/>
    </members>
  </gstruct>
</gstructs>"#;

    #[test]
    fn test_parse_sample() {
        let parsed = parse_structs(SAMPLE, "sample.xml").unwrap();
        assert_eq!(parsed.requires, vec!["structs.base.xml".to_string()]);
        assert_eq!(parsed.classes.len(), 2);

        let shape = &parsed.classes[0];
        assert_eq!(shape.name, "test.Shape");
        assert_eq!(shape.parent, None);
        assert_eq!(shape.attributes.get("caption").map(String::as_str), Some("Shape"));
        assert_eq!(shape.members["name"].default_value, "unnamed");
        assert_eq!(
            shape.members["name"].attributes.get("desc").map(String::as_str),
            Some("display name")
        );
        assert!(shape.members["points"].read_only);
        assert_eq!(shape.members["points"].type_spec.content.kind, Type::Integer);
        assert!(shape.members["area"].calculated);
        assert_eq!(shape.methods["scale"].arg_types.len(), 1);
        assert_eq!(shape.signals[0].arg_types[0].type_spec.base.kind, Type::Integer);

        let circle = &parsed.classes[1];
        assert_eq!(circle.parent.as_deref(), Some("test.Shape"));
        assert!(circle.impl_data);
        assert!(!circle.members.contains_key("name"));
        assert_eq!(
            circle.member_attributes["name"].get("desc").map(String::as_str),
            Some("circle name")
        );
        assert_eq!(
            circle.referenced_classes(),
            vec!["test.Shape", "test.Point"]
        );
    }

    #[test]
    fn test_owned_simple_member_warns() {
        let parsed = parse_structs(SAMPLE, "sample.xml").unwrap();
        assert!(parsed
            .warnings
            .iter()
            .any(|w| w.contains("test.Shape::width") && w.contains("owned")));
    }

    #[test]
    fn test_wrong_root_is_error() {
        let err = parse_structs("<structs/>", "bad.xml").unwrap_err();
        assert!(matches!(err, GrtError::Schema { .. }));
    }

    #[test]
    fn test_unnamed_struct_is_error() {
        let err = parse_structs("<gstructs><gstruct/></gstructs>", "bad.xml").unwrap_err();
        assert!(matches!(err, GrtError::Schema { .. }));
    }
}
