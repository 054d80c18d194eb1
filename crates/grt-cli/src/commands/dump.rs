//! `grt dump`: print the value tree of a document.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use grt_engine::{ObjectRef, Value, ValueRef};
use serde_json::{json, Map};

use super::Setup;

pub fn execute(setup: &Setup, file: &Path, as_json: bool) -> anyhow::Result<()> {
    let grt = setup.context()?;
    let mut unserializer = grt.unserializer();
    let value = unserializer
        .load_from_xml(file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    tracing::debug!(file = %file.display(), "document loaded");

    if as_json {
        let document = json!({
            "document_type": unserializer.document_type(),
            "version": unserializer.document_version(),
            "value": to_json(&value),
            "dangling_links": unserializer.invalid_links(),
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("document type: {}", unserializer.document_type());
    println!("version:       {}", unserializer.document_version());
    println!("{}", value.debug_description());
    let dangling = unserializer.invalid_links();
    if !dangling.is_empty() {
        println!("dangling links: {}", dangling.join(", "));
    }
    Ok(())
}

/// JSON rendering of a value; objects seen before become `{"__link__": id}`
pub fn to_json(value: &ValueRef) -> serde_json::Value {
    let mut seen = HashSet::new();
    convert(value, &mut seen)
}

fn convert(value: &ValueRef, seen: &mut HashSet<usize>) -> serde_json::Value {
    match value.get() {
        None => serde_json::Value::Null,
        Some(Value::Integer(v)) => json!(v),
        Some(Value::Double(v)) => json!(v),
        Some(Value::String(v)) => json!(v),
        Some(Value::List(list)) => {
            if !seen.insert(value.identity()) {
                return json!("[...]");
            }
            serde_json::Value::Array(list.items().iter().map(|item| convert(item, seen)).collect())
        }
        Some(Value::Dict(dict)) => {
            if !seen.insert(value.identity()) {
                return json!("{...}");
            }
            let map: Map<String, serde_json::Value> = dict
                .entries()
                .into_iter()
                .map(|(key, item)| (key, convert(&item, seen)))
                .collect();
            serde_json::Value::Object(map)
        }
        Some(Value::Object(object)) => {
            if !seen.insert(value.identity()) {
                return json!({ "__link__": object.id() });
            }
            let mut map = Map::new();
            map.insert("__id__".to_string(), json!(object.id()));
            map.insert("__class__".to_string(), json!(object.class().name()));
            let Ok(object_ref) = ObjectRef::cast_from(value) else {
                return serde_json::Value::Object(map);
            };
            object.class().foreach_member(|member| {
                if !member.calculated {
                    let item = object_ref.get_member(&member.name).unwrap_or_default();
                    map.insert(member.name.clone(), convert(&item, seen));
                }
                true
            });
            serde_json::Value::Object(map)
        }
    }
}
