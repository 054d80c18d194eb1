//! Metaclass table and native class registry

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::{ClassBinding, ClassDef, ClassMember, MetaClass};
use crate::error::{GrtError, GrtResult};
use crate::types::Type;

/// Name of the implicit root class
pub const BASE_CLASS_NAME: &str = "Object";

/// Native implementations registered by name, bound when loading ends
#[derive(Debug, Default)]
pub struct ClassRegistry {
    bindings: FxHashMap<String, ClassBinding>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation of a class
    pub fn register(&mut self, class_name: impl Into<String>, binding: ClassBinding) {
        self.bindings.insert(class_name.into(), binding);
    }

    /// Implementation registered for a class
    pub fn get(&self, class_name: &str) -> Option<&ClassBinding> {
        self.bindings.get(class_name)
    }

    /// True if a class has a registered implementation
    pub fn contains(&self, class_name: &str) -> bool {
        self.bindings.contains_key(class_name)
    }

    /// Number of registered implementations
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Every loaded class, plus definitions waiting for `end_loading`
#[derive(Debug)]
pub struct MetaClassTable {
    classes: FxHashMap<String, Arc<MetaClass>>,
    order: Vec<Arc<MetaClass>>,
    pending: BTreeMap<String, ClassDef>,
}

impl Default for MetaClassTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaClassTable {
    /// Table holding only the base class
    pub fn new() -> Self {
        let base = Arc::new(MetaClass::base());
        base.bind(ClassBinding::generic());
        let mut classes = FxHashMap::default();
        classes.insert(BASE_CLASS_NAME.to_string(), base.clone());
        Self {
            classes,
            order: vec![base],
            pending: BTreeMap::new(),
        }
    }

    /// Loaded class by name
    pub fn get(&self, name: &str) -> Option<Arc<MetaClass>> {
        self.classes.get(name).cloned()
    }

    /// All loaded classes, parents before children
    pub fn classes(&self) -> &[Arc<MetaClass>] {
        &self.order
    }

    /// Definitions not yet frozen
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Classes referenced but not yet defined
    pub fn placeholder_names(&self) -> Vec<String> {
        self.pending
            .values()
            .filter(|d| d.placeholder)
            .map(|d| d.name.clone())
            .collect()
    }

    /// Add parsed definitions, filling placeholders and creating new ones
    ///
    /// The batch is checked as a whole first; on error nothing is added.
    pub fn add_definitions(&mut self, defs: Vec<ClassDef>) -> GrtResult<()> {
        let mut batch = FxHashSet::default();
        for def in &defs {
            let taken = self.classes.contains_key(&def.name)
                || self.pending.get(&def.name).map_or(false, |d| !d.placeholder);
            if taken || !batch.insert(def.name.as_str()) {
                return Err(GrtError::DuplicateClass {
                    name: def.name.clone(),
                    source_name: def.source.clone(),
                });
            }
        }

        for def in defs {
            let referenced: Vec<String> = def
                .referenced_classes()
                .into_iter()
                .map(str::to_string)
                .collect();
            let source = def.source.clone();
            self.pending.insert(def.name.clone(), def);
            for name in referenced {
                if !self.classes.contains_key(&name) && !self.pending.contains_key(&name) {
                    debug!(class = %name, "creating metaclass placeholder");
                    self.pending.insert(name.clone(), ClassDef::placeholder(&name, &source));
                }
            }
        }
        Ok(())
    }

    fn parent_name<'a>(&'a self, class: &'a str) -> Option<&'a str> {
        if let Some(def) = self.pending.get(class) {
            return Some(def.parent.as_deref().unwrap_or(BASE_CLASS_NAME));
        }
        self.classes
            .get(class)
            .and_then(|c| c.parent())
            .map(|p| p.name())
    }

    /// Inheritance check over both frozen and pending classes
    fn name_is_a(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        let mut guard = 0;
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            guard += 1;
            if guard > self.classes.len() + self.pending.len() {
                return false;
            }
            current = self.parent_name(name);
        }
        false
    }

    /// Member visible from the parent chain of `class`
    fn inherited_member(&self, class: &str, member: &str) -> Option<ClassMember> {
        let mut current = self.parent_name(class);
        let mut guard = 0;
        while let Some(name) = current {
            if let Some(def) = self.pending.get(name) {
                if let Some(m) = def.members.get(member) {
                    return Some(m.clone());
                }
            } else if let Some(frozen) = self.classes.get(name) {
                return frozen.get_member_info(member).cloned();
            }
            guard += 1;
            if guard > self.classes.len() + self.pending.len() {
                return None;
            }
            current = self.parent_name(name);
        }
        None
    }

    /// Check overriding members against the definitions they replace
    fn validate(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut overriding: Vec<(String, String)> = Vec::new();

        for def in self.pending.values() {
            for member in def.members.values() {
                let Some(inherited) = self.inherited_member(&def.name, &member.name) else {
                    continue;
                };
                let (mine, theirs) = (&member.type_spec, &inherited.type_spec);
                if mine.base.kind != theirs.base.kind {
                    errors.push(format!(
                        "{}::{} overrides a member with a different base type",
                        def.name, member.name
                    ));
                    continue;
                }
                match theirs.base.kind {
                    Type::List | Type::Dict => {
                        if mine.content.kind != theirs.content.kind {
                            errors.push(format!(
                                "{}::{} overrides a member with a different content type",
                                def.name, member.name
                            ));
                        } else if mine.content.kind == Type::Object
                            && !self.name_is_a(&mine.content.object_class, &theirs.content.object_class)
                        {
                            errors.push(format!(
                                "{}::{} overrides a member with an incompatible content struct",
                                def.name, member.name
                            ));
                        }
                    }
                    Type::Object => {
                        if !self.name_is_a(&mine.base.object_class, &theirs.base.object_class) {
                            errors.push(format!(
                                "{}::{} overrides a member with an incompatible struct",
                                def.name, member.name
                            ));
                        }
                    }
                    _ => {}
                }
                overriding.push((def.name.clone(), member.name.clone()));
            }
        }

        for (class, member) in overriding {
            if let Some(m) = self
                .pending
                .get_mut(&class)
                .and_then(|d| d.members.get_mut(&member))
            {
                m.overrides = true;
            }
        }
        errors
    }

    /// Pending definitions ordered parents first
    fn topological_order(&self) -> Vec<String> {
        fn visit(
            table: &MetaClassTable,
            name: &str,
            done: &mut FxHashSet<String>,
            out: &mut Vec<String>,
        ) {
            if done.contains(name) || !table.pending.contains_key(name) {
                return;
            }
            done.insert(name.to_string());
            if let Some(parent) = table.parent_name(name) {
                visit(table, parent, done, out);
            }
            out.push(name.to_string());
        }

        let mut done = FxHashSet::default();
        let mut out = Vec::with_capacity(self.pending.len());
        for name in self.pending.keys() {
            visit(self, name, &mut done, &mut out);
        }
        out
    }

    /// Validate and freeze all pending definitions
    ///
    /// Returns warnings about classes left without an implementation when
    /// `check_class_binding` is set. On error the pending batch is dropped.
    pub fn end_loading(
        &mut self,
        registry: &ClassRegistry,
        check_class_binding: bool,
    ) -> GrtResult<Vec<String>> {
        let unresolved = self.placeholder_names();
        if !unresolved.is_empty() {
            self.pending.clear();
            return Err(GrtError::UnresolvedPlaceholders(unresolved));
        }

        let errors = self.validate();
        if !errors.is_empty() {
            self.pending.clear();
            return Err(GrtError::Validation(errors));
        }

        let mut warnings = Vec::new();
        for name in self.topological_order() {
            let Some(def) = self.pending.remove(&name) else {
                continue;
            };
            let parent_name = def.parent.clone().unwrap_or_else(|| BASE_CLASS_NAME.to_string());
            let parent = self.classes.get(&parent_name).cloned();
            if parent.is_none() {
                // a parent cycle leaves the parent unfrozen
                self.pending.clear();
                return Err(GrtError::Validation(vec![format!(
                    "{} has an unresolvable parent {}",
                    name, parent_name
                )]));
            }
            let class = Arc::new(MetaClass::from_def(def, parent));
            match registry.get(&name) {
                Some(binding) => class.bind(binding.clone()),
                None if check_class_binding => {
                    warnings.push(format!("Class {} is not bound to an implementation", name));
                }
                None => {}
            }
            debug!(class = %name, crc32 = class.crc32(), "metaclass loaded");
            self.classes.insert(name, class.clone());
            self.order.push(class);
        }
        Ok(warnings)
    }

    /// Bind an implementation to an already loaded class
    pub fn bind(&self, class_name: &str, binding: ClassBinding) -> bool {
        match self.classes.get(class_name) {
            Some(class) => {
                class.bind(binding);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metaclass::parse_structs;

    fn load(table: &mut MetaClassTable, xml: &str) -> GrtResult<Vec<String>> {
        let parsed = parse_structs(xml, "test.xml")?;
        table.add_definitions(parsed.classes)?;
        table.end_loading(&ClassRegistry::new(), false)
    }

    #[test]
    fn test_forward_parent_is_resolved() {
        let mut table = MetaClassTable::new();
        load(
            &mut table,
            r#"<gstructs>
                <gstruct name="t.Child" parent="t.Parent"/>
                <gstruct name="t.Parent"/>
            </gstructs>"#,
        )
        .unwrap();
        let names: Vec<&str> = table.classes().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Object", "t.Parent", "t.Child"]);
        assert!(table.get("t.Child").unwrap().is_a("t.Parent"));
    }

    #[test]
    fn test_placeholder_across_batches_in_one_load() {
        let mut table = MetaClassTable::new();
        let first = parse_structs(
            r#"<gstructs><gstruct name="t.A"><members>
                <member name="b" type="object" struct-name="t.B"/>
            </members></gstruct></gstructs>"#,
            "a.xml",
        )
        .unwrap();
        table.add_definitions(first.classes).unwrap();
        assert_eq!(table.placeholder_names(), vec!["t.B".to_string()]);

        let second = parse_structs(r#"<gstructs><gstruct name="t.B"/></gstructs>"#, "b.xml").unwrap();
        table.add_definitions(second.classes).unwrap();
        assert!(table.placeholder_names().is_empty());
        table.end_loading(&ClassRegistry::new(), false).unwrap();
        assert!(table.get("t.B").is_some());
    }

    #[test]
    fn test_unresolved_placeholder_is_fatal() {
        let mut table = MetaClassTable::new();
        let err = load(
            &mut table,
            r#"<gstructs><gstruct name="t.A" parent="t.Missing"/></gstructs>"#,
        )
        .unwrap_err();
        match err {
            GrtError::UnresolvedPlaceholders(names) => assert_eq!(names, vec!["t.Missing".to_string()]),
            other => panic!("unexpected {}", other),
        }
        assert!(table.get("t.A").is_none());
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_is_fatal() {
        let mut table = MetaClassTable::new();
        load(&mut table, r#"<gstructs><gstruct name="t.A"/></gstructs>"#).unwrap();
        let err = load(&mut table, r#"<gstructs><gstruct name="t.A"/></gstructs>"#).unwrap_err();
        assert!(matches!(err, GrtError::DuplicateClass { .. }));
    }

    #[test]
    fn test_override_marked_and_validated() {
        let mut table = MetaClassTable::new();
        load(
            &mut table,
            r#"<gstructs>
                <gstruct name="t.Base"><members>
                    <member name="name" type="string"/>
                </members></gstruct>
                <gstruct name="t.Derived" parent="t.Base"><members>
                    <member name="name" type="string" default="derived"/>
                </members></gstruct>
            </gstructs>"#,
        )
        .unwrap();
        let derived = table.get("t.Derived").unwrap();
        let member = derived.get_member_info("name").unwrap();
        assert!(member.overrides);
        assert_eq!(member.default_value, "derived");
    }

    #[test]
    fn test_incompatible_override_fails() {
        let mut table = MetaClassTable::new();
        let err = load(
            &mut table,
            r#"<gstructs>
                <gstruct name="t.Base"><members>
                    <member name="size" type="int"/>
                </members></gstruct>
                <gstruct name="t.Derived" parent="t.Base"><members>
                    <member name="size" type="string"/>
                </members></gstruct>
            </gstructs>"#,
        )
        .unwrap_err();
        assert!(matches!(err, GrtError::Validation(_)));
    }

    #[test]
    fn test_binding_warning_and_registry() {
        let mut table = MetaClassTable::new();
        let mut registry = ClassRegistry::new();
        registry.register("t.Bound", ClassBinding::generic());
        let parsed = parse_structs(
            r#"<gstructs><gstruct name="t.Bound"/><gstruct name="t.Free"/></gstructs>"#,
            "x.xml",
        )
        .unwrap();
        table.add_definitions(parsed.classes).unwrap();
        let warnings = table.end_loading(&registry, true).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("t.Free"));
        assert!(table.get("t.Bound").unwrap().is_bound());
        assert!(!table.get("t.Free").unwrap().is_bound());
        assert!(table.bind("t.Free", ClassBinding::generic()));
        assert!(table.get("t.Free").unwrap().is_bound());
    }
}
