//! Value tree helpers: paths, lookup by id, copying and merging

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::error::{GrtError, GrtResult};
use crate::types::Type;
use crate::value::{DictRef, ListRef, ObjectId, ObjectRef, Value, ValueRef};

/// New globally unique object id
pub fn get_guid() -> String {
    format!("{{{}}}", Uuid::new_v4().hyphenated().to_string().to_uppercase())
}

fn bad_path(path: &str, segment: &str) -> GrtError {
    GrtError::BadPath(format!("{} (at '{}')", path, segment))
}

/// Follow a `/` separated path from `root`
///
/// Dict segments are keys, list segments are indices and object segments
/// are member names. `/` alone names the root.
pub fn get_value_by_path(root: &ValueRef, path: &str) -> GrtResult<ValueRef> {
    if !path.starts_with('/') {
        return Err(GrtError::BadPath(path.to_string()));
    }
    let mut value = root.clone();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        value = match value.get() {
            Some(Value::Dict(dict)) => dict.get(segment),
            Some(Value::List(list)) => {
                let index: usize = segment.parse().map_err(|_| bad_path(path, segment))?;
                list.get(index).map_err(|_| bad_path(path, segment))?
            }
            Some(Value::Object(_)) => ObjectRef::cast_from(&value)?
                .get_member(segment)
                .map_err(|_| bad_path(path, segment))?,
            _ => return Err(bad_path(path, segment)),
        };
        if !value.is_valid() {
            return Err(bad_path(path, segment));
        }
    }
    Ok(value)
}

/// Replace the value at `path`; the parent container must exist
pub fn set_value_by_path(root: &ValueRef, path: &str, new_value: ValueRef) -> GrtResult<()> {
    let trimmed = path.trim_end_matches('/');
    let Some(slash) = trimmed.rfind('/') else {
        return Err(GrtError::BadPath(path.to_string()));
    };
    let (front, last) = (&trimmed[..slash], &trimmed[slash + 1..]);
    if last.is_empty() {
        return Err(GrtError::BadPath(path.to_string()));
    }
    let front = if front.is_empty() { "/" } else { front };
    let container = get_value_by_path(root, front)?;
    match container.get() {
        Some(Value::Dict(_)) => {
            DictRef::cast_from(&container)?.set(last, new_value)?;
        }
        Some(Value::Object(_)) => {
            ObjectRef::cast_from(&container)?.set_member(last, new_value)?;
        }
        Some(Value::List(_)) => {
            let index: usize = last.parse().map_err(|_| bad_path(path, last))?;
            ListRef::cast_from(&container)?.gset(index, new_value)?;
        }
        _ => return Err(bad_path(path, front)),
    }
    Ok(())
}

/// Depth-first search for the object with `id` below `value`
///
/// `owner` back references are not followed and every container is visited
/// at most once.
pub fn find_child_object(value: &ValueRef, id: &str) -> ObjectRef {
    let mut visited = FxHashSet::default();
    find_in(value, id, &mut visited)
}

fn find_in(value: &ValueRef, id: &str, visited: &mut FxHashSet<usize>) -> ObjectRef {
    if !value.is_valid() || !visited.insert(value.identity()) {
        return ObjectRef::invalid();
    }
    match value.get() {
        Some(Value::List(list)) => {
            if list.content_type().kind.is_simple() {
                return ObjectRef::invalid();
            }
            for item in list.items() {
                let found = find_in(&item, id, visited);
                if found.is_valid() {
                    return found;
                }
            }
        }
        Some(Value::Dict(dict)) => {
            if dict.content_type().kind.is_simple() {
                return ObjectRef::invalid();
            }
            for (_, item) in dict.entries() {
                let found = find_in(&item, id, visited);
                if found.is_valid() {
                    return found;
                }
            }
        }
        Some(Value::Object(object)) => {
            if object.id() == id {
                return ObjectRef::wrap(value.clone());
            }
            let object_ref = ObjectRef::wrap(value.clone());
            let mut found = ObjectRef::invalid();
            object.class().foreach_member(|member| {
                if member.calculated || member.name == "owner" || member.type_spec.base.kind.is_simple() {
                    return true;
                }
                let item = object_ref.get_member(&member.name).unwrap_or_default();
                found = find_in(&item, id, visited);
                !found.is_valid()
            });
            return found;
        }
        _ => {}
    }
    ObjectRef::invalid()
}

/// Copy a value; containers get new identities
///
/// Shallow copies share the contents, deep copies also copy nested
/// containers and owned objects. Copied objects get fresh ids, and in a deep
/// copy non-owned references to objects copied along are repointed to the
/// copies.
pub fn copy_value(value: &ValueRef, deep: bool) -> GrtResult<ValueRef> {
    match value.get() {
        None | Some(Value::Integer(_) | Value::Double(_) | Value::String(_)) => Ok(value.clone()),
        Some(Value::List(list)) => {
            let copy = ListRef::with_null_policy(list.content_type().clone(), list.allow_null());
            for item in list.items() {
                let item = if deep { copy_value(&item, true)? } else { item };
                copy.ginsert_unchecked(item)?;
            }
            Ok(copy.into())
        }
        Some(Value::Dict(dict)) => {
            let copy = DictRef::with_null_policy(dict.content_type().clone(), dict.allow_null());
            let inner = copy.inner()?;
            for (key, item) in dict.entries() {
                let item = if deep { copy_value(&item, true)? } else { item };
                inner.set(key, item);
            }
            Ok(copy.into())
        }
        Some(Value::Object(_)) => {
            let source = ObjectRef::wrap(value.clone());
            let copy = if deep {
                copy_object(&source, &[])?
            } else {
                CopyContext::new().shallow_copy(&source)?
            };
            Ok(copy.into())
        }
    }
}

/// Deep copy of an object with references among the copies fixed up
pub fn copy_object(object: &ObjectRef, skip_members: &[&str]) -> GrtResult<ObjectRef> {
    let mut context = CopyContext::new();
    let copy = context.copy(object, skip_members)?;
    context.update_references()?;
    Ok(copy)
}

// ============================================================================
// CopyContext
// ============================================================================

/// Object copier remembering every copy it made
///
/// Several objects can be copied through one context; `update_references`
/// then repoints non-owned references between them to the copies.
#[derive(Debug, Default)]
pub struct CopyContext {
    copies_by_id: FxHashMap<ObjectId, ObjectRef>,
    copies: Vec<ObjectRef>,
}

impl CopyContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `object`, its owned objects and containers
    pub fn copy(&mut self, object: &ObjectRef, skip_members: &[&str]) -> GrtResult<ObjectRef> {
        let copy = self.duplicate(object, skip_members, false)?;
        if copy.is_valid() {
            self.copies.push(copy.clone());
        }
        Ok(copy)
    }

    /// Copy `object` alone; members keep pointing at the original contents
    pub fn shallow_copy(&mut self, object: &ObjectRef) -> GrtResult<ObjectRef> {
        let copy = self.duplicate(object, &[], true)?;
        if copy.is_valid() {
            self.copies.push(copy.clone());
        }
        Ok(copy)
    }

    /// Copy made of the object with `original_id`, if any
    pub fn copy_for(&self, original_id: &str) -> Option<ObjectRef> {
        self.copies_by_id.get(original_id).cloned()
    }

    /// Repoint non-owned references to copied objects at their copies
    pub fn update_references(&self) -> GrtResult<()> {
        let mut visited = FxHashSet::default();
        for copy in &self.copies {
            self.fixup(copy, &mut visited)?;
        }
        Ok(())
    }

    fn remap(&self, value: &ValueRef) -> Option<ValueRef> {
        let object = ObjectRef::cast_from(value).ok()?;
        self.copies_by_id.get(&object.id()).map(|c| c.clone().into())
    }

    fn duplicate(&mut self, object: &ObjectRef, skip_members: &[&str], shallow: bool) -> GrtResult<ObjectRef> {
        let Some(class) = object.class() else {
            return Ok(ObjectRef::invalid());
        };
        let copy = class.allocate()?;
        self.copies_by_id.insert(object.id(), copy.clone());

        let mut members = Vec::new();
        class.foreach_member(|member| {
            if !member.calculated && !skip_members.contains(&member.name.as_str()) {
                members.push(member.clone());
            }
            true
        });

        for member in members {
            let value = object.get_member(&member.name)?;
            let dont_follow = shallow || !member.owned;
            match member.type_spec.base.kind {
                Type::List if value.is_valid() => {
                    let target = self.target_list(&copy, &member.name, &value)?;
                    self.copy_list_items(&target, &ListRef::cast_from(&value)?, dont_follow)?;
                }
                Type::Dict if value.is_valid() => {
                    let target = self.target_dict(&copy, &member.name, &value)?;
                    self.copy_dict_items(&target, &DictRef::cast_from(&value)?, dont_follow)?;
                }
                Type::Object if value.is_valid() => {
                    let item = if dont_follow {
                        self.remap(&value).unwrap_or(value)
                    } else {
                        let owned = ObjectRef::cast_from(&value)?;
                        self.duplicate(&owned, &[], false)?.into()
                    };
                    copy.set_member_internal(&member.name, item, true)?;
                }
                Type::List | Type::Dict | Type::Object => {}
                _ => copy.set_member_internal(&member.name, value, true)?,
            }
        }
        Ok(copy)
    }

    // the allocator normally provides empty containers; build one otherwise
    fn target_list(&self, copy: &ObjectRef, member: &str, source: &ValueRef) -> GrtResult<ListRef> {
        let existing = copy.get_member(member)?;
        if existing.is_valid() {
            return ListRef::cast_from(&existing);
        }
        let source = ListRef::cast_from(source)?;
        let list = ListRef::with_null_policy(source.content_type(), source.inner()?.allow_null());
        copy.set_member_internal(member, list.clone().into(), true)?;
        Ok(list)
    }

    fn target_dict(&self, copy: &ObjectRef, member: &str, source: &ValueRef) -> GrtResult<DictRef> {
        let existing = copy.get_member(member)?;
        if existing.is_valid() {
            return DictRef::cast_from(&existing);
        }
        let source = DictRef::cast_from(source)?;
        let inner = source.inner()?;
        let dict = DictRef::with_null_policy(inner.content_type().clone(), inner.allow_null());
        copy.set_member_internal(member, dict.clone().into(), true)?;
        Ok(dict)
    }

    fn copy_item(&mut self, item: ValueRef, dont_follow: bool) -> GrtResult<ValueRef> {
        if dont_follow {
            return Ok(item);
        }
        match item.value_type() {
            Type::List => {
                let source = ListRef::cast_from(&item)?;
                let list = ListRef::with_null_policy(source.content_type(), source.inner()?.allow_null());
                self.copy_list_items(&list, &source, false)?;
                Ok(list.into())
            }
            Type::Dict => {
                let source = DictRef::cast_from(&item)?;
                let inner = source.inner()?;
                let dict = DictRef::with_null_policy(inner.content_type().clone(), inner.allow_null());
                self.copy_dict_items(&dict, &source, false)?;
                Ok(dict.into())
            }
            Type::Object => Ok(self.copy(&ObjectRef::cast_from(&item)?, &[])?.into()),
            _ => Ok(item),
        }
    }

    fn copy_list_items(&mut self, target: &ListRef, source: &ListRef, dont_follow: bool) -> GrtResult<()> {
        for item in source.items() {
            let item = self.copy_item(item, dont_follow)?;
            target.ginsert_unchecked(item)?;
        }
        Ok(())
    }

    fn copy_dict_items(&mut self, target: &DictRef, source: &DictRef, dont_follow: bool) -> GrtResult<()> {
        let inner = target.inner()?;
        for (key, item) in source.entries() {
            let item = self.copy_item(item, dont_follow)?;
            inner.set(key, item);
        }
        Ok(())
    }

    fn fixup(&self, copy: &ObjectRef, visited: &mut FxHashSet<usize>) -> GrtResult<()> {
        if !visited.insert(copy.as_value().identity()) {
            return Ok(());
        }
        let Some(class) = copy.class() else {
            return Ok(());
        };
        let mut members = Vec::new();
        class.foreach_member(|member| {
            if !member.calculated && !member.type_spec.base.kind.is_simple() {
                members.push(member.clone());
            }
            true
        });

        for member in members {
            let value = copy.get_member(&member.name)?;
            if !value.is_valid() {
                continue;
            }
            match member.type_spec.base.kind {
                Type::List => {
                    let list = ListRef::cast_from(&value)?;
                    for (index, item) in list.items().into_iter().enumerate() {
                        if item.value_type() != Type::Object {
                            continue;
                        }
                        if member.owned {
                            self.fixup(&ObjectRef::cast_from(&item)?, visited)?;
                        } else if let Some(mapped) = self.remap(&item) {
                            list.gset_unchecked(index, mapped)?;
                        }
                    }
                }
                Type::Dict => {
                    let dict = DictRef::cast_from(&value)?;
                    let inner = dict.inner()?;
                    for (key, item) in dict.entries() {
                        if item.value_type() != Type::Object {
                            continue;
                        }
                        if member.owned {
                            self.fixup(&ObjectRef::cast_from(&item)?, visited)?;
                        } else if let Some(mapped) = self.remap(&item) {
                            inner.set(key, mapped);
                        }
                    }
                }
                Type::Object => {
                    if member.owned {
                        self.fixup(&ObjectRef::cast_from(&value)?, visited)?;
                    } else if let Some(mapped) = self.remap(&value) {
                        copy.set_member_internal(&member.name, mapped, true)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ============================================================================
// Content helpers
// ============================================================================

/// Give `object` and every object it owns a fresh id
pub fn update_ids(object: &ObjectRef, skip_members: &[&str]) -> GrtResult<()> {
    let Some(class) = object.class() else {
        return Ok(());
    };
    let mut owned = Vec::new();
    class.foreach_member(|member| {
        if member.owned && !member.calculated && !skip_members.contains(&member.name.as_str()) {
            owned.push(member.clone());
        }
        true
    });
    for member in owned {
        let value = object.get_member(&member.name)?;
        match member.type_spec.base.kind {
            Type::List if value.is_valid() => {
                for item in ListRef::cast_from(&value)?.items() {
                    if ObjectRef::can_wrap(&item) {
                        update_ids(&ObjectRef::cast_from(&item)?, skip_members)?;
                    }
                }
            }
            Type::Object if value.is_valid() => update_ids(&ObjectRef::cast_from(&value)?, skip_members)?,
            _ => {}
        }
    }
    object.set_id(&get_guid())
}

/// Append every entry of `source` to `target`, checked
pub fn append_contents(target: &ListRef, source: &ListRef) -> GrtResult<()> {
    for item in source.items() {
        target.ginsert(item)?;
    }
    Ok(())
}

/// Make `target` hold the entries of `source`
pub fn replace_list_contents(target: &ListRef, source: &ListRef) -> GrtResult<()> {
    let items = source.items();
    target.inner()?.clear();
    for item in items {
        target.ginsert(item)?;
    }
    Ok(())
}

/// Make `target` hold the entries of `source`
pub fn replace_dict_contents(target: &DictRef, source: &DictRef) -> GrtResult<()> {
    let entries = source.entries();
    target.inner()?.clear();
    for (key, item) in entries {
        target.set(key, item)?;
    }
    Ok(())
}

/// Copy the entries of `source` into `target`; existing keys are kept unless `overwrite`
pub fn merge_dict_contents(target: &DictRef, source: &DictRef, overwrite: bool) -> GrtResult<()> {
    for (key, item) in source.entries() {
        if overwrite || !target.has_key(&key) {
            target.set(key, item)?;
        }
    }
    Ok(())
}

fn merge_objects_by<F>(target: &ListRef, source: &ListRef, replace_matching: bool, key_of: F) -> GrtResult<()>
where
    F: Fn(&ObjectRef) -> GrtResult<String>,
{
    let mut known = FxHashMap::default();
    for (index, item) in target.items().iter().enumerate() {
        if item.is_valid() {
            known.insert(key_of(&ObjectRef::cast_from(item)?)?, index);
        }
    }
    for item in source.items().into_iter().filter(ValueRef::is_valid) {
        let key = key_of(&ObjectRef::cast_from(&item)?)?;
        match known.get(&key) {
            Some(&index) if replace_matching => {
                target.gset(index, item)?;
            }
            Some(_) => {}
            None => target.ginsert(item)?,
        }
    }
    Ok(())
}

/// Add objects of `source` whose name is not in `target`; matching names are
/// replaced when `replace_matching`
pub fn merge_contents_by_name(target: &ListRef, source: &ListRef, replace_matching: bool) -> GrtResult<()> {
    merge_objects_by(target, source, replace_matching, |object| object.get_string_member("name"))
}

/// Add objects of `source` whose id is not in `target`; matching ids are
/// replaced when `replace_matching`
pub fn merge_contents_by_id(target: &ListRef, source: &ListRef, replace_matching: bool) -> GrtResult<()> {
    merge_objects_by(target, source, replace_matching, |object| Ok(object.id()))
}

/// Copy every writable member of `source` into `target`
pub fn merge_object_contents(target: &ObjectRef, source: &ObjectRef) -> GrtResult<()> {
    let Some(class) = source.class() else {
        return Ok(());
    };
    let mut members = Vec::new();
    class.foreach_member(|member| {
        if !member.read_only && !member.calculated {
            members.push(member.name.clone());
        }
        true
    });
    for name in members {
        target.set_member(&name, source.get_member(&name)?)?;
    }
    Ok(())
}
