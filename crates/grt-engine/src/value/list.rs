//! List values

use parking_lot::RwLock;

use super::{ListRef, Value, ValueRef};
use crate::error::{GrtError, GrtResult};
use crate::types::{SimpleTypeSpec, Type};

/// Ordered sequence with a declared content type
pub struct List {
    content: SimpleTypeSpec,
    allow_null: bool,
    items: RwLock<Vec<ValueRef>>,
}

impl List {
    pub(crate) fn new(content: SimpleTypeSpec, allow_null: bool) -> Self {
        Self {
            content,
            allow_null,
            items: RwLock::new(Vec::new()),
        }
    }

    /// Declared content type
    pub fn content_type(&self) -> &SimpleTypeSpec {
        &self.content
    }

    /// Whether null entries are accepted by checked inserts
    pub fn allow_null(&self) -> bool {
        self.allow_null
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.items.read().len()
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> GrtResult<ValueRef> {
        let items = self.items.read();
        items.get(index).cloned().ok_or(GrtError::IndexOutOfRange {
            index,
            count: items.len(),
        })
    }

    /// Snapshot of all entries
    pub fn items(&self) -> Vec<ValueRef> {
        self.items.read().clone()
    }

    /// Validate a value against the content type and null policy
    pub fn check_assignable(&self, value: &ValueRef) -> GrtResult<()> {
        value.check_assignable(&self.content, self.allow_null)
    }

    /// Checked insert; `None` appends
    pub fn ginsert(&self, value: ValueRef, index: Option<usize>) -> GrtResult<()> {
        self.check_assignable(&value)?;
        self.ginsert_unchecked(value, index)
    }

    /// Insert without validating the content type
    pub fn ginsert_unchecked(&self, value: ValueRef, index: Option<usize>) -> GrtResult<()> {
        let mut items = self.items.write();
        match index {
            None => items.push(value),
            Some(i) if i <= items.len() => items.insert(i, value),
            Some(i) => {
                return Err(GrtError::IndexOutOfRange {
                    index: i,
                    count: items.len(),
                })
            }
        }
        Ok(())
    }

    /// Checked replace
    pub fn gset(&self, index: usize, value: ValueRef) -> GrtResult<ValueRef> {
        self.check_assignable(&value)?;
        self.gset_unchecked(index, value)
    }

    /// Replace without validation; returns the previous entry
    pub fn gset_unchecked(&self, index: usize, value: ValueRef) -> GrtResult<ValueRef> {
        let mut items = self.items.write();
        let count = items.len();
        match items.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(GrtError::IndexOutOfRange { index, count }),
        }
    }

    /// Remove and return the entry at `index`
    pub fn remove(&self, index: usize) -> GrtResult<ValueRef> {
        let mut items = self.items.write();
        if index >= items.len() {
            return Err(GrtError::IndexOutOfRange {
                index,
                count: items.len(),
            });
        }
        Ok(items.remove(index))
    }

    /// Remove every entry equal to `value`; returns how many were removed
    pub fn remove_value(&self, value: &ValueRef) -> usize {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|item| !item.equals(value));
        before - items.len()
    }

    /// Move the entry at `from` so it ends up at `to`
    pub fn reorder(&self, from: usize, to: usize) -> GrtResult<()> {
        let mut items = self.items.write();
        let count = items.len();
        if from >= count || to >= count {
            return Err(GrtError::IndexOutOfRange {
                index: from.max(to),
                count,
            });
        }
        let item = items.remove(from);
        items.insert(to, item);
        Ok(())
    }

    /// Position of the first entry equal to `value`
    pub fn get_index(&self, value: &ValueRef) -> Option<usize> {
        self.items.read().iter().position(|item| item.equals(value))
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.items.write().clear();
    }
}

// ============================================================================
// ListRef
// ============================================================================

impl ListRef {
    /// New list accepting `content`; null entries allowed
    pub fn new(content: SimpleTypeSpec) -> Self {
        Self::with_null_policy(content, true)
    }

    /// New list accepting anything
    pub fn new_any() -> Self {
        Self::new(SimpleTypeSpec::default())
    }

    /// New list of objects of `class`
    pub fn new_objects(class: impl Into<String>) -> Self {
        Self::new(SimpleTypeSpec::object(class))
    }

    /// New list with an explicit null policy
    pub fn with_null_policy(content: SimpleTypeSpec, allow_null: bool) -> Self {
        Self::wrap(ValueRef::from_value(Value::List(List::new(content, allow_null))))
    }

    /// The list payload
    pub fn inner(&self) -> GrtResult<&List> {
        match self.payload()? {
            Value::List(list) => Ok(list),
            other => Err(GrtError::type_error(Type::List, other.value_type())),
        }
    }

    /// Number of entries, 0 for null
    pub fn count(&self) -> usize {
        self.inner().map_or(0, List::count)
    }

    /// Declared content type
    pub fn content_type(&self) -> SimpleTypeSpec {
        self.inner()
            .map(|l| l.content_type().clone())
            .unwrap_or_default()
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> GrtResult<ValueRef> {
        self.inner()?.get(index)
    }

    /// Snapshot of the entries
    pub fn items(&self) -> Vec<ValueRef> {
        self.inner().map(List::items).unwrap_or_default()
    }

    /// Checked append
    pub fn ginsert(&self, value: impl Into<ValueRef>) -> GrtResult<()> {
        self.inner()?.ginsert(value.into(), None)
    }

    /// Checked insert at a position
    pub fn ginsert_at(&self, value: impl Into<ValueRef>, index: usize) -> GrtResult<()> {
        self.inner()?.ginsert(value.into(), Some(index))
    }

    /// Unchecked append
    pub fn ginsert_unchecked(&self, value: impl Into<ValueRef>) -> GrtResult<()> {
        self.inner()?.ginsert_unchecked(value.into(), None)
    }

    /// Checked replace
    pub fn gset(&self, index: usize, value: impl Into<ValueRef>) -> GrtResult<ValueRef> {
        self.inner()?.gset(index, value.into())
    }

    /// Unchecked replace
    pub fn gset_unchecked(&self, index: usize, value: impl Into<ValueRef>) -> GrtResult<ValueRef> {
        self.inner()?.gset_unchecked(index, value.into())
    }

    /// Remove the entry at `index`
    pub fn remove(&self, index: usize) -> GrtResult<ValueRef> {
        self.inner()?.remove(index)
    }

    /// Move an entry
    pub fn reorder(&self, from: usize, to: usize) -> GrtResult<()> {
        self.inner()?.reorder(from, to)
    }

    /// Position of `value`
    pub fn get_index(&self, value: &ValueRef) -> Option<usize> {
        self.inner().ok().and_then(|l| l.get_index(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_insert_rejects_wrong_type() {
        let list = ListRef::new(SimpleTypeSpec::new(Type::Integer));
        list.ginsert(5).unwrap();
        let err = list.ginsert("five").unwrap_err();
        assert!(matches!(err, GrtError::TypeMismatch { .. }));
        assert_eq!(list.count(), 1);
    }

    #[test]
    fn test_unchecked_insert_accepts_anything() {
        let list = ListRef::new(SimpleTypeSpec::new(Type::Integer));
        list.ginsert_unchecked("five").unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(list.get(0).unwrap().as_str(), Some("five"));
    }

    #[test]
    fn test_null_policy() {
        let strict = ListRef::with_null_policy(SimpleTypeSpec::new(Type::String), false);
        assert!(matches!(
            strict.ginsert(ValueRef::invalid()),
            Err(GrtError::NullValue(_))
        ));
        let lax = ListRef::new(SimpleTypeSpec::new(Type::String));
        lax.ginsert(ValueRef::invalid()).unwrap();
        assert!(!lax.get(0).unwrap().is_valid());
    }

    #[test]
    fn test_insert_positions_and_reorder() {
        let list = ListRef::new_any();
        list.ginsert(1).unwrap();
        list.ginsert(3).unwrap();
        list.ginsert_at(2, 1).unwrap();
        assert!(list.ginsert_at(9, 10).is_err());
        let values: Vec<i64> = list.items().iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(values, vec![1, 2, 3]);

        list.reorder(0, 2).unwrap();
        let values: Vec<i64> = list.items().iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(values, vec![2, 3, 1]);
        assert_eq!(list.get_index(&ValueRef::integer(3)), Some(1));
    }

    #[test]
    fn test_set_and_remove() {
        let list = ListRef::new(SimpleTypeSpec::new(Type::Double));
        list.ginsert(1.5).unwrap();
        let old = list.gset(0, 2.5).unwrap();
        assert_eq!(old.as_double(), Some(1.5));
        assert!(list.gset(0, 7).is_err());
        assert!(list.remove(3).is_err());
        assert_eq!(list.remove(0).unwrap().as_double(), Some(2.5));
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn test_null_list_view() {
        let list = ListRef::invalid();
        assert_eq!(list.count(), 0);
        assert!(matches!(list.ginsert(1), Err(GrtError::NullValue(_))));
    }
}
