//! Undo manager
//!
//! Undoing an action performs the inverse change and registers a new action
//! that reverts it again. While an undo runs those registrations land on the
//! redo stack, while a redo runs they land on the undo stack.
//!
//! The manager state sits behind a reentrant lock: actions call back into
//! the manager from inside `undo()` on the same thread.

use std::cell::RefCell;
use std::fmt::Write as _;

use parking_lot::ReentrantMutex;

use crate::error::{GrtError, GrtResult};
use crate::value::{DictRef, ListRef, ObjectRef, ValueRef};

/// A recorded change that can be reverted
pub trait UndoAction: Send {
    /// Revert the change and register the inverse with `manager`
    fn undo(&self, manager: &UndoManager) -> GrtResult<()>;

    /// Human readable description
    fn description(&self) -> &str;

    /// Replace the description
    fn set_description(&mut self, description: &str);

    /// Append a one-line summary to `out`
    fn dump(&self, out: &mut String, indent: usize);
}

// ============================================================================
// Entries and groups
// ============================================================================

/// Element of an undo stack or group
pub enum UndoEntry {
    /// Single action
    Action(Box<dyn UndoAction>),
    /// Nested group
    Group(UndoGroup),
}

impl UndoEntry {
    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        match self {
            UndoEntry::Action(action) => action.undo(manager),
            UndoEntry::Group(group) => group.undo(manager),
        }
    }

    /// Description of the action or group
    pub fn description(&self) -> String {
        match self {
            UndoEntry::Action(action) => action.description().to_string(),
            UndoEntry::Group(group) => group.description(),
        }
    }

    fn set_description(&mut self, description: &str) {
        match self {
            UndoEntry::Action(action) => action.set_description(description),
            UndoEntry::Group(group) => group.set_description(description),
        }
    }

    fn dump(&self, out: &mut String, indent: usize) {
        match self {
            UndoEntry::Action(action) => action.dump(out, indent),
            UndoEntry::Group(group) => group.dump(out, indent),
        }
    }

    fn is_open_group(&self) -> bool {
        matches!(self, UndoEntry::Group(group) if group.open)
    }
}

enum CloseOutcome {
    Closed,
    Empty,
    Dropped,
}

/// Actions undone together as one step
///
/// New actions go to the innermost open subgroup.
pub struct UndoGroup {
    actions: Vec<UndoEntry>,
    open: bool,
    description: String,
}

impl Default for UndoGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoGroup {
    /// New open group
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            open: true,
            description: String::new(),
        }
    }

    /// True until closed
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Direct children
    pub fn actions(&self) -> &[UndoEntry] {
        &self.actions
    }

    fn last_is_open_group(&self) -> bool {
        self.actions.last().map_or(false, UndoEntry::is_open_group)
    }

    fn innermost_open_mut(&mut self) -> Option<&mut UndoGroup> {
        if !self.open {
            return None;
        }
        if self.last_is_open_group() {
            match self.actions.last_mut() {
                Some(UndoEntry::Group(group)) => group.innermost_open_mut(),
                _ => None,
            }
        } else {
            Some(self)
        }
    }

    /// Add to the innermost open subgroup
    pub fn add(&mut self, entry: UndoEntry) -> GrtResult<()> {
        let group = self
            .innermost_open_mut()
            .ok_or_else(|| GrtError::Undo("trying to add an action to a closed undo group".to_string()))?;
        group.actions.push(entry);
        Ok(())
    }

    /// Close the innermost open subgroup
    pub fn close(&mut self) {
        match self.innermost_open_mut() {
            Some(group) => group.open = false,
            None => tracing::warn!("trying to close already closed undo group"),
        }
    }

    fn close_innermost(&mut self, description: &str) -> CloseOutcome {
        if self.last_is_open_group() {
            if let Some(UndoEntry::Group(group)) = self.actions.last_mut() {
                match group.close_innermost(description) {
                    CloseOutcome::Empty => {
                        self.actions.pop();
                        return CloseOutcome::Dropped;
                    }
                    outcome => return outcome,
                }
            }
        }
        if self.actions.is_empty() {
            return CloseOutcome::Empty;
        }
        self.open = false;
        if !description.is_empty() {
            self.description = description.to_string();
        }
        CloseOutcome::Closed
    }

    fn take_innermost_open(&mut self) -> Option<UndoGroup> {
        if !self.last_is_open_group() {
            return None;
        }
        let nested = match self.actions.last_mut() {
            Some(UndoEntry::Group(group)) => group.take_innermost_open(),
            _ => None,
        };
        if nested.is_some() {
            return nested;
        }
        match self.actions.pop() {
            Some(UndoEntry::Group(group)) => Some(group),
            _ => None,
        }
    }

    /// Drop empty closed subgroups and unwrap single-action ones
    pub fn trim(&mut self) {
        let actions = std::mem::take(&mut self.actions);
        for entry in actions {
            match entry {
                UndoEntry::Group(mut group) if !group.open => {
                    group.trim();
                    match group.actions.len() {
                        0 => {}
                        1 => self.actions.extend(group.actions),
                        _ => self.actions.push(UndoEntry::Group(group)),
                    }
                }
                other => self.actions.push(other),
            }
        }
    }

    /// Description; an open group reports its innermost open subgroup's
    pub fn description(&self) -> String {
        if self.open {
            if let Some(UndoEntry::Group(group)) = self.actions.last() {
                if group.open {
                    return group.description();
                }
            }
        }
        self.description.clone()
    }

    /// Set the description; an open group forwards it to its latest action
    pub fn set_description(&mut self, description: &str) {
        if self.open {
            if let Some(last) = self.actions.last_mut() {
                last.set_description(description);
            }
            return;
        }
        self.description = description.to_string();
    }

    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        manager.begin_undo_group();
        let mut result = Ok(());
        for entry in self.actions.iter().rev() {
            result = entry.undo(manager);
            if result.is_err() {
                break;
            }
        }
        manager.end_undo_group(&self.description)?;
        result
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let _ = writeln!(out, "{:indent$}group{} {{", "", if self.open { "(open)" } else { "" });
        for entry in &self.actions {
            entry.dump(out, indent + 2);
        }
        let _ = writeln!(out, "{:indent$}}}: {}", "", self.description);
    }
}

// ============================================================================
// UndoManager
// ============================================================================

#[derive(Default)]
struct UndoState {
    undo_stack: Vec<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
    limit: usize,
    blocks: u32,
    undoing: bool,
    redoing: bool,
}

impl UndoState {
    fn target_stack(&mut self) -> &mut Vec<UndoEntry> {
        if self.undoing {
            &mut self.redo_stack
        } else {
            &mut self.undo_stack
        }
    }

    fn trim_to_limit(&mut self) {
        if self.limit > 0 && self.undo_stack.len() > self.limit {
            let excess = self.undo_stack.len() - self.limit;
            self.undo_stack.drain(..excess);
        }
    }
}

/// Undo and redo stacks
pub struct UndoManager {
    state: ReentrantMutex<RefCell<UndoState>>,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoManager {
    /// Manager without a depth limit
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Manager keeping at most `limit` undo steps, 0 for unlimited
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(UndoState {
                limit,
                ..UndoState::default()
            })),
        }
    }

    // the RefCell borrow must not outlive `f`; actions re-enter the manager
    fn with_state<R>(&self, f: impl FnOnce(&mut UndoState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Change the depth limit, dropping the oldest steps as needed
    pub fn set_limit(&self, limit: usize) {
        self.with_state(|state| {
            state.limit = limit;
            state.trim_to_limit();
        });
    }

    /// Depth limit, 0 for unlimited
    pub fn limit(&self) -> usize {
        self.with_state(|state| state.limit)
    }

    /// Stop recording; calls nest
    pub fn disable(&self) {
        self.with_state(|state| state.blocks += 1);
    }

    /// Undo one `disable`
    pub fn enable(&self) {
        self.with_state(|state| state.blocks = state.blocks.saturating_sub(1));
    }

    /// True unless disabled
    pub fn is_enabled(&self) -> bool {
        self.with_state(|state| state.blocks == 0)
    }

    /// True while an undo is running
    pub fn is_undoing(&self) -> bool {
        self.with_state(|state| state.undoing)
    }

    /// True while a redo is running
    pub fn is_redoing(&self) -> bool {
        self.with_state(|state| state.redoing)
    }

    /// True if there is something to undo
    pub fn can_undo(&self) -> bool {
        self.with_state(|state| !state.undo_stack.is_empty())
    }

    /// True if there is something to redo
    pub fn can_redo(&self) -> bool {
        self.with_state(|state| !state.redo_stack.is_empty())
    }

    /// Number of undo steps
    pub fn undo_depth(&self) -> usize {
        self.with_state(|state| state.undo_stack.len())
    }

    /// Number of redo steps
    pub fn redo_depth(&self) -> usize {
        self.with_state(|state| state.redo_stack.len())
    }

    /// Description of the next undo step
    pub fn undo_description(&self) -> String {
        self.with_state(|state| {
            state
                .undo_stack
                .last()
                .map(UndoEntry::description)
                .unwrap_or_default()
        })
    }

    /// Description of the next redo step
    pub fn redo_description(&self) -> String {
        self.with_state(|state| {
            state
                .redo_stack
                .last()
                .map(UndoEntry::description)
                .unwrap_or_default()
        })
    }

    /// True if both stacks are empty
    pub fn is_empty(&self) -> bool {
        self.with_state(|state| state.undo_stack.is_empty() && state.redo_stack.is_empty())
    }

    /// Clear both stacks
    pub fn reset(&self) {
        let (undo, redo) = self.with_state(|state| {
            (
                std::mem::take(&mut state.undo_stack),
                std::mem::take(&mut state.redo_stack),
            )
        });
        // drop the entries outside the borrow; they may own the last ref to values
        drop(undo);
        drop(redo);
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record an action
    pub fn add_undo(&self, action: impl UndoAction + 'static) {
        self.add_entry(UndoEntry::Action(Box::new(action)));
    }

    /// Record a closure as an action
    pub fn add_simple_undo<F>(&self, description: &str, f: F)
    where
        F: Fn() -> GrtResult<()> + Send + 'static,
    {
        self.add_undo(SimpleUndo::new(description, f));
    }

    fn add_entry(&self, entry: UndoEntry) {
        let rejected = self.with_state(|state| {
            if state.blocks > 0 {
                return Some(entry);
            }
            let undoing = state.undoing;
            let redoing = state.redoing;
            let stack = state.target_stack();
            let entry = match stack.last_mut() {
                Some(UndoEntry::Group(group)) if group.open => match group.add(entry) {
                    Ok(()) => None,
                    Err(err) => {
                        tracing::error!(error = %err, "undo action dropped");
                        None
                    }
                },
                _ => Some(entry),
            };
            if let Some(entry) = entry {
                stack.push(entry);
            }
            if !undoing {
                state.trim_to_limit();
                if !redoing {
                    state.redo_stack.clear();
                }
            }
            None
        });
        drop(rejected);
    }

    /// Set the description of the latest step
    pub fn set_action_description(&self, description: &str) {
        self.with_state(|state| {
            if state.blocks > 0 {
                return;
            }
            if let Some(top) = state.target_stack().last_mut() {
                top.set_description(description);
            }
        });
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Open a group; false when recording is disabled
    pub fn begin_undo_group(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.add_entry(UndoEntry::Group(UndoGroup::new()));
        tracing::trace!("begin undo group");
        true
    }

    /// Close the innermost open group
    ///
    /// Returns `Ok(false)` if recording is disabled or the group was empty,
    /// in which case it is removed.
    pub fn end_undo_group(&self, description: &str) -> GrtResult<bool> {
        self.with_state(|state| {
            if state.blocks > 0 {
                return Ok(false);
            }
            let stack = state.target_stack();
            let outcome = match stack.last_mut() {
                Some(UndoEntry::Group(group)) if group.open => {
                    let outcome = group.close_innermost(description);
                    if !group.open {
                        group.trim();
                    }
                    outcome
                }
                _ => return Err(GrtError::Undo("unmatched undo group".to_string())),
            };
            match outcome {
                CloseOutcome::Closed => {
                    tracing::trace!(description, "end undo group");
                    Ok(true)
                }
                CloseOutcome::Empty => {
                    stack.pop();
                    tracing::debug!(description, "empty undo group dropped");
                    Ok(false)
                }
                CloseOutcome::Dropped => Ok(false),
            }
        })
    }

    /// Close the innermost open group and revert what it recorded
    pub fn cancel_undo_group(&self) -> GrtResult<()> {
        let _guard = self.state.lock();
        let group = self.with_state(|state| {
            let stack = state.target_stack();
            let nested = match stack.last_mut() {
                Some(UndoEntry::Group(group)) if group.open => group.take_innermost_open(),
                _ => return Err(GrtError::Undo("no open undo group to cancel".to_string())),
            };
            match nested {
                Some(group) => Ok(group),
                None => match stack.pop() {
                    Some(UndoEntry::Group(group)) => Ok(group),
                    _ => Err(GrtError::Undo("no open undo group to cancel".to_string())),
                },
            }
        })?;
        if group.is_empty() {
            return Ok(());
        }
        self.disable();
        let result = group.undo(self);
        self.enable();
        result
    }

    // ========================================================================
    // Undo / redo
    // ========================================================================

    /// Revert the latest step
    pub fn undo(&self) -> GrtResult<()> {
        let guard = self.state.lock();
        let entry = {
            let mut state = guard.borrow_mut();
            if state.undoing {
                return Err(GrtError::Undo("unexpected nested undo".to_string()));
            }
            if state.undo_stack.last().map_or(false, UndoEntry::is_open_group) {
                return Err(GrtError::Undo("cannot undo while an undo group is open".to_string()));
            }
            match state.undo_stack.pop() {
                Some(entry) => {
                    state.undoing = true;
                    entry
                }
                None => return Ok(()),
            }
        };
        tracing::debug!(description = %entry.description(), "undo");
        let result = entry.undo(self);
        guard.borrow_mut().undoing = false;
        result
    }

    /// Re-apply the latest undone step
    pub fn redo(&self) -> GrtResult<()> {
        let guard = self.state.lock();
        let entry = {
            let mut state = guard.borrow_mut();
            if state.redoing {
                return Err(GrtError::Undo("unexpected nested redo".to_string()));
            }
            match state.redo_stack.pop() {
                Some(entry) => {
                    state.redoing = true;
                    entry
                }
                None => return Ok(()),
            }
        };
        tracing::debug!(description = %entry.description(), "redo");
        let result = entry.undo(self);
        guard.borrow_mut().redoing = false;
        result
    }

    /// Text dump of the undo stack
    pub fn dump_undo_stack(&self) -> String {
        self.with_state(|state| dump_stack(&state.undo_stack))
    }

    /// Text dump of the redo stack
    pub fn dump_redo_stack(&self) -> String {
        self.with_state(|state| dump_stack(&state.redo_stack))
    }
}

fn dump_stack(stack: &[UndoEntry]) -> String {
    let mut out = String::new();
    for entry in stack {
        entry.dump(&mut out, 0);
    }
    out
}

// ============================================================================
// Built-in actions
// ============================================================================

/// Action running a closure
pub struct SimpleUndo {
    action: Box<dyn Fn() -> GrtResult<()> + Send>,
    description: String,
}

impl SimpleUndo {
    /// Wrap a closure
    pub fn new<F>(description: &str, f: F) -> Self
    where
        F: Fn() -> GrtResult<()> + Send + 'static,
    {
        Self {
            action: Box::new(f),
            description: description.to_string(),
        }
    }
}

impl UndoAction for SimpleUndo {
    fn undo(&self, _manager: &UndoManager) -> GrtResult<()> {
        (self.action)()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let _ = writeln!(out, "{:indent$}custom_action: {}", "", self.description);
    }
}

/// Restores a member to its previous value
pub struct MemberChangeUndo {
    object: ObjectRef,
    member: String,
    value: ValueRef,
    description: String,
}

impl MemberChangeUndo {
    /// Capture the member's current value
    pub fn new(object: &ObjectRef, member: &str) -> GrtResult<Self> {
        Ok(Self {
            value: object.get_member(member)?,
            object: object.clone(),
            member: member.to_string(),
            description: String::new(),
        })
    }
}

impl UndoAction for MemberChangeUndo {
    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        let mut inverse = MemberChangeUndo::new(&self.object, &self.member)?;
        inverse.description = self.description.clone();
        self.object
            .set_member_internal(&self.member, self.value.clone(), true)?;
        manager.add_undo(inverse);
        Ok(())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let _ = writeln!(
            out,
            "{:indent$}change_object {}::{} <{}> -> {:?}: {}",
            "",
            self.object.class_name(),
            self.member,
            self.object.id(),
            self.value,
            self.description
        );
    }
}

/// Reverts an insertion by removing the entry again
pub struct ListInsertUndo {
    list: ListRef,
    index: Option<usize>,
    description: String,
}

impl ListInsertUndo {
    /// Record an insertion at `index`, `None` for an append
    pub fn new(list: &ListRef, index: Option<usize>) -> Self {
        Self {
            list: list.clone(),
            index,
            description: String::new(),
        }
    }
}

impl UndoAction for ListInsertUndo {
    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        let index = match self.index {
            Some(index) => index,
            None => self
                .list
                .count()
                .checked_sub(1)
                .ok_or_else(|| GrtError::Undo("list insert undo on empty list".to_string()))?,
        };
        let mut inverse = ListRemoveUndo::new(&self.list, index)?;
        inverse.description = self.description.clone();
        self.list.remove(index)?;
        manager.add_undo(inverse);
        Ok(())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let index = self.index.map_or(-1, |i| i as i64);
        let _ = writeln!(out, "{:indent$}insert_list [{}]: {}", "", index, self.description);
    }
}

/// Reverts a removal by inserting the entry again
pub struct ListRemoveUndo {
    list: ListRef,
    value: ValueRef,
    index: usize,
    description: String,
}

impl ListRemoveUndo {
    /// Capture the entry at `index` before it is removed
    pub fn new(list: &ListRef, index: usize) -> GrtResult<Self> {
        Ok(Self {
            value: list.get(index)?,
            list: list.clone(),
            index,
            description: String::new(),
        })
    }

    /// Capture `value` before it is removed; it must be in the list
    pub fn for_value(list: &ListRef, value: &ValueRef) -> GrtResult<Self> {
        let index = list
            .get_index(value)
            .ok_or_else(|| GrtError::Undo("attempt to add invalid undo operation".to_string()))?;
        Self::new(list, index)
    }
}

impl UndoAction for ListRemoveUndo {
    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        self.list
            .inner()?
            .ginsert_unchecked(self.value.clone(), Some(self.index))?;
        let mut inverse = ListInsertUndo::new(&self.list, Some(self.index));
        inverse.description = self.description.clone();
        manager.add_undo(inverse);
        Ok(())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let _ = writeln!(out, "{:indent$}remove_list [{}]: {}", "", self.index, self.description);
    }
}

/// Reverts a move inside a list
pub struct ListReorderUndo {
    list: ListRef,
    from: usize,
    to: usize,
    description: String,
}

impl ListReorderUndo {
    /// Record a move from `from` to `to`
    pub fn new(list: &ListRef, from: usize, to: usize) -> Self {
        Self {
            list: list.clone(),
            from,
            to,
            description: String::new(),
        }
    }
}

impl UndoAction for ListReorderUndo {
    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        self.list.reorder(self.to, self.from)?;
        let mut inverse = ListReorderUndo::new(&self.list, self.to, self.from);
        inverse.description = self.description.clone();
        manager.add_undo(inverse);
        Ok(())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let _ = writeln!(
            out,
            "{:indent$}reorder_list [{}]->[{}]: {}",
            "", self.from, self.to, self.description
        );
    }
}

/// Restores a dict key to its previous value or absence
pub struct DictItemUndo {
    dict: DictRef,
    key: String,
    previous: Option<ValueRef>,
    description: String,
}

impl DictItemUndo {
    /// Capture the key's current state
    pub fn new(dict: &DictRef, key: &str) -> Self {
        Self {
            previous: dict.has_key(key).then(|| dict.get(key)),
            dict: dict.clone(),
            key: key.to_string(),
            description: String::new(),
        }
    }
}

impl UndoAction for DictItemUndo {
    fn undo(&self, manager: &UndoManager) -> GrtResult<()> {
        let mut inverse = DictItemUndo::new(&self.dict, &self.key);
        inverse.description = self.description.clone();
        match &self.previous {
            Some(value) => {
                self.dict.inner()?.set(self.key.clone(), value.clone());
            }
            None => {
                self.dict.remove(&self.key)?;
            }
        }
        manager.add_undo(inverse);
        Ok(())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    fn dump(&self, out: &mut String, indent: usize) {
        let _ = writeln!(out, "{:indent$}set_dict [{}]: {}", "", self.key, self.description);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn record_set(manager: &UndoManager, dict: &DictRef, key: &str, value: i64) {
        manager.add_undo(DictItemUndo::new(dict, key));
        dict.set(key, value).unwrap();
    }

    #[test]
    fn test_undo_redo_dict() {
        let manager = UndoManager::new();
        let dict = DictRef::new();
        record_set(&manager, &dict, "a", 1);
        record_set(&manager, &dict, "a", 2);
        assert_eq!(manager.undo_depth(), 2);

        manager.undo().unwrap();
        assert_eq!(dict.get("a").as_int(), Some(1));
        manager.undo().unwrap();
        assert!(!dict.has_key("a"));
        assert!(!manager.can_undo());
        assert_eq!(manager.redo_depth(), 2);

        manager.redo().unwrap();
        assert_eq!(dict.get("a").as_int(), Some(1));
        manager.redo().unwrap();
        assert_eq!(dict.get("a").as_int(), Some(2));
        assert_eq!(manager.undo_depth(), 2);
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_new_action_clears_redo() {
        let manager = UndoManager::new();
        let dict = DictRef::new();
        record_set(&manager, &dict, "a", 1);
        manager.undo().unwrap();
        assert!(manager.can_redo());
        record_set(&manager, &dict, "b", 1);
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_group_undone_as_one_step() {
        let manager = UndoManager::new();
        let list = ListRef::new_any();
        assert!(manager.begin_undo_group());
        list.ginsert(1).unwrap();
        manager.add_undo(ListInsertUndo::new(&list, None));
        list.ginsert(2).unwrap();
        manager.add_undo(ListInsertUndo::new(&list, None));
        assert!(manager.end_undo_group("add two").unwrap());

        assert_eq!(manager.undo_depth(), 1);
        assert_eq!(manager.undo_description(), "add two");
        manager.undo().unwrap();
        assert_eq!(list.count(), 0);
        assert_eq!(manager.redo_description(), "add two");

        manager.redo().unwrap();
        assert_eq!(list.count(), 2);
        assert_eq!(list.get(0).unwrap().as_int(), Some(1));
        assert_eq!(list.get(1).unwrap().as_int(), Some(2));
    }

    #[test]
    fn test_empty_group_dropped() {
        let manager = UndoManager::new();
        manager.begin_undo_group();
        assert!(!manager.end_undo_group("nothing").unwrap());
        assert!(!manager.can_undo());
        assert!(manager.end_undo_group("unmatched").is_err());
    }

    #[test]
    fn test_nested_empty_group_dropped() {
        let manager = UndoManager::new();
        let dict = DictRef::new();
        manager.begin_undo_group();
        record_set(&manager, &dict, "x", 1);
        manager.begin_undo_group();
        assert!(!manager.end_undo_group("inner").unwrap());
        assert!(manager.end_undo_group("outer").unwrap());
        assert_eq!(manager.undo_depth(), 1);
    }

    #[test]
    fn test_cancel_reverts_open_group() {
        let manager = UndoManager::new();
        let dict = DictRef::new();
        manager.begin_undo_group();
        record_set(&manager, &dict, "x", 1);
        record_set(&manager, &dict, "y", 2);
        manager.cancel_undo_group().unwrap();
        assert_eq!(dict.count(), 0);
        assert!(manager.is_empty());
        assert!(manager.cancel_undo_group().is_err());
    }

    #[test]
    fn test_undo_with_open_group_is_error() {
        let manager = UndoManager::new();
        manager.begin_undo_group();
        assert!(matches!(manager.undo(), Err(GrtError::Undo(_))));
    }

    #[test]
    fn test_disable_blocks_recording() {
        let manager = UndoManager::new();
        let dict = DictRef::new();
        manager.disable();
        record_set(&manager, &dict, "a", 1);
        assert!(!manager.begin_undo_group());
        manager.enable();
        assert!(manager.is_empty());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let manager = UndoManager::with_limit(2);
        let dict = DictRef::new();
        for i in 0..4 {
            record_set(&manager, &dict, "k", i);
        }
        assert_eq!(manager.undo_depth(), 2);
        manager.set_limit(1);
        assert_eq!(manager.undo_depth(), 1);
    }

    #[test]
    fn test_simple_undo_and_description() {
        let manager = UndoManager::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        manager.add_simple_undo("poke", move || {
            *counter.lock() += 1;
            Ok(())
        });
        manager.set_action_description("renamed");
        assert_eq!(manager.undo_description(), "renamed");
        manager.undo().unwrap();
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_list_remove_and_reorder() {
        let manager = UndoManager::new();
        let list = ListRef::new_any();
        for i in 0..3 {
            list.ginsert(i).unwrap();
        }
        manager.add_undo(ListRemoveUndo::new(&list, 1).unwrap());
        list.remove(1).unwrap();
        manager.add_undo(ListReorderUndo::new(&list, 0, 1));
        list.reorder(0, 1).unwrap();

        manager.undo().unwrap();
        manager.undo().unwrap();
        let items: Vec<i64> = list.items().iter().filter_map(ValueRef::as_int).collect();
        assert_eq!(items, vec![0, 1, 2]);
        manager.redo().unwrap();
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn test_trim_flattens_groups() {
        let mut group = UndoGroup::new();
        let mut single = UndoGroup::new();
        single
            .add(UndoEntry::Action(Box::new(SimpleUndo::new("one", || Ok(())))))
            .unwrap();
        single.close();
        let mut empty = UndoGroup::new();
        empty.close();
        group.add(UndoEntry::Group(single)).unwrap();
        group.add(UndoEntry::Group(empty)).unwrap();
        group.trim();
        assert_eq!(group.actions().len(), 1);
        assert!(matches!(group.actions()[0], UndoEntry::Action(_)));
    }

    #[test]
    fn test_dump() {
        let manager = UndoManager::new();
        let dict = DictRef::new();
        manager.begin_undo_group();
        record_set(&manager, &dict, "k", 1);
        manager.end_undo_group("set k").unwrap();
        let dump = manager.dump_undo_stack();
        assert!(dump.contains("group {"));
        assert!(dump.contains("set_dict [k]"));
    }
}
