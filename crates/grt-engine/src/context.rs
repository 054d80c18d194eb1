//! The GRT context
//!
//! [`Grt`] owns everything a running system needs: the metaclass table, the
//! native class registry, modules and interfaces, the root value tree, the
//! message bus and the undo manager stack. There is no global instance;
//! callers create a context and pass it around (tests simply create a fresh
//! one).
//!
//! ```ignore
//! let grt = Grt::new(GrtOptions::default());
//! grt.load_metaclasses_from_str(STRUCTS, "structs.app.xml")?;
//! grt.end_loading_metaclasses(true)?;
//! let obj = grt.create_object("app.Document")?;
//! grt.set("/document", obj.into())?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::GrtOptions;
use crate::error::{GrtError, GrtResult};
use crate::messages::{HandlerId, Message, MessageBus};
use crate::metaclass::{
    parse_structs, ClassBinding, ClassRegistry, MetaClass, MetaClassTable, ParsedStructs,
};
use crate::module::{Interface, Module, ModuleLoader, ModuleRegistry, NativeModuleLoader};
use crate::serializer::Serializer;
use crate::undo::{
    DictItemUndo, ListInsertUndo, ListRemoveUndo, ListReorderUndo, MemberChangeUndo, UndoManager,
};
use crate::unserializer::Unserializer;
use crate::util::{find_child_object, get_value_by_path, set_value_by_path};
use crate::value::{DictRef, GrtObject, ListRef, ObjectRef, ValueRef, WeakValueRef};

/// A GRT runtime context
pub struct Grt {
    options: GrtOptions,
    metaclasses: RwLock<MetaClassTable>,
    class_registry: RwLock<ClassRegistry>,
    loaded_struct_files: Mutex<FxHashSet<PathBuf>>,
    modules: RwLock<ModuleRegistry>,
    native_loader: Arc<NativeModuleLoader>,
    root: RwLock<ValueRef>,
    object_cache: Mutex<FxHashMap<String, WeakValueRef>>,
    messages: MessageBus,
    undo_managers: Mutex<Vec<Arc<UndoManager>>>,
    default_undo_manager: Arc<UndoManager>,
    tracking_changes: AtomicI32,
}

impl Default for Grt {
    fn default() -> Self {
        Self::new(GrtOptions::default())
    }
}

impl Grt {
    /// Create a context with an empty root dict and the native module loader
    pub fn new(options: GrtOptions) -> Self {
        let native_loader = Arc::new(NativeModuleLoader::new());
        let mut modules = ModuleRegistry::new();
        modules.add_loader(native_loader.clone());

        Self {
            messages: MessageBus::new(options.verbose),
            default_undo_manager: Arc::new(UndoManager::with_limit(options.undo_limit)),
            options,
            metaclasses: RwLock::new(MetaClassTable::new()),
            class_registry: RwLock::new(ClassRegistry::new()),
            loaded_struct_files: Mutex::new(FxHashSet::default()),
            modules: RwLock::new(modules),
            native_loader,
            root: RwLock::new(DictRef::new().into()),
            object_cache: Mutex::new(FxHashMap::default()),
            undo_managers: Mutex::new(Vec::new()),
            tracking_changes: AtomicI32::new(0),
        }
    }

    /// Options the context was created with
    pub fn options(&self) -> &GrtOptions {
        &self.options
    }

    /// Load every struct and module directory named in the options
    pub fn load_from_configured_paths(&self) -> GrtResult<()> {
        for dir in &self.options.struct_paths {
            self.scan_metaclasses_in(dir)?;
        }
        self.end_loading_metaclasses(false)?;
        for dir in &self.options.module_paths {
            self.scan_modules_in(dir, &[])?;
        }
        Ok(())
    }

    // ========================================================================
    // Metaclasses
    // ========================================================================

    /// Register the native implementation of a class
    ///
    /// Classes that are already loaded are bound immediately; others are bound
    /// when loading ends.
    pub fn register_class(&self, class_name: &str, binding: ClassBinding) {
        self.class_registry
            .write()
            .register(class_name, binding.clone());
        self.metaclasses.read().bind(class_name, binding);
    }

    /// Load a structure description file and the files it requires
    ///
    /// Returns the parser's warnings; they are also sent to the message bus.
    /// Files already loaded into this context are skipped.
    pub fn load_metaclasses(&self, path: &Path) -> GrtResult<Vec<String>> {
        if self.loaded_struct_files.lock().contains(path) {
            tracing::debug!(path = %path.display(), "struct file already loaded");
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        let source = path.display().to_string();
        let parsed = parse_structs(&content, &source)?;

        // marked while loading so that cyclic requires terminate; unmarked on failure
        self.loaded_struct_files.lock().insert(path.to_path_buf());
        let loaded = self.load_parsed_structs(path, parsed);
        if loaded.is_err() {
            self.loaded_struct_files.lock().remove(path);
        }
        let warnings = loaded?;
        for warning in &warnings {
            self.send_warning(warning.as_str(), source.as_str());
        }
        self.send_verbose(format!("Loaded struct definitions from {}", source));
        Ok(warnings)
    }

    fn load_parsed_structs(&self, path: &Path, parsed: ParsedStructs) -> GrtResult<Vec<String>> {
        let mut warnings = parsed.warnings;
        for required in &parsed.requires {
            let required_path = path
                .parent()
                .map_or_else(|| PathBuf::from(required), |dir| dir.join(required));
            warnings.extend(self.load_metaclasses(&required_path)?);
        }
        self.metaclasses.write().add_definitions(parsed.classes)?;
        Ok(warnings)
    }

    /// Load a structure description held in memory
    ///
    /// `requires` entries are ignored; load the required files first.
    pub fn load_metaclasses_from_str(&self, xml: &str, source: &str) -> GrtResult<Vec<String>> {
        let parsed = parse_structs(xml, source)?;
        if !parsed.requires.is_empty() {
            tracing::debug!(source, requires = ?parsed.requires, "ignoring requires of in-memory structs");
        }
        self.metaclasses.write().add_definitions(parsed.classes)?;
        for warning in &parsed.warnings {
            self.send_warning(warning.as_str(), source);
        }
        Ok(parsed.warnings)
    }

    /// Load every `structs.*.xml` in `dir`; returns the number of files read
    pub fn scan_metaclasses_in(&self, dir: &Path) -> GrtResult<usize> {
        let pattern = dir.join("structs.*.xml");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| GrtError::BadPath(format!("{}: {}", pattern.display(), e)))?;
        let mut count = 0;
        for entry in entries {
            match entry {
                Ok(path) => {
                    self.load_metaclasses(&path)?;
                    count += 1;
                }
                Err(err) => tracing::warn!(error = %err, "unreadable struct file"),
            }
        }
        tracing::info!(dir = %dir.display(), files = count, "scanned struct definitions");
        Ok(count)
    }

    /// Validate, bind and freeze everything loaded since the last call
    ///
    /// With `check_class_binding`, a warning is sent for every class left
    /// without a native implementation.
    pub fn end_loading_metaclasses(&self, check_class_binding: bool) -> GrtResult<()> {
        let generic = self.options.bind_generic_allocators;
        let warnings = {
            let registry = self.class_registry.read();
            let mut table = self.metaclasses.write();
            let warnings = table.end_loading(&registry, check_class_binding && !generic)?;
            if generic {
                for class in table.classes() {
                    if !class.is_bound() && !class.is_abstract() {
                        class.bind(ClassBinding::generic());
                    }
                }
            }
            warnings
        };
        for warning in warnings {
            self.send_warning(warning, "");
        }
        Ok(())
    }

    /// Loaded class by name
    pub fn get_metaclass(&self, name: &str) -> Option<Arc<MetaClass>> {
        self.metaclasses.read().get(name)
    }

    /// Every loaded class, parents before children
    pub fn get_metaclasses(&self) -> Vec<Arc<MetaClass>> {
        self.metaclasses.read().classes().to_vec()
    }

    /// Allocate an instance of a class
    pub fn create_object(&self, class_name: &str) -> GrtResult<ObjectRef> {
        let class = self
            .get_metaclass(class_name)
            .ok_or_else(|| GrtError::UnknownStruct(class_name.to_string()))?;
        class.allocate()
    }

    /// Allocate an instance through its typed wrapper
    pub fn create<T: GrtObject>(&self) -> GrtResult<T> {
        self.create_object(T::CLASS_NAME)?.downcast::<T>()
    }

    // ========================================================================
    // Root tree
    // ========================================================================

    /// The root value
    pub fn root(&self) -> ValueRef {
        self.root.read().clone()
    }

    /// Replace the root value
    pub fn set_root(&self, value: impl Into<ValueRef>) {
        *self.root.write() = value.into();
        self.object_cache.lock().clear();
    }

    /// Value at `path` below the root
    pub fn get(&self, path: &str) -> GrtResult<ValueRef> {
        get_value_by_path(&self.root(), path)
    }

    /// Store `value` at `path` below the root
    pub fn set(&self, path: &str, value: ValueRef) -> GrtResult<()> {
        set_value_by_path(&self.root(), path, value)
    }

    /// Find an object by id below `subpath`
    ///
    /// Results are cached; a cached entry is used while the object is alive.
    /// Returns an invalid ref when nothing matches.
    pub fn find_object_by_id(&self, id: &str, subpath: &str) -> ObjectRef {
        if let Some(weak) = self.object_cache.lock().get(id) {
            let cached = weak.upgrade();
            if cached.is_valid() {
                return ObjectRef::cast_from(&cached).unwrap_or_default();
            }
        }

        let start = match self.get(subpath) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(subpath, error = %err, "object lookup below invalid path");
                return ObjectRef::invalid();
            }
        };
        let found = find_child_object(&start, id);
        if found.is_valid() {
            self.object_cache
                .lock()
                .insert(id.to_string(), found.as_value().downgrade());
        }
        found
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    fn document_tags<'a>(&'a self, doctype: &'a str, version: &'a str) -> (&'a str, &'a str) {
        let doctype = if doctype.is_empty() {
            self.options.document_type.as_str()
        } else {
            doctype
        };
        let version = if version.is_empty() {
            self.options.document_version.as_str()
        } else {
            version
        };
        (doctype, version)
    }

    /// Write `value` to a document file
    ///
    /// Empty `doctype` and `version` fall back to the configured defaults.
    pub fn serialize(&self, value: &ValueRef, path: &Path, doctype: &str, version: &str) -> GrtResult<()> {
        let (doctype, version) = self.document_tags(doctype, version);
        Serializer::new().save_to_xml(value, path, doctype, version)
    }

    /// Write `value` to a document string
    pub fn serialize_to_string(&self, value: &ValueRef, doctype: &str, version: &str) -> GrtResult<String> {
        let (doctype, version) = self.document_tags(doctype, version);
        Serializer::new().serialize_to_string(value, doctype, version)
    }

    /// Read a document file
    pub fn unserialize(&self, path: &Path) -> GrtResult<ValueRef> {
        Unserializer::new(self).load_from_xml(path)
    }

    /// Read a document string
    pub fn unserialize_str(&self, data: &str) -> GrtResult<ValueRef> {
        Unserializer::new(self).unserialize_str(data)
    }

    /// Reader bound to this context, for access to document metadata
    pub fn unserializer(&self) -> Unserializer<'_> {
        Unserializer::new(self)
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// The built-in loader for Rust modules; register factories on it
    pub fn native_module_loader(&self) -> &Arc<NativeModuleLoader> {
        &self.native_loader
    }

    /// Add a module loader
    pub fn add_module_loader(&self, loader: Arc<dyn ModuleLoader>) {
        tracing::debug!(loader = loader.name(), "module loader added");
        self.modules.write().add_loader(loader);
    }

    /// Loader by name
    pub fn get_module_loader(&self, name: &str) -> Option<Arc<dyn ModuleLoader>> {
        self.modules.read().loader(name)
    }

    /// Load a module file through the loader that accepts it
    ///
    /// With `refresh`, a module of the same name is replaced.
    pub fn load_module(&self, path: &Path, refresh: bool) -> GrtResult<Arc<Module>> {
        let loader = self
            .modules
            .read()
            .loader_for_file(path)
            .ok_or_else(|| GrtError::Module(format!("no loader accepts {}", path.display())))?;
        let module = loader.init_module(path)?;
        let module = if refresh {
            self.modules.write().refresh(module)?
        } else {
            self.modules.write().register(module)?
        };
        self.send_verbose(format!("Loaded module {} ({})", module.name(), loader.name()));
        Ok(module)
    }

    /// Load every module file in `dir`
    ///
    /// With a non-empty `extensions`, only files with one of them are tried.
    /// Failures are sent as warnings and do not stop the scan. Returns the
    /// number of modules loaded.
    pub fn scan_modules_in(&self, dir: &Path, extensions: &[&str]) -> GrtResult<usize> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                extensions.is_empty()
                    || path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map_or(false, |ext| extensions.contains(&ext))
            })
            .collect();
        paths.sort();

        let mut count = 0;
        for path in paths {
            if self.modules.read().loader_for_file(&path).is_none() {
                continue;
            }
            match self.load_module(&path, false) {
                Ok(_) => count += 1,
                Err(err) => {
                    self.send_warning(
                        format!("Could not load module {}", path.display()),
                        err.to_string(),
                    );
                }
            }
        }
        let mut modules = self.modules.write();
        modules.sort();
        modules.refresh_loaders();
        tracing::info!(dir = %dir.display(), modules = count, "scanned modules");
        Ok(count)
    }

    /// Register a module built in code
    pub fn register_new_module(&self, module: Module) -> GrtResult<Arc<Module>> {
        let module = self.modules.write().register(module)?;
        tracing::debug!(module = module.name(), "module registered");
        Ok(module)
    }

    /// Replace a module with a new version, or add it
    pub fn refresh_module(&self, module: Module) -> GrtResult<Arc<Module>> {
        self.modules.write().refresh(module)
    }

    /// Remove a module; false when no such module exists
    pub fn unregister_module(&self, name: &str) -> bool {
        self.modules.write().unregister(name).is_some()
    }

    /// Module by name
    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().get(name)
    }

    /// Every registered module
    pub fn get_modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().modules().to_vec()
    }

    /// Modules implementing `interface` whose names match the glob `pattern`
    pub fn find_modules_matching(&self, interface: &str, pattern: &str) -> GrtResult<Vec<Arc<Module>>> {
        self.modules.read().find_matching(interface, pattern)
    }

    /// Call a module function with argument checking
    pub fn call_module_function(&self, module: &str, function: &str, args: &ListRef) -> GrtResult<ValueRef> {
        // the registry lock is not held while the function runs
        let target = self
            .get_module(module)
            .ok_or_else(|| GrtError::Module(format!("module {} not found", module)))?;
        target.call_function(function, args)
    }

    /// Register an interface
    pub fn register_new_interface(&self, interface: Interface) -> GrtResult<()> {
        self.modules.write().register_interface(interface)
    }

    /// Interface by name
    pub fn get_interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.modules.read().interface(name)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// The message bus
    pub fn messages(&self) -> &MessageBus {
        &self.messages
    }

    /// Push a message handler
    pub fn push_message_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.messages.push_message_handler(handler)
    }

    /// Pop the newest message handler
    pub fn pop_message_handler(&self) -> bool {
        self.messages.pop_message_handler()
    }

    /// Remove a message handler by id
    pub fn remove_message_handler(&self, id: HandlerId) -> bool {
        self.messages.remove_message_handler(id)
    }

    /// Send an error message
    pub fn send_error(&self, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.messages.send_error(text, detail)
    }

    /// Send a warning
    pub fn send_warning(&self, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.messages.send_warning(text, detail)
    }

    /// Send an informational message
    pub fn send_info(&self, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.messages.send_info(text, detail)
    }

    /// Send output text
    pub fn send_output(&self, text: impl Into<String>) -> bool {
        self.messages.send_output(text)
    }

    /// Send a verbose message
    pub fn send_verbose(&self, text: impl Into<String>) -> bool {
        self.messages.send_verbose(text)
    }

    /// Send a progress update for the current progress step
    pub fn send_progress(&self, fraction: f32, text: impl Into<String>, detail: impl Into<String>) -> bool {
        self.messages.send_progress(fraction, text, detail)
    }

    /// Enter a progress sub-range
    pub fn begin_progress_step(&self, from: f32, to: f32) {
        self.messages.begin_progress_step(from, to);
    }

    /// Leave the innermost progress sub-range
    pub fn end_progress_step(&self) {
        self.messages.end_progress_step();
    }

    /// Drop all progress sub-ranges
    pub fn reset_progress_steps(&self) {
        self.messages.reset_progress_steps();
    }

    /// Push a cancellation query
    pub fn push_status_query_handler<F>(&self, handler: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.messages.push_status_query_handler(handler);
    }

    /// Pop the newest cancellation query
    pub fn pop_status_query_handler(&self) {
        self.messages.pop_status_query_handler();
    }

    /// True when the current task should be cancelled
    pub fn query_status(&self) -> bool {
        self.messages.query_status()
    }

    // ========================================================================
    // Undo
    // ========================================================================

    /// Make `manager` the current undo manager
    pub fn push_undo_manager(&self, manager: Arc<UndoManager>) {
        self.undo_managers.lock().push(manager);
    }

    /// Restore the previous undo manager
    pub fn pop_undo_manager(&self) -> Option<Arc<UndoManager>> {
        self.undo_managers.lock().pop()
    }

    /// The current undo manager, or the context's default one
    pub fn get_undo_manager(&self) -> Arc<UndoManager> {
        self.undo_managers
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| self.default_undo_manager.clone())
    }

    /// Start recording tracked changes; calls nest
    pub fn start_tracking_changes(&self) {
        self.tracking_changes.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo one `start_tracking_changes`
    pub fn stop_tracking_changes(&self) {
        let previous = self
            .tracking_changes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then(|| n - 1));
        if previous.is_err() {
            tracing::warn!("stop_tracking_changes() without matching start");
        }
    }

    /// True while changes are recorded
    pub fn tracking_changes(&self) -> bool {
        self.tracking_changes.load(Ordering::SeqCst) > 0
    }

    /// Set a member, recording the old value while tracking
    pub fn set_member_tracked(&self, object: &ObjectRef, member: &str, value: impl Into<ValueRef>) -> GrtResult<()> {
        if !self.tracking_changes() {
            return object.set_member(member, value);
        }
        let action = MemberChangeUndo::new(object, member)?;
        object.set_member(member, value)?;
        self.get_undo_manager().add_undo(action);
        Ok(())
    }

    /// Checked list insert, recorded while tracking; `None` appends
    pub fn list_insert_tracked(&self, list: &ListRef, value: impl Into<ValueRef>, index: Option<usize>) -> GrtResult<()> {
        list.inner()?.ginsert(value.into(), index)?;
        if self.tracking_changes() {
            self.get_undo_manager().add_undo(ListInsertUndo::new(list, index));
        }
        Ok(())
    }

    /// List removal, recorded while tracking
    pub fn list_remove_tracked(&self, list: &ListRef, index: usize) -> GrtResult<ValueRef> {
        if !self.tracking_changes() {
            return list.remove(index);
        }
        let action = ListRemoveUndo::new(list, index)?;
        let removed = list.remove(index)?;
        self.get_undo_manager().add_undo(action);
        Ok(removed)
    }

    /// Move a list entry, recorded while tracking
    pub fn list_reorder_tracked(&self, list: &ListRef, from: usize, to: usize) -> GrtResult<()> {
        list.reorder(from, to)?;
        if self.tracking_changes() {
            self.get_undo_manager().add_undo(ListReorderUndo::new(list, from, to));
        }
        Ok(())
    }

    /// Checked dict store, recorded while tracking
    pub fn dict_set_tracked(&self, dict: &DictRef, key: &str, value: impl Into<ValueRef>) -> GrtResult<()> {
        if !self.tracking_changes() {
            return dict.set(key, value).map(drop);
        }
        let action = DictItemUndo::new(dict, key);
        dict.set(key, value)?;
        self.get_undo_manager().add_undo(action);
        Ok(())
    }

    /// Dict removal, recorded while tracking
    pub fn dict_remove_tracked(&self, dict: &DictRef, key: &str) -> GrtResult<ValueRef> {
        if !self.tracking_changes() {
            return dict.remove(key);
        }
        let action = DictItemUndo::new(dict, key);
        let removed = dict.remove(key)?;
        self.get_undo_manager().add_undo(action);
        Ok(removed)
    }

    /// Open an undo group and start tracking changes
    pub fn begin_undoable_action(&self) {
        self.get_undo_manager().begin_undo_group();
        self.start_tracking_changes();
    }

    /// Close the action's group; false when nothing was recorded
    pub fn end_undoable_action(&self, description: &str) -> GrtResult<bool> {
        self.stop_tracking_changes();
        self.get_undo_manager().end_undo_group(description)
    }

    /// Revert everything recorded since `begin_undoable_action`
    pub fn cancel_undoable_action(&self) -> GrtResult<()> {
        self.stop_tracking_changes();
        self.get_undo_manager().cancel_undo_group()
    }

    /// Begin an undoable action that is cancelled unless explicitly ended
    pub fn auto_undo(&self) -> AutoUndo<'_> {
        AutoUndo::new(self)
    }
}

impl std::fmt::Debug for Grt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grt")
            .field("classes", &self.metaclasses.read().classes().len())
            .field("modules", &self.modules.read().modules().len())
            .field("messages", &self.messages)
            .finish()
    }
}

/// Scoped undoable action
///
/// Dropping the guard without calling [`AutoUndo::end`] reverts every change
/// recorded while it was alive.
#[must_use = "the action is cancelled when the guard is dropped"]
pub struct AutoUndo<'g> {
    grt: &'g Grt,
    manager: Arc<UndoManager>,
    active: bool,
}

impl<'g> AutoUndo<'g> {
    fn new(grt: &'g Grt) -> Self {
        let manager = grt.get_undo_manager();
        manager.begin_undo_group();
        grt.start_tracking_changes();
        Self {
            grt,
            manager,
            active: true,
        }
    }

    /// Keep the changes as one undo step; false when nothing was recorded
    pub fn end(mut self, description: &str) -> GrtResult<bool> {
        self.active = false;
        self.grt.stop_tracking_changes();
        self.manager.end_undo_group(description)
    }

    /// Revert the changes
    pub fn cancel(mut self) -> GrtResult<()> {
        self.active = false;
        self.grt.stop_tracking_changes();
        self.manager.cancel_undo_group()
    }
}

impl Drop for AutoUndo<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.grt.stop_tracking_changes();
        if let Err(err) = self.manager.cancel_undo_group() {
            tracing::error!(error = %err, "failed to cancel undoable action");
        }
    }
}
