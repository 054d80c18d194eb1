//! GRT Engine
//!
//! An embeddable, dynamically typed object runtime:
//! - **Values**: reference-counted integers, doubles, strings, lists, dicts
//!   and objects with runtime-checked typed views (`value` module)
//! - **Metaclasses**: class descriptions loaded from XML, with single
//!   inheritance, validation, checksums and native bindings (`metaclass`)
//! - **Modules**: named functions with typed signatures and interfaces
//!   (`module`)
//! - **Documents**: identity-preserving XML serialization (`serializer`,
//!   `unserializer`)
//! - **Context**: the [`Grt`] facade with the root tree, message bus and
//!   undo managers (`context`, `messages`, `undo`)
//!
//! # Example
//!
//! ```rust,ignore
//! use grt_engine::{ClassBinding, Grt, GrtOptions};
//!
//! let grt = Grt::new(GrtOptions::default());
//! grt.register_class("app.Note", ClassBinding::generic());
//! grt.load_metaclasses(Path::new("structs.app.xml"))?;
//! grt.end_loading_metaclasses(true)?;
//!
//! let note = grt.create_object("app.Note")?;
//! note.set_member("text", "hello")?;
//! let xml = grt.serialize_to_string(&note.into(), "app", "1")?;
//! let copy = grt.unserialize_str(&xml)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Options loaded from TOML
pub mod config;

/// The GRT context facade
pub mod context;

/// Error types
pub mod error;

/// Message bus and progress reporting
pub mod messages;

/// Class descriptors and the metaclass table
pub mod metaclass;

/// Modules, interfaces and loaders
pub mod module;

/// Document writer
pub mod serializer;

/// Type tags and type specifications
pub mod types;

/// Undo groups, actions and managers
pub mod undo;

/// Document reader
pub mod unserializer;

/// Paths, ids and copying
pub mod util;

/// Reference-counted values
pub mod value;

/// Minimal XML element tree
pub mod xml;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::GrtOptions;
pub use context::{AutoUndo, Grt};
pub use error::{GrtError, GrtResult};
pub use messages::{HandlerId, Message, MessageBus, MessageType};
pub use metaclass::{ClassBinding, ClassMember, ClassMethod, ClassRegistry, MetaClass, MetaClassTable};
pub use module::{Interface, Module, ModuleFunction, ModuleLoader, NativeModuleLoader};
pub use serializer::Serializer;
pub use types::{parse_function_spec, ArgSpec, FunctionSpec, SimpleTypeSpec, Type, TypeSpec};
pub use undo::{UndoAction, UndoGroup, UndoManager};
pub use unserializer::Unserializer;
pub use util::{
    append_contents, copy_object, copy_value, get_guid, merge_contents_by_id, merge_contents_by_name,
    merge_dict_contents, merge_object_contents, replace_dict_contents, replace_list_contents, update_ids,
    CopyContext,
};
pub use value::{
    DictRef, DoubleRef, GrtObject, IntegerRef, ListRef, ObjectRef, Ref, StringRef, Value, ValueRef,
    WeakValueRef,
};
