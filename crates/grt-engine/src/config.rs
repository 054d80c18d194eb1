//! Runtime options
//!
//! Options are read from TOML. Every key is optional:
//!
//! ```toml
//! verbose = false
//! check_serialized_crc = true
//! undo_limit = 0
//! struct_paths = ["structs"]
//! module_paths = ["modules"]
//! document_type = "workbench"
//! document_version = "1.0"
//! ```
//!
//! `GRT_VERBOSE` set to a non-empty value forces `verbose` on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GrtError, GrtResult};

/// Environment variable that forces verbose output
pub const VERBOSE_ENV: &str = "GRT_VERBOSE";

/// Context options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrtOptions {
    /// Emit verbose messages on the bus
    pub verbose: bool,
    /// Compare struct checksums stored in documents with the loaded classes
    pub check_serialized_crc: bool,
    /// Maximum undo stack depth, 0 for unlimited
    pub undo_limit: usize,
    /// Directories scanned for `structs.*.xml`
    pub struct_paths: Vec<PathBuf>,
    /// Directories scanned for modules
    pub module_paths: Vec<PathBuf>,
    /// Document type written by the serializer
    pub document_type: String,
    /// Document version written by the serializer
    pub document_version: String,
    /// Give every class without a native allocator the generic one
    pub bind_generic_allocators: bool,
}

impl Default for GrtOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            check_serialized_crc: true,
            undo_limit: 0,
            struct_paths: Vec::new(),
            module_paths: Vec::new(),
            document_type: String::new(),
            document_version: String::new(),
            bind_generic_allocators: false,
        }
    }
}

impl GrtOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> GrtResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from TOML text, then apply environment overrides
    pub fn from_toml_str(content: &str) -> GrtResult<Self> {
        let mut options: GrtOptions = toml::from_str(content)?;
        options.apply_overrides(|key| std::env::var(key).ok());
        Ok(options)
    }

    /// Write options as TOML
    pub fn to_file(&self, path: &Path) -> GrtResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| GrtError::Document(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment overrides from the process environment
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(VERBOSE_ENV).map_or(false, |v| !v.is_empty()) {
            self.verbose = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GrtOptions::default();
        assert!(!options.verbose);
        assert!(options.check_serialized_crc);
        assert_eq!(options.undo_limit, 0);
        assert!(options.struct_paths.is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let options: GrtOptions = toml::from_str(
            r#"
            check_serialized_crc = false
            undo_limit = 25
            struct_paths = ["a", "b"]
            document_type = "model"
            "#,
        )
        .unwrap();
        assert!(!options.check_serialized_crc);
        assert_eq!(options.undo_limit, 25);
        assert_eq!(options.struct_paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(options.document_type, "model");
        assert_eq!(options.document_version, "");
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            GrtOptions::from_toml_str("undo_limit = \"many\""),
            Err(GrtError::Config(_))
        ));
    }

    #[test]
    fn test_verbose_override() {
        let mut options = GrtOptions::default();
        options.apply_overrides(|_| Some(String::new()));
        assert!(!options.verbose);
        options.apply_overrides(|key| (key == VERBOSE_ENV).then(|| "1".to_string()));
        assert!(options.verbose);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grt.toml");
        let options = GrtOptions {
            undo_limit: 7,
            module_paths: vec![PathBuf::from("mods")],
            ..GrtOptions::default()
        };
        options.to_file(&path).unwrap();
        let loaded = GrtOptions::from_file(&path).unwrap();
        assert_eq!(loaded.undo_limit, 7);
        assert_eq!(loaded.module_paths, options.module_paths);
    }
}
