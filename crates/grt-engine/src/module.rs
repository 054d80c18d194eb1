//! Modules, interfaces and module loaders
//!
//! A module is a named set of functions with typed signatures. Modules come
//! from loaders; the native loader reads small TOML manifests that name a
//! factory registered from Rust code:
//!
//! ```toml
//! [module]
//! name = "demo"
//! factory = "demo"
//! version = "1.0"
//! implements = ["Greeter"]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::error::{GrtError, GrtResult};
use crate::types::{parse_function_spec, ArgSpec, FunctionSpec, TypeSpec};
use crate::value::{ListRef, ValueRef};

/// Native function body
pub type ModuleCallable = Arc<dyn Fn(&ListRef) -> GrtResult<ValueRef> + Send + Sync>;

/// Builds a module for the native loader
pub type ModuleFactory = Arc<dyn Fn() -> GrtResult<Module> + Send + Sync>;

// ============================================================================
// Functions
// ============================================================================

/// A callable function of a module
#[derive(Clone)]
pub struct ModuleFunction {
    /// Function name
    pub name: String,
    /// Free text description
    pub description: String,
    /// Return type
    pub ret: TypeSpec,
    /// Arguments in order
    pub args: Vec<ArgSpec>,
    call: ModuleCallable,
}

impl ModuleFunction {
    /// Function from an already parsed signature
    pub fn new<F>(spec: FunctionSpec, call: F) -> Self
    where
        F: Fn(&ListRef) -> GrtResult<ValueRef> + Send + Sync + 'static,
    {
        Self {
            name: spec.name,
            description: String::new(),
            ret: spec.ret,
            args: spec.args,
            call: Arc::new(call),
        }
    }

    /// Function from a `name:ret:params` signature
    pub fn from_spec<F>(spec: &str, call: F) -> GrtResult<Self>
    where
        F: Fn(&ListRef) -> GrtResult<ValueRef> + Send + Sync + 'static,
    {
        Ok(Self::new(parse_function_spec(spec)?, call))
    }

    /// Check argument count and types
    pub fn check_args(&self, args: &ListRef) -> GrtResult<()> {
        if args.count() != self.args.len() {
            return Err(GrtError::Module(format!(
                "{}() takes {} arguments, {} given",
                self.name,
                self.args.len(),
                args.count()
            )));
        }
        for (arg, value) in self.args.iter().zip(args.items()) {
            value.check_assignable(&arg.type_spec.base, true)?;
        }
        Ok(())
    }

    /// Check the arguments, then invoke
    pub fn call(&self, args: &ListRef) -> GrtResult<ValueRef> {
        self.check_args(args)?;
        (self.call)(args)
    }

    /// Signature of the function
    pub fn spec(&self) -> FunctionSpec {
        FunctionSpec {
            name: self.name.clone(),
            ret: self.ret.clone(),
            args: self.args.clone(),
        }
    }
}

impl fmt::Debug for ModuleFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleFunction")
            .field("name", &self.name)
            .field("ret", &self.ret)
            .field("args", &self.args)
            .finish()
    }
}

// ============================================================================
// Modules
// ============================================================================

/// A named collection of functions
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    version: String,
    author: String,
    description: String,
    extends: String,
    interfaces: Vec<String>,
    functions: Vec<ModuleFunction>,
    path: PathBuf,
    loader: String,
}

impl Module {
    /// Empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: version string
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Builder: author
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Builder: description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: name of the module this one extends
    pub fn extending(mut self, base: impl Into<String>) -> Self {
        self.extends = base.into();
        self
    }

    /// Builder: declare an implemented interface
    pub fn implementing(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Builder: add a function from a signature
    pub fn function<F>(mut self, spec: &str, call: F) -> GrtResult<Self>
    where
        F: Fn(&ListRef) -> GrtResult<ValueRef> + Send + Sync + 'static,
    {
        self.add_function(ModuleFunction::from_spec(spec, call)?);
        Ok(self)
    }

    /// Add a function
    pub fn add_function(&mut self, function: ModuleFunction) {
        self.functions.push(function);
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Author
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Name of the extended module, may be empty
    pub fn extends(&self) -> &str {
        &self.extends
    }

    /// Declared interfaces
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Functions
    pub fn functions(&self) -> &[ModuleFunction] {
        &self.functions
    }

    /// File the module was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the loader that produced the module
    pub fn loader_name(&self) -> &str {
        &self.loader
    }

    pub(crate) fn set_origin(&mut self, path: &Path, loader: &str) {
        self.path = path.to_path_buf();
        self.loader = loader.to_string();
    }

    /// Function by name
    pub fn get_function(&self, name: &str) -> Option<&ModuleFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// True if the module has the function
    pub fn has_function(&self, name: &str) -> bool {
        self.get_function(name).is_some()
    }

    /// True if `interface` is declared
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// Call a function by name
    pub fn call_function(&self, name: &str, args: &ListRef) -> GrtResult<ValueRef> {
        let function = self.get_function(name).ok_or_else(|| GrtError::UnknownFunction {
            module: self.name.clone(),
            function: name.to_string(),
        })?;
        function.call(args)
    }

    /// Reject unnamed modules and duplicate function names
    pub fn validate(&self) -> GrtResult<()> {
        if self.name.is_empty() {
            return Err(GrtError::Module("module has no name".to_string()));
        }
        let mut seen = FxHashSet::default();
        for function in &self.functions {
            if !seen.insert(function.name.as_str()) {
                return Err(GrtError::Module(format!(
                    "module {} defines function {} twice",
                    self.name, function.name
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Interfaces
// ============================================================================

/// A named set of signatures modules can implement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
    name: String,
    functions: Vec<FunctionSpec>,
}

impl Interface {
    /// Interface without functions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Builder: add a function signature
    pub fn function(mut self, spec: &str) -> GrtResult<Self> {
        self.functions.push(parse_function_spec(spec)?);
        Ok(self)
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signatures
    pub fn functions(&self) -> &[FunctionSpec] {
        &self.functions
    }

    /// Names of functions `module` lacks or declares differently
    pub fn missing_in(&self, module: &Module) -> Vec<String> {
        self.functions
            .iter()
            .filter(|spec| {
                module
                    .get_function(&spec.name)
                    .map_or(true, |f| f.args.len() != spec.args.len() || f.ret != spec.ret)
            })
            .map(|spec| spec.name.clone())
            .collect()
    }
}

// ============================================================================
// Loaders
// ============================================================================

/// Produces modules from files
pub trait ModuleLoader: Send + Sync {
    /// Loader name
    fn name(&self) -> &str;

    /// True if the loader handles files like `path`
    fn check_file_extension(&self, path: &Path) -> bool;

    /// Build the module stored at `path`
    fn init_module(&self, path: &Path) -> GrtResult<Module>;

    /// Called after the set of registered modules changed
    fn refresh(&self) {}

    /// Run a script in the loader's language
    fn run_script(&self, _script: &str) -> GrtResult<()> {
        Err(GrtError::Module(format!("loader {} cannot run scripts", self.name())))
    }

    /// Run a script file
    fn run_script_file(&self, path: &Path) -> GrtResult<()> {
        let script = std::fs::read_to_string(path)?;
        self.run_script(&script)
    }
}

/// Extension of native module manifests
pub const NATIVE_MODULE_EXTENSION: &str = "grtmod";

#[derive(Debug, Deserialize)]
struct Manifest {
    module: ManifestModule,
}

#[derive(Debug, Deserialize)]
struct ManifestModule {
    name: String,
    factory: Option<String>,
    #[serde(default)]
    version: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    implements: Vec<String>,
}

/// Loader for modules implemented in Rust
///
/// Manifests name a factory registered with `register_factory`; the
/// factory builds the module and the manifest supplies its metadata.
#[derive(Default)]
pub struct NativeModuleLoader {
    factories: RwLock<FxHashMap<String, ModuleFactory>>,
}

impl NativeModuleLoader {
    /// Loader without factories
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module factory under `name`
    pub fn register_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> GrtResult<Module> + Send + Sync + 'static,
    {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    /// Registered factory names
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn name(&self) -> &str {
        "native"
    }

    fn check_file_extension(&self, path: &Path) -> bool {
        path.extension()
            .map_or(false, |ext| ext == NATIVE_MODULE_EXTENSION)
    }

    fn init_module(&self, path: &Path) -> GrtResult<Module> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = toml::from_str(&content)?;
        let meta = manifest.module;
        let factory_name = meta.factory.as_deref().unwrap_or(&meta.name);
        let factory = self
            .factories
            .read()
            .get(factory_name)
            .cloned()
            .ok_or_else(|| GrtError::Module(format!("no native factory named {}", factory_name)))?;

        let mut module = factory()?;
        module.name = meta.name;
        if !meta.version.is_empty() {
            module.version = meta.version;
        }
        if !meta.author.is_empty() {
            module.author = meta.author;
        }
        if !meta.description.is_empty() {
            module.description = meta.description;
        }
        for interface in meta.implements {
            if !module.implements(&interface) {
                module.interfaces.push(interface);
            }
        }
        module.set_origin(path, self.name());
        Ok(module)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registered loaders, modules and interfaces
#[derive(Default)]
pub struct ModuleRegistry {
    loaders: Vec<Arc<dyn ModuleLoader>>,
    modules: Vec<Arc<Module>>,
    interfaces: BTreeMap<String, Arc<Interface>>,
}

impl ModuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loader
    pub fn add_loader(&mut self, loader: Arc<dyn ModuleLoader>) {
        loader.refresh();
        self.loaders.push(loader);
    }

    /// Loader by name
    pub fn loader(&self, name: &str) -> Option<Arc<dyn ModuleLoader>> {
        self.loaders.iter().find(|l| l.name() == name).cloned()
    }

    /// First loader accepting `path`
    pub fn loader_for_file(&self, path: &Path) -> Option<Arc<dyn ModuleLoader>> {
        self.loaders
            .iter()
            .find(|l| l.check_file_extension(path))
            .cloned()
    }

    /// Notify every loader that the module set changed
    pub fn refresh_loaders(&self) {
        for loader in &self.loaders {
            loader.refresh();
        }
    }

    /// Registered modules
    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    /// Module by name
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    fn check_interfaces(&self, module: &Module) -> GrtResult<()> {
        for name in module.interfaces() {
            if let Some(interface) = self.interfaces.get(name) {
                let missing = interface.missing_in(module);
                if !missing.is_empty() {
                    return Err(GrtError::Module(format!(
                        "module {} does not implement {} of interface {}",
                        module.name(),
                        missing.join(", "),
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and add a module; names must be unique
    pub fn register(&mut self, module: Module) -> GrtResult<Arc<Module>> {
        module.validate()?;
        if self.get(module.name()).is_some() {
            return Err(GrtError::DuplicateModule(module.name().to_string()));
        }
        self.check_interfaces(&module)?;
        let module = Arc::new(module);
        self.modules.push(module.clone());
        Ok(module)
    }

    /// Replace the module with the same name, or add it
    pub fn refresh(&mut self, module: Module) -> GrtResult<Arc<Module>> {
        module.validate()?;
        self.check_interfaces(&module)?;
        let module = Arc::new(module);
        match self.modules.iter_mut().find(|m| m.name() == module.name()) {
            Some(slot) => *slot = module.clone(),
            None => self.modules.push(module.clone()),
        }
        Ok(module)
    }

    /// Remove a module by name
    pub fn unregister(&mut self, name: &str) -> Option<Arc<Module>> {
        let index = self.modules.iter().position(|m| m.name() == name)?;
        Some(self.modules.remove(index))
    }

    /// Sort modules by name, ignoring case
    pub fn sort(&mut self) {
        self.modules
            .sort_by_key(|m| m.name().to_ascii_lowercase());
    }

    /// Modules declaring `interface` (empty matches all) whose names match
    /// the glob `pattern` (empty matches all)
    pub fn find_matching(&self, interface: &str, pattern: &str) -> GrtResult<Vec<Arc<Module>>> {
        let pattern = if pattern.is_empty() {
            None
        } else {
            Some(Pattern::new(pattern).map_err(|e| GrtError::Module(format!("bad pattern {}: {}", pattern, e)))?)
        };
        Ok(self
            .modules
            .iter()
            .filter(|m| interface.is_empty() || m.implements(interface))
            .filter(|m| pattern.as_ref().map_or(true, |p| p.matches(m.name())))
            .cloned()
            .collect())
    }

    /// Add an interface; names must be unique
    pub fn register_interface(&mut self, interface: Interface) -> GrtResult<()> {
        if self.interfaces.contains_key(interface.name()) {
            return Err(GrtError::DuplicateInterface(interface.name().to_string()));
        }
        self.interfaces
            .insert(interface.name().to_string(), Arc::new(interface));
        Ok(())
    }

    /// Interface by name
    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.get(name).cloned()
    }

    /// Registered interfaces in name order
    pub fn interfaces(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn greeter() -> Module {
        Module::new("Greeter")
            .with_version("1.0")
            .implementing("Greeting")
            .function("greet:s:s name", |args| {
                let name = args.get(0)?;
                Ok(ValueRef::string(format!("hello {}", name.as_str().unwrap_or("?"))))
            })
            .unwrap()
            .function("count:i:l<i> items", |args| {
                let list = ListRef::cast_from(&args.get(0)?)?;
                Ok(ValueRef::integer(list.count() as i64))
            })
            .unwrap()
    }

    fn args(values: Vec<ValueRef>) -> ListRef {
        let list = ListRef::new_any();
        for value in values {
            list.ginsert(value).unwrap();
        }
        list
    }

    #[test]
    fn test_call_function() {
        let module = greeter();
        let result = module
            .call_function("greet", &args(vec![ValueRef::string("bob")]))
            .unwrap();
        assert_eq!(result.as_str(), Some("hello bob"));

        let items = ListRef::new(crate::types::SimpleTypeSpec::new(Type::Integer));
        items.ginsert(1).unwrap();
        let result = module
            .call_function("count", &args(vec![items.into()]))
            .unwrap();
        assert_eq!(result.as_int(), Some(1));
    }

    #[test]
    fn test_argument_checks() {
        let module = greeter();
        assert!(matches!(
            module.call_function("greet", &args(vec![])),
            Err(GrtError::Module(_))
        ));
        assert!(matches!(
            module.call_function("greet", &args(vec![ValueRef::integer(3)])),
            Err(GrtError::TypeMismatch { .. })
        ));
        assert!(matches!(
            module.call_function("missing", &args(vec![])),
            Err(GrtError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_validate_duplicates() {
        let module = greeter().function("greet:s:", |_| Ok(ValueRef::invalid())).unwrap();
        assert!(module.validate().is_err());
        assert!(Module::new("").validate().is_err());
    }

    #[test]
    fn test_registry_duplicates_and_refresh() {
        let mut registry = ModuleRegistry::new();
        registry.register(greeter()).unwrap();
        assert!(matches!(
            registry.register(greeter()),
            Err(GrtError::DuplicateModule(_))
        ));
        registry
            .refresh(greeter().with_version("2.0"))
            .unwrap();
        assert_eq!(registry.modules().len(), 1);
        assert_eq!(registry.get("Greeter").unwrap().version(), "2.0");
        assert!(registry.unregister("Greeter").is_some());
        assert!(registry.get("Greeter").is_none());
    }

    #[test]
    fn test_interface_conformance() {
        let mut registry = ModuleRegistry::new();
        registry
            .register_interface(Interface::new("Greeting").function("greet:s:s").unwrap())
            .unwrap();
        assert!(matches!(
            registry.register_interface(Interface::new("Greeting")),
            Err(GrtError::DuplicateInterface(_))
        ));
        registry.register(greeter()).unwrap();

        let broken = Module::new("Broken").implementing("Greeting");
        assert!(matches!(registry.register(broken), Err(GrtError::Module(_))));
    }

    #[test]
    fn test_find_matching() {
        let mut registry = ModuleRegistry::new();
        registry.register(greeter()).unwrap();
        registry.register(Module::new("GreeterFr")).unwrap();
        registry.register(Module::new("Other")).unwrap();

        let names = |found: Vec<Arc<Module>>| -> Vec<String> {
            found.iter().map(|m| m.name().to_string()).collect()
        };
        assert_eq!(names(registry.find_matching("", "Greeter*").unwrap()), vec!["Greeter", "GreeterFr"]);
        assert_eq!(names(registry.find_matching("Greeting", "").unwrap()), vec!["Greeter"]);
        assert_eq!(registry.find_matching("", "").unwrap().len(), 3);
        assert!(registry.find_matching("", "[").is_err());
    }

    #[test]
    fn test_native_loader_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.grtmod");
        std::fs::write(
            &path,
            "[module]\nname = \"Hello\"\nfactory = \"greeter\"\nauthor = \"me\"\nimplements = [\"Extra\"]\n",
        )
        .unwrap();

        let loader = NativeModuleLoader::new();
        loader.register_factory("greeter", || Ok(greeter()));
        assert!(loader.check_file_extension(&path));
        assert!(!loader.check_file_extension(Path::new("x.py")));

        let module = loader.init_module(&path).unwrap();
        assert_eq!(module.name(), "Hello");
        assert_eq!(module.author(), "me");
        assert_eq!(module.version(), "1.0");
        assert!(module.implements("Greeting"));
        assert!(module.implements("Extra"));
        assert_eq!(module.loader_name(), "native");
        assert_eq!(module.path(), path.as_path());
    }

    #[test]
    fn test_native_loader_unknown_factory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.grtmod");
        std::fs::write(&path, "[module]\nname = \"X\"\n").unwrap();
        let loader = NativeModuleLoader::new();
        assert!(matches!(loader.init_module(&path), Err(GrtError::Module(_))));
        assert!(loader.run_script("print(1)").is_err());
    }
}
