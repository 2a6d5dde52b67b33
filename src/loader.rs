//! Loading of built modules and extraction of their capabilities.
//!
//! Instead of scanning a module for types implementing the two capabilities,
//! every module exports a single [`ModuleDeclaration`] (see [`export_module!`])
//! whose `exports` function hands over exactly one schema and one operations
//! object. A module therefore cannot offer zero or several of either.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use crate::error::IntegrationError;
use crate::schema::{GenericCellOperations, NameHasher, StorageSchema};

pub const MODULE_ABI_VERSION: u32 = 1;
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DECLARATION_SYMBOL: &[u8] = b"cellcomp_module_declaration\0";

// ------------- Exports -------------
pub struct ModuleExports {
    pub schema: Box<dyn StorageSchema>,
    pub operations: Box<dyn GenericCellOperations>,
}

impl ModuleExports {
    pub fn new(
        schema: impl StorageSchema + 'static,
        operations: impl GenericCellOperations + 'static,
    ) -> Self {
        Self {
            schema: Box::new(schema),
            operations: Box::new(operations),
        }
    }
}

/// What a module exports under [`DECLARATION_SYMBOL`].
#[derive(Clone, Copy)]
pub struct ModuleDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub exports: fn() -> ModuleExports,
}

impl ModuleDeclaration {
    pub fn check(&self) -> Result<(), IntegrationError> {
        if self.abi_version != MODULE_ABI_VERSION {
            return Err(IntegrationError::AbiMismatch {
                expected: format!("abi {}", MODULE_ABI_VERSION),
                actual: format!("abi {}", self.abi_version),
            });
        }
        if self.core_version != CORE_VERSION {
            return Err(IntegrationError::AbiMismatch {
                expected: format!("core {}", CORE_VERSION),
                actual: format!("core {}", self.core_version),
            });
        }
        Ok(())
    }
}

/// Declares the module exported by the crate it is used in. Generated module
/// sources end with a single invocation:
///
/// ```ignore
/// cellcomp::export_module!(exports);
///
/// fn exports() -> cellcomp::loader::ModuleExports {
///     cellcomp::loader::ModuleExports::new(Schema, Operations)
/// }
/// ```
#[macro_export]
macro_rules! export_module {
    ($exports:path) => {
        #[doc(hidden)]
        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static cellcomp_module_declaration: $crate::loader::ModuleDeclaration =
            $crate::loader::ModuleDeclaration {
                abi_version: $crate::loader::MODULE_ABI_VERSION,
                core_version: $crate::loader::CORE_VERSION,
                exports: $exports,
            };
    };
}

// ------------- Loaded Module -------------
pub struct LoadedModule {
    schema: Box<dyn StorageSchema>,
    operations: Box<dyn GenericCellOperations>,
    digest: Option<blake3::Hash>,
    // declared last so the objects above are dropped before their code is unmapped
    library: Option<Library>,
}

impl LoadedModule {
    pub fn from_exports(exports: ModuleExports) -> Self {
        Self {
            schema: exports.schema,
            operations: exports.operations,
            digest: None,
            library: None,
        }
    }
    pub fn schema(&self) -> &dyn StorageSchema {
        self.schema.as_ref()
    }
    pub fn operations(&self) -> &dyn GenericCellOperations {
        self.operations.as_ref()
    }
    pub fn digest(&self) -> Option<&blake3::Hash> {
        self.digest.as_ref()
    }
    pub(crate) fn into_parts(
        self,
    ) -> (Arc<dyn StorageSchema>, Arc<dyn GenericCellOperations>, Option<blake3::Hash>) {
        // Committed modules stay mapped for the lifetime of the process, since
        // handles to their objects may outlive the catalog.
        if let Some(library) = self.library {
            std::mem::forget(library);
        }
        (Arc::from(self.schema), Arc::from(self.operations), self.digest)
    }
}

// ------------- Loaders -------------
pub trait ModuleLoader: Send + Sync {
    fn load(&self, artifact: &Path) -> Result<LoadedModule, IntegrationError>;
}

/// Loads artifacts as dynamic libraries.
#[derive(Debug, Default)]
pub struct DynamicLibraryLoader;

impl ModuleLoader for DynamicLibraryLoader {
    fn load(&self, artifact: &Path) -> Result<LoadedModule, IntegrationError> {
        let bytes = fs::read(artifact).map_err(|e| IntegrationError::Load(e.to_string()))?;
        let digest = blake3::hash(&bytes);
        debug!(artifact = %artifact.display(), digest = %digest.to_hex(), "loading library");
        // SAFETY: the artifact was produced by our own build pipeline from
        // generated source; its initializers are trusted.
        let library = unsafe { Library::new(artifact) }
            .map_err(|e| IntegrationError::Load(e.to_string()))?;
        let declaration = {
            // SAFETY: the symbol is the static emitted by `export_module!`,
            // which has type `ModuleDeclaration`.
            let symbol = unsafe { library.get::<*const ModuleDeclaration>(DECLARATION_SYMBOL) }
                .map_err(|_| IntegrationError::MissingDeclaration)?;
            unsafe { symbol.read() }
        };
        declaration.check()?;
        let exports = (declaration.exports)();
        Ok(LoadedModule {
            schema: exports.schema,
            operations: exports.operations,
            digest: Some(digest),
            library: Some(library),
        })
    }
}

type ExportsFn = Box<dyn Fn() -> ModuleExports + Send + Sync>;

/// Resolves artifacts against modules linked into the host process, keyed by
/// the artifact's file stem (the module namespace).
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: HashMap<String, ExportsFn, NameHasher>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(
        &mut self,
        namespace: &str,
        exports: impl Fn() -> ModuleExports + Send + Sync + 'static,
    ) {
        self.modules.insert(namespace.to_owned(), Box::new(exports));
    }
    pub fn register_declaration(
        &mut self,
        namespace: &str,
        declaration: ModuleDeclaration,
    ) -> Result<(), IntegrationError> {
        declaration.check()?;
        self.register(namespace, declaration.exports);
        Ok(())
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, artifact: &Path) -> Result<LoadedModule, IntegrationError> {
        let namespace = artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let exports = self
            .modules
            .get(&namespace)
            .ok_or(IntegrationError::UnknownModule(namespace))?;
        Ok(LoadedModule::from_exports(exports()))
    }
}
