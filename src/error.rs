use std::path::PathBuf;
use thiserror::Error;

use crate::schema::CellType;
use crate::transaction::Stage;

#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Controller has not been initialized")]
    NotInitialized,
    #[error("Invalid module name: {0}")]
    InvalidModuleName(String),
    #[error("Module {0} is already loaded")]
    ModuleAlreadyLoaded(String),
    #[error("Staging error at {path}: {source}")]
    Staging { path: PathBuf, #[source] source: std::io::Error },
    #[error("Code generation failed: {0}")]
    CodeGenFailed(String),
    #[error("Build failed: {0}")]
    BuildFailed(String),
    #[error("Transaction cancelled while {0}")]
    Cancelled(Stage),
    #[error("Artifact integration failed for {artifact}: {source}")]
    ArtifactIntegration { artifact: PathBuf, #[source] source: IntegrationError },
    #[error("Type not found: {0}")]
    TypeNotFound(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

/// Everything that can go wrong between opening an artifact and handing its
/// cell types over to the catalog.
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("unable to load library: {0}")]
    Load(String),
    #[error("missing module declaration symbol")]
    MissingDeclaration,
    #[error("ABI mismatch: host {expected}, module {actual}")]
    AbiMismatch { expected: String, actual: String },
    #[error("no module is linked under the name '{0}'")]
    UnknownModule(String),
    #[error("incompatible module: {0}")]
    Incompatible(#[from] Incompatibility),
}

/// Violations of the type id space found while validating a loaded module.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Incompatibility {
    #[error("module defines no cell types")]
    Empty,
    #[error("cell type '{type_name}' has id {cell_type} below the assigned offset {offset}")]
    BelowOffset { type_name: String, cell_type: CellType, offset: CellType },
    #[error("cell type id {0} is defined more than once")]
    DuplicateTypeId(CellType),
    #[error("cell type name '{0}' is defined more than once")]
    DuplicateTypeName(String),
    #[error("cell type name '{type_name}' is already registered with id {existing}")]
    NameCollision { type_name: String, existing: CellType },
    #[error("cell type id {missing} is left unassigned")]
    Gap { missing: CellType },
    #[error("module was generated for offset {offset} but the id space now ends at {cursor}")]
    StaleOffset { offset: CellType, cursor: CellType },
    #[error("cell type id space is exhausted")]
    Exhausted,
}

pub type Result<T> = std::result::Result<T, CompositionError>;

// Helper conversions
impl From<config::ConfigError> for CompositionError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

impl<T> From<std::sync::PoisonError<T>> for CompositionError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
