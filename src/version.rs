use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::schema::CellType;

// ------------- Version Record -------------
// Everything one load transaction works with. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    cell_type_offset: CellType,
    source_dir: PathBuf,
    build_dir: PathBuf,
    load_dir: PathBuf,
    namespace: String,
    version: String,
}

impl VersionRecord {
    pub fn new(
        cell_type_offset: CellType,
        source_dir: PathBuf,
        build_dir: PathBuf,
        load_dir: PathBuf,
        namespace: String,
        version: Option<String>,
    ) -> Self {
        Self {
            cell_type_offset,
            source_dir,
            build_dir,
            load_dir,
            namespace,
            version: version.unwrap_or_else(|| Local::now().to_rfc3339()),
        }
    }
    pub fn cell_type_offset(&self) -> CellType {
        self.cell_type_offset
    }
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }
    pub fn load_dir(&self) -> &Path {
        &self.load_dir
    }
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
    pub fn version(&self) -> &str {
        &self.version
    }
    /// Where the build tool is expected to leave the module.
    pub fn artifact_path(&self, extension: &str) -> PathBuf {
        self.load_dir.join(format!("{}.{}", self.namespace, extension))
    }
}
