//! The composition controller: runs load transactions and owns the catalog.
//!
//! A transaction takes a module from schema-language source to committed
//! cell types in six sequential stages (see [`Stage`]). Transactions are
//! serialized by a lock held from staging until commit or failure; whatever
//! stage fails, the catalog is left exactly as it was.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, info_span, warn};

use crate::catalog::Catalog;
use crate::config::{CapacityHints, Settings};
use crate::error::{CompositionError, IntegrationError, Result};
use crate::loader::ModuleLoader;
use crate::pipeline::{self, BuildDescriptor, BuildJob, CodegenJob, Toolchain};
use crate::schema::CellType;
use crate::transaction::{CancelToken, Stage};
use crate::version::VersionRecord;

lazy_static! {
    // module names become crate and artifact names
    static ref MODULE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Arguments of one load transaction.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub module_name: String,
    pub version: Option<String>,
}

impl LoadRequest {
    pub fn new(source_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>, module_name: &str) -> Self {
        Self {
            source_dir: source_dir.into(),
            build_dir: build_dir.into(),
            module_name: module_name.to_owned(),
            version: None,
        }
    }
    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_owned());
        self
    }
}

// Holds the version record of the running transaction and clears it on every exit path.
struct InFlight<'c> {
    slot: &'c Mutex<Option<Arc<VersionRecord>>>,
}

impl<'c> InFlight<'c> {
    fn occupy(slot: &'c Mutex<Option<Arc<VersionRecord>>>, version: Arc<VersionRecord>) -> Result<Self> {
        *slot.lock()? = Some(version);
        Ok(Self { slot })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

fn check_cancel(cancel: &CancelToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CompositionError::Cancelled(stage));
    }
    Ok(())
}

// ------------- Controller -------------
pub struct Controller {
    catalog: Arc<Catalog>,
    toolchain: Box<dyn Toolchain>,
    loader: Box<dyn ModuleLoader>,
    storage_root: PathBuf,
    schema_extension: String,
    artifact_extension: String,
    capacity: CapacityHints,
    // Some once initialized
    include_directory: RwLock<Option<PathBuf>>,
    transaction: Mutex<()>,
    in_flight: Mutex<Option<Arc<VersionRecord>>>,
}

impl Controller {
    pub fn new(
        settings: &Settings,
        toolchain: impl Toolchain + 'static,
        loader: impl ModuleLoader + 'static,
    ) -> Self {
        Self {
            catalog: Arc::new(Catalog::new()),
            toolchain: Box::new(toolchain),
            loader: Box::new(loader),
            storage_root: settings.storage_root.clone(),
            schema_extension: settings.schema_extension.clone(),
            artifact_extension: settings.artifact_extension().to_owned(),
            capacity: settings.capacity,
            include_directory: RwLock::new(None),
            transaction: Mutex::new(()),
            in_flight: Mutex::new(None),
        }
    }
    /// Prepares the catalog and records the include directory threaded into
    /// every build descriptor. Calling it again only replaces the directory.
    pub fn init(&self, include_directory: impl Into<PathBuf>) -> Result<()> {
        let include_directory = include_directory.into();
        self.catalog.reserve(&self.capacity)?;
        info!(include_directory = %include_directory.display(), "controller initialized");
        *self.include_directory.write()? = Some(include_directory);
        Ok(())
    }
    pub fn is_initialized(&self) -> bool {
        self.include_directory
            .read()
            .map(|directory| directory.is_some())
            .unwrap_or(false)
    }
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }
    pub fn current_offset(&self) -> Result<CellType> {
        self.catalog.cursor()
    }
    /// The version record of the transaction currently running, if any.
    pub fn in_flight(&self) -> Result<Option<Arc<VersionRecord>>> {
        Ok(self.in_flight.lock()?.clone())
    }
    /// Generates, builds, loads and commits one module.
    pub fn load_from(
        &self,
        source_dir: impl AsRef<Path>,
        build_dir: impl AsRef<Path>,
        module_name: &str,
        version: Option<&str>,
    ) -> Result<Arc<VersionRecord>> {
        let mut request = LoadRequest::new(source_dir.as_ref(), build_dir.as_ref(), module_name);
        request.version = version.map(str::to_owned);
        self.load(request, &CancelToken::new())
    }
    /// Like [`Controller::load_from`], aborting when `cancel` fires.
    pub fn load(&self, request: LoadRequest, cancel: &CancelToken) -> Result<Arc<VersionRecord>> {
        let include_directory = self
            .include_directory
            .read()?
            .clone()
            .ok_or(CompositionError::NotInitialized)?;
        let _transaction = self.transaction.lock()?;
        let span = info_span!("load", module = %request.module_name);
        let _entered = span.enter();
        let result = self.run(request, &include_directory, cancel);
        if let Err(e) = &result {
            warn!(error = %e, "load transaction failed");
        }
        result
    }

    fn run(&self, request: LoadRequest, include_directory: &Path, cancel: &CancelToken) -> Result<Arc<VersionRecord>> {
        // ---- staged
        if !MODULE_NAME.is_match(&request.module_name) {
            return Err(CompositionError::InvalidModuleName(request.module_name));
        }
        // a committed module stays mapped, so its artifact path cannot be reused
        if self.catalog.contains_module(&request.module_name)? {
            return Err(CompositionError::ModuleAlreadyLoaded(request.module_name));
        }
        let load_dir = self.load_dir()?;
        let offset = self.catalog.cursor()?;
        let version = Arc::new(VersionRecord::new(
            offset,
            request.source_dir,
            request.build_dir,
            load_dir,
            request.module_name,
            request.version,
        ));
        let _in_flight = InFlight::occupy(&self.in_flight, Arc::clone(&version))?;
        debug!(
            source_dir = %version.source_dir().display(),
            build_dir = %version.build_dir().display(),
            load_dir = %version.load_dir().display(),
            "staging"
        );
        BuildDescriptor::new(version.namespace(), include_directory)
            .write_to(version.build_dir())
            .map_err(|source| CompositionError::Staging {
                path: version.build_dir().to_path_buf(),
                source,
            })?;
        info!(stage = %Stage::Staged, offset, version = version.version());
        check_cancel(cancel, Stage::Staged)?;

        // ---- generated source
        let sources = pipeline::schema_sources(version.source_dir(), &self.schema_extension)
            .map_err(|e| {
                CompositionError::CodeGenFailed(format!(
                    "unable to read {}: {}",
                    version.source_dir().display(),
                    e
                ))
            })?;
        if sources.is_empty() {
            return Err(CompositionError::CodeGenFailed(format!(
                "no .{} files in {}",
                self.schema_extension,
                version.source_dir().display()
            )));
        }
        let source_count = sources.len();
        self.toolchain.generate(
            &CodegenJob {
                sources,
                offset,
                namespace: version.namespace().to_owned(),
                output_dir: version.build_dir().to_path_buf(),
            },
            cancel,
        )?;
        info!(stage = %Stage::GeneratedSource, sources = source_count);
        check_cancel(cancel, Stage::GeneratedSource)?;

        // ---- built
        self.toolchain.build(
            &BuildJob {
                build_dir: version.build_dir().to_path_buf(),
                output_dir: version.load_dir().to_path_buf(),
            },
            cancel,
        )?;
        info!(stage = %Stage::Built);
        check_cancel(cancel, Stage::Built)?;

        // ---- loaded
        let artifact = version.artifact_path(&self.artifact_extension);
        let integration = |source: IntegrationError| CompositionError::ArtifactIntegration {
            artifact: artifact.clone(),
            source,
        };
        let module = self.loader.load(&artifact).map_err(integration)?;
        info!(stage = %Stage::Loaded, artifact = %artifact.display());

        // ---- validated
        let descriptors = module.schema().cell_descriptors();
        for descriptor in &descriptors {
            debug!(cell = %descriptor, "cell type");
        }
        let max = self
            .catalog
            .validate(offset, &descriptors)?
            .map_err(|incompatibility| integration(incompatibility.into()))?;
        info!(stage = %Stage::Validated, cell_types = descriptors.len(), max);
        check_cancel(cancel, Stage::Validated)?;

        // ---- committed
        let cursor = self
            .catalog
            .commit(Arc::clone(&version), module, &descriptors)?
            .map_err(|incompatibility| integration(incompatibility.into()))?;
        info!(stage = %Stage::Committed, interval_start = offset, cursor);
        Ok(version)
    }

    fn load_dir(&self) -> Result<PathBuf> {
        let staging = |source| CompositionError::Staging {
            path: self.storage_root.clone(),
            source,
        };
        fs::create_dir_all(&self.storage_root).map_err(staging)?;
        std::path::absolute(&self.storage_root).map_err(staging)
    }
}
