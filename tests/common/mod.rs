#![allow(dead_code)]

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use cellcomp::config::Settings;
use cellcomp::controller::Controller;
use cellcomp::loader::{ModuleExports, StaticModuleLoader};
use cellcomp::pipeline::{BuildJob, CodegenJob, Toolchain};
use cellcomp::schema::{CellDescriptor, CellType, GenericCellOperations, StorageSchema};
use cellcomp::transaction::{CancelToken, Stage};
use cellcomp::version::VersionRecord;
use cellcomp::{CompositionError, Result};

// ------------- Fixture Modules -------------
pub struct FixtureSchema(pub Vec<CellDescriptor>);

impl StorageSchema for FixtureSchema {
    fn cell_descriptors(&self) -> Vec<CellDescriptor> {
        self.0.clone()
    }
}

#[derive(Debug)]
pub struct FixtureOperations {
    pub namespace: String,
}

impl GenericCellOperations for FixtureOperations {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone)]
enum Fixture {
    // ids follow the offset the generator was handed, like real generated code
    Generated(Vec<String>),
    // ids exactly as given, whatever the offset
    Fixed(Vec<(String, CellType)>),
}

type Offsets = Arc<Mutex<HashMap<String, CellType>>>;

// ------------- Scripted Toolchain -------------
struct Gate {
    entered: Sender<()>,
    release: Mutex<Receiver<()>>,
}

pub struct ScriptedToolchain {
    offsets: Offsets,
    jobs: Arc<Mutex<Vec<CodegenJob>>>,
    fail_codegen: HashSet<String>,
    fail_build: HashSet<String>,
    gate: Option<Gate>,
}

impl Toolchain for ScriptedToolchain {
    fn generate(&self, job: &CodegenJob, cancel: &CancelToken) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.entered.send(()).unwrap();
            gate.release.lock().unwrap().recv().unwrap();
        }
        if cancel.is_cancelled() {
            return Err(CompositionError::Cancelled(Stage::GeneratedSource));
        }
        self.jobs.lock().unwrap().push(job.clone());
        if self.fail_codegen.contains(&job.namespace) {
            return Err(CompositionError::CodeGenFailed(format!("{} does not compile", job.namespace)));
        }
        self.offsets.lock().unwrap().insert(job.namespace.clone(), job.offset);
        Ok(())
    }
    fn build(&self, job: &BuildJob, _cancel: &CancelToken) -> Result<()> {
        let namespace = job
            .build_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_build.contains(&namespace) {
            return Err(CompositionError::BuildFailed(format!("{} did not link", namespace)));
        }
        Ok(())
    }
}

// ------------- Bench -------------
/// Describes the modules available to one test.
#[derive(Default)]
pub struct Bench {
    modules: Vec<(String, Option<Fixture>)>,
    unsourced: HashSet<String>,
    fail_codegen: HashSet<String>,
    fail_build: HashSet<String>,
    gated: bool,
}

impl Bench {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn module(mut self, name: &str, cells: &[&str]) -> Self {
        let cells = cells.iter().map(|cell| cell.to_string()).collect();
        self.modules.push((name.to_owned(), Some(Fixture::Generated(cells))));
        self
    }
    pub fn fixed(mut self, name: &str, cells: &[(&str, CellType)]) -> Self {
        let cells = cells.iter().map(|(cell, id)| (cell.to_string(), *id)).collect();
        self.modules.push((name.to_owned(), Some(Fixture::Fixed(cells))));
        self
    }
    // builds fine but exports nothing the loader knows about
    pub fn unregistered(mut self, name: &str) -> Self {
        self.modules.push((name.to_owned(), None));
        self
    }
    pub fn unsourced(mut self, name: &str) -> Self {
        self.unsourced.insert(name.to_owned());
        self.module(name, &["Orphan"])
    }
    pub fn failing_codegen(mut self, name: &str) -> Self {
        self.fail_codegen.insert(name.to_owned());
        self
    }
    pub fn failing_build(mut self, name: &str) -> Self {
        self.fail_build.insert(name.to_owned());
        self
    }
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }
    pub fn start(self) -> Workbench {
        let dir = tempfile::tempdir().expect("temp dir");
        let offsets: Offsets = Arc::new(Mutex::new(HashMap::new()));
        let jobs = Arc::new(Mutex::new(Vec::new()));

        let mut loader = StaticModuleLoader::new();
        for (name, fixture) in &self.modules {
            let source_dir = dir.path().join("schemas").join(name);
            fs::create_dir_all(&source_dir).expect("source dir");
            fs::write(source_dir.join("notes.txt"), "not a schema").expect("notes");
            if !self.unsourced.contains(name) {
                fs::write(source_dir.join("b_cells.tsl"), "cell struct B {}").expect("schema");
                fs::write(source_dir.join("a_cells.tsl"), "cell struct A {}").expect("schema");
            }
            let Some(fixture) = fixture.clone() else { continue };
            let namespace = name.clone();
            let offsets = Arc::clone(&offsets);
            loader.register(name, move || {
                let descriptors = match &fixture {
                    Fixture::Generated(cells) => {
                        let offset = offsets.lock().unwrap().get(&namespace).copied().unwrap_or(0);
                        cells
                            .iter()
                            .enumerate()
                            .map(|(i, cell)| {
                                CellDescriptor::new(cell.as_str(), offset + i as CellType)
                                    .with_field("name", "string")
                            })
                            .collect()
                    }
                    Fixture::Fixed(cells) => cells
                        .iter()
                        .map(|(cell, id)| CellDescriptor::new(cell.as_str(), *id))
                        .collect(),
                };
                ModuleExports::new(
                    FixtureSchema(descriptors),
                    FixtureOperations { namespace: namespace.clone() },
                )
            });
        }

        let (gate, gate_handles) = if self.gated {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            (
                Some(Gate { entered: entered_tx, release: Mutex::new(release_rx) }),
                Some((entered_rx, release_tx)),
            )
        } else {
            (None, None)
        };
        let toolchain = ScriptedToolchain {
            offsets,
            jobs: Arc::clone(&jobs),
            fail_codegen: self.fail_codegen,
            fail_build: self.fail_build,
            gate,
        };

        let settings = Settings {
            storage_root: dir.path().join("storage"),
            ..Settings::default()
        };
        let controller = Controller::new(&settings, toolchain, loader);
        Workbench {
            dir,
            controller: Arc::new(controller),
            jobs,
            gate: gate_handles,
        }
    }
}

// ------------- Workbench -------------
pub struct Workbench {
    pub dir: TempDir,
    pub controller: Arc<Controller>,
    pub jobs: Arc<Mutex<Vec<CodegenJob>>>,
    // (entered, release) ends of a gated toolchain
    pub gate: Option<(Receiver<()>, Sender<()>)>,
}

/// Everything observable about the catalog, for before/after comparisons.
#[derive(Debug, PartialEq)]
pub struct Snapshot {
    pub intervals: Vec<CellType>,
    pub cell_type_ids: Vec<(String, CellType)>,
    pub cursor: CellType,
    pub modules: usize,
    pub versions: Vec<VersionRecord>,
}

impl Workbench {
    pub fn init(&self) {
        self.controller.init(self.include_dir()).expect("init");
    }
    pub fn include_dir(&self) -> PathBuf {
        self.dir.path().join("include")
    }
    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join("schemas").join(name)
    }
    pub fn build_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join("build").join(name)
    }
    pub fn load(&self, name: &str) -> Result<Arc<VersionRecord>> {
        self.controller
            .load_from(self.source_dir(name), self.build_dir(name), name, None)
    }
    pub fn snapshot(&self) -> Snapshot {
        let catalog = self.controller.catalog();
        Snapshot {
            intervals: catalog.intervals().unwrap(),
            cell_type_ids: catalog.cell_type_ids().unwrap(),
            cursor: catalog.cursor().unwrap(),
            modules: catalog.len().unwrap(),
            versions: catalog
                .versions()
                .unwrap()
                .iter()
                .map(|version| VersionRecord::clone(version))
                .collect(),
        }
    }
}
