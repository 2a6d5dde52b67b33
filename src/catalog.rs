use std::ops::Range;
use std::sync::{Arc, RwLock};

// used to keep the one-to-one mapping between cell type names and their ids
use bimap::BiHashMap;
// used to keep track of every id handed out so far
use roaring::RoaringBitmap;
use serde::Serialize;

// other lookups use HashSet
use std::collections::HashSet;

// our own stuff that we need
use crate::config::CapacityHints;
use crate::error::{Incompatibility, Result};
use crate::interval;
use crate::loader::LoadedModule;
use crate::schema::{CellDescriptor, CellType, GenericCellOperations, NameHasher, StorageSchema};
use crate::version::VersionRecord;

pub type CellTypeIds = BiHashMap<String, CellType, NameHasher, NameHasher>;

// capacity hints are only hints, anything above this grows on demand
const RESERVE_LIMIT: usize = 1 << 20;

// ------------- Catalog State -------------
// Index-aligned: position i in every Vec describes the i-th loaded module.
struct CatalogState {
    schemas: Vec<Arc<dyn StorageSchema>>,
    operations: Vec<Arc<dyn GenericCellOperations>>,
    intervals: Vec<CellType>,
    versions: Vec<Arc<VersionRecord>>,
    digests: Vec<Option<blake3::Hash>>,
    cell_type_ids: CellTypeIds,
    assigned: RoaringBitmap,
    cursor: CellType,
}

impl CatalogState {
    fn new() -> Self {
        Self {
            schemas: Vec::new(),
            operations: Vec::new(),
            intervals: Vec::new(),
            versions: Vec::new(),
            digests: Vec::new(),
            cell_type_ids: CellTypeIds::default(),
            assigned: RoaringBitmap::new(),
            cursor: 0,
        }
    }

    // Returns the largest id among the descriptors.
    fn validate(&self, offset: CellType, descriptors: &[CellDescriptor]) -> std::result::Result<CellType, Incompatibility> {
        if offset != self.cursor {
            return Err(Incompatibility::StaleOffset { offset, cursor: self.cursor });
        }
        if descriptors.is_empty() {
            return Err(Incompatibility::Empty);
        }
        let mut ids = RoaringBitmap::new();
        let mut names = HashSet::<&str, NameHasher>::default();
        for descriptor in descriptors {
            let cell_type = descriptor.cell_type();
            if cell_type < offset {
                return Err(Incompatibility::BelowOffset {
                    type_name: descriptor.type_name().to_owned(),
                    cell_type,
                    offset,
                });
            }
            if self.assigned.contains(cell_type) || !ids.insert(cell_type) {
                return Err(Incompatibility::DuplicateTypeId(cell_type));
            }
            if !names.insert(descriptor.type_name()) {
                return Err(Incompatibility::DuplicateTypeName(descriptor.type_name().to_owned()));
            }
            if let Some(existing) = self.cell_type_ids.get_by_left(descriptor.type_name()) {
                return Err(Incompatibility::NameCollision {
                    type_name: descriptor.type_name().to_owned(),
                    existing: *existing,
                });
            }
        }
        // ids is non-empty at this point
        let max = ids.max().unwrap_or(offset);
        if max == CellType::MAX {
            return Err(Incompatibility::Exhausted);
        }
        // the new ids must continue the space exactly where it ends now
        for (expected, id) in (self.cursor..).zip(ids.iter()) {
            if id != expected {
                return Err(Incompatibility::Gap { missing: expected });
            }
        }
        Ok(max)
    }
}

/// A read-only view of one loaded module.
#[derive(Debug, Serialize)]
pub struct ModuleSummary {
    pub index: usize,
    pub namespace: String,
    pub version: String,
    pub interval: Range<CellType>,
    pub digest: Option<String>,
    pub cell_types: Vec<CellDescriptor>,
}

// ------------- Catalog -------------
/// Every loaded module with the part of the type id space it owns. Readers
/// always observe the catalog either before or after a commit, never halfway.
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState::new()),
        }
    }
    // Sizes the collections for the expected number of modules, only while still empty.
    pub fn reserve(&self, hints: &CapacityHints) -> Result<()> {
        let mut state = self.state.write()?;
        if state.intervals.is_empty() {
            let modules = hints.avg_modules.min(RESERVE_LIMIT);
            let cells = hints.avg_modules.saturating_mul(hints.avg_cells).min(RESERVE_LIMIT);
            state.schemas.reserve(modules);
            state.operations.reserve(modules);
            state.intervals.reserve(modules);
            state.versions.reserve(modules);
            state.digests.reserve(modules);
            state.cell_type_ids.reserve(cells);
        }
        Ok(())
    }
    /// The next unassigned cell type id.
    pub fn cursor(&self) -> Result<CellType> {
        Ok(self.state.read()?.cursor)
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read()?.intervals.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    pub fn intervals(&self) -> Result<Vec<CellType>> {
        Ok(self.state.read()?.intervals.clone())
    }
    pub fn cell_type_ids(&self) -> Result<Vec<(String, CellType)>> {
        let state = self.state.read()?;
        let mut pairs: Vec<(String, CellType)> = state
            .cell_type_ids
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        pairs.sort_by_key(|(_, id)| *id);
        Ok(pairs)
    }
    pub fn cell_type_id(&self, name: &str) -> Result<Option<CellType>> {
        Ok(self.state.read()?.cell_type_ids.get_by_left(name).copied())
    }
    pub fn cell_type_name(&self, id: CellType) -> Result<Option<String>> {
        Ok(self.state.read()?.cell_type_ids.get_by_right(&id).cloned())
    }
    pub fn by_type_id(&self, id: CellType) -> Result<usize> {
        let state = self.state.read()?;
        interval::by_type_id(&state.intervals, state.cursor, id)
    }
    pub fn by_type_name(&self, name: &str) -> Result<usize> {
        let state = self.state.read()?;
        interval::by_type_name(&state.cell_type_ids, &state.intervals, state.cursor, name)
    }
    pub fn interval(&self, index: usize) -> Result<Option<Range<CellType>>> {
        let state = self.state.read()?;
        Ok(interval::interval_range(&state.intervals, state.cursor, index))
    }
    pub fn schema(&self, index: usize) -> Result<Option<Arc<dyn StorageSchema>>> {
        Ok(self.state.read()?.schemas.get(index).cloned())
    }
    pub fn operations(&self, index: usize) -> Result<Option<Arc<dyn GenericCellOperations>>> {
        Ok(self.state.read()?.operations.get(index).cloned())
    }
    pub fn version(&self, index: usize) -> Result<Option<Arc<VersionRecord>>> {
        Ok(self.state.read()?.versions.get(index).cloned())
    }
    pub fn versions(&self) -> Result<Vec<Arc<VersionRecord>>> {
        Ok(self.state.read()?.versions.clone())
    }
    pub fn contains_module(&self, namespace: &str) -> Result<bool> {
        let state = self.state.read()?;
        Ok(state.versions.iter().any(|version| version.namespace() == namespace))
    }
    /// The operations handle of the module owning `id`, for dispatch.
    pub fn operations_for_type(&self, id: CellType) -> Result<Arc<dyn GenericCellOperations>> {
        let state = self.state.read()?;
        let index = interval::by_type_id(&state.intervals, state.cursor, id)?;
        Ok(Arc::clone(&state.operations[index]))
    }
    pub fn summaries(&self) -> Result<Vec<ModuleSummary>> {
        let state = self.state.read()?;
        let mut summaries = Vec::with_capacity(state.intervals.len());
        for (index, version) in state.versions.iter().enumerate() {
            summaries.push(ModuleSummary {
                index,
                namespace: version.namespace().to_owned(),
                version: version.version().to_owned(),
                interval: interval::interval_range(&state.intervals, state.cursor, index)
                    .unwrap_or(0..0),
                digest: state.digests[index].map(|digest| digest.to_hex().to_string()),
                cell_types: state.schemas[index].cell_descriptors(),
            });
        }
        Ok(summaries)
    }

    // functions used by the controller while a transaction holds its lock
    pub(crate) fn validate(
        &self,
        offset: CellType,
        descriptors: &[CellDescriptor],
    ) -> Result<std::result::Result<CellType, Incompatibility>> {
        Ok(self.state.read()?.validate(offset, descriptors))
    }
    /// Appends the module in one step and returns the advanced cursor. The
    /// descriptors are validated again under the write lock, so a rejected
    /// module leaves every collection untouched.
    pub(crate) fn commit(
        &self,
        version: Arc<VersionRecord>,
        module: LoadedModule,
        descriptors: &[CellDescriptor],
    ) -> Result<std::result::Result<CellType, Incompatibility>> {
        let mut state = self.state.write()?;
        let max = match state.validate(version.cell_type_offset(), descriptors) {
            Ok(max) => max,
            Err(incompatibility) => return Ok(Err(incompatibility)),
        };
        let (schema, operations, digest) = module.into_parts();
        state.schemas.push(schema);
        state.operations.push(operations);
        state.digests.push(digest);
        for descriptor in descriptors {
            state
                .cell_type_ids
                .insert(descriptor.type_name().to_owned(), descriptor.cell_type());
            state.assigned.insert(descriptor.cell_type());
        }
        state.intervals.push(version.cell_type_offset());
        state.versions.push(version);
        state.cursor = state.cursor.max(max + 1);
        Ok(Ok(state.cursor))
    }
}
