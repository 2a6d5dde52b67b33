// used to let other subsystems recover the concrete operations type
use std::any::Any;
// used to print out readable forms of a descriptor
use std::fmt;
use std::hash::BuildHasherDefault;

use seahash::SeaHasher;
use serde::Serialize;

// ------------- Cell Type -------------
pub type CellType = u32;

// hasher for everything keyed by type or module names
pub type NameHasher = BuildHasherDefault<SeaHasher>;

// ------------- Descriptors -------------
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FieldDescriptor {
    name: String,
    type_name: String,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Describes one storable cell type exported by a module. The id is already
/// adjusted by the offset the module was generated with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CellDescriptor {
    type_name: String,
    cell_type: CellType,
    fields: Vec<FieldDescriptor>,
}

impl CellDescriptor {
    pub fn new(type_name: impl Into<String>, cell_type: CellType) -> Self {
        Self {
            type_name: type_name.into(),
            cell_type,
            fields: Vec::new(),
        }
    }
    pub fn with_field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push(FieldDescriptor::new(name, type_name));
        self
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }
    // Fields are only ever inspected for diagnostics.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

impl fmt::Display for CellDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|field| format!("{}: {}", field.name, field.type_name))
            .collect();
        write!(f, "{}#{} {{{}}}", self.type_name, self.cell_type, fields.join(", "))
    }
}

// ------------- Capabilities -------------

/// Produces the cell types a loaded module defines.
pub trait StorageSchema: Send + Sync {
    fn cell_descriptors(&self) -> Vec<CellDescriptor>;
}

/// Type-erased cell operations of a loaded module. The controller only keeps
/// the handle; dispatching subsystems downcast through `as_any`.
pub trait GenericCellOperations: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}
