//! Cellcomp – runtime composition of cell type schemas for a graph storage engine.
//!
//! A storage engine stores *cells*, and every cell carries a type drawn from
//! one process-wide integer space. Cellcomp lets that set of types grow while
//! the process runs: a storage extension *module* is described in an external
//! schema language, and the [`controller::Controller`] turns it into a loaded,
//! registered part of the type space.
//!
//! One load transaction goes through these stages:
//! * a [`version::VersionRecord`] is staged with the current offset, and a build
//!   descriptor is written into the build directory;
//! * the external code generator emits source for the module, with every cell
//!   type id shifted by the offset;
//! * the external build tool turns the source into a loadable artifact;
//! * the artifact is loaded and hands over its [`schema::StorageSchema`] and
//!   [`schema::GenericCellOperations`] (see [`export_module!`]);
//! * the new ids are validated and committed to the [`catalog::Catalog`].
//!
//! ## Type Id Space
//! Each module owns one contiguous interval of ids, starting at the offset it
//! was generated with. Intervals are appended in load order, so ids already
//! handed out never change. After every commit the space `[0, cursor)` is
//! fully assigned and the interval starts are strictly increasing. The
//! [`interval`] module maps an id or a type name back to its owning module.
//!
//! ## Modules
//! * [`controller`] – Load transactions and the single-writer discipline.
//! * [`catalog`] – The registry of loaded modules and their intervals.
//! * [`interval`] – Lookups from id or name to module index.
//! * [`pipeline`] – Build descriptor and external tool invocation.
//! * [`loader`] – Loading artifacts and obtaining their capabilities.
//! * [`schema`] – Cell descriptors and the capability traits.
//! * [`version`] – Per-transaction version records.
//! * [`config`] – Layered settings.
//!
//! ## Quick Start
//! ```no_run
//! use cellcomp::config::Settings;
//! use cellcomp::controller::Controller;
//! use cellcomp::loader::DynamicLibraryLoader;
//! use cellcomp::pipeline::CommandToolchain;
//!
//! let settings = Settings::default();
//! let controller = Controller::new(
//!     &settings,
//!     CommandToolchain::from_settings(&settings),
//!     DynamicLibraryLoader,
//! );
//! controller.init(&settings.include_directory).unwrap();
//! controller.load_from("schemas/social", "build/social", "social", None).unwrap();
//! let catalog = controller.catalog();
//! assert_eq!(catalog.by_type_id(0).unwrap(), 0);
//! ```

pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod interval;
pub mod loader;
pub mod pipeline;
pub mod schema;
pub mod transaction;
pub mod version;

pub use error::{CompositionError, Result};
