//! Binder: turns a linked output into an installable package.
//!
//! Resolves bind-time variables, locates payload files through a
//! [`FileManager`], numbers files onto media, builds cabinets on a worker
//! pool and serializes everything into a `WXPK` package.

mod binder;
mod cabinet;
mod error;
mod fields;
mod file_manager;
mod package;
mod payloads;
mod sequence;
mod validate;

pub use binder::{BindOptions, BindSummary, Binder, BinderExtension};
pub use cabinet::{
    build_cabinets, read_stored_cabinet, CabinetCodec, CabinetFile, CabinetJob, CabinetPlan, CabinetWriter,
    StoredCabinetCodec, CABINET_MAGIC,
};
pub use error::BindError;
pub use file_manager::{
    manifest_path, BindPath, BindStage, BuildOption, CabinetManifest, DefaultFileManager, FileManager,
    ResolvedCabinet,
};
pub use package::{read_package, table_idt, write_package, Stream, PACKAGE_MAGIC, PACKAGE_VERSION};
pub use payloads::changed_payloads;
