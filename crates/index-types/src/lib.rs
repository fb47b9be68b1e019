/*!
Shared data model and collaborator contracts for the background-indexing
core. This crate is dependency-light on purpose: it is consumed both by the
scheduler side (task descriptions, the semantic index manager) and by the
query side (checked index consumers), which must agree on identifiers,
languages and the symbol model without pulling each other in.
*/

pub mod build_server;
pub mod build_settings;
pub mod document_manager;
pub mod file_to_index;
pub mod index_database;
pub mod index_log;
pub mod language;
pub mod symbols;
pub mod target;
pub mod toolchain;
pub mod uri;

pub use build_server::{BuildServer, SourceFileInfo};
pub use build_settings::BuildSettings;
pub use document_manager::DocumentManager;
pub use file_to_index::{FileIndexInfo, FileToIndex, OutputPath};
pub use index_database::IndexDatabase;
pub use index_log::{IndexLogCallback, IndexLogMessage, IndexLogSeverity, IndexLogStructure};
pub use language::Language;
pub use symbols::{
    Symbol, SymbolKind, SymbolLocation, SymbolOccurrence, SymbolRelation, SymbolRole,
};
pub use target::TargetId;
pub use toolchain::Toolchain;
pub use uri::DocumentUri;
