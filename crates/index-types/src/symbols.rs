use std::path::PathBuf;
use std::time::SystemTime;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Roles an occurrence or a relation can carry, mirroring the roles the
    /// index store records per occurrence.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SymbolRole: u32 {
        const DEFINITION     = 1 << 0;
        const DECLARATION    = 1 << 1;
        const REFERENCE      = 1 << 2;
        const CALL           = 1 << 3;
        const CANONICAL      = 1 << 4;
        /// Relation role: the related symbol is the entity this accessor
        /// belongs to.
        const ACCESSOR_OF    = 1 << 5;
        /// Relation role: the related symbol lexically contains this one.
        const CHILD_OF       = 1 << 6;
        /// Relation role: the related symbol is an extension of this one.
        const EXTENDED_BY    = 1 << 7;
        /// The occurrence names a unit-test candidate.
        const TEST_CANDIDATE = 1 << 8;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SymbolKind {
    Module,
    Namespace,
    Enum,
    Struct,
    Class,
    Protocol,
    Extension,
    Union,
    TypeAlias,
    Function,
    Method,
    Property,
    Variable,
    Unknown,
}

impl SymbolKind {
    /// Kinds that may lexically contain other symbols; container-name walks
    /// only follow these.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            SymbolKind::Module
                | SymbolKind::Namespace
                | SymbolKind::Enum
                | SymbolKind::Struct
                | SymbolKind::Class
                | SymbolKind::Protocol
                | SymbolKind::Extension
                | SymbolKind::Union
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Symbol {
    /// Opaque globally unique identifier for the symbol.
    pub usr: String,
    pub name: String,
    pub kind: SymbolKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolLocation {
    pub path: PathBuf,
    /// Timestamp of the unit this occurrence was read from. The checked
    /// index compares it against the source file's modification time.
    pub timestamp: SystemTime,
    pub line: u32,
    pub utf8_column: u32,
    pub is_system: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolRelation {
    pub symbol: Symbol,
    pub roles: SymbolRole,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolOccurrence {
    pub symbol: Symbol,
    pub location: SymbolLocation,
    pub roles: SymbolRole,
    pub relations: Vec<SymbolRelation>,
}

impl SymbolOccurrence {
    /// A total order used to pick a deterministic primary occurrence.
    pub fn canonical_cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.location.path, self.location.line, self.location.utf8_column, &self.symbol.usr)
            .cmp(&(
                &other.location.path,
                other.location.line,
                other.location.utf8_column,
                &other.symbol.usr,
            ))
    }
}
