use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a build target, a logical grouping of source files that share
/// build settings. Equality is by normalized string, the build server owns
/// the format.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(raw: impl Into<String>) -> Self {
        TargetId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(raw: &str) -> Self {
        TargetId(raw.to_string())
    }
}
