use std::fmt;

use serde::{Deserialize, Serialize};

use crate::uri::DocumentUri;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Language {
    C,
    Cpp,
    ObjectiveC,
    ObjectiveCpp,
    Swift,
    /// A language the indexing pipeline has no semantic support for, kept
    /// around so diagnostics can still name it.
    Other(String),
}

/// Which semantic toolchain family understands a language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemanticKind {
    Swift,
    Clang,
}

impl Language {
    /// The toolchain family that can index this language, or `None` if it
    /// cannot be indexed at all.
    pub fn semantic_kind(&self) -> Option<SemanticKind> {
        match self {
            Language::Swift => Some(SemanticKind::Swift),
            Language::C | Language::Cpp | Language::ObjectiveC | Language::ObjectiveCpp => {
                Some(SemanticKind::Clang)
            }
            Language::Other(_) => None,
        }
    }

    /// Guess the language from a file extension alone.
    ///
    /// Headers deliberately map to `None`: whether a `.h` file is C,
    /// Objective-C or C++ depends on the including main file, which only the
    /// build server can resolve.
    pub fn from_extension(extension: &str) -> Option<Language> {
        match extension {
            "swift" => Some(Language::Swift),
            "c" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "C" => Some(Language::Cpp),
            "m" => Some(Language::ObjectiveC),
            "mm" => Some(Language::ObjectiveCpp),
            _ => None,
        }
    }

    pub fn from_uri(uri: &DocumentUri) -> Option<Language> {
        let path = uri.file_path()?;
        let extension = path.extension()?.to_str()?;
        Self::from_extension(extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::C => write!(f, "c"),
            Language::Cpp => write!(f, "c++"),
            Language::ObjectiveC => write!(f, "objective-c"),
            Language::ObjectiveCpp => write!(f, "objective-c++"),
            Language::Swift => write!(f, "swift"),
            Language::Other(tag) => write!(f, "{tag}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_extension_is_ambiguous() {
        assert_eq!(Language::from_extension("h"), None);
        assert_eq!(Language::from_extension("hpp"), None);
    }

    #[test]
    fn semantic_kinds() {
        assert_eq!(Language::Swift.semantic_kind(), Some(SemanticKind::Swift));
        assert_eq!(Language::ObjectiveCpp.semantic_kind(), Some(SemanticKind::Clang));
        assert_eq!(Language::Other("markdown".into()).semantic_kind(), None);
    }
}
