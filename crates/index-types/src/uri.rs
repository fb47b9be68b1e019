use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UriError {
    #[error("`{0}` is not a valid URI: missing scheme")]
    MissingScheme(String),
    #[error("`{0}` contains an invalid percent escape")]
    InvalidPercentEscape(String),
}

/// An opaque URI identifying a document.
///
/// Two `DocumentUri`s compare equal iff their normalized string forms are
/// equal: the scheme and authority are lowercased and unreserved percent
/// escapes in the path are decoded at construction time. URIs with a `file`
/// scheme additionally project to a local filesystem path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentUri(String);

impl DocumentUri {
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        let scheme_end =
            raw.find("://").ok_or_else(|| UriError::MissingScheme(raw.to_string()))?;
        let (scheme, rest) = raw.split_at(scheme_end);
        let rest = &rest["://".len()..];

        let (authority, path) = match rest.find('/') {
            Some(slash) => rest.split_at(slash),
            None => (rest, ""),
        };

        // Validate the escapes up front so that `file_path` cannot fail later.
        percent_decode(path).ok_or_else(|| UriError::InvalidPercentEscape(raw.to_string()))?;

        let mut normalized = String::with_capacity(raw.len());
        normalized.push_str(&scheme.to_ascii_lowercase());
        normalized.push_str("://");
        normalized.push_str(&authority.to_ascii_lowercase());
        normalized.push_str(path);
        Ok(DocumentUri(normalized))
    }

    pub fn from_file_path(path: impl AsRef<Path>) -> Self {
        let mut encoded = String::from("file://");
        for byte in path.as_ref().to_string_lossy().bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                    encoded.push(byte as char)
                }
                _ => encoded.push_str(&format!("%{byte:02X}")),
            }
        }
        DocumentUri(encoded)
    }

    /// The local filesystem path of this document, if it has a `file` scheme.
    pub fn file_path(&self) -> Option<PathBuf> {
        let rest = self.0.strip_prefix("file://")?;
        let path = match rest.find('/') {
            Some(slash) => &rest[slash..],
            None => return None,
        };
        // Escapes were validated at construction.
        Some(PathBuf::from(percent_decode(path)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentUri({})", self.0)
    }
}

fn percent_decode(input: &str) -> Option<String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();
    while let Some(byte) = bytes.next() {
        if byte == b'%' {
            let hi = bytes.next()?;
            let lo = bytes.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            out.push(byte);
        }
    }
    String::from_utf8(out).ok()
}
