use index_types::{DocumentUri, Language, TargetId};
use thiserror::Error;

/// Errors of the indexing pipeline.
///
/// Task executions swallow these after logging them: a failed file simply
/// stays out-of-date in the trackers and is retried on the next trigger.
/// The variants up to `NoFilePath` are configuration errors that will not
/// resolve on their own; they are logged at error level and the file is not
/// re-queued until its inputs change.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no toolchain that can index `{uri}` in target `{target}`")]
    NoToolchain { uri: DocumentUri, target: TargetId },
    #[error("toolchain `{toolchain}` does not contain a compiler for {language}")]
    NoCompiler { toolchain: String, language: Language },
    #[error("the build server did not declare an index store path; background indexing is disabled")]
    NoIndexStorePath,
    #[error("no build settings to index `{0}`")]
    NoBuildSettings(DocumentUri),
    #[error("only fallback build settings available for `{0}`; not updating the index store")]
    FallbackBuildSettings(DocumentUri),
    #[error("cannot index `{0}`: the language cannot be indexed")]
    LanguageNotSupported(DocumentUri),
    #[error("`{0}` does not have a local file path")]
    NoFilePath(DocumentUri),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying without an input change could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::NoToolchain { .. }
            | Error::NoCompiler { .. }
            | Error::NoIndexStorePath
            | Error::NoBuildSettings(_)
            | Error::FallbackBuildSettings(_)
            | Error::LanguageNotSupported(_)
            | Error::NoFilePath(_) => false,
            Error::Io(_) | Error::Json(_) => true,
        }
    }
}
