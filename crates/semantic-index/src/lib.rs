/*!
This crate defines the semantic index manager, which is responsible for:
1. Keeping the on-disk index store coherent with the source tree and the
   build graph by driving the compiler's indexing mode in the background.
2. Answering freshness questions so semantic queries never see symbol
   locations from stale units.

The manager consumes file-change events, asks the build server for the
source-file set and the target graph, computes the out-of-date files, and
schedules pairs of prepare-target and update-index-store tasks onto the
generic task scheduler. Tasks record their results in process-wide
up-to-date trackers so redundant work is skipped without touching disk.

Consumers query the index through [`CheckedIndex`], a request-scoped view
that filters raw occurrences against file modification times (and
optionally unsaved editor state).
*/

mod checked_index;
mod compiler_arguments;
pub mod error;
mod index_task;
mod manager;
mod modification_stamps;
mod prepare;
mod progress;
#[cfg(test)]
mod test_utils;
mod up_to_date_tracker;
mod update_index_store;
#[cfg(test)]
mod update_index_store_test;

pub use checked_index::{CheckedIndex, PatternMatchOptions};
pub use error::Error;
pub use index_task::IndexTaskDescription;
pub use manager::{SemanticIndexManager, SemanticIndexOptions};
pub use modification_stamps::{FileStamp, IndexCheckLevel, ModificationStampCache};
pub use prepare::TargetPreparationPurpose;
pub use progress::{ProgressStatus, ProgressStatusDidChangeCallback, WorkStatus};
pub use up_to_date_tracker::{NoSecondaryKey, UpToDateTracker};

pub type Result<T, E = Error> = std::result::Result<T, E>;
