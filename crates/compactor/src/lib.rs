//! # Compactor - segment merge engine
//!
//! Merges one or more read-only index segments into a single new segment.
//! Every table kind is merged by a rule that fits its keys: postings are
//! spliced chunk by chunk with their docids shifted, per-document tables
//! are re-keyed, spelling and synonym word lists are unioned. The output
//! becomes visible only once its version record is committed.
//!
//! ## Flow
//!
//! ```text
//! sources + offsets
//!   |
//!   v
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         compact()                             │
//! │                                                               │
//! │ lock destination → new version record (stats merged)          │
//! │   |                                                           │
//! │   |  for each table kind                                      │
//! │   v                                                           │
//! │ postlist  → cursors → heap merge (multipass if > 3 inputs)    │
//! │ docdata   ┐                                                   │
//! │ termlist  ├→ re-key by shifted docid                          │
//! │ position  ┘                                                   │
//! │ spelling  ┐                                                   │
//! │ synonym   ┴→ word-list union                                  │
//! │   |                                                           │
//! │   v                                                           │
//! │ commit version record (tmp + rename, or embedded)             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                                  |
//! |---------------|----------------------------------------------------------|
//! | [`compact`]   | Orchestration, size reporting, destination handling      |
//! | [`cursor`]    | Input postlist cursors for both on-disk layouts          |
//! | [`merge`]     | Postlist, value-stats, position and docid-keyed merges   |
//! | [`multipass`] | Bounded fan-in merging through temporary tables          |
//! | [`wordlist`]  | Spelling and synonym merges                              |
//! | [`segment`]   | Opening source segments, table kinds                     |
//! | [`version`]   | Version record format and atomic commit                  |
//! | [`lock`]      | Exclusive destination lock                               |
//! | [`hooks`]     | Progress and duplicate-metadata callbacks                |
//!
//! ## Crash Safety
//!
//! Tables are written under revision-numbered names the current version
//! record does not reference, so an interrupted compaction leaves the
//! destination's previous state readable. The new record replaces the old
//! one with a single rename.

pub mod compact;
pub mod cursor;
mod error;
pub mod hooks;
pub mod lock;
pub mod merge;
pub mod multipass;
pub mod segment;
pub mod version;
pub mod wordlist;

pub use compact::{
    compact, compact_with_io, size_change_status, CompactReport, Destination, SizeTotals,
    TableReport,
};
pub use cursor::{open_postlist_cursor, ChunkInfo, PostlistCursor};
pub use error::{CompactError, Result};
pub use hooks::{CompactHooks, DefaultHooks};
pub use lock::DestinationLock;
pub use merge::{merge_docid_keyed, merge_positions, merge_postlists, merge_value_stats};
pub use multipass::{group_sizes, multimerge_postlists, PostlistInput, TempRegistry};
pub use segment::{table_file_name, Format, Segment, TableKind};
pub use version::{
    install_version, SegmentStats, StdVersionIo, VersionIo, VersionRecord, VERSION_FILE,
};
pub use wordlist::{merge_spellings, merge_synonyms};

pub use config::{CompactFlags, CompactOptions, CompactionLevel, SyncMode};

#[cfg(test)]
mod tests;
