//! Archive Storage
//!
//! - **index**: journal-backed archive index
//! - **store**: blob + index persistence, search, integrity and purge

pub mod index;
pub mod store;

pub use index::{AppendFault, ArchiveIndex, ReplayReport, JOURNAL_FILE};
pub use store::{
    cursor_after, ArchiveFilter, ArchiveStats, ArchiveStore, PurgeAuthorization, SearchPage,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
