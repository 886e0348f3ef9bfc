pub mod checkpoint;
pub mod entry;
pub mod path;
pub mod snapshot;
pub mod store;
pub mod table;

pub use entry::{Attributes, DirEntry, Entry, EntryKind, Timestamp};
pub use store::Store;
pub use table::EntryTable;
