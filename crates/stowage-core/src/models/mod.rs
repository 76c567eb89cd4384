pub mod file;

pub use file::{FileRecord, FileStatus};
