//! Disk I/O and output-file lifecycle.
//!
//! Downloads write to a `.part` file opened for random access, preallocated
//! to the total size when known. Segment workers share one writer and issue
//! offset-addressed writes (pwrite), so concurrent writes never interleave
//! incorrectly. Completion renames the `.part` atomically to the final path.

mod builder;
mod writer;

pub use builder::FileWriterBuilder;
pub use writer::FileWriter;

/// Temporary file suffix used before the atomic rename.
pub const PART_SUFFIX: &str = ".part";

/// Path of the in-progress file for a given final path
/// (`file.iso` → `file.iso.part`).
pub fn part_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(PART_SUFFIX);
    std::path::PathBuf::from(os)
}
