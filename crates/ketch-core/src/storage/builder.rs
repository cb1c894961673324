//! Builder that creates and preallocates `.part` files.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::writer::FileWriter;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Creates a fresh `.part` file, preallocates it, and hands out a
/// [`FileWriter`] that supports concurrent positioned writes.
pub struct FileWriterBuilder {
    file: File,
    part_path: PathBuf,
}

impl FileWriterBuilder {
    /// Create (or truncate) the `.part` file at `part_path`.
    pub fn create(part_path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(part_path)?;
        Ok(FileWriterBuilder {
            file,
            part_path: part_path.to_path_buf(),
        })
    }

    /// Preallocate `size` bytes. On Unix this tries `posix_fallocate` for
    /// real block allocation and falls back to `set_len`; elsewhere it uses
    /// `set_len` directly.
    pub fn preallocate(&mut self, size: u64) -> io::Result<()> {
        if size == 0 {
            return self.file.set_len(0);
        }
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            if r == libc::ENOSPC {
                return Err(io::Error::from_raw_os_error(r));
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size)
    }

    pub fn build(self) -> FileWriter {
        FileWriter::from_file_and_path(self.file, self.part_path)
    }
}
