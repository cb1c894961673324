//! Offset-addressed writer for in-progress download files.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writer for a `.part` file. Cheap to clone and safe to use from multiple
/// segment workers: every `write_at` is an independent positioned write.
#[derive(Debug, Clone)]
pub struct FileWriter {
    file: Arc<File>,
    part_path: PathBuf,
}

impl FileWriter {
    pub(crate) fn from_file_and_path(file: File, part_path: PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            part_path,
        }
    }

    /// Open an existing `.part` file for resume (read+write, no truncation).
    pub fn open_existing(part_path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(part_path)?;
        Ok(FileWriter {
            file: Arc::new(file),
            part_path: part_path.to_path_buf(),
        })
    }

    /// Write `data` at `offset` without moving any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(data, offset)
    }

    /// Windows positioned write; `seek_write` may write short, so loop.
    #[cfg(windows)]
    pub fn write_at(&self, mut offset: u64, mut data: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !data.is_empty() {
            let n = self.file.seek_write(data, offset)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write to part file",
                ));
            }
            offset += n as u64;
            data = &data[n..];
        }
        Ok(())
    }

    /// Flush file data and metadata to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Current on-disk length.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrink or grow the file; used when a validator mismatch forces a
    /// restart from offset zero.
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Atomically rename the `.part` file to `final_path`. Consumes the
    /// writer. Call `sync` first when durability matters; fails if
    /// `final_path` is on a different filesystem.
    pub fn finalize(self, final_path: &Path) -> io::Result<()> {
        let part_path = self.part_path.clone();
        drop(self.file);
        std::fs::rename(&part_path, final_path)
    }

    /// Close and remove the `.part` file.
    pub fn delete(self) -> io::Result<()> {
        let part_path = self.part_path.clone();
        drop(self.file);
        match std::fs::remove_file(&part_path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
