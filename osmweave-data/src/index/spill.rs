//! Append-only backing file that can move from memory to disk.

use std::{
    fs::File,
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};

/// Byte store used by the paged coordinate index.
///
/// Writes always append; reads address absolute offsets. The memory tier is
/// a growable buffer, the disk tier an anonymous temporary file removed by
/// the OS once dropped.
#[derive(Debug)]
pub enum SpillFile {
    /// In-memory surrogate.
    Memory(Cursor<Vec<u8>>),
    /// Anonymous temporary file.
    Disk {
        /// Open handle.
        file: File,
        /// Bytes written so far.
        len: u64,
    },
}

impl Default for SpillFile {
    fn default() -> Self {
        Self::Memory(Cursor::new(Vec::new()))
    }
}

impl SpillFile {
    /// Number of bytes stored.
    #[must_use]
    pub const fn len(&self) -> u64 {
        match self {
            Self::Memory(cursor) => cursor.get_ref().len() as u64,
            Self::Disk { len, .. } => *len,
        }
    }

    /// Whether nothing has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the store lives on disk.
    #[must_use]
    pub const fn is_on_disk(&self) -> bool {
        matches!(self, Self::Disk { .. })
    }

    /// Append `bytes`, returning the offset they were written at.
    ///
    /// # Errors
    /// Returns the I/O error of the temporary file on the disk tier.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        match self {
            Self::Memory(cursor) => {
                let offset = cursor.get_ref().len() as u64;
                cursor.get_mut().extend_from_slice(bytes);
                Ok(offset)
            }
            Self::Disk { file, len } => {
                let offset = *len;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(bytes)?;
                *len += bytes.len() as u64;
                Ok(offset)
            }
        }
    }

    /// Fill `buf` from `offset`.
    ///
    /// # Errors
    /// Fails when fewer than `buf.len()` bytes exist past `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Self::Memory(cursor) => {
                cursor.seek(SeekFrom::Start(offset))?;
                cursor.read_exact(buf)
            }
            Self::Disk { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)
            }
        }
    }

    /// Copy the in-memory content to a temporary file and switch to it.
    ///
    /// # Errors
    /// Returns the I/O error raised while creating or filling the file.
    pub fn migrate_to_disk(&mut self, scratch_dir: Option<&Path>) -> io::Result<()> {
        let Self::Memory(cursor) = self else {
            return Ok(());
        };
        let mut file = match scratch_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let bytes = cursor.get_ref();
        file.write_all(bytes)?;
        let len = bytes.len() as u64;
        *self = Self::Disk { file, len };
        Ok(())
    }

    /// Discard all content, returning to the memory tier.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn reads_survive_migration() {
        let mut spill = SpillFile::default();
        assert_eq!(spill.append(b"abcd").expect("append"), 0);
        assert_eq!(spill.append(b"efgh").expect("append"), 4);
        spill.migrate_to_disk(None).expect("migrate");
        assert!(spill.is_on_disk());
        assert_eq!(spill.append(b"ij").expect("append"), 8);

        let mut buf = [0_u8; 4];
        spill.read_at(3, &mut buf).expect("read");
        assert_eq!(&buf, b"defg");
        let mut tail = [0_u8; 2];
        spill.read_at(8, &mut tail).expect("read");
        assert_eq!(&tail, b"ij");
        assert_eq!(spill.len(), 10);
    }

    #[rstest]
    fn reading_past_end_fails() {
        let mut spill = SpillFile::default();
        spill.append(b"ab").expect("append");
        let mut buf = [0_u8; 4];
        assert!(spill.read_at(0, &mut buf).is_err());
    }

    #[rstest]
    fn clear_returns_to_memory() {
        let mut spill = SpillFile::default();
        spill.append(b"ab").expect("append");
        spill.migrate_to_disk(None).expect("migrate");
        spill.clear();
        assert!(!spill.is_on_disk());
        assert!(spill.is_empty());
    }
}
