use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::db::{Employee, RECORD_SIZE};
use crate::PROTO_VER;

/// "LLAD" in ASCII, stored big-endian like every other header field.
pub const HEADER_MAGIC: u32 = 0x4C4C_4144;

/// Octets of the file header: magic + version + count + filesize.
pub const HEADER_SIZE: usize = 12;

/// The fixed preamble of a database file. `filesize` is the total
/// length of a cleanly written file, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHeader {
    pub magic: u32,
    pub version: u16,
    pub count: u16,
    pub filesize: u32,
}

impl DbHeader {
    pub fn new(count: u16) -> DbHeader {
        DbHeader {
            magic: HEADER_MAGIC,
            version: PROTO_VER,
            count,
            filesize: (HEADER_SIZE + usize::from(count) * RECORD_SIZE) as u32,
        }
    }

    pub fn put(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.magic);
        dst.put_u16(self.version);
        dst.put_u16(self.count);
        dst.put_u32(self.filesize);
    }

    pub fn get(src: &mut impl Buf) -> DbHeader {
        DbHeader {
            magic: src.get_u32(),
            version: src.get_u16(),
            count: src.get_u16(),
            filesize: src.get_u32(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("database file already exists")]
    AlreadyExists,
    #[error("file too short to hold a database header")]
    TruncatedHeader,
    #[error("bad header magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported database version {0}")]
    BadVersion(u16),
    #[error("header declares {declared} bytes but the file holds {actual}")]
    SizeMismatch { declared: u32, actual: u64 },
    #[error("file ends before the declared record count")]
    ShortRead,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An open database file. Consulted only at startup (`open`/`load_all`)
/// and shutdown (`save_all`); the live table never touches it.
pub struct DbFile {
    file: File,
}

impl DbFile {
    /// Creates `path` exclusively and writes an empty-table header.
    pub fn create(path: impl AsRef<Path>) -> Result<DbFile, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => FileError::AlreadyExists,
                _ => FileError::Io(err),
            })?;

        let mut db_file = DbFile { file };
        db_file.save_all(&[])?;

        Ok(db_file)
    }

    /// Opens an existing file and validates its header against the
    /// compiled-in constants and the actual file length.
    pub fn open(path: impl AsRef<Path>) -> Result<(DbFile, DbHeader), FileError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let actual = file.metadata()?.len();

        let mut db_file = DbFile { file };
        let header = db_file.read_header()?;

        if header.magic != HEADER_MAGIC {
            return Err(FileError::BadMagic(header.magic));
        }
        if header.version != PROTO_VER {
            return Err(FileError::BadVersion(header.version));
        }
        if u64::from(header.filesize) != actual {
            return Err(FileError::SizeMismatch {
                declared: header.filesize,
                actual,
            });
        }

        Ok((db_file, header))
    }

    fn read_header(&mut self) -> Result<DbHeader, FileError> {
        self.file.seek(SeekFrom::Start(0))?;

        let mut buf = [0u8; HEADER_SIZE];
        self.file.read_exact(&mut buf).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => FileError::TruncatedHeader,
            _ => FileError::Io(err),
        })?;

        Ok(DbHeader::get(&mut &buf[..]))
    }

    /// Reads `count` contiguous records from just past the header.
    pub fn load_all(&mut self, count: u16) -> Result<Vec<Employee>, FileError> {
        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        let mut buf = vec![0u8; usize::from(count) * RECORD_SIZE];
        self.file.read_exact(&mut buf).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => FileError::ShortRead,
            _ => FileError::Io(err),
        })?;

        let mut src = &buf[..];
        Ok((0..count).map(|_| Employee::get(&mut src)).collect())
    }

    /// Rewrites header and records from the start of the file, then
    /// truncates to the exact expected length.
    pub fn save_all(&mut self, records: &[Employee]) -> Result<(), FileError> {
        let header = DbHeader::new(records.len() as u16);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + records.len() * RECORD_SIZE);
        header.put(&mut buf);
        for record in records {
            record.put(&mut buf);
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.set_len(buf.len() as u64)?;
        self.file.sync_all()?;

        Ok(())
    }
}
