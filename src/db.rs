use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::file_manager::{DbFile, FileError};

/// On-disk and on-wire octets of one record: two fixed-width string
/// fields plus the hours counter, no padding.
pub const RECORD_SIZE: usize = 516;

const FIELD_LEN: usize = 256;

/// One employee entry. `name` and `address` hold at most 255 payload
/// octets followed by a NUL; the final octet is always NUL.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Employee {
    name: [u8; FIELD_LEN],
    address: [u8; FIELD_LEN],
    hours: u32,
}

impl Employee {
    fn new(name: &[u8], address: &[u8], hours: u32) -> Employee {
        Employee {
            name: copy_field(name),
            address: copy_field(address),
            hours,
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(field_payload(&self.name))
    }

    pub fn address(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(field_payload(&self.address))
    }

    pub fn hours(&self) -> u32 {
        self.hours
    }

    /// Serialises the record with the hours field in big-endian order.
    /// The string fields are copied verbatim, padding included.
    pub fn put(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.name);
        dst.put_slice(&self.address);
        dst.put_u32(self.hours);
    }

    /// Decodes one record from a buffer holding at least `RECORD_SIZE`
    /// octets.
    pub fn get(src: &mut impl Buf) -> Employee {
        let mut name = [0u8; FIELD_LEN];
        src.copy_to_slice(&mut name);
        let mut address = [0u8; FIELD_LEN];
        src.copy_to_slice(&mut address);
        let hours = src.get_u32();

        Employee {
            name,
            address,
            hours,
        }
    }
}

impl fmt::Debug for Employee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Employee")
            .field("name", &self.name())
            .field("address", &self.address())
            .field("hours", &self.hours)
            .finish()
    }
}

/// Truncating copy into a fixed-width field. Input beyond 255 octets is
/// dropped so the trailing NUL always survives.
fn copy_field(src: &[u8]) -> [u8; FIELD_LEN] {
    let mut field = [0u8; FIELD_LEN];
    let len = src.len().min(FIELD_LEN - 1);
    field[..len].copy_from_slice(&src[..len]);
    field
}

fn field_payload(field: &[u8; FIELD_LEN]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("malformed add string, expected \"Name-Address-Hours\"")]
    MalformedAddString,
    #[error("record table is full")]
    Full,
    #[error("no records to remove")]
    Empty,
}

/// The in-memory record table. Mutated only through the handlers that
/// own it; persistence is the caller's business.
#[derive(Debug, Default)]
pub struct Store {
    employees: Vec<Employee>,
}

impl Store {
    pub fn new(employees: Vec<Employee>) -> Store {
        Store { employees }
    }

    /// Parses `addstr` as "Name-Address-Hours" and appends the record.
    /// The string may be NUL-padded; parsing stops at the first NUL.
    pub fn add(&mut self, addstr: &[u8]) -> Result<(), StoreError> {
        let employee = parse_add_string(addstr)?;

        if self.employees.len() >= usize::from(u16::MAX) {
            return Err(StoreError::Full);
        }
        self.employees.push(employee);

        Ok(())
    }

    pub fn remove_last(&mut self) -> Result<(), StoreError> {
        match self.employees.pop() {
            Some(_) => Ok(()),
            None => Err(StoreError::Empty),
        }
    }

    /// Records in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &Employee> {
        self.employees.iter()
    }

    pub fn count(&self) -> u16 {
        self.employees.len() as u16
    }
}

fn parse_add_string(addstr: &[u8]) -> Result<Employee, StoreError> {
    let end = addstr.iter().position(|&b| b == 0).unwrap_or(addstr.len());
    let mut fields = addstr[..end].split(|&b| b == b'-');

    let (name, address, hours) = match (fields.next(), fields.next(), fields.next(), fields.next())
    {
        (Some(name), Some(address), Some(hours), None)
            if !name.is_empty() && !address.is_empty() =>
        {
            (name, address, hours)
        }
        _ => return Err(StoreError::MalformedAddString),
    };

    // Rejects empty input, stray characters, and anything past u32::MAX.
    let hours = atoi::atoi::<u32>(hours).ok_or(StoreError::MalformedAddString)?;

    Ok(Employee::new(name, address, hours))
}

/// Cloneable handle to the store. The serve loop is single-threaded
/// cooperative, so shared ownership needs no lock; no borrow is ever
/// held across an await.
#[derive(Clone)]
pub struct Db {
    store: Rc<RefCell<Store>>,
}

impl Db {
    pub fn new(employees: Vec<Employee>) -> Db {
        Db {
            store: Rc::new(RefCell::new(Store::new(employees))),
        }
    }

    pub fn add(&self, addstr: &[u8]) -> Result<(), StoreError> {
        self.store.borrow_mut().add(addstr)
    }

    pub fn remove_last(&self) -> Result<(), StoreError> {
        self.store.borrow_mut().remove_last()
    }

    pub fn count(&self) -> u16 {
        self.store.borrow().count()
    }

    /// Snapshot of the table, used to stream a list response without
    /// holding a borrow on the live store.
    pub fn records(&self) -> Vec<Employee> {
        self.store.borrow().list().copied().collect()
    }
}

/// Owns the database file alongside the live store. Records are loaded
/// once at startup and written back once by `persist`; nothing touches
/// the file in between.
pub struct DbHolder {
    file: DbFile,
    db: Db,
}

impl DbHolder {
    /// Creates a fresh database file holding only an empty-table header.
    pub fn create(path: impl AsRef<Path>) -> Result<DbHolder, FileError> {
        let file = DbFile::create(path)?;

        Ok(DbHolder {
            file,
            db: Db::new(Vec::new()),
        })
    }

    /// Opens and validates an existing database file and loads every
    /// record into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<DbHolder, FileError> {
        let (mut file, header) = DbFile::open(path)?;
        let employees = file.load_all(header.count)?;

        Ok(DbHolder {
            file,
            db: Db::new(employees),
        })
    }

    pub fn db(&self) -> Db {
        self.db.clone()
    }

    /// Rewrites the file from the current table state and truncates it
    /// to the exact expected length.
    pub fn persist(&mut self) -> Result<(), FileError> {
        self.file.save_all(&self.db.records())
    }
}
