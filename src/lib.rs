pub mod client;
pub mod cmd;
pub mod connection;
pub mod db;
pub mod file_manager;
pub mod frame;
pub mod server;

pub use client::Client;
pub use db::{Db, DbHolder, Employee};
pub use frame::Frame;

pub type Error = Box<dyn std::error::Error>;

/// Protocol version exchanged at hello time. Doubles as the on-disk
/// format version in the database header.
pub const PROTO_VER: u16 = 1;

pub const DEFAULT_PORT: u16 = 3333;

/// Status code carried in add/del responses on success.
pub const STATUS_SUCCESS: i32 = 0;

/// Status code carried in add/del responses when the engine rejects
/// an otherwise well-formed request.
pub const STATUS_ERROR: i32 = -1;
