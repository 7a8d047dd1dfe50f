use bytes::Bytes;
use log::warn;
use thiserror::Error;

use crate::connection::Connection;
use crate::db::Db;
use crate::frame::Frame;
use crate::{STATUS_ERROR, STATUS_SUCCESS};

/// A request accepted in the ready state. Hello is not a command: the
/// session state machine consumes it before dispatch begins.
#[derive(Debug)]
pub enum Command {
    Add(Add),
    List(List),
    RemoveLast(RemoveLast),
}

#[derive(Debug)]
pub struct Add {
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct List;

#[derive(Debug, Default)]
pub struct RemoveLast;

#[derive(Debug, Error)]
#[error("unexpected message kind {0} in ready state")]
pub struct UnexpectedFrame(pub u32);

impl Command {
    pub fn from_frame(frame: Frame) -> Result<Command, UnexpectedFrame> {
        match frame {
            Frame::AddReq { data } => Ok(Command::Add(Add { data })),
            Frame::ListReq => Ok(Command::List(List)),
            Frame::DelReq => Ok(Command::RemoveLast(RemoveLast)),
            other => Err(UnexpectedFrame(other.kind())),
        }
    }

    pub(crate) async fn apply(self, conn: &mut Connection, db: &Db) -> Result<(), crate::Error> {
        use Command::*;

        match self {
            Add(cmd) => cmd.apply(conn, db).await,
            List(cmd) => cmd.apply(conn, db).await,
            RemoveLast(cmd) => cmd.apply(conn, db).await,
        }
    }
}

impl Add {
    pub async fn apply(self, conn: &mut Connection, db: &Db) -> Result<(), crate::Error> {
        let status = match db.add(&self.data) {
            Ok(()) => STATUS_SUCCESS,
            Err(err) => {
                warn!("add request rejected: {}", err);
                STATUS_ERROR
            }
        };

        conn.write_frame(&Frame::AddResp { status }).await?;

        Ok(())
    }
}

impl List {
    /// Sends the count frame, then the raw record stream the framing
    /// deliberately does not cover.
    pub async fn apply(self, conn: &mut Connection, db: &Db) -> Result<(), crate::Error> {
        let records = db.records();

        conn.write_frame(&Frame::ListResp {
            count: records.len() as u16,
        })
        .await?;

        for record in &records {
            conn.write_record(record).await?;
        }
        conn.flush().await?;

        Ok(())
    }
}

impl RemoveLast {
    pub async fn apply(self, conn: &mut Connection, db: &Db) -> Result<(), crate::Error> {
        let status = match db.remove_last() {
            Ok(()) => STATUS_SUCCESS,
            Err(err) => {
                warn!("remove request rejected: {}", err);
                STATUS_ERROR
            }
        };

        conn.write_frame(&Frame::DelResp { status }).await?;

        Ok(())
    }
}
