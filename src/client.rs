use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::connection::Connection;
use crate::db::Employee;
use crate::frame::{Frame, ADD_DATA_LEN};
use crate::{PROTO_VER, STATUS_SUCCESS};

pub struct Client {
    connection: Connection,
}

impl Client {
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> Result<Client, crate::Error> {
        let socket = TcpStream::connect(addr).await?;
        let connection = Connection::new(socket);

        Ok(Client { connection })
    }

    /// Performs the version handshake. Every other request is rejected
    /// by the server until this succeeds.
    pub async fn hello(&mut self) -> Result<(), crate::Error> {
        self.connection.write_frame(&Frame::hello_req()).await?;

        match self.read_response().await? {
            Frame::HelloResp { proto } if proto == PROTO_VER => Ok(()),
            Frame::HelloResp { proto } => Err(format!(
                "protocol mismatch: server v{}, client v{}",
                proto, PROTO_VER
            )
            .into()),
            Frame::Error => Err("server rejected the handshake".into()),
            other => Err(format!("unexpected message kind {}", other.kind()).into()),
        }
    }

    /// Appends one record described by a "Name-Address-Hours" string.
    pub async fn add(&mut self, addstr: &str) -> Result<(), crate::Error> {
        // Room for the trailing NUL must remain.
        if addstr.len() >= ADD_DATA_LEN {
            return Err("add string too long".into());
        }

        let mut data = vec![0u8; ADD_DATA_LEN];
        data[..addstr.len()].copy_from_slice(addstr.as_bytes());

        self.connection
            .write_frame(&Frame::AddReq {
                data: Bytes::from(data),
            })
            .await?;

        match self.read_response().await? {
            Frame::AddResp { status } if status == STATUS_SUCCESS => Ok(()),
            Frame::AddResp { .. } => Err("server rejected the add request".into()),
            Frame::Error => Err("server closed the session".into()),
            other => Err(format!("unexpected message kind {}", other.kind()).into()),
        }
    }

    /// Fetches every record. The count frame is followed by a raw
    /// record stream that is read outside the framing.
    pub async fn list(&mut self) -> Result<Vec<Employee>, crate::Error> {
        self.connection.write_frame(&Frame::ListReq).await?;

        let count = match self.read_response().await? {
            Frame::ListResp { count } => count,
            Frame::Error => return Err("server closed the session".into()),
            other => {
                return Err(format!("unexpected message kind {}", other.kind()).into());
            }
        };

        let mut records = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            records.push(self.connection.read_record().await?);
        }

        Ok(records)
    }

    /// Removes the most recently added record.
    pub async fn remove_last(&mut self) -> Result<(), crate::Error> {
        self.connection.write_frame(&Frame::DelReq).await?;

        match self.read_response().await? {
            Frame::DelResp { status } if status == STATUS_SUCCESS => Ok(()),
            Frame::DelResp { .. } => Err("server rejected the remove request".into()),
            Frame::Error => Err("server closed the session".into()),
            other => Err(format!("unexpected message kind {}", other.kind()).into()),
        }
    }

    async fn read_response(&mut self) -> Result<Frame, crate::Error> {
        match self.connection.read_frame().await? {
            Some(frame) => Ok(frame),
            None => Err("connection closed by server".into()),
        }
    }
}
