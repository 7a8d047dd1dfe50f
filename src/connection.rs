use std::io::{self, Cursor};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::db::{Employee, RECORD_SIZE};
use crate::frame::{self, Frame, FRAME_HDR_LEN, MAX_MSG_SIZE};

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer sent bytes that can never become a valid message. The
    /// session should answer with one `Error` frame and close.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("connection reset by peer")]
    Reset,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A buffered TCP connection speaking the framed protocol. Reassembles
/// whole messages from partial reads; residual bytes stay queued for
/// the next message.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(MAX_MSG_SIZE),
        }
    }

    /// Reads until one whole frame is buffered. Returns `None` on a
    /// clean peer close between messages.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ConnectionError::Reset);
                }
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let mut buf = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut buf) {
            Ok(()) => {
                let len = buf.position() as usize;
                buf.set_position(0);

                let frame = Frame::parse(&mut buf).map_err(|err| match err {
                    frame::Error::Malformed(reason) => ConnectionError::Protocol(reason),
                    frame::Error::Incomplete => ConnectionError::Protocol("truncated frame"),
                })?;

                self.buffer.advance(len);

                Ok(Some(frame))
            }
            Err(frame::Error::Incomplete) => Ok(None),
            Err(frame::Error::Malformed(reason)) => Err(ConnectionError::Protocol(reason)),
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(FRAME_HDR_LEN + frame.body_len());
        frame.put(&mut buf);

        self.stream.write_all(&buf).await?;
        self.stream.flush().await
    }

    /// Appends one raw record to the outgoing stream. Used for the
    /// record tail of a list response, which is outside the framing;
    /// call `flush` once the tail is complete.
    pub async fn write_record(&mut self, record: &Employee) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(RECORD_SIZE);
        record.put(&mut buf);

        self.stream.write_all(&buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    /// Reads one raw record from the stream, the peer-side counterpart
    /// of `write_record`.
    pub async fn read_record(&mut self) -> Result<Employee, ConnectionError> {
        loop {
            if self.buffer.len() >= RECORD_SIZE {
                return Ok(Employee::get(&mut self.buffer));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return Err(ConnectionError::Reset);
            }
        }
    }
}
