use std::fmt;
use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes};

use crate::PROTO_VER;

/// Octets of the wire header: 4-octet kind + 2-octet body length,
/// both big-endian.
pub const FRAME_HDR_LEN: usize = 6;

/// Upper bound on a whole message, header included. Anything larger
/// can never be reassembled and is a protocol violation.
pub const MAX_MSG_SIZE: usize = 4096;

/// Fixed size of the add-request body: a NUL-padded
/// "Name-Address-Hours" string.
pub const ADD_DATA_LEN: usize = 1024;

pub mod kind {
    pub const HELLO_REQ: u32 = 0;
    pub const HELLO_RESP: u32 = 1;
    pub const LIST_REQ: u32 = 2;
    pub const LIST_RESP: u32 = 3;
    pub const ADD_REQ: u32 = 4;
    pub const ADD_RESP: u32 = 5;
    pub const DEL_REQ: u32 = 6;
    pub const DEL_RESP: u32 = 7;
    pub const ERROR: u32 = 8;
    pub const MAX: u32 = 9;
}

/// One wire message. The `ListResp` count only announces the record
/// stream that follows the frame; those `count * RECORD_SIZE` octets
/// are not part of the framed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    HelloReq { proto: u16 },
    HelloResp { proto: u16 },
    ListReq,
    ListResp { count: u16 },
    AddReq { data: Bytes },
    AddResp { status: i32 },
    DelReq,
    DelResp { status: i32 },
    Error,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Not enough buffered octets to form a whole message yet.
    Incomplete,
    /// The stream can never yield a valid message from this point on.
    Malformed(&'static str),
}

impl Frame {
    pub fn hello_req() -> Frame {
        Frame::HelloReq { proto: PROTO_VER }
    }

    pub fn kind(&self) -> u32 {
        match self {
            Frame::HelloReq { .. } => kind::HELLO_REQ,
            Frame::HelloResp { .. } => kind::HELLO_RESP,
            Frame::ListReq => kind::LIST_REQ,
            Frame::ListResp { .. } => kind::LIST_RESP,
            Frame::AddReq { .. } => kind::ADD_REQ,
            Frame::AddResp { .. } => kind::ADD_RESP,
            Frame::DelReq => kind::DEL_REQ,
            Frame::DelResp { .. } => kind::DEL_RESP,
            Frame::Error => kind::ERROR,
        }
    }

    pub fn body_len(&self) -> usize {
        match self {
            Frame::HelloReq { .. } | Frame::HelloResp { .. } => 2,
            Frame::ListReq | Frame::DelReq | Frame::Error => 0,
            Frame::ListResp { .. } => 2,
            Frame::AddReq { .. } => ADD_DATA_LEN,
            Frame::AddResp { .. } | Frame::DelResp { .. } => 4,
        }
    }

    /// Checks whether `src` starts with one complete, plausible message,
    /// advancing the cursor past it. Validation of the body against the
    /// kind is left to `parse`.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        if src.remaining() < FRAME_HDR_LEN {
            return Err(Error::Incomplete);
        }

        let msg_kind = src.get_u32();
        let len = src.get_u16() as usize;

        if msg_kind >= kind::MAX {
            return Err(Error::Malformed("unknown message kind"));
        }
        if FRAME_HDR_LEN + len > MAX_MSG_SIZE {
            return Err(Error::Malformed("declared length exceeds buffer capacity"));
        }
        if src.remaining() < len {
            return Err(Error::Incomplete);
        }

        src.advance(len);
        Ok(())
    }

    /// Decodes one message previously accepted by `check`. The body
    /// length must equal the fixed size of the kind.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        let msg_kind = src.get_u32();
        let len = src.get_u16() as usize;

        match msg_kind {
            kind::HELLO_REQ => {
                expect_len(len, 2)?;
                Ok(Frame::HelloReq {
                    proto: src.get_u16(),
                })
            }
            kind::HELLO_RESP => {
                expect_len(len, 2)?;
                Ok(Frame::HelloResp {
                    proto: src.get_u16(),
                })
            }
            kind::LIST_REQ => {
                expect_len(len, 0)?;
                Ok(Frame::ListReq)
            }
            kind::LIST_RESP => {
                expect_len(len, 2)?;
                Ok(Frame::ListResp {
                    count: src.get_u16(),
                })
            }
            kind::ADD_REQ => {
                expect_len(len, ADD_DATA_LEN)?;
                Ok(Frame::AddReq {
                    data: src.copy_to_bytes(ADD_DATA_LEN),
                })
            }
            kind::ADD_RESP => {
                expect_len(len, 4)?;
                Ok(Frame::AddResp {
                    status: src.get_i32(),
                })
            }
            kind::DEL_REQ => {
                expect_len(len, 0)?;
                Ok(Frame::DelReq)
            }
            kind::DEL_RESP => {
                expect_len(len, 4)?;
                Ok(Frame::DelResp {
                    status: src.get_i32(),
                })
            }
            kind::ERROR => {
                expect_len(len, 0)?;
                Ok(Frame::Error)
            }
            _ => Err(Error::Malformed("unknown message kind")),
        }
    }

    /// Encodes header and body with big-endian scalars.
    pub fn put(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.kind());
        dst.put_u16(self.body_len() as u16);

        match self {
            Frame::HelloReq { proto } | Frame::HelloResp { proto } => dst.put_u16(*proto),
            Frame::ListResp { count } => dst.put_u16(*count),
            Frame::AddReq { data } => {
                debug_assert_eq!(data.len(), ADD_DATA_LEN);
                dst.put_slice(data);
            }
            Frame::AddResp { status } | Frame::DelResp { status } => dst.put_i32(*status),
            Frame::ListReq | Frame::DelReq | Frame::Error => {}
        }
    }
}

fn expect_len(len: usize, expected: usize) -> Result<(), Error> {
    if len != expected {
        return Err(Error::Malformed("body length mismatch for message kind"));
    }
    Ok(())
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Incomplete => "stream ended early".fmt(fmt),
            Error::Malformed(reason) => reason.fmt(fmt),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.put(&mut buf);
        buf
    }

    fn check_and_parse(bytes: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(bytes);
        Frame::check(&mut cursor)?;
        cursor.set_position(0);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn hello_req_wire_layout() {
        let buf = encode(&Frame::hello_req());
        assert_eq!(&buf[..], &[0, 0, 0, 0, 0, 2, 0, 1]);
    }

    #[test]
    fn negative_status_survives_the_wire() {
        let buf = encode(&Frame::DelResp { status: -1 });
        assert_eq!(
            check_and_parse(&buf).unwrap(),
            Frame::DelResp { status: -1 }
        );
    }

    #[test]
    fn add_req_carries_fixed_body() {
        let mut data = vec![0u8; ADD_DATA_LEN];
        data[..14].copy_from_slice(b"Bob-2 Oak Rd-8");
        let buf = encode(&Frame::AddReq {
            data: Bytes::from(data.clone()),
        });

        assert_eq!(buf.len(), FRAME_HDR_LEN + ADD_DATA_LEN);
        match check_and_parse(&buf).unwrap() {
            Frame::AddReq { data: parsed } => assert_eq!(&parsed[..], &data[..]),
            other => panic!("expected AddReq, got {:?}", other),
        }
    }

    #[test]
    fn check_is_incomplete_on_partial_header() {
        let mut cursor = Cursor::new(&[0u8, 0, 0][..]);
        assert_eq!(Frame::check(&mut cursor), Err(Error::Incomplete));
    }

    #[test]
    fn check_is_incomplete_on_partial_body() {
        let buf = encode(&Frame::hello_req());
        let mut cursor = Cursor::new(&buf[..buf.len() - 1]);
        assert_eq!(Frame::check(&mut cursor), Err(Error::Incomplete));
    }

    #[test]
    fn check_rejects_unknown_kind() {
        let mut buf = BytesMut::new();
        buf.put_u32(kind::MAX);
        buf.put_u16(0);
        let mut cursor = Cursor::new(&buf[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn check_rejects_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(kind::ADD_REQ);
        buf.put_u16((MAX_MSG_SIZE - FRAME_HDR_LEN + 1) as u16);
        let mut cursor = Cursor::new(&buf[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn parse_rejects_wrong_body_size_for_kind() {
        // A hello request whose body claims three octets passes check
        // but cannot be a hello.
        let mut buf = BytesMut::new();
        buf.put_u32(kind::HELLO_REQ);
        buf.put_u16(3);
        buf.put_slice(&[0, 1, 2]);
        assert!(matches!(check_and_parse(&buf), Err(Error::Malformed(_))));
    }
}
