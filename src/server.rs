use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::cmd::Command;
use crate::connection::{Connection, ConnectionError};
use crate::db::Db;
use crate::frame::Frame;
use crate::PROTO_VER;

/// Bound on concurrently connected peers. A connection accepted while
/// the table is full is closed immediately with no response.
pub const MAX_CLIENTS: usize = 256;

/// Session state of one peer. Requests are only dispatched in `Ready`;
/// everything before the version handshake is `AwaitingHello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHello,
    Ready,
    Closed,
}

struct Listener {
    listener: TcpListener,
    db: Db,
    active: Rc<Cell<usize>>,
    max_clients: usize,
    shutdown: CancellationToken,
}

struct Handler {
    connection: Connection,
    db: Db,
    state: State,
    shutdown: CancellationToken,
}

/// Serves the database until `shutdown` completes. Must run inside a
/// `LocalSet` on a current-thread runtime: every session is a local
/// task on the one serving thread, so engine operations are strictly
/// serialised without locks.
pub async fn run(listener: TcpListener, db: Db, max_clients: usize, shutdown: impl Future) {
    let token = CancellationToken::new();

    let mut server = Listener {
        listener,
        db,
        active: Rc::new(Cell::new(0)),
        max_clients,
        shutdown: token.clone(),
    };

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!("failed to accept: {}", err);
            }
        }
        _ = shutdown => {
            info!("shutdown signal received");
            token.cancel();
        }
    }
}

impl Listener {
    async fn run(&mut self) -> Result<(), crate::Error> {
        loop {
            let socket = self.accept().await?;
            debug!("new connection from {:?}", socket.peer_addr());

            if self.active.get() >= self.max_clients {
                warn!("connection table full, dropping new peer");
                // The socket closes on drop without a single frame sent.
                continue;
            }
            self.active.set(self.active.get() + 1);

            let mut handler = Handler {
                connection: Connection::new(socket),
                db: self.db.clone(),
                state: State::AwaitingHello,
                shutdown: self.shutdown.clone(),
            };

            let active = Rc::clone(&self.active);
            task::spawn_local(async move {
                if let Err(err) = handler.run().await {
                    debug!("connection closed: {}", err);
                }
                active.set(active.get() - 1);
            });
        }
    }

    async fn accept(&mut self) -> Result<TcpStream, crate::Error> {
        match self.listener.accept().await {
            Ok((tcp_stream, _)) => Ok(tcp_stream),
            Err(err) => Err(err.into()),
        }
    }
}

impl Handler {
    /// Drives one session: frames are pulled off the connection in
    /// arrival order and fed through the state machine until the peer
    /// closes, a protocol violation ends the session, or the server
    /// shuts down.
    async fn run(&mut self) -> Result<(), crate::Error> {
        while self.state != State::Closed {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res,
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            let frame = match maybe_frame {
                Ok(Some(frame)) => frame,
                // Clean peer close between messages.
                Ok(None) => return Ok(()),
                Err(ConnectionError::Protocol(reason)) => {
                    warn!("protocol violation: {}", reason);
                    self.reply_error().await;
                    return Ok(());
                }
                // I/O failures close the session without a response.
                Err(err) => return Err(err.into()),
            };

            match self.state {
                State::AwaitingHello => self.handle_hello(frame).await?,
                State::Ready => self.handle_request(frame).await?,
                State::Closed => {}
            }
        }

        Ok(())
    }

    async fn handle_hello(&mut self, frame: Frame) -> Result<(), crate::Error> {
        match frame {
            Frame::HelloReq { proto } if proto == PROTO_VER => {
                self.connection
                    .write_frame(&Frame::HelloResp { proto: PROTO_VER })
                    .await?;
                self.state = State::Ready;
                debug!("peer upgraded to ready, protocol v{}", proto);
            }
            Frame::HelloReq { proto } => {
                warn!(
                    "protocol version mismatch: peer v{}, server v{}",
                    proto, PROTO_VER
                );
                self.reply_error().await;
            }
            other => {
                warn!(
                    "expected hello request, got message kind {}",
                    other.kind()
                );
                self.reply_error().await;
            }
        }

        Ok(())
    }

    async fn handle_request(&mut self, frame: Frame) -> Result<(), crate::Error> {
        match Command::from_frame(frame) {
            Ok(cmd) => cmd.apply(&mut self.connection, &self.db).await,
            Err(err) => {
                warn!("{}", err);
                self.reply_error().await;
                Ok(())
            }
        }
    }

    /// Best-effort error reply; the session closes either way.
    async fn reply_error(&mut self) {
        if let Err(err) = self.connection.write_frame(&Frame::Error).await {
            debug!("failed to send error frame: {}", err);
        }
        self.state = State::Closed;
    }
}
