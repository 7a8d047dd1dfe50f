use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{self, LocalSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use empdb::db::DbHolder;
use empdb::{server, Client, Db};

const KIND_HELLO_RESP: u32 = 1;
const KIND_ADD_RESP: u32 = 5;
const KIND_ERROR: u32 = 8;

async fn start_server(
    db: Db,
    max_clients: usize,
) -> (SocketAddr, CancellationToken, task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let handle = {
        let shutdown = shutdown.clone();
        task::spawn_local(async move {
            server::run(listener, db, max_clients, shutdown.cancelled()).await;
        })
    };

    (addr, shutdown, handle)
}

async fn read_frame_header(socket: &mut TcpStream) -> (u32, u16) {
    let mut hdr = [0u8; 6];
    socket.read_exact(&mut hdr).await.unwrap();
    (
        u32::from_be_bytes(hdr[..4].try_into().unwrap()),
        u16::from_be_bytes(hdr[4..6].try_into().unwrap()),
    )
}

/// Raw hello exchange for the byte-level tests.
async fn raw_hello(socket: &mut TcpStream) {
    socket.write_all(&[0, 0, 0, 0, 0, 2, 0, 1]).await.unwrap();

    let (kind, len) = read_frame_header(socket).await;
    assert_eq!(kind, KIND_HELLO_RESP);
    assert_eq!(len, 2);
    let mut proto = [0u8; 2];
    socket.read_exact(&mut proto).await.unwrap();
    assert_eq!(u16::from_be_bytes(proto), 1);
}

#[tokio::test]
async fn add_then_list_round_trips() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut client = Client::connect(addr).await.unwrap();
            client.hello().await.unwrap();
            client.add("Alice-1 Main St-40").await.unwrap();

            let records = client.list().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].name(), "Alice");
            assert_eq!(records[0].address(), "1 Main St");
            assert_eq!(records[0].hours(), 40);

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn remove_from_empty_keeps_session_alive() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut client = Client::connect(addr).await.unwrap();
            client.hello().await.unwrap();

            assert!(client.remove_last().await.is_err());

            // The failure was a request failure, not a protocol one:
            // the same session must still serve requests.
            let records = client.list().await.unwrap();
            assert!(records.is_empty());

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn protocol_mismatch_terminates_session() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut socket = TcpStream::connect(addr).await.unwrap();
            // Hello request advertising protocol version 99.
            socket.write_all(&[0, 0, 0, 0, 0, 2, 0, 99]).await.unwrap();

            let (kind, len) = read_frame_header(&mut socket).await;
            assert_eq!(kind, KIND_ERROR);
            assert_eq!(len, 0);

            let mut byte = [0u8; 1];
            assert_eq!(socket.read(&mut byte).await.unwrap(), 0);

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn split_add_request_is_reassembled() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut socket = TcpStream::connect(addr).await.unwrap();
            raw_hello(&mut socket).await;

            let mut frame = vec![0u8; 6 + 1024];
            frame[3] = 4; // AddReq
            frame[4..6].copy_from_slice(&1024u16.to_be_bytes());
            frame[6..6 + 15].copy_from_slice(b"Eve-5 Elm St-10");

            socket.write_all(&frame[..3]).await.unwrap();
            sleep(Duration::from_millis(50)).await;
            socket.write_all(&frame[3..]).await.unwrap();

            // Exactly one response for the reassembled request.
            let (kind, len) = read_frame_header(&mut socket).await;
            assert_eq!(kind, KIND_ADD_RESP);
            assert_eq!(len, 4);
            let mut status = [0u8; 4];
            socket.read_exact(&mut status).await.unwrap();
            assert_eq!(i32::from_be_bytes(status), 0);

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn full_table_drops_new_peers_silently() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), 2).await;

            let mut first = Client::connect(addr).await.unwrap();
            first.hello().await.unwrap();
            let mut second = Client::connect(addr).await.unwrap();
            second.hello().await.unwrap();

            // The third connect succeeds at the socket level but the
            // server closes it without sending a single frame.
            let mut third = TcpStream::connect(addr).await.unwrap();
            let mut byte = [0u8; 1];
            assert_eq!(third.read(&mut byte).await.unwrap(), 0);

            // The established sessions are unaffected.
            assert!(first.list().await.unwrap().is_empty());

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn records_survive_a_restart() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("emp.db");

            let mut holder = DbHolder::create(&path).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut client = Client::connect(addr).await.unwrap();
            client.hello().await.unwrap();
            client.add("Alice-1 Main St-40").await.unwrap();
            client.add("Bob-2 Oak Rd-38").await.unwrap();
            client.add("Carol-3 Elm St-12").await.unwrap();
            client.remove_last().await.unwrap();

            shutdown.cancel();
            handle.await.unwrap();
            holder.persist().unwrap();
            drop(holder);

            // Two records of 516 octets behind the 12-octet header.
            let file_len = std::fs::metadata(&path).unwrap().len();
            assert_eq!(file_len, 12 + 2 * 516);

            let holder = DbHolder::open(&path).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut client = Client::connect(addr).await.unwrap();
            client.hello().await.unwrap();
            let records = client.list().await.unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].name(), "Alice");
            assert_eq!(records[1].name(), "Bob");

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn unknown_kind_gets_one_error_frame_then_close() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut socket = TcpStream::connect(addr).await.unwrap();
            raw_hello(&mut socket).await;

            // Kind 9 is out of range.
            socket.write_all(&[0, 0, 0, 9, 0, 0]).await.unwrap();

            let (kind, len) = read_frame_header(&mut socket).await;
            assert_eq!(kind, KIND_ERROR);
            assert_eq!(len, 0);
            let mut byte = [0u8; 1];
            assert_eq!(socket.read(&mut byte).await.unwrap(), 0);

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn second_hello_in_ready_state_is_rejected() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let holder = DbHolder::create(dir.path().join("emp.db")).unwrap();
            let (addr, shutdown, handle) = start_server(holder.db(), server::MAX_CLIENTS).await;

            let mut socket = TcpStream::connect(addr).await.unwrap();
            raw_hello(&mut socket).await;

            socket.write_all(&[0, 0, 0, 0, 0, 2, 0, 1]).await.unwrap();

            let (kind, _) = read_frame_header(&mut socket).await;
            assert_eq!(kind, KIND_ERROR);
            let mut byte = [0u8; 1];
            assert_eq!(socket.read(&mut byte).await.unwrap(), 0);

            shutdown.cancel();
            handle.await.unwrap();
        })
        .await;
}
