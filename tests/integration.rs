//! Integration tests for muxwire.
//!
//! A client session and a server session talk over an in-memory duplex
//! pipe, each with its read loop running in its own task.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use muxwire::protocol::{flags, FrameBuffer, FrameType, Header};
use muxwire::{GoAwayCode, MuxError, Role, Session, SessionBuilder, Stream, StreamState};

const WAIT: Duration = Duration::from_secs(5);

/// One end of a connection with its read loop running.
struct Side {
    session: Session,
    accepted: UnboundedReceiver<Arc<Stream>>,
    data_tx: UnboundedSender<(u32, Bytes)>,
    data: UnboundedReceiver<(u32, Bytes)>,
    driver: JoinHandle<muxwire::Result<()>>,
}

impl Side {
    fn spawn(builder: SessionBuilder, transport: DuplexStream, role: Role) -> Self {
        let (accepted_tx, accepted) = unbounded_channel();
        let (data_tx, data) = unbounded_channel();

        let hook_data_tx = data_tx.clone();
        let session = builder
            .on_new_stream(move |_, stream| {
                let data_tx = hook_data_tx.clone();
                stream.set_on_data(move |s, bytes| {
                    let _ = data_tx.send((s.id(), bytes));
                });
                let _ = accepted_tx.send(stream.clone());
            })
            .build(transport, role)
            .unwrap();

        let driver = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        Self {
            session,
            accepted,
            data_tx,
            data,
            driver,
        }
    }

    /// Route data of a locally opened stream into this side's data channel.
    fn watch(&self, stream: &Stream) {
        let data_tx = self.data_tx.clone();
        stream.set_on_data(move |s, bytes| {
            let _ = data_tx.send((s.id(), bytes));
        });
    }

    async fn accept(&mut self) -> Arc<Stream> {
        timeout(WAIT, self.accepted.recv()).await.unwrap().unwrap()
    }

    /// Collect exactly `len` bytes received on stream `id`.
    async fn receive(&mut self, id: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            let (from, bytes) = timeout(WAIT, self.data.recv()).await.unwrap().unwrap();
            assert_eq!(from, id);
            out.extend_from_slice(&bytes);
        }
        out
    }
}

fn connect(client: SessionBuilder, server: SessionBuilder) -> (Side, Side) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        Side::spawn(client, a, Role::Client),
        Side::spawn(server, b, Role::Server),
    )
}

#[tokio::test]
async fn test_open_write_and_echo() {
    let (mut client, mut server) = connect(Session::builder(), Session::builder());

    let stream = client.session.open_stream().unwrap();
    client.watch(&stream);
    assert_eq!(stream.id(), 1);
    stream.write_all(b"hello").await.unwrap();

    let inbound = server.accept().await;
    assert_eq!(inbound.id(), 1);
    assert_eq!(server.receive(1, 5).await, b"hello");
    assert_eq!(inbound.state(), StreamState::SynRecv);

    inbound.write_all(b"world").await.unwrap();
    assert_eq!(inbound.state(), StreamState::Established);
    assert_eq!(client.receive(1, 5).await, b"world");
    assert_eq!(stream.state(), StreamState::Established);
}

#[tokio::test]
async fn test_streams_from_both_ends() {
    let (mut client, mut server) = connect(Session::builder(), Session::builder());

    let c1 = client.session.open_stream().unwrap();
    let c3 = client.session.open_stream().unwrap();
    let s2 = server.session.open_stream().unwrap();
    assert_eq!((c1.id(), c3.id(), s2.id()), (1, 3, 2));

    c1.init().await.unwrap();
    c3.init().await.unwrap();
    s2.write_all(b"from server").await.unwrap();

    let first = server.accept().await;
    let second = server.accept().await;
    assert_eq!((first.id(), second.id()), (1, 3));

    let from_server = client.accept().await;
    assert_eq!(from_server.id(), 2);
    assert_eq!(client.receive(2, 11).await, b"from server");
    assert_eq!(server.session.live_streams(), 3);
}

#[tokio::test]
async fn test_flow_control_with_auto_grant() {
    let (client, mut server) = connect(
        Session::builder().max_stream_window_size(16),
        Session::builder()
            .max_stream_window_size(16)
            .auto_window_update(true),
    );

    let stream = client.session.open_stream().unwrap();
    let payload: Vec<u8> = (0..100u8).collect();

    // Stalls whenever 16 bytes are in flight until the server grants more.
    timeout(WAIT, stream.write_all(&payload)).await.unwrap().unwrap();

    server.accept().await;
    assert_eq!(server.receive(1, 100).await, payload);
}

#[tokio::test]
async fn test_write_stops_at_window() {
    let (client, mut server) = connect(
        Session::builder().max_stream_window_size(8),
        Session::builder().max_stream_window_size(8),
    );

    let stream = client.session.open_stream().unwrap();
    assert_eq!(stream.write(b"0123456789").await.unwrap(), 8);
    assert_eq!(stream.window(), 0);
    assert_eq!(stream.write(b"89").await.unwrap(), 0);

    let inbound = server.accept().await;
    assert_eq!(server.receive(1, 8).await, b"01234567");

    inbound.window_update(2).await.unwrap();
    timeout(WAIT, stream.wait_writable()).await.unwrap().unwrap();
    assert_eq!(stream.window(), 2);
    assert_eq!(stream.write(b"89").await.unwrap(), 2);
    assert_eq!(server.receive(1, 2).await, b"89");
}

#[tokio::test]
async fn test_graceful_close_handshake() {
    let (mut client, mut server) = connect(Session::builder(), Session::builder());
    let (fin_tx, mut fin_rx) = unbounded_channel();

    let stream = client.session.open_stream().unwrap();
    client.watch(&stream);
    stream.write_all(b"ping").await.unwrap();

    let inbound = server.accept().await;
    {
        let fin_tx = fin_tx.clone();
        inbound.set_on_fin(move |s| {
            let _ = fin_tx.send(("server", s.id()));
        });
    }
    server.receive(1, 4).await;
    inbound.write_all(b"pong").await.unwrap();
    client.receive(1, 4).await;
    assert_eq!(stream.state(), StreamState::Established);

    stream.set_on_fin(move |s| {
        let _ = fin_tx.send(("client", s.id()));
    });
    stream.close().await.unwrap();
    assert_eq!(stream.state(), StreamState::Closing);

    let mut seen = vec![
        timeout(WAIT, fin_rx.recv()).await.unwrap().unwrap(),
        timeout(WAIT, fin_rx.recv()).await.unwrap().unwrap(),
    ];
    seen.sort();
    assert_eq!(seen, vec![("client", 1), ("server", 1)]);
    assert!(stream.is_closed());
    assert!(inbound.is_closed());
    assert!(matches!(stream.write(b"late").await, Err(MuxError::InvalidState(_))));
}

#[tokio::test]
async fn test_reset_reaches_peer() {
    let (client, mut server) = connect(Session::builder(), Session::builder());
    let (reset_tx, mut reset_rx) = unbounded_channel();

    let stream = client.session.open_stream().unwrap();
    stream.init().await.unwrap();
    let inbound = server.accept().await;
    inbound.set_on_reset(move |s| {
        let _ = reset_tx.send(s.id());
    });

    stream.reset().await.unwrap();
    assert_eq!(timeout(WAIT, reset_rx.recv()).await.unwrap(), Some(1));
    assert!(inbound.is_closed());
    assert!(matches!(inbound.wait_writable().await, Err(MuxError::BrokenPipe)));
}

#[tokio::test]
async fn test_ping_round_trip() {
    let (pong_tx, mut pong_rx) = unbounded_channel();
    let (ping_tx, mut ping_rx) = unbounded_channel();
    let (client, _server) = connect(
        Session::builder().on_pong(move |_, value, rtt| {
            let _ = pong_tx.send((value, rtt));
        }),
        Session::builder().on_ping(move |_, value| {
            let _ = ping_tx.send(value);
        }),
    );

    client.session.ping(42, false).await.unwrap();

    assert_eq!(timeout(WAIT, ping_rx.recv()).await.unwrap(), Some(42));
    let (value, rtt) = timeout(WAIT, pong_rx.recv()).await.unwrap().unwrap();
    assert_eq!(value, 42);
    assert!(rtt < WAIT);
}

#[tokio::test]
async fn test_go_away_ends_both_loops() {
    let (code_tx, mut code_rx) = unbounded_channel();
    let (client, server) = connect(
        Session::builder(),
        Session::builder().on_go_away(move |_, code| {
            let _ = code_tx.send(code);
        }),
    );

    client.session.close(GoAwayCode::Normal).await.unwrap();
    client.session.close(GoAwayCode::Normal).await.unwrap();

    assert_eq!(
        timeout(WAIT, code_rx.recv()).await.unwrap(),
        Some(GoAwayCode::Normal)
    );
    timeout(WAIT, server.driver).await.unwrap().unwrap().unwrap();
    timeout(WAIT, client.driver).await.unwrap().unwrap().unwrap();
    assert!(server.session.is_closed());
    assert!(matches!(server.session.open_stream().unwrap().write(b"x").await, Err(MuxError::SessionClosed)));
}

#[tokio::test]
async fn test_inbound_stream_over_backlog_is_reset() {
    let (client, mut server) = connect(Session::builder(), Session::builder().accept_backlog(1));
    let (reset_tx, mut reset_rx) = unbounded_channel();

    let first = client.session.open_stream().unwrap();
    first.write_all(b"a").await.unwrap();
    server.accept().await;
    server.receive(1, 1).await;

    let second = client.session.open_stream().unwrap();
    second.set_on_reset(move |s| {
        let _ = reset_tx.send(s.id());
    });
    second.write_all(b"b").await.unwrap();

    assert_eq!(timeout(WAIT, reset_rx.recv()).await.unwrap(), Some(3));
    assert!(second.is_closed());

    // The refused stream did not take the server down.
    first.write_all(b"c").await.unwrap();
    assert_eq!(server.receive(1, 1).await, b"c");
    assert_eq!(server.session.live_streams(), 1);
}

#[tokio::test]
async fn test_free_releases_streams() {
    let (client, _server) = connect(Session::builder(), Session::builder());
    let (freed_tx, mut freed_rx) = unbounded_channel();

    for _ in 0..3 {
        let stream = client.session.open_stream().unwrap();
        let freed_tx = freed_tx.clone();
        stream.set_on_free(move |s| {
            let _ = freed_tx.send(s.id());
        });
    }
    let observer = client.session.clone();
    client.session.free().await.unwrap();

    let mut ids = Vec::new();
    while let Ok(id) = freed_rx.try_recv() {
        ids.push(id);
    }
    ids.sort();
    assert_eq!(ids, vec![1, 3, 5]);
    assert_eq!(observer.live_streams(), 0);
    assert!(observer.is_closed());
}

#[tokio::test]
async fn test_wire_capture() {
    let (local, mut remote) = tokio::io::duplex(64 * 1024);
    let session = Session::builder()
        .max_frame_payload(4)
        .client(local)
        .unwrap();

    let stream = session.open_stream().unwrap();
    assert_eq!(stream.write(b"0123456789").await.unwrap(), 10);
    stream.window_update(1000).await.unwrap();
    session.free().await.unwrap();

    let mut captured = Vec::new();
    remote.read_to_end(&mut captured).await.unwrap();

    let frames = FrameBuffer::new().push(&captured).unwrap();
    let headers: Vec<Header> = frames.iter().map(|f| f.header).collect();
    assert_eq!(
        headers,
        vec![
            Header::data(flags::SYN, 1, 4),
            Header::data(0, 1, 4),
            Header::data(0, 1, 2),
            Header::window_update(0, 1, 1000),
            Header::go_away(GoAwayCode::Normal),
        ]
    );
    assert_eq!(frames[1].payload(), b"4567");
    assert_eq!(frames[3].frame_type(), FrameType::WindowUpdate);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_over_session() {
    let (pong_tx, mut pong_rx) = unbounded_channel();
    let (_client, _server) = connect(
        Session::builder()
            .keepalive(Duration::from_secs(10))
            .on_pong(move |_, value, _| {
                let _ = pong_tx.send(value);
            }),
        Session::builder(),
    );

    assert_eq!(timeout(Duration::from_secs(15), pong_rx.recv()).await.unwrap(), Some(0));
    assert_eq!(timeout(Duration::from_secs(15), pong_rx.recv()).await.unwrap(), Some(1));
}
