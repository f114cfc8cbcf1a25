//! Hello - one stream over a loopback TCP connection.
//!
//! This example demonstrates:
//! - Building server and client sessions with the builder
//! - Accepting inbound streams through the `on_new_stream` hook
//! - Replying on a stream and closing it gracefully from both ends
//!
//! ```text
//! RUST_LOG=muxwire=debug cargo run --example hello
//! ```

use std::sync::Arc;

use muxwire::{GoAwayCode, Session, Stream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (socket, peer) = listener.accept().await?;
        tracing::info!(%peer, "accepted connection");

        // Hooks cannot await, so inbound streams are handed to this task.
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<Arc<Stream>>();
        let session = Session::builder()
            .on_new_stream(move |_, stream| {
                stream.set_on_data(|s, data| {
                    tracing::info!(stream = s.id(), "server got {:?}", String::from_utf8_lossy(&data));
                });
                stream.set_on_fin(|s| tracing::info!(stream = s.id(), "client finished"));
                let _ = accepted_tx.send(stream.clone());
            })
            .server(socket)?;

        let driver = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        if let Some(stream) = accepted_rx.recv().await {
            stream.write_all(b"hello back").await?;
        }
        driver.await.map_err(std::io::Error::other)?
    });

    let socket = TcpStream::connect(addr).await?;
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let session = Session::builder()
        .on_go_away(|_, code| tracing::info!(?code, "peer went away"))
        .client(socket)?;

    let driver = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };

    let stream = session.open_stream()?;
    stream.set_on_data(move |_, data| {
        let _ = reply_tx.send(data);
    });
    stream.set_on_fin(|s| tracing::info!(stream = s.id(), "server finished"));
    stream.write_all(b"hello over a multiplexed stream").await?;

    if let Some(reply) = reply_rx.recv().await {
        tracing::info!("client got {:?}", String::from_utf8_lossy(&reply));
    }

    // The reply carried the ACK, so the stream is established and can be
    // half-closed; the server answers with its own FIN.
    stream.close().await?;
    stream.free();

    session.close(GoAwayCode::Normal).await?;
    driver.await??;
    server.await??;
    Ok(())
}
