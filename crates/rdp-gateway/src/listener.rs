//! The display-socket listener: accepts thin-client connections and
//! drives each through handshake, synchronize, and steady state.
//! Grounded on the accept loop in `cosmic-ext-rdp-broker`'s
//! `broker.rs` (bind, loop+accept, spawn one task per connection,
//! tracing on failure), adapted from RDP-proxying to driving one
//! `rdp_session::ClientSession` per client against the shared
//! [`Display`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rdp_display::Display;
use rdp_protocol::InstructionWriter;
use rdp_session::{ClientSession, ClientWriter, ModifiedFlag};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use crate::bridge::{ChannelInputSink, RdpInputEvent};

/// Accepts thin-client connections on `bind_addr` until `stopping`
/// reports true, registering each with `pacer_clients` so the frame
/// pacer fans frames out to it and spawning its steady-state loop.
pub async fn serve(
    bind_addr: &str,
    display: Arc<Mutex<Display>>,
    modified: ModifiedFlag,
    pacer_clients: Arc<Mutex<Vec<ClientWriter<tokio::net::tcp::OwnedWriteHalf>>>>,
    input_tx: mpsc::UnboundedSender<RdpInputEvent>,
    stopping: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind display socket to {bind_addr}: {e}"))?;
    tracing::info!(%bind_addr, "display socket listening");

    let next_id = Arc::new(AtomicU64::new(1));

    while !stopping.load(Ordering::Relaxed) {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept thin-client connection");
                continue;
            }
        };
        tracing::info!(%peer_addr, "thin client connected");

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let display = Arc::clone(&display);
        let modified = modified.clone();
        let pacer_clients = Arc::clone(&pacer_clients);
        let input_tx = input_tx.clone();
        let stopping = Arc::clone(&stopping);

        tokio::spawn(async move {
            if let Err(err) =
                handle_client(id, stream, display, modified, pacer_clients, input_tx, stopping).await
            {
                tracing::warn!(client = id, %peer_addr, error = %err, "thin client session ended with an error");
            }
        });
    }

    Ok(())
}

async fn handle_client(
    id: u64,
    stream: tokio::net::TcpStream,
    display: Arc<Mutex<Display>>,
    modified: ModifiedFlag,
    pacer_clients: Arc<Mutex<Vec<ClientWriter<tokio::net::tcp::OwnedWriteHalf>>>>,
    input_tx: mpsc::UnboundedSender<RdpInputEvent>,
    stopping: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let (mut read_half, write_half) = stream.into_split();

    let handshake_writer = InstructionWriter::new(write_half);
    let sink = ChannelInputSink::new(input_tx);
    let mut session = ClientSession::new(id, Arc::clone(&display), modified.clone(), handshake_writer, sink);

    session.handshake(&mut read_half).await?;
    session.synchronize().await?;

    // The pacer owns outbound writes from here on; hand the socket's
    // write half to it and keep only the read half for steady state.
    let writer = session.take_writer();
    pacer_clients.lock().await.push(ClientWriter::new(id, writer));

    let result = session
        .steady_state(&mut read_half, {
            let stopping = Arc::clone(&stopping);
            move || stopping.load(Ordering::Relaxed)
        })
        .await;

    pacer_clients.lock().await.retain(|c| c.id() != id);
    session.shutdown().await;
    result.map_err(|e| anyhow::anyhow!("thin-client session error: {e}"))
}
