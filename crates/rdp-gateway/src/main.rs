//! RDP-to-line-protocol display gateway: dials out to a remote desktop
//! over RDP and re-encodes its screen/pointer/audio/clipboard state as
//! a line-oriented instruction stream for a browser-based thin client.
//!
//! Orchestration mirrors `cosmic-rdp-server`'s `main.rs`: parse the
//! CLI, init tracing, build the runtime pieces, then run them to
//! completion, except here the roles are reversed — this binary is
//! the RDP *client*, and the thing it serves is the display-socket
//! listener rather than an RDP port.

mod bridge;
mod cliprdr;
mod config;
mod connection;
mod listener;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use rdp_display::Display;
use rdp_session::{ClientWriter, FramePacer, ModifiedFlag, PacerConfig};
use tokio::sync::{mpsc, Mutex};

use cliprdr::ClipboardSlot;
use config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().resolve()?;

    tracing::info!(hostname = %config.hostname, port = config.port, "dialing remote desktop");
    let clipboard = ClipboardSlot::new();
    let (framed, connection_result, clipboard_events) =
        connection::connect(&config, clipboard.clone()).await?;

    let display = Arc::new(Mutex::new(Display::new(
        i32::from(connection_result.desktop_size.width),
        i32::from(connection_result.desktop_size.height),
    )));
    let modified = ModifiedFlag::new();
    let pacer_clients: Arc<Mutex<Vec<ClientWriter<tokio::net::tcp::OwnedWriteHalf>>>> =
        Arc::new(Mutex::new(Vec::new()));
    let stopping = Arc::new(AtomicBool::new(false));

    let (input_tx, input_rx) = mpsc::unbounded_channel();

    let bridge_display = Arc::clone(&display);
    let bridge_modified = modified.clone();
    let bridge_stopping = Arc::clone(&stopping);
    let bridge_task = tokio::spawn(async move {
        let stopping = move || bridge_stopping.load(Ordering::Relaxed);
        if let Err(err) =
            bridge::run(framed, connection_result, bridge_display, bridge_modified, clipboard, input_rx, clipboard_events, stopping)
                .await
        {
            tracing::error!(error = %err, "RDP bridge ended with an error");
        }
    });

    let pacer = FramePacer::new(Arc::clone(&display), modified.clone(), Arc::clone(&pacer_clients), PacerConfig::default());
    let pacer_stopping = Arc::clone(&stopping);
    let pacer_task = tokio::spawn(pacer.run(move || pacer_stopping.load(Ordering::Relaxed)));

    let listener_result = listener::serve(
        &config.listen_addr,
        display,
        modified,
        pacer_clients,
        input_tx,
        Arc::clone(&stopping),
    )
    .await;

    stopping.store(true, Ordering::Relaxed);
    let _ = bridge_task.await;
    let _ = pacer_task.await;

    listener_result
}
