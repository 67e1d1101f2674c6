//! Dials out to the remote desktop: TCP connect, TLS upgrade, then the
//! IronRDP connection sequence (X.224 negotiation, TLS, capability
//! exchange) down to a finalized [`ConnectionResult`].
//!
//! Grounded on the client dial-out sequence in
//! `xBounceIT-janus`'s `session_task.rs` (`connect_begin` /
//! TLS upgrade / `mark_as_upgraded` / `connect_finalize`), adapted from
//! `ironrdp_tls`/rustls to `native-tls`, matching this workspace's TLS
//! stack.

use ironrdp_connector::sspi::generator::NetworkRequest;
use ironrdp_connector::{
    ClientConnector, Config, ConnectorResult, Credentials, DesktopSize, MajorPlatformType,
    ServerName,
};
use ironrdp_pdu::gcc::KeyboardType;
use ironrdp_pdu::rdp::client_info::{PerformanceFlags, TimezoneInfo};
use ironrdp_tokio::{connect_begin, connect_finalize, mark_as_upgraded, TokioFramed};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

use crate::cliprdr::{ClipboardSlot, GatewayClipboardBackend};
use crate::config::GatewayConfig;

pub type RdpFramed = TokioFramed<TlsStream<TcpStream>>;

/// A no-op network client: NLA/CredSSP is not performed by this
/// gateway, matching the scope decision in `session_task.rs`'s
/// `NoNetworkClient` (standard RDP security only).
struct NoNetworkClient;

impl ironrdp_tokio::NetworkClient for NoNetworkClient {
    fn send(
        &mut self,
        _request: &NetworkRequest,
    ) -> impl std::future::Future<Output = ConnectorResult<Vec<u8>>> {
        std::future::ready(Err(ironrdp_connector::general_err!(
            "NLA/CredSSP is not supported by this gateway"
        )))
    }
}

pub type ClipboardEventReceiver = tokio::sync::mpsc::UnboundedReceiver<ironrdp_cliprdr::backend::ClipboardMessage>;

/// Dials `config.hostname:config.port`, completes the RDP connection
/// sequence, and returns the framed TLS stream, the negotiated
/// [`ironrdp_connector::ConnectionResult`], and the receiving half of the
/// CLIPRDR backend's outgoing message channel.
///
/// # Errors
///
/// Returns an error if the TCP connect, TLS upgrade, or any step of
/// the RDP connection sequence fails.
pub async fn connect(
    config: &GatewayConfig,
    clipboard: ClipboardSlot,
) -> anyhow::Result<(RdpFramed, ironrdp_connector::ConnectionResult, ClipboardEventReceiver)> {
    let addr = format!("{}:{}", config.hostname, config.port);
    let tcp = tokio::time::timeout(std::time::Duration::from_secs(15), TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow::anyhow!("connecting to {addr} timed out"))?
        .map_err(|e| anyhow::anyhow!("failed to connect to {addr}: {e}"))?;
    let client_addr = tcp
        .local_addr()
        .unwrap_or_else(|_| ([0, 0, 0, 0], 0).into());

    let connector_config = build_connector_config(config);
    let mut connector = ClientConnector::new(connector_config, client_addr);

    let (clipboard_tx, clipboard_rx) = tokio::sync::mpsc::unbounded_channel();
    let cliprdr_backend = GatewayClipboardBackend::new(clipboard, clipboard_tx);
    let cliprdr: ironrdp_cliprdr::CliprdrClient = ironrdp_cliprdr::Cliprdr::new(Box::new(cliprdr_backend));
    connector.static_channels.insert(cliprdr);

    let mut framed = TokioFramed::new(tcp);
    let should_upgrade = connect_begin(&mut framed, &mut connector)
        .await
        .map_err(|e| anyhow::anyhow!("RDP connect_begin failed: {e}"))?;

    if !connector.should_perform_security_upgrade() {
        anyhow::bail!("remote desktop did not request a TLS upgrade");
    }

    let (tcp, leftover) = framed.into_inner();
    let tls_stream = upgrade_tls(tcp, &config.hostname).await?;
    let mut framed = TokioFramed::new_with_leftover(tls_stream, leftover);

    let upgraded = mark_as_upgraded(should_upgrade, &mut connector);

    let mut network_client = NoNetworkClient;
    let connection_result = connect_finalize(
        upgraded,
        connector,
        &mut framed,
        &mut network_client,
        ServerName::new(&config.hostname),
        Vec::new(),
        None,
    )
    .await
    .map_err(|e| anyhow::anyhow!("RDP connect_finalize failed: {e}"))?;

    tracing::info!(
        width = connection_result.desktop_size.width,
        height = connection_result.desktop_size.height,
        "RDP connection established"
    );

    Ok((framed, connection_result, clipboard_rx))
}

async fn upgrade_tls(tcp: TcpStream, hostname: &str) -> anyhow::Result<TlsStream<TcpStream>> {
    // The remote desktop almost always presents a self-signed or
    // domain-internal certificate; this gateway is a protocol bridge,
    // not a browser, so it accepts whatever certificate the dial-out
    // target presents rather than requiring a trusted CA chain.
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build TLS connector: {e}"))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    connector
        .connect(hostname, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS upgrade to {hostname} failed: {e}"))
}

fn build_connector_config(config: &GatewayConfig) -> Config {
    Config {
        credentials: Credentials::UsernamePassword {
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
        },
        domain: config.domain.clone(),
        enable_tls: true,
        enable_credssp: false,
        keyboard_type: KeyboardType::IbmEnhanced,
        keyboard_subtype: 0,
        keyboard_functional_keys_count: 12,
        keyboard_layout: 0,
        ime_file_name: String::new(),
        dig_product_id: String::new(),
        desktop_size: DesktopSize { width: config.width, height: config.height },
        desktop_scale_factor: 0,
        bitmap: None,
        client_build: 0,
        client_name: "rdp-gateway".to_string(),
        client_dir: String::new(),
        platform: MajorPlatformType::UNIX,
        hardware_id: None,
        request_data: None,
        autologon: config.username.is_some() && config.password.is_some(),
        enable_audio_playback: !config.disable_audio,
        performance_flags: PerformanceFlags::default(),
        license_cache: None,
        timezone_info: TimezoneInfo::default(),
        enable_server_pointer: true,
        pointer_software_rendering: false,
    }
}
