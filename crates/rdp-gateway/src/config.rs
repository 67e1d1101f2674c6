//! Two-layer configuration: an optional TOML file provides defaults,
//! command-line flags overlay on top. Mirrors the shape of
//! `cosmic-rdp-server`'s `config.rs` + `main.rs`, generalized from "one
//! RDP server" to "one RDP client dial-out plus one display-socket
//! listener".

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

/// Color depths accepted by the RDP connect step; anything else falls
/// back to [`DEFAULT_COLOR_DEPTH`] with a warning.
const VALID_COLOR_DEPTHS: [u8; 4] = [8, 16, 24, 32];
const DEFAULT_COLOR_DEPTH: u8 = 16;
const DEFAULT_RDP_PORT: u16 = 3389;
const DEFAULT_WIDTH: u16 = 1024;
const DEFAULT_HEIGHT: u16 = 768;

/// File-based defaults, loaded from an optional TOML document.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub hostname: String,
    pub port: u16,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub width: u16,
    pub height: u16,
    pub initial_program: Option<String>,
    pub color_depth: u8,
    pub disable_audio: bool,
    pub console: bool,
    pub console_audio: bool,
    pub listen_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: DEFAULT_RDP_PORT,
            domain: None,
            username: None,
            password: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            initial_program: None,
            color_depth: DEFAULT_COLOR_DEPTH,
            disable_audio: false,
            console: false,
            console_audio: false,
            listen_addr: "0.0.0.0:4822".to_string(),
        }
    }
}

/// RDP-to-line-protocol display gateway.
///
/// Dials out to a remote desktop over RDP and re-encodes its
/// screen/pointer/audio/clipboard state as a line-oriented instruction
/// stream for a browser-based thin client listening on `--listen-addr`.
#[derive(Parser, Debug)]
#[command(name = "rdp-gateway", version, about)]
pub struct Cli {
    /// Path to a TOML config file providing defaults
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Remote desktop hostname to dial
    #[arg(long)]
    pub hostname: Option<String>,

    /// Remote desktop RDP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Windows domain for the RDP logon
    #[arg(long)]
    pub domain: Option<String>,

    /// RDP logon username
    #[arg(long)]
    pub username: Option<String>,

    /// RDP logon password
    #[arg(long)]
    pub password: Option<String>,

    /// Desired desktop width (rounded up to a multiple of 4)
    #[arg(long)]
    pub width: Option<u16>,

    /// Desired desktop height
    #[arg(long)]
    pub height: Option<u16>,

    /// Program to launch on session start, if the remote host supports it
    #[arg(long)]
    pub initial_program: Option<String>,

    /// Color depth in bits per pixel: 8, 16, 24, or 32
    #[arg(long)]
    pub color_depth: Option<u8>,

    /// Disable the audio channel entirely
    #[arg(long)]
    pub disable_audio: bool,

    /// Connect to the RDP console session (session 0) instead of a new one
    #[arg(long)]
    pub console: bool,

    /// Carry audio over the console session connection
    #[arg(long)]
    pub console_audio: bool,

    /// Address to bind the display-protocol socket to
    #[arg(long)]
    pub listen_addr: Option<String>,
}

impl Cli {
    /// Loads the file-based defaults (if `--config` was given) and
    /// overlays every flag the user actually supplied, exactly as
    /// `cosmic-rdp-server/src/main.rs` layers CLI over
    /// `ServerConfig::default()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file can't be read or parsed.
    pub fn resolve(self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read config file {path:?}: {e}"))?;
                toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("failed to parse config file {path:?}: {e}"))?
            }
            None => GatewayConfig::default(),
        };

        if let Some(hostname) = self.hostname {
            config.hostname = hostname;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.domain.is_some() {
            config.domain = self.domain;
        }
        if self.username.is_some() {
            config.username = self.username;
        }
        if self.password.is_some() {
            config.password = self.password;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if self.initial_program.is_some() {
            config.initial_program = self.initial_program;
        }
        if let Some(depth) = self.color_depth {
            config.color_depth = depth;
        }
        config.disable_audio |= self.disable_audio;
        config.console |= self.console;
        config.console_audio |= self.console_audio;
        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }

        config.width = round_up_to_4(config.width);
        if !VALID_COLOR_DEPTHS.contains(&config.color_depth) {
            tracing::warn!(
                requested = config.color_depth,
                fallback = DEFAULT_COLOR_DEPTH,
                "invalid color depth, falling back to default"
            );
            config.color_depth = DEFAULT_COLOR_DEPTH;
        }
        if config.hostname.is_empty() {
            anyhow::bail!("--hostname (or config file `hostname`) is required");
        }

        Ok(config)
    }
}

fn round_up_to_4(value: u16) -> u16 {
    (value + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> Cli {
        Cli {
            config: None,
            hostname: Some("desktop.example".to_string()),
            port: None,
            domain: None,
            username: None,
            password: None,
            width: None,
            height: None,
            initial_program: None,
            color_depth: None,
            disable_audio: false,
            console: false,
            console_audio: false,
            listen_addr: None,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_overridden() {
        let config = cli().resolve().unwrap();
        assert_eq!(config.hostname, "desktop.example");
        assert_eq!(config.port, DEFAULT_RDP_PORT);
        assert_eq!(config.color_depth, DEFAULT_COLOR_DEPTH);
        assert_eq!(config.listen_addr, "0.0.0.0:4822");
    }

    #[test]
    fn width_rounds_up_to_a_multiple_of_4() {
        let mut c = cli();
        c.width = Some(801);
        let config = c.resolve().unwrap();
        assert_eq!(config.width, 804);
    }

    #[test]
    fn invalid_color_depth_falls_back_to_16() {
        let mut c = cli();
        c.color_depth = Some(17);
        let config = c.resolve().unwrap();
        assert_eq!(config.color_depth, 16);
    }

    #[test]
    fn missing_hostname_is_an_error() {
        let mut c = cli();
        c.hostname = None;
        assert!(c.resolve().is_err());
    }
}
