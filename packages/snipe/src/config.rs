use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / snipe.toml / env vars)
// =============================================================================
//
//   snipe.toml:      [liveness]
//                    window_secs = 60
//
//   env var:         SNIPE_LIVENESS__WINDOW_SECS=60   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub liveness: LivenessFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Lives under `[server]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    /// Go-style `host:port`; an empty host binds every interface.
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

/// Lives under `[liveness]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LivenessFileConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Seconds between probes. Unset means nine tenths of the window, 0 disables.
    #[serde(default)]
    pub ping_interval_secs: Option<u64>,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for LivenessFileConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            ping_interval_secs: None,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Lives under `[relay]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Close the connection when the relay stops, so the session ends
    /// instead of idling with a dead outbound path.
    #[serde(default = "default_close_on_failure")]
    pub close_on_failure: bool,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            close_on_failure: default_close_on_failure(),
        }
    }
}

fn default_addr() -> String {
    ":9090".to_string()
}
fn default_window_secs() -> u64 {
    3600
}
fn default_max_frame_bytes() -> usize {
    512
}
fn default_prompt() -> String {
    "> ".to_string()
}
fn default_close_on_failure() -> bool {
    true
}

/// Build a figment that layers: defaults → config file → SNIPE_* env vars.
///
/// A missing config file is not an error; figment treats it as empty.
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("SNIPE_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SnipeConfig {
    pub bind_addr: SocketAddr,
    pub liveness: LivenessConfig,
    pub relay: RelayConfig,
}

#[derive(Clone, Debug)]
pub struct LivenessConfig {
    /// How far each acknowledgement pushes the read deadline.
    pub window: Duration,
    /// None disables outbound probes.
    pub ping_interval: Option<Duration>,
    /// Largest inbound payload accepted before the connection is closed.
    pub max_frame_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub prompt: String,
    pub close_on_failure: bool,
}

impl SnipeConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let bind_addr = parse_bind_addr(&fc.server.addr)?;
        let liveness = LivenessConfig::from_file(&fc.liveness)?;
        Ok(Self {
            bind_addr,
            liveness,
            relay: RelayConfig {
                prompt: fc.relay.prompt.clone(),
                close_on_failure: fc.relay.close_on_failure,
            },
        })
    }
}

impl LivenessConfig {
    pub fn from_file(fc: &LivenessFileConfig) -> Result<Self> {
        if fc.window_secs == 0 {
            bail!("liveness.window_secs must be greater than zero");
        }
        let window = Duration::from_secs(fc.window_secs);
        let ping_interval = match fc.ping_interval_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(window * 9 / 10),
        };
        Ok(Self {
            window,
            ping_interval,
            max_frame_bytes: fc.max_frame_bytes,
        })
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(default_window_secs()),
            ping_interval: Some(Duration::from_secs(default_window_secs()) * 9 / 10),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            close_on_failure: default_close_on_failure(),
        }
    }
}

/// Resolve a `host:port` listen address. An empty host (`:9090`) means all
/// interfaces; named hosts go through the system resolver.
pub fn parse_bind_addr(addr: &str) -> Result<SocketAddr> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("bind address {addr:?} is missing a port"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in bind address {addr:?}"))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve bind host {host:?}"))?
        .next()
        .with_context(|| format!("bind host {host:?} resolved to no addresses"))
}
