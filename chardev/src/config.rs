//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Chardev configuration
//!
//! Options arrive either through the typed builders below or as a flat
//! [`OptionSet`] of `key=value` pairs, which is validated into the same types.

use crate::{BackendKind, ChardevError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default ring buffer size
pub const DEFAULT_RINGBUF_SIZE: usize = 65536;

/// Default serial line speed
pub const DEFAULT_SERIAL_SPEED: u32 = 115_200;

/// Default multiplexer escape byte (Ctrl-A)
pub const DEFAULT_ESCAPE: u8 = 0x01;

/// Default multiplexer frontend ceiling
pub const DEFAULT_MAX_FRONTENDS: usize = 4;

/// Default multiplexer per-frontend buffer
pub const DEFAULT_SLOT_CAPACITY: usize = 32;

/// Complete configuration of one chardev
#[derive(Debug, Clone)]
pub struct ChardevOptions {
    /// Unique label
    pub label: String,

    /// Backend and its options
    pub backend: BackendOptions,

    /// Wrap the backend in a multiplexer
    pub mux: Option<MuxConfig>,

    /// Mirror every written byte to this file
    pub logfile: Option<PathBuf>,

    /// Append to `logfile` instead of truncating it
    pub logappend: bool,
}

impl ChardevOptions {
    /// Create options for `label` using `backend`
    pub fn new(label: impl Into<String>, backend: BackendOptions) -> Self {
        Self {
            label: label.into(),
            backend,
            mux: None,
            logfile: None,
            logappend: false,
        }
    }

    /// Wrap the chardev in a multiplexer
    pub fn with_mux(mut self, config: MuxConfig) -> Self {
        self.mux = Some(config);
        self
    }

    /// Mirror output to a log file
    pub fn with_logfile(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.logfile = Some(path.into());
        self.logappend = append;
        self
    }

    /// Check option combinations
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(ChardevError::MissingOption("id"));
        }
        if let Some(ref mux) = self.mux {
            mux.validate()?;
        }
        self.backend.validate()
    }

    /// Parse and validate an [`OptionSet`]
    pub fn from_option_set(set: &OptionSet) -> Result<Self> {
        let kind = BackendKind::from_name(set.backend())
            .ok_or_else(|| ChardevError::UnknownBackend(set.backend().to_string()))?;
        let allowed: &[&str] = match kind {
            BackendKind::Null | BackendKind::Pty => &[],
            BackendKind::Ringbuf => &["size"],
            BackendKind::File => &["path", "append"],
            BackendKind::Pipe | BackendKind::Serial => &["path"],
            BackendKind::Socket => &[
                "host",
                "port",
                "path",
                "server",
                "wait",
                "telnet",
                "tls-creds",
                "nodelay",
                "reconnect",
            ],
            BackendKind::Mux => return Err(ChardevError::UnknownBackend(set.backend().to_string())),
        };
        for key in set.keys() {
            if !COMMON_KEYS.contains(&key) && !allowed.contains(&key) {
                return Err(ChardevError::UnknownOption(key.to_string()));
            }
        }

        let label = set.get("id").ok_or(ChardevError::MissingOption("id"))?;
        let backend = match kind {
            BackendKind::Null => BackendOptions::Null,
            BackendKind::Pty => BackendOptions::Pty,
            BackendKind::Ringbuf => BackendOptions::Ringbuf {
                size: match set.get_u64("size")? {
                    Some(size) => usize::try_from(size)
                        .map_err(|_| ChardevError::config("size", "out of range"))?,
                    None => DEFAULT_RINGBUF_SIZE,
                },
            },
            BackendKind::File => BackendOptions::File {
                path: set.require("path")?.into(),
                append: set.get_bool("append")?.unwrap_or(false),
            },
            BackendKind::Pipe => BackendOptions::Pipe {
                path: set.require("path")?.into(),
            },
            BackendKind::Serial => BackendOptions::Serial(SerialOptions::new(set.require("path")?)),
            BackendKind::Socket => BackendOptions::Socket(SocketOptions::from_option_set(set)?),
            BackendKind::Mux => return Err(ChardevError::UnknownBackend(set.backend().to_string())),
        };

        let mut options = ChardevOptions::new(label, backend);
        if set.get_bool("mux")?.unwrap_or(false) {
            options.mux = Some(MuxConfig::default());
        }
        if let Some(path) = set.get("logfile") {
            options.logfile = Some(path.into());
            options.logappend = set.get_bool("logappend")?.unwrap_or(false);
        }
        options.validate()?;
        Ok(options)
    }
}

const COMMON_KEYS: [&str; 4] = ["id", "mux", "logfile", "logappend"];

/// Backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOptions {
    /// Discard output
    Null,
    /// In-memory ring of `size` bytes
    Ringbuf {
        /// Capacity, must be a power of two
        size: usize,
    },
    /// Output only file
    File {
        /// File path
        path: PathBuf,
        /// Append instead of truncating
        append: bool,
    },
    /// Named pipe; `path.in`/`path.out` when both exist, `path` otherwise
    Pipe {
        /// Base path
        path: PathBuf,
    },
    /// Pseudo terminal master
    Pty,
    /// Host serial device
    Serial(SerialOptions),
    /// TCP or Unix socket
    Socket(SocketOptions),
}

impl BackendOptions {
    /// Kind this option block creates
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Null => BackendKind::Null,
            Self::Ringbuf { .. } => BackendKind::Ringbuf,
            Self::File { .. } => BackendKind::File,
            Self::Pipe { .. } => BackendKind::Pipe,
            Self::Pty => BackendKind::Pty,
            Self::Serial(_) => BackendKind::Serial,
            Self::Socket(_) => BackendKind::Socket,
        }
    }

    /// Check backend specific invariants
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Null | Self::Pty => Ok(()),
            Self::Ringbuf { size } => {
                if size.is_power_of_two() {
                    Ok(())
                } else {
                    Err(ChardevError::config(
                        "size",
                        "size of ringbuf chardev must be power of two",
                    ))
                }
            }
            Self::File { path, .. } | Self::Pipe { path } => {
                if path.as_os_str().is_empty() {
                    Err(ChardevError::MissingOption("path"))
                } else {
                    Ok(())
                }
            }
            Self::Serial(serial) => serial.validate(),
            Self::Socket(socket) => socket.validate(),
        }
    }
}

/// Host serial device options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOptions {
    /// Device path, e.g. `/dev/ttyS0`
    pub path: PathBuf,
    /// Initial line speed
    pub speed: u32,
}

impl SerialOptions {
    /// Serial device at `path` with the default speed
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            speed: DEFAULT_SERIAL_SPEED,
        }
    }

    /// Set the initial line speed
    pub fn with_speed(mut self, speed: u32) -> Self {
        self.speed = speed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ChardevError::MissingOption("path"));
        }
        if self.speed == 0 {
            return Err(ChardevError::config("speed", "must be non-zero"));
        }
        Ok(())
    }
}

/// Socket endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// TCP host and port
    Inet {
        /// Host name or address
        host: String,
        /// Port number
        port: u16,
    },
    /// Unix domain socket path
    Unix {
        /// Socket path
        path: PathBuf,
    },
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet { host, port } => write!(f, "{host}:{port}"),
            Self::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Socket chardev options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Endpoint to listen on or connect to
    pub address: SocketAddress,

    /// Listen instead of connecting
    pub server: bool,

    /// Server only: block construction until the first peer is established
    pub wait: bool,

    /// Strip telnet commands and send the negotiation bootstrap
    pub telnet: bool,

    /// Name of registered TLS credentials
    pub tls_creds: Option<String>,

    /// Disable Nagle's algorithm
    pub nodelay: bool,

    /// Client only: retry interval after a lost or failed connection
    pub reconnect: Option<Duration>,
}

impl SocketOptions {
    /// Connect to a TCP endpoint
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::with_address(SocketAddress::Inet {
            host: host.into(),
            port,
        })
    }

    /// Connect to a Unix domain socket
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::with_address(SocketAddress::Unix { path: path.into() })
    }

    fn with_address(address: SocketAddress) -> Self {
        Self {
            address,
            server: false,
            wait: false,
            telnet: false,
            tls_creds: None,
            nodelay: false,
            reconnect: None,
        }
    }

    /// Listen instead of connecting
    pub fn with_server(mut self, server: bool) -> Self {
        self.server = server;
        self
    }

    /// Wait for the first peer during construction
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Enable telnet processing
    pub fn with_telnet(mut self, telnet: bool) -> Self {
        self.telnet = telnet;
        self
    }

    /// Use registered TLS credentials
    pub fn with_tls_creds(mut self, name: impl Into<String>) -> Self {
        self.tls_creds = Some(name.into());
        self
    }

    /// Disable Nagle's algorithm
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Retry lost connections every `interval`
    pub fn with_reconnect(mut self, interval: Duration) -> Self {
        self.reconnect = Some(interval);
        self
    }

    /// Whether this is a TCP socket
    pub fn is_inet(&self) -> bool {
        matches!(self.address, SocketAddress::Inet { .. })
    }

    /// Check option combinations
    pub fn validate(&self) -> Result<()> {
        match self.address {
            SocketAddress::Unix { ref path } => {
                if path.as_os_str().is_empty() {
                    return Err(ChardevError::MissingOption("path"));
                }
                if self.tls_creds.is_some() {
                    return Err(ChardevError::config(
                        "tls-creds",
                        "'tls-creds' option is incompatible with 'unix' address type",
                    ));
                }
            }
            SocketAddress::Inet { ref host, port } => {
                if host.is_empty() {
                    return Err(ChardevError::MissingOption("host"));
                }
                if port == 0 && !self.server {
                    return Err(ChardevError::config("port", "client needs a non-zero port"));
                }
            }
        }
        if self.server {
            if self.reconnect.is_some() {
                return Err(ChardevError::config(
                    "reconnect",
                    "'reconnect' option is incompatible with socket in server listen mode",
                ));
            }
        } else if self.wait {
            return Err(ChardevError::config(
                "wait",
                "'wait' option is incompatible with socket in client connect mode",
            ));
        }
        if let Some(interval) = self.reconnect {
            if interval.is_zero() {
                return Err(ChardevError::config("reconnect", "interval must be positive"));
            }
        }
        Ok(())
    }

    fn from_option_set(set: &OptionSet) -> Result<Self> {
        let server = set.get_bool("server")?.unwrap_or(false);
        let mut options = match set.get("path") {
            Some(path) => {
                if set.get("host").is_some() || set.get("port").is_some() {
                    return Err(ChardevError::config(
                        "path",
                        "'path' cannot be combined with 'host' or 'port'",
                    ));
                }
                SocketOptions::unix(path)
            }
            None => {
                let port = set.require("port")?;
                let port = port.parse::<u16>().map_err(|_| {
                    ChardevError::config("port", format!("'{port}' is not a valid port"))
                })?;
                let host = match set.get("host") {
                    Some(host) if !host.is_empty() => host.to_string(),
                    _ if server => "0.0.0.0".to_string(),
                    _ => "localhost".to_string(),
                };
                SocketOptions::tcp(host, port)
            }
        };
        options.server = server;
        options.wait = set.get_bool("wait")?.unwrap_or(false);
        options.telnet = set.get_bool("telnet")?.unwrap_or(false);
        options.nodelay = set.get_bool("nodelay")?.unwrap_or(false);
        options.tls_creds = set.get("tls-creds").map(str::to_string);
        options.reconnect = match set.get_u64("reconnect")? {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };
        Ok(options)
    }
}

/// Multiplexer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxConfig {
    /// Command introducer byte
    pub escape: u8,
    /// Frontend ceiling
    pub max_frontends: usize,
    /// Per-frontend buffer size, a power of two
    pub slot_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            escape: DEFAULT_ESCAPE,
            max_frontends: DEFAULT_MAX_FRONTENDS,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
        }
    }
}

impl MuxConfig {
    /// Set the escape byte
    pub fn with_escape(mut self, escape: u8) -> Self {
        self.escape = escape;
        self
    }

    /// Set the frontend ceiling
    pub fn with_max_frontends(mut self, max: usize) -> Self {
        self.max_frontends = max;
        self
    }

    /// Set the per-frontend buffer size
    pub fn with_slot_capacity(mut self, capacity: usize) -> Self {
        self.slot_capacity = capacity;
        self
    }

    /// Check tuning values
    pub fn validate(&self) -> Result<()> {
        if self.max_frontends == 0 {
            return Err(ChardevError::config("mux", "frontend ceiling must be positive"));
        }
        if !self.slot_capacity.is_power_of_two() {
            return Err(ChardevError::config(
                "mux",
                "slot capacity must be a power of two",
            ));
        }
        Ok(())
    }
}

/// Backend kind plus named options, as produced by a command line or config file
///
/// The textual form is `kind,key=value,key=value`; a bare `key` means `key=on`.
///
/// ```
/// use chario::OptionSet;
///
/// let set: OptionSet = "socket,id=mon0,host=127.0.0.1,port=4444,server=on".parse().unwrap();
/// assert_eq!(set.backend(), "socket");
/// assert_eq!(set.get("port"), Some("4444"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    backend: String,
    values: BTreeMap<String, String>,
}

impl OptionSet {
    /// Empty set for `backend`
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            values: BTreeMap::new(),
        }
    }

    /// Add or replace an option
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Backend kind name
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Option keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Raw option value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(ChardevError::MissingOption(key))
    }

    /// Boolean option; accepts `on/off`, `yes/no`, `true/false`
    pub fn get_bool(&self, key: &'static str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some("on" | "yes" | "true") => Ok(Some(true)),
            Some("off" | "no" | "false") => Ok(Some(false)),
            Some(other) => Err(ChardevError::config(
                key,
                format!("'{other}' is not a boolean, use 'on' or 'off'"),
            )),
        }
    }

    /// Unsigned numeric option
    pub fn get_u64(&self, key: &'static str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ChardevError::config(key, format!("'{value}' is not a number"))),
        }
    }
}

impl FromStr for OptionSet {
    type Err = ChardevError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',');
        let backend = parts
            .next()
            .filter(|kind| !kind.is_empty() && !kind.contains('='))
            .ok_or_else(|| ChardevError::InvalidArgument("missing backend kind".into()))?;
        let mut set = OptionSet::new(backend);
        for part in parts {
            if part.is_empty() {
                continue;
            }
            set = match part.split_once('=') {
                Some((key, value)) => set.set(key, value),
                None => set.set(part, "on"),
            };
        }
        Ok(set)
    }
}
