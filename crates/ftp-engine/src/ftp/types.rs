//! Shared types for the FTP engine.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::ftp::error::{FtpError, FtpResult};

// ─── Connection / Session ────────────────────────────────────────────

/// Which side opens the data connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TransferMode {
    /// The server listens, the client connects (PASV / EPSV).
    #[default]
    Passive,
    /// The client listens, the server connects (PORT / EPRT).
    Active,
}

/// TLS settings for FTPS (user-supplied, every field optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptionsInput {
    /// Name checked against the server certificate.
    #[serde(default)]
    pub hostname: Option<String>,
    /// PEM-encoded trust anchors.
    #[serde(default)]
    pub ca_certs: Option<Vec<String>>,
    /// TLS from the first byte (port 990 style) instead of `AUTH TLS`.
    #[serde(default)]
    pub implicit: Option<bool>,
    #[serde(default)]
    pub accept_invalid_certs: Option<bool>,
}

/// User-supplied connection options. Omitted fields fall back to defaults
/// in [`ConnectionConfig::resolve`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpOptions {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub mode: Option<TransferMode>,
    #[serde(default)]
    pub active_ip: Option<String>,
    #[serde(default)]
    pub active_port: Option<u16>,
    #[serde(default)]
    pub active_ipv6: Option<bool>,
    /// Presence requests FTPS.
    #[serde(default, alias = "tlsOpts")]
    pub tls: Option<TlsOptionsInput>,
    #[serde(default)]
    pub connect_timeout_sec: Option<u64>,
    #[serde(default)]
    pub data_timeout_sec: Option<u64>,
}

impl FtpOptions {
    /// Parse an options document, e.g. `{"user":"bob","mode":"active"}`.
    pub fn from_json(raw: &str) -> FtpResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| FtpError::invalid_config(format!("Invalid FTP options: {}", e)))
    }
}

/// Resolved TLS settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    pub hostname: String,
    pub ca_certs: Vec<String>,
    pub implicit: bool,
    pub accept_invalid_certs: bool,
}

/// Resolved configuration for one FTP session. Immutable after connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub mode: TransferMode,
    /// Local address to listen on for active-mode data connections.
    pub active_ip: String,
    /// Local port for active mode (0 lets the OS pick one).
    pub active_port: u16,
    /// Advertise the active-mode address as IPv6 (requires EPRT).
    pub active_ipv6: bool,
    pub tls: Option<TlsOptions>,
    /// Control connection timeout in seconds.
    pub connect_timeout_sec: u64,
    /// Data connection (connect / accept) timeout in seconds.
    pub data_timeout_sec: u64,
}

pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_ACTIVE_PORT: u16 = 20;
pub const DEFAULT_ACTIVE_IP: &str = "127.0.0.1";
const ANONYMOUS: &str = "anonymous";

fn default_connect_timeout() -> u64 {
    15
}
fn default_data_timeout() -> u64 {
    30
}

impl ConnectionConfig {
    /// Merge user-supplied options over the defaults.
    pub fn resolve(host: impl Into<String>, opts: Option<FtpOptions>) -> Self {
        let host = host.into();
        let opts = opts.unwrap_or_default();
        let tls = opts.tls.map(|t| TlsOptions {
            hostname: t.hostname.unwrap_or_else(|| host.clone()),
            ca_certs: t.ca_certs.unwrap_or_default(),
            implicit: t.implicit.unwrap_or(false),
            accept_invalid_certs: t.accept_invalid_certs.unwrap_or(false),
        });
        Self {
            port: opts.port.unwrap_or(DEFAULT_PORT),
            user: opts.user.unwrap_or_else(|| ANONYMOUS.into()),
            pass: opts.pass.unwrap_or_else(|| ANONYMOUS.into()),
            mode: opts.mode.unwrap_or_default(),
            active_ip: opts.active_ip.unwrap_or_else(|| DEFAULT_ACTIVE_IP.into()),
            active_port: opts.active_port.unwrap_or(DEFAULT_ACTIVE_PORT),
            active_ipv6: opts.active_ipv6.unwrap_or(false),
            tls,
            connect_timeout_sec: opts.connect_timeout_sec.unwrap_or_else(default_connect_timeout),
            data_timeout_sec: opts.data_timeout_sec.unwrap_or_else(default_data_timeout),
            host,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn implicit_tls(&self) -> bool {
        self.tls.as_ref().map(|t| t.implicit).unwrap_or(false)
    }
}

// ─── FTP Reply ───────────────────────────────────────────────────────

/// A single FTP reply (possibly assembled from several lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub code: u16,
    /// Reply text; continuation lines are joined with CRLF.
    pub message: String,
}

impl Reply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Message lines, CRLF-split.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.message.split("\r\n")
    }
}

// ─── File metadata ───────────────────────────────────────────────────

/// Metadata for one remote path, from MLST/MLSD facts, LIST output or a
/// SIZE + MDTM pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mtime: Option<DateTime<Local>>,
    pub ctime: Option<DateTime<Local>>,
    /// RFC 3659 `perm` fact, verbatim.
    pub permissions: Option<String>,
    pub language: Option<String>,
    pub media_type: Option<String>,
    pub charset: Option<String>,
    pub unix_mode: Option<u32>,
    pub unix_uid: Option<u32>,
    pub unix_gid: Option<u32>,
    /// Raw `type` fact (`file`, `dir`, `cdir`, `pdir`, `OS.unix=…`).
    pub fact_type: Option<String>,
}

impl Default for FileRecord {
    fn default() -> Self {
        Self {
            is_file: true,
            is_directory: false,
            is_symlink: false,
            size: 0,
            mtime: None,
            ctime: None,
            permissions: None,
            language: None,
            media_type: None,
            charset: None,
            unix_mode: None,
            unix_uid: None,
            unix_gid: None,
            fact_type: None,
        }
    }
}

impl FileRecord {
    pub(crate) fn directory() -> Self {
        Self {
            is_file: false,
            is_directory: true,
            ..Self::default()
        }
    }
}
