//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ftp::types::Reply;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// The reply that triggered the error, if any.
    pub reply: Option<Reply>,
    /// Secondary errors hit while force-closing sockets during unwind.
    #[serde(default)]
    pub cleanup: Vec<CleanupError>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// Operation attempted before `connect` or after `close`.
    NotConnected,
    /// `connect` called on a live session.
    AlreadyConnected,
    /// Server answered with a code the protocol step does not allow.
    UnexpectedReply,
    /// The server does not advertise a feature the operation needs.
    MissingCapability,
    /// A reply payload could not be decoded (PASV tuple, MLST fact, MDTM…).
    MalformedReply,
    /// TCP / DNS resolution failure on the control channel.
    ConnectionFailed,
    /// TLS configuration or handshake failure.
    TlsFailed,
    /// Data channel could not be established.
    DataChannelFailed,
    /// Server closed the control connection.
    Disconnected,
    /// Network wait exceeded its deadline.
    Timeout,
    /// Local I/O failure on a socket.
    Io,
    /// Invalid configuration or parameter.
    InvalidConfig,
}

/// An error collected while closing a resource during failure unwind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupError {
    /// Which resource failed to close (`data`, `listener`, `control`).
    pub resource: String,
    pub message: String,
}

impl fmt::Display for CleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            reply: None,
            cleanup: Vec::new(),
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Reply code that triggered the error, if any.
    pub fn code(&self) -> Option<u16> {
        self.reply.as_ref().map(|r| r.code)
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn not_connected() -> Self {
        Self::new(FtpErrorKind::NotConnected, "Connection not initialized")
    }

    pub fn already_connected() -> Self {
        Self::new(FtpErrorKind::AlreadyConnected, "Client is already connected")
    }

    /// `expected` lists the codes the step would have accepted.
    pub fn unexpected_reply(expected: &[u16], reply: Reply) -> Self {
        let wanted = expected
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::new(
            FtpErrorKind::UnexpectedReply,
            format!("Expected {}, got {} {}", wanted, reply.code, reply.message),
        )
        .with_reply(reply)
    }

    pub fn missing_capability(feature: impl fmt::Display) -> Self {
        Self::new(
            FtpErrorKind::MissingCapability,
            format!("Feature {} is not implemented by the FTP server", feature),
        )
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::MalformedReply, msg)
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Io, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)?,
            None => write!(f, "[FTP {:?}] {}", self.kind, self.message)?,
        }
        if !self.cleanup.is_empty() {
            let extra = self
                .cleanup
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            write!(f, " (cleanup: {})", extra)?;
        }
        Ok(())
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            _ => Self::io_error(e.to_string()),
        }
    }
}

impl From<FtpError> for String {
    fn from(e: FtpError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_reply_keeps_code() {
        let err = FtpError::unexpected_reply(&[125, 150], Reply::new(552, "Disk full"));
        assert_eq!(err.kind, FtpErrorKind::UnexpectedReply);
        assert_eq!(err.code(), Some(552));
        assert!(err.message.contains("125/150"));
        assert_eq!(err.to_string(), "[FTP UnexpectedReply 552] Expected 125/150, got 552 Disk full");
    }

    #[test]
    fn display_lists_cleanup_errors() {
        let mut err = FtpError::unexpected_reply(&[200], Reply::new(500, "nope"));
        err.cleanup.push(CleanupError {
            resource: "listener".into(),
            message: "boom".into(),
        });
        assert!(err.to_string().ends_with("(cleanup: listener: boom)"));
    }

    #[test]
    fn io_timeout_maps_to_timeout() {
        let err: FtpError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(err.kind, FtpErrorKind::Timeout);
        let err: FtpError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.kind, FtpErrorKind::Io);
        assert_eq!(err.code(), None);
    }
}
