//! # ftp: FTP/FTPS client protocol engine
//!
//! Implementation of the FTP protocol (RFC 959) with extensions:
//! - **RFC 2228 / 4217**: AUTH TLS / FTPS (Explicit & Implicit)
//! - **RFC 3659**: MLST/MLSD, SIZE, MDTM, REST
//! - **RFC 2389**: FEAT negotiation
//! - **RFC 2428**: EPSV / EPRT (IPv6-ready)
//!
//! Architecture:
//! - `types`: configuration, replies, file records
//! - `error`: FTP-specific error type
//! - `commands`: command verbs and reply codes
//! - `lock`: FIFO serializer for control-channel transactions
//! - `protocol`: control channel and reply parser
//! - `features`: FEAT feature matrix
//! - `tls`: rustls connector and stream upgrades
//! - `guard`: best-effort cleanup of sockets on failure
//! - `transfer`: data channel negotiation (PASV/EPSV/PORT/EPRT) and streams
//! - `metadata`: MLST fact and MDTM timestamp parsing
//! - `parser`: Unix/Windows LIST line parsing
//! - `client`: session lifecycle (connect, close, stat, size, modified)
//! - `directory`: pwd, chdir, cdup, mkdir, rmdir, rm, rename
//! - `file_ops`: download, upload, listings

pub mod types;
pub mod error;
pub mod commands;
pub mod lock;
pub mod protocol;
pub mod features;
pub mod tls;
pub mod guard;
pub mod transfer;
pub mod metadata;
pub mod parser;
pub mod client;
pub mod directory;
pub mod file_ops;

pub use client::FtpClient;
pub use error::{CleanupError, FtpError, FtpErrorKind, FtpResult};
pub use features::{Feature, FeatureMatrix};
pub use transfer::TransferStream;
pub use types::*;
