//! **ftp-engine**: async FTP/FTPS client protocol engine.
//!
//! See [`ftp`] for the module map.

pub mod ftp;

pub use ftp::*;
