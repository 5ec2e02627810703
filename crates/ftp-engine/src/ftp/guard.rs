//! Best-effort cleanup of sockets and listeners on failure.
//!
//! Every network resource the session owns implements [`Closable`], so the
//! guard closes them uniformly. "Already closed" conditions are swallowed;
//! anything else is recorded on the primary error as a [`CleanupError`].

use crate::ftp::error::{CleanupError, FtpError};
use crate::ftp::protocol::ControlChannel;
use async_trait::async_trait;
use log::debug;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// A network resource with an idempotent close.
#[async_trait]
pub trait Closable: Send {
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl Closable for TcpStream {
    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

#[async_trait]
impl Closable for TcpListener {
    /// The socket is released when the listener is dropped.
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Closable for ControlChannel {
    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// Whether `err` only says the resource was already gone.
fn already_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Close `resource`, treating "already closed" as success.
pub async fn free<C: Closable + ?Sized>(resource: &mut C) -> io::Result<()> {
    match resource.close().await {
        Err(e) if !already_closed(&e) => Err(e),
        _ => Ok(()),
    }
}

/// Collects the resources an operation has opened so far and releases
/// them all if the operation fails.
#[derive(Default)]
pub struct ResourceGuard {
    held: Vec<(&'static str, Box<dyn Closable>)>,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold<C: Closable + 'static>(&mut self, name: &'static str, resource: C) {
        self.held.push((name, Box::new(resource)));
    }

    pub fn hold_opt<C: Closable + 'static>(&mut self, name: &'static str, resource: Option<C>) {
        if let Some(r) = resource {
            self.hold(name, r);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Close and drop everything held, returning the close errors that
    /// were not "already closed".
    pub async fn release(&mut self) -> Vec<CleanupError> {
        let mut errors = Vec::new();
        for (name, mut resource) in self.held.drain(..) {
            if let Err(e) = free(resource.as_mut()).await {
                debug!("Closing {} failed: {}", name, e);
                errors.push(CleanupError {
                    resource: name.to_string(),
                    message: e.to_string(),
                });
            }
        }
        errors
    }

    /// Release everything and return `err` with the cleanup errors attached.
    pub async fn unwind(mut self, mut err: FtpError) -> FtpError {
        let cleanup = self.release().await;
        err.cleanup.extend(cleanup);
        err
    }
}
