//! Data-channel negotiation and the streaming transfer lifecycle.
//!
//! Passive mode (RFC 959 / RFC 2428):
//! - **EPSV** when the server advertises it, else **PASV**
//! - the reply is decoded by its code (227 or 229), not by the command
//!   sent, because some servers answer `PASV` with a 229
//!
//! Active mode:
//! - bind `active_ip:active_port`, announce it with **EPRT** when
//!   advertised, else **PORT**; the listener is accepted only after the
//!   transfer command has been acknowledged
//!
//! The data socket is TLS-wrapped (PROT P) with the session's connector
//! once it is connected, before it is handed out.

use crate::ftp::client::Session;
use crate::ftp::commands::{status, Command};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::guard::{free, Closable, ResourceGuard};
use crate::ftp::lock::SerializerGuard;
use crate::ftp::protocol::expect;
use crate::ftp::types::{ConnectionConfig, Reply, TransferMode};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

lazy_static! {
    static ref PASV_TUPLE: Regex =
        Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)").expect("valid PASV regex");
}

/// Plain or TLS-wrapped data socket.
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl DataStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for DataStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[async_trait]
impl Closable for DataStream {
    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

// ─── Reply decoding ──────────────────────────────────────────────────

/// Decode `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub fn parse_pasv(message: &str) -> FtpResult<(String, u16)> {
    let caps = PASV_TUPLE
        .captures(message)
        .ok_or_else(|| FtpError::malformed(format!("Cannot parse PASV reply: '{}'", message)))?;
    let mut n = [0u8; 6];
    for (i, slot) in n.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse()
            .map_err(|_| FtpError::malformed(format!("PASV field out of range: '{}'", message)))?;
    }
    let host = format!("{}.{}.{}.{}", n[0], n[1], n[2], n[3]);
    let port = u16::from(n[4]) * 256 + u16::from(n[5]);
    Ok((host, port))
}

/// Decode `229 Entering Extended Passive Mode (|||6446|)`.
///
/// The delimiter is whatever printable character opens the group; the
/// fields are address family, host and port. An empty host means the
/// control connection's host.
pub fn parse_epsv(message: &str, control_host: &str) -> FtpResult<(String, u16)> {
    let bad = || FtpError::malformed(format!("Cannot parse EPSV reply: '{}'", message));

    let open = message.find('(').ok_or_else(bad)?;
    let inner = &message[open + 1..];
    let close = inner.find(')').ok_or_else(bad)?;
    let inner = &inner[..close];

    let delim = inner.chars().next().ok_or_else(bad)?;
    if !('\x21'..='\x7e').contains(&delim) {
        return Err(bad());
    }
    let fields: Vec<&str> = inner.split(delim).collect();
    let [lead, family, host, port, tail] = fields.as_slice() else {
        return Err(bad());
    };
    if !lead.is_empty() || !tail.is_empty() || !family.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    if !host.bytes().all(|b| b.is_ascii_hexdigit() || b == b':' || b == b'.') {
        return Err(bad());
    }
    let port: u16 = port.parse().map_err(|_| bad())?;

    let host = if host.is_empty() { control_host } else { *host };
    Ok((host.to_string(), port))
}

/// Dispatch on the reply code: 227 is legacy, 229 is extended.
pub fn parse_passive_reply(reply: &Reply, control_host: &str) -> FtpResult<(String, u16)> {
    match reply.code {
        status::PASSIVE => parse_pasv(&reply.message),
        status::EXTENDED_PASSIVE => parse_epsv(&reply.message, control_host),
        _ => Err(FtpError::unexpected_reply(
            &[status::PASSIVE, status::EXTENDED_PASSIVE],
            reply.clone(),
        )),
    }
}

/// `EPRT |family|ip|port|` argument.
pub fn eprt_argument(ip: IpAddr, port: u16) -> String {
    let family = if ip.is_ipv6() { 2 } else { 1 };
    format!("|{}|{}|{}|", family, ip, port)
}

/// `PORT h1,h2,h3,h4,p1,p2` argument.
pub fn port_argument(ip: IpAddr, port: u16) -> FtpResult<String> {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            Ok(format!("{},{},{},{},{},{}", o[0], o[1], o[2], o[3], port >> 8, port & 0xff))
        }
        IpAddr::V6(_) => Err(FtpError::invalid_config("PORT cannot carry an IPv6 address")),
    }
}

// ─── Negotiator ──────────────────────────────────────────────────────

impl Session {
    /// Prepare a data connection: connected socket in passive mode, armed
    /// listener in active mode. Either one is stored on the session so a
    /// later failure can release it.
    pub(crate) async fn open_data(&mut self, config: &ConnectionConfig) -> FtpResult<()> {
        match config.mode {
            TransferMode::Passive => self.open_passive(config).await,
            TransferMode::Active => self.open_active(config).await,
        }
    }

    async fn open_passive(&mut self, config: &ConnectionConfig) -> FtpResult<()> {
        let reply = if self.features.epsv {
            debug!("[{}] Using extended passive mode", self.tag);
            self.execute(Command::Epsv, None).await?
        } else {
            debug!("[{}] Using legacy passive mode", self.tag);
            self.execute(Command::Pasv, None).await?
        };
        let (host, port) = parse_passive_reply(&reply, &config.host)?;

        let dur = Duration::from_secs(config.data_timeout_sec);
        let tcp = timeout(dur, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| FtpError::timeout(format!("Data connect to {}:{} timed out", host, port)))?
            .map_err(|e| FtpError::data_channel(format!("Data connect to {}:{}: {}", host, port, e)))?;
        tcp.set_nodelay(true).ok();
        self.data = Some(tcp);
        Ok(())
    }

    async fn open_active(&mut self, config: &ConnectionConfig) -> FtpResult<()> {
        let ip: IpAddr = config.active_ip.parse().map_err(|_| {
            FtpError::invalid_config(format!("Invalid active-mode address '{}'", config.active_ip))
        })?;
        let ipv6 = config.active_ipv6 || ip.is_ipv6();
        if ipv6 && !self.features.eprt {
            return Err(FtpError::invalid_config(
                "IPv6 active mode requires EPRT, which the server does not advertise",
            ));
        }

        let listener = TcpListener::bind((ip, config.active_port))
            .await
            .map_err(|e| FtpError::data_channel(format!("Active bind {}:{}: {}", ip, config.active_port, e)))?;
        let local = listener.local_addr()?;
        self.listener = Some(listener);

        let reply = if self.features.eprt {
            debug!("[{}] Using extended active mode on {}", self.tag, local);
            let arg = eprt_argument(local.ip(), local.port());
            self.execute(Command::Eprt, Some(&arg)).await?
        } else {
            debug!("[{}] Using legacy active mode on {}", self.tag, local);
            let arg = port_argument(local.ip(), local.port())?;
            self.execute(Command::Port, Some(&arg)).await?
        };
        expect(reply, &[status::OK])?;
        Ok(())
    }

    /// Turn the pending data connection into a usable stream: accept the
    /// server's connection in active mode (dropping the listener), then
    /// apply TLS when the session is secured.
    pub(crate) async fn finalize_data(&mut self, config: &ConnectionConfig) -> FtpResult<DataStream> {
        let tcp = match (self.data.take(), self.listener.take()) {
            (Some(tcp), listener) => {
                drop(listener);
                tcp
            }
            (None, Some(listener)) => {
                let dur = Duration::from_secs(config.data_timeout_sec);
                let accepted = timeout(dur, listener.accept()).await;
                drop(listener);
                let (tcp, peer) = accepted
                    .map_err(|_| FtpError::timeout("Timed out waiting for the server's data connection"))?
                    .map_err(|e| FtpError::data_channel(format!("Active accept: {}", e)))?;
                debug!("[{}] Accepted data connection from {}", self.tag, peer);
                tcp
            }
            (None, None) => return Err(FtpError::data_channel("No data connection was negotiated")),
        };

        match &self.tls {
            Some(tls) => Ok(DataStream::Tls(Box::new(tls.wrap(tcp).await?))),
            None => Ok(DataStream::Plain(tcp)),
        }
    }

    /// Release any pending data socket or listener and attach the close
    /// errors to `err`.
    pub(crate) async fn unwind(&mut self, err: FtpError) -> FtpError {
        let mut guard = ResourceGuard::new();
        guard.hold_opt("data", self.data.take());
        guard.hold_opt("listener", self.listener.take());
        guard.unwind(err).await
    }

    /// Steps shared by every data operation: negotiate, optionally send a
    /// preparatory command (ALLO), send the transfer command, expect
    /// 125/150 and finalize the data connection.
    pub(crate) async fn begin_transfer(
        &mut self,
        config: &ConnectionConfig,
        prelude: Option<(Command, String)>,
        cmd: Command,
        arg: Option<&str>,
    ) -> FtpResult<DataStream> {
        match self.try_begin_transfer(config, prelude, cmd, arg).await {
            Ok(stream) => Ok(stream),
            Err(e) => Err(self.unwind(e).await),
        }
    }

    async fn try_begin_transfer(
        &mut self,
        config: &ConnectionConfig,
        prelude: Option<(Command, String)>,
        cmd: Command,
        arg: Option<&str>,
    ) -> FtpResult<DataStream> {
        self.open_data(config).await?;

        if let Some((pre, pre_arg)) = prelude {
            let reply = self.execute(pre, Some(&pre_arg)).await?;
            expect(reply, &[status::OK, status::NOT_IMPLEMENTED_SUPERFLUOUS])?;
        }

        let reply = self.execute(cmd, arg).await?;
        expect(
            reply,
            &[status::START_TRANSFER_CONNECTION, status::STARTING_TRANSFER],
        )?;

        // The server has accepted the transfer, so it owes a closing reply
        // even if the data connection never comes up.
        match self.finalize_data(config).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.pending_completion = true;
                Err(e)
            }
        }
    }

    /// Close the data stream and wait for the 226 that ends the transfer.
    pub(crate) async fn complete_transfer(&mut self, data: Option<DataStream>) -> FtpResult<()> {
        if let Some(mut data) = data {
            if let Err(e) = free(&mut data).await {
                debug!("[{}] Closing data connection: {}", self.tag, e);
            }
        }
        let reply = self.read_reply().await?;
        expect(reply, &[status::DATA_CLOSE])?;
        Ok(())
    }
}

// ─── Streaming handle ────────────────────────────────────────────────

/// An open download or upload.
///
/// Holds the session lock until [`TransferStream::finalize`] reads the
/// closing `226`. Dropping it unfinalized closes the data socket and
/// leaves the closing reply to be drained by the next operation.
pub struct TransferStream {
    session: SerializerGuard<Session>,
    data: Option<DataStream>,
    finished: bool,
}

impl TransferStream {
    pub(crate) fn new(session: SerializerGuard<Session>, data: DataStream) -> Self {
        Self {
            session,
            data: Some(data),
            finished: false,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.data.as_ref().map(DataStream::is_secure).unwrap_or(false)
    }

    /// Close the data connection, confirm completion (226) and release
    /// the session lock.
    pub async fn finalize(mut self) -> FtpResult<()> {
        self.finished = true;
        let data = self.data.take();
        self.session.complete_transfer(data).await
    }
}

impl Drop for TransferStream {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "[{}] Transfer stream dropped without finalize; completion reply left pending",
                self.session.tag
            );
            self.data.take();
            self.session.pending_completion = true;
        }
    }
}

impl AsyncRead for TransferStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().data.as_mut() {
            Some(d) => Pin::new(d).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for TransferStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut().data.as_mut() {
            Some(d) => Pin::new(d).poll_write(cx, buf),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().data.as_mut() {
            Some(d) => Pin::new(d).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().data.as_mut() {
            Some(d) => Pin::new(d).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn pasv_tuple() {
        let (host, port) = parse_pasv("Entering Passive Mode (192,168,1,10,195,80).").unwrap();
        assert_eq!(host, "192.168.1.10");
        assert_eq!(port, 195 * 256 + 80);
    }

    #[test]
    fn pasv_without_parentheses() {
        let (host, port) = parse_pasv("Entering Passive Mode 10,0,0,1,4,1").unwrap();
        assert_eq!((host.as_str(), port), ("10.0.0.1", 1025));
    }

    #[test]
    fn pasv_out_of_range_is_malformed() {
        let err = parse_pasv("(300,0,0,1,4,1)").unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::MalformedReply);
        assert!(parse_pasv("no tuple here").is_err());
    }

    #[test]
    fn epsv_reuses_control_host() {
        let (host, port) = parse_epsv("Entering Extended Passive Mode (|||6446|)", "ftp.example.com").unwrap();
        assert_eq!(host, "ftp.example.com");
        assert_eq!(port, 6446);
    }

    #[test]
    fn epsv_other_delimiter_and_explicit_host() {
        let (host, port) = parse_epsv("Ok (!2!::1!2121!)", "h").unwrap();
        assert_eq!((host.as_str(), port), ("::1", 2121));
    }

    #[test]
    fn epsv_rejects_bad_shapes() {
        for bad in ["(|||6446)", "(||6446|)", "(|||x|)", "no parens", "(|||70000|)", "( || |1| )"] {
            assert!(parse_epsv(bad, "h").is_err(), "{}", bad);
        }
    }

    #[test]
    fn passive_reply_dispatches_on_code() {
        let legacy = Reply::new(227, "Entering Passive Mode (127,0,0,1,0,21)");
        let extended = Reply::new(229, "Entering Extended Passive Mode (|||21|)");
        assert_eq!(parse_passive_reply(&legacy, "127.0.0.1").unwrap(), ("127.0.0.1".to_string(), 21));
        assert_eq!(parse_passive_reply(&extended, "127.0.0.1").unwrap(), ("127.0.0.1".to_string(), 21));
        let err = parse_passive_reply(&Reply::new(500, "no"), "h").unwrap_err();
        assert_eq!(err.code(), Some(500));
    }

    #[test]
    fn active_arguments() {
        let v4 = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(eprt_argument(v4, 2020), "|1|127.0.0.1|2020|");
        assert_eq!(port_argument(v4, 2020).unwrap(), "127,0,0,1,7,228");
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(eprt_argument(v6, 20), "|2|::1|20|");
        assert!(port_argument(v6, 20).is_err());
    }
}
