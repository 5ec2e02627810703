//! Control channel and reply parser (RFC 959 §4).
//!
//! Handles:
//! - Sending commands terminated with `\r\n`
//! - Reading single-line and multi-line replies
//! - Parsing the 3-digit reply code
//! - Swapping the socket for its TLS-upgraded counterpart

use crate::ftp::commands::Command;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::tls::FtpTls;
use crate::ftp::types::{ConnectionConfig, Reply};
use log::trace;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

// ─── Reply parser ────────────────────────────────────────────────────

/// Read one complete reply from a line-buffered stream.
///
/// A line whose fourth byte is `-` opens a multi-line reply, which runs
/// until a line starting with the same code followed by a space:
/// ```text
/// 150-a
/// 150-b
/// 150 c
/// ```
/// yields `150` / `"a\r\nb\r\nc"`. The code prefix is stripped from the
/// first and last lines, and from continuation lines that repeat it.
pub async fn read_reply<R>(reader: &mut R) -> FtpResult<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let first = read_line(reader).await?;
    let code = parse_code(&first)?;

    if first.as_bytes().get(3) != Some(&b'-') {
        return Ok(Reply::new(code, first.get(4..).unwrap_or("")));
    }

    let terminator = format!("{} ", &first[..3]);
    let continuation = format!("{}-", &first[..3]);
    let mut lines = vec![first[4..].to_string()];
    loop {
        let line = read_line(reader).await?;
        if line.starts_with(&terminator) {
            lines.push(line[4..].to_string());
            break;
        }
        lines.push(line.strip_prefix(&continuation).unwrap_or(&line).to_string());
    }

    Ok(Reply::new(code, lines.join("\r\n")))
}

/// Read a single line, without its CRLF.
async fn read_line<R>(reader: &mut R) -> FtpResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(FtpError::disconnected("Server closed connection"));
    }
    while matches!(buf.last(), Some(&b'\n') | Some(&b'\r')) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line.as_bytes().get(..3).ok_or_else(|| {
        FtpError::malformed(format!("Reply too short to contain a code: '{}'", line))
    })?;
    if !digits.iter().all(u8::is_ascii_digit) || !(b'1'..=b'5').contains(&digits[0]) {
        return Err(FtpError::malformed(format!("Invalid reply code in: '{}'", line)));
    }
    Ok(digits
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
}

/// Accept `reply` if its code is one of `codes`.
pub fn expect(reply: Reply, codes: &[u16]) -> FtpResult<Reply> {
    if codes.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(FtpError::unexpected_reply(codes, reply))
    }
}

// ─── Control channel ─────────────────────────────────────────────────

/// Plain or TLS-wrapped control socket.
pub(crate) enum ControlStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    /// Transient state while the socket is handed to the TLS handshake.
    Detached,
}

/// The control connection: one ordered command/reply stream.
pub struct ControlChannel {
    pub(crate) stream: ControlStream,
    tag: String,
}

impl ControlChannel {
    /// Open the TCP control socket, wrapping it in TLS straight away for
    /// implicit FTPS. The greeting is left unread.
    pub async fn open(config: &ConnectionConfig, tls: Option<&FtpTls>, tag: &str) -> FtpResult<Self> {
        let addr = config.address();
        let dur = Duration::from_secs(config.connect_timeout_sec);

        let tcp = timeout(dur, TcpStream::connect(&addr))
            .await
            .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
            .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true).ok();

        let stream = match tls {
            Some(tls) if config.implicit_tls() => {
                let secured = tls.wrap(tcp).await?;
                ControlStream::Tls(Box::new(BufReader::new(secured)))
            }
            _ => ControlStream::Plain(BufReader::new(tcp)),
        };

        Ok(Self {
            stream,
            tag: tag.to_string(),
        })
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.stream, ControlStream::Tls(_))
    }

    /// Write one command line.
    pub async fn send(&mut self, cmd: Command, args: Option<&str>) -> FtpResult<()> {
        let line = cmd.encode(args);
        match &mut self.stream {
            ControlStream::Plain(s) => {
                s.get_mut().write_all(line.as_bytes()).await?;
                s.get_mut().flush().await?;
            }
            ControlStream::Tls(s) => {
                s.get_mut().write_all(line.as_bytes()).await?;
                s.get_mut().flush().await?;
            }
            ControlStream::Detached => return Err(FtpError::not_connected()),
        }
        if cmd == Command::Pass {
            trace!("[{}] >>> PASS ****", self.tag);
        } else {
            trace!("[{}] >>> {}", self.tag, line.trim_end());
        }
        Ok(())
    }

    /// Read the next reply.
    pub async fn read_reply(&mut self) -> FtpResult<Reply> {
        let reply = match &mut self.stream {
            ControlStream::Plain(s) => read_reply(s).await?,
            ControlStream::Tls(s) => read_reply(&mut **s).await?,
            ControlStream::Detached => return Err(FtpError::not_connected()),
        };
        trace!("[{}] <<< {} {}", self.tag, reply.code, reply.message);
        Ok(reply)
    }

    /// One transaction: send a command and read its reply.
    pub async fn execute(&mut self, cmd: Command, args: Option<&str>) -> FtpResult<Reply> {
        self.send(cmd, args).await?;
        self.read_reply().await
    }

    /// Replace the plain socket with its TLS-upgraded counterpart.
    pub async fn secure(&mut self, tls: &FtpTls) -> FtpResult<()> {
        let tcp = match std::mem::replace(&mut self.stream, ControlStream::Detached) {
            ControlStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(FtpError::tls_failed("Control connection is not a plain socket"));
            }
        };
        let secured = tls.wrap(tcp).await?;
        self.stream = ControlStream::Tls(Box::new(BufReader::new(secured)));
        Ok(())
    }

    /// Shut the socket down. Safe to call on an already-closed channel.
    pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
        match std::mem::replace(&mut self.stream, ControlStream::Detached) {
            ControlStream::Plain(mut s) => s.get_mut().shutdown().await,
            ControlStream::Tls(mut s) => s.get_mut().shutdown().await,
            ControlStream::Detached => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;

    async fn parse(raw: &str) -> FtpResult<Reply> {
        let mut reader = raw.as_bytes();
        read_reply(&mut reader).await
    }

    #[tokio::test]
    async fn single_line_reply() {
        let r = parse("220 Service ready\r\n").await.unwrap();
        assert_eq!(r, Reply::new(220, "Service ready"));
    }

    #[tokio::test]
    async fn single_line_without_text() {
        let r = parse("200\r\n").await.unwrap();
        assert_eq!(r, Reply::new(200, ""));
    }

    #[tokio::test]
    async fn multi_line_reply() {
        let r = parse("150-a\r\n150-b\r\n150 c\r\n").await.unwrap();
        assert_eq!(r.code, 150);
        assert_eq!(r.message, "a\r\nb\r\nc");
    }

    #[tokio::test]
    async fn multi_line_keeps_unprefixed_lines() {
        let raw = "211-Features:\r\n EPSV\r\n MLST type*;size*;\r\n211 End\r\n";
        let r = parse(raw).await.unwrap();
        assert_eq!(r.code, 211);
        assert_eq!(r.message, "Features:\r\n EPSV\r\n MLST type*;size*;\r\nEnd");
    }

    #[tokio::test]
    async fn other_code_does_not_terminate() {
        let raw = "220-Welcome\r\n230 not the end\r\n220 Ready\r\n";
        let r = parse(raw).await.unwrap();
        assert_eq!(r.code, 220);
        assert_eq!(r.message, "Welcome\r\n230 not the end\r\nReady");
    }

    #[tokio::test]
    async fn consecutive_replies_stay_in_sync() {
        let mut reader = "331-Need\r\n331 password\r\n230 Logged in\r\n".as_bytes();
        let a = read_reply(&mut reader).await.unwrap();
        let b = read_reply(&mut reader).await.unwrap();
        assert_eq!(a, Reply::new(331, "Need\r\npassword"));
        assert_eq!(b, Reply::new(230, "Logged in"));
    }

    #[tokio::test]
    async fn bare_lf_line_endings() {
        let r = parse("250 ok\n").await.unwrap();
        assert_eq!(r, Reply::new(250, "ok"));
    }

    #[tokio::test]
    async fn garbage_code_is_malformed() {
        let err = parse("abc hello\r\n").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::MalformedReply);
        let err = parse("99\r\n").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::MalformedReply);
        let err = parse("650 out of range\r\n").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::MalformedReply);
    }

    #[tokio::test]
    async fn eof_is_disconnect() {
        let err = parse("").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::Disconnected);
        let err = parse("226-partial\r\n").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::Disconnected);
    }

    #[test]
    fn expect_checks_code() {
        assert!(expect(Reply::new(200, "ok"), &[200, 202]).is_ok());
        let err = expect(Reply::new(500, "bad"), &[200]).unwrap_err();
        assert_eq!(err.code(), Some(500));
    }
}
