//! Stateful FTP client: owns the session behind a FIFO serializer.
//!
//! Lifecycle: `connect()` → greeting → FEAT → optional TLS upgrade
//! (AUTH TLS, PBSZ, PROT) → USER/PASS → TYPE I.
//!
//! Every public operation takes the serializer first and releases it on
//! every exit path by dropping the guard. `directory.rs` and `file_ops.rs`
//! add the higher-level operations.

use crate::ftp::commands::{status, Command, TYPE_BINARY};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::features::{Feature, FeatureMatrix};
use crate::ftp::guard::ResourceGuard;
use crate::ftp::lock::{Serializer, SerializerGuard};
use crate::ftp::metadata::{parse_mdtm, parse_mlst};
use crate::ftp::protocol::{expect, ControlChannel};
use crate::ftp::tls::FtpTls;
use crate::ftp::types::*;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// Mutable state of one control connection. Only reachable through the
/// serializer.
pub(crate) struct Session {
    pub(crate) tag: String,
    pub(crate) control: Option<ControlChannel>,
    pub(crate) tls: Option<FtpTls>,
    pub(crate) features: FeatureMatrix,
    pub(crate) welcome: Option<String>,
    /// Passive-mode data socket waiting for its transfer command.
    pub(crate) data: Option<TcpStream>,
    /// Active-mode listener waiting for the server to connect.
    pub(crate) listener: Option<TcpListener>,
    /// A transfer's closing reply is still unread: its stream was dropped
    /// unfinalized, or its data connection failed after 125/150.
    pub(crate) pending_completion: bool,
}

impl Session {
    fn new(tag: String) -> Self {
        Self {
            tag,
            control: None,
            tls: None,
            features: FeatureMatrix::default(),
            welcome: None,
            data: None,
            listener: None,
            pending_completion: false,
        }
    }

    pub(crate) fn control(&mut self) -> FtpResult<&mut ControlChannel> {
        self.control.as_mut().ok_or_else(FtpError::not_connected)
    }

    pub(crate) async fn execute(&mut self, cmd: Command, args: Option<&str>) -> FtpResult<Reply> {
        self.control()?.execute(cmd, args).await
    }

    pub(crate) async fn read_reply(&mut self) -> FtpResult<Reply> {
        self.control()?.read_reply().await
    }

    /// Send `cmd` and require one of `codes`.
    pub(crate) async fn command(&mut self, cmd: Command, args: Option<&str>, codes: &[u16]) -> FtpResult<Reply> {
        let reply = self.execute(cmd, args).await?;
        expect(reply, codes)
    }

    /// Read the closing reply of a transfer that never reached its finalize
    /// step.
    async fn drain_pending(&mut self) -> FtpResult<()> {
        if !self.pending_completion {
            return Ok(());
        }
        self.pending_completion = false;
        let mut reply = self.read_reply().await?;
        while reply.is_preliminary() {
            reply = self.read_reply().await?;
        }
        match reply.code {
            status::DATA_CLOSE => {}
            status::CANT_OPEN_DATA | status::TRANSFER_ABORTED | status::FILE_UNAVAILABLE => debug!(
                "[{}] Abandoned transfer failed on the server: {} {}",
                self.tag, reply.code, reply.message
            ),
            _ if reply.is_completion() => {}
            _ => warn!(
                "[{}] Abandoned transfer ended with {} {}",
                self.tag, reply.code, reply.message
            ),
        }
        Ok(())
    }

    /// Hand every socket the session owns to a guard, resetting the
    /// session to its unconnected state.
    fn take_resources(&mut self) -> ResourceGuard {
        let mut guard = ResourceGuard::new();
        guard.hold_opt("data", self.data.take());
        guard.hold_opt("listener", self.listener.take());
        guard.hold_opt("control", self.control.take());
        self.tls = None;
        self.features = FeatureMatrix::default();
        self.welcome = None;
        self.pending_completion = false;
        guard
    }
}

/// An FTP client. Methods take `&self`; concurrent calls are queued in
/// call order.
pub struct FtpClient {
    pub id: String,
    config: ConnectionConfig,
    session: Serializer<Session>,
}

impl FtpClient {
    /// Build an unconnected client; omitted options take their defaults.
    pub fn new(host: impl Into<String>, options: Option<FtpOptions>) -> Self {
        Self::from_config(ConnectionConfig::resolve(host, options))
    }

    pub fn from_config(config: ConnectionConfig) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            session: Serializer::new(Session::new(id.clone())),
            id,
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Take the serializer and check the session is usable.
    pub(crate) async fn session(&self) -> FtpResult<SerializerGuard<Session>> {
        let mut session = self.session.acquire().await;
        if session.control.is_none() {
            return Err(FtpError::not_connected());
        }
        session.drain_pending().await?;
        Ok(session)
    }

    // ── Connect / close ──────────────────────────────────────────

    /// Open the control connection and run the bootstrap sequence.
    /// On failure every socket opened so far is closed before the error
    /// is returned.
    pub async fn connect(&self) -> FtpResult<()> {
        let mut session = self.session.acquire().await;
        if session.control.is_some() {
            return Err(FtpError::already_connected());
        }

        info!("[{}] Connecting to {}", self.id, self.config.address());
        match self.bootstrap(&mut session).await {
            Ok(()) => {
                info!(
                    "[{}] Connected to {} as {}{}",
                    self.id,
                    self.config.address(),
                    self.config.user,
                    if session.tls.is_some() { " (TLS)" } else { "" }
                );
                Ok(())
            }
            Err(e) => {
                warn!("[{}] Connect failed: {}", self.id, e);
                Err(session.take_resources().unwind(e).await)
            }
        }
    }

    async fn bootstrap(&self, session: &mut Session) -> FtpResult<()> {
        let config = &self.config;
        let tls = config.tls.as_ref().map(FtpTls::from_options).transpose()?;

        session.control = Some(ControlChannel::open(config, tls.as_ref(), &self.id).await?);
        session.tls = tls.clone();

        let greeting = expect(session.read_reply().await?, &[status::READY])?;
        session.welcome = Some(greeting.message);

        let feat = session.execute(Command::Feat, None).await?;
        session.features = FeatureMatrix::from_reply(&feat);
        debug!(
            "[{}] Server features: {}",
            self.id,
            session.features.raw.join(", ")
        );

        if let Some(tls) = &tls {
            if !config.implicit_tls() {
                if !session.features.auth_tls() {
                    warn!("[{}] Server does not advertise AUTH TLS; trying anyway", self.id);
                }
                session
                    .command(Command::Auth, Some("TLS"), &[status::AUTH_PROCEED])
                    .await?;
                session.control()?.secure(tls).await?;
            }
            if !session.features.supports(Feature::Prot) {
                debug!("[{}] PROT not advertised; sending it anyway", self.id);
            }
            session.command(Command::Pbsz, Some("0"), &[status::OK]).await?;
            session.command(Command::Prot, Some("P"), &[status::OK]).await?;
        }

        let user = session.execute(Command::User, Some(config.user.as_str())).await?;
        if user.code != status::LOGGED_IN {
            expect(user, &[status::NEED_PASS])?;
            session
                .command(Command::Pass, Some(config.pass.as_str()), &[status::LOGGED_IN])
                .await?;
        }

        session
            .command(Command::Type, Some(TYPE_BINARY), &[status::OK])
            .await?;
        Ok(())
    }

    /// Say goodbye and drop every socket. A no-op when not connected.
    pub async fn close(&self) -> FtpResult<()> {
        let mut session = self.session.acquire().await;
        if session.control.is_none() {
            return Ok(());
        }

        let quit = match session.drain_pending().await {
            Ok(()) => session.execute(Command::Quit, None).await,
            Err(e) => Err(e),
        };
        match quit {
            Ok(r) if r.code == status::CLOSING => {}
            Ok(r) => debug!("[{}] QUIT answered {} {}", self.id, r.code, r.message),
            Err(e) => debug!("[{}] QUIT failed: {}", self.id, e),
        }

        let errors = session.take_resources().release().await;
        for e in &errors {
            warn!("[{}] Closing {}", self.id, e);
        }
        info!("[{}] Disconnected from {}", self.id, self.config.address());
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.session.acquire().await.control.is_some()
    }

    /// Greeting text sent by the server on connect.
    pub async fn welcome(&self) -> Option<String> {
        self.session.acquire().await.welcome.clone()
    }

    /// The feature matrix discovered at connect.
    pub async fn features(&self) -> FeatureMatrix {
        self.session.acquire().await.features.clone()
    }

    pub async fn noop(&self) -> FtpResult<()> {
        let mut session = self.session().await?;
        session.command(Command::Noop, None, &[status::OK]).await?;
        Ok(())
    }

    // ── Metadata ─────────────────────────────────────────────────

    /// File size in bytes (SIZE).
    pub async fn size(&self, path: &str) -> FtpResult<u64> {
        let mut session = self.session().await?;
        let reply = session
            .command(Command::Size, Some(path), &[status::FILE_STAT])
            .await?;
        parse_size(&reply)
    }

    /// Last modification time (MDTM).
    pub async fn modified(&self, path: &str) -> FtpResult<chrono::DateTime<chrono::Local>> {
        let mut session = self.session().await?;
        if !session.features.supports(Feature::Mdtm) {
            return Err(FtpError::missing_capability(Feature::Mdtm));
        }
        let reply = session
            .command(Command::Mdtm, Some(path), &[status::FILE_STAT])
            .await?;
        parse_mdtm(&reply.message)
    }

    /// Metadata for one path: MLST when advertised, otherwise SIZE + MDTM,
    /// where a 550 on SIZE means the path is a directory.
    pub async fn stat(&self, path: &str) -> FtpResult<FileRecord> {
        let mut session = self.session().await?;

        if session.features.supports(Feature::Mlst) {
            let reply = session
                .command(Command::Mlst, Some(path), &[status::ACTION_OK])
                .await?;
            let entry = reply
                .lines()
                .nth(1)
                .ok_or_else(|| FtpError::malformed("MLST reply has no entry line").with_reply(reply.clone()))?;
            let (_, record) = parse_mlst(entry.trim_start())?;
            return Ok(record);
        }

        let reply = session.execute(Command::Size, Some(path)).await?;
        if reply.code == status::FILE_UNKNOWN {
            return Ok(FileRecord::directory());
        }
        let size = parse_size(&expect(reply, &[status::FILE_STAT])?)?;

        if !session.features.supports(Feature::Mdtm) {
            return Err(FtpError::missing_capability(Feature::Mdtm));
        }
        let reply = session
            .command(Command::Mdtm, Some(path), &[status::FILE_STAT])
            .await?;
        Ok(FileRecord {
            size,
            mtime: Some(parse_mdtm(&reply.message)?),
            ..FileRecord::default()
        })
    }
}

fn parse_size(reply: &Reply) -> FtpResult<u64> {
    reply
        .message
        .trim()
        .parse()
        .map_err(|_| FtpError::malformed(format!("Invalid SIZE reply '{}'", reply.message)).with_reply(reply.clone()))
}
