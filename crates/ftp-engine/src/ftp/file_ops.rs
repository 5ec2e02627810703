//! Transfers: download, upload and directory listings.
//!
//! The streaming variants return a [`TransferStream`] that keeps the
//! session locked until it is finalized; the buffered variants do the
//! copy and the finalize step themselves.

use crate::ftp::client::FtpClient;
use crate::ftp::commands::Command;
use crate::ftp::error::FtpResult;
use crate::ftp::metadata::parse_mlst;
use crate::ftp::parser;
use crate::ftp::transfer::TransferStream;
use crate::ftp::types::FileRecord;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

impl FtpClient {
    // ── Download ─────────────────────────────────────────────────

    /// Start a RETR and hand back the readable data stream.
    /// Call [`TransferStream::finalize`] once the stream is drained.
    pub async fn download_stream(&self, path: &str) -> FtpResult<TransferStream> {
        let mut session = self.session().await?;
        let data = session
            .begin_transfer(self.config(), None, Command::Retr, Some(path))
            .await?;
        debug!("[{}] Downloading {}", self.id, path);
        Ok(TransferStream::new(session, data))
    }

    /// Download a whole file into memory.
    pub async fn download(&self, path: &str) -> FtpResult<Vec<u8>> {
        let mut stream = self.download_stream(path).await?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        stream.finalize().await?;
        debug!("[{}] Downloaded {} ({} bytes)", self.id, path, buf.len());
        Ok(buf)
    }

    // ── Upload ───────────────────────────────────────────────────

    /// Start a STOR and hand back the writable data stream. `allocate`
    /// sends `ALLO <bytes>` first, which some servers require.
    pub async fn upload_stream(&self, path: &str, allocate: Option<u64>) -> FtpResult<TransferStream> {
        let mut session = self.session().await?;
        let prelude = allocate.map(|n| (Command::Allo, n.to_string()));
        let data = session
            .begin_transfer(self.config(), prelude, Command::Stor, Some(path))
            .await?;
        debug!("[{}] Uploading {}", self.id, path);
        Ok(TransferStream::new(session, data))
    }

    /// Upload `data` as `path`.
    pub async fn upload(&self, path: &str, data: &[u8]) -> FtpResult<()> {
        let mut stream = self.upload_stream(path, Some(data.len() as u64)).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        stream.finalize().await?;
        debug!("[{}] Uploaded {} ({} bytes)", self.id, path, data.len());
        Ok(())
    }

    /// Close a streaming transfer and release the session.
    pub async fn finalize_stream(&self, stream: TransferStream) -> FtpResult<()> {
        stream.finalize().await
    }

    // ── Listings ─────────────────────────────────────────────────

    /// Names in `dir` (NLST), or in the working directory.
    pub async fn list(&self, dir: Option<&str>) -> FtpResult<Vec<String>> {
        let text = self.listing(Command::Nlst, dir).await?;
        Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `ls -l`-style listing (LIST) parsed into records.
    pub async fn list_detailed(&self, dir: Option<&str>) -> FtpResult<Vec<(String, FileRecord)>> {
        let text = self.listing(Command::List, dir).await?;
        Ok(parser::parse_listing(&text))
    }

    /// Machine-readable listing (MLSD).
    pub async fn extended_list(&self, dir: Option<&str>) -> FtpResult<Vec<(String, FileRecord)>> {
        let text = self.listing(Command::Mlsd, dir).await?;
        text.lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(parse_mlst)
            .collect()
    }

    /// Run a listing command and collect its data as text.
    async fn listing(&self, cmd: Command, dir: Option<&str>) -> FtpResult<String> {
        let mut session = self.session().await?;
        let data = session.begin_transfer(self.config(), None, cmd, dir).await?;
        let mut stream = TransferStream::new(session, data);

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;
        stream.finalize().await?;

        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}
