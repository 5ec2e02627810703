//! Directory navigation and namespace operations.

use crate::ftp::client::FtpClient;
use crate::ftp::commands::{status, Command};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::Reply;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref QUOTED_PATH: Regex = Regex::new(r#""((?:[^"]|"")+)""#).expect("valid path regex");
}

/// Extract the quoted path from a 257 reply (`257 "/home/bob" is cwd`).
/// A doubled quote inside the path stands for one quote.
pub fn parse_quoted_path(reply: &Reply) -> FtpResult<String> {
    QUOTED_PATH
        .captures(&reply.message)
        .map(|c| c[1].replace("\"\"", "\""))
        .ok_or_else(|| {
            FtpError::malformed(format!("No quoted path in reply '{}'", reply.message))
                .with_reply(reply.clone())
        })
}

impl FtpClient {
    /// Current working directory (PWD).
    pub async fn pwd(&self) -> FtpResult<String> {
        let mut session = self.session().await?;
        let reply = session
            .command(Command::Pwd, None, &[status::DIR_CREATED])
            .await?;
        parse_quoted_path(&reply)
    }

    /// Alias of [`FtpClient::pwd`].
    pub async fn cwd(&self) -> FtpResult<String> {
        self.pwd().await
    }

    /// `cd`-like command (CWD).
    pub async fn chdir(&self, path: &str) -> FtpResult<()> {
        let mut session = self.session().await?;
        session
            .command(Command::Cwd, Some(path), &[status::ACTION_OK])
            .await?;
        Ok(())
    }

    /// `cd ..` (CDUP). Servers answer either 200 or 250.
    pub async fn cdup(&self) -> FtpResult<()> {
        let mut session = self.session().await?;
        session
            .command(Command::CdUp, None, &[status::OK, status::ACTION_OK])
            .await?;
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> FtpResult<()> {
        let mut session = self.session().await?;
        session
            .command(Command::Mkd, Some(path), &[status::DIR_CREATED])
            .await?;
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> FtpResult<()> {
        let mut session = self.session().await?;
        session
            .command(Command::Rmd, Some(path), &[status::ACTION_OK])
            .await?;
        Ok(())
    }

    /// Delete a file (DELE).
    pub async fn rm(&self, path: &str) -> FtpResult<()> {
        let mut session = self.session().await?;
        session
            .command(Command::Dele, Some(path), &[status::ACTION_OK])
            .await?;
        Ok(())
    }

    /// RNFR (350) followed by RNTO (250), under one lock hold.
    pub async fn rename(&self, from: &str, to: &str) -> FtpResult<()> {
        let mut session = self.session().await?;
        session
            .command(Command::RenameFrom, Some(from), &[status::NEED_FILE_INFO])
            .await?;
        session
            .command(Command::RenameTo, Some(to), &[status::ACTION_OK])
            .await?;
        Ok(())
    }
}
