//! FTP command verbs and the reply codes the engine checks for.

use std::fmt;

/// Control-channel command verbs (RFC 959, 2228, 2389, 2428, 3659).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    User,
    Pass,
    Cwd,
    CdUp,
    Pwd,
    Type,
    Retr,
    Stor,
    Allo,
    RenameFrom,
    RenameTo,
    Dele,
    Rmd,
    Mkd,
    Nlst,
    List,
    Mlsd,
    Mlst,
    Size,
    Mdtm,
    Feat,
    Auth,
    Pbsz,
    Prot,
    Epsv,
    Pasv,
    Eprt,
    Port,
    Noop,
    Quit,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Pass => "PASS",
            Self::Cwd => "CWD",
            Self::CdUp => "CDUP",
            Self::Pwd => "PWD",
            Self::Type => "TYPE",
            Self::Retr => "RETR",
            Self::Stor => "STOR",
            Self::Allo => "ALLO",
            Self::RenameFrom => "RNFR",
            Self::RenameTo => "RNTO",
            Self::Dele => "DELE",
            Self::Rmd => "RMD",
            Self::Mkd => "MKD",
            Self::Nlst => "NLST",
            Self::List => "LIST",
            Self::Mlsd => "MLSD",
            Self::Mlst => "MLST",
            Self::Size => "SIZE",
            Self::Mdtm => "MDTM",
            Self::Feat => "FEAT",
            Self::Auth => "AUTH",
            Self::Pbsz => "PBSZ",
            Self::Prot => "PROT",
            Self::Epsv => "EPSV",
            Self::Pasv => "PASV",
            Self::Eprt => "EPRT",
            Self::Port => "PORT",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }

    /// Wire form: `VERB args\r\n`, or `VERB\r\n` without arguments.
    pub fn encode(&self, args: Option<&str>) -> String {
        match args {
            Some(a) if !a.is_empty() => format!("{} {}\r\n", self.verb(), a),
            _ => format!("{}\r\n", self.verb()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// `TYPE` argument for binary (image) transfers.
pub const TYPE_BINARY: &str = "I";

/// Reply codes consumed by the engine.
pub mod status {
    /// Data connection already open; transfer starting.
    pub const START_TRANSFER_CONNECTION: u16 = 125;
    /// File status okay; about to open data connection.
    pub const STARTING_TRANSFER: u16 = 150;
    pub const OK: u16 = 200;
    /// Command not implemented, superfluous at this site (ALLO).
    pub const NOT_IMPLEMENTED_SUPERFLUOUS: u16 = 202;
    pub const SYSTEM_STATUS: u16 = 211;
    /// SIZE / MDTM result.
    pub const FILE_STAT: u16 = 213;
    pub const READY: u16 = 220;
    pub const CLOSING: u16 = 221;
    pub const DATA_CLOSE: u16 = 226;
    pub const PASSIVE: u16 = 227;
    pub const EXTENDED_PASSIVE: u16 = 229;
    pub const LOGGED_IN: u16 = 230;
    pub const AUTH_PROCEED: u16 = 234;
    pub const ACTION_OK: u16 = 250;
    /// PWD / MKD path reply.
    pub const DIR_CREATED: u16 = 257;
    pub const NEED_PASS: u16 = 331;
    /// RNFR accepted, RNTO expected.
    pub const NEED_FILE_INFO: u16 = 350;
    pub const CANT_OPEN_DATA: u16 = 425;
    pub const TRANSFER_ABORTED: u16 = 426;
    pub const FILE_UNAVAILABLE: u16 = 450;
    /// Requested action not taken; file unavailable / not found.
    pub const FILE_UNKNOWN: u16 = 550;
}
