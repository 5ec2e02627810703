//! Scripted in-process FTP server for the client tests.
//!
//! Speaks just enough of RFC 959 / 2428 / 3659 / 4217 to drive the client:
//! files live in memory, every command line received is logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use ftp_engine::{FtpClient, FtpOptions, TlsOptionsInput};

/// Trust anchor that signed the server certificate (issued for `localhost`).
pub const CA_CERT: &str = include_str!("../fixtures/ca.pem");
const SERVER_CERT: &str = include_str!("../fixtures/server.pem");
const SERVER_KEY: &str = include_str!("../fixtures/server.key");

/// Knobs for server behaviour.
#[derive(Clone, Default)]
pub struct Behaviour {
    /// FEAT lines; empty means FEAT is answered with 502.
    pub features: Vec<&'static str>,
    /// Answer legacy PASV with an extended 229 reply.
    pub pasv_answers_229: bool,
    /// Answer EPSV with a legacy 227 reply.
    pub epsv_answers_227: bool,
    /// Answer STOR with 552 once the data connection is open.
    pub stor_fails: bool,
    /// Answer RETR with 150, never open the data connection, then 425.
    pub retr_never_connects: bool,
    /// Answer PASS with 530.
    pub reject_login: bool,
    /// Accept `AUTH TLS`; otherwise it gets 502.
    pub tls: bool,
    /// TLS from the first byte.
    pub implicit_tls: bool,
}

#[derive(Clone, Default)]
pub struct State {
    pub log: Arc<Mutex<Vec<String>>>,
    pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

pub struct MockServer {
    pub port: u16,
    pub state: State,
}

/// Directory name the server knows about (SIZE answers 550 for it).
pub const DIRECTORY: &str = "somedir";

impl MockServer {
    pub async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = State::default();
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let b = behaviour.clone();
                let s = shared.clone();
                tokio::spawn(async move { serve(sock, b, s).await });
            }
        });
        Self { port, state }
    }

    pub fn client(&self, opts: FtpOptions) -> FtpClient {
        FtpClient::new(
            "127.0.0.1",
            Some(FtpOptions {
                port: Some(self.port),
                ..opts
            }),
        )
    }

    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    /// Wait up to two seconds for `line` to show up in the log.
    pub async fn wait_for(&self, line: &str) -> bool {
        for _ in 0..200 {
            if self.log().iter().any(|l| l == line) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Client TLS options trusting the test CA.
pub fn tls_options(implicit: bool) -> FtpOptions {
    FtpOptions {
        tls: Some(TlsOptionsInput {
            hostname: Some("localhost".into()),
            ca_certs: Some(vec![CA_CERT.to_string()]),
            implicit: Some(implicit),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deterministic pseudo-random bytes (xorshift32).
pub fn sample_bytes(n: usize) -> Vec<u8> {
    let mut x: u32 = 0x1234_5678;
    (0..n)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect()
}

fn tls_acceptor() -> TlsAcceptor {
    let mut certs_pem = SERVER_CERT.as_bytes();
    let certs = rustls_pemfile::certs(&mut certs_pem)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let mut key_pem = SERVER_KEY.as_bytes();
    let key = rustls_pemfile::private_key(&mut key_pem).unwrap().unwrap();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}
type Stream = Box<dyn Conn>;

enum Pending {
    Passive(TcpListener),
    Active(String),
}

/// Open the negotiated data connection, with TLS when PROT P is in force.
async fn open_data(pending: &mut Option<Pending>, tls: Option<&TlsAcceptor>) -> Option<Stream> {
    let tcp = match pending.take()? {
        Pending::Passive(l) => l.accept().await.ok().map(|(s, _)| s),
        Pending::Active(addr) => TcpStream::connect(addr).await.ok(),
    }?;
    match tls {
        Some(acceptor) => acceptor.accept(tcp).await.ok().map(|s| Box::new(s) as Stream),
        None => Some(Box::new(tcp) as Stream),
    }
}

async fn send(ctrl: &mut BufReader<Stream>, reply: &str) {
    let _ = ctrl.get_mut().write_all(reply.as_bytes()).await;
    let _ = ctrl.get_mut().flush().await;
}

async fn send_data(pending: &mut Option<Pending>, tls: Option<&TlsAcceptor>, body: &[u8]) {
    if let Some(mut d) = open_data(pending, tls).await {
        let _ = d.write_all(body).await;
        let _ = d.shutdown().await;
    }
}

async fn serve(sock: TcpStream, b: Behaviour, state: State) {
    let acceptor = (b.tls || b.implicit_tls).then(tls_acceptor);
    let conn: Stream = match &acceptor {
        Some(a) if b.implicit_tls => match a.accept(sock).await {
            Ok(s) => Box::new(s) as Stream,
            Err(_) => return,
        },
        _ => Box::new(sock) as Stream,
    };
    let mut ctrl = BufReader::new(conn);
    let mut pending: Option<Pending> = None;
    let mut protected = false;

    send(&mut ctrl, "220 Mock FTP ready\r\n").await;

    loop {
        let mut line = String::new();
        if ctrl.read_line(&mut line).await.unwrap_or(0) == 0 {
            state.log.lock().unwrap().push("CONTROL CLOSED".into());
            return;
        }
        let line = line.trim_end().to_string();
        state.log.lock().unwrap().push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_string(), a.to_string()),
            None => (line.clone(), String::new()),
        };
        let data_tls = if protected { acceptor.as_ref() } else { None };

        let reply = match verb.as_str() {
            "FEAT" if b.features.is_empty() => "502 FEAT not implemented\r\n".to_string(),
            "FEAT" => {
                let mut r = String::from("211-Features:\r\n");
                for f in &b.features {
                    r.push_str(&format!(" {}\r\n", f));
                }
                r.push_str("211 End\r\n");
                r
            }
            "AUTH" if b.tls && arg == "TLS" => {
                send(&mut ctrl, "234 Proceed with negotiation\r\n").await;
                let inner = ctrl.into_inner();
                match tls_acceptor().accept(inner).await {
                    Ok(s) => {
                        ctrl = BufReader::new(Box::new(s) as Stream);
                        continue;
                    }
                    Err(_) => {
                        state.log.lock().unwrap().push("CONTROL CLOSED".into());
                        return;
                    }
                }
            }
            "PBSZ" if acceptor.is_some() => "200 PBSZ=0\r\n".into(),
            "PROT" if acceptor.is_some() => {
                protected = arg == "P";
                "200 Protection level set\r\n".into()
            }
            "USER" => "331 Password required\r\n".into(),
            "PASS" if b.reject_login => "530 Login incorrect\r\n".into(),
            "PASS" => "230 Logged in\r\n".into(),
            "TYPE" | "NOOP" => "200 OK\r\n".into(),
            "EPSV" | "PASV" => {
                let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let p = l.local_addr().unwrap().port();
                pending = Some(Pending::Passive(l));
                let extended = if verb == "EPSV" {
                    !b.epsv_answers_227
                } else {
                    b.pasv_answers_229
                };
                if extended {
                    format!("229 Entering Extended Passive Mode (|||{}|)\r\n", p)
                } else {
                    format!("227 Entering Passive Mode (127,0,0,1,{},{})\r\n", p >> 8, p & 0xff)
                }
            }
            "PORT" => {
                let n: Vec<u16> = arg.split(',').map(|x| x.parse().unwrap()).collect();
                pending = Some(Pending::Active(format!(
                    "{}.{}.{}.{}:{}",
                    n[0],
                    n[1],
                    n[2],
                    n[3],
                    n[4] * 256 + n[5]
                )));
                "200 PORT command successful\r\n".into()
            }
            "EPRT" => {
                let f: Vec<&str> = arg.split('|').collect();
                pending = Some(Pending::Active(format!("{}:{}", f[2], f[3])));
                "200 EPRT command successful\r\n".into()
            }
            "ALLO" => "202 No storage allocation necessary\r\n".into(),
            "STOR" if b.stor_fails => {
                if let Some(mut d) = open_data(&mut pending, data_tls).await {
                    let log = state.log.clone();
                    tokio::spawn(async move {
                        let mut sink = Vec::new();
                        let _ = d.read_to_end(&mut sink).await;
                        log.lock().unwrap().push("DATA CLOSED".into());
                    });
                }
                "552 Disk full\r\n".into()
            }
            "STOR" => {
                send(&mut ctrl, "150 Ok to send data\r\n").await;
                let mut buf = Vec::new();
                if let Some(mut d) = open_data(&mut pending, data_tls).await {
                    let _ = d.read_to_end(&mut buf).await;
                }
                state.files.lock().unwrap().insert(arg.clone(), buf);
                "226 Transfer complete\r\n".into()
            }
            "RETR" if b.retr_never_connects => {
                send(&mut ctrl, "150 Opening BINARY mode data connection\r\n").await;
                pending = None;
                tokio::time::sleep(Duration::from_millis(1500)).await;
                "425 Can't open data connection\r\n".into()
            }
            "RETR" => {
                let content = state.files.lock().unwrap().get(&arg).cloned();
                match content {
                    Some(bytes) => {
                        send(&mut ctrl, "150 Opening BINARY mode data connection\r\n").await;
                        send_data(&mut pending, data_tls, &bytes).await;
                        "226 Transfer complete\r\n".into()
                    }
                    None => {
                        pending = None;
                        "550 No such file\r\n".into()
                    }
                }
            }
            "NLST" | "LIST" | "MLSD" => {
                let entries: Vec<(String, usize)> = {
                    let files = state.files.lock().unwrap();
                    let mut v: Vec<_> = files.iter().map(|(k, v)| (k.clone(), v.len())).collect();
                    v.sort();
                    v
                };
                let body: String = entries
                    .iter()
                    .map(|(name, len)| match verb.as_str() {
                        "NLST" => format!("{}\r\n", name),
                        "LIST" => format!("-rw-r--r--   1 ftp ftp {:>8} Jan  1 12:00 {}\r\n", len, name),
                        _ => format!("type=file;size={};modify=20240101120000; {}\r\n", len, name),
                    })
                    .collect();
                send(&mut ctrl, "150 Here comes the listing\r\n").await;
                send_data(&mut pending, data_tls, body.as_bytes()).await;
                "226 Directory send OK\r\n".into()
            }
            "SIZE" if arg == DIRECTORY => "550 Not a plain file\r\n".into(),
            "SIZE" => {
                let len = state.files.lock().unwrap().get(&arg).map(Vec::len);
                match len {
                    Some(len) => format!("213 {}\r\n", len),
                    None => "550 No such file\r\n".into(),
                }
            }
            "MDTM" => "213 20240101120000\r\n".into(),
            "MLST" => {
                let facts = if arg == DIRECTORY {
                    "type=dir;modify=20240101120000;".to_string()
                } else {
                    let len = state.files.lock().unwrap().get(&arg).map(Vec::len).unwrap_or(0);
                    format!("type=file;size={};modify=20240101120000;", len)
                };
                format!("250-Listing {}\r\n {} {}\r\n250 End\r\n", arg, facts, arg)
            }
            "PWD" => "257 \"/\" is the current directory\r\n".into(),
            "CWD" | "RMD" | "DELE" | "RNTO" => "250 OK\r\n".into(),
            "CDUP" => "200 OK\r\n".into(),
            "MKD" => format!("257 \"{}\" created\r\n", arg),
            "RNFR" => "350 Ready for RNTO\r\n".into(),
            "QUIT" => {
                send(&mut ctrl, "221 Goodbye\r\n").await;
                return;
            }
            _ => "502 Command not implemented\r\n".into(),
        };
        send(&mut ctrl, &reply).await;
    }
}
