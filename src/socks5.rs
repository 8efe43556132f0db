use std::future::Future;
use std::io;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{BenchmarkConfig, Credentials};
use crate::error::{ErrorKind, ReplyCode, WorkerError};

#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("timed out after {0:?} while {1}")]
    Timeout(Duration, &'static str),
    #[error("unsupported socks version {0} in method selection")]
    BadVersion(u8),
    #[error("unexpected version {0} in connect reply")]
    BadReplyVersion(u8),
    #[error("proxy accepted none of the offered methods")]
    NoAcceptableMethod,
    #[error("proxy selected method {0:#04x} that was not offered")]
    UnexpectedMethod(u8),
    #[error("proxy requires username/password but no credentials are configured")]
    CredentialsRequired,
    #[error("authentication rejected with status {0}")]
    AuthRejected(u8),
    #[error("connect rejected: {0}")]
    Rejected(ReplyCode),
    #[error("unsupported address type {0} in reply")]
    BadAddressType(u8),
    #[error("short read while {0}")]
    ShortRead(&'static str),
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Socks5Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Socks5Error::Timeout(..) => ErrorKind::ConnectTimeout,
            Socks5Error::NoAcceptableMethod
            | Socks5Error::UnexpectedMethod(_)
            | Socks5Error::CredentialsRequired => ErrorKind::HandshakeFailed,
            Socks5Error::BadVersion(_) => ErrorKind::HandshakeFailed,
            Socks5Error::BadReplyVersion(_) => ErrorKind::ProtocolViolation,
            Socks5Error::AuthRejected(_) => ErrorKind::AuthFailed,
            Socks5Error::Rejected(code) => ErrorKind::ConnectRejected { code: *code },
            Socks5Error::BadAddressType(_) | Socks5Error::ShortRead(_) => {
                ErrorKind::ProtocolViolation
            }
            Socks5Error::Io(err) => ErrorKind::from_io(err),
        }
    }

    pub fn to_worker_error(&self) -> WorkerError {
        WorkerError::new(self.kind(), self.to_string())
    }
}

/// Result of one connection attempt. `connect_time` is always set, even when
/// the attempt failed.
#[derive(Debug)]
pub struct ConnectAttempt {
    pub connect_time: Duration,
    pub result: Result<TcpStream, Socks5Error>,
}

/// Open a TCP connection to the proxy and run the SOCKS5 handshake and
/// CONNECT request. On success the returned stream is positioned at the first
/// byte of the tunnel. On failure the stream has already been dropped.
pub async fn connect(config: &BenchmarkConfig) -> ConnectAttempt {
    let started = Instant::now();
    let proxy = config.proxy_addr();

    let mut stream = match timeout(config.timeout, TcpStream::connect(&proxy)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            return ConnectAttempt {
                connect_time: started.elapsed(),
                result: Err(Socks5Error::Io(err)),
            }
        }
        Err(_) => {
            return ConnectAttempt {
                connect_time: started.elapsed(),
                result: Err(Socks5Error::Timeout(config.timeout, "connecting to proxy")),
            }
        }
    };
    let connect_time = started.elapsed();
    let _ = stream.set_nodelay(true);

    let negotiated = handshake(
        &mut stream,
        config.target,
        config.credentials.as_ref(),
        config.timeout,
    )
    .await;

    ConnectAttempt {
        connect_time,
        result: negotiated.map(|()| stream),
    }
}

/// Run method negotiation, optional RFC 1929 authentication and an IPv4
/// CONNECT over an already open byte stream.
pub async fn handshake<S>(
    stream: &mut S,
    target: SocketAddrV4,
    credentials: Option<&Credentials>,
    op_timeout: Duration,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = build_greeting(credentials.is_some());
    with_timeout(op_timeout, "sending greeting", write_msg(stream, &greeting)).await?;

    let mut choice = [0u8; 2];
    with_timeout(
        op_timeout,
        "reading method selection",
        read_msg(stream, &mut choice, "reading method selection"),
    )
    .await?;
    if choice[0] != SOCKS_VERSION {
        return Err(Socks5Error::BadVersion(choice[0]));
    }

    match choice[1] {
        METHOD_NO_AUTH => {}
        METHOD_USER_PASS => {
            let credentials = credentials.ok_or(Socks5Error::CredentialsRequired)?;
            authenticate(stream, credentials, op_timeout).await?;
        }
        METHOD_NO_ACCEPT => return Err(Socks5Error::NoAcceptableMethod),
        other => return Err(Socks5Error::UnexpectedMethod(other)),
    }

    let request = build_connect_request(target);
    with_timeout(op_timeout, "sending connect request", write_msg(stream, &request)).await?;

    with_timeout(op_timeout, "reading connect reply", read_reply(stream)).await
}

async fn authenticate<S>(
    stream: &mut S,
    credentials: &Credentials,
    op_timeout: Duration,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_userpass_request(credentials);
    with_timeout(op_timeout, "sending credentials", write_msg(stream, &request)).await?;

    // The version byte of the reply is ignored; plenty of servers echo 0x05.
    let mut reply = [0u8; 2];
    with_timeout(
        op_timeout,
        "reading auth status",
        read_msg(stream, &mut reply, "reading auth status"),
    )
    .await?;
    if reply[1] != USERPASS_STATUS_OK {
        return Err(Socks5Error::AuthRejected(reply[1]));
    }
    Ok(())
}

async fn read_reply<S>(stream: &mut S) -> Result<(), Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    read_msg(stream, &mut header, "reading connect reply").await?;
    if header[0] != SOCKS_VERSION {
        return Err(Socks5Error::BadReplyVersion(header[0]));
    }
    if header[1] != REP_SUCCESS {
        return Err(Socks5Error::Rejected(ReplyCode::from_byte(header[1])));
    }

    // Skip BND.ADDR and BND.PORT so the stream sits at the tunnel start.
    let remaining = match header[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            read_msg(stream, &mut len, "reading bound domain length").await?;
            len[0] as usize + 2
        }
        other => return Err(Socks5Error::BadAddressType(other)),
    };
    let mut bound = vec![0u8; remaining];
    read_msg(stream, &mut bound, "reading bound address").await?;
    Ok(())
}

async fn with_timeout<F, T>(
    op_timeout: Duration,
    what: &'static str,
    fut: F,
) -> Result<T, Socks5Error>
where
    F: Future<Output = Result<T, Socks5Error>>,
{
    match timeout(op_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Socks5Error::Timeout(op_timeout, what)),
    }
}

async fn write_msg<S>(stream: &mut S, msg: &[u8]) -> Result<(), Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(msg).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_msg<S>(stream: &mut S, buf: &mut [u8], what: &'static str) -> Result<(), Socks5Error>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(Socks5Error::ShortRead(what)),
        Err(err) => Err(Socks5Error::Io(err)),
    }
}

pub fn build_greeting(with_auth: bool) -> Vec<u8> {
    if with_auth {
        vec![SOCKS_VERSION, 0x02, METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        vec![SOCKS_VERSION, 0x01, METHOD_NO_AUTH]
    }
}

/// Lengths are validated to fit in a byte when the config is built.
pub fn build_userpass_request(credentials: &Credentials) -> Vec<u8> {
    let user = credentials.username.as_bytes();
    let pass = credentials.password.as_bytes();
    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(USERPASS_VERSION);
    request.push(user.len() as u8);
    request.extend_from_slice(user);
    request.push(pass.len() as u8);
    request.extend_from_slice(pass);
    request
}

pub fn build_connect_request(target: SocketAddrV4) -> Vec<u8> {
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_IPV4];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    request
}

// SOCKS5 protocol constants
pub(crate) const SOCKS_VERSION: u8 = 0x05;
pub(crate) const METHOD_NO_AUTH: u8 = 0x00;
pub(crate) const METHOD_USER_PASS: u8 = 0x02;
pub(crate) const METHOD_NO_ACCEPT: u8 = 0xFF;
pub(crate) const USERPASS_VERSION: u8 = 0x01;
pub(crate) const USERPASS_STATUS_OK: u8 = 0x00;
pub(crate) const CMD_CONNECT: u8 = 0x01;
pub(crate) const ATYP_IPV4: u8 = 0x01;
pub(crate) const ATYP_DOMAIN: u8 = 0x03;
pub(crate) const ATYP_IPV6: u8 = 0x04;
pub(crate) const REP_SUCCESS: u8 = 0x00;
