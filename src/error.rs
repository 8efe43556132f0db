use std::fmt;
use std::io::{self, ErrorKind as IoErrorKind};

use serde::{Deserialize, Serialize};

/// RFC 1928 reply field values other than "succeeded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCode {
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unknown(u8),
}

impl ReplyCode {
    pub fn from_byte(code: u8) -> Self {
        match code {
            0x01 => ReplyCode::GeneralFailure,
            0x02 => ReplyCode::NotAllowed,
            0x03 => ReplyCode::NetworkUnreachable,
            0x04 => ReplyCode::HostUnreachable,
            0x05 => ReplyCode::ConnectionRefused,
            0x06 => ReplyCode::TtlExpired,
            0x07 => ReplyCode::CommandNotSupported,
            0x08 => ReplyCode::AddressTypeNotSupported,
            other => ReplyCode::Unknown(other),
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyCode::GeneralFailure => f.write_str("general failure"),
            ReplyCode::NotAllowed => f.write_str("connection not allowed by ruleset"),
            ReplyCode::NetworkUnreachable => f.write_str("network unreachable"),
            ReplyCode::HostUnreachable => f.write_str("host unreachable"),
            ReplyCode::ConnectionRefused => f.write_str("connection refused"),
            ReplyCode::TtlExpired => f.write_str("TTL expired"),
            ReplyCode::CommandNotSupported => f.write_str("command not supported"),
            ReplyCode::AddressTypeNotSupported => f.write_str("address type not supported"),
            ReplyCode::Unknown(code) => write!(f, "unknown error {code}"),
        }
    }
}

/// Closed classification of everything that can end a worker's session.
/// This is the key of the error histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectTimeout,
    HandshakeFailed,
    AuthFailed,
    ConnectRejected { code: ReplyCode },
    ProtocolViolation,
    TransientIo,
    Interrupted,
}

impl ErrorKind {
    /// Map a transport error raised while connecting or negotiating onto
    /// the closest kind.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            IoErrorKind::TimedOut | IoErrorKind::WouldBlock => ErrorKind::ConnectTimeout,
            IoErrorKind::ConnectionRefused => ErrorKind::ConnectRejected {
                code: ReplyCode::ConnectionRefused,
            },
            IoErrorKind::HostUnreachable => ErrorKind::ConnectRejected {
                code: ReplyCode::HostUnreachable,
            },
            IoErrorKind::NetworkUnreachable => ErrorKind::ConnectRejected {
                code: ReplyCode::NetworkUnreachable,
            },
            IoErrorKind::UnexpectedEof => ErrorKind::ProtocolViolation,
            _ => ErrorKind::TransientIo,
        }
    }

    /// Any transport fault on an established tunnel is transient. EINTR and
    /// timeouts here are not connect timeouts or user interrupts.
    pub fn from_session_io(_err: &io::Error) -> Self {
        ErrorKind::TransientIo
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ConnectTimeout => f.write_str("ConnectTimeout"),
            ErrorKind::HandshakeFailed => f.write_str("HandshakeFailed"),
            ErrorKind::AuthFailed => f.write_str("AuthFailed"),
            ErrorKind::ConnectRejected { code } => write!(f, "ConnectRejected({code})"),
            ErrorKind::ProtocolViolation => f.write_str("ProtocolViolation"),
            ErrorKind::TransientIo => f.write_str("TransientIOError"),
            ErrorKind::Interrupted => f.write_str("Interrupted"),
        }
    }
}

/// The error attached to a `WorkerOutcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        Self::new(ErrorKind::from_io(err), err.to_string())
    }

    pub fn from_session_io(err: &io::Error) -> Self {
        Self::new(ErrorKind::from_session_io(err), err.to_string())
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_codes_follow_rfc1928_table() {
        assert_eq!(ReplyCode::from_byte(0x01), ReplyCode::GeneralFailure);
        assert_eq!(ReplyCode::from_byte(0x05), ReplyCode::ConnectionRefused);
        assert_eq!(ReplyCode::from_byte(0x08), ReplyCode::AddressTypeNotSupported);
        assert_eq!(ReplyCode::from_byte(0x42), ReplyCode::Unknown(0x42));
        assert_eq!(ReplyCode::from_byte(0x06).to_string(), "TTL expired");
    }

    #[test]
    fn io_errors_map_to_nearest_kind() {
        let refused = io::Error::from(IoErrorKind::ConnectionRefused);
        assert_eq!(
            ErrorKind::from_io(&refused),
            ErrorKind::ConnectRejected {
                code: ReplyCode::ConnectionRefused
            }
        );

        let eof = io::Error::from(IoErrorKind::UnexpectedEof);
        assert_eq!(ErrorKind::from_io(&eof), ErrorKind::ProtocolViolation);

        let reset = io::Error::from(IoErrorKind::ConnectionReset);
        assert_eq!(ErrorKind::from_io(&reset), ErrorKind::TransientIo);

        let host = io::Error::from(IoErrorKind::HostUnreachable);
        assert_eq!(
            ErrorKind::from_io(&host),
            ErrorKind::ConnectRejected {
                code: ReplyCode::HostUnreachable
            }
        );

        let network = io::Error::from(IoErrorKind::NetworkUnreachable);
        assert_eq!(
            ErrorKind::from_io(&network),
            ErrorKind::ConnectRejected {
                code: ReplyCode::NetworkUnreachable
            }
        );

        let eintr = io::Error::from(IoErrorKind::Interrupted);
        assert_eq!(ErrorKind::from_io(&eintr), ErrorKind::TransientIo);
    }

    #[test]
    fn session_faults_are_transient() {
        for kind in [
            IoErrorKind::TimedOut,
            IoErrorKind::WouldBlock,
            IoErrorKind::Interrupted,
            IoErrorKind::BrokenPipe,
            IoErrorKind::ConnectionReset,
        ] {
            let err = io::Error::from(kind);
            assert_eq!(ErrorKind::from_session_io(&err), ErrorKind::TransientIo);
            assert_eq!(WorkerError::from_session_io(&err).kind, ErrorKind::TransientIo);
        }
    }

    #[test]
    fn kind_labels_are_stable() {
        let kind = ErrorKind::ConnectRejected {
            code: ReplyCode::HostUnreachable,
        };
        assert_eq!(kind.to_string(), "ConnectRejected(host unreachable)");
        assert_eq!(ErrorKind::TransientIo.to_string(), "TransientIOError");
    }
}
