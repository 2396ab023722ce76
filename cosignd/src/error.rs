//! Connection-fatal error type.
//!
//! Per-command refusals (4xx/5xx replies that keep the connection loop
//! going) are *not* represented here — see [`crate::protocol::HandlerOutcome`].
//! This type only covers failures that tear the connection down: transport
//! I/O, TLS handshake failure, and protocol violations (§7 of the spec).

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read timed out")]
    Timeout,

    #[error("connection closed")]
    Eof,

    #[error("line exceeded the {0} byte transport buffer")]
    LineTooLong(usize),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("client certificate did not present a usable Common Name")]
    MissingPeerCommonName,

    #[error("no access policy entry for peer \"{0}\"")]
    UnknownPeer(String),

    #[error("no DEBUG host configured for debug-mode startup")]
    NoDebugHost,

    #[error("ticket upload length did not match the data sent")]
    TicketLengthMismatch,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
