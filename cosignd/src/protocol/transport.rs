//! Framed line transport over a plain or TLS-wrapped stream (§4.1 of the
//! spec).
//!
//! A narrow, documented wrapper around a raw `AsyncRead + AsyncWrite`
//! handle, in the teacher's habit of keeping I/O primitives behind a small
//! owned type rather than threading a raw socket through the call stack.
//! Every blocking operation carries an explicit deadline via
//! `tokio::time::timeout`.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{rustls::ServerConfig, TlsAcceptor};

use crate::error::{Error, Result};

/// Upper bound on how much unconsumed input a connection may buffer before
/// its read is treated as fatally oversized.
pub const MAX_LINE_BUFFER: usize = 1024 * 1024;

/// Default deadline for a command-loop read while idle.
pub const COMMAND_READ_TIMEOUT: Duration = Duration::from_secs(600);
/// Default deadline for a single line during a bulk (list/ticket) transfer.
pub const BULK_LINE_TIMEOUT: Duration = Duration::from_secs(120);
/// Default deadline for the ticket body itself.
pub const TICKET_BODY_TIMEOUT: Duration = Duration::from_secs(3600);

/// A CRLF-line-oriented transport over `S`.
pub struct LineTransport<S> {
    stream: S,
    buf: Vec<u8>,
    pos: usize,
}

/// The outcome of a deadline-bounded line read.
pub enum ReadLine {
    Line(String),
    Eof,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(4096),
            pos: 0,
        }
    }

    /// Reads one line, tolerating a bare `\n` in addition to `\r\n`, honoring
    /// `deadline` for each underlying socket read.
    pub async fn read_line(&mut self, deadline: Duration) -> Result<ReadLine> {
        loop {
            if let Some(idx) = find_newline(&self.buf[self.pos..]) {
                let end = self.pos + idx;
                let mut line_end = end;
                if line_end > self.pos && self.buf[line_end - 1] == b'\r' {
                    line_end -= 1;
                }
                let line = String::from_utf8_lossy(&self.buf[self.pos..line_end]).into_owned();
                self.pos = end + 1;
                self.compact();
                return Ok(ReadLine::Line(line));
            }

            if self.buf.len() - self.pos >= MAX_LINE_BUFFER {
                return Err(Error::LineTooLong(MAX_LINE_BUFFER));
            }

            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(deadline, self.stream.read(&mut chunk))
                .await
                .map_err(|_| Error::Timeout)??;
            if n == 0 {
                if self.pos < self.buf.len() {
                    // Unterminated trailing data followed by EOF: surface it
                    // as EOF, matching the spec's "EOF is not an error" rule
                    // at the command boundary.
                    self.buf.clear();
                    self.pos = 0;
                }
                return Ok(ReadLine::Eof);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Writes a single CRLF-terminated line, retrying partial writes until
    /// complete.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_reply(&format!("{line}\r\n")).await
    }

    /// Writes pre-formatted bytes (already including any line terminators)
    /// to completion.
    pub async fn write_reply(&mut self, contents: &str) -> Result<()> {
        self.stream.write_all(contents.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Writes raw bytes (no line terminator added), for the ticket sideband.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads exactly `n` bytes, first draining anything already buffered.
    pub async fn read_exact(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);

        let available = self.buf.len() - self.pos;
        let take = available.min(n);
        out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
        self.pos += take;
        self.compact();

        if out.len() < n {
            let mut remainder = vec![0u8; n - out.len()];
            tokio::time::timeout(deadline, self.stream.read_exact(&mut remainder))
                .await
                .map_err(|_| Error::Timeout)??;
            out.extend_from_slice(&remainder);
        }

        Ok(out)
    }

    /// Unwraps back to the raw stream, discarding any buffered-but-unread
    /// bytes. Used once the plaintext phase is done speaking lines and
    /// ownership of the socket must pass to something else (a TLS
    /// connector dialing out, for instance).
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Consumes `self` and performs a TLS server handshake, returning a
    /// transport wrapping the encrypted stream. The acceptor must be
    /// configured to require and verify a client certificate; enforcing
    /// that is the caller's responsibility via `acceptor`'s `ServerConfig`.
    pub async fn upgrade_tls(
        self,
        acceptor: &TlsAcceptor,
    ) -> Result<LineTransport<tokio_rustls::server::TlsStream<S>>> {
        if !self.buf[self.pos..].is_empty() {
            // STARTTLS must be the last plaintext command on the wire; any
            // buffered bytes past it would otherwise silently vanish into
            // the handshake.
            return Err(Error::TlsHandshake(
                "pipelined data before STARTTLS handshake".into(),
            ));
        }
        let tls_stream = acceptor
            .accept(self.stream)
            .await
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Ok(LineTransport::new(tls_stream))
    }
}

impl<S> LineTransport<tokio_rustls::server::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Extracts the peer certificate's Subject Common Name from the
    /// completed handshake this transport wraps.
    pub fn peer_common_name(&self) -> Result<String> {
        let (_, conn) = self.stream.get_ref();
        peer_common_name(conn)
    }
}

/// Extracts the peer certificate's Subject Common Name from a completed
/// handshake, required before a TLS-authenticated connection may proceed.
pub fn peer_common_name(
    conn: &tokio_rustls::rustls::ServerConnection,
) -> Result<String> {
    let certs = conn
        .peer_certificates()
        .ok_or(Error::MissingPeerCommonName)?;
    let leaf = certs.first().ok_or(Error::MissingPeerCommonName)?;
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|_| Error::MissingPeerCommonName)?;
    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .ok_or(Error::MissingPeerCommonName)
}

/// Builds a server TLS config that requires and verifies a client
/// certificate against `ca_bundle`.
pub fn server_config(
    cert_chain: Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>,
    key: tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>,
    ca_bundle: Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>,
) -> Result<ServerConfig> {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    for cert in ca_bundle {
        roots
            .add(cert)
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
    }
    let verifier = tokio_rustls::rustls::server::WebPkiClientVerifier::builder(roots.into())
        .build()
        .map_err(|e| Error::TlsHandshake(e.to_string()))?;

    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::TlsHandshake(e.to_string()))
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_crlf_and_bare_lf_lines() {
        let (mut client, server) = duplex(1024);
        client.write_all(b"HELLO\r\nWORLD\n").await.unwrap();
        let mut transport = LineTransport::new(server);

        match transport.read_line(Duration::from_secs(1)).await.unwrap() {
            ReadLine::Line(line) => assert_eq!(line, "HELLO"),
            ReadLine::Eof => panic!("unexpected eof"),
        }
        match transport.read_line(Duration::from_secs(1)).await.unwrap() {
            ReadLine::Line(line) => assert_eq!(line, "WORLD"),
            ReadLine::Eof => panic!("unexpected eof"),
        }
    }

    #[tokio::test]
    async fn read_exact_drains_buffered_bytes_first() {
        let (mut client, server) = duplex(1024);
        client.write_all(b"AB\r\nCDEF").await.unwrap();
        let mut transport = LineTransport::new(server);
        match transport.read_line(Duration::from_secs(1)).await.unwrap() {
            ReadLine::Line(line) => assert_eq!(line, "AB"),
            ReadLine::Eof => panic!("unexpected eof"),
        }
        let body = transport.read_exact(4, Duration::from_secs(1)).await.unwrap();
        assert_eq!(body, b"CDEF");
    }

    #[tokio::test]
    async fn closed_stream_is_eof_not_error() {
        let (client, server) = duplex(1024);
        drop(client);
        let mut transport = LineTransport::new(server);
        match transport.read_line(Duration::from_secs(1)).await.unwrap() {
            ReadLine::Eof => {}
            ReadLine::Line(_) => panic!("expected eof"),
        }
    }

    #[tokio::test]
    async fn oversized_line_is_fatal() {
        let (mut client, server) = duplex(MAX_LINE_BUFFER + 4096);
        let payload = vec![b'a'; MAX_LINE_BUFFER + 1];
        client.write_all(&payload).await.unwrap();
        let mut transport = LineTransport::new(server);
        let err = transport
            .read_line(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LineTooLong(_)));
    }
}
