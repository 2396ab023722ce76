//! Spins up a real `cosignd` instance against a temp directory and a
//! throwaway CA, for end-to-end protocol tests.

use std::{net::SocketAddr, sync::Arc};

use cosignd::config::{
    ClientHostConfig, Config, LoggingConfig, ProxyConfig, ReplicationConfig, RoleConfig,
    ServerConfig, TlsConfig,
};
use cosignd::protocol::transport::{LineTransport, ReadLine};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyPair};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, RootCertStore,
};
use tokio_rustls::TlsConnector;

pub const TEST_HOSTNAME: &str = "cosignd-test.invalid";

struct Ca {
    cert: Certificate,
    cert_der: CertificateDer<'static>,
    key_pair: KeyPair,
}

impl Ca {
    fn new() -> anyhow::Result<Self> {
        let mut params = CertificateParams::new(Vec::new())?;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "cosignd-testkit CA");
            dn
        };
        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;
        let cert_der = cert.der().clone();
        Ok(Self {
            cert,
            cert_der,
            key_pair,
        })
    }

    /// Mints a leaf certificate with `common_name` as both Subject CN and
    /// its sole SAN entry, signed by this CA.
    fn issue_leaf(&self, common_name: &str) -> anyhow::Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
        let mut params = CertificateParams::new(vec![common_name.to_string()])?;
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, common_name);
            dn
        };
        let key_pair = KeyPair::generate()?;
        let cert = params.signed_by(&key_pair, &self.cert, &self.key_pair)?;
        let key_der = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
        Ok((cert.der().clone(), key_der))
    }
}

/// A running `cosignd` instance plus everything needed to dial it as a
/// given role over TLS.
pub struct TestServer {
    _cookie_dir: tempfile::TempDir,
    _ticket_dir: tempfile::TempDir,
    ca: Ca,
    addr: SocketAddr,
    hostname: String,
    _task: tokio::task::JoinHandle<()>,
}

/// One client host to seed into the running instance's access policy.
pub struct TestClientHost {
    pub hostname: String,
    pub role: RoleConfig,
    pub proxy_allowed: bool,
    pub ticket_allowed: bool,
    pub proxies: Vec<ProxyConfig>,
}

impl TestServer {
    pub async fn start(client_hosts: Vec<TestClientHost>) -> anyhow::Result<Self> {
        let cookie_dir = tempfile::tempdir()?;
        let ticket_dir = tempfile::tempdir()?;
        let cert_dir = tempfile::tempdir()?;

        let ca = Ca::new()?;
        let (server_cert, server_key) = ca.issue_leaf(TEST_HOSTNAME)?;

        let cert_path = cert_dir.path().join("server.pem");
        let key_path = cert_dir.path().join("server.key.pem");
        let ca_path = cert_dir.path().join("ca.pem");
        std::fs::write(&cert_path, der_to_pem("CERTIFICATE", server_cert.as_ref()))?;
        std::fs::write(&key_path, der_to_pem("PRIVATE KEY", key_der_bytes(&server_key)))?;
        std::fs::write(&ca_path, der_to_pem("CERTIFICATE", ca.cert_der.as_ref()))?;

        let config = Config {
            server: ServerConfig {
                bind: "127.0.0.1:0".parse().unwrap(),
                cookie_dir: cookie_dir.path().to_path_buf(),
                ticket_dir: ticket_dir.path().to_path_buf(),
                hostname: TEST_HOSTNAME.to_string(),
                debug: false,
            },
            tls: TlsConfig {
                cert: cert_path,
                key: key_path,
                ca_bundle: ca_path,
            },
            replication: ReplicationConfig::default(),
            client_hosts: client_hosts
                .into_iter()
                .map(|h| ClientHostConfig {
                    hostname: h.hostname,
                    role: h.role,
                    proxy_allowed: h.proxy_allowed,
                    ticket_allowed: h.ticket_allowed,
                    proxies: h.proxies,
                })
                .collect(),
            logging: Some(LoggingConfig {
                level: "debug".to_string(),
                module_levels: Vec::new(),
            }),
        };

        let server = cosignd::Server::bind(&config).await?;
        let addr = server.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = server.serve().await;
        });

        Ok(Self {
            _cookie_dir: cookie_dir,
            _ticket_dir: ticket_dir,
            ca,
            addr,
            hostname: TEST_HOSTNAME.to_string(),
            _task: task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Dials the server, performs `STARTTLS` with a client certificate
    /// minted for `common_name`, and returns a ready-to-use transport.
    pub async fn dial(
        &self,
        common_name: &str,
    ) -> anyhow::Result<LineTransport<tokio_rustls::client::TlsStream<TcpStream>>> {
        let (client_cert, client_key) = self.ca.issue_leaf(common_name)?;

        let mut roots = RootCertStore::empty();
        roots.add(self.ca.cert_der.clone())?;

        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(vec![client_cert], client_key)?;
        let connector = TlsConnector::from(Arc::new(client_config));

        let stream = TcpStream::connect(self.addr).await?;
        let mut plain = LineTransport::new(stream);

        match plain.read_line(std::time::Duration::from_secs(5)).await? {
            ReadLine::Line(greeting) => anyhow::ensure!(greeting.starts_with("220"), "unexpected greeting: {greeting}"),
            ReadLine::Eof => anyhow::bail!("server closed connection before greeting"),
        }
        plain.write_line("STARTTLS").await?;
        match plain.read_line(std::time::Duration::from_secs(5)).await? {
            ReadLine::Line(reply) => anyhow::ensure!(reply.starts_with("220"), "STARTTLS refused: {reply}"),
            ReadLine::Eof => anyhow::bail!("server closed connection before STARTTLS reply"),
        }

        let server_name = ServerName::try_from(TEST_HOSTNAME.to_string())?;
        let tcp = into_inner(plain);
        let tls_stream = connector.connect(server_name, tcp).await?;
        Ok(LineTransport::new(tls_stream))
    }
}

fn key_der_bytes(key: &PrivateKeyDer<'static>) -> &[u8] {
    key.secret_der()
}

/// Wraps a DER blob in base64 PEM armor so it can be handed to the file
/// loaders `Server::bind` already uses in production.
fn der_to_pem(label: &str, der: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// Unwraps a `LineTransport` back to its raw stream once the plaintext
/// phase is done speaking lines, so the TLS connector can take ownership.
fn into_inner<S>(transport: LineTransport<S>) -> S
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    transport.into_inner()
}
