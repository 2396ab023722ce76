//! The accept loop (§5 of the spec): one spawned task per connection, no
//! shared state beyond the cookie store and the process-wide replication
//! peer, realizing the source's fork-per-connection model with Tokio tasks.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::{
    access::AccessPolicy,
    config::Config,
    error::{Error, Result},
    protocol::{
        session::{self, Connection, UnauthConnection},
        transport::LineTransport,
    },
    replication::ReplicationPeer,
    store::FileCookieStore,
};

pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    policy: AccessPolicy,
    store: FileCookieStore,
    replication: ReplicationPeer,
    hostname: String,
    debug: bool,
}

impl Server {
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(config.server.bind).await?;
        let acceptor = build_tls_acceptor(config)?;
        let policy = AccessPolicy::from_config(config);
        let store = FileCookieStore::new(
            config.server.cookie_dir.clone(),
            config.server.ticket_dir.clone(),
        );
        let peer_addr = config
            .replication
            .peer
            .as_ref()
            .and_then(|addr| addr.parse().ok());
        let replication = ReplicationPeer::new(peer_addr);

        Ok(Self {
            listener,
            acceptor,
            policy,
            store,
            replication,
            hostname: config.server.hostname.clone(),
            debug: config.server.debug,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the listener itself fails.
    pub async fn serve(self) -> Result<()> {
        info!(bind = ?self.listener.local_addr(), "cosignd listening");
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let acceptor = self.acceptor.clone();
            let policy = self.policy.clone();
            let store = self.store.clone();
            let replication = self.replication.clone();
            let hostname = self.hostname.clone();
            let debug = self.debug;

            tokio::spawn(async move {
                if let Err(err) =
                    handle_connection(stream, acceptor, policy, store, replication, hostname, debug)
                        .await
                {
                    warn!(%peer_addr, error = %err, "connection ended with an error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    policy: AccessPolicy,
    store: FileCookieStore,
    replication: ReplicationPeer,
    hostname: String,
    debug: bool,
) -> Result<()> {
    if debug {
        let mut transport = LineTransport::new(stream);
        let Some(host) = policy.debug_host().cloned() else {
            transport.write_line("508 No DEBUG access").await?;
            return Err(Error::NoDebugHost);
        };
        transport.write_line(session::GREETING).await?;
        let conn = Connection::new(transport, store, replication, hostname, host);
        return conn.run().await;
    }

    let transport = LineTransport::new(stream);
    let unauth = UnauthConnection::new(transport);
    let upgraded = match unauth.run(&acceptor).await? {
        Some(transport) => transport,
        None => return Ok(()),
    };

    let common_name = upgraded.peer_common_name()?;
    let host = session::authenticate(&policy, &common_name)?;

    let conn = Connection::new(upgraded, store, replication, hostname, host);
    conn.run().await
}

fn build_tls_acceptor(config: &Config) -> Result<TlsAcceptor> {
    let cert_chain = load_certs(&config.tls.cert)?;
    let key = load_key(&config.tls.key)?;
    let ca_bundle = load_certs(&config.tls.ca_bundle)?;

    let server_config = crate::protocol::transport::server_config(cert_chain, key, ca_bundle)?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(
    path: &std::path::Path,
) -> Result<Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>> {
    let contents = std::fs::read(path)?;
    rustls_pemfile::certs(&mut contents.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::Io)
}

fn load_key(
    path: &std::path::Path,
) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>> {
    let contents = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut contents.as_slice())?
        .ok_or_else(|| {
            Error::TlsHandshake(format!("no private key found in {}", path.display()))
        })
}
