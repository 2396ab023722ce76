//! Per-connection state machine (§4.5 of the spec).
//!
//! `UnauthConnection` only ever runs {NOOP, QUIT, HELP, STARTTLS}; a
//! successful `STARTTLS` consumes it and hands back an upgraded transport
//! for the caller to promote into an authenticated [`Connection`]. This
//! mirrors the source's command-table swap without a mutable global: the
//! table is the type, not a runtime value.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use crate::{
    access::{AccessPolicy, ClientHost, Role},
    error::{Error, Result},
    protocol::{
        argv,
        handlers,
        transport::{LineTransport, ReadLine, COMMAND_READ_TIMEOUT},
        HandlerOutcome,
    },
    replication::ReplicationPeer,
    store::FileCookieStore,
};

pub const GREETING: &str = "220 COokie SIGNer ready";

pub struct UnauthConnection<S> {
    transport: LineTransport<S>,
}

impl<S> UnauthConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: LineTransport<S>) -> Self {
        Self { transport }
    }

    /// Runs the unauthenticated phase to completion. `Ok(Some(..))` means
    /// `STARTTLS` succeeded and CN extraction/policy lookup is the caller's
    /// next step; `Ok(None)` means the connection ended cleanly (`QUIT`,
    /// idle timeout, or EOF) without ever authenticating.
    pub async fn run(
        mut self,
        acceptor: &TlsAcceptor,
    ) -> Result<Option<LineTransport<tokio_rustls::server::TlsStream<S>>>> {
        self.transport.write_line(GREETING).await?;

        loop {
            let line = match self.transport.read_line(COMMAND_READ_TIMEOUT).await {
                Ok(ReadLine::Line(line)) => line,
                Ok(ReadLine::Eof) => return Ok(None),
                Err(Error::Timeout) => return Ok(None),
                Err(err) => return Err(err),
            };

            let args = argv::split(&line);
            if args.is_empty() {
                self.transport.write_line("501 Syntax error").await?;
                continue;
            }

            match args[0].to_ascii_uppercase().as_str() {
                "NOOP" => {
                    self.transport
                        .write_line(&format!("250 cosign v{}", env!("CARGO_PKG_VERSION")))
                        .await?
                }
                "HELP" => {
                    self.transport
                        .write_line("203 NOOP QUIT HELP STARTTLS")
                        .await?
                }
                "QUIT" => {
                    self.transport.write_line("221 Goodbye").await?;
                    return Ok(None);
                }
                "STARTTLS" => {
                    if args.len() != 1 {
                        self.transport.write_line("501 Syntax error").await?;
                        continue;
                    }
                    self.transport.write_line("220 Ready to start TLS").await?;
                    let upgraded = self.transport.upgrade_tls(acceptor).await?;
                    return Ok(Some(upgraded));
                }
                _ => self.transport.write_line("550 Must STARTTLS first").await?,
            }
        }
    }
}

/// Looks up the TLS peer's Common Name against access policy, the step
/// between a successful `STARTTLS` handshake and entering the
/// authenticated command loop.
pub fn authenticate(policy: &AccessPolicy, common_name: &str) -> Result<ClientHost> {
    policy
        .lookup(common_name)
        .cloned()
        .ok_or_else(|| Error::UnknownPeer(common_name.to_string()))
}

/// The authenticated command loop. Constructed once per connection after
/// `STARTTLS` (or, in debug mode, in place of it) and run to completion.
pub struct Connection<S> {
    pub(crate) transport: LineTransport<S>,
    pub(crate) store: FileCookieStore,
    pub(crate) replication: ReplicationPeer,
    pub(crate) hostname: String,
    pub(crate) host: ClientHost,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        transport: LineTransport<S>,
        store: FileCookieStore,
        replication: ReplicationPeer,
        hostname: String,
        host: ClientHost,
    ) -> Self {
        Self {
            transport,
            store,
            replication,
            hostname,
            host,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let line = match self.transport.read_line(COMMAND_READ_TIMEOUT).await {
                Ok(ReadLine::Line(line)) => line,
                Ok(ReadLine::Eof) => return Ok(()),
                Err(Error::Timeout) => return Ok(()),
                Err(err) => return Err(err),
            };

            let args = argv::split(&line);
            if args.is_empty() {
                self.transport.write_line("501 Syntax error").await?;
                continue;
            }
            let cmd = args[0].to_ascii_uppercase();

            let outcome = self.dispatch(&cmd, &args).await?;
            match outcome {
                HandlerOutcome::Continue => continue,
                HandlerOutcome::Quit => return Ok(()),
                HandlerOutcome::Fatal => {
                    return Err(Error::TlsHandshake(
                        "connection terminated after a fatal protocol error".into(),
                    ))
                }
            }
        }
    }

    async fn dispatch(&mut self, cmd: &str, args: &[String]) -> Result<HandlerOutcome> {
        match cmd {
            "NOOP" => handlers::noop(self).await,
            "QUIT" => handlers::quit(self).await,
            "HELP" => handlers::help(self).await,
            "CHECK" => handlers::check::run(self, args).await,
            "LOGIN" if self.host.role == Role::Cgi => handlers::login::run(self, args).await,
            "LOGOUT" if self.host.role == Role::Cgi => handlers::logout::run(self, args).await,
            "REGISTER" if self.host.role == Role::Cgi => handlers::register::run(self, args).await,
            "TIME" if self.host.role == Role::Cgi => handlers::time_gossip::run(self, args).await,
            "DAEMON" if self.host.role == Role::Cgi => handlers::daemon::run(self, args).await,
            "RETR" if self.host.role == Role::Service => handlers::retr::run(self, args).await,
            _ => {
                self.transport.write_line("500 Unknown command").await?;
                Ok(HandlerOutcome::Continue)
            }
        }
    }
}
