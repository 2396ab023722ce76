//! `RETR <serviceCookie> <kind>` (SERVICE only, gated further by capability
//! flags per `kind`).

use std::path::PathBuf;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::{
    error::Result,
    protocol::{
        handlers::check_cookie_name,
        idle::{self, IdleOutcome},
        session::Connection,
        HandlerOutcome,
    },
    store::{CookieNameError, CreateOutcome, State, StoreError},
    time::unix_now,
};

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 3 {
        conn.transport.write_line("540 RETR: syntax error").await?;
        return Ok(HandlerOutcome::Continue);
    }
    let service_cookie = &args[1];
    let kind = args[2].as_str();
    match check_cookie_name(service_cookie) {
        Ok(()) => {}
        Err(CookieNameError::ContainsSlash) => {
            conn.transport
                .write_line("541 RETR: bad cookie name")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(CookieNameError::TooLong) => {
            conn.transport
                .write_line("542 RETR: cookie too long")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
    }

    let login_cookie = match conn.store.resolve_service(service_cookie).await {
        Ok(login) => login,
        Err(StoreError::NotFound) => {
            conn.transport.write_line("543 RETR: not found").await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(err) => {
            warn!(%service_cookie, error = %err, "RETR: store error resolving service cookie");
            conn.transport.write_line("503 RETR: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    let record = match conn.store.read(&login_cookie).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => {
            conn.transport.write_line("544 RETR: not found").await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(err) => {
            warn!(%login_cookie, error = %err, "RETR: store error reading record");
            conn.transport.write_line("503 RETR: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    if record.state == State::LoggedOut {
        conn.transport.write_line("440 RETR: logged out").await?;
        return Ok(HandlerOutcome::Continue);
    }

    let last_activity = match conn.store.last_activity(&login_cookie).await {
        Ok(t) => t,
        Err(err) => {
            warn!(%login_cookie, error = %err, "RETR: store error reading activity");
            conn.transport.write_line("503 RETR: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };
    let age = unix_now().saturating_sub(last_activity);

    match idle::classify_check(age) {
        IdleOutcome::Grey => {
            conn.transport
                .write_line("541 RETR: idle grey window")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        IdleOutcome::Expired => {
            conn.store.logout(&login_cookie).await.ok();
            conn.transport
                .write_line("441 RETR: idle logged out")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        IdleOutcome::Fresh => {}
    }

    match kind {
        "tgt" => retr_tgt(conn, &record.ticket_path).await,
        "cookies" => retr_cookies(conn, &login_cookie).await,
        other => {
            warn!(kind = %other, "RETR: no such retrieve type");
            conn.transport
                .write_line("441 RETR: no such retrieve type")
                .await?;
            Ok(HandlerOutcome::Continue)
        }
    }
}

async fn retr_tgt<S>(
    conn: &mut Connection<S>,
    ticket_path: &Option<String>,
) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !conn.host.can_retrieve_tickets() {
        conn.transport.write_line("441 RETR: not allowed").await?;
        return Ok(HandlerOutcome::Continue);
    }
    let Some(path) = ticket_path.clone() else {
        conn.transport.write_line("504 RETR: bad file").await?;
        return Ok(HandlerOutcome::Continue);
    };

    let bytes = match conn.store.read_ticket(PathBuf::from(path)).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "RETR: failed to read ticket file");
            conn.transport.write_line("504 RETR: bad file").await?;
            return Ok(HandlerOutcome::Continue);
        }
    };

    conn.transport.write_line("240 Retrieving file").await?;
    conn.transport.write_line(&bytes.len().to_string()).await?;
    conn.transport.write_bytes(&bytes).await?;
    conn.transport.write_line(".").await?;
    Ok(HandlerOutcome::Continue)
}

async fn retr_cookies<S>(conn: &mut Connection<S>, login_cookie: &str) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !conn.host.can_proxy() {
        conn.transport
            .write_line("443 RETR: cannot retr cookies")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }

    let proxies = conn.host.proxies.clone();
    for proxy in &proxies {
        let suffix: u64 = rand::rng().random();
        let new_cookie = format!("{}={:016x}", proxy.service_cookie_prefix, suffix);
        match conn.store.create_service(&new_cookie, login_cookie).await {
            Ok(CreateOutcome::Created) | Ok(CreateOutcome::Exists) => {}
            Err(err) => {
                warn!(error = %err, "RETR: failed to register proxy cookie");
                conn.transport.write_line("503 RETR: internal error").await?;
                return Ok(HandlerOutcome::Fatal);
            }
        }
        conn.replication
            .forward(&format!("REGISTER {login_cookie} - {new_cookie}"))
            .await;
        conn.transport
            .write_line(&format!("241-{new_cookie} {}", proxy.service_hostname))
            .await?;
    }
    conn.transport.write_line("241").await?;
    Ok(HandlerOutcome::Continue)
}
