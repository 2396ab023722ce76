//! `CHECK <cookie>` (CGI or SERVICE).
//!
//! A `cosign-` prefixed argument is a service cookie, resolved to its
//! login before the state/idle checks; a bare cookie is a login cookie
//! directly. The two paths differ only in their success reply-code base
//! (231 vs 232), matching the source's `chkLogin` and `chkService` split.

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
    store::{CookieNameError, State, StoreError},
    time::unix_now,
};

const SERVICE_COOKIE_PREFIX: &str = "cosign-";

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 2 {
        conn.transport.write_line("530 CHECK: syntax error").await?;
        return Ok(HandlerOutcome::Continue);
    }
    let arg = &args[1];
    match check_cookie_name(arg) {
        Ok(()) => {}
        Err(CookieNameError::ContainsSlash) => {
            conn.transport
                .write_line("531 CHECK: bad cookie name")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(CookieNameError::TooLong) => {
            conn.transport
                .write_line("532 CHECK: cookie too long")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
    }

    let (base_code, login_cookie) = if arg.starts_with(SERVICE_COOKIE_PREFIX) {
        match conn.store.resolve_service(arg).await {
            Ok(login) => (231, login),
            Err(StoreError::NotFound) => {
                conn.transport.write_line("533 CHECK: not found").await?;
                return Ok(HandlerOutcome::Continue);
            }
            Err(err) => {
                warn!(cookie = %arg, error = %err, "CHECK: store error resolving service cookie");
                conn.transport.write_line("503 CHECK: internal error").await?;
                return Ok(HandlerOutcome::Fatal);
            }
        }
    } else {
        (232, arg.clone())
    };

    let record = match conn.store.read(&login_cookie).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => {
            conn.transport.write_line("534 CHECK: not found").await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(err) => {
            warn!(%login_cookie, error = %err, "CHECK: store error reading record");
            conn.transport.write_line("503 CHECK: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    if record.state == State::LoggedOut {
        conn.transport
            .write_line("430 CHECK: already logged out")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }

    let last_activity = match conn.store.last_activity(&login_cookie).await {
        Ok(t) => t,
        Err(err) => {
            warn!(%login_cookie, error = %err, "CHECK: store error reading activity");
            conn.transport.write_line("503 CHECK: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };
    let age = unix_now().saturating_sub(last_activity);

    match idle::classify_check(age) {
        IdleOutcome::Grey => {
            conn.transport
                .write_line("531 CHECK: idle grey window")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        IdleOutcome::Expired => {
            conn.store.logout(&login_cookie).await.ok();
            conn.transport
                .write_line("431 CHECK: idle logged out")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        IdleOutcome::Fresh => {}
    }

    conn.store.touch(&login_cookie).await.ok();
    conn.transport
        .write_line(&format!(
            "{base_code} {} {} {}",
            record.ip_address, record.principal, record.realm
        ))
        .await?;
    Ok(HandlerOutcome::Continue)
}
