//! `LOGOUT <loginCookie> <ip>` (CGI only).

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::{
    error::Result,
    protocol::{handlers::check_cookie_name, session::Connection, HandlerOutcome},
    store::{CookieNameError, State, StoreError},
};

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 3 {
        conn.transport.write_line("510 LOGOUT: syntax error").await?;
        return Ok(HandlerOutcome::Continue);
    }
    let cookie = &args[1];
    match check_cookie_name(cookie) {
        Ok(()) => {}
        Err(CookieNameError::ContainsSlash) => {
            conn.transport
                .write_line("511 LOGOUT: bad cookie name")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(CookieNameError::TooLong) => {
            conn.transport
                .write_line("512 LOGOUT: cookie too long")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
    }

    let record = match conn.store.read(cookie).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => {
            conn.transport.write_line("513 LOGOUT: not found").await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(err) => {
            warn!(%cookie, error = %err, "LOGOUT: store error reading record");
            conn.transport.write_line("503 LOGOUT: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    if record.state == State::LoggedOut {
        conn.transport
            .write_line("411 LOGOUT: already logged out")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }

    if let Err(err) = conn.store.logout(cookie).await {
        warn!(%cookie, error = %err, "LOGOUT: store error writing record");
        conn.transport.write_line("503 LOGOUT: internal error").await?;
        return Ok(HandlerOutcome::Fatal);
    }

    conn.transport.write_line("210 LOGOUT: ok").await?;
    conn.replication.forward(&args.join(" ")).await;
    Ok(HandlerOutcome::Continue)
}
