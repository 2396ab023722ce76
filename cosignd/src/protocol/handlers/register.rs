//! `REGISTER <loginCookie> <ip> <serviceCookie>` (CGI only).

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
    store::{record::MAX_COOKIE_LEN, CookieNameError, CreateOutcome, State, StoreError},
    time::unix_now,
};

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 4 {
        conn.transport
            .write_line("520 REGISTER: syntax error")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }
    let login_cookie = &args[1];
    let service_cookie = &args[3];
    // The source only slash-checks the login cookie (`av[1]`); the service
    // cookie (`av[3]`) is exempt from that check, but both count toward the
    // combined length check below.
    if let Err(CookieNameError::ContainsSlash) = check_cookie_name(login_cookie) {
        conn.transport
            .write_line("521 REGISTER: bad cookie name")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }
    if login_cookie.len() >= MAX_COOKIE_LEN || service_cookie.len() >= MAX_COOKIE_LEN {
        conn.transport
            .write_line("522 REGISTER: cookie too long")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }

    let record = match conn.store.read(login_cookie).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => {
            conn.transport
                .write_line("523 REGISTER: not found")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(err) => {
            warn!(%login_cookie, error = %err, "REGISTER: store error reading login record");
            conn.transport
                .write_line("503 REGISTER: internal error")
                .await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    if record.state == State::LoggedOut {
        conn.transport
            .write_line("420 REGISTER: logged out")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }

    let last_activity = match conn.store.last_activity(login_cookie).await {
        Ok(t) => t,
        Err(err) => {
            warn!(%login_cookie, error = %err, "REGISTER: store error reading activity");
            conn.transport
                .write_line("503 REGISTER: internal error")
                .await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };
    let age = unix_now().saturating_sub(last_activity);

    match idle::classify_register(age) {
        IdleOutcome::Grey => {
            conn.transport
                .write_line("521 REGISTER: idle grey window")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        IdleOutcome::Expired => {
            conn.store.logout(login_cookie).await.ok();
            conn.transport
                .write_line("421 REGISTER: idle logged out")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        IdleOutcome::Fresh => {}
    }

    let outcome = match conn.store.create_service(service_cookie, login_cookie).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(%service_cookie, error = %err, "REGISTER: store error creating binding");
            conn.transport
                .write_line("503 REGISTER: internal error")
                .await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    if outcome == CreateOutcome::Exists {
        conn.transport.write_line("226 REGISTER: already").await?;
        return Ok(HandlerOutcome::Continue);
    }

    conn.store.touch(login_cookie).await.ok();
    conn.transport.write_line("220 REGISTER: ok").await?;
    conn.replication.forward(&args.join(" ")).await;
    Ok(HandlerOutcome::Continue)
}
