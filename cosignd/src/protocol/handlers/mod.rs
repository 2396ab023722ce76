//! Command handlers (§4.6 of the spec), one module per non-trivial
//! command; `NOOP`/`QUIT`/`HELP` are small enough to live here directly.

pub mod check;
pub mod daemon;
pub mod login;
pub mod logout;
pub mod register;
pub mod retr;
pub mod time_gossip;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    error::Result,
    protocol::{session::Connection, HandlerOutcome},
};

pub async fn noop<S>(conn: &mut Connection<S>) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.transport
        .write_line(&format!("250 cosign v{}", env!("CARGO_PKG_VERSION")))
        .await?;
    Ok(HandlerOutcome::Continue)
}

pub async fn quit<S>(conn: &mut Connection<S>) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.transport.write_line("221 Goodbye").await?;
    Ok(HandlerOutcome::Quit)
}

pub async fn help<S>(conn: &mut Connection<S>) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.transport
        .write_line("203 LOGIN LOGOUT REGISTER CHECK RETR TIME DAEMON NOOP QUIT HELP")
        .await?;
    Ok(HandlerOutcome::Continue)
}

pub(super) use crate::store::check_cookie_name;
