//! `DAEMON <peerHostname>` (CGI only): the anti-broadcast-loop guard.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    error::Result,
    protocol::{session::Connection, HandlerOutcome},
};

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 2 {
        conn.transport.write_line("571 Syntax error").await?;
        return Ok(HandlerOutcome::Continue);
    }
    let peer_hostname = &args[1];

    if peer_hostname.eq_ignore_ascii_case(&conn.hostname) {
        conn.transport.write_line("471 Schizophrenia!").await?;
        return Ok(HandlerOutcome::Continue);
    }

    conn.replication.suppress();
    conn.transport.write_line("271 Daemon flag set").await?;
    Ok(HandlerOutcome::Continue)
}
