//! `TIME` (CGI only): bulk last-activity/state reconciliation gossip.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::{
    error::Result,
    protocol::{
        session::Connection,
        transport::{ReadLine, BULK_LINE_TIMEOUT},
        HandlerOutcome,
    },
    store::StoreError,
};

/// Prefix a login cookie's wire name always carries; gossip lines for
/// anything else (e.g. a service cookie) are skipped rather than processed.
const LOGIN_COOKIE_PREFIX: &str = "cosign=";

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 1 {
        conn.transport.write_line("560 TIME: syntax error").await?;
        return Ok(HandlerOutcome::Continue);
    }

    conn.transport.write_line("360 Send timestamps").await?;

    loop {
        let line = match conn.transport.read_line(BULK_LINE_TIMEOUT).await? {
            ReadLine::Line(line) => line,
            ReadLine::Eof => return Ok(HandlerOutcome::Fatal),
        };
        if line.trim() == "." {
            break;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [cookie, timestamp, state] = fields.as_slice() else {
            warn!(%line, "TIME: malformed gossip line, skipping");
            continue;
        };

        if cookie.contains('/') {
            warn!(%cookie, "TIME: cookie name contains '/', skipping");
            continue;
        }
        if !cookie.starts_with(LOGIN_COOKIE_PREFIX) {
            warn!(%cookie, "TIME: cookie name malformed, skipping");
            continue;
        }
        if cookie.len() >= crate::store::record::MAX_COOKIE_LEN {
            warn!(%cookie, "TIME: cookie name too long, skipping");
            continue;
        }
        let Ok(timestamp) = timestamp.parse::<u64>() else {
            warn!(%cookie, %timestamp, "TIME: bad timestamp in gossip line, skipping");
            continue;
        };

        match conn.store.bump_activity_if_newer(cookie, timestamp).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(err) => warn!(%cookie, error = %err, "TIME: failed to bump activity"),
        }

        if *state == "0" {
            match conn.store.read(cookie).await {
                Ok(record) if record.state == crate::store::State::LoggedIn => {
                    if let Err(err) = conn.store.logout(cookie).await {
                        warn!(%cookie, error = %err, "TIME: failed to apply logout from gossip");
                    }
                }
                Ok(_) => {}
                Err(StoreError::NotFound) => {}
                Err(err) => warn!(%cookie, error = %err, "TIME: failed to read record"),
            }
        }
    }

    conn.transport.write_line("260 TIME: done").await?;
    Ok(HandlerOutcome::Continue)
}
