//! `LOGIN <loginCookie> <ip> <principal> <realm> [kerberos]` (CGI only).

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use crate::{
    error::Result,
    protocol::{
        handlers::check_cookie_name,
        session::Connection,
        transport::{ReadLine, BULK_LINE_TIMEOUT, TICKET_BODY_TIMEOUT},
        HandlerOutcome,
    },
    store::{
        record::{MAX_IP_LEN, MAX_PRINCIPAL_LEN, MAX_REALM_LEN},
        CookieNameError, CreateOutcome, SessionRecord, State,
    },
    time::unix_now,
};

pub async fn run<S>(conn: &mut Connection<S>, args: &[String]) -> Result<HandlerOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if args.len() != 5 && args.len() != 6 {
        conn.transport.write_line("500 LOGIN: syntax error").await?;
        return Ok(HandlerOutcome::Continue);
    }
    let with_ticket = match args.get(5) {
        None => false,
        Some(tail) if tail.eq_ignore_ascii_case("kerberos") => true,
        Some(_) => {
            conn.transport
                .write_line("507 LOGIN: ticket type not supported")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
    };

    let cookie = args[1].clone();
    let ip = args[2].clone();
    let principal = args[3].clone();
    let realm = args[4].clone();

    match check_cookie_name(&cookie) {
        Ok(()) => {}
        Err(CookieNameError::ContainsSlash) => {
            conn.transport
                .write_line("501 LOGIN: bad cookie name")
                .await?;
            return Ok(HandlerOutcome::Continue);
        }
        Err(CookieNameError::TooLong) => {
            conn.transport.write_line("502 LOGIN: cookie too long").await?;
            return Ok(HandlerOutcome::Continue);
        }
    }
    if ip.len() >= MAX_IP_LEN || principal.len() >= MAX_PRINCIPAL_LEN || realm.len() >= MAX_REALM_LEN
    {
        conn.transport
            .write_line("504 LOGIN: bad file format")
            .await?;
        return Ok(HandlerOutcome::Continue);
    }

    let record = SessionRecord::new(ip, principal.clone(), realm, unix_now());

    let outcome = match conn.store.create_login(&cookie, &record).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(%cookie, error = %err, "LOGIN: store error creating record");
            conn.transport.write_line("503 LOGIN: internal error").await?;
            return Ok(HandlerOutcome::Fatal);
        }
    };

    if outcome == CreateOutcome::Exists {
        let existing = match conn.store.read(&cookie).await {
            Ok(record) => record,
            Err(err) => {
                warn!(%cookie, error = %err, "LOGIN: failed to read existing record");
                conn.transport.write_line("503 LOGIN: internal error").await?;
                return Ok(HandlerOutcome::Fatal);
            }
        };
        if existing.state == State::LoggedOut {
            conn.transport.write_line("505 LOGIN: already logged out").await?;
        } else if existing.principal != principal {
            conn.transport.write_line("402 LOGIN: user mismatch").await?;
        } else {
            conn.transport.write_line("201 LOGIN: already exists").await?;
        }
        return Ok(HandlerOutcome::Continue);
    }

    if with_ticket {
        match ingest_ticket(conn, &cookie).await? {
            TicketOutcome::Stored => {
                conn.transport
                    .write_line("201 LOGIN: cookie & ticket stored")
                    .await?;
            }
            TicketOutcome::Fatal => {
                conn.transport
                    .write_line("505 LOGIN: ticket length mismatch")
                    .await?;
                return Ok(HandlerOutcome::Fatal);
            }
        }
    } else {
        conn.transport.write_line("200 LOGIN: cookie stored").await?;
    }

    let wire_line = args.join(" ");
    conn.replication.forward(&wire_line).await;
    Ok(HandlerOutcome::Continue)
}

enum TicketOutcome {
    Stored,
    Fatal,
}

/// Reads the ticket sideband: a decimal length line, exactly that many
/// octets, then a terminating `.` line. On any mismatch, unwinds both the
/// ticket file (if written) and the just-created login record.
async fn ingest_ticket<S>(conn: &mut Connection<S>, cookie: &str) -> Result<TicketOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.transport.write_line("300 Send length then file").await?;

    let length_line = match conn.transport.read_line(BULK_LINE_TIMEOUT).await? {
        ReadLine::Line(line) => line,
        ReadLine::Eof => {
            conn.store.remove_login(cookie).await.ok();
            return Ok(TicketOutcome::Fatal);
        }
    };
    let declared_len: usize = match length_line.trim().parse() {
        Ok(n) => n,
        Err(_) => {
            conn.store.remove_login(cookie).await.ok();
            return Ok(TicketOutcome::Fatal);
        }
    };

    let body = conn
        .transport
        .read_exact(declared_len, TICKET_BODY_TIMEOUT)
        .await?;

    let terminator = match conn.transport.read_line(BULK_LINE_TIMEOUT).await? {
        ReadLine::Line(line) => line,
        ReadLine::Eof => {
            conn.store.remove_login(cookie).await.ok();
            return Ok(TicketOutcome::Fatal);
        }
    };

    if terminator.trim() != "." {
        drain_until_terminator(conn).await?;
        conn.store.remove_login(cookie).await.ok();
        return Ok(TicketOutcome::Fatal);
    }

    let path = match conn.store.store_ticket(body).await {
        Ok(path) => path,
        Err(err) => {
            warn!(%cookie, error = %err, "LOGIN: failed to persist ticket");
            conn.store.remove_login(cookie).await.ok();
            return Ok(TicketOutcome::Fatal);
        }
    };

    if let Err(err) = conn
        .store
        .set_ticket_path(cookie, &path.to_string_lossy())
        .await
    {
        warn!(%cookie, error = %err, "LOGIN: failed to record ticket path");
        return Ok(TicketOutcome::Fatal);
    }

    Ok(TicketOutcome::Stored)
}

async fn drain_until_terminator<S>(conn: &mut Connection<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        match conn.transport.read_line(BULK_LINE_TIMEOUT).await {
            Ok(ReadLine::Line(line)) if line.trim() == "." => return Ok(()),
            Ok(ReadLine::Line(_)) => continue,
            Ok(ReadLine::Eof) => return Ok(()),
            Err(_) => return Ok(()),
        }
    }
}
