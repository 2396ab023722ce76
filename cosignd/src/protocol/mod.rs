//! The session protocol engine (§4 of the spec): dispatcher, state machine,
//! command handlers.

pub mod argv;
pub mod handlers;
pub mod idle;
pub mod session;
pub mod transport;

/// The result of running one command handler.
///
/// Per-command refusals (4xx/5xx replies) are not a variant here: the
/// handler writes the reply itself and returns `Continue`. This only
/// distinguishes the three ways a handler can end the command loop.
pub enum HandlerOutcome {
    /// Reply already written; keep reading commands.
    Continue,
    /// `QUIT`: reply already written, close the connection, exit 0.
    Quit,
    /// A fatal protocol violation or internal error. The handler has
    /// written `421` if the transport was still writable; the connection
    /// closes and the worker reports a nonzero outcome.
    Fatal,
}
