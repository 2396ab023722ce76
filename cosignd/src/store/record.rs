//! The on-disk line-tagged session record format (§3, §6 of the spec).
//!
//! One attribute per line, first byte is the tag, the rest is the value:
//! `v0`, `s{0|1}`, `i<ip>`, `p<principal>`, `r<realm>`, `t<epoch-seconds>`,
//! and an optional `k<ticket-path>`. This is a fixed legacy text layout the
//! daemon doesn't control, so it gets a hand-written codec rather than
//! `serde` (contrast [`crate::config::Config`], which owns its own format
//! and uses `serde` + `toml` for it).

/// Cookie names (login or service) must stay strictly under this length and
/// must not contain `/`.
pub const MAX_COOKIE_LEN: usize = 128;
pub const MAX_IP_LEN: usize = 64;
pub const MAX_PRINCIPAL_LEN: usize = 256;
pub const MAX_REALM_LEN: usize = 256;

/// Record format version this build understands.
const FORMAT_VERSION: &str = "v0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    LoggedOut = 0,
    LoggedIn = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub state: State,
    pub ip_address: String,
    pub principal: String,
    pub realm: String,
    pub created_at: u64,
    pub ticket_path: Option<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("unsupported record format version")]
    UnknownVersion,
    #[error("record is missing required field '{0}'")]
    MissingField(char),
    #[error("record field '{0}' is not valid")]
    InvalidField(char),
}

impl SessionRecord {
    pub fn new(ip_address: String, principal: String, realm: String, created_at: u64) -> Self {
        Self {
            state: State::LoggedIn,
            ip_address,
            principal,
            realm,
            created_at,
            ticket_path: None,
        }
    }

    /// Serializes to the on-disk line-tagged format, `\n`-terminated lines.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        out.push_str(FORMAT_VERSION);
        out.push('\n');
        out.push('s');
        out.push_str(if self.state == State::LoggedIn { "1" } else { "0" });
        out.push('\n');
        out.push_str(&format!("i{}\n", self.ip_address));
        out.push_str(&format!("p{}\n", self.principal));
        out.push_str(&format!("r{}\n", self.realm));
        out.push_str(&format!("t{}\n", self.created_at));
        if let Some(path) = &self.ticket_path {
            out.push_str(&format!("k{path}\n"));
        }
        out
    }

    /// Parses the on-disk line-tagged format. Unknown tags are ignored
    /// (forward compatible, matching the C source's line-at-a-time reader).
    pub fn parse(contents: &str) -> Result<Self, RecordError> {
        let mut state = None;
        let mut ip_address = None;
        let mut principal = None;
        let mut realm = None;
        let mut created_at = None;
        let mut ticket_path = None;
        let mut saw_version = false;

        for line in contents.lines() {
            if line.is_empty() {
                continue;
            }
            let (tag, value) = line.split_at(1);
            match tag {
                "v" => {
                    if value != "0" {
                        return Err(RecordError::UnknownVersion);
                    }
                    saw_version = true;
                }
                "s" => {
                    state = Some(match value {
                        "0" => State::LoggedOut,
                        "1" => State::LoggedIn,
                        _ => return Err(RecordError::InvalidField('s')),
                    });
                }
                "i" => ip_address = Some(value.to_string()),
                "p" => principal = Some(value.to_string()),
                "r" => realm = Some(value.to_string()),
                "t" => {
                    created_at = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| RecordError::InvalidField('t'))?,
                    )
                }
                "k" => ticket_path = Some(value.to_string()),
                _ => {} // forward-compatible: ignore unknown attribute lines
            }
        }

        if !saw_version {
            return Err(RecordError::UnknownVersion);
        }

        Ok(Self {
            state: state.ok_or(RecordError::MissingField('s'))?,
            ip_address: ip_address.ok_or(RecordError::MissingField('i'))?,
            principal: principal.ok_or(RecordError::MissingField('p'))?,
            realm: realm.ok_or(RecordError::MissingField('r'))?,
            created_at: created_at.ok_or(RecordError::MissingField('t'))?,
            ticket_path,
        })
    }
}

/// The body of a service-cookie file: just the bound login cookie name.
pub fn service_binding_to_line(login_cookie: &str) -> String {
    format!("l{login_cookie}\n")
}

pub fn parse_service_binding(contents: &str) -> Result<String, RecordError> {
    for line in contents.lines() {
        if let Some(login) = line.strip_prefix('l') {
            return Ok(login.to_string());
        }
    }
    Err(RecordError::MissingField('l'))
}

/// A cookie name's two distinct ways of failing §3's invariants. Kept apart
/// (rather than collapsed to a bool) because every command replies with its
/// own code per condition — see `daemon/command.c`'s per-command `f_*`
/// functions, each of which has its own "Invalid cookie name" and "Cookie
/// too long" reply lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieNameError {
    ContainsSlash,
    TooLong,
}

/// Validates a cookie name per §3's invariants: no `/`, strictly under
/// `MAX_COOKIE_LEN`.
pub fn check_cookie_name(name: &str) -> Result<(), CookieNameError> {
    if name.contains('/') {
        return Err(CookieNameError::ContainsSlash);
    }
    if name.len() >= MAX_COOKIE_LEN {
        return Err(CookieNameError::TooLong);
    }
    Ok(())
}

pub fn validate_cookie_name(name: &str) -> bool {
    check_cookie_name(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_tag_format() {
        let record = SessionRecord::new(
            "10.0.0.1".to_string(),
            "alice".to_string(),
            "UMICH.EDU".to_string(),
            1_700_000_000,
        );
        let serialized = record.to_lines();
        let parsed = SessionRecord::parse(&serialized).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn round_trips_with_a_ticket_path() {
        let mut record = SessionRecord::new(
            "10.0.0.1".to_string(),
            "alice".to_string(),
            "UMICH.EDU".to_string(),
            1_700_000_000,
        );
        record.ticket_path = Some("/var/cosign/tickets/abc123".to_string());
        let parsed = SessionRecord::parse(&record.to_lines()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn rejects_unknown_version() {
        let bad = "v1\ns1\ni1.2.3.4\npalice\nrR\nt1\n";
        assert_eq!(SessionRecord::parse(bad), Err(RecordError::UnknownVersion));
    }

    #[test]
    fn rejects_missing_fields() {
        let bad = "v0\ns1\n";
        assert!(matches!(
            SessionRecord::parse(bad),
            Err(RecordError::MissingField(_))
        ));
    }

    #[test]
    fn cookie_name_boundaries() {
        let max_minus_one = "a".repeat(MAX_COOKIE_LEN - 1);
        assert!(validate_cookie_name(&max_minus_one));
        let at_max = "a".repeat(MAX_COOKIE_LEN);
        assert!(!validate_cookie_name(&at_max));
        assert!(!validate_cookie_name("cosign=has/slash"));
    }

    #[test]
    fn check_cookie_name_distinguishes_its_two_failure_modes() {
        assert_eq!(check_cookie_name("cosign=fine"), Ok(()));
        assert_eq!(
            check_cookie_name("cosign=has/slash"),
            Err(CookieNameError::ContainsSlash)
        );
        let too_long = "a".repeat(MAX_COOKIE_LEN);
        assert_eq!(check_cookie_name(&too_long), Err(CookieNameError::TooLong));
    }
}
