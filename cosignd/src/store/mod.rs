//! The persistent cookie store (§4.2 of the spec).
//!
//! One file per login cookie and one file per service cookie in a flat
//! working directory. Atomic create is open-temp-with-`O_EXCL`,
//! hard-link-into-place, `EEXIST` on the link is the authoritative
//! "already exists" signal — this discipline is load-bearing (§9 design
//! note) and is preserved literally rather than approximated with a plain
//! rename. Every operation runs on the blocking thread pool via
//! `spawn_blocking`, since these are local filesystem syscalls, not async
//! I/O the runtime can drive directly.

pub mod record;

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

pub use record::{
    check_cookie_name, validate_cookie_name, CookieNameError, RecordError, SessionRecord, State,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("cookie not found")]
    NotFound,
    #[error("cookie already exists")]
    Exists,
    #[error("corrupt record: {0}")]
    Corrupt(#[from] RecordError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Exists,
}

/// A keyed, crash-durable map of login/service cookies to session records,
/// backed by one regular file per cookie.
#[derive(Debug, Clone)]
pub struct FileCookieStore {
    cookie_dir: PathBuf,
    ticket_dir: PathBuf,
    tmp_counter: std::sync::Arc<AtomicU64>,
}

impl FileCookieStore {
    pub fn new(cookie_dir: PathBuf, ticket_dir: PathBuf) -> Self {
        Self {
            cookie_dir,
            ticket_dir,
            tmp_counter: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn ticket_dir(&self) -> &Path {
        &self.ticket_dir
    }

    fn cookie_path(&self, name: &str) -> PathBuf {
        self.cookie_dir.join(name)
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.cookie_dir.join(format!(".tmp-{pid:x}-{nanos:x}-{n:x}"))
    }

    async fn blocking<F, T>(f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .expect("cookie store worker task panicked")
    }

    /// Atomically creates the login cookie file `name` containing `record`.
    pub async fn create_login(
        &self,
        name: &str,
        record: &SessionRecord,
    ) -> Result<CreateOutcome, StoreError> {
        let dest = self.cookie_path(name);
        let tmp = self.temp_path();
        let contents = record.to_lines();
        Self::blocking(move || create_atomic(&tmp, &dest, contents.as_bytes())).await
    }

    /// Atomically creates the service cookie file `service_name`, bound to
    /// `login_name`.
    pub async fn create_service(
        &self,
        service_name: &str,
        login_name: &str,
    ) -> Result<CreateOutcome, StoreError> {
        let dest = self.cookie_path(service_name);
        let tmp = self.temp_path();
        let contents = record::service_binding_to_line(login_name);
        Self::blocking(move || create_atomic(&tmp, &dest, contents.as_bytes())).await
    }

    /// Reads and parses a login record.
    pub async fn read(&self, name: &str) -> Result<SessionRecord, StoreError> {
        let path = self.cookie_path(name);
        Self::blocking(move || {
            let contents = read_to_string(&path)?;
            Ok(SessionRecord::parse(&contents)?)
        })
        .await
    }

    /// Resolves a service cookie to the login cookie it is bound to.
    pub async fn resolve_service(&self, service_name: &str) -> Result<String, StoreError> {
        let path = self.cookie_path(service_name);
        Self::blocking(move || {
            let contents = read_to_string(&path)?;
            Ok(record::parse_service_binding(&contents)?)
        })
        .await
    }

    /// Bumps the record's modification time to now, without altering its
    /// contents (used by successful CHECK/REGISTER touches).
    pub async fn touch(&self, name: &str) -> Result<(), StoreError> {
        let path = self.cookie_path(name);
        Self::blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&path)
                .map_err(map_not_found)?;
            file.set_modified(SystemTime::now())?;
            Ok(())
        })
        .await
    }

    /// Returns the record's `lastActivity` timestamp (its mtime) as Unix
    /// seconds, for idle-policy evaluation and TIME gossip.
    pub async fn last_activity(&self, name: &str) -> Result<u64, StoreError> {
        let path = self.cookie_path(name);
        Self::blocking(move || {
            let meta = std::fs::metadata(&path).map_err(map_not_found)?;
            let modified = meta.modified()?;
            Ok(modified
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs())
        })
        .await
    }

    /// Sets the record's mtime to `timestamp` if `timestamp` is newer than
    /// the currently stored value (used by TIME gossip, which must never
    /// move a timestamp backwards).
    pub async fn bump_activity_if_newer(&self, name: &str, timestamp: u64) -> Result<(), StoreError> {
        let path = self.cookie_path(name);
        Self::blocking(move || {
            let meta = std::fs::metadata(&path).map_err(map_not_found)?;
            let current = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            if timestamp > current {
                let file = std::fs::OpenOptions::new().write(true).open(&path)?;
                let new_time = UNIX_EPOCH + std::time::Duration::from_secs(timestamp);
                file.set_modified(new_time)?;
            }
            Ok(())
        })
        .await
    }

    /// Rewrites a login record's `ticket_path`, used once a LOGIN-with-ticket
    /// upload has landed on disk (the record itself is created before the
    /// ticket body is known, so the CN/identity existence check happens
    /// before any bytes are read off the wire).
    pub async fn set_ticket_path(&self, name: &str, ticket_path: &str) -> Result<(), StoreError> {
        let dest = self.cookie_path(name);
        let tmp = self.temp_path();
        let ticket_path = ticket_path.to_string();
        Self::blocking(move || {
            let contents = read_to_string(&dest)?;
            let mut record = SessionRecord::parse(&contents)?;
            record.ticket_path = Some(ticket_path);
            std::fs::write(&tmp, record.to_lines().as_bytes())?;
            if let Err(err) = std::fs::rename(&tmp, &dest) {
                let _ = std::fs::remove_file(&tmp);
                return Err(err.into());
            }
            Ok(())
        })
        .await
    }

    /// Atomically flips `state` to logged-out, preserving every other
    /// attribute. A no-op (still `Ok`) if the record is already logged out.
    pub async fn logout(&self, name: &str) -> Result<(), StoreError> {
        let dest = self.cookie_path(name);
        let tmp = self.temp_path();
        Self::blocking(move || {
            let contents = read_to_string(&dest)?;
            let mut record = SessionRecord::parse(&contents)?;
            record.state = State::LoggedOut;
            std::fs::write(&tmp, record.to_lines().as_bytes())?;
            if let Err(err) = std::fs::rename(&tmp, &dest) {
                let _ = std::fs::remove_file(&tmp);
                return Err(err.into());
            }
            Ok(())
        })
        .await
    }

    /// Writes `bytes` to a freshly created, exclusively-named file under
    /// the ticket directory and returns its path.
    pub async fn store_ticket(&self, bytes: Vec<u8>) -> Result<PathBuf, StoreError> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let name = random_ticket_name(n);
        let path = self.ticket_dir.join(name);
        Self::blocking(move || {
            let mut file = std::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)?;
            use std::io::Write;
            file.write_all(&bytes)?;
            Ok(path)
        })
        .await
    }

    /// Reads a ticket file in full, for RETR tgt.
    pub async fn read_ticket(&self, path: PathBuf) -> Result<Vec<u8>, StoreError> {
        Self::blocking(move || Ok(std::fs::read(&path).map_err(map_not_found)?)).await
    }

    /// Removes a ticket file (used to unwind a failed LOGIN-with-ticket).
    pub async fn remove_ticket(&self, path: PathBuf) -> Result<(), StoreError> {
        Self::blocking(move || {
            match std::fs::remove_file(&path) {
                Ok(()) | Err(_) if !path.exists() => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    /// Removes a login record (used to unwind a failed LOGIN-with-ticket).
    pub async fn remove_login(&self, name: &str) -> Result<(), StoreError> {
        let path = self.cookie_path(name);
        Self::blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        })
        .await
    }
}

fn random_ticket_name(counter: u64) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let suffix: u64 = rng.random();
    format!("{counter:x}-{suffix:016x}")
}

fn create_atomic(tmp: &Path, dest: &Path, contents: &[u8]) -> Result<CreateOutcome, StoreError> {
    {
        let mut file = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(tmp)?;
        use std::io::Write;
        file.write_all(contents)?;
    }

    match std::fs::hard_link(tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(tmp);
            Ok(CreateOutcome::Created)
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = std::fs::remove_file(tmp);
            Ok(CreateOutcome::Exists)
        }
        Err(err) => {
            let _ = std::fs::remove_file(tmp);
            Err(err.into())
        }
    }
}

fn read_to_string(path: &Path) -> Result<String, StoreError> {
    std::fs::read_to_string(path).map_err(map_not_found)
}

fn map_not_found(err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        StoreError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileCookieStore) {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies");
        let tickets = dir.path().join("tickets");
        std::fs::create_dir_all(&cookies).unwrap();
        std::fs::create_dir_all(&tickets).unwrap();
        let store = FileCookieStore::new(cookies, tickets);
        (dir, store)
    }

    #[tokio::test]
    async fn create_login_then_read_round_trips() {
        let (_dir, store) = store();
        let record = SessionRecord::new(
            "10.0.0.1".into(),
            "alice".into(),
            "UMICH.EDU".into(),
            1_700_000_000,
        );
        let outcome = store.create_login("cosign=ABC", &record).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);

        let read_back = store.read("cosign=ABC").await.unwrap();
        assert_eq!(read_back, record);
    }

    #[tokio::test]
    async fn concurrent_create_login_is_linearizable() {
        let (_dir, store) = store();
        let record = SessionRecord::new("1.1.1.1".into(), "bob".into(), "R".into(), 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let record = record.clone();
            handles.push(tokio::spawn(async move {
                store.create_login("cosign=RACE", &record).await
            }));
        }

        let mut created = 0;
        let mut existed = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                CreateOutcome::Created => created += 1,
                CreateOutcome::Exists => existed += 1,
            }
        }
        assert_eq!(created, 1);
        assert_eq!(existed, 7);
    }

    #[tokio::test]
    async fn logout_is_monotonic_and_preserves_other_fields() {
        let (_dir, store) = store();
        let record = SessionRecord::new("1.2.3.4".into(), "carol".into(), "R".into(), 5);
        store.create_login("cosign=X", &record).await.unwrap();

        store.logout("cosign=X").await.unwrap();
        let after = store.read("cosign=X").await.unwrap();
        assert_eq!(after.state, State::LoggedOut);
        assert_eq!(after.principal, "carol");

        // Logging out again is a no-op, not an error, and stays logged out.
        store.logout("cosign=X").await.unwrap();
        let after2 = store.read("cosign=X").await.unwrap();
        assert_eq!(after2.state, State::LoggedOut);
    }

    #[tokio::test]
    async fn service_cookie_resolves_to_login_forever() {
        let (_dir, store) = store();
        store
            .create_service("cosign-weblogin=XYZ", "cosign=ABC")
            .await
            .unwrap();
        assert_eq!(
            store.resolve_service("cosign-weblogin=XYZ").await.unwrap(),
            "cosign=ABC"
        );
        assert!(matches!(
            store.resolve_service("cosign-weblogin=NOPE").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn touch_never_decreases_last_activity() {
        let (_dir, store) = store();
        let record = SessionRecord::new("1.1.1.1".into(), "dave".into(), "R".into(), 1);
        store.create_login("cosign=T", &record).await.unwrap();
        let before = store.last_activity("cosign=T").await.unwrap();
        store.touch("cosign=T").await.unwrap();
        let after = store.last_activity("cosign=T").await.unwrap();
        assert!(after >= before);
    }

    #[tokio::test]
    async fn ticket_round_trip_is_byte_exact() {
        let (_dir, store) = store();
        let bytes: Vec<u8> = (0..4096u32).map(|b| (b % 256) as u8).collect();
        let path = store.store_ticket(bytes.clone()).await.unwrap();
        let read_back = store.read_ticket(path).await.unwrap();
        assert_eq!(read_back, bytes);
    }
}
