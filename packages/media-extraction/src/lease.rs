//! Cross-process exclusive leases backed by atomic file creation.
//!
//! A lease is a marker file containing `pid:unix_timestamp`. Creation uses
//! `O_EXCL` semantics, so exactly one process can hold a given path. Leases
//! whose owner is dead, or that are older than the stale timeout, are
//! reclaimed by the next caller. Reclaimers serialize on a sibling
//! `<name>.reclaim` gate and only remove the exact marker they judged stale.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LockError;

const MANIFEST_LOCK_NAME: &str = "manifest.lock";

/// Timing knobs for a lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseOptions {
    /// Give up acquiring after this long
    pub timeout: Duration,
    /// Sleep between acquisition attempts
    pub poll_interval: Duration,
    /// A marker older than this is reclaimable even if its owner looks alive
    pub stale_timeout: Duration,
}

impl LeaseOptions {
    /// Defaults for a per-property lease.
    pub fn property() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            stale_timeout: Duration::from_secs(300),
        }
    }

    /// Defaults for the manifest-wide lease (held briefly, so shorter).
    pub fn manifest() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            stale_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = stale_timeout;
        self
    }
}

/// Contents of a lease marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockMarker {
    pub pid: u32,
    pub timestamp: u64,
}

impl LockMarker {
    /// Marker for the current process, stamped now.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: unix_now(),
        }
    }

    /// Parse `pid:timestamp`.
    pub fn parse(s: &str) -> Option<Self> {
        let (pid, ts) = s.trim().split_once(':')?;
        Some(Self {
            pid: pid.parse().ok()?,
            timestamp: ts.parse().ok()?,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.pid, self.timestamp)
    }

    /// Dead owner or older than `stale_timeout`.
    pub fn is_stale(&self, stale_timeout: Duration) -> bool {
        let age = unix_now().saturating_sub(self.timestamp);
        age > stale_timeout.as_secs() || !process_alive(self.pid)
    }
}

/// An exclusive lease on a filesystem path.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    options: LeaseOptions,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, options: LeaseOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    /// Per-property lease at `<locks_dir>/<property_hash>.lock`.
    pub fn for_property(locks_dir: &Path, property_hash: &str, options: LeaseOptions) -> Self {
        Self::new(locks_dir.join(format!("{property_hash}.lock")), options)
    }

    /// Manifest-wide lease at `<locks_dir>/manifest.lock`.
    pub fn for_manifest(locks_dir: &Path, options: LeaseOptions) -> Self {
        Self::new(locks_dir.join(MANIFEST_LOCK_NAME), options)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lease, polling until the timeout elapses.
    pub async fn acquire(&self) -> Result<LeaseGuard, LockError> {
        let started = Instant::now();
        let deadline = started + self.options.timeout;

        loop {
            if let Some(guard) = self.try_acquire()? {
                debug!(path = %self.path.display(), waited_ms = started.elapsed().as_millis() as u64, "Lease acquired");
                return Ok(guard);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::AcquisitionTimeout {
                    path: self.path.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    /// Single acquisition attempt. `Ok(None)` means a live owner holds it.
    pub fn try_acquire(&self) -> Result<Option<LeaseGuard>, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        match self.create_marker() {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.stale_contents() {
                Some(observed) => self.reclaim(&observed),
                None => Ok(None),
            },
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Whether the current marker (if any) can be reclaimed.
    pub fn is_stale(&self) -> bool {
        match fs::read_to_string(&self.path) {
            Ok(contents) => self.contents_stale(&contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    fn contents_stale(&self, contents: &str) -> bool {
        match LockMarker::parse(contents) {
            Some(marker) => marker.is_stale(self.options.stale_timeout),
            // Half-written or foreign marker: fall back to file age.
            None => path_age(&self.path).map_or(false, |age| age > self.options.stale_timeout),
        }
    }

    /// Current marker contents, if they are stale.
    fn stale_contents(&self) -> Option<String> {
        let contents = fs::read_to_string(&self.path).ok()?;
        self.contents_stale(&contents).then_some(contents)
    }

    fn gate_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".reclaim");
        PathBuf::from(name)
    }

    /// Replace the stale marker whose contents were `observed`.
    fn reclaim(&self, observed: &str) -> Result<Option<LeaseGuard>, LockError> {
        let gate = self.gate_path();
        match OpenOptions::new().write(true).create_new(true).open(&gate) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // A reclaimer that died inside the gate leaves it behind.
                if path_age(&gate).is_some_and(|age| age > self.options.stale_timeout) {
                    warn!(path = %gate.display(), "Removing abandoned reclaim gate");
                    let _ = fs::remove_file(&gate);
                }
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        }

        let reclaimed = self.replace_marker(observed);
        if let Err(e) = fs::remove_file(&gate) {
            warn!(path = %gate.display(), error = %e, "Failed to remove reclaim gate");
        }
        reclaimed
    }

    // Caller holds the reclaim gate.
    fn replace_marker(&self, observed: &str) -> Result<Option<LeaseGuard>, LockError> {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == observed => {
                warn!(path = %self.path.display(), "Reclaiming stale lease");
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(self.io_error(e)),
                }
            }
            // Replaced since it was judged stale; the new marker stands.
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error(e)),
        }

        match self.create_marker() {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn create_marker(&self) -> io::Result<LeaseGuard> {
        let marker = LockMarker::current();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(marker.encode().as_bytes())?;
        file.sync_all()?;
        Ok(LeaseGuard {
            path: self.path.clone(),
            marker,
            released: false,
        })
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Proof of lease ownership. The marker is removed on release or drop.
#[derive(Debug)]
pub struct LeaseGuard {
    path: PathBuf,
    marker: LockMarker,
    released: bool,
}

impl LeaseGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing I/O errors.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        self.remove_if_owned()
    }

    // Only delete a marker we wrote; a reclaimer may have replaced it.
    fn remove_if_owned(&self) -> io::Result<()> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if LockMarker::parse(&contents) == Some(self.marker) => {
                fs::remove_file(&self.path)
            }
            Ok(_) => {
                warn!(path = %self.path.display(), "Lease was reclaimed by another owner");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.remove_if_owned() {
                warn!(path = %self.path.display(), error = %e, "Failed to release lease");
            }
        }
    }
}

fn path_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Check if a process with the given PID exists.
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        // Out-of-range pids would turn into process-group signals.
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // Signal 0 doesn't send anything, it only checks for existence.
        let rc = unsafe { libc::kill(raw, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        // Without a probe, rely on the age check alone.
        true
    }
}
