use crate::clock::{Clock, SystemClock};
use crate::error::{Error, IoFault, Result};
use crate::lock::{LockCoordinator, LockMode};
use crate::policy::RotationPolicy;
use crate::retention::{RetentionEnforcer, RetentionReport};
use crate::scheduler::{self, Deadline};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

/// Lifecycle of a writer. `Rolling` is only observable inside the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterState {
    Open,
    Rolling,
    Closed,
}

/// Knobs that are not part of the rotation policy itself.
#[derive(Clone)]
pub struct WriterOptions {
    pub lock_mode: LockMode,
    pub clock: Arc<dyn Clock>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions { lock_mode: LockMode::default(), clock: Arc::new(SystemClock) }
    }
}

/// Read-only view of a writer, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct WriterInfo {
    pub path: PathBuf,
    pub lock_path: PathBuf,
    pub lock_mode: LockMode,
    pub state: WriterState,
    pub next_deadline: String,
    pub policy: RotationPolicy,
}

/// `<base>.<n>`, the n-th most recent backup.
pub fn backup_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

/// Append-only log file that rolls itself over by size and/or time.
///
/// Every `write` runs "check triggers, maybe roll over, append" as one
/// critical section: threads sharing the writer are serialized by an
/// internal mutex, other writers and processes by an exclusive lock on the
/// `<file>.lock` sibling. A payload that would push the file to
/// `max_bytes` or beyond goes into the fresh file, never the old one.
///
/// Diagnostics are logged through `tracing` only after both locks are
/// released, so the writer may serve as its own subscriber's sink.
pub struct RotatingFileWriter {
    path: PathBuf,
    policy: RotationPolicy,
    retention: Option<RetentionEnforcer>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

struct Inner {
    lock: LockCoordinator,
    file: ActiveFile,
}

struct ActiveFile {
    state: WriterState,
    stream: Option<File>,
    next_deadline: Deadline,
}

#[derive(Default)]
struct Outcome {
    reattached: bool,
    rollover: Option<Rollover>,
}

struct Rollover {
    faults: Vec<IoFault>,
    retention: Option<RetentionReport>,
}

impl RotatingFileWriter {
    pub fn new(path: impl AsRef<Path>, policy: RotationPolicy) -> Result<Self> {
        Self::with_options(path, policy, WriterOptions::default())
    }

    /*
        @@@
        @with_options();
        . Applies the filename decorations and makes the path absolute; nothing is opened yet.
        . Schedules the first deadline from the clock's now.
        . If the active file already exists and missed a whole trigger period, the first write rolls it over.
    */
    pub fn with_options(path: impl AsRef<Path>, policy: RotationPolicy, options: WriterOptions) -> Result<Self> {
        let now = options.clock.now();
        let mut path = policy.decorate(path.as_ref(), &now);
        if path.is_relative() {
            let cwd = env::current_dir().map_err(|e| Error::io(&path, e))?;
            path = cwd.join(path);
        }

        let mut next_deadline = Deadline::for_policy(&policy, &now);
        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            if scheduler::is_stale(&policy, &DateTime::<Local>::from(modified), &now) {
                debug!(path = %path.display(), "active file predates the last period; rolling over on first write");
                next_deadline = Deadline::At(now);
            }
        }

        let retention = policy.expiration().map(|rule| RetentionEnforcer::new(&path, *rule));
        let lock = LockCoordinator::for_active_file(&path, options.lock_mode);

        Ok(RotatingFileWriter {
            path,
            policy,
            retention,
            clock: options.clock,
            inner: Mutex::new(Inner {
                lock,
                file: ActiveFile { state: WriterState::Open, stream: None, next_deadline },
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    pub fn state(&self) -> WriterState {
        self.inner().file.state
    }

    pub fn next_deadline(&self) -> Deadline {
        self.inner().file.next_deadline
    }

    pub fn info(&self) -> WriterInfo {
        let inner = self.inner();
        WriterInfo {
            path: self.path.clone(),
            lock_path: inner.lock.path().to_path_buf(),
            lock_mode: inner.lock.mode(),
            state: inner.file.state,
            next_deadline: inner.file.next_deadline.to_string(),
            policy: self.policy.clone(),
        }
    }

    /// Appends one already-encoded payload, rolling over first if due.
    ///
    /// Not flushed beyond the OS write; call [`flush`](Self::flush) or
    /// [`sync`](Self::sync) as needed. On `Error::RolloverIo` the payload
    /// *was* appended to the reopened active file.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        let outcome = self.locked(|file, writer| file.append(writer, payload))?;
        self.report(outcome)
    }

    /// Forces a rollover now, regardless of triggers.
    pub fn rotate(&self) -> Result<()> {
        let outcome = self.locked(|file, writer| {
            file.ensure_open(writer)?;
            let rollover = file.roll_over(writer)?;
            Ok(Outcome { reattached: false, rollover: Some(rollover) })
        })?;
        self.report(outcome)
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner();
        let file = &mut inner.file;
        if file.state == WriterState::Closed {
            return Err(Error::WriterClosed { path: self.path.clone() });
        }
        match file.stream.as_mut() {
            Some(stream) => stream.flush().map_err(|e| Error::io(&self.path, e)),
            None => Ok(()),
        }
    }

    /// Flushes and fsyncs the active file.
    pub fn sync(&self) -> Result<()> {
        self.flush()?;
        match self.inner().file.stream.as_ref() {
            Some(stream) => stream.sync_all().map_err(|e| Error::io(&self.path, e)),
            None => Ok(()),
        }
    }

    /// Flushes and closes the stream. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner();
        let file = &mut inner.file;
        if file.state == WriterState::Closed {
            return Ok(());
        }
        file.state = WriterState::Closed;
        if let Some(mut stream) = file.stream.take() {
            stream.flush().map_err(|e| Error::io(&self.path, e))?;
        }
        Ok(())
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locked(&self, critical: impl FnOnce(&mut ActiveFile, &Self) -> Result<Outcome>) -> Result<Outcome> {
        let mut inner = self.inner();
        if inner.file.state == WriterState::Closed {
            return Err(Error::WriterClosed { path: self.path.clone() });
        }
        let Inner { lock, file } = &mut *inner;
        lock.with_lock(|| critical(file, self))?
    }

    fn report(&self, outcome: Outcome) -> Result<()> {
        let path = self.path.display();
        if outcome.reattached {
            debug!(path = %path, "active file was rotated by another writer; reopened");
        }
        let Some(rollover) = outcome.rollover else {
            return Ok(());
        };

        if let Some(report) = rollover.retention {
            for removed in &report.removed {
                debug!(path = %path, backup = %removed.display(), "removed expired backup");
            }
            for failure in &report.failures {
                warn!(path = %path, error = %failure, "retention sweep could not remove a backup");
            }
        }

        if rollover.faults.is_empty() {
            info!(path = %path, "rolled over");
            return Ok(());
        }
        for fault in &rollover.faults {
            error!(path = %path, error = %fault, "rollover step failed");
        }
        Err(Error::RolloverIo { path: self.path.clone(), faults: rollover.faults })
    }
}

impl ActiveFile {
    fn append(&mut self, writer: &RotatingFileWriter, payload: &[u8]) -> Result<Outcome> {
        let reattached = self.ensure_open(writer)?;
        let mut outcome = Outcome { reattached, rollover: None };

        if self.rollover_due(writer, payload.len() as u64)? {
            outcome.rollover = Some(self.roll_over(writer)?);
        }

        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::io(&writer.path, io::Error::new(io::ErrorKind::NotFound, "active file is not open"))
        })?;
        stream.write_all(payload).map_err(|e| Error::io(&writer.path, e))?;
        Ok(outcome)
    }

    /// Opens the stream lazily, or reopens it when another writer rotated
    /// the file out from under us. Returns true in the latter case.
    fn ensure_open(&mut self, writer: &RotatingFileWriter) -> Result<bool> {
        let reattached = match &self.stream {
            None => false,
            Some(stream) if is_current(stream, &writer.path) => return Ok(false),
            Some(_) => true,
        };
        self.stream = None;
        self.stream = Some(open_append(&writer.path)?);

        // the other writer already handled the boundary we were waiting for
        let now = writer.clock.now();
        if reattached && self.next_deadline.is_due(&now) {
            self.next_deadline = Deadline::for_policy(&writer.policy, &now);
        }
        Ok(reattached)
    }

    fn rollover_due(&self, writer: &RotatingFileWriter, incoming: u64) -> Result<bool> {
        if self.next_deadline.is_due(&writer.clock.now()) {
            return Ok(true);
        }
        let max = writer.policy.max_bytes();
        if max == 0 {
            return Ok(false);
        }
        let current = match &self.stream {
            Some(stream) => stream.metadata().map_err(|e| Error::io(&writer.path, e))?.len(),
            None => 0,
        };
        Ok(current.saturating_add(incoming) >= max)
    }

    /*
        @@@
        @roll_over();
        . Closes the stream and shifts base.(n-1) -> base.n down to base -> base.1, dropping what falls off the end.
        . With backup_count 0 the old active file is removed instead.
        . Reopens the active file even when some steps failed; failures are returned, not swallowed.
        . Reschedules the deadline from the post-rollover now, then runs the retention sweep.
    */
    fn roll_over(&mut self, writer: &RotatingFileWriter) -> Result<Rollover> {
        self.state = WriterState::Rolling;
        drop(self.stream.take());

        let base = &writer.path;
        let mut faults = Vec::new();
        let keep = writer.policy.backup_count();

        if keep > 0 {
            for i in (1..keep).rev() {
                let src = backup_path(base, i);
                if src.exists() {
                    let dst = backup_path(base, i + 1);
                    remove_if_present(&dst, &mut faults);
                    rename(&src, &dst, &mut faults);
                }
            }
            let first = backup_path(base, 1);
            remove_if_present(&first, &mut faults);
            if base.exists() {
                rename(base, &first, &mut faults);
            }
        } else {
            remove_if_present(base, &mut faults);
        }

        let reopened = open_append(base);
        self.state = WriterState::Open;
        self.stream = Some(reopened?);

        let now = writer.clock.now();
        self.next_deadline = Deadline::for_policy(&writer.policy, &now);

        let retention = writer.retention.as_ref().map(|r| r.enforce(&now));
        Ok(Rollover { faults, retention })
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    OpenOptions::new().create(true).append(true).open(path).map_err(|e| Error::io(path, e))
}

fn remove_if_present(path: &Path, faults: &mut Vec<IoFault>) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => faults.push(IoFault { op: "remove", path: path.to_path_buf(), source }),
    }
}

fn rename(from: &Path, to: &Path, faults: &mut Vec<IoFault>) {
    if let Err(source) = fs::rename(from, to) {
        faults.push(IoFault { op: "rename", path: from.to_path_buf(), source });
    }
}

/// Does the open handle still refer to the file at `path`?
#[cfg(unix)]
fn is_current(stream: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (stream.metadata(), fs::metadata(path)) {
        (Ok(open), Ok(named)) => open.dev() == named.dev() && open.ino() == named.ino(),
        _ => false,
    }
}

// No stable file identity in std here; a length mismatch means the path
// now names a different file.
#[cfg(not(unix))]
fn is_current(stream: &File, path: &Path) -> bool {
    match (stream.metadata(), fs::metadata(path)) {
        (Ok(open), Ok(named)) => open.len() == named.len(),
        _ => false,
    }
}

impl io::Write for &RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match RotatingFileWriter::write(*self, buf) {
            Ok(()) => Ok(buf.len()),
            // already logged, and the bytes landed in the reopened file
            Err(Error::RolloverIo { .. }) => Ok(buf.len()),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingFileWriter::flush(*self).map_err(io::Error::other)
    }
}

impl io::Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = &'a RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}
