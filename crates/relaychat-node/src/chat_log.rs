//! Append-only chat log shared between node processes.
//!
//! Each record is one JSON line (`{"type":"msg",...,"logged_at":...}`). Appends
//! hold an exclusive `flock(2)` on the file so nodes on the same host can
//! share one log. Writes happen on a dedicated thread; callers never wait on
//! the disk, and failures are counted and traced instead of propagated.

use anyhow::{Context, Result};
use relaychat::protocol::{ChatRecord, Event, unix_now};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Records queued for the writer thread before appends start being dropped.
const LOG_QUEUE: usize = 4096;

pub struct ChatLog {
    path: PathBuf,
    tx: mpsc::Sender<ChatRecord>,
    failures: Arc<AtomicU64>,
}

impl ChatLog {
    /// Create the log's parent directory and start the writer thread.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }

        let (tx, rx) = mpsc::channel(LOG_QUEUE);
        let failures = Arc::new(AtomicU64::new(0));
        let writer_path = path.to_path_buf();
        let writer_failures = failures.clone();
        std::thread::Builder::new()
            .name("chat-log".to_string())
            .spawn(move || writer_loop(&writer_path, rx, &writer_failures))
            .context("failed to spawn chat log writer")?;

        Ok(Self {
            path: path.to_path_buf(),
            tx,
            failures,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `record` for appending. Never blocks; if the writer is backed up
    /// or gone the record is dropped and counted as a failure.
    pub fn append(&self, record: ChatRecord) {
        if let Err(e) = self.tx.try_send(record) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(path = %self.path.display(), err = %e, "chat log append dropped");
        }
    }

    /// Appends that were dropped or failed to reach the file so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn writer_loop(path: &Path, mut rx: mpsc::Receiver<ChatRecord>, failures: &AtomicU64) {
    while let Some(record) = rx.blocking_recv() {
        if let Err(e) = append_record(path, &record) {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(path = %path.display(), err = %e, "chat log append failed");
        }
    }
}

/// Append one record to `path` under an exclusive file lock.
pub fn append_record(path: &Path, record: &ChatRecord) -> Result<()> {
    let mut value = serde_json::to_value(Event::Msg(record.clone()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("logged_at".to_string(), serde_json::json!(unix_now()));
    }
    let mut line = serde_json::to_string(&value)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    lock_exclusive(&file).context("failed to lock chat log")?;
    let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
    if let Err(e) = unlock(&file) {
        tracing::warn!(path = %path.display(), err = %e, "failed to unlock chat log");
    }
    written.context("failed to write chat log")?;
    Ok(())
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and open for the whole call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    // SAFETY: as above.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn lock_exclusive(file: &File) -> io::Result<()> {
    file.lock()
}

#[cfg(not(unix))]
fn unlock(file: &File) -> io::Result<()> {
    file.unlock()
}
