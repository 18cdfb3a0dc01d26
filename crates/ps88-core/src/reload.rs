//! Hot reload plumbing: debouncing edits and watching source files.
//!
//! Edits arrive far faster than it makes sense to rebuild. The debouncer
//! keeps only the latest text and releases it once no further edit has
//! arrived for the configured quiet period.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone)]
pub struct ReloadDebouncer {
    delay: Duration,
    pending: Option<(String, Instant)>,
}

impl ReloadDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Record an edit made at `now`, replacing any earlier pending one.
    pub fn submit(&mut self, code: String, now: Instant) {
        self.pending = Some((code, now));
    }

    /// Take the pending text if it has been quiet long enough.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((_, at)) if now.saturating_duration_since(*at) >= self.delay => {
                self.pending.take().map(|(code, _)| code)
            }
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending edit, returning it.
    pub fn cancel(&mut self) -> Option<String> {
        self.pending.take().map(|(code, _)| code)
    }
}

/// Polls a file's modification time.
#[derive(Debug)]
pub struct SourceWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl SourceWatcher {
    /// Start watching; the current contents count as already seen.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// New contents if the file changed since the last call.
    pub fn poll(&mut self) -> Result<Option<String>> {
        let current = modified(&self.path);
        if current == self.last_modified {
            return Ok(None);
        }
        self.last_modified = current;
        if current.is_none() {
            log::warn!("[RELOAD] {} disappeared", self.path.display());
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
