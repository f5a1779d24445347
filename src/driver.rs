//! Re-runs the preprocessor when watched files change.
//!
//! One driver owns one root file. Every run starts from a fresh
//! `SharedState` (macro state never persists across re-runs), collects
//! the visited-file list as the next watch set, and forwards output to
//! the sink only when the content fingerprint changed since the last
//! successful run. At most one run is ever in flight: change events are
//! coalesced with a debounce delay that resets on every new event.

use std::hash::BuildHasher;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use thiserror::Error;

use crate::preprocess::{PreProcError, Run, RunConfig, SharedState};

/// Delay between the last observed change event and the next run.
const DEBOUNCE: Duration = Duration::from_millis(2500);
/// How often the wait loop wakes up to check the closed flag.
const CLOSE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// The result of one successful preprocessing run.
#[derive(Clone, Debug, Serialize)]
pub struct RunOutput {
    pub text: String,
    /// Every file entered during the run, in first-entry order.
    pub files: Vec<PathBuf>,
    pub hash: String,
}

/// Content fingerprint of expanded output, used to suppress redundant
/// re-emission. Seeds are fixed so equal text always fingerprints
/// equally within one build.
pub fn fingerprint(text: &str) -> String {
    let state = ahash::RandomState::with_seeds(
        0x57_47_50_52,
        0x45_50_52_4f,
        0x43_00_00_01,
        0x00_00_00_00,
    );
    format!("{:016x}", state.hash_one(text))
}

/// Run the preprocessor once over `root` and fingerprint the result.
pub fn run_once(root: &Path, config: &RunConfig) -> Result<RunOutput, PreProcError> {
    let mut state = SharedState::new(config.profile);
    let run = Run::from_file(root.to_path_buf(), &mut state, config, 1)?;
    let text = run.run()?;
    let hash = fingerprint(&text);
    Ok(RunOutput {
        files: state.files(),
        hash,
        text,
    })
}

/// Closes a running driver from another thread. Closing tears down the
/// pending watch and stops the loop from re-arming; an in-flight run is
/// allowed to finish and its result is simply not forwarded.
#[derive(Clone)]
pub struct DriverHandle {
    closed: Arc<AtomicBool>,
}

impl DriverHandle {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

pub struct Driver {
    root: PathBuf,
    config: RunConfig,
    last_hash: Option<String>,
    closed: Arc<AtomicBool>,
}

impl Driver {
    pub fn new(root: PathBuf, config: RunConfig) -> Self {
        Self {
            root,
            config,
            last_hash: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            closed: Arc::clone(&self.closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Run once, then keep re-running on file changes until closed.
    pub fn watch(&mut self, mut sink: impl FnMut(&RunOutput)) -> Result<(), DriverError> {
        let mut watched = self
            .rerun(&mut sink)
            .unwrap_or_else(|| vec![self.root.clone()]);

        while !self.is_closed() {
            let (tx, rx) = mpsc::channel();
            let mut watcher =
                notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                    if let Ok(event) = res {
                        if is_relevant(&event) {
                            let _ = tx.send(());
                        }
                    }
                })?;
            for path in &watched {
                if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
                    log::warn!("cannot watch {}: {}", path.display(), err);
                }
            }

            if !await_quiet(&rx, &self.closed, CLOSE_POLL, DEBOUNCE) {
                return Ok(());
            }
            if let Some(files) = self.rerun(&mut sink) {
                watched = files;
            }
        }
        Ok(())
    }

    /// One preprocessing attempt. Returns the new watch set on success;
    /// a failed run keeps the previous one. The sink only sees output
    /// whose fingerprint differs from the last successful run.
    fn rerun(&mut self, sink: &mut impl FnMut(&RunOutput)) -> Option<Vec<PathBuf>> {
        log::info!("preprocessor run: {}", self.root.display());
        match run_once(&self.root, &self.config) {
            Ok(output) => {
                if self.should_emit(&output.hash) && !self.is_closed() {
                    sink(&output);
                }
                Some(output.files)
            }
            Err(err) => {
                log::error!("preprocessing failed: {}", err);
                None
            }
        }
    }

    /// Record the fingerprint and report whether it changed.
    fn should_emit(&mut self, hash: &str) -> bool {
        if self.last_hash.as_deref() == Some(hash) {
            return false;
        }
        self.last_hash = Some(hash.to_string());
        true
    }
}

/// Block until a change event arrives, then absorb further events until
/// the channel has stayed quiet for a full debounce window; every new
/// event restarts the window, so a burst of changes yields one wakeup.
/// Returns `false` when closed or the sender side is gone.
fn await_quiet(
    rx: &Receiver<()>,
    closed: &AtomicBool,
    poll: Duration,
    debounce: Duration,
) -> bool {
    loop {
        if closed.load(Ordering::Relaxed) {
            return false;
        }
        match rx.recv_timeout(poll) {
            Ok(()) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
    while rx.recv_timeout(debounce).is_ok() {}
    !closed.load(Ordering::Relaxed)
}

fn is_relevant(event: &Event) -> bool {
    // Renames surface as Modify(Name) in notify.
    matches!(event.kind, EventKind::Modify(_) | EventKind::Remove(_))
}
