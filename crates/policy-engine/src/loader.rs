//! Loader & Watcher (C4)
//!
//! Reads `.yaml`/`.yml`/`.json` policy files from a directory, and watches
//! that directory for changes with a debounce window, coalescing bursts into
//! a single atomic reload applied through the [`crate::version::VersionManager`]
//! (spec §4.3).

use message_queue::ReloadBus;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use reaper_core::{Policy, ReaperError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::version::VersionManager;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// A single file that failed to parse during a directory load. Named per
/// spec §4.3: "a loader error naming the file".
#[derive(Debug, Clone)]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub policies: HashMap<String, Policy>,
    pub errors: Vec<LoadError>,
}

/// Reads every `.yaml`/`.yml`/`.json` file in `dir` into a `Policy`. A
/// malformed file is recorded in `errors` and does not abort the batch
/// (spec §4.3): "one bad file does not abort the batch unless the watcher is
/// performing an atomic reload".
pub fn load_directory(dir: &Path) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();

    let entries = std::fs::read_dir(dir).map_err(ReaperError::Io)?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| is_policy_file(p))
        .collect();
    paths.sort();

    for path in paths {
        match load_one(&path) {
            Ok(policy) => {
                outcome.policies.insert(policy.name.clone(), policy);
            }
            Err(reason) => {
                warn!(file = %path.display(), %reason, "failed to load policy file");
                outcome.errors.push(LoadError {
                    path,
                    reason,
                });
            }
        }
    }

    Ok(outcome)
}

fn is_policy_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

fn load_one(path: &Path) -> std::result::Result<Policy, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum WatchState {
    Idle,
    Watching,
    Stopped,
}

/// Owns the filesystem watcher and drives debounced atomic reloads into a
/// `VersionManager`. State machine: `idle -> watching -> stopped` (spec
/// §4 "State machines"), terminal once stopped for that instance.
pub struct PolicyWatcher {
    dir: PathBuf,
    debounce: Duration,
    version_manager: Arc<VersionManager>,
    validator: Arc<crate::validator::Validator>,
    bus: Arc<ReloadBus>,
    state: std::sync::Mutex<WatchState>,
    stop_flag: Arc<AtomicBool>,
    _watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

impl PolicyWatcher {
    pub fn new(
        dir: impl Into<PathBuf>,
        version_manager: Arc<VersionManager>,
        validator: Arc<crate::validator::Validator>,
        bus: Arc<ReloadBus>,
    ) -> Self {
        Self::with_debounce(dir, version_manager, validator, bus, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(
        dir: impl Into<PathBuf>,
        version_manager: Arc<VersionManager>,
        validator: Arc<crate::validator::Validator>,
        bus: Arc<ReloadBus>,
        debounce: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            debounce,
            version_manager,
            validator,
            bus,
            state: std::sync::Mutex::new(WatchState::Idle),
            stop_flag: Arc::new(AtomicBool::new(false)),
            _watcher: std::sync::Mutex::new(None),
        }
    }

    pub fn is_watching(&self) -> bool {
        *self.state.lock().unwrap() == WatchState::Watching
    }

    /// Performs one full load+validate+apply cycle, independent of the
    /// watcher — used both for the initial startup load and by `start`'s
    /// reload handler.
    pub fn reload_once(&self) -> message_queue::ReloadEvent {
        let now = chrono::Utc::now();
        let outcome = match load_directory(&self.dir) {
            Ok(o) => o,
            Err(e) => {
                error!(error = %e, "directory load failed");
                return message_queue::ReloadEvent::failure(now, e.to_string());
            }
        };

        let batch: Vec<Policy> = outcome.policies.values().cloned().collect();
        let validation = self.validator.validate_batch(&batch);
        if !validation.is_valid() {
            // Entire reload rejected; prior snapshot retained (spec §4.3).
            let msg = validation
                .results
                .iter()
                .filter(|(_, r)| !r.is_valid())
                .map(|(name, r)| format!("{name}: {} error(s)", r.errors.len()))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(errors = %msg, "reload rejected: validation failed, prior snapshot retained");
            return message_queue::ReloadEvent::failure(now, msg);
        }

        let affected: Vec<String> = outcome.policies.keys().cloned().collect();
        match self
            .version_manager
            .update_with_rollback(outcome.policies, "watcher reload")
        {
            Ok(_) => message_queue::ReloadEvent::success(now, affected),
            Err(e) => message_queue::ReloadEvent::failure(now, e.to_string()),
        }
    }

    /// Starts watching. Idempotent: a second call while already watching
    /// fails with `AlreadyWatching` (spec §4.3).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == WatchState::Watching {
                return Err(ReaperError::AlreadyWatching);
            }
            *state = WatchState::Watching;
        }

        let (tx, mut rx) = mpsc::channel::<()>(64);
        let dir = self.dir.clone();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.try_send(());
            }
        })
        .map_err(|e| ReaperError::Internal {
            reason: format!("failed to create file watcher: {e}"),
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ReaperError::Internal {
                reason: format!("failed to watch {}: {e}", dir.display()),
            })?;
        *self._watcher.lock().unwrap() = Some(watcher);

        let this = self.clone();
        let stop_flag = self.stop_flag.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match rx.recv().await {
                    Some(()) => {
                        // Debounce: coalesce a burst of events into one
                        // reload by draining whatever else arrives within
                        // the window (spec §4.3).
                        tokio::time::sleep(debounce).await;
                        while rx.try_recv().is_ok() {}
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        let event = this.reload_once();
                        this.bus.publish(event);
                    }
                    None => break,
                }
            }
        });

        Ok(())
    }

    /// Idempotent: stopping an already-stopped watcher is a no-op.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        *self._watcher.lock().unwrap() = None;
        *self.state.lock().unwrap() = WatchState::Stopped;
    }
}
