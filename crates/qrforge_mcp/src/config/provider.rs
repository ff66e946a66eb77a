//! Configuration Provider - Source Merging and Change Notification
//!
//! Holds the four candidate configuration sources and resolves the current
//! effective output directory by fixed precedence. Performs no security
//! checks itself: external paths are validated *before* they reach
//! `update_from_external`, which keeps this component a pure
//! configuration-resolution layer, testable without filesystem concerns.
//!
//! # Concurrency
//!
//! - Readers clone an `Arc` snapshot; no lock is held across the read
//! - Writers serialize on the sources mutex (single-writer discipline)
//! - Observer callbacks run on a dedicated dispatch thread: a slow or
//!   panicking observer can never block the update path, and events for
//!   update N fully dispatch before update N+1 begins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Where the effective directory came from
///
/// The precedence order is a compiled-in security property and is never
/// configurable at runtime. Note the deliberate (and debatable) posture:
/// the protocol peer's roots announcement outranks operator-set sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigSource {
    ExternalRoots,
    Environment,
    CommandLine,
    Default,
}

impl ConfigSource {
    /// Total order: higher wins
    pub fn precedence(self) -> u8 {
        match self {
            ConfigSource::ExternalRoots => 3,
            ConfigSource::Environment => 2,
            ConfigSource::CommandLine => 1,
            ConfigSource::Default => 0,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigSource::ExternalRoots => "external_roots",
            ConfigSource::Environment => "environment",
            ConfigSource::CommandLine => "command_line",
            ConfigSource::Default => "default",
        };
        f.write_str(s)
    }
}

/// The resolved configuration: path plus provenance
///
/// Owned by `ConfigProvider`; everyone else sees immutable copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfiguration {
    pub path: PathBuf,
    pub source: ConfigSource,
    pub last_updated: DateTime<Utc>,
    pub valid: bool,
}

/// Delivered to observers after every effective-configuration change
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub previous: EffectiveConfiguration,
    pub current: EffectiveConfiguration,
    pub timestamp: DateTime<Utc>,
}

/// Handle returned by `on_change`, used to unsubscribe
pub type SubscriptionId = u64;

type ObserverFn = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

enum DispatchMsg {
    Event(ChangeEvent),
    Shutdown,
}

struct Sources {
    external: Option<PathBuf>,
    environment: Option<PathBuf>,
    command_line: Option<PathBuf>,
    default: PathBuf,
    /// False when the trusted-by-construction default could not be prepared
    default_valid: bool,
}

/// Single owner of the effective output-directory configuration
pub struct ConfigProvider {
    /// Writer mutex: all source mutation and recomputation serialize here
    sources: Mutex<Sources>,

    /// Copy-on-write snapshot for lock-free-ish concurrent readers
    current: RwLock<Arc<EffectiveConfiguration>>,

    observers: Arc<Mutex<Vec<(SubscriptionId, ObserverFn)>>>,
    next_subscription: AtomicU64,

    dispatch_tx: Sender<DispatchMsg>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigProvider {
    /// Create a provider with only the compiled-in default present
    ///
    /// The default is trusted by construction, but a failure to prepare it is
    /// surfaced loudly: there is no further fallback behind it.
    pub fn new(default_directory: PathBuf) -> Self {
        let default_valid = match std::fs::create_dir_all(&default_directory) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "default output directory {} is unusable: {} (no further fallback exists)",
                    default_directory.display(),
                    e
                );
                false
            }
        };

        let sources = Sources {
            external: None,
            environment: None,
            command_line: None,
            default: default_directory,
            default_valid,
        };
        let initial = Arc::new(resolve(&sources));

        let observers: Arc<Mutex<Vec<(SubscriptionId, ObserverFn)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<DispatchMsg>();

        let dispatcher_observers = Arc::clone(&observers);
        let dispatcher = std::thread::Builder::new()
            .name("qrforge-config-dispatch".to_string())
            .spawn(move || {
                while let Ok(msg) = dispatch_rx.recv() {
                    let event = match msg {
                        DispatchMsg::Event(event) => event,
                        DispatchMsg::Shutdown => break,
                    };

                    // Snapshot under the lock, invoke outside it, so an
                    // observer may re-subscribe without deadlocking
                    let snapshot: Vec<(SubscriptionId, ObserverFn)> = {
                        let guard = dispatcher_observers
                            .lock()
                            .unwrap_or_else(|e| e.into_inner());
                        guard.clone()
                    };

                    for (id, observer) in snapshot {
                        let result = catch_unwind(AssertUnwindSafe(|| observer(&event)));
                        if result.is_err() {
                            error!(subscription = id, "configuration observer panicked");
                        }
                    }
                }
                debug!("configuration dispatch thread exiting");
            })
            .expect("failed to spawn configuration dispatch thread");

        Self {
            sources: Mutex::new(sources),
            current: RwLock::new(initial),
            observers,
            next_subscription: AtomicU64::new(1),
            dispatch_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Absolute path of the presently effective directory
    ///
    /// Always total: falls back to the default source, which is always
    /// present. Callers must not cache the value across writes.
    pub fn get_current_directory(&self) -> PathBuf {
        let snapshot = {
            let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
            Arc::clone(&guard)
        };
        snapshot.path.clone()
    }

    /// Snapshot of the effective configuration for diagnostics
    pub fn status(&self) -> EffectiveConfiguration {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        (**guard).clone()
    }

    /// Set the EXTERNAL_ROOTS source; returns whether the effective *path*
    /// changed (a provenance flip onto the same path reports `false`).
    /// The path must already have passed security validation.
    pub fn update_from_external(&self, path: PathBuf) -> bool {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.external = Some(path);
        self.recompute(&sources)
    }

    /// Remove the EXTERNAL_ROOTS source, falling back to the next source
    pub fn clear_external(&self) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.external = None;
        self.recompute(&sources);
    }

    /// Supply the ENVIRONMENT source (bootstrap, normally called once)
    pub fn set_from_environment(&self, path: Option<PathBuf>) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.environment = path;
        self.recompute(&sources);
    }

    /// Supply the COMMAND_LINE source (bootstrap, normally called once)
    pub fn set_from_command_line(&self, path: Option<PathBuf>) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.command_line = path;
        self.recompute(&sources);
    }

    /// Pure precedence resolution over the three static sources
    ///
    /// EXTERNAL_ROOTS is managed separately via `update_from_external`; this
    /// stays reusable for startup code and tests.
    pub fn resolve_from_sources(
        environment: Option<&Path>,
        command_line: Option<&Path>,
        default: &Path,
    ) -> EffectiveConfiguration {
        let (path, source) = if let Some(env) = environment {
            (env.to_path_buf(), ConfigSource::Environment)
        } else if let Some(cmd) = command_line {
            (cmd.to_path_buf(), ConfigSource::CommandLine)
        } else {
            (default.to_path_buf(), ConfigSource::Default)
        };

        EffectiveConfiguration {
            path,
            source,
            last_updated: Utc::now(),
            valid: true,
        }
    }

    /// Register an observer; notified after every effective change, in
    /// registration order, asynchronously relative to the triggering call
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|(sub, _)| *sub != id);
        observers.len() != before
    }

    /// Stop the dispatch thread and drop all observer registrations.
    /// Idempotent; pending notifications are delivered first.
    pub fn shutdown(&self) {
        let _ = self.dispatch_tx.send(DispatchMsg::Shutdown);
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Recompute the effective configuration and publish/notify on change.
    /// Caller holds the sources mutex, which also orders dispatch enqueues.
    /// Returns whether the effective *path* changed; a source-only flip still
    /// publishes a new snapshot and event so provenance stays accurate.
    fn recompute(&self, sources: &Sources) -> bool {
        let next = resolve(sources);

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if current.path == next.path && current.source == next.source {
            return false;
        }
        let path_changed = current.path != next.path;

        let previous = (**current).clone();
        *current = Arc::new(next.clone());
        drop(current);

        info!(
            "effective directory changed: {} ({}) -> {} ({})",
            previous.path.display(),
            previous.source,
            next.path.display(),
            next.source
        );

        let event = ChangeEvent {
            previous,
            current: next,
            timestamp: Utc::now(),
        };
        if self.dispatch_tx.send(DispatchMsg::Event(event)).is_err() {
            debug!("dispatch thread gone; change notification dropped");
        }
        path_changed
    }
}

impl Drop for ConfigProvider {
    fn drop(&mut self) {
        let _ = self.dispatch_tx.send(DispatchMsg::Shutdown);
    }
}

/// Precedence winner across all four sources
fn resolve(sources: &Sources) -> EffectiveConfiguration {
    let (path, source, valid) = if let Some(external) = &sources.external {
        (external.clone(), ConfigSource::ExternalRoots, true)
    } else if let Some(env) = &sources.environment {
        (env.clone(), ConfigSource::Environment, true)
    } else if let Some(cmd) = &sources.command_line {
        (cmd.clone(), ConfigSource::CommandLine, true)
    } else {
        (
            sources.default.clone(),
            ConfigSource::Default,
            sources.default_valid,
        )
    };

    EffectiveConfiguration {
        path,
        source,
        last_updated: Utc::now(),
        valid,
    }
}
