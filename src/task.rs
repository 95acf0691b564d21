//! Background execution of archive operations
//!
//! Slow archive work (load, create, write, extraction) is submitted to a
//! [`TaskRunner`], runs on tokio's blocking pool and reports back through an
//! [`ArchiveTask`]: a future that resolves exactly once with the same
//! `Result` the operation would have returned when called directly.
//!
//! Completions of independent tasks may arrive in any order.

use once_cell::sync::Lazy;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::archive::Archive;
use crate::config::{ArchiveConfig, ConfigError};
use crate::error::{ArchiveError, ErrorCode, Result};

/// Configuration shared by runners built with [`TaskRunner::current`]
static DEFAULT_CONFIG: Lazy<ArchiveConfig> = Lazy::new(|| {
    ArchiveConfig::from_env().unwrap_or_else(|e| {
        warn!("Ignoring archive configuration from environment: {}", e);
        ArchiveConfig::default()
    })
});

/// Worker permits shared by runners built with [`TaskRunner::current`]
static DEFAULT_PERMITS: Lazy<Arc<Semaphore>> = Lazy::new(|| Arc::new(permits_for(&DEFAULT_CONFIG)));

fn permits_for(config: &ArchiveConfig) -> Semaphore {
    Semaphore::new(config.max_concurrent_tasks.clamp(1, Semaphore::MAX_PERMITS))
}

struct RunnerInner {
    handle: Handle,
    permits: Arc<Semaphore>,
    config: ArchiveConfig,
}

/// Bounded pool running archive jobs off the caller's thread
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl TaskRunner {
    /// Runner on the current tokio runtime with its own worker limit
    pub fn new(config: ArchiveConfig) -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Self::with_handle(handle, config)
    }

    /// Runner spawning onto `handle`
    pub fn with_handle(handle: Handle, config: ArchiveConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RunnerInner {
                handle,
                permits: Arc::new(permits_for(&config)),
                config,
            }),
        })
    }

    /// Runner on the current runtime sharing the process-wide worker limit
    ///
    /// The limit comes from [`ArchiveConfig::from_env`].
    pub fn current() -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(RunnerInner {
                handle,
                permits: DEFAULT_PERMITS.clone(),
                config: DEFAULT_CONFIG.clone(),
            }),
        })
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.inner.config
    }

    /// Open an existing archive in the background
    pub fn load(&self, path: impl Into<PathBuf>, test_hashes: bool) -> ArchiveTask<Archive> {
        let path = path.into();
        let runner = self.clone();
        self.submit("load", move || {
            Archive::open(&path, test_hashes, runner.config()).map(|archive| archive.bind(&runner))
        })
    }

    /// Create an empty archive bound to `path`, delivered like a load
    pub fn create(&self, path: impl Into<PathBuf>) -> ArchiveTask<Archive> {
        let path = path.into();
        let runner = self.clone();
        self.submit("create", move || Ok(Archive::create_empty(&path, runner.config()).bind(&runner)))
    }

    /// Run `job` on the blocking pool once a worker permit is free
    pub(crate) fn submit<T, F>(&self, name: &'static str, job: F) -> ArchiveTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let permits = self.inner.permits.clone();

        self.inner.handle.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => match tokio::task::spawn_blocking(job).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Archive {} task failed: {}", name, e);
                        Err(ArchiveError::with_detail(
                            ErrorCode::Unknown,
                            format!("{} task failed: {}", name, e),
                        ))
                    }
                },
                Err(_) => Err(ArchiveError::with_detail(ErrorCode::Unknown, "task runner closed")),
            };

            if let Err(e) = &result {
                debug!("Archive {} task finished with error: {}", name, e);
            }
            // The caller may have dropped the task; nobody left to tell
            let _ = tx.send(result);
        });

        ArchiveTask {
            rx,
            handle: Some(self.inner.handle.clone()),
            name,
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("config", &self.inner.config)
            .field("available_permits", &self.inner.permits.available_permits())
            .finish()
    }
}

/// Pending result of a background archive operation
///
/// Resolves exactly once. Dropping it does not stop the operation.
#[must_use = "archive tasks report their outcome only when awaited or given a handler"]
pub struct ArchiveTask<T> {
    rx: oneshot::Receiver<Result<T>>,
    handle: Option<Handle>,
    name: &'static str,
}

impl<T> ArchiveTask<T> {
    /// Task that never started and resolves with `error`
    pub(crate) fn failed(name: &'static str, error: ArchiveError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        ArchiveTask {
            rx,
            handle: Handle::try_current().ok(),
            name,
        }
    }
}

impl<T: Send + 'static> ArchiveTask<T> {
    /// Deliver the outcome to `on_done` instead of awaiting it
    ///
    /// Without a runtime to spawn on (only possible for tasks that failed to
    /// start), the handler runs before this returns.
    pub fn on_done<F>(mut self, on_done: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        match self.handle.take() {
            Some(handle) => {
                handle.spawn(async move { on_done(self.await) });
            }
            None => {
                let name = self.name;
                on_done(self.rx.try_recv().unwrap_or_else(|_| Err(dropped(name))));
            }
        }
    }
}

fn dropped(name: &'static str) -> ArchiveError {
    ArchiveError::with_detail(
        ErrorCode::Unknown,
        format!("{} task was dropped before completing", name),
    )
}

impl<T> Future for ArchiveTask<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let name = self.name;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped(name))))
    }
}
