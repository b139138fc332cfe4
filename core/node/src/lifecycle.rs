//! Ordered teardown of a node.
//!
//! Every layer that needs cleanup registers a named teardown action right after it was built.
//! [`Lifecycle::unwind`] cancels the background tasks, waits for them, and then runs the
//! actions newest first. A failing action is logged and the rest still run, so a half-built
//! node and a running one shut down the same way.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::NodeError;

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub struct Lifecycle {
    token: CancellationToken,
    teardowns: Mutex<Vec<(&'static str, Teardown)>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Lifecycle {
    /// The lifecycle is cancelled with `parent`, but cancelling it leaves `parent` alone.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            teardowns: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn on_teardown<F, Fut>(&self, name: &'static str, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.teardowns
            .lock()
            .push((name, Box::new(move || f().boxed())));
    }

    /// Runs `fut` in the background until it completes or the lifecycle is cancelled.
    pub fn spawn<Fut>(&self, name: &'static str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Stopping {name}");
                },
                _ = fut => {},
            }
        });
        self.tasks.lock().push((name, handle));
    }

    /// Awaits `fut` unless the lifecycle is cancelled first.
    pub async fn race<T, Fut>(&self, fut: Fut) -> Result<T, NodeError>
    where
        Fut: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(NodeError::Cancelled),
            res = fut => Ok(res),
        }
    }

    /// Number of teardown actions still registered.
    pub fn pending(&self) -> usize {
        self.teardowns.lock().len()
    }

    /// Cancels every background task and runs the teardown actions in reverse order of
    /// registration. Calling it again is a no-op.
    pub async fn unwind(&self) {
        self.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!("Task {name} did not stop cleanly: {e}");
            }
        }

        let teardowns = std::mem::take(&mut *self.teardowns.lock());
        for (name, teardown) in teardowns.into_iter().rev() {
            debug!("Tearing down {name}");
            if let Err(e) = teardown().await {
                error!("Failed to tear down {name}: {e:#}");
            }
        }
    }
}
