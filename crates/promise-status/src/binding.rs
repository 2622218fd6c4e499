//! Owner-side binding
//!
//! Runs a tracker on a driver task and hands every snapshot the owner should
//! render to a notification callback: one call per `update`, then one per
//! asynchronous change. After `dispose` resolves the callback is never
//! invoked again.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::operation::{Payload, TrackedOperation};
use crate::status::Snapshot;
use crate::tracker::PromiseStatusTracker;

enum Command<T, E> {
    Update {
        operation: Option<TrackedOperation<T, E>>,
        config: TrackerConfig,
        reply: oneshot::Sender<Result<Snapshot<T, E>>>,
    },
    Dispose {
        reply: oneshot::Sender<Result<()>>,
    },
}

enum Step<T, E> {
    Command(Option<Command<T, E>>),
    Change(Option<Snapshot<T, E>>),
}

/// Handle to a tracker running on its own task
pub struct PromiseStateBinding<T, E> {
    commands: mpsc::UnboundedSender<Command<T, E>>,
    driver: JoinHandle<()>,
}

impl<T: Payload, E: Payload> PromiseStateBinding<T, E> {
    /// Start driving `tracker`, reporting snapshots to `notify`.
    pub fn spawn<F>(tracker: PromiseStatusTracker<T, E>, notify: F) -> Self
    where
        F: FnMut(&Snapshot<T, E>) + Send + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(tracker, rx, notify));
        Self { commands, driver }
    }

    /// Hand in the current operation and options. Returns the snapshot to
    /// render immediately, which is also passed to the callback.
    pub async fn update(
        &self,
        operation: Option<&TrackedOperation<T, E>>,
        config: &TrackerConfig,
    ) -> Result<Snapshot<T, E>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Update {
                operation: operation.cloned(),
                config: config.clone(),
                reply,
            })
            .map_err(|_| Error::Disposed)?;
        response.await.map_err(|_| Error::Disposed)?
    }

    /// Tear the tracker down. Once this returns no further notification is
    /// delivered.
    pub async fn dispose(self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Dispose { reply })
            .map_err(|_| Error::Disposed)?;
        let result = response.await.map_err(|_| Error::Disposed)?;
        let _ = self.driver.await;
        result
    }
}

async fn drive<T, E, F>(
    mut tracker: PromiseStatusTracker<T, E>,
    mut commands: mpsc::UnboundedReceiver<Command<T, E>>,
    mut notify: F,
) where
    T: Payload,
    E: Payload,
    F: FnMut(&Snapshot<T, E>) + Send + 'static,
{
    loop {
        let step = tokio::select! {
            biased;
            command = commands.recv() => Step::Command(command),
            change = tracker.next_change(), if tracker.has_pending_work() => Step::Change(change),
        };

        match step {
            Step::Command(Some(Command::Update { operation, config, reply })) => {
                let result = tracker.evaluate(operation.as_ref(), &config);
                if let Ok(snapshot) = &result {
                    notify(snapshot);
                }
                let _ = reply.send(result);
            }
            Step::Command(Some(Command::Dispose { reply })) => {
                let _ = reply.send(tracker.dispose());
                break;
            }
            Step::Command(None) => {
                debug!("Binding dropped, disposing tracker");
                if let Err(e) = tracker.dispose() {
                    warn!("Failed to dispose tracker: {}", e);
                }
                break;
            }
            Step::Change(Some(snapshot)) => notify(&snapshot),
            Step::Change(None) => {}
        }
    }
}
