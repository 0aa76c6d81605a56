use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    error::StoreError,
    protocol::{FlushPhase, PersistenceStatus},
};
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{snapshot::SnapshotStore, store::OrderedStore};

pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    pub flush_delay: Duration,
    pub write_timeout: Duration,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            flush_delay: DEFAULT_FLUSH_DELAY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

enum Command {
    FlushNow(oneshot::Sender<Result<(), StoreError>>),
    Shutdown(oneshot::Sender<Result<(), StoreError>>),
}

/// Owns the debounced flush schedule for one [`OrderedStore`].
///
/// A single background task performs every write. Mutations arm a timer;
/// each further mutation before expiry pushes the deadline back, so only the
/// state at the end of a quiet period reaches disk. Mutations that land
/// while a write is running produce exactly one follow-up flush.
#[derive(Clone)]
pub struct PersistenceController {
    store: OrderedStore,
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<Mutex<PersistenceStatus>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PersistenceController {
    /// Loads the persisted collection, or generates `item_count` synthetic
    /// items and saves them right away when nothing usable is stored.
    pub async fn load_at_startup(sink: &dyn SnapshotStore, item_count: usize) -> OrderedStore {
        match load_store(sink).await {
            Ok(store) => {
                info!(
                    target_store = %sink.describe(),
                    items = store.len().await,
                    "loaded item snapshot"
                );
                if let Err(violation) = store.verify_positions().await {
                    warn!(%violation, "loaded snapshot breaks position order; keeping it as-is");
                }
                store
            }
            Err(error) => {
                warn!(
                    target_store = %sink.describe(),
                    error = %format!("{error:#}"),
                    item_count,
                    "no usable item snapshot; generating synthetic items"
                );
                let store = OrderedStore::generate(item_count);
                match sink.save(store.snapshot().await).await {
                    Ok(()) => info!(items = item_count, "saved generated item snapshot"),
                    Err(error) => error!(
                        error = %format!("{error:#}"),
                        "failed to save generated item snapshot"
                    ),
                }
                store
            }
        }
    }

    pub fn spawn(
        store: OrderedStore,
        sink: Arc<dyn SnapshotStore>,
        options: PersistenceOptions,
    ) -> Self {
        let revisions = store.subscribe();
        let revision = *revisions.borrow();
        let status = Arc::new(Mutex::new(PersistenceStatus {
            revision,
            flushed_revision: revision,
            ..PersistenceStatus::default()
        }));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let worker = FlushWorker {
            store: store.clone(),
            sink,
            options,
            status: Arc::clone(&status),
            revisions,
            commands: command_rx,
            flushed_revision: revision,
            abandoned_write: None,
        };
        let task = tokio::spawn(worker.run());

        Self {
            store,
            commands,
            status,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Writes the current state immediately, bypassing the debounce timer.
    pub async fn flush_now(&self) -> Result<(), StoreError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::FlushNow(reply))
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }

    /// Flushes outstanding mutations, then stops the scheduler.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        let (reply, response) = oneshot::channel();
        let outcome = match self.commands.send(Command::Shutdown(reply)) {
            Ok(()) => response.await.map_err(|_| stopped())?,
            Err(_) => Ok(()),
        };
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        outcome
    }

    pub async fn status(&self) -> PersistenceStatus {
        let mut status = self.status.lock().await.clone();
        status.revision = self.store.revision();
        status.dirty = status.revision != status.flushed_revision;
        status
    }
}

async fn load_store(sink: &dyn SnapshotStore) -> anyhow::Result<OrderedStore> {
    let items = sink.load().await?;
    Ok(OrderedStore::from_items(items)?)
}

fn stopped() -> StoreError {
    StoreError::Persistence("persistence scheduler has stopped".to_string())
}

#[derive(Clone, Copy)]
enum Phase {
    Idle,
    Armed(Instant),
}

struct FlushWorker {
    store: OrderedStore,
    sink: Arc<dyn SnapshotStore>,
    options: PersistenceOptions,
    status: Arc<Mutex<PersistenceStatus>>,
    revisions: watch::Receiver<u64>,
    commands: mpsc::UnboundedReceiver<Command>,
    flushed_revision: u64,
    // A timed-out write keeps running; the next flush waits for it.
    abandoned_write: Option<JoinHandle<anyhow::Result<()>>>,
}

impl FlushWorker {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            match phase {
                Phase::Idle => {
                    self.set_phase(FlushPhase::Idle).await;
                    tokio::select! {
                        changed = self.revisions.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            phase = self.arm().await;
                        }
                        command = self.commands.recv() => match command {
                            Some(Command::FlushNow(reply)) => {
                                let _ = reply.send(self.flush().await);
                            }
                            Some(Command::Shutdown(reply)) => {
                                let _ = reply.send(self.finish().await);
                                break;
                            }
                            None => break,
                        },
                    }
                }
                Phase::Armed(deadline) => {
                    tokio::select! {
                        _ = sleep_until(deadline) => {
                            let _ = self.flush().await;
                            phase = Phase::Idle;
                        }
                        changed = self.revisions.changed() => {
                            if changed.is_err() {
                                let _ = self.flush().await;
                                break;
                            }
                            debug!("mutation during quiet period; flush deadline reset");
                            phase = self.arm().await;
                        }
                        command = self.commands.recv() => match command {
                            Some(Command::FlushNow(reply)) => {
                                let _ = reply.send(self.flush().await);
                                phase = Phase::Idle;
                            }
                            Some(Command::Shutdown(reply)) => {
                                let _ = reply.send(self.finish().await);
                                break;
                            }
                            None => {
                                let _ = self.flush().await;
                                break;
                            }
                        },
                    }
                }
            }
        }
        if let Some(write) = self.abandoned_write.take() {
            if timeout(self.options.write_timeout, write).await.is_err() {
                warn!("stopping with a timed-out snapshot write still running");
            }
        }
        self.set_phase(FlushPhase::Stopped).await;
    }

    async fn arm(&self) -> Phase {
        self.set_phase(FlushPhase::Armed).await;
        Phase::Armed(Instant::now() + self.options.flush_delay)
    }

    async fn set_phase(&self, phase: FlushPhase) {
        self.status.lock().await.phase = phase;
    }

    async fn finish(&mut self) -> Result<(), StoreError> {
        if self.store.revision() == self.flushed_revision {
            return Ok(());
        }
        self.flush().await
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        self.set_phase(FlushPhase::Flushing).await;
        let started = Instant::now();
        let outcome = self.write_snapshot().await;

        let mut status = self.status.lock().await;
        match outcome {
            Ok((revision, count)) => {
                self.flushed_revision = revision;
                status.flushed_revision = revision;
                status.flush_count += 1;
                status.last_flush_at = Some(Utc::now());
                status.last_error = None;
                info!(
                    items = count,
                    revision,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "item snapshot flushed"
                );
                Ok(())
            }
            Err(error) => {
                status.failure_count += 1;
                status.last_error = Some(error.to_string());
                error!(%error, "failed to flush item snapshot");
                Err(error)
            }
        }
    }

    async fn write_snapshot(&mut self) -> Result<(u64, usize), StoreError> {
        let settled = self.settle_abandoned_write().await;
        // Everything up to the snapshot below is covered by this flush.
        let _ = self.revisions.borrow_and_update();
        settled?;

        let (revision, items) = self.store.snapshot_with_revision().await;
        let count = items.len();
        let sink = Arc::clone(&self.sink);
        let mut write = tokio::spawn(async move { sink.save(items).await });

        match timeout(self.options.write_timeout, &mut write).await {
            Ok(Ok(Ok(()))) => Ok((revision, count)),
            Ok(Ok(Err(error))) => Err(StoreError::Persistence(format!("{error:#}"))),
            Ok(Err(join_error)) => Err(StoreError::Persistence(format!(
                "snapshot write task failed: {join_error}"
            ))),
            Err(_) => {
                self.abandoned_write = Some(write);
                Err(StoreError::Persistence(format!(
                    "write to {} timed out after {:?}",
                    self.sink.describe(),
                    self.options.write_timeout
                )))
            }
        }
    }

    async fn settle_abandoned_write(&mut self) -> Result<(), StoreError> {
        let Some(mut write) = self.abandoned_write.take() else {
            return Ok(());
        };
        match timeout(self.options.write_timeout, &mut write).await {
            Ok(finished) => {
                debug!(ok = matches!(finished, Ok(Ok(()))), "timed-out snapshot write finished");
                Ok(())
            }
            Err(_) => {
                self.abandoned_write = Some(write);
                Err(StoreError::Persistence(format!(
                    "previous write to {} is still running",
                    self.sink.describe()
                )))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/persistence_tests.rs"]
mod tests;
