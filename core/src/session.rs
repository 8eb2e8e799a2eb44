use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::WriteFailure;
use crate::models::{DayKey, DerivedHistory, EntityKey, EntityKind, WriteAck};
use crate::remote::RemoteStore;
use crate::scheduler::{SyncConfig, WriteRequest};
use crate::sync::{Reversion, Synchronizer, WriteEvent};

type Completion = (WriteRequest, Result<WriteAck, WriteFailure>);

/// Drives a [`Synchronizer`] against a [`RemoteStore`] on the tokio runtime.
///
/// Staging goes straight to the synchronizer and returns at once; each due
/// write runs as its own task and re-enters through `next_event`.
pub struct SyncSession<S: RemoteStore> {
    store: Arc<S>,
    sync: Synchronizer,
    tasks: JoinSet<Completion>,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl<S: RemoteStore> SyncSession<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            store,
            sync: Synchronizer::new(config),
            tasks: JoinSet::new(),
        }
    }

    pub fn sync(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut Synchronizer {
        &mut self.sync
    }

    /// Current time on the runtime clock, for staging edits.
    pub fn now(&self) -> Instant {
        now()
    }

    /// Fetch every tracked entity of `day` into the cache.
    pub async fn load_day(&mut self, day: DayKey) -> Result<()> {
        for kind in EntityKind::ALL {
            let key = EntityKey::new(day, kind);
            let snapshot = self
                .store
                .fetch_snapshot(key)
                .await
                .with_context(|| format!("Failed to fetch {kind} for {day}"))?;
            self.sync.load(key, snapshot);
        }
        info!(%day, "loaded day");
        Ok(())
    }

    /// Start every write whose quiet period has elapsed.
    pub fn dispatch(&mut self) -> usize {
        let timeout = self.sync.config().request_timeout;
        let requests = self.sync.poll_writes(now());
        let count = requests.len();
        for request in requests {
            let store = Arc::clone(&self.store);
            self.tasks.spawn(async move {
                let write = store.write_field(
                    request.key.entity,
                    request.key.field.clone(),
                    request.value,
                );
                let result = match tokio::time::timeout(timeout, write).await {
                    Ok(result) => result,
                    Err(_) => Err(WriteFailure::Transient(format!(
                        "no response within {}s",
                        timeout.as_secs()
                    ))),
                };
                (request, result)
            });
        }
        count
    }

    /// Wait for the next write to finish, sending due writes meanwhile.
    /// Returns `None` once nothing is scheduled or in flight.
    pub async fn next_event(&mut self) -> Result<Option<WriteEvent>> {
        loop {
            self.dispatch();
            let deadline = self.sync.next_deadline();
            if self.tasks.is_empty() && deadline.is_none() {
                return Ok(None);
            }
            let joined = tokio::select! {
                Some(joined) = self.tasks.join_next() => Some(joined),
                () = sleep_until(deadline) => None,
            };
            if let Some(joined) = joined {
                let (request, result) = joined.context("write task failed")?;
                let event = self.sync.complete_write(&request, result, now());
                debug!(?event, "write finished");
                return Ok(Some(event));
            }
        }
    }

    /// Run until every staged edit is confirmed or reverted, then refresh
    /// stale aggregates. Returns the reversions the user should see.
    pub async fn settle(&mut self) -> Result<Vec<Reversion>> {
        while self.next_event().await?.is_some() {}
        self.refresh_aggregates().await?;
        Ok(self.sync.take_reversions())
    }

    /// Refetch every aggregate a confirmed write made stale.
    pub async fn refresh_aggregates(&mut self) -> Result<()> {
        let mut fetched: BTreeMap<u32, DerivedHistory> = BTreeMap::new();
        for aggregate in self.sync.stale_aggregates() {
            let range = aggregate.range_days();
            let history = if let Some(history) = fetched.get(&range) {
                history.clone()
            } else {
                let history = self
                    .store
                    .fetch_derived_history(range)
                    .await
                    .with_context(|| format!("Failed to fetch {range} days of history"))?;
                fetched.insert(range, history.clone());
                history
            };
            self.sync.store_aggregate(aggregate, history);
        }
        Ok(())
    }
}
