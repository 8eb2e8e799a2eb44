use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::buffer::{EditBuffer, EditId};
use crate::error::WriteFailure;
use crate::models::{FieldKey, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period after the last edit of a field before it is written.
    pub debounce: Duration,
    /// A write with no answer after this long counts as a transient failure.
    pub request_timeout: Duration,
    /// Total sends allowed per edit, first attempt included.
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(400),
            request_timeout: Duration::from_secs(10),
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

/// One outgoing network write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub ticket: Ticket,
    pub edit: EditId,
    pub key: FieldKey,
    pub value: FieldValue,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The write landed.
    Succeeded,
    /// Transient failure on the current edit with attempts left; resend at once.
    Retry,
    /// The edit is still current and can no longer succeed.
    GiveUp,
    /// The edit was superseded while in flight; its failure is moot.
    Dropped,
}

#[derive(Debug, Default)]
struct Lane {
    in_flight: Option<(Ticket, EditId)>,
    due: Option<Instant>,
}

/// Serializes writes per field: debounce, one request in flight, retries.
#[derive(Debug)]
pub struct MutationScheduler {
    config: SyncConfig,
    lanes: HashMap<FieldKey, Lane>,
    next_ticket: u64,
}

impl MutationScheduler {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            lanes: HashMap::new(),
            next_ticket: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// A field was edited: restart its quiet period.
    pub fn touch(&mut self, key: FieldKey, now: Instant) {
        let lane = self.lanes.entry(key).or_default();
        lane.due = Some(now + self.config.debounce);
    }

    /// Writes whose quiet period has elapsed on lanes with nothing in flight.
    pub fn ready(&mut self, buffer: &mut EditBuffer, now: Instant) -> Vec<WriteRequest> {
        let mut out = Vec::new();
        for (key, lane) in &mut self.lanes {
            if lane.in_flight.is_some() || !lane.due.is_some_and(|due| due <= now) {
                continue;
            }
            lane.due = None;
            let Some(edit) = buffer.current(key) else {
                continue;
            };
            let edit_id = edit.id;
            let value = edit.value;
            let attempt = buffer.record_attempt(edit_id).unwrap_or(1);
            self.next_ticket += 1;
            let ticket = Ticket(self.next_ticket);
            lane.in_flight = Some((ticket, edit_id));
            debug!(field = %key, edit = %edit_id, attempt, "sending write");
            out.push(WriteRequest {
                ticket,
                edit: edit_id,
                key: key.clone(),
                value,
                attempt,
            });
        }
        self.lanes
            .retain(|_, lane| lane.in_flight.is_some() || lane.due.is_some());
        out
    }

    /// Free the lane of a finished request and decide what happens next.
    pub fn finish(
        &mut self,
        request: &WriteRequest,
        result: Result<(), &WriteFailure>,
        buffer: &EditBuffer,
        now: Instant,
    ) -> Verdict {
        let lane = self.lanes.entry(request.key.clone()).or_default();
        if lane.in_flight.is_some_and(|(t, _)| t == request.ticket) {
            lane.in_flight = None;
        }

        let verdict = match result {
            Ok(()) => Verdict::Succeeded,
            Err(_) if !buffer.is_current(request.edit) => Verdict::Dropped,
            Err(failure)
                if failure.is_transient() && request.attempt < self.config.max_attempts =>
            {
                lane.due = Some(now);
                Verdict::Retry
            }
            Err(_) => Verdict::GiveUp,
        };

        if lane.in_flight.is_none() && lane.due.is_none() {
            self.lanes.remove(&request.key);
        }
        verdict
    }

    /// Earliest moment a pending write becomes ready, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lanes
            .values()
            .filter(|lane| lane.in_flight.is_none())
            .filter_map(|lane| lane.due)
            .min()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lanes
            .values()
            .filter(|lane| lane.in_flight.is_some())
            .count()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.lanes.is_empty()
    }
}
