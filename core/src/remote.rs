use std::future::Future;

use anyhow::Result;

use crate::error::WriteFailure;
use crate::models::{DayKey, DerivedHistory, EntityKey, FieldValue, Snapshot, WriteAck};

/// Remote store the synchronizer persists to.
///
/// The CLI implements this over HTTP with reqwest; [`crate::store::LocalStore`]
/// implements it over the local `SQLite` database. Writes report a classified
/// [`WriteFailure`] so the scheduler can tell transient from permanent errors.
pub trait RemoteStore: Send + Sync + 'static {
    fn fetch_snapshot(&self, key: EntityKey) -> impl Future<Output = Result<Snapshot>> + Send;

    fn write_field(
        &self,
        key: EntityKey,
        field: String,
        value: FieldValue,
    ) -> impl Future<Output = Result<WriteAck, WriteFailure>> + Send;

    fn fetch_derived_history(
        &self,
        range_days: u32,
    ) -> impl Future<Output = Result<DerivedHistory>> + Send;
}

/// Records the plan a day's tracked key sets come from. Plans are produced
/// elsewhere; the store only keeps what it is handed.
pub trait PlanStore: Send + Sync + 'static {
    fn record_protocol(
        &self,
        day: DayKey,
        foods: Vec<String>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn record_workout_plan(
        &self,
        day: DayKey,
        exercises: Vec<String>,
    ) -> impl Future<Output = Result<()>> + Send;
}
