mod helpers;
mod plan;
mod status;
mod track;

use std::sync::Arc;

use anyhow::Result;

use rollin_core::models::DayKey;
use rollin_core::remote::RemoteStore;
use rollin_core::scheduler::SyncConfig;
use rollin_core::session::SyncSession;

pub(crate) use helpers::parse_date;
pub(crate) use plan::{cmd_protocol_set, cmd_workout_plan};
pub(crate) use status::{cmd_history, cmd_status};
pub(crate) use track::{Edit, cmd_edit};

/// Start a session with every entity of `day` loaded.
pub(super) async fn open_day<S: RemoteStore>(
    store: Arc<S>,
    config: SyncConfig,
    day: DayKey,
) -> Result<SyncSession<S>> {
    let mut session = SyncSession::new(store, config);
    session.load_day(day).await?;
    Ok(session)
}
