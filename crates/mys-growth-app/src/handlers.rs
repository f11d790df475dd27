//! Entry points for the two triggers: a scheduled tick and an incoming read.

use time::OffsetDateTime;
use tracing::{error, info};

use crate::backend::KvBackend;
use crate::error::SeriesError;
use crate::read_service::{ReadResponse, ReadService};
use crate::source::MemberSource;
use crate::updater::{CommitOutcome, Updater};

/// Run one refresh for a scheduled tick at `scheduled_at`.
///
/// # Errors
/// Logs and returns whatever [`Updater::merge_and_commit`] fails with.
pub async fn handle_scheduled<B, S>(
    updater: &Updater<B, S>,
    scheduled_at: OffsetDateTime,
) -> Result<CommitOutcome, SeriesError>
where
    B: KvBackend,
    S: MemberSource,
{
    info!(%scheduled_at, "Scheduled refresh");
    updater
        .merge_and_commit(scheduled_at)
        .await
        .inspect_err(|err| error!(kind = err.kind(), error = %err, "Scheduled refresh failed"))
}

/// Serve one read request.
///
/// # Errors
/// Logs and returns whatever [`ReadService::read`] fails with.
pub async fn handle_read<B, S>(service: &ReadService<B, S>) -> Result<ReadResponse, SeriesError>
where
    B: KvBackend,
    S: MemberSource,
{
    let response = service
        .read()
        .await
        .inspect_err(|err| error!(kind = err.kind(), error = %err, "Read failed"))?;
    info!(source = %response.source, bytes = response.body.len(), "Served series");
    Ok(response)
}
