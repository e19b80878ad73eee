//! Inbound reply/bounce ingestion. A reply or hard bounce resolves the
//! originating job by provider `message_id`, then in one
//! transaction marks the lead terminal and cancels its pending jobs — the
//! same row locks the dispatcher takes per job, so a send that is already
//! mid-transaction finishes (and commits or rolls back) before this sees
//! the row, and a send that hasn't started yet is cancelled before it can
//! begin.

use sqlx::PgPool;

use crate::clock::Clock;
use crate::db::{Store, StoreError};
use crate::models::lead::LeadStatus;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEventKind {
    Reply,
    Bounce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The lead transitioned and its pending jobs were cancelled.
    Applied,
    /// The message id is unknown; nothing to do (not an error — providers
    /// retry webhook delivery, and some events are for messages outside
    /// this system).
    UnknownMessage,
    /// The lead was already terminal; replayed webhook deliveries are
    /// idempotent no-ops.
    AlreadyTerminal,
    /// A bounce on a lead that has already sent successfully elsewhere in
    /// the sequence; the lead only fails on bounce when no prior step has
    /// succeeded, so this event causes no state change.
    BounceIgnored,
}

pub struct ReplyIngestor {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl ReplyIngestor {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Applies an inbound reply or bounce event keyed by the provider
    /// `message_id` of the job that produced it.
    pub async fn ingest(
        &self,
        message_id: &str,
        kind: InboundEventKind,
    ) -> Result<IngestOutcome, StoreError> {
        let store = Store::new(self.pool.clone());
        let Some((job_id, lead_id, _campaign_id)) =
            store.find_job_by_message_id(message_id).await?
        else {
            return Ok(IngestOutcome::UnknownMessage);
        };

        let outcome = self.apply(lead_id, Some(job_id), kind).await?;
        if outcome == IngestOutcome::Applied {
            tracing::info!(
                "lead {} -> {:?} on message {}",
                lead_id,
                kind,
                message_id
            );
        }
        Ok(outcome)
    }

    /// Applies an inbound reply event keyed directly by lead, bypassing the
    /// `message_id` lookup. Used by the simulated-mode dev endpoint, which
    /// has no provider message to key off of.
    pub async fn ingest_by_lead(
        &self,
        lead_id: uuid::Uuid,
        kind: InboundEventKind,
    ) -> Result<IngestOutcome, StoreError> {
        let outcome = self.apply(lead_id, None, kind).await?;
        if outcome == IngestOutcome::Applied {
            tracing::info!("lead {} -> {:?} via simulated mark-replied", lead_id, kind);
        }
        Ok(outcome)
    }

    /// Shared core: lock the lead, check terminal, apply the status
    /// transition, cancel its pending jobs. `exclude_job_id` is the job a
    /// bounce arrived on, so the "already succeeded elsewhere" check doesn't
    /// count the bounced job against itself; it's `None` for the lead-keyed
    /// entry point, which only ever applies replies.
    async fn apply(
        &self,
        lead_id: uuid::Uuid,
        exclude_job_id: Option<uuid::Uuid>,
        kind: InboundEventKind,
    ) -> Result<IngestOutcome, StoreError> {
        let store = Store::new(self.pool.clone());
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let Some(lead) = Store::load_lead_for_update(&mut tx, lead_id).await? else {
            tx.commit().await?;
            return Ok(IngestOutcome::UnknownMessage);
        };

        if lead.is_terminal() {
            tx.commit().await?;
            return Ok(IngestOutcome::AlreadyTerminal);
        }

        let next_status = match kind {
            InboundEventKind::Reply => LeadStatus::Replied,
            // Bounce only fails the lead if no earlier step already
            // succeeded; otherwise the bounce is noise on an
            // already-working sequence and the lead is left untouched.
            InboundEventKind::Bounce => {
                let exclude = exclude_job_id.unwrap_or(uuid::Uuid::nil());
                if store.lead_has_other_sent_job(lead_id, exclude).await? {
                    tx.commit().await?;
                    return Ok(IngestOutcome::BounceIgnored);
                }
                LeadStatus::Failed
            }
        };

        Store::update_lead_status(&mut tx, lead_id, next_status.as_str(), now).await?;
        Store::cancel_pending_jobs_for_lead(&mut tx, lead_id, now).await?;

        tx.commit().await?;
        Ok(IngestOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_variants_are_distinct() {
        assert_ne!(IngestOutcome::Applied, IngestOutcome::UnknownMessage);
        assert_ne!(IngestOutcome::Applied, IngestOutcome::AlreadyTerminal);
    }
}
