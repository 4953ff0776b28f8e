//! Persistence gateway
//!
//! Turns accumulated samples into `save` calls and wraps the data endpoints.
//! `save` and `save_single` propagate failures so the caller can keep its
//! unsaved work; `load_data` and `update_score` degrade to empty results.

use paramex_wire::{ExplorerClient, ImageRecord, Metadata, Sample};

use crate::error::{ExplorerError, ExplorerResult};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Clone)]
pub struct PersistenceGateway {
    client: ExplorerClient,
    engine_id: String,
}

impl PersistenceGateway {
    pub fn new(client: ExplorerClient, engine_id: &str) -> Self {
        Self {
            client,
            engine_id: engine_id.to_string(),
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    /// Persist a whole batch in one call; returns the new record ids.
    ///
    /// The server only stores samples carrying an image, so the id list may
    /// be shorter than `samples`.
    pub async fn save(
        &self,
        session_id: &str,
        samples: &[Sample],
        metadata: &[Metadata],
    ) -> ExplorerResult<Vec<u64>> {
        match self
            .client
            .save(&self.engine_id, session_id, samples, metadata)
            .await
        {
            Ok(ids) => {
                obs::emit_saved(session_id, &ids);
                if ids.len() < samples.len() {
                    obs::emit_samples_skipped(session_id, samples.len(), ids.len());
                }
                Ok(ids)
            }
            Err(err) => {
                METRICS.inc_saves_failed();
                obs::emit_save_failed(session_id, samples.len(), &err);
                Err(err.into())
            }
        }
    }

    /// Persist exactly one sample; returns the id of the new record.
    pub async fn save_single(
        &self,
        session_id: &str,
        sample: &Sample,
        metadata: &Metadata,
    ) -> ExplorerResult<u64> {
        let ids = self
            .save(
                session_id,
                std::slice::from_ref(sample),
                std::slice::from_ref(metadata),
            )
            .await?;
        ids.first().copied().ok_or(ExplorerError::MissingRecordId)
    }

    /// Scored records of a session. Empty on failure.
    pub async fn load_data(&self, session_id: &str) -> Vec<ImageRecord> {
        match self.client.load_data(&self.engine_id, session_id).await {
            Ok(records) => records,
            Err(err) => {
                METRICS.inc_remote_failures();
                obs::emit_remote_failure("persistence", "load_data", &err);
                Vec::new()
            }
        }
    }

    /// Attach a score to a stored record. `None` on failure.
    pub async fn update_score(
        &self,
        session_id: &str,
        image_id: u64,
        score: f64,
    ) -> Option<ImageRecord> {
        match self
            .client
            .update_score(&self.engine_id, session_id, image_id, score)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                METRICS.inc_remote_failures();
                obs::emit_remote_failure("persistence", "update_score", &err);
                None
            }
        }
    }
}
