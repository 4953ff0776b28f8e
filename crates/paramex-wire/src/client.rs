//! Typed calls over a [`Transport`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::*;
use crate::schema::{ImageRecord, Metadata, Sample};
use crate::transport::Transport;
use crate::WireResult;

/// Typed client for every endpoint of the explorer server.
///
/// Cheap to clone; clones share the underlying transport.
#[derive(Clone)]
pub struct ExplorerClient {
    transport: Arc<dyn Transport>,
}

impl ExplorerClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call<Req: Serialize + ?Sized, Resp: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        request: &Req,
    ) -> WireResult<Resp> {
        let body = serde_json::to_value(request)?;
        let raw = self.transport.call(endpoint, body).await?;
        decode_response(endpoint, raw)
    }

    pub async fn agent_play(&self, request: &AgentPlayRequest) -> WireResult<AgentPlayResponse> {
        self.call(Endpoint::AgentPlay, request).await
    }

    pub async fn agent_update(&self, request: &AgentUpdateRequest) -> WireResult<()> {
        self.call::<_, Ack>(Endpoint::AgentUpdate, request).await?;
        Ok(())
    }

    pub async fn agent_time_warp(&self, request: &AgentTimeWarpRequest) -> WireResult<()> {
        self.call::<_, Ack>(Endpoint::AgentTimeWarp, request).await?;
        Ok(())
    }

    pub async fn agent_change(&self, request: &AgentChangeRequest) -> WireResult<()> {
        self.call::<_, Ack>(Endpoint::AgentChange, request).await?;
        Ok(())
    }

    pub async fn load_data(&self, id: &str, session_id: &str) -> WireResult<Vec<ImageRecord>> {
        let request = LoadDataRequest {
            id: id.to_string(),
            session_id: session_id.to_string(),
        };
        let resp: LoadDataResponse = self.call(Endpoint::LoadData, &request).await?;
        Ok(resp.images_infos)
    }

    pub async fn update_score(
        &self,
        id: &str,
        session_id: &str,
        image_id: u64,
        score: f64,
    ) -> WireResult<Option<ImageRecord>> {
        let request = UpdateScoreRequest {
            id: id.to_string(),
            session_id: session_id.to_string(),
            image_id,
            score,
        };
        let resp: UpdateScoreResponse = self.call(Endpoint::UpdateScore, &request).await?;
        Ok(resp.image_infos)
    }

    /// Persist a batch; returns the identifiers of the stored records.
    pub async fn save(
        &self,
        id: &str,
        session_id: &str,
        batch_parameters: &[Sample],
        batch_metadata: &[Metadata],
    ) -> WireResult<Vec<u64>> {
        let request = SaveRequest {
            id,
            session_id,
            batch_parameters,
            batch_metadata,
        };
        let resp: SaveResponse = self.call(Endpoint::Save, &request).await?;
        Ok(resp.images_ids)
    }
}
