//! Outbound request tagging.

use crate::error::Result;
use crate::pending::{InFlight, PendingResponse};
use crate::session::Session;
use std::sync::Arc;
use swarmforge_core::{
    CancelTask, Envelope, GenerateAsset, GetCustomModes, Inbound, Outbound, Plan, RunCustomMode,
};
use tracing::info;
use uuid::Uuid;

/// Stamps every outgoing request with a fresh id and keeps track of ids in flight.
///
/// An id leaves the in-flight set when the session sees the response that
/// ends it (a mode list, an error, or a terminal task update), when its
/// [`PendingResponse`] is dropped, or when the connection closes. Taggers on
/// the same session share the set.
#[derive(Clone)]
pub struct RequestTagger {
    session: Session,
    in_flight: Arc<InFlight>,
}

impl RequestTagger {
    pub fn new(session: Session) -> Self {
        let in_flight = Arc::clone(session.in_flight());
        Self { session, in_flight }
    }

    /// A process-unique opaque id.
    pub fn new_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send `data` under a fresh request id and return the id.
    ///
    /// Responses are not correlated; use [`RequestTagger::request`] for that.
    pub async fn send<T: Outbound>(&self, data: T) -> Result<String> {
        let request_id = Self::new_request_id();
        self.in_flight.insert(request_id.clone());
        let envelope = Envelope::correlated(data, request_id.clone());
        if let Err(error) = self.session.send(&envelope).await {
            self.in_flight.retire(&request_id);
            return Err(error);
        }
        Ok(request_id)
    }

    /// Send `data` and correlate inbound `R` envelopes carrying the same id.
    ///
    /// The waiter is registered before the frame goes out, so a fast reply
    /// cannot be missed.
    pub async fn request<T: Outbound, R: Inbound>(&self, data: T) -> Result<PendingResponse<R>> {
        let request_id = Self::new_request_id();
        let rx = self
            .session
            .pending()
            .register(request_id.clone(), R::TYPE);
        self.in_flight.insert(request_id.clone());
        let pending = PendingResponse::new(
            request_id.clone(),
            rx,
            Arc::clone(self.session.pending()),
            Arc::clone(&self.in_flight),
        );

        self.session
            .send(&Envelope::correlated(data, request_id))
            .await?;
        Ok(pending)
    }

    pub fn is_in_flight(&self, request_id: &str) -> bool {
        self.in_flight.contains(request_id)
    }

    /// Ids sent and not yet retired, sorted.
    pub fn in_flight(&self) -> Vec<String> {
        self.in_flight.snapshot()
    }

    /// Forget an id, typically once its terminal response has been seen.
    pub fn retire(&self, request_id: &str) -> bool {
        self.in_flight.retire(request_id)
    }

    pub async fn request_modes(&self) -> Result<String> {
        self.send(GetCustomModes::default()).await
    }

    pub async fn run_mode(
        &self,
        mode: impl Into<String>,
        system_prompt: Option<String>,
    ) -> Result<String> {
        let mode = mode.into();
        let request_id = self
            .send(RunCustomMode {
                mode: mode.clone(),
                system_prompt,
            })
            .await?;
        info!(%mode, %request_id, "sent run_custom_mode request");
        Ok(request_id)
    }

    pub async fn plan(
        &self,
        prompt: impl Into<String>,
        system_prompt: Option<String>,
    ) -> Result<String> {
        let request_id = self
            .send(Plan {
                prompt: prompt.into(),
                system_prompt,
            })
            .await?;
        info!(%request_id, "sent plan request");
        Ok(request_id)
    }

    pub async fn generate_asset(
        &self,
        asset_type: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Result<String> {
        let asset_type = asset_type.into();
        let request_id = self
            .send(GenerateAsset {
                asset_type: asset_type.clone(),
                parameters,
            })
            .await?;
        info!(%asset_type, %request_id, "sent generate_asset request");
        Ok(request_id)
    }

    /// Ask the orchestrator to cancel `target_request_id`. The cancel message
    /// carries its own fresh id, which is never answered and so is retired
    /// as soon as it is sent.
    pub async fn cancel_task(&self, target_request_id: impl Into<String>) -> Result<String> {
        let target_request_id = target_request_id.into();
        let request_id = self
            .send(CancelTask {
                target_request_id: target_request_id.clone(),
            })
            .await?;
        self.in_flight.retire(&request_id);
        info!(target = %target_request_id, %request_id, "sent cancel_task request");
        Ok(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::session::SessionConfig;
    use std::collections::HashSet;
    use swarmforge_core::TaskUpdate;

    #[test]
    fn request_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| RequestTagger::new_request_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn send_while_disconnected_leaves_nothing_in_flight() {
        let tagger = RequestTagger::new(Session::new(SessionConfig::default()));

        let err = tagger.plan("castle", None).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        let err = tagger
            .request::<GenerateAsset, TaskUpdate>(GenerateAsset {
                asset_type: "3dmodel_blender".to_string(),
                parameters: serde_json::Value::Null,
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::NotConnected));
        assert!(tagger.in_flight().is_empty());
        assert_eq!(tagger.session().pending().len(), 0);
    }
}
