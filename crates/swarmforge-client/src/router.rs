//! Inbound routing by type tag.
//!
//! One handler per tag; registering again replaces the previous handler.
//! Fan-out is the caller's job, see [`InboundRouter::forward_all`].

use std::collections::HashMap;
use std::sync::Arc;
use swarmforge_core::codec::{self, CodecError, EnvelopeHeader};
use swarmforge_core::{
    CustomModes, Envelope, ErrorData, Inbound, InboundMessage, TaskList, TaskUpdate,
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

type Handler = Arc<dyn Fn(&str) -> Result<(), CodecError> + Send + Sync>;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Decoded and handed to the handler for this tag.
    Handled(String),
    /// No handler registered for this tag; dropped.
    Unhandled(String),
    /// Frame could not be decoded; dropped.
    Malformed(String),
}

/// Registry of per-type handlers.
#[derive(Default)]
pub struct InboundRouter {
    handlers: RwLock<HashMap<&'static str, Handler>>,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `T::TYPE`, replacing any previous one.
    pub async fn register<T, F>(&self, handler: F)
    where
        T: Inbound,
        F: Fn(Envelope<T>) + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |text: &str| {
            let envelope = codec::decode::<T>(text)?;
            handler(envelope);
            Ok(())
        });
        if self.handlers.write().await.insert(T::TYPE, erased).is_some() {
            debug!(message_type = T::TYPE, "replaced inbound handler");
        }
    }

    /// Remove the handler for `T::TYPE`.
    pub async fn unregister<T: Inbound>(&self) -> bool {
        self.handlers.write().await.remove(T::TYPE).is_some()
    }

    pub async fn is_registered(&self, message_type: &str) -> bool {
        self.handlers.read().await.contains_key(message_type)
    }

    /// Register handlers for every known inbound type that forward to one channel.
    pub async fn forward_all(&self, tx: mpsc::UnboundedSender<InboundMessage>) {
        let task_tx = tx.clone();
        self.register::<TaskUpdate, _>(move |envelope| {
            let _ = task_tx.send(InboundMessage::TaskUpdate(envelope));
        })
        .await;
        let modes_tx = tx.clone();
        self.register::<CustomModes, _>(move |envelope| {
            let _ = modes_tx.send(InboundMessage::CustomModes(envelope));
        })
        .await;
        let error_tx = tx.clone();
        self.register::<ErrorData, _>(move |envelope| {
            let _ = error_tx.send(InboundMessage::Error(envelope));
        })
        .await;
        self.register::<TaskList, _>(move |envelope| {
            let _ = tx.send(InboundMessage::Tasks(envelope));
        })
        .await;
    }

    /// Route one raw frame. Never fails; bad frames are logged and dropped.
    pub async fn dispatch(&self, text: &str) -> RouteOutcome {
        match codec::decode_header(text) {
            Ok(header) => self.route(&header, text).await,
            Err(error) => {
                warn!(%error, "dropping malformed message");
                RouteOutcome::Malformed(String::new())
            }
        }
    }

    pub(crate) async fn route(&self, header: &EnvelopeHeader, text: &str) -> RouteOutcome {
        let handler = self.handlers.read().await.get(header.kind.as_str()).cloned();
        let Some(handler) = handler else {
            warn!(message_type = %header.kind, "unhandled message type, dropping");
            return RouteOutcome::Unhandled(header.kind.clone());
        };

        match handler(text) {
            Ok(()) => RouteOutcome::Handled(header.kind.clone()),
            Err(error) => {
                warn!(message_type = %header.kind, %error, "dropping malformed message");
                RouteOutcome::Malformed(header.kind.clone())
            }
        }
    }
}
