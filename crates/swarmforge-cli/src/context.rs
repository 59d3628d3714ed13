//! Application context, built once per invocation and passed down.

use crate::config::{BackendChoice, Config};
use std::sync::Arc;
use swarmforge_client::{RequestTagger, Session};
use swarmforge_generation::{
    Backends, DispatchEngine, RemoteScriptingBackend,
    stubs::{StubImageBackend, StubPrimitiveBackend, StubProceduralBackend, StubScriptingBackend},
};
use tracing::{debug, info};

pub struct AppContext {
    pub config: Config,
    pub session: Session,
    pub tagger: RequestTagger,
    pub engine: Arc<DispatchEngine>,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        let session = Session::new(config.server.session_config());
        let tagger = RequestTagger::new(session.clone());
        let backends = build_backends(&config, &tagger);
        for kind in swarmforge_core::AssetKind::ALL {
            let backend = backends.name_of(kind).unwrap_or("none");
            debug!(asset_type = %kind, backend, "backend slot");
        }
        Self {
            engine: Arc::new(DispatchEngine::new(backends)),
            config,
            session,
            tagger,
        }
    }

    /// Whether any configured backend needs the orchestrator connection.
    pub fn needs_connection(&self) -> bool {
        self.config.generation.scripting == BackendChoice::Remote
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        self.session.connect().await?;
        info!(endpoint = %self.session.endpoint().await, "session ready");
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Err(error) = self.session.disconnect(true).await {
            debug!(%error, "disconnect during shutdown failed");
        }
    }
}

fn build_backends(config: &Config, tagger: &RequestTagger) -> Backends {
    let generation = &config.generation;
    let mut backends = Backends::default();
    if generation.primitive == BackendChoice::Stub {
        backends = backends.with_primitive(Arc::new(StubPrimitiveBackend));
    }
    // Script authoring follows the scripting choice.
    match generation.scripting {
        BackendChoice::Stub => {
            backends = backends
                .with_scripting(Arc::new(StubScriptingBackend))
                .with_scripts(Arc::new(StubScriptingBackend));
        }
        BackendChoice::Remote => {
            let remote = Arc::new(RemoteScriptingBackend::new(
                tagger.clone(),
                config.server.response_timeout(),
            ));
            backends = backends.with_scripting(remote.clone()).with_scripts(remote);
        }
        BackendChoice::Disabled => {}
    }
    if generation.image == BackendChoice::Stub {
        backends = backends.with_image(Arc::new(StubImageBackend));
    }
    if generation.procedural == BackendChoice::Stub {
        backends = backends.with_procedural(Arc::new(StubProceduralBackend));
    }
    backends
}
