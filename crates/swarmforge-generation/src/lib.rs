//! Asset generation for SwarmForge.
//!
//! Backends implement the capability traits in [`backend`]; the
//! [`DispatchEngine`] validates requests and routes them to the backend
//! configured for their asset kind. Script authoring goes through a
//! separate [`ScriptGenerator`] slot.

pub mod backend;
mod engine;
pub mod remote;
pub mod stubs;

pub use backend::{
    Backend, BackendError, BackendResult, GeneratedImage, GeneratedObject, ImageBackend,
    PrimitiveBackend, ProceduralBackend, ProgressReporter, ScriptGenerator, ScriptingBackend,
};
pub use engine::{Backends, DispatchEngine, check_request};
pub use remote::RemoteScriptingBackend;
