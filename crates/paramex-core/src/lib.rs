//! paramex-core: Parameter Exploration Engine
//!
//! Re-exports core components for driving the exploration of a generative
//! artwork's parameter space.
//!
//! ## Key Components
//!
//! - `prng`: seedable string-seeded generator (xmur3 + sfc32)
//! - `registry`: typed parameter definitions bound to owner objects
//! - `agent`: local random and remote proxy agents behind one trait
//! - `batch`: batch run state machine
//! - `session`: durable, namespaced session identifiers
//! - `persistence`: record storage on the explorer server
//! - `engine`: the context object tying everything together

pub mod agent;
pub mod batch;
pub mod config;
pub mod engine;
mod error;
pub mod metrics;
pub mod obs;
pub mod persistence;
pub mod prng;
pub mod registry;
pub mod session;
pub mod telemetry;

pub use agent::{
    sample_parameter, Agent, AgentContext, AgentProposal, AgentTable, LearningRecord,
    LocalRandomAgent, RemoteAgent, LOCAL_RANDOM_AGENT,
};
pub use batch::{BatchRun, BatchState, StepOutcome};
pub use config::{ExplorerConfig, BATCH_SIZE_CEILING, DEFAULT_BATCH_SIZE_MAX, DEFAULT_NAMESPACE};
pub use engine::{AgentSummary, ExplorerEngine, NullRenderer, RenderOutput, Renderer};
pub use error::{validate_score, ExplorerError, ExplorerResult};
pub use persistence::PersistenceGateway;
pub use prng::Prng;
pub use registry::{
    OwnerHandle, OwnerStore, ParameterDefinition, ParameterGroup, ParameterRegistry,
    ParameterSpec, SnapshotOptions, GLOBAL_OWNER,
};
pub use session::{
    generate_session_id, FileSessionStore, MemorySessionStore, SessionManager, SessionStore,
};
pub use telemetry::init_tracing;
