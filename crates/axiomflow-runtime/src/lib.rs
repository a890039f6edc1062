pub mod backoff;
pub mod context;
pub mod executor;
pub mod handoff;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod router;

pub use backoff::RetryPolicy;
pub use context::{Context, ContextData};
pub use executor::WorkflowExecutor;
pub use handoff::{AuditEntry, ContextManager, HandoffEvent, HandoffKey};
pub use metrics::{JsonFileMetricsStore, MemoryMetricsStore, MetricsStore};
pub use recovery::{hooks, RecoveryError, RecoveryManager};
pub use registry::StepRegistry;
pub use router::AgentRouter;
