pub mod audit;
pub mod health;
pub mod rate_limiter;
pub mod registry;
pub mod session;
pub mod state;
pub mod upstream;

// Re-export commonly used types for convenience
pub use audit::{
    AuditSink, FanoutAuditSink, MemoryAuditSink, SessionAuditRecord, TracingAuditSink,
    WebhookAuditSink,
};
pub use health::{HealthMonitor, HealthProbe, UpstreamStatus};
pub use rate_limiter::SlidingWindowRateLimiter;
pub use registry::{SessionEntry, SessionRegistry, SessionSummary};
pub use session::{SessionCoordinator, TerminationReason};
pub use state::{CoreState, Maintenance};
pub use upstream::{
    SendResult, SpeechServiceConnector, TranscriptionEvent, UpstreamClient, UpstreamConnector,
    UpstreamError, UpstreamEvent, UpstreamPeer, UpstreamState,
};
