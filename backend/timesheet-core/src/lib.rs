// src/lib.rs
pub mod approval;
pub mod batch;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fetcher;
pub mod model;
pub mod period;
pub mod policy;
pub mod response_cache;
pub mod retry;
pub mod service;
pub mod tempo_client;
pub mod trends;

pub use approval::{plan_approvals, ApprovalPlan, ApprovalStatus, HeldBack, TimesheetApproval};
pub use batch::{BatchExecutor, BatchReport, BatchSettings, Disposition, OperationResult, RunOutcome};
pub use checkpoint::{CheckpointStore, JsonlCheckpointStore, MemoryCheckpointStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{ApprovalRun, ComplianceEngine};
pub use error::{
    BatchError, CheckpointError, ConfigError, EngineError, ErrorClass, EvaluationError, ServiceError,
};
pub use evaluator::ComplianceEvaluator;
pub use fetcher::WorkLogFetcher;
pub use model::*;
pub use period::{Period, PeriodKind};
pub use policy::CompliancePolicy;
pub use response_cache::{CacheStats, Fingerprint, ResponseCache};
pub use retry::RetryPolicy;
pub use service::TimesheetService;
pub use tempo_client::{CurrentUser, TeamSummary, TempoClient};
pub use trends::{PeriodWeighting, TrendAggregator, TrendStats, UniformWeighting};
