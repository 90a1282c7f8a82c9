//! 执行内核：错误、执行上下文、Agent 执行器、优雅关闭

pub mod context;
pub mod error;
pub mod executor;
pub mod shutdown;

pub use context::{ExecutionContext, RunOutcome};
pub use error::{AgentError, SafetyLimitKind};
pub use executor::{final_text, AgentExecutor, ExecutorParts};
pub use shutdown::{
    run_with_graceful_shutdown, CleanupReport, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason, StorageFlush,
};
