pub mod clock;
pub mod error;
pub mod offline;
pub mod report;
pub mod scenario_runner;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod trace;
mod worker;

pub use error::{ReplayError, TraceFormatError, TraceFormatErrorKind};
pub use offline::replay_offline;
pub use report::{ActuationRecord, EndpointSummary, Outcome, ReplayReport, StopReason};
pub use scheduler::{Dispatch, Scheduler};
pub use session::{EndpointRegistry, ReplayEvent, ReplaySession, SessionPhase};
pub use store::TraceStore;
pub use trace::{Trace, TraceReader};
