pub mod executor;
pub mod handlers;
pub mod output;
pub mod progress;
pub mod service;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use handlers::{HandlerRegistry, IngestOutputHandler, SubmitAnalysisHandler, UnitHandler};
pub use output::{IngestContext, IngestReport, IngesterRegistry, OutputIngester, OutputProcessor};
pub use progress::ProgressReporter;
pub use service::WorkerService;
