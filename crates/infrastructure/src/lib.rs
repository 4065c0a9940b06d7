pub mod analysis_api;
pub mod archive;
pub mod database;
pub mod dataset_reader;
pub mod in_memory_queue;

pub use analysis_api::AnalysisApiClient;
pub use archive::{extract_and_locate, extract_tar_gz, find_result_file};
pub use database::*;
pub use dataset_reader::{read_dataset, DatasetStream, ReadSummary, StreamedItem};
pub use in_memory_queue::{InMemoryTaskQueue, QueuedTask, TaskReceiver};
