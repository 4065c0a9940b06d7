pub mod dataset_item;
pub mod entities;
pub mod identity;
pub mod ports;
pub mod repositories;
pub mod services;
pub mod sqlx_impls;

pub use analysis_core::{PipelineError, PipelineResult};
pub use dataset_item::*;
pub use entities::*;
pub use identity::*;
pub use ports::*;
pub use repositories::*;
pub use services::*;
