pub mod ingest;
pub mod submit;

pub use ingest::IngestOutputHandler;
pub use submit::SubmitAnalysisHandler;

use analysis_core::PipelineResult;
use analysis_domain::{DatasetJob, DatasetJobKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// 某一类数据集作业的处理器
#[async_trait]
pub trait UnitHandler: Send + Sync {
    fn kind(&self) -> DatasetJobKind;

    async fn handle(&self, unit: &DatasetJob) -> PipelineResult<()>;
}

/// 作业类型到处理器的注册表
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<DatasetJobKind, Arc<dyn UnitHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn UnitHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: DatasetJobKind) -> Option<Arc<dyn UnitHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// 已注册的作业类型，按名称排序
    pub fn kinds(&self) -> Vec<DatasetJobKind> {
        let mut kinds: Vec<DatasetJobKind> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }
}
