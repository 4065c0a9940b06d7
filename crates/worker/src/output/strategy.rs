//! 结果文件写入策略
//!
//! 每种分析类型一个 [`OutputIngester`]，共用 [`drive`] 的分批循环：
//! 流式读取条目，凑满一批后一次性解析图像ID，再交给 [`BatchSink`] 写入。

use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::AnalysisKind;
use analysis_infrastructure::{DatasetStream, StreamedItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{IngestContext, IngestReport};
use crate::progress::ProgressReporter;

/// 无法解析的路径最多记录的条数
const UNRESOLVED_LOG_LIMIT: usize = 5;

/// 某种分析类型的结果写入器
#[async_trait]
pub trait OutputIngester: Send + Sync {
    fn kind(&self) -> AnalysisKind;

    /// 归档中结果文件的文件名
    fn expected_file(&self) -> &'static str;

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport>;
}

/// 一批已解析的条目
pub struct ResolvedBatch {
    pub items: Vec<StreamedItem>,
    /// 条目路径 -> 图像ID
    pub image_ids: HashMap<String, i64>,
}

impl ResolvedBatch {
    /// 条目对应的图像ID，无法解析时为 None
    pub fn image_id(&self, item: &StreamedItem) -> Option<i64> {
        item.item
            .path()
            .and_then(|path| self.image_ids.get(path).copied())
    }
}

/// 分批写入的接收端
#[async_trait]
pub trait BatchSink: Send {
    /// 是否需要把条目路径解析为数据集图像
    fn resolves_items(&self) -> bool {
        true
    }

    /// 写入一批，返回写入的记录数
    async fn write_batch(
        &mut self,
        ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize>;

    async fn finish(&mut self, _ctx: &IngestContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// 流式读取 `path`，按 `ctx.batch_size` 分批交给 `sink`
pub async fn drive<S: BatchSink>(
    ctx: &IngestContext,
    path: &Path,
    sink: &mut S,
) -> PipelineResult<IngestReport> {
    let mut stream = DatasetStream::open(path.to_path_buf(), ctx.stream_buffer_size);
    let mut progress = ProgressReporter::new(ctx.job.entity_description(), ctx.progress_interval);
    let mut report = IngestReport::default();
    let mut batch = Vec::with_capacity(ctx.batch_size);

    while let Some(streamed) = stream.next().await {
        progress.tick(streamed.percent_read);
        batch.push(streamed);
        if batch.len() >= ctx.batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(ctx.batch_size));
            flush(ctx, sink, full, &mut report).await?;
        }
    }

    let summary = stream.finish().await?;
    if !batch.is_empty() {
        flush(ctx, sink, batch, &mut report).await?;
    }
    sink.finish(ctx).await?;
    progress.finish();

    report.skipped = summary.skipped;
    Ok(report)
}

async fn flush<S: BatchSink>(
    ctx: &IngestContext,
    sink: &mut S,
    items: Vec<StreamedItem>,
    report: &mut IngestReport,
) -> PipelineResult<()> {
    report.items += items.len();

    let image_ids = if sink.resolves_items() {
        let paths: Vec<String> = items
            .iter()
            .filter_map(|s| s.item.path().map(str::to_string))
            .collect();
        let resolved = ctx.resolver.resolve(&paths).await?;

        let unresolved: Vec<&StreamedItem> = items
            .iter()
            .filter(|s| s.item.path().map_or(true, |p| !resolved.contains_key(p)))
            .collect();
        if !unresolved.is_empty() {
            let sample: Vec<&str> = unresolved
                .iter()
                .take(UNRESOLVED_LOG_LIMIT)
                .map(|s| s.item.path().unwrap_or("<无路径>"))
                .collect();
            warn!(
                "{}: {} 个条目无法对应到数据集图像，例如 {:?}",
                ctx.job.entity_description(),
                unresolved.len(),
                sample
            );
            report.unresolved += unresolved.len();
        }
        resolved
    } else {
        HashMap::new()
    };

    let count = items.len();
    let stored = sink
        .write_batch(ctx, ResolvedBatch { items, image_ids })
        .await?;
    report.stored += stored;
    metrics::counter!("analysis_items_ingested_total", "kind" => ctx.job.kind.as_str())
        .increment(count as u64);
    debug!("已写入一批: 条目 {}, 记录 {}", count, stored);
    Ok(())
}

/// 分析类型到写入器的映射
#[derive(Clone, Default)]
pub struct IngesterRegistry {
    ingesters: HashMap<AnalysisKind, Arc<dyn OutputIngester>>,
}

impl IngesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置类型
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(super::projection::ProjectionIngester))
            .register(Arc::new(super::clustering::ClusteringIngester))
            .register(Arc::new(super::outliers::OutlierIngester))
            .register(Arc::new(super::similarity::SimilarityIngester))
            .register(Arc::new(super::single_similarity::SingleSimilarityIngester))
            .register(Arc::new(super::classification::ClassificationIngester))
    }

    pub fn register(mut self, ingester: Arc<dyn OutputIngester>) -> Self {
        self.ingesters.insert(ingester.kind(), ingester);
        self
    }

    pub fn get(&self, kind: AnalysisKind) -> PipelineResult<Arc<dyn OutputIngester>> {
        self.ingesters
            .get(&kind)
            .cloned()
            .ok_or_else(|| PipelineError::UnsupportedAnalysisKind(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = IngesterRegistry::with_defaults();
        for kind in AnalysisKind::ALL {
            let ingester = registry.get(kind).unwrap();
            assert_eq!(ingester.kind(), kind);
        }
    }

    #[test]
    fn test_expected_file_names() {
        let registry = IngesterRegistry::with_defaults();
        let name = |kind| registry.get(kind).unwrap().expected_file();
        assert_eq!(name(AnalysisKind::Projection), "projection.json");
        assert_eq!(name(AnalysisKind::Clustering), "clusters.json");
        assert_eq!(name(AnalysisKind::OutlierDetection), "outliers.json");
        assert_eq!(name(AnalysisKind::SimilaritySearch), "similarity.json");
        assert_eq!(
            name(AnalysisKind::SingleFileSimilaritySearch),
            "similarity_single.json"
        );
        assert_eq!(name(AnalysisKind::Classification), "predictions.json");
    }

    #[test]
    fn test_empty_registry_rejects_kind() {
        let err = IngesterRegistry::new()
            .get(AnalysisKind::Clustering)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::UnsupportedAnalysisKind(_)));
    }
}
