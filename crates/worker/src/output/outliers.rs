use analysis_core::PipelineResult;
use analysis_domain::{normalize_score, AnalysisKind, OutlierRecord};
use async_trait::async_trait;
use std::path::Path;

use super::strategy::{drive, BatchSink, OutputIngester, ResolvedBatch};
use super::{IngestContext, IngestReport};

/// 离群检测：每张图像一条记录
pub struct OutlierIngester;

struct OutlierSink;

#[async_trait]
impl BatchSink for OutlierSink {
    async fn write_batch(
        &mut self,
        ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize> {
        let records: Vec<OutlierRecord> = batch
            .items
            .iter()
            .filter_map(|streamed| {
                batch.image_id(streamed).map(|image_id| OutlierRecord {
                    job_id: ctx.job.id,
                    image_id,
                    is_outlier: streamed.item.is_outlier.unwrap_or(false),
                    score: normalize_score(streamed.item.outlier_score),
                })
            })
            .collect();

        ctx.results.insert_outliers(&records).await?;
        Ok(records.len())
    }
}

#[async_trait]
impl OutputIngester for OutlierIngester {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::OutlierDetection
    }

    fn expected_file(&self) -> &'static str {
        "outliers.json"
    }

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport> {
        drive(ctx, path, &mut OutlierSink).await
    }
}
