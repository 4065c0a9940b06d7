use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{AnalysisKind, Image, IndividualSimilarRecord};
use async_trait::async_trait;
use std::path::Path;

use super::similarity::resolve_neighbors;
use super::strategy::{drive, BatchSink, OutputIngester, ResolvedBatch};
use super::{IngestContext, IngestReport};

/// 单文件相似度检索：结果文件恰好包含一个条目，每个作业一条记录
pub struct SingleSimilarityIngester;

struct SingleSimilaritySink {
    ordered: Vec<Image>,
    seen: usize,
    record: Option<IndividualSimilarRecord>,
}

#[async_trait]
impl BatchSink for SingleSimilaritySink {
    // 探针文件不属于数据集
    fn resolves_items(&self) -> bool {
        false
    }

    async fn write_batch(
        &mut self,
        ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize> {
        for streamed in &batch.items {
            self.seen += 1;
            if self.record.is_some() {
                continue;
            }

            let probe_path = ctx
                .job
                .request
                .get("probe_file")
                .and_then(|v| v.as_str())
                .or_else(|| streamed.item.path())
                .unwrap_or_default()
                .to_string();
            self.record = Some(IndividualSimilarRecord {
                job_id: ctx.job.id,
                probe_path,
                neighbors: resolve_neighbors(&streamed.item, &self.ordered, ctx.identity()),
            });
        }
        Ok(0)
    }

    async fn finish(&mut self, ctx: &IngestContext) -> PipelineResult<()> {
        if self.seen != 1 {
            return Err(PipelineError::ResultData(format!(
                "单文件相似度结果应恰好包含 1 个条目，实际为 {}",
                self.seen
            )));
        }
        if let Some(record) = &self.record {
            ctx.results.insert_individual_similar(record).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutputIngester for SingleSimilarityIngester {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::SingleFileSimilaritySearch
    }

    fn expected_file(&self) -> &'static str {
        "similarity_single.json"
    }

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport> {
        let ordered = ctx.images.list_ordered(ctx.job.dataset_id).await?;
        let mut sink = SingleSimilaritySink {
            ordered,
            seen: 0,
            record: None,
        };
        let mut report = drive(ctx, path, &mut sink).await?;
        report.stored = 1;
        Ok(report)
    }
}
