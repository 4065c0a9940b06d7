use analysis_core::PipelineResult;
use analysis_domain::{AnalysisKind, Prediction};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use super::strategy::{drive, BatchSink, OutputIngester, ResolvedBatch};
use super::{IngestContext, IngestReport};

/// 分类：每个 (图像, 标签) 一条预测，未见过的标签自动创建
pub struct ClassificationIngester;

/// 新标签的随机显示颜色
fn random_color() -> String {
    let mut rng = rand::rng();
    format!(
        "#{:02x}{:02x}{:02x}",
        rng.random::<u8>(),
        rng.random::<u8>(),
        rng.random::<u8>()
    )
}

#[derive(Default)]
struct PredictionSink {
    /// 标签名 -> 标签ID
    labels: HashMap<String, i64>,
}

impl PredictionSink {
    async fn label_id(&mut self, ctx: &IngestContext, name: &str) -> PipelineResult<i64> {
        if let Some(id) = self.labels.get(name) {
            return Ok(*id);
        }
        let color = random_color();
        let label = ctx
            .labels
            .find_or_create(ctx.job.dataset_id, name, &color)
            .await?;
        debug!("使用标签 {} (ID: {})", label.name, label.id);
        self.labels.insert(name.to_string(), label.id);
        Ok(label.id)
    }
}

#[async_trait]
impl BatchSink for PredictionSink {
    async fn write_batch(
        &mut self,
        ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize> {
        let mut records = Vec::new();

        for streamed in &batch.items {
            let Some(image_id) = batch.image_id(streamed) else {
                continue;
            };

            let mut seen = HashSet::new();
            for (name, probability) in streamed.item.predictions() {
                if name.is_empty() || !seen.insert(name) {
                    continue;
                }
                let label_id = self.label_id(ctx, name).await?;
                records.push(Prediction {
                    job_id: ctx.job.id,
                    image_id,
                    label_id,
                    probability,
                });
            }
        }

        ctx.results.insert_predictions(&records).await?;
        Ok(records.len())
    }
}

#[async_trait]
impl OutputIngester for ClassificationIngester {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Classification
    }

    fn expected_file(&self) -> &'static str {
        "predictions.json"
    }

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport> {
        let mut sink = PredictionSink::default();
        drive(ctx, path, &mut sink).await
    }
}
