use analysis_core::PipelineResult;
use analysis_domain::{
    normalize_score, AnalysisKind, DatasetItem, Image, ImageIdentity, Neighbor, SimilarRecord,
};
use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

use super::strategy::{drive, BatchSink, OutputIngester, ResolvedBatch};
use super::{IngestContext, IngestReport};

/// 相似度检索：邻居下标指向按路径排序的数据集图像列表
pub struct SimilarityIngester;

/// 将条目的邻居下标解析为图像，越界下标被丢弃
pub(crate) fn resolve_neighbors(
    item: &DatasetItem,
    ordered: &[Image],
    identity: &ImageIdentity,
) -> Vec<Neighbor> {
    let Some(indices) = &item.neighbors else {
        return Vec::new();
    };

    indices
        .iter()
        .enumerate()
        .filter_map(|(position, index)| {
            let image = usize::try_from(*index).ok().and_then(|i| ordered.get(i));
            match image {
                Some(image) => Some(Neighbor {
                    image_id: Some(image.id),
                    path: identity.project(image),
                    score: normalize_score(item.neighbor_scores.get(position).copied()),
                }),
                None => {
                    warn!(
                        "邻居下标 {} 超出数据集范围 (共 {} 张图像)",
                        index,
                        ordered.len()
                    );
                    None
                }
            }
        })
        .collect()
}

/// 邻居中的最高分，没有邻居时为 0
pub(crate) fn highest_score(neighbors: &[Neighbor]) -> f64 {
    neighbors
        .iter()
        .map(|n| n.score)
        .fold(None, |best: Option<f64>, score| {
            Some(best.map_or(score, |b| b.max(score)))
        })
        .unwrap_or(0.0)
}

struct SimilaritySink {
    ordered: Vec<Image>,
}

#[async_trait]
impl BatchSink for SimilaritySink {
    async fn write_batch(
        &mut self,
        ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize> {
        let records: Vec<SimilarRecord> = batch
            .items
            .iter()
            .filter_map(|streamed| {
                let image_id = batch.image_id(streamed)?;
                let neighbors = resolve_neighbors(&streamed.item, &self.ordered, ctx.identity());
                Some(SimilarRecord {
                    job_id: ctx.job.id,
                    image_id,
                    highest_score: highest_score(&neighbors),
                    neighbors,
                })
            })
            .collect();

        ctx.results.insert_similars(&records).await?;
        Ok(records.len())
    }
}

#[async_trait]
impl OutputIngester for SimilarityIngester {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::SimilaritySearch
    }

    fn expected_file(&self) -> &'static str {
        "similarity.json"
    }

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport> {
        let ordered = ctx.images.list_ordered(ctx.job.dataset_id).await?;
        let mut sink = SimilaritySink { ordered };
        drive(ctx, path, &mut sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: i64, path: &str) -> Image {
        Image {
            id,
            dataset_id: 1,
            path: path.to_string(),
            name: Path::new(path)
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
        }
    }

    #[test]
    fn test_neighbors_resolve_by_position() {
        let ordered = vec![image(10, "a.png"), image(11, "b.png"), image(12, "c.png")];
        let item = DatasetItem {
            neighbors: Some(vec![2, 7, 0]),
            neighbor_scores: vec![0.9, 0.5, f64::NAN],
            ..Default::default()
        };

        let neighbors = resolve_neighbors(&item, &ordered, &ImageIdentity::Path);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].image_id, Some(12));
        assert_eq!(neighbors[0].path, "c.png");
        assert_eq!(neighbors[0].score, 0.9);
        // 非有限分数存为 0
        assert_eq!(neighbors[1].score, 0.0);
        assert_eq!(highest_score(&neighbors), 0.9);
    }

    #[test]
    fn test_highest_score_of_nothing_is_zero() {
        assert_eq!(highest_score(&[]), 0.0);
    }
}
