use analysis_core::PipelineResult;
use analysis_domain::{normalize_score, AnalysisKind, Cluster, ClusterItem};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::strategy::{drive, BatchSink, OutputIngester, ResolvedBatch};
use super::{IngestContext, IngestReport};

pub const HOTSPOTS_FILE_NAME: &str = "hotspots.json";

/// 没有 clust_id 的条目归入噪声簇
const NOISE_CLUSTER_INDEX: i64 = -1;

/// 聚类：每个 clust_id 一个簇，-1 与其他编号同样处理
pub struct ClusteringIngester;

#[derive(Debug, Serialize)]
struct Hotspot {
    cluster_id: i64,
    cluster_index: i64,
    name: String,
    size: usize,
    /// 簇内概率最高的成员路径
    thumbnail: Option<String>,
    #[serde(skip)]
    best_probability: f64,
    members: Vec<usize>,
}

#[derive(Default)]
struct ClusterSink {
    /// 簇编号 -> 簇记录ID
    clusters: HashMap<i64, i64>,
    hotspots: BTreeMap<i64, Hotspot>,
}

impl ClusterSink {
    async fn cluster_id(&mut self, ctx: &IngestContext, index: i64) -> PipelineResult<i64> {
        if let Some(id) = self.clusters.get(&index) {
            return Ok(*id);
        }

        let name = Cluster::display_name(index);
        let cluster = ctx.results.create_cluster(ctx.job.id, index, &name).await?;
        self.clusters.insert(index, cluster.id);
        self.hotspots.insert(
            index,
            Hotspot {
                cluster_id: cluster.id,
                cluster_index: index,
                name,
                size: 0,
                thumbnail: None,
                best_probability: f64::NEG_INFINITY,
                members: Vec::new(),
            },
        );
        Ok(cluster.id)
    }
}

#[async_trait]
impl BatchSink for ClusterSink {
    async fn write_batch(
        &mut self,
        ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize> {
        let mut rows = Vec::with_capacity(batch.items.len());

        for streamed in &batch.items {
            let Some(image_id) = batch.image_id(streamed) else {
                continue;
            };
            let index = streamed.item.clust_id.unwrap_or(NOISE_CLUSTER_INDEX);
            let cluster_id = self.cluster_id(ctx, index).await?;
            let probability = normalize_score(streamed.item.clust_prob);

            if let Some(hotspot) = self.hotspots.get_mut(&index) {
                hotspot.size += 1;
                hotspot.members.push(streamed.index);
                if probability > hotspot.best_probability {
                    hotspot.best_probability = probability;
                    hotspot.thumbnail = streamed.item.path().map(str::to_string);
                }
            }

            rows.push(ClusterItem {
                cluster_id,
                image_id,
                probability,
                outlier_score: normalize_score(streamed.item.outlier_score),
            });
        }

        ctx.results.insert_cluster_items(&rows).await?;
        Ok(rows.len())
    }

    async fn finish(&mut self, ctx: &IngestContext) -> PipelineResult<()> {
        tokio::fs::create_dir_all(&ctx.artifacts_dir).await?;
        let hotspots: Vec<&Hotspot> = self.hotspots.values().collect();
        let body = serde_json::to_vec_pretty(&serde_json::json!({
            "job_id": ctx.job.id,
            "hotspots": hotspots,
        }))?;
        tokio::fs::write(ctx.artifacts_dir.join(HOTSPOTS_FILE_NAME), body).await?;
        Ok(())
    }
}

#[async_trait]
impl OutputIngester for ClusteringIngester {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Clustering
    }

    fn expected_file(&self) -> &'static str {
        "clusters.json"
    }

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport> {
        let mut sink = ClusterSink::default();
        drive(ctx, path, &mut sink).await
    }
}
