use analysis_core::PipelineResult;
use analysis_domain::AnalysisKind;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

use super::strategy::{drive, BatchSink, OutputIngester, ResolvedBatch};
use super::{IngestContext, IngestReport};

pub const LAYOUT_FILE_NAME: &str = "layout.json";

/// 降维投影：坐标写入 layout.json，不落库
pub struct ProjectionIngester;

#[derive(Serialize)]
struct LayoutPoint<'a> {
    index: usize,
    image_id: Option<i64>,
    path: Option<&'a str>,
    coordinates: Vec<f64>,
}

struct LayoutSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl LayoutSink {
    async fn create(dir: &Path) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(LAYOUT_FILE_NAME);
        let mut writer = BufWriter::new(File::create(&path).await?);
        writer.write_all(b"[").await?;
        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }
}

#[async_trait]
impl BatchSink for LayoutSink {
    async fn write_batch(
        &mut self,
        _ctx: &IngestContext,
        batch: ResolvedBatch,
    ) -> PipelineResult<usize> {
        let mut stored = 0;
        for streamed in &batch.items {
            let coordinates = streamed
                .item
                .projection
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|v| if v.is_finite() { *v } else { 0.0 })
                .collect();
            let point = LayoutPoint {
                index: streamed.index,
                image_id: batch.image_id(streamed),
                path: streamed.item.path(),
                coordinates,
            };

            if self.written > 0 {
                self.writer.write_all(b",").await?;
            }
            self.writer.write_all(&serde_json::to_vec(&point)?).await?;
            self.written += 1;
            stored += 1;
        }
        Ok(stored)
    }

    async fn finish(&mut self, _ctx: &IngestContext) -> PipelineResult<()> {
        self.writer.write_all(b"]").await?;
        self.writer.flush().await?;
        info!("已写入 {} 个坐标到 {}", self.written, self.path.display());
        Ok(())
    }
}

#[async_trait]
impl OutputIngester for ProjectionIngester {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Projection
    }

    fn expected_file(&self) -> &'static str {
        "projection.json"
    }

    async fn ingest(&self, ctx: &IngestContext, path: &Path) -> PipelineResult<IngestReport> {
        let mut sink = LayoutSink::create(&ctx.artifacts_dir).await?;
        drive(ctx, path, &mut sink).await
    }
}
