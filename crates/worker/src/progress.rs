use tracing::info;

/// 按固定条数输出进度日志
#[derive(Debug)]
pub struct ProgressReporter {
    label: String,
    interval: usize,
    processed: usize,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, interval: usize) -> Self {
        Self {
            label: label.into(),
            interval: interval.max(1),
            processed: 0,
        }
    }

    /// 记录一条已处理记录，到达间隔时返回 true
    pub fn tick(&mut self, percent_read: f64) -> bool {
        self.processed += 1;
        if self.processed % self.interval == 0 {
            info!(
                "{}: 已处理 {} 条 ({:.1}%)",
                self.label, self.processed, percent_read
            );
            true
        } else {
            false
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn finish(&self) {
        info!("{}: 共处理 {} 条", self.label, self.processed);
    }
}
