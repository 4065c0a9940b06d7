//! 结果数据集的流式读取
//!
//! 结果文件形如 `{"data": [item, ...]}`，可能远大于内存。读取时逐条反序列化
//! `data` 数组中的元素并交给回调，不会物化整个数组。文件中裸露的
//! `NaN`、`Infinity`、`-Infinity` 记号在字符串之外时被改写为 `null`。

use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::DatasetItem;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const STOP_SENTINEL: &str = "__dataset_reader_stopped__";
const NON_FINITE_TOKENS: [&[u8]; 3] = [b"NaN", b"Infinity", b"-Infinity"];

/// 读取统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// 交给回调的条目数
    pub items: usize,
    /// 被跳过的非对象元素数
    pub skipped: usize,
    /// 回调是否提前终止了读取
    pub stopped_early: bool,
}

/// 统计底层已读取字节数
struct CountingReader<R> {
    inner: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// 将字符串之外的非有限数值记号改写为 `null`
pub struct NonFiniteFilter<R> {
    inner: R,
    out: Vec<u8>,
    out_pos: usize,
    candidate: Vec<u8>,
    in_string: bool,
    escaped: bool,
}

impl<R: BufRead> NonFiniteFilter<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            out: Vec::with_capacity(8 * 1024),
            out_pos: 0,
            candidate: Vec::with_capacity(16),
            in_string: false,
            escaped: false,
        }
    }

    fn is_token_prefix(candidate: &[u8]) -> bool {
        NON_FINITE_TOKENS.iter().any(|t| t.starts_with(candidate))
    }

    fn push_byte(&mut self, byte: u8) {
        if self.in_string {
            self.out.push(byte);
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return;
        }

        if !self.candidate.is_empty() {
            self.candidate.push(byte);
            if Self::is_token_prefix(&self.candidate) {
                if NON_FINITE_TOKENS.contains(&self.candidate.as_slice()) {
                    self.out.extend_from_slice(b"null");
                    self.candidate.clear();
                }
                return;
            }
            // 不是记号：原样输出已缓存的字节，再按普通字节处理当前字节
            self.candidate.pop();
            self.out.append(&mut self.candidate);
        }

        match byte {
            b'N' | b'I' | b'-' => self.candidate.push(byte),
            b'"' => {
                self.in_string = true;
                self.out.push(byte);
            }
            _ => self.out.push(byte),
        }
    }

    fn fill(&mut self) -> io::Result<bool> {
        self.out.clear();
        self.out_pos = 0;

        while self.out.is_empty() {
            let consumed = {
                let available = self.inner.fill_buf()?;
                if available.is_empty() {
                    self.out.append(&mut self.candidate);
                    return Ok(!self.out.is_empty());
                }
                let chunk = available.to_vec();
                for byte in &chunk {
                    self.push_byte(*byte);
                }
                chunk.len()
            };
            self.inner.consume(consumed);
        }
        Ok(true)
    }
}

impl<R: BufRead> Read for NonFiniteFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out_pos >= self.out.len() && !self.fill()? {
            return Ok(0);
        }
        let available = &self.out[self.out_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        Ok(n)
    }
}

struct Progress {
    bytes_read: Arc<AtomicU64>,
    total_bytes: u64,
}

impl Progress {
    fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        let read = self.bytes_read.load(Ordering::Relaxed) as f64;
        (read / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

struct ReadState<'a, F> {
    callback: &'a mut F,
    progress: Progress,
    summary: ReadSummary,
}

struct RootSeed<'s, 'a, F>(&'s mut ReadState<'a, F>);

impl<'de, F> DeserializeSeed<'de> for RootSeed<'_, '_, F>
where
    F: FnMut(DatasetItem, usize, f64) -> ControlFlow<()>,
{
    type Value = bool;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<bool, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, F> Visitor<'de> for RootSeed<'_, '_, F>
where
    F: FnMut(DatasetItem, usize, f64) -> ControlFlow<()>,
{
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object with a `data` array")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<bool, A::Error> {
        let mut found = false;
        while let Some(key) = map.next_key::<String>()? {
            if key == "data" && !found {
                map.next_value_seed(ItemsSeed(&mut *self.0))?;
                found = true;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}

struct ItemsSeed<'s, 'a, F>(&'s mut ReadState<'a, F>);

impl<'de, F> DeserializeSeed<'de> for ItemsSeed<'_, '_, F>
where
    F: FnMut(DatasetItem, usize, f64) -> ControlFlow<()>,
{
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for ItemsSeed<'_, '_, F>
where
    F: FnMut(DatasetItem, usize, f64) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of dataset items")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let state = self.0;
        while let Some(value) = seq.next_element::<serde_json::Value>()? {
            if !value.is_object() {
                state.summary.skipped += 1;
                continue;
            }
            let item: DatasetItem = serde_json::from_value(value).map_err(|e| {
                de::Error::custom(format!("条目 {} 格式错误: {e}", state.summary.items))
            })?;

            let index = state.summary.items;
            state.summary.items += 1;
            let percent = state.progress.percent();
            if (state.callback)(item, index, percent).is_break() {
                state.summary.stopped_early = true;
                return Err(de::Error::custom(STOP_SENTINEL));
            }
        }
        Ok(())
    }
}

/// 同步读取数据集，对每个对象条目调用 `callback(item, index, percent_read)`
///
/// 回调返回 `ControlFlow::Break` 时停止读取并正常返回
pub fn read_dataset<F>(path: &Path, mut callback: F) -> PipelineResult<ReadSummary>
where
    F: FnMut(DatasetItem, usize, f64) -> ControlFlow<()>,
{
    let file = File::open(path)?;
    let total_bytes = file.metadata()?.len();
    let bytes_read = Arc::new(AtomicU64::new(0));

    let counting = CountingReader {
        inner: file,
        bytes_read: bytes_read.clone(),
    };
    let reader = BufReader::new(NonFiniteFilter::new(BufReader::new(counting)));
    let mut deserializer = serde_json::Deserializer::from_reader(reader);

    let mut state = ReadState {
        callback: &mut callback,
        progress: Progress {
            bytes_read,
            total_bytes,
        },
        summary: ReadSummary::default(),
    };

    let result = RootSeed(&mut state).deserialize(&mut deserializer);
    if state.summary.stopped_early {
        debug!("读取在第 {} 条后提前终止", state.summary.items);
        return Ok(state.summary);
    }

    let found = result.map_err(|e| {
        PipelineError::ResultData(format!("解析 {} 失败: {e}", path.display()))
    })?;
    deserializer
        .end()
        .map_err(|e| PipelineError::ResultData(format!("{} 末尾存在多余内容: {e}", path.display())))?;

    if !found {
        return Err(PipelineError::ResultData(format!(
            "{} 缺少 data 数组",
            path.display()
        )));
    }

    if state.summary.skipped > 0 {
        warn!(
            "{} 中跳过了 {} 个非对象元素",
            path.display(),
            state.summary.skipped
        );
    }
    Ok(state.summary)
}

/// 流式读取中的一条记录
#[derive(Debug, Clone)]
pub struct StreamedItem {
    pub item: DatasetItem,
    pub index: usize,
    pub percent_read: f64,
}

/// 在阻塞线程中解析、通过有界通道交付条目的异步读取器
pub struct DatasetStream {
    receiver: mpsc::Receiver<StreamedItem>,
    handle: JoinHandle<PipelineResult<ReadSummary>>,
}

impl DatasetStream {
    pub fn open(path: PathBuf, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || {
            read_dataset(&path, |item, index, percent_read| {
                match sender.blocking_send(StreamedItem {
                    item,
                    index,
                    percent_read,
                }) {
                    Ok(()) => ControlFlow::Continue(()),
                    // 消费端已放弃
                    Err(_) => ControlFlow::Break(()),
                }
            })
        });

        Self { receiver, handle }
    }

    pub async fn next(&mut self) -> Option<StreamedItem> {
        self.receiver.recv().await
    }

    /// 等待解析线程结束并返回统计；解析错误在此返回
    pub async fn finish(self) -> PipelineResult<ReadSummary> {
        drop(self.receiver);
        self.handle
            .await
            .map_err(|e| PipelineError::Internal(format!("数据集读取任务异常退出: {e}")))?
    }
}
