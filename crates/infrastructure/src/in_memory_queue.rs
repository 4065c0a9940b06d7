use analysis_core::{PipelineError, PipelineResult};
use analysis_domain::{QueuedUnit, TaskQueue};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

/// 队列中的一条消息
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub handle: String,
    pub unit: QueuedUnit,
}

/// 进程内任务队列
///
/// 基于 Tokio 无界通道，单进程部署下在提交方与工作池之间传递工作单元。
/// 消息不落盘，进程重启后由启动恢复处理遗留单元。
#[derive(Debug, Clone)]
pub struct InMemoryTaskQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<QueuedTask>>>>,
    size: Arc<AtomicUsize>,
}

/// 队列消费端，只能被取出一次
pub struct TaskReceiver {
    receiver: mpsc::UnboundedReceiver<QueuedTask>,
    size: Arc<AtomicUsize>,
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<QueuedTask> {
        let task = self.receiver.recv().await?;
        self.size.fetch_sub(1, Ordering::SeqCst);
        debug!("Dequeued task {} ({})", task.handle, task.unit.kind);
        Some(task)
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        info!("Creating in-memory task queue");
        Self {
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            size: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 取出消费端，第二次调用返回 None
    pub async fn take_receiver(&self) -> Option<TaskReceiver> {
        self.receiver.lock().await.take().map(|receiver| TaskReceiver {
            receiver,
            size: self.size.clone(),
        })
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, unit: QueuedUnit) -> PipelineResult<String> {
        let handle = Uuid::new_v4().to_string();
        let task = QueuedTask {
            handle: handle.clone(),
            unit,
        };

        self.size.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.sender.send(task) {
            self.size.fetch_sub(1, Ordering::SeqCst);
            error!("Failed to enqueue task {}: {}", handle, e);
            return Err(PipelineError::Internal(format!(
                "任务队列已关闭，无法入队: {handle}"
            )));
        }

        metrics::counter!("task_queue_enqueued_total").increment(1);
        debug!("Enqueued task {}", handle);
        Ok(handle)
    }

    async fn pending(&self) -> PipelineResult<usize> {
        Ok(self.size.load(Ordering::SeqCst))
    }
}
