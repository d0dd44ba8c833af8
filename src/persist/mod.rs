//! # 热路径持久化队列
//!
//! 轮询游标推进和 Key 使用计数不在请求路径上直接写库，而是交给一个有界队列，
//! 由单个后台任务在渠道变更锁内按顺序执行“读取-修改-写回”。入队从不等待，队列满时丢弃并计数。
//! 每个任务带上入队时的游标代数，渠道的 Key 被重排后旧任务直接丢弃。
//! 关闭时先收回发送端，再等待后台任务把队列中剩余的任务写完。

use crate::error::{Context, Result};
use crate::key_ring::KeyRing;
use crate::logging::{LogComponent, LogStage};
use crate::selector::RoutingRegistry;
use crate::store::ChannelStore;
use crate::{ldebug, lerror, linfo, lwarn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

/// 待写回的热路径状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistTask {
    /// 轮询游标
    Cursor {
        channel_id: i32,
        polling_index: usize,
        epoch: u64,
    },
    /// 一次 Key 使用
    KeyUsage {
        channel_id: i32,
        key_index: usize,
        used_at: i64,
        epoch: u64,
    },
}

impl PersistTask {
    #[must_use]
    pub const fn channel_id(&self) -> i32 {
        match self {
            Self::Cursor { channel_id, .. } | Self::KeyUsage { channel_id, .. } => *channel_id,
        }
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        match self {
            Self::Cursor { epoch, .. } | Self::KeyUsage { epoch, .. } => *epoch,
        }
    }
}

#[derive(Clone)]
pub struct PersistQueue {
    sender: Arc<RwLock<Option<mpsc::Sender<PersistTask>>>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
    dropped: Arc<AtomicU64>,
}

impl PersistQueue {
    /// 创建队列并启动后台写回任务
    pub fn start(store: ChannelStore, registry: Arc<RoutingRegistry>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task_handle = tokio::spawn(run(store, registry, receiver));
        Self {
            sender: Arc::new(RwLock::new(Some(sender))),
            task_handle: Arc::new(RwLock::new(Some(task_handle))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 入队，不等待；返回是否入队成功
    pub async fn enqueue(&self, task: PersistTask) -> bool {
        let guard = self.sender.read().await;
        let Some(sender) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(task) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                lwarn!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::Persistence,
                    "persist_task_dropped",
                    "持久化队列已满，任务被丢弃",
                    channel_id = task.channel_id(),
                    error = %e
                );
                false
            }
        }
    }

    /// 累计丢弃的任务数
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 停止接收新任务并等待队列排空
    pub async fn shutdown(&self) {
        self.sender.write().await.take();

        let handle = self.task_handle.write().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                lerror!(
                    "system",
                    LogStage::Shutdown,
                    LogComponent::Persistence,
                    "persist_worker_failed",
                    "持久化任务异常退出",
                    error = %e
                );
            }
        }

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Persistence,
            "persist_queue_drained",
            "持久化队列已排空",
            dropped = self.dropped()
        );
    }
}

async fn run(
    store: ChannelStore,
    registry: Arc<RoutingRegistry>,
    mut receiver: mpsc::Receiver<PersistTask>,
) {
    ldebug!(
        "system",
        LogStage::Startup,
        LogComponent::Persistence,
        "persist_worker_started",
        "持久化任务已启动"
    );

    while let Some(task) = receiver.recv().await {
        let lock = registry.mutation_lock(task.channel_id());
        let result = {
            let _guard = lock.lock().await;
            if registry.cursor_epoch(task.channel_id()) == task.epoch() {
                apply(&store, task).await
            } else {
                ldebug!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::Persistence,
                    "stale_task_skipped",
                    "Key 已被重排，丢弃过期的写回任务",
                    channel_id = task.channel_id()
                );
                Ok(())
            }
        };
        if let Err(e) = result {
            lerror!(
                "system",
                LogStage::BackgroundTask,
                LogComponent::Persistence,
                "persist_failed",
                "写回热路径状态失败",
                channel_id = task.channel_id(),
                error = %e
            );
        }
    }
}

async fn apply(store: &ChannelStore, task: PersistTask) -> Result<()> {
    let Some(channel) = store.find(task.channel_id()).await? else {
        return Ok(());
    };

    let key_count = channel.keys().len();
    let mut info = channel.multi_key_info;
    match task {
        PersistTask::Cursor { polling_index, .. } => {
            info.polling_index = polling_index;
        }
        PersistTask::KeyUsage {
            key_index, used_at, ..
        } => {
            if !info.is_multi_key || key_index >= key_count {
                return Ok(());
            }
            let metadata = info.key_metadata.entry(key_index).or_default();
            metadata.usage += 1;
            metadata.last_used = used_at;
        }
    }

    store
        .save_multi_key_info(channel.id, info)
        .await
        .with_context(|| format!("写回渠道 #{} 的多Key信息", channel.id))
}
