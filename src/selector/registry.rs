//! # 路由共享状态
//!
//! 每个渠道一把轮询游标锁和一把变更锁，首次使用时创建，之后不回收。
//! 游标代数在每次重置时递增，重置之前入队的热路径写回任务因代数不符而作废。

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 渠道的内存轮询游标，`None` 表示尚未从持久化状态加载
pub type CursorSlot = Arc<Mutex<Option<usize>>>;

#[derive(Default)]
pub struct RoutingRegistry {
    cursors: DashMap<i32, CursorSlot>,
    mutations: DashMap<i32, Arc<Mutex<()>>>,
    epochs: DashMap<i32, u64>,
}

impl RoutingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 渠道的轮询游标锁
    pub fn cursor(&self, channel_id: i32) -> CursorSlot {
        Arc::clone(self.cursors.entry(channel_id).or_default().value())
    }

    /// 渠道的管理变更锁，串行化同一渠道上的读取-修改-写回
    pub fn mutation_lock(&self, channel_id: i32) -> Arc<Mutex<()>> {
        Arc::clone(self.mutations.entry(channel_id).or_default().value())
    }

    /// 渠道当前的游标代数
    #[must_use]
    pub fn cursor_epoch(&self, channel_id: i32) -> u64 {
        self.epochs.get(&channel_id).map_or(0, |epoch| *epoch.value())
    }

    /// 丢弃内存游标并推进代数，下次选择时重新从持久化状态加载
    pub async fn reset_cursor(&self, channel_id: i32) {
        *self.epochs.entry(channel_id).or_default() += 1;
        if let Some(slot) = self.cursors.get(&channel_id).map(|entry| Arc::clone(entry.value())) {
            *slot.lock().await = None;
        }
    }

    #[must_use]
    pub fn tracked_channels(&self) -> usize {
        self.cursors.len()
    }
}
