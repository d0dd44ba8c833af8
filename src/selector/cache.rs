//! # 渠道内存缓存
//!
//! 启用渠道的只读镜像。快照在锁外构建，写锁内只做一次引用替换；
//! 单个渠道的变更以写时复制的方式应用到新快照。

use super::weighted::weighted_pick;
use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::store::ChannelStore;
use crate::{ldebug, lerror, linfo};
use entity::channels;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// 缓存快照
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    channels: HashMap<i32, channels::Model>,
    /// group -> model -> 渠道 ID，按优先级降序
    index: HashMap<String, HashMap<String, Vec<i32>>>,
}

impl Snapshot {
    fn build(enabled: Vec<channels::Model>) -> Self {
        let mut snapshot = Self::default();
        for channel in enabled {
            snapshot.channels.insert(channel.id, channel);
        }
        snapshot.reindex();
        snapshot
    }

    fn reindex(&mut self) {
        let mut index: HashMap<String, HashMap<String, Vec<i32>>> = HashMap::new();
        for channel in self.channels.values() {
            for group in channel.groups() {
                let models = index.entry(group.to_string()).or_default();
                for model in channel.model_names() {
                    let ids = models.entry(model.to_string()).or_default();
                    if !ids.contains(&channel.id) {
                        ids.push(channel.id);
                    }
                }
            }
        }

        let channels = &self.channels;
        for ids in index.values_mut().flat_map(HashMap::values_mut) {
            ids.sort_by(|a, b| {
                let pa = channels.get(a).map_or(i64::MIN, |c| c.priority);
                let pb = channels.get(b).map_or(i64::MIN, |c| c.priority);
                pb.cmp(&pa).then(a.cmp(b))
            });
        }
        self.index = index;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

pub struct ChannelCache {
    store: ChannelStore,
    enabled: bool,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ChannelCache {
    /// `enabled` 为 false 时所有读取直接走存储
    pub fn new(store: ChannelStore, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// 从存储重建快照并原子替换
    pub async fn refresh(&self) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }

        let snapshot = Arc::new(Snapshot::build(self.store.enabled_channels().await?));
        let count = snapshot.len();
        *self.snapshot.write().await = snapshot;

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "cache_refreshed",
            "渠道缓存已刷新",
            channels = count
        );
        Ok(count)
    }

    /// 把单个渠道的最新状态写入缓存，未启用的渠道从缓存移除
    pub async fn apply_update(&self, channel: &channels::Model) {
        if !self.enabled {
            return;
        }

        let mut guard = self.snapshot.write().await;
        let mut next = Snapshot::clone(&guard);
        if channel.status.is_enabled() {
            next.channels.insert(channel.id, channel.clone());
        } else {
            next.channels.remove(&channel.id);
        }
        next.reindex();
        *guard = Arc::new(next);
    }

    /// 从缓存移除渠道
    pub async fn remove(&self, channel_ids: &[i32]) {
        if !self.enabled {
            return;
        }

        let mut guard = self.snapshot.write().await;
        let mut next = Snapshot::clone(&guard);
        for id in channel_ids {
            next.channels.remove(id);
        }
        next.reindex();
        *guard = Arc::new(next);
    }

    /// 读取渠道；缓存关闭或未命中时读存储
    pub async fn get(&self, id: i32) -> Result<Option<channels::Model>> {
        if self.enabled {
            if let Some(channel) = self.current().await.channels.get(&id) {
                return Ok(Some(channel.clone()));
            }
        }
        self.store.find(id).await
    }

    pub async fn contains(&self, id: i32) -> bool {
        self.current().await.channels.contains_key(&id)
    }

    /// 服务于 (group, model) 的启用渠道，按优先级降序
    pub async fn channels_for(&self, group: &str, model: &str) -> Vec<channels::Model> {
        let snapshot = self.current().await;
        snapshot
            .index
            .get(group)
            .and_then(|models| models.get(model))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| snapshot.channels.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 基于缓存的分层加权选择
    ///
    /// 存在多个优先级层且 `ignore_first_priority` 为 true 时使用第二层。
    pub async fn random_satisfied<R: Rng + ?Sized>(
        &self,
        group: &str,
        model: &str,
        ignore_first_priority: bool,
        rng: &mut R,
    ) -> Result<channels::Model> {
        let candidates = self.channels_for(group, model).await;
        if candidates.is_empty() {
            return Err(RelayError::exhausted(format!(
                "no cached channels for group '{group}' and model '{model}'"
            )));
        }

        let mut priorities: Vec<i64> = candidates.iter().map(|c| c.priority).collect();
        priorities.dedup();
        let tier = if priorities.len() > 1 && ignore_first_priority {
            priorities[1]
        } else {
            priorities[0]
        };

        let tier_channels: Vec<channels::Model> = candidates
            .into_iter()
            .filter(|c| c.priority == tier)
            .collect();
        Ok(weighted_pick(&tier_channels, channels::Model::effective_weight, rng)?.clone())
    }

    /// 启动周期刷新任务，随进程存活
    pub fn spawn_sync_loop(self: Arc<Self>, frequency: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Cache,
                "cache_sync_started",
                "渠道缓存同步任务已启动",
                frequency_secs = frequency.as_secs()
            );

            let mut ticker = tokio::time::interval(frequency);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    lerror!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::Cache,
                        "cache_sync_failed",
                        "渠道缓存同步失败",
                        error = %e
                    );
                }
            }
        })
    }
}
