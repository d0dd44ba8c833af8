//! # 路由门面
//!
//! 对外暴露的唯一入口：热路径上的渠道与 Key 选择、结果上报，以及渠道与 Key 的管理操作。
//!
//! 管理操作在渠道的变更锁内执行“重新加载-修改-复检-落库-刷新缓存-发布事件”。
//! 热路径只读缓存快照，轮询游标在每渠道的游标锁内推进，写回交给持久化队列。

use crate::ability::AbilityIndex;
use crate::config::AppConfig;
use crate::error::{KeyRingError, RelayError, Result};
use crate::failure::{self, Recheck};
use crate::key_ring::{KeyHealthReport, KeyRing, KeySelection, KeyStats, health_score};
use crate::logging::{LogComponent, LogStage};
use crate::notify::{NotificationHub, NotificationStreams};
use crate::persist::{PersistQueue, PersistTask};
use crate::selector::{
    AffinityStore, ChannelCache, ChannelSelector, RoutingRegistry, SelectRequest,
    build_affinity_store,
};
use crate::store::ChannelStore;
use crate::{ldebug, lerror, linfo, lwarn};
use chrono::{DateTime, Utc};
use entity::channels;
use entity::multi_key::{BatchImportMode, KeyMetadata, KeySelectionMode};
use entity::sea_orm_active_enums::ChannelStatus;
use rand::Rng;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 调用方上报的一次上游调用结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure {
        message: String,
        status_code: Option<u16>,
        model: String,
        /// 由调用方的错误分类器决定是否需要禁用
        should_disable: bool,
    },
}

/// 路由器的构建参数
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub memory_cache_enabled: bool,
    pub persist_queue_capacity: usize,
    pub notification_queue_capacity: usize,
}

impl From<&AppConfig> for RouterOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            memory_cache_enabled: config.routing.memory_cache_enabled,
            persist_queue_capacity: config.persistence.queue_capacity,
            notification_queue_capacity: config.notification.queue_capacity,
        }
    }
}

#[derive(Clone)]
pub struct ChannelRouter {
    store: ChannelStore,
    index: AbilityIndex,
    selector: ChannelSelector,
    cache: Arc<ChannelCache>,
    registry: Arc<RoutingRegistry>,
    persist: PersistQueue,
    hub: NotificationHub,
}

impl ChannelRouter {
    /// 组装路由器并启动持久化队列；返回的事件流交给通知分发器
    pub fn new(
        db: Arc<DatabaseConnection>,
        affinity: Arc<dyn AffinityStore>,
        options: RouterOptions,
    ) -> (Self, NotificationStreams) {
        let store = ChannelStore::new(Arc::clone(&db));
        let index = AbilityIndex::new(db);
        let cache = Arc::new(ChannelCache::new(store.clone(), options.memory_cache_enabled));
        let selector = ChannelSelector::new(index.clone(), Arc::clone(&cache), affinity);
        let registry = Arc::new(RoutingRegistry::new());
        let persist = PersistQueue::start(
            store.clone(),
            Arc::clone(&registry),
            options.persist_queue_capacity,
        );
        let (hub, streams) = NotificationHub::new(options.notification_queue_capacity);

        (
            Self {
                store,
                index,
                selector,
                cache,
                registry,
                persist,
                hub,
            },
            streams,
        )
    }

    /// 按应用配置组装，亲和存储按缓存配置选择
    pub async fn from_config(
        config: &AppConfig,
        db: Arc<DatabaseConnection>,
    ) -> Result<(Self, NotificationStreams)> {
        let affinity = build_affinity_store(&config.cache, &config.routing).await?;
        Ok(Self::new(db, affinity, RouterOptions::from(config)))
    }

    #[must_use]
    pub const fn store(&self) -> &ChannelStore {
        &self.store
    }

    #[must_use]
    pub const fn index(&self) -> &AbilityIndex {
        &self.index
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ChannelCache> {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RoutingRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn notifications(&self) -> &NotificationHub {
        &self.hub
    }

    // ---------------------------------------------------------------------
    // 热路径
    // ---------------------------------------------------------------------

    pub async fn select_channel(&self, request: SelectRequest<'_>) -> Result<channels::Model> {
        self.selector.select_channel(request).await
    }

    pub async fn bind_affinity(&self, keys: &[String], channel_id: i32) -> Result<()> {
        self.selector.bind_affinity(keys, channel_id).await
    }

    /// 从渠道中选出一个 Key
    ///
    /// 无排除列表时在渠道游标锁内完成“读游标-扫描-推进”；带排除列表的重试路径不加锁，
    /// 从渠道已持久化的游标开始扫描。
    pub async fn select_key(
        &self,
        channel: &channels::Model,
        exclude: &[usize],
    ) -> Result<KeySelection> {
        let polling = channel.is_multi_key()
            && channel.multi_key_info.key_selection_mode == KeySelectionMode::Polling;
        if !polling {
            let pick = channel.pick_key(0, exclude, &mut rand::thread_rng());
            return Ok(pick.map_err(|e| key_exhausted(channel, e))?.selection);
        }

        let epoch = self.registry.cursor_epoch(channel.id);
        let (pick, next_cursor) = if exclude.is_empty() {
            let slot = self.registry.cursor(channel.id);
            let mut cursor = slot.lock().await;
            let start = cursor.unwrap_or(channel.multi_key_info.polling_index);
            let pick = channel
                .pick_key(start, exclude, &mut rand::thread_rng())
                .map_err(|e| key_exhausted(channel, e))?;
            if let Some(next) = pick.next_cursor {
                *cursor = Some(next);
            }
            let next = pick.next_cursor;
            (pick.selection, next)
        } else {
            let pick = channel
                .pick_key(
                    channel.multi_key_info.polling_index,
                    exclude,
                    &mut rand::thread_rng(),
                )
                .map_err(|e| key_exhausted(channel, e))?;
            let next = pick.next_cursor;
            (pick.selection, next)
        };

        if let Some(polling_index) = next_cursor {
            self.persist
                .enqueue(PersistTask::Cursor {
                    channel_id: channel.id,
                    polling_index,
                    epoch,
                })
                .await;
        }

        ldebug!(
            "system",
            LogStage::Scheduling,
            LogComponent::KeyRing,
            "key_selected",
            "已选择 Key",
            channel_id = channel.id,
            key_index = pick.index,
            excluded = exclude.len()
        );
        Ok(pick)
    }

    /// 上报一次调用结果
    ///
    /// 每次调用都计入 Key 使用次数；失败且需要禁用时执行 Key 级或渠道级自动禁用。
    pub async fn report_outcome(&self, channel_id: i32, key_index: usize, outcome: Outcome) -> Result<()> {
        let Some(channel) = self.cache.get(channel_id).await? else {
            return Err(RelayError::not_found("channel", channel_id));
        };
        channel.check_index(key_index)?;

        if channel.is_multi_key() {
            self.persist
                .enqueue(PersistTask::KeyUsage {
                    channel_id,
                    key_index,
                    used_at: Utc::now().timestamp(),
                    epoch: self.registry.cursor_epoch(channel_id),
                })
                .await;
        }

        match outcome {
            Outcome::Success
            | Outcome::Failure {
                should_disable: false,
                ..
            } => Ok(()),
            Outcome::Failure {
                message,
                status_code,
                model,
                should_disable: true,
            } => {
                self.handle_failure(channel_id, key_index, &message, status_code, &model)
                    .await
            }
        }
    }

    async fn handle_failure(
        &self,
        channel_id: i32,
        key_index: usize,
        message: &str,
        status_code: Option<u16>,
        model: &str,
    ) -> Result<()> {
        let lock = self.registry.mutation_lock(channel_id);
        let _guard = lock.lock().await;

        let mut channel = self.store.get(channel_id).await?;
        let now = Utc::now();

        let multi_key = if channel.is_multi_key() {
            true
        } else if channel.multi_key_info.key_count > 1 {
            lwarn!(
                "system",
                LogStage::Failover,
                LogComponent::Router,
                "multi_key_flag_mismatch",
                "渠道记录了多个 Key 但未开启多Key模式，按多Key渠道处理",
                channel_id = channel_id,
                key_count = channel.multi_key_info.key_count
            );
            channel.multi_key_info.is_multi_key = true;
            true
        } else {
            false
        };

        if multi_key {
            channel.check_index(key_index)?;
            let Some(failure) =
                failure::apply_key_failure(&mut channel, key_index, message, status_code, model, now)
            else {
                linfo!(
                    "system",
                    LogStage::Failover,
                    LogComponent::Router,
                    "auto_disable_off",
                    "渠道关闭了自动禁用，Key 保持启用",
                    channel_id = channel_id,
                    key_index = key_index
                );
                return Ok(());
            };

            self.save(&channel, "key_failure").await?;
            self.hub.publish_key_disabled(failure.key_disabled);
            self.publish(failure.recheck);
        } else {
            let recheck = failure::disable_single_key_channel(&mut channel, message, model, now);
            if channel.status == ChannelStatus::AutoDisabled {
                self.save(&channel, "channel_failure").await?;
            }
            self.publish(recheck);
        }
        Ok(())
    }

    async fn save(&self, channel: &channels::Model, operation: &'static str) -> Result<()> {
        if let Err(e) = self.store.save_ring_state(channel).await {
            lerror!(
                "system",
                LogStage::Db,
                LogComponent::Router,
                "save_failed",
                "保存渠道状态失败",
                channel_id = channel.id,
                operation = operation,
                error = %e
            );
            return Err(RelayError::persistence_with_source(
                format!("保存渠道 #{} 状态失败", channel.id),
                e,
            ));
        }
        self.cache.apply_update(channel).await;
        Ok(())
    }

    fn publish(&self, recheck: Recheck) {
        if let Some(event) = recheck.into_event() {
            self.hub.publish_channel_disabled(event);
        }
    }

    // ---------------------------------------------------------------------
    // 查询
    // ---------------------------------------------------------------------

    pub async fn stats(&self, channel_id: i32) -> Result<KeyStats> {
        Ok(self.store.get(channel_id).await?.key_stats())
    }

    /// 单个 Key 的健康分
    #[must_use]
    pub fn health_score(metadata: &KeyMetadata, status: ChannelStatus) -> u8 {
        health_score(metadata, status, Utc::now().timestamp())
    }

    pub async fn key_health_report(&self, channel_id: i32) -> Result<KeyHealthReport> {
        let channel = self.store.get(channel_id).await?;
        Ok(channel.health_report(Utc::now().timestamp()))
    }

    /// 分组下可用的模型
    pub async fn enabled_models(&self, group: &str) -> Result<Vec<String>> {
        self.index.enabled_models_for_group(group).await
    }

    /// 基于缓存的分层加权选择，供非热路径调用方使用
    pub async fn random_satisfied<R: Rng + ?Sized>(
        &self,
        group: &str,
        model: &str,
        ignore_first_priority: bool,
        rng: &mut R,
    ) -> Result<channels::Model> {
        self.cache
            .random_satisfied(group, model, ignore_first_priority, rng)
            .await
    }

    /// 不走缓存的最高优先级选择
    pub async fn random_max_priority_channel(&self, group: &str, model: &str) -> Result<channels::Model> {
        self.index.random_max_priority_channel(group, model).await
    }

    // ---------------------------------------------------------------------
    // 渠道管理
    // ---------------------------------------------------------------------

    /// 新建渠道；Key 文本解析出多个 Key 时初始化为多Key渠道
    pub async fn insert_channel(&self, mut channel: channels::Model) -> Result<channels::Model> {
        let now = Utc::now();
        channel.created_time = now.timestamp();
        channel.init_multi_key(now.timestamp());

        let saved = self.store.insert(channel).await?;
        self.cache.apply_update(&saved).await;
        linfo!(
            "system",
            LogStage::Admin,
            LogComponent::Router,
            "insert_channel",
            "渠道已创建",
            channel_id = saved.id,
            multi_key = saved.is_multi_key()
        );
        Ok(saved)
    }

    /// 更新渠道的路由字段并重建能力索引
    ///
    /// 在变更锁内重新加载渠道，只覆盖名称、类型、Key 文本、权重、优先级、分组、模型和自动禁用开关；
    /// 渠道状态、自动禁用记录与多Key信息沿用库中的值。Key 文本变化时裁剪越界的 Key 状态并复检。
    pub async fn update_channel(&self, edit: channels::Model) -> Result<channels::Model> {
        let channel_id = edit.id;
        let lock = self.registry.mutation_lock(channel_id);
        let _guard = lock.lock().await;

        let mut channel = self.store.get(channel_id).await?;
        let key_changed = channel.key != edit.key;
        channel.merge_routing_fields(edit);

        let recheck = if key_changed && channel.is_multi_key() {
            channel.fit_to_keys();
            failure::recheck(&mut channel, Utc::now())
        } else {
            Recheck::Unchanged
        };

        let saved = self.store.update(channel).await?;
        self.cache.apply_update(&saved).await;
        if key_changed {
            self.registry.reset_cursor(channel_id).await;
        }
        self.publish(recheck);

        linfo!(
            "system",
            LogStage::Admin,
            LogComponent::Router,
            "update_channel",
            "渠道已更新",
            channel_id = channel_id,
            key_changed = key_changed,
            status = %saved.status
        );
        Ok(saved)
    }

    pub async fn delete_channel(&self, channel_id: i32) -> Result<()> {
        let lock = self.registry.mutation_lock(channel_id);
        let _guard = lock.lock().await;

        self.store.delete(channel_id).await?;
        self.cache.remove(&[channel_id]).await;
        self.registry.reset_cursor(channel_id).await;
        Ok(())
    }

    /// 批量删除渠道，返回删除的数量
    pub async fn delete_channels(&self, channel_ids: &[i32]) -> Result<u64> {
        let deleted = self.store.delete_many(channel_ids).await?;
        self.cache.remove(channel_ids).await;
        for &id in channel_ids {
            self.registry.reset_cursor(id).await;
        }
        Ok(deleted)
    }

    pub async fn enable_channel(&self, channel_id: i32) -> Result<()> {
        self.set_channel_status(channel_id, ChannelStatus::Enabled).await
    }

    pub async fn disable_channel(&self, channel_id: i32) -> Result<()> {
        self.set_channel_status(channel_id, ChannelStatus::ManuallyDisabled)
            .await
    }

    async fn set_channel_status(&self, channel_id: i32, status: ChannelStatus) -> Result<()> {
        let lock = self.registry.mutation_lock(channel_id);
        let _guard = lock.lock().await;

        self.index.set_channel_status(channel_id, status).await?;
        let channel = self.store.get(channel_id).await?;
        self.cache.apply_update(&channel).await;
        linfo!(
            "system",
            LogStage::Admin,
            LogComponent::Router,
            "set_channel_status",
            "渠道状态已由管理员修改",
            channel_id = channel_id,
            status = %status
        );
        Ok(())
    }

    /// 修复能力索引与渠道状态的不一致，并刷新缓存
    pub async fn check_consistency(&self) -> Result<u64> {
        let fixed = self.index.check_consistency().await?;
        self.cache.refresh().await?;
        Ok(fixed)
    }

    // ---------------------------------------------------------------------
    // Key 管理
    // ---------------------------------------------------------------------

    /// 在变更锁内重新加载渠道、执行修改并复检，然后落库、刷新缓存并发布事件
    async fn mutate<T, F>(
        &self,
        channel_id: i32,
        operation: &'static str,
        reset_cursor: bool,
        apply: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut channels::Model, DateTime<Utc>) -> std::result::Result<T, KeyRingError>,
    {
        let lock = self.registry.mutation_lock(channel_id);
        let _guard = lock.lock().await;

        let mut channel = self.store.get(channel_id).await?;
        let now = Utc::now();
        let value = apply(&mut channel, now)?;
        let recheck = failure::recheck(&mut channel, now);

        self.save(&channel, operation).await?;
        if reset_cursor {
            self.registry.reset_cursor(channel_id).await;
        }
        self.publish(recheck);

        linfo!(
            "system",
            LogStage::Admin,
            LogComponent::Router,
            operation,
            "Key 管理操作已完成",
            channel_id = channel_id,
            status = %channel.status
        );
        Ok(value)
    }

    /// 批量导入 Key，空白项被忽略
    pub async fn import_keys(
        &self,
        channel_id: i32,
        keys: Vec<String>,
        mode: BatchImportMode,
    ) -> Result<()> {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        self.mutate(channel_id, "import_keys", true, |channel, now| {
            channel.import_keys(keys, mode, now.timestamp())
        })
        .await
    }

    pub async fn toggle_key(&self, channel_id: i32, index: usize, enabled: bool) -> Result<()> {
        self.mutate(channel_id, "toggle_key", false, |channel, _| {
            channel.toggle_key(index, enabled)
        })
        .await
    }

    /// 批量切换，越界索引被跳过，返回实际处理的数量
    pub async fn toggle_keys(&self, channel_id: i32, indices: &[usize], enabled: bool) -> Result<usize> {
        self.mutate(channel_id, "toggle_keys", false, |channel, _| {
            Ok(channel.toggle_keys(indices, enabled))
        })
        .await
    }

    pub async fn toggle_keys_by_batch(
        &self,
        channel_id: i32,
        batch_id: &str,
        enabled: bool,
    ) -> Result<usize> {
        self.mutate(channel_id, "toggle_keys_by_batch", false, |channel, _| {
            channel.toggle_keys_by_batch(batch_id, enabled)
        })
        .await
    }

    pub async fn set_selection_mode(&self, channel_id: i32, mode: KeySelectionMode) -> Result<()> {
        self.mutate(channel_id, "set_selection_mode", false, |channel, _| {
            channel.set_selection_mode(mode);
            Ok(())
        })
        .await
    }

    /// 切换多Key模式，关闭时清空 Key 状态、元数据与游标
    pub async fn set_multi_key(&self, channel_id: i32, enabled: bool) -> Result<()> {
        self.mutate(channel_id, "set_multi_key", true, |channel, _| {
            channel.set_multi_key(enabled);
            Ok(())
        })
        .await
    }

    /// 为缺少状态记录的 Key 补齐显式的启用状态
    pub async fn backfill_key_status(&self, channel_id: i32) -> Result<usize> {
        self.mutate(channel_id, "backfill_key_status", false, |channel, _| {
            channel.backfill_key_status()
        })
        .await
    }

    /// 删除所有被禁用的 Key 并压缩索引
    pub async fn delete_disabled_keys(&self, channel_id: i32) -> Result<usize> {
        self.mutate(channel_id, "delete_disabled_keys", true, |channel, _| {
            channel.delete_disabled_keys()
        })
        .await
    }

    /// 手动重新启用一个 Key
    pub async fn retry_key(&self, channel_id: i32, index: usize) -> Result<()> {
        self.mutate(channel_id, "retry_key", false, |channel, _| {
            if !channel.is_multi_key() {
                return Err(KeyRingError::NotMultiKey {
                    channel_id: channel.id,
                });
            }
            channel.toggle_key(index, true)
        })
        .await
    }

    // ---------------------------------------------------------------------
    // 生命周期
    // ---------------------------------------------------------------------

    /// 从存储重建渠道缓存
    pub async fn refresh_cache(&self) -> Result<usize> {
        self.cache.refresh().await
    }

    pub fn spawn_cache_sync(&self, frequency: Duration) -> JoinHandle<()> {
        Arc::clone(&self.cache).spawn_sync_loop(frequency)
    }

    /// 排空持久化队列
    pub async fn shutdown(&self) {
        self.persist.shutdown().await;
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Router,
            "router_shutdown",
            "路由器已停止",
            dropped_notifications = self.hub.dropped(),
            dropped_persist_tasks = self.persist.dropped()
        );
    }
}

fn key_exhausted(channel: &channels::Model, err: KeyRingError) -> RelayError {
    lwarn!(
        "system",
        LogStage::Scheduling,
        LogComponent::KeyRing,
        "key_unavailable",
        "渠道没有可用的 Key",
        channel_id = channel.id,
        reason = %err
    );
    err.into()
}
