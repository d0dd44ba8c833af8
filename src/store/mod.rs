//! # 渠道存储
//!
//! 渠道表的读写入口。凡是会改变能力索引的写操作都与索引重建放在同一个事务里。

use crate::ability::{drop_for_channel, rebuild_for_channel, sync_enabled_flag};
use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};
use entity::multi_key::MultiKeyInfo;
use entity::sea_orm_active_enums::ChannelStatus;
use entity::channels;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, NotSet,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct ChannelStore {
    db: Arc<DatabaseConnection>,
}

impl ChannelStore {
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    pub async fn find(&self, id: i32) -> Result<Option<channels::Model>> {
        Ok(channels::Entity::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// 读取渠道，不存在时返回 `NotFound`
    pub async fn get(&self, id: i32) -> Result<channels::Model> {
        self.find(id)
            .await?
            .ok_or_else(|| RelayError::not_found("channel", id))
    }

    /// 所有启用的渠道，按优先级降序
    pub async fn enabled_channels(&self) -> Result<Vec<channels::Model>> {
        Ok(channels::Entity::find()
            .filter(channels::Column::Status.eq(ChannelStatus::Enabled))
            .order_by_desc(channels::Column::Priority)
            .order_by_asc(channels::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// 插入渠道并建立能力索引；`id` 为 0 时由数据库分配
    pub async fn insert(&self, channel: channels::Model) -> Result<channels::Model> {
        let assign_id = channel.id == 0;
        let mut active = channel.into_active_model().reset_all();
        if assign_id {
            active.id = NotSet;
        }

        let txn = self.db.begin().await?;
        let saved = active.insert(&txn).await?;
        let rows = rebuild_for_channel(&txn, &saved).await?;
        txn.commit().await?;

        linfo!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "insert_channel",
            "渠道已创建",
            channel_id = saved.id,
            abilities = rows
        );
        Ok(saved)
    }

    /// 整行写回渠道并重建能力索引
    ///
    /// 调用方负责在渠道变更锁内基于最新的行构造 `channel`。
    pub async fn update(&self, channel: channels::Model) -> Result<channels::Model> {
        let txn = self.db.begin().await?;
        if channels::Entity::find_by_id(channel.id).one(&txn).await?.is_none() {
            txn.rollback().await?;
            return Err(RelayError::not_found("channel", channel.id));
        }

        let saved = channel.into_active_model().reset_all().update(&txn).await?;
        rebuild_for_channel(&txn, &saved).await?;
        txn.commit().await?;

        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "update_channel",
            "渠道已更新",
            channel_id = saved.id
        );
        Ok(saved)
    }

    /// 删除渠道及其能力行
    pub async fn delete(&self, id: i32) -> Result<()> {
        let txn = self.db.begin().await?;
        drop_for_channel(&txn, id).await?;
        let result = channels::Entity::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(RelayError::not_found("channel", id));
        }
        txn.commit().await?;

        linfo!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "delete_channel",
            "渠道已删除",
            channel_id = id
        );
        Ok(())
    }

    /// 在一个事务内批量删除渠道，返回删除的渠道数
    pub async fn delete_many(&self, ids: &[i32]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin().await?;
        for &id in ids {
            drop_for_channel(&txn, id).await?;
        }
        let result = channels::Entity::delete_many()
            .filter(channels::Column::Id.is_in(ids.iter().copied()))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        linfo!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "delete_channels",
            "批量删除渠道",
            requested = ids.len(),
            deleted = result.rows_affected
        );
        Ok(result.rows_affected)
    }

    /// 只写多Key信息列
    pub async fn save_multi_key_info(&self, id: i32, info: MultiKeyInfo) -> Result<()> {
        let active = channels::ActiveModel {
            multi_key_info: Set(info),
            ..Default::default()
        };
        channels::Entity::update_many()
            .set(active)
            .filter(channels::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// 保存 Key 环变更后的渠道状态：Key 文本、多Key信息、渠道状态与自动禁用字段，
    /// 同时同步能力行的 enabled 标志
    pub async fn save_ring_state(&self, channel: &channels::Model) -> Result<()> {
        let active = channels::ActiveModel {
            key: Set(channel.key.clone()),
            status: Set(channel.status),
            multi_key_info: Set(channel.multi_key_info.clone()),
            auto_disabled_reason: Set(channel.auto_disabled_reason.clone()),
            auto_disabled_time: Set(channel.auto_disabled_time),
            auto_disabled_model: Set(channel.auto_disabled_model.clone()),
            ..Default::default()
        };

        let txn = self.db.begin().await?;
        let result = channels::Entity::update_many()
            .set(active)
            .filter(channels::Column::Id.eq(channel.id))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(RelayError::not_found("channel", channel.id));
        }
        sync_enabled_flag(&txn, channel.id, channel.status.is_enabled()).await?;
        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChannelFixture, create_test_db};
    use entity::abilities;
    use entity::multi_key::KeySelectionMode;
    use pretty_assertions::assert_eq;
    use sea_orm::PaginatorTrait;

    async fn store() -> ChannelStore {
        ChannelStore::new(Arc::new(create_test_db().await.unwrap()))
    }

    async fn ability_count(store: &ChannelStore, channel_id: i32) -> u64 {
        abilities::Entity::find()
            .filter(abilities::Column::ChannelId.eq(channel_id))
            .count(store.db().as_ref())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_builds_abilities() {
        let store = store().await;
        let saved = store
            .insert(ChannelFixture::new(0, "c").group("a,b").models("m1,m2,m3").build())
            .await
            .unwrap();
        assert!(saved.id > 0);
        assert_eq!(ability_count(&store, saved.id).await, 6);
    }

    #[tokio::test]
    async fn test_update_rebuilds_abilities() {
        let store = store().await;
        let mut saved = store
            .insert(ChannelFixture::new(0, "c").group("a,b").build())
            .await
            .unwrap();

        saved.group = "a".to_string();
        saved.models = "m1,m2".to_string();
        saved.priority = 7;
        let updated = store.update(saved).await.unwrap();
        assert_eq!(updated.priority, 7);
        assert_eq!(ability_count(&store, updated.id).await, 2);

        let missing = ChannelFixture::new(999, "ghost").build();
        assert!(matches!(
            store.update(missing).await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_abilities() {
        let store = store().await;
        let saved = store.insert(ChannelFixture::new(0, "c").build()).await.unwrap();
        store.delete(saved.id).await.unwrap();
        assert!(store.find(saved.id).await.unwrap().is_none());
        assert_eq!(ability_count(&store, saved.id).await, 0);

        assert!(matches!(
            store.delete(saved.id).await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_many() {
        let store = store().await;
        let a = store.insert(ChannelFixture::new(0, "a").build()).await.unwrap();
        let b = store.insert(ChannelFixture::new(0, "b").build()).await.unwrap();
        let c = store.insert(ChannelFixture::new(0, "c").build()).await.unwrap();

        assert_eq!(store.delete_many(&[a.id, b.id, 12345]).await.unwrap(), 2);
        let remaining = store.enabled_channels().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, c.id);
        assert_eq!(ability_count(&store, a.id).await, 0);
    }

    #[tokio::test]
    async fn test_save_ring_state_syncs_ability_flags() {
        let store = store().await;
        let mut saved = store
            .insert(
                ChannelFixture::multi_key(0, "pool", &["k0", "k1"], KeySelectionMode::Polling)
                    .build(),
            )
            .await
            .unwrap();

        saved.key = "k1".to_string();
        saved.status = ChannelStatus::AutoDisabled;
        saved.auto_disabled_reason = Some("all keys disabled".to_string());
        saved.multi_key_info.polling_index = 1;
        store.save_ring_state(&saved).await.unwrap();

        let reloaded = store.get(saved.id).await.unwrap();
        assert_eq!(reloaded.key, "k1");
        assert_eq!(reloaded.status, ChannelStatus::AutoDisabled);
        assert_eq!(reloaded.multi_key_info.polling_index, 1);

        let enabled_rows = abilities::Entity::find()
            .filter(abilities::Column::ChannelId.eq(saved.id))
            .filter(abilities::Column::Enabled.eq(true))
            .count(store.db().as_ref())
            .await
            .unwrap();
        assert_eq!(enabled_rows, 0);
    }

    #[tokio::test]
    async fn test_save_multi_key_info_only_touches_info() {
        let store = store().await;
        let saved = store
            .insert(
                ChannelFixture::multi_key(0, "pool", &["k0", "k1"], KeySelectionMode::Polling)
                    .build(),
            )
            .await
            .unwrap();

        let mut info = saved.multi_key_info.clone();
        info.polling_index = 1;
        store.save_multi_key_info(saved.id, info).await.unwrap();

        let reloaded = store.get(saved.id).await.unwrap();
        assert_eq!(reloaded.multi_key_info.polling_index, 1);
        assert_eq!(reloaded.key, saved.key);
        assert_eq!(reloaded.status, saved.status);
    }
}
