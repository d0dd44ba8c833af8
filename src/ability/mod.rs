//! # 能力索引
//!
//! 维护 (group, model, channel_id) 反范式索引。渠道每次变更都整体删除重建，
//! 调度查询只读这张表和渠道表。

use crate::error::{RelayError, Result};
use crate::selector::weighted_pick;
use crate::{ldebug, linfo, logging::{LogComponent, LogStage}, lwarn};
use entity::sea_orm_active_enums::ChannelStatus;
use entity::{abilities, channels};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::collections::HashSet;
use std::sync::Arc;

/// 每批插入的行数：每行 5 个绑定参数，SQLite 单条语句上限 999 个参数
pub const ABILITY_BATCH_SIZE: usize = 150;

/// 展开渠道的 Models × Groups 笛卡尔积，空白项跳过、重复项去重
pub fn expand_abilities(channel: &channels::Model) -> Vec<abilities::ActiveModel> {
    let enabled = channel.status.is_enabled();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut rows = Vec::new();
    for model in channel.model_names() {
        for group in channel.groups() {
            if !seen.insert((group, model)) {
                continue;
            }
            rows.push(abilities::ActiveModel {
                group: Set(group.to_string()),
                model: Set(model.to_string()),
                channel_id: Set(channel.id),
                enabled: Set(enabled),
                priority: Set(channel.priority),
            });
        }
    }
    rows
}

/// 删除渠道全部能力行后按批重新插入，返回插入行数
pub async fn rebuild_for_channel<C: ConnectionTrait>(
    conn: &C,
    channel: &channels::Model,
) -> Result<usize> {
    drop_for_channel(conn, channel.id).await?;

    let rows = expand_abilities(channel);
    let total = rows.len();
    for chunk in rows.chunks(ABILITY_BATCH_SIZE) {
        abilities::Entity::insert_many(chunk.to_vec())
            .exec_without_returning(conn)
            .await?;
    }

    ldebug!(
        "system",
        LogStage::Db,
        LogComponent::AbilityIndex,
        "rebuild",
        "渠道能力索引已重建",
        channel_id = channel.id,
        rows = total
    );
    Ok(total)
}

/// 删除渠道全部能力行
pub async fn drop_for_channel<C: ConnectionTrait>(conn: &C, channel_id: i32) -> Result<u64> {
    let result = abilities::Entity::delete_many()
        .filter(abilities::Column::ChannelId.eq(channel_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// 同步渠道能力行的 enabled 标志
pub async fn sync_enabled_flag<C: ConnectionTrait>(
    conn: &C,
    channel_id: i32,
    enabled: bool,
) -> Result<u64> {
    let result = abilities::Entity::update_many()
        .col_expr(abilities::Column::Enabled, Expr::value(enabled))
        .filter(abilities::Column::ChannelId.eq(channel_id))
        .filter(abilities::Column::Enabled.ne(enabled))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// 能力索引查询入口
#[derive(Clone)]
pub struct AbilityIndex {
    db: Arc<DatabaseConnection>,
}

impl AbilityIndex {
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 可用的不同优先级，降序
    pub async fn distinct_priorities(
        &self,
        group: &str,
        model: &str,
        exclude_ids: &[i32],
    ) -> Result<Vec<i64>> {
        let mut query = abilities::Entity::find()
            .select_only()
            .column(abilities::Column::Priority)
            .distinct()
            .inner_join(channels::Entity)
            .filter(abilities::Column::Group.eq(group))
            .filter(abilities::Column::Model.eq(model))
            .filter(abilities::Column::Enabled.eq(true))
            .filter(channels::Column::Status.eq(ChannelStatus::Enabled));
        if !exclude_ids.is_empty() {
            query = query.filter(abilities::Column::ChannelId.is_not_in(exclude_ids.iter().copied()));
        }

        let mut priorities = query.into_tuple::<i64>().all(self.db.as_ref()).await?;
        priorities.sort_unstable_by(|a, b| b.cmp(a));
        Ok(priorities)
    }

    /// 指定优先级层内的候选渠道
    pub async fn channels_in_tier(
        &self,
        group: &str,
        model: &str,
        priority: i64,
        exclude_ids: &[i32],
    ) -> Result<Vec<channels::Model>> {
        let mut query = channels::Entity::find()
            .inner_join(abilities::Entity)
            .filter(abilities::Column::Group.eq(group))
            .filter(abilities::Column::Model.eq(model))
            .filter(abilities::Column::Enabled.eq(true))
            .filter(abilities::Column::Priority.eq(priority))
            .filter(channels::Column::Status.eq(ChannelStatus::Enabled));
        if !exclude_ids.is_empty() {
            query = query.filter(channels::Column::Id.is_not_in(exclude_ids.iter().copied()));
        }

        Ok(query
            .order_by_asc(channels::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// 分组下可用的模型，按优先级降序去重
    pub async fn enabled_models_for_group(&self, group: &str) -> Result<Vec<String>> {
        let rows: Vec<(String, i64)> = abilities::Entity::find()
            .select_only()
            .column(abilities::Column::Model)
            .column(abilities::Column::Priority)
            .filter(abilities::Column::Group.eq(group))
            .filter(abilities::Column::Enabled.eq(true))
            .order_by_desc(abilities::Column::Priority)
            .order_by_asc(abilities::Column::Model)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter_map(|(model, _)| seen.insert(model.clone()).then_some(model))
            .collect())
    }

    /// 不走缓存：在最高优先级层内按权重随机选一个渠道
    pub async fn random_max_priority_channel(
        &self,
        group: &str,
        model: &str,
    ) -> Result<channels::Model> {
        let priorities = self.distinct_priorities(group, model, &[]).await?;
        let Some(top) = priorities.first().copied() else {
            return Err(RelayError::exhausted(format!(
                "no available channels for group '{group}' and model '{model}'"
            )));
        };

        let candidates = self.channels_in_tier(group, model, top, &[]).await?;
        let picked = weighted_pick(&candidates, channels::Model::effective_weight, &mut rand::thread_rng())?;
        Ok(picked.clone())
    }

    /// 列出渠道的全部能力行
    pub async fn list_for_channel(&self, channel_id: i32) -> Result<Vec<abilities::Model>> {
        Ok(abilities::Entity::find()
            .filter(abilities::Column::ChannelId.eq(channel_id))
            .order_by_asc(abilities::Column::Group)
            .order_by_asc(abilities::Column::Model)
            .all(self.db.as_ref())
            .await?)
    }

    /// 在一个事务内同时更新渠道状态与其能力行的 enabled 标志
    ///
    /// 启用时一并清除上一次的自动禁用记录。
    pub async fn set_channel_status(&self, channel_id: i32, status: ChannelStatus) -> Result<()> {
        let txn = self.db.begin().await?;

        let mut update = channels::Entity::update_many()
            .col_expr(channels::Column::Status, Expr::value(status))
            .filter(channels::Column::Id.eq(channel_id));
        if status.is_enabled() {
            update = update
                .col_expr(channels::Column::AutoDisabledReason, Expr::value(Option::<String>::None))
                .col_expr(channels::Column::AutoDisabledTime, Expr::value(Option::<i64>::None))
                .col_expr(channels::Column::AutoDisabledModel, Expr::value(Option::<String>::None));
        }
        let updated = update.exec(&txn).await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Err(RelayError::not_found("channel", channel_id));
        }

        sync_enabled_flag(&txn, channel_id, status.is_enabled()).await?;
        txn.commit().await?;

        linfo!(
            "system",
            LogStage::Db,
            LogComponent::AbilityIndex,
            "set_channel_status",
            "渠道状态已更新",
            channel_id = channel_id,
            status = %status
        );
        Ok(())
    }

    /// 修复 enabled 标志与渠道状态不一致的能力行，返回修复行数
    pub async fn check_consistency(&self) -> Result<u64> {
        let states: Vec<(i32, ChannelStatus)> = channels::Entity::find()
            .select_only()
            .column(channels::Column::Id)
            .column(channels::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let txn = self.db.begin().await?;
        let mut fixed = 0;
        for (channel_id, status) in states {
            fixed += sync_enabled_flag(&txn, channel_id, status.is_enabled()).await?;
        }
        txn.commit().await?;

        if fixed > 0 {
            lwarn!(
                "system",
                LogStage::Db,
                LogComponent::AbilityIndex,
                "consistency_fixed",
                "能力索引与渠道状态不一致，已修复",
                fixed_rows = fixed
            );
        }
        Ok(fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChannelFixture, create_test_db};
    use pretty_assertions::assert_eq;
    use sea_orm::{ActiveModelTrait, IntoActiveModel, PaginatorTrait};

    async fn insert(db: &DatabaseConnection, channel: channels::Model) -> channels::Model {
        let mut active = channel.into_active_model().reset_all();
        active.id = sea_orm::NotSet;
        let saved = active.insert(db).await.unwrap();
        rebuild_for_channel(db, &saved).await.unwrap();
        saved
    }

    #[test]
    fn test_expand_is_cross_product_without_blanks() {
        let channel = ChannelFixture::new(1, "c")
            .group("default, vip,")
            .models("a,b,,a")
            .build();
        let rows = expand_abilities(&channel);
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_rows() {
        let db = create_test_db().await.unwrap();
        let mut channel = insert(
            &db,
            ChannelFixture::new(0, "c").group("default,vip").models("m1,m2,m3").build(),
        )
        .await;

        let index = AbilityIndex::new(Arc::new(db.clone()));
        assert_eq!(index.list_for_channel(channel.id).await.unwrap().len(), 6);

        channel.models = "m1".to_string();
        rebuild_for_channel(&db, &channel).await.unwrap();
        let rows = index.list_for_channel(channel.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.model == "m1"));

        drop_for_channel(&db, channel.id).await.unwrap();
        assert_eq!(abilities::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_larger_than_one_batch() {
        let db = create_test_db().await.unwrap();
        let models: Vec<String> = (0..200).map(|i| format!("model-{i}")).collect();
        let channel = insert(
            &db,
            ChannelFixture::new(0, "wide").models(&models.join(",")).build(),
        )
        .await;

        let count = abilities::Entity::find()
            .filter(abilities::Column::ChannelId.eq(channel.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(count, 200);
    }

    #[tokio::test]
    async fn test_priorities_descending_and_exclusion() {
        let db = create_test_db().await.unwrap();
        let a = insert(&db, ChannelFixture::new(0, "a").priority(10).build()).await;
        let _b = insert(&db, ChannelFixture::new(0, "b").priority(10).build()).await;
        let c = insert(&db, ChannelFixture::new(0, "c").priority(5).build()).await;
        let _off = insert(
            &db,
            ChannelFixture::new(0, "off")
                .priority(99)
                .status(ChannelStatus::ManuallyDisabled)
                .build(),
        )
        .await;

        let index = AbilityIndex::new(Arc::new(db));
        assert_eq!(
            index.distinct_priorities("default", "gpt-4o", &[]).await.unwrap(),
            vec![10, 5]
        );
        assert_eq!(
            index.distinct_priorities("default", "gpt-4o", &[c.id]).await.unwrap(),
            vec![10]
        );

        let tier = index.channels_in_tier("default", "gpt-4o", 10, &[a.id]).await.unwrap();
        assert_eq!(tier.len(), 1);
        assert_eq!(tier[0].name, "b");
    }

    #[tokio::test]
    async fn test_enabled_models_ordered_by_priority() {
        let db = create_test_db().await.unwrap();
        insert(&db, ChannelFixture::new(0, "low").models("x,y").priority(1).build()).await;
        insert(&db, ChannelFixture::new(0, "high").models("y,z").priority(9).build()).await;

        let index = AbilityIndex::new(Arc::new(db));
        let models = index.enabled_models_for_group("default").await.unwrap();
        assert_eq!(models, vec!["y", "z", "x"]);
    }

    #[tokio::test]
    async fn test_random_max_priority_channel() {
        let db = create_test_db().await.unwrap();
        insert(&db, ChannelFixture::new(0, "top").priority(3).build()).await;
        insert(&db, ChannelFixture::new(0, "bottom").priority(1).build()).await;

        let index = AbilityIndex::new(Arc::new(db));
        for _ in 0..20 {
            let picked = index.random_max_priority_channel("default", "gpt-4o").await.unwrap();
            assert_eq!(picked.name, "top");
        }
        let err = index.random_max_priority_channel("default", "unknown").await.unwrap_err();
        assert!(err.is_exhausted());
    }

    #[tokio::test]
    async fn test_set_status_and_consistency_repair() {
        let db = create_test_db().await.unwrap();
        let channel = insert(&db, ChannelFixture::new(0, "c").group("a,b").build()).await;
        let index = AbilityIndex::new(Arc::new(db.clone()));

        index
            .set_channel_status(channel.id, ChannelStatus::AutoDisabled)
            .await
            .unwrap();
        let rows = index.list_for_channel(channel.id).await.unwrap();
        assert!(rows.iter().all(|row| !row.enabled));

        // 绕过索引直接改渠道状态，制造不一致
        channels::Entity::update_many()
            .col_expr(channels::Column::Status, Expr::value(ChannelStatus::Enabled))
            .filter(channels::Column::Id.eq(channel.id))
            .exec(&db)
            .await
            .unwrap();
        assert_eq!(index.check_consistency().await.unwrap(), 2);
        assert_eq!(index.check_consistency().await.unwrap(), 0);

        let err = index
            .set_channel_status(9999, ChannelStatus::Enabled)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound { .. }));
    }
}
