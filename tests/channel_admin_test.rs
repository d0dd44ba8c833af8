//! # 渠道管理与调度集成测试

use channel_relay::notify::NotificationStreams;
use channel_relay::selector::MemoryAffinityStore;
use channel_relay::testing::{ChannelFixture, create_test_db};
use channel_relay::key_ring::KeyRing;
use channel_relay::{ChannelRouter, Outcome, RelayError, RouterOptions, SelectRequest};
use entity::abilities;
use entity::multi_key::KeySelectionMode;
use entity::sea_orm_active_enums::ChannelStatus;
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rstest::rstest;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::Duration;

async fn router_with(memory_cache_enabled: bool) -> (ChannelRouter, NotificationStreams) {
    let db = Arc::new(create_test_db().await.unwrap());
    let affinity = Arc::new(MemoryAffinityStore::new(Duration::from_secs(300), 100));
    ChannelRouter::new(
        db,
        affinity,
        RouterOptions {
            memory_cache_enabled,
            persist_queue_capacity: 64,
            notification_queue_capacity: 16,
        },
    )
}

#[tokio::test]
async fn test_abilities_follow_channel_lifecycle() {
    let (router, _streams) = router_with(true).await;
    let channel = router
        .insert_channel(
            ChannelFixture::new(0, "multi")
                .group("default, vip")
                .models("gpt-4o,claude-3,gpt-4o")
                .build(),
        )
        .await
        .unwrap();

    let rows = router.index().list_for_channel(channel.id).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row.enabled));

    let mut updated = channel.clone();
    updated.models = "gemini".to_string();
    updated.priority = 7;
    router.update_channel(updated).await.unwrap();
    let rows = router.index().list_for_channel(channel.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.model == "gemini" && row.priority == 7));
    assert_eq!(router.cache().channels_for("vip", "gemini").await.len(), 1);

    router.delete_channel(channel.id).await.unwrap();
    assert!(router.index().list_for_channel(channel.id).await.unwrap().is_empty());
    assert!(!router.cache().contains(channel.id).await);

    let err = router.delete_channel(channel.id).await.unwrap_err();
    assert!(matches!(err, RelayError::NotFound { .. }));
}

fn invalid_key() -> Outcome {
    Outcome::Failure {
        message: "invalid api key".to_string(),
        status_code: Some(401),
        model: "gpt-4o".to_string(),
        should_disable: true,
    }
}

#[tokio::test]
async fn test_update_from_stale_copy_keeps_key_failures() {
    let (router, _streams) = router_with(true).await;
    let snapshot = router
        .insert_channel(ChannelFixture::multi_key(0, "pool", &["a", "b", "c"], KeySelectionMode::Polling).build())
        .await
        .unwrap();
    router.report_outcome(snapshot.id, 0, invalid_key()).await.unwrap();

    let mut edit = snapshot.clone();
    edit.priority = 7;
    let saved = router.update_channel(edit).await.unwrap();

    assert_eq!(saved.priority, 7);
    assert_eq!(saved.multi_key_info.key_status(0), ChannelStatus::AutoDisabled);
    assert_eq!(saved.multi_key_info.enabled_key_count, 2);
    let stats = router.stats(snapshot.id).await.unwrap();
    assert_eq!((stats.enabled, stats.auto_disabled), (2, 1));
}

#[tokio::test]
async fn test_update_does_not_re_enable_auto_disabled_channel() {
    let (router, _streams) = router_with(true).await;
    let snapshot = router
        .insert_channel(ChannelFixture::multi_key(0, "pool", &["a", "b"], KeySelectionMode::Polling).build())
        .await
        .unwrap();
    router.report_outcome(snapshot.id, 0, invalid_key()).await.unwrap();
    router.report_outcome(snapshot.id, 1, invalid_key()).await.unwrap();

    let mut edit = snapshot.clone();
    edit.weight = 5;
    router.update_channel(edit).await.unwrap();

    let stored = router.store().get(snapshot.id).await.unwrap();
    assert_eq!(stored.weight, 5);
    assert_eq!(stored.status, ChannelStatus::AutoDisabled);
    assert_eq!(stored.auto_disabled_reason.as_deref(), Some("all keys disabled"));
    assert_eq!(router.stats(snapshot.id).await.unwrap().enabled, 0);
    let rows = router.index().list_for_channel(snapshot.id).await.unwrap();
    assert!(rows.iter().all(|row| !row.enabled));
    let err = router
        .select_channel(SelectRequest::new("default", "gpt-4o"))
        .await
        .unwrap_err();
    assert!(err.is_exhausted());
}

#[tokio::test]
async fn test_update_with_shorter_key_text_trims_key_state() {
    let (router, _streams) = router_with(true).await;
    let channel = router
        .insert_channel(ChannelFixture::multi_key(0, "pool", &["a", "b", "c"], KeySelectionMode::Polling).build())
        .await
        .unwrap();
    router.toggle_key(channel.id, 2, false).await.unwrap();

    let mut edit = channel.clone();
    edit.key = "a\nb".to_string();
    let saved = router.update_channel(edit).await.unwrap();

    assert_eq!(saved.keys(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(saved.multi_key_info.key_count, 2);
    assert_eq!(saved.multi_key_info.enabled_key_count, 2);
    assert!(saved.multi_key_info.key_status_list.is_empty());
    assert_eq!(saved.status, ChannelStatus::Enabled);
}

#[tokio::test]
async fn test_batch_delete() {
    let (router, _streams) = router_with(true).await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        ids.push(router.insert_channel(ChannelFixture::new(0, name).build()).await.unwrap().id);
    }

    assert_eq!(router.delete_channels(&ids[..2]).await.unwrap(), 2);
    let picked = router
        .select_channel(SelectRequest::new("default", "gpt-4o"))
        .await
        .unwrap();
    assert_eq!(picked.id, ids[2]);
}

#[rstest]
#[case::cached(true)]
#[case::uncached(false)]
#[tokio::test]
async fn test_manual_disable_removes_channel_from_rotation(#[case] memory_cache_enabled: bool) {
    let (router, _streams) = router_with(memory_cache_enabled).await;
    let top = router
        .insert_channel(ChannelFixture::new(0, "top").priority(10).build())
        .await
        .unwrap();
    let low = router
        .insert_channel(ChannelFixture::new(0, "low").priority(1).build())
        .await
        .unwrap();

    router.disable_channel(top.id).await.unwrap();
    for _ in 0..10 {
        let picked = router
            .select_channel(SelectRequest::new("default", "gpt-4o"))
            .await
            .unwrap();
        assert_eq!(picked.id, low.id);
    }
    let rows = router.index().list_for_channel(top.id).await.unwrap();
    assert!(rows.iter().all(|row| !row.enabled));
    assert_eq!(router.cache().get(top.id).await.unwrap().unwrap().status, ChannelStatus::ManuallyDisabled);

    router.enable_channel(top.id).await.unwrap();
    let picked = router
        .select_channel(SelectRequest::new("default", "gpt-4o"))
        .await
        .unwrap();
    assert_eq!(picked.id, top.id);

    let err = router.enable_channel(9_999).await.unwrap_err();
    assert!(matches!(err, RelayError::NotFound { .. }));
}

#[tokio::test]
async fn test_check_consistency_repairs_ability_flags() {
    let (router, _streams) = router_with(true).await;
    let channel = router
        .insert_channel(ChannelFixture::new(0, "drift").group("default,vip").build())
        .await
        .unwrap();

    abilities::Entity::update_many()
        .col_expr(abilities::Column::Enabled, Expr::value(false))
        .filter(abilities::Column::ChannelId.eq(channel.id))
        .exec(router.store().db().as_ref())
        .await
        .unwrap();
    assert!(router.enabled_models("default").await.unwrap().is_empty());

    assert_eq!(router.check_consistency().await.unwrap(), 2);
    assert_eq!(router.enabled_models("default").await.unwrap(), vec!["gpt-4o"]);
    assert_eq!(router.check_consistency().await.unwrap(), 0);
}

#[tokio::test]
async fn test_enabled_models_ordered_by_priority() {
    let (router, _streams) = router_with(true).await;
    router
        .insert_channel(ChannelFixture::new(0, "a").models("zeta").priority(9).build())
        .await
        .unwrap();
    router
        .insert_channel(ChannelFixture::new(0, "b").models("alpha,zeta").priority(1).build())
        .await
        .unwrap();

    assert_eq!(router.enabled_models("default").await.unwrap(), vec!["zeta", "alpha"]);
    assert!(router.enabled_models("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cache_and_store_backed_picks_agree_on_top_tier() {
    let (router, _streams) = router_with(true).await;
    let top = router
        .insert_channel(ChannelFixture::new(0, "top").priority(10).build())
        .await
        .unwrap();
    let second = router
        .insert_channel(ChannelFixture::new(0, "second").priority(5).build())
        .await
        .unwrap();
    router.refresh_cache().await.unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let cached = router
        .random_satisfied("default", "gpt-4o", false, &mut rng)
        .await
        .unwrap();
    assert_eq!(cached.id, top.id);
    let skipped = router
        .random_satisfied("default", "gpt-4o", true, &mut rng)
        .await
        .unwrap();
    assert_eq!(skipped.id, second.id);

    let direct = router
        .random_max_priority_channel("default", "gpt-4o")
        .await
        .unwrap();
    assert_eq!(direct.id, top.id);

    let err = router
        .random_max_priority_channel("default", "unknown-model")
        .await
        .unwrap_err();
    assert!(err.is_exhausted());
}

#[tokio::test]
async fn test_affinity_binding_through_router() {
    let (router, _streams) = router_with(true).await;
    router
        .insert_channel(ChannelFixture::new(0, "top").priority(10).build())
        .await
        .unwrap();
    let low = router
        .insert_channel(ChannelFixture::new(0, "low").priority(1).build())
        .await
        .unwrap();

    router
        .bind_affinity(&["conv-1".to_string(), "user-7".to_string()], low.id)
        .await
        .unwrap();
    for key in ["conv-1", "user-7"] {
        let picked = router
            .select_channel(SelectRequest::new("default", "gpt-4o").affinity_key(key))
            .await
            .unwrap();
        assert_eq!(picked.id, low.id);
    }

    let demoted = router
        .select_channel(SelectRequest::new("default", "gpt-4o").affinity_key("conv-1").skip_tiers(1))
        .await
        .unwrap();
    assert_eq!(demoted.id, low.id);
}
