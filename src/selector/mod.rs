//! # 渠道选择
//!
//! 优先级分层 + 层内加权随机，支持会话亲和与按渠道排除的重试。

mod affinity;
mod cache;
mod registry;
mod weighted;

pub use affinity::{AffinityStore, MemoryAffinityStore, RedisAffinityStore, build_affinity_store};
pub use cache::{ChannelCache, Snapshot};
pub use registry::{CursorSlot, RoutingRegistry};
pub use weighted::weighted_pick;

use crate::ability::AbilityIndex;
use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};
use entity::channels;
use std::sync::Arc;

/// 一次渠道选择请求
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectRequest<'a> {
    pub group: &'a str,
    pub model: &'a str,
    /// 跳过的优先级层数，0 表示从最高层开始
    pub skip_tiers: usize,
    pub affinity_key: Option<&'a str>,
    pub exclude_ids: &'a [i32],
}

impl<'a> SelectRequest<'a> {
    #[must_use]
    pub const fn new(group: &'a str, model: &'a str) -> Self {
        Self {
            group,
            model,
            skip_tiers: 0,
            affinity_key: None,
            exclude_ids: &[],
        }
    }

    #[must_use]
    pub const fn skip_tiers(mut self, skip_tiers: usize) -> Self {
        self.skip_tiers = skip_tiers;
        self
    }

    #[must_use]
    pub const fn affinity_key(mut self, key: &'a str) -> Self {
        self.affinity_key = Some(key);
        self
    }

    #[must_use]
    pub const fn exclude(mut self, ids: &'a [i32]) -> Self {
        self.exclude_ids = ids;
        self
    }
}

#[derive(Clone)]
pub struct ChannelSelector {
    index: AbilityIndex,
    cache: Arc<ChannelCache>,
    affinity: Arc<dyn AffinityStore>,
}

impl ChannelSelector {
    pub fn new(index: AbilityIndex, cache: Arc<ChannelCache>, affinity: Arc<dyn AffinityStore>) -> Self {
        Self {
            index,
            cache,
            affinity,
        }
    }

    pub async fn select_channel(&self, request: SelectRequest<'_>) -> Result<channels::Model> {
        if request.skip_tiers == 0 {
            if let Some(channel) = self.affinity_hit(&request).await {
                return Ok(channel);
            }
        }

        let priorities = self
            .index
            .distinct_priorities(request.group, request.model, request.exclude_ids)
            .await?;
        if priorities.is_empty() {
            return Err(RelayError::exhausted("no priorities available"));
        }

        let start = request.skip_tiers.min(priorities.len() - 1);
        for &priority in &priorities[start..] {
            let candidates = self
                .index
                .channels_in_tier(request.group, request.model, priority, request.exclude_ids)
                .await?;
            if candidates.is_empty() {
                continue;
            }

            let picked =
                weighted_pick(&candidates, channels::Model::effective_weight, &mut rand::thread_rng())?
                    .clone();
            ldebug!(
                "system",
                LogStage::Scheduling,
                LogComponent::Selector,
                "channel_selected",
                "已选择渠道",
                channel_id = picked.id,
                priority = priority,
                candidates = candidates.len()
            );
            return Ok(picked);
        }

        Err(RelayError::exhausted(format!(
            "no available channels for group '{}' and model '{}'",
            request.group, request.model
        )))
    }

    async fn affinity_hit(&self, request: &SelectRequest<'_>) -> Option<channels::Model> {
        let key = request.affinity_key.filter(|key| !key.is_empty())?;

        let channel_id = match self.affinity.get(key).await {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Selector,
                    "affinity_lookup_failed",
                    "读取亲和映射失败，按常规流程选择",
                    error = %e
                );
                return None;
            }
        };
        if request.exclude_ids.contains(&channel_id) {
            return None;
        }

        let channel = match self.cache.get(channel_id).await {
            Ok(channel) => channel?,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Selector,
                    "affinity_channel_lookup_failed",
                    "读取亲和渠道失败",
                    channel_id = channel_id,
                    error = %e
                );
                return None;
            }
        };

        (channel.status.is_enabled() && channel.serves(request.group, request.model)).then(|| {
            ldebug!(
                "system",
                LogStage::Scheduling,
                LogComponent::Selector,
                "affinity_hit",
                "命中会话亲和",
                channel_id = channel.id
            );
            channel
        })
    }

    /// 把亲和键绑定到渠道
    pub async fn bind_affinity(&self, keys: &[String], channel_id: i32) -> Result<()> {
        self.affinity.bind(keys, channel_id).await
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ChannelCache> {
        &self.cache
    }

    #[must_use]
    pub const fn index(&self) -> &AbilityIndex {
        &self.index
    }
}
