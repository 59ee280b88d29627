//! バッチエンリッチャー。連続したスタブの区間ごとに詳細モードを1回呼び出す。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::clients::generation::{GenerationMode, GenerationRequest, GenerationService};
use crate::error::DiscoveryError;

use super::decode::decode_json_array;
use super::models::{Destination, DestinationStub};
use super::params::PreferenceParams;
use super::prompt::{DETAILS_SYSTEM_PROMPT, PromptBuilder};

/// 1回の上流呼び出しでエンリッチするスタブ数の既定値。
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// スタブリストの連続した区間。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchPlan {
    /// 1始まり。
    pub(crate) number: usize,
    pub(crate) start: usize,
    pub(crate) len: usize,
}

/// `total` 件のスタブを、重複のない順序付きの `ceil(total / batch_size)` 個のバッチに分割する。
pub(crate) fn plan_batches(total: usize, batch_size: usize) -> Vec<BatchPlan> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| BatchPlan {
            number: index + 1,
            start,
            len: batch_size.min(total - start),
        })
        .collect()
}

#[derive(Clone)]
pub(crate) struct BatchEnricher {
    generation: Arc<dyn GenerationService>,
    prompts: PromptBuilder,
}

impl BatchEnricher {
    pub(crate) fn new(generation: Arc<dyn GenerationService>, prompts: PromptBuilder) -> Self {
        Self {
            generation,
            prompts,
        }
    }

    /// 1回の上流呼び出しで1バッチをエンリッチする。
    ///
    /// 結果は返されたレコードごとに1要素（最大 `stubs.len()` 件）。
    /// `None` はスタブを置き換えてはいけないレコードを表す。
    pub(crate) async fn enrich_batch(
        &self,
        stubs: &[DestinationStub],
        params: &PreferenceParams,
    ) -> Result<Vec<Option<Destination>>, DiscoveryError> {
        let request = GenerationRequest {
            mode: GenerationMode::Details,
            system: DETAILS_SYSTEM_PROMPT,
            prompt: self.prompts.details_prompt(stubs, params),
        };
        let text = self.generation.generate(&request).await?;
        let items = decode_json_array(&text)?;

        if items.len() > stubs.len() {
            warn!(
                requested = stubs.len(),
                returned = items.len(),
                "detail response longer than batch, extra records ignored"
            );
        }

        Ok(items
            .into_iter()
            .take(stubs.len())
            .enumerate()
            .map(|(position, item)| mergeable_record(position, item))
            .collect())
    }
}

/// 空でない country と region を持つレコードを受理する。
///
/// 型の合わない詳細フィールドは個別に捨てる。
fn mergeable_record(position: usize, item: Value) -> Option<Destination> {
    let has_identity = ["country", "region"].iter().all(|key| {
        item.get(key)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.trim().is_empty())
    });
    if !has_identity {
        debug!(position, "detail record missing country or region");
        return None;
    }

    match serde_json::from_value::<Destination>(item) {
        Ok(destination) => Some(destination),
        Err(error) => {
            warn!(position, %error, "detail record could not be decoded");
            None
        }
    }
}
