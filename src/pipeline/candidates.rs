//! スタブリスト生成。嗜好から順位付きの目的地スタブを作る。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::clients::generation::{GenerationMode, GenerationRequest, GenerationService};
use crate::error::DiscoveryError;
use crate::schema::{generation::DESTINATION_STUBS_SCHEMA, validate_json};

use super::decode::decode_json_array;
use super::models::DestinationStub;
use super::params::PreferenceParams;
use super::prompt::{NAMES_SYSTEM_PROMPT, PromptBuilder};

/// 名前モードで要求する候補数。
pub const EXPECTED_CANDIDATES: usize = 10;

#[derive(Clone)]
pub(crate) struct CandidateGenerator {
    generation: Arc<dyn GenerationService>,
    prompts: PromptBuilder,
}

impl CandidateGenerator {
    pub(crate) fn new(generation: Arc<dyn GenerationService>, prompts: PromptBuilder) -> Self {
        Self {
            generation,
            prompts,
        }
    }

    /// 名前モードのリクエストを組み立てる。不正な入力はネットワークに出る前に弾く。
    fn request(&self, params: &PreferenceParams) -> Result<GenerationRequest, DiscoveryError> {
        params.validate()?;
        Ok(GenerationRequest {
            mode: GenerationMode::Names,
            system: NAMES_SYSTEM_PROMPT,
            prompt: self.prompts.names_prompt(params),
        })
    }

    pub(crate) async fn generate_candidates(
        &self,
        params: &PreferenceParams,
    ) -> Result<Vec<DestinationStub>, DiscoveryError> {
        let request = self.request(params)?;
        let text = self.generation.generate(&request).await?;
        parse_stubs(&text)
    }
}

/// 名前モードの応答をデコードする。不正な要素が1つでもあればリスト全体を拒否する。
pub(crate) fn parse_stubs(text: &str) -> Result<Vec<DestinationStub>, DiscoveryError> {
    let items = decode_json_array(text)?;
    let value = Value::Array(items);

    let validation = validate_json(&DESTINATION_STUBS_SCHEMA, &value);
    if !validation.valid {
        return Err(DiscoveryError::UpstreamParse(format!(
            "candidate list failed schema validation: {}",
            validation.errors.join("; ")
        )));
    }

    let stubs: Vec<DestinationStub> = serde_json::from_value(value)
        .map_err(|error| DiscoveryError::UpstreamParse(error.to_string()))?;

    if stubs.len() == EXPECTED_CANDIDATES {
        debug!(count = stubs.len(), "candidate list decoded");
    } else {
        warn!(
            count = stubs.len(),
            expected = EXPECTED_CANDIDATES,
            "candidate list has unexpected length"
        );
    }

    Ok(stubs)
}
