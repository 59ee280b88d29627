//! 生成サービスの境界。
//!
//! パイプラインは [`GenerationService`] のみに依存する。本番実装は [`GeminiClient`]、
//! [`RetryingGenerationService`] は任意の実装を包む再試行ラッパー。

mod client;
mod models;
mod retrying;

use async_trait::async_trait;

use crate::error::DiscoveryError;

pub use client::{GeminiClient, GeminiConfig};
pub use retrying::RetryingGenerationService;

/// どちらの生成能力を使うか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// 軽量な候補リスト（country, region）を10件生成する。
    Names,
    /// 指定された候補ごとに詳細レコードを生成する。
    Details,
}

impl GenerationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Names => "names",
            Self::Details => "details",
        }
    }
}

/// 生成サービスへの1回分のリクエスト。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    pub system: &'static str,
    pub prompt: String,
}

/// テキスト生成サービス。
///
/// 応答は加工前のテキストをそのまま返す。コードフェンスの除去やJSONの解釈は
/// 呼び出し側（パイプライン）の責務。
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, DiscoveryError>;

    /// 準備完了プローブ。既定では常に成功する。
    async fn ready(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
