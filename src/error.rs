/// パイプラインのエラー型と分類ユーティリティ。
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// 発見パイプラインが返すエラー。
///
/// 候補生成フェーズで発生した場合は致命的、エンリッチメントのバッチ内で
/// 発生した場合はそのバッチのスキップに変換される。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("invalid preferences: {0}")]
    Validation(String),
    #[error("generation request failed: {message}")]
    UpstreamRequest {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },
    #[error("generation response could not be parsed: {0}")]
    UpstreamParse(String),
    #[error("discovery run was cancelled")]
    Cancelled,
}

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 一時的な失敗（タイムアウト、接続エラー、5xx、429）
    Retryable,
    /// 再試行しても結果が変わらない失敗（パース、4xx）
    NonRetryable,
    /// 入力不正または呼び出し側による中断
    Fatal,
}

impl DiscoveryError {
    /// HTTPステータス付きの上流エラーを作る。
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let retryable =
            status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
        Self::UpstreamRequest {
            message: format!("generation endpoint returned error status {status}: {body}"),
            status: Some(status.as_u16()),
            retryable,
        }
    }

    /// トランスポート層の失敗を変換する。
    pub(crate) fn from_transport(error: &reqwest::Error) -> Self {
        Self::UpstreamRequest {
            message: error.to_string(),
            status: error.status().map(|status| status.as_u16()),
            retryable: error.is_timeout() || error.is_connect(),
        }
    }

    pub(crate) fn timed_out(after: Duration) -> Self {
        Self::UpstreamRequest {
            message: format!("generation call timed out after {}ms", after.as_millis()),
            status: None,
            retryable: true,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UpstreamRequest {
                retryable: true, ..
            } => ErrorKind::Retryable,
            Self::UpstreamRequest { .. } | Self::UpstreamParse(_) => ErrorKind::NonRetryable,
            Self::Validation(_) | Self::Cancelled => ErrorKind::Fatal,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }
}
