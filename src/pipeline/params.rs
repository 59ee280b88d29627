use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// 旅行日数の範囲（両端を含む）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationRange {
    pub min_days: u32,
    pub max_days: u32,
}

/// 1回の探索に渡す構造化された旅行嗜好。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceParams {
    pub vibe: String,
    pub time_period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// 予算上限（USD、整数）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
    /// 旧形式の自由記述予算（"cheap"、"around $50/day" など）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_range: Option<DurationRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub travel_styles: Vec<String>,
}

impl PreferenceParams {
    pub fn new(vibe: impl Into<String>, time_period: impl Into<String>) -> Self {
        Self {
            vibe: vibe.into(),
            time_period: time_period.into(),
            ..Self::default()
        }
    }

    /// 必須項目を検証する。上流呼び出しの前に実行する。
    ///
    /// # Errors
    /// `vibe` または `time_period` が空の場合は [`DiscoveryError::Validation`] を返す。
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.vibe.trim().is_empty() {
            return Err(DiscoveryError::Validation("vibe is required".to_string()));
        }
        if self.time_period.trim().is_empty() {
            return Err(DiscoveryError::Validation(
                "time period is required".to_string(),
            ));
        }
        if let Some(range) = self.duration_range.filter(|r| r.min_days > r.max_days) {
            return Err(DiscoveryError::Validation(format!(
                "duration range is inverted: {} > {}",
                range.min_days, range.max_days
            )));
        }
        Ok(())
    }
}
