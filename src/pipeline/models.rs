use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 候補生成で得られる最小限の目的地識別子。
///
/// `(country, region)` がパイプライン全体での結合キーになる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationStub {
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl DestinationStub {
    pub fn new(country: impl Into<String>, region: Option<&str>) -> Self {
        Self {
            country: country.into(),
            region: region.map(ToString::to_string),
        }
    }

    /// プロンプト用の「region, country」表記。
    pub(crate) fn label(&self) -> String {
        match self.region.as_deref().filter(|region| !region.is_empty()) {
            Some(region) => format!("{region}, {}", self.country),
            None => self.country.clone(),
        }
    }
}

/// 画像検索用キーワード。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesKeywords {
    pub cover: String,
    pub gallery: String,
}

/// 1日あたりの価格帯（USD, "20-40" 形式）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub accommodation: String,
    pub food: String,
    pub activities: String,
}

/// エンリッチ済み、または未エンリッチの目的地。
///
/// エンリッチに失敗したエントリはスタブと同じ形（詳細フィールドなし）のまま残る。
/// 詳細フィールドは個別にデコードし、型が合わないものだけ `None` にする。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub images_keywords: Option<ImagesKeywords>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub pricing: Option<Pricing>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub recommended_duration: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub destination_airport_code: Option<String>,
}

impl Destination {
    /// 説明と価格の両方が揃っていればエンリッチ完了とみなす。
    #[must_use]
    pub fn is_enriched(&self) -> bool {
        self.description.is_some() && self.pricing.is_some()
    }
}

/// 型が合わない値を `None` として読み捨てる。
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl From<DestinationStub> for Destination {
    fn from(stub: DestinationStub) -> Self {
        Self {
            country: stub.country,
            region: stub.region,
            description: None,
            images_keywords: None,
            pricing: None,
            recommended_duration: None,
            destination_airport_code: None,
        }
    }
}
