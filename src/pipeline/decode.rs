//! 生成結果のデコード。
//!
//! モデルは JSON を Markdown のコードフェンスで囲むことが多い。パース前にここで一度だけ取り除く。

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::DiscoveryError;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:json|JSON)?[ \t]*\r?\n?").expect("valid regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?```$").expect("valid regex"));

/// 先頭と末尾の Markdown フェンスを取り除く（`json` タグの有無は問わない）。
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let start = LEADING_FENCE
        .find(trimmed)
        .map_or(0, |leading| leading.end());
    let rest = &trimmed[start..];
    let end = TRAILING_FENCE
        .find(rest)
        .map_or(rest.len(), |trailing| trailing.start());
    rest[..end].trim()
}

/// フェンスを除去し、残りを JSON 配列としてパースする。
pub(crate) fn decode_json_array(text: &str) -> Result<Vec<Value>, DiscoveryError> {
    let cleaned = strip_markdown_fences(text);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|error| DiscoveryError::UpstreamParse(error.to_string()))?;

    match value {
        Value::Array(items) => Ok(items),
        other => Err(DiscoveryError::UpstreamParse(format!(
            "expected a JSON array, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
