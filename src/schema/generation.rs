/// 生成サービス（name mode）のJSON Schema定義。
use std::sync::LazyLock;

use serde_json::{Value, json};

/// 候補リスト応答のJSON Schema。
///
/// 件数は10件を期待するが、スキーマでは強制しない（件数違いは警告のみ）。
pub(crate) static DESTINATION_STUBS_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://alt.dev/schemas/discovery/destination-stubs.json",
        "title": "Destination Stub List",
        "description": "Ranked lightweight destination candidates returned in name mode",
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "country": {
                    "type": "string",
                    "minLength": 1,
                    "description": "ISO 3166-1 alpha-3 country code"
                },
                "region": {
                    "type": ["string", "null"],
                    "description": "Region or city name"
                }
            },
            "required": ["country"]
        }
    })
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate_json;

    #[test]
    fn accepts_ranked_stub_list() {
        let instance = json!([
            { "country": "JPN", "region": "Kyushu" },
            { "country": "ISL", "region": null },
            { "country": "IDN" }
        ]);

        assert!(validate_json(&DESTINATION_STUBS_SCHEMA, &instance).valid);
    }

    #[test]
    fn rejects_plain_country_codes() {
        let instance = json!(["JPN", "ISL"]);

        assert!(!validate_json(&DESTINATION_STUBS_SCHEMA, &instance).valid);
    }

    #[test]
    fn rejects_blank_country() {
        let instance = json!([{ "country": "", "region": "Somewhere" }]);

        assert!(!validate_json(&DESTINATION_STUBS_SCHEMA, &instance).valid);
    }
}
