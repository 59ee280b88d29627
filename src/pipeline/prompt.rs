//! 2つの生成モード用のプロンプト組み立て。

use std::fmt::Write as _;

use super::models::DestinationStub;
use super::params::PreferenceParams;

/// この値以上の予算上限は「実質上限なし」とみなす。
pub const DEFAULT_TIGHT_BUDGET_USD: u32 = 2000;

pub(crate) const NAMES_SYSTEM_PROMPT: &str = "\
You are a travel destination expert. Analyze free-form text about travel preferences and \
suggest exactly 10 destinations ranked by relevance, most relevant first.

Parse for: activities/interests, timing/season, budget, travel style, climate/geography preferences.

For each destination provide only:
1. \"country\": ISO 3166-1 alpha-3 country code
2. \"region\": region or city name

Format STRICTLY as a JSON array, e.g.
[{\"country\": \"JPN\", \"region\": \"Kyushu\"}, {\"country\": \"ISL\", \"region\": \"Reykjanes\"}]

Output ONLY valid JSON with no preamble or additional text.";

pub(crate) const DETAILS_SYSTEM_PROMPT: &str = "\
You are a travel destination expert. You receive a numbered list of destinations and the \
traveler's preferences. Return exactly one record per listed destination, in the same order.

For each destination provide:
1. \"country\" and \"region\" exactly as listed
2. \"description\": 4-6 markdown bullet points on why it matches the stated interests, \
seasonal suitability, key sights and the food scene
3. \"imagesKeywords\": {\"cover\": search phrase for one hero image, \"gallery\": search phrase for a gallery}
4. \"pricing\": USD per day ranges {\"accommodation\": \"20-40\", \"food\": \"15-30\", \"activities\": \"30-50\"}
5. \"recommendedDuration\": days range such as \"3-5\"
6. \"destinationAirportCode\": IATA code of the closest international airport

Format STRICTLY as a JSON array. Output ONLY valid JSON with no preamble or additional text.";

/// プロンプトに含める嗜好条件の範囲。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClauseSet {
    /// 全条件。候補の名前生成で使う。
    Full,
    /// 目的地フィルタ以外の全条件。エンリッチメントで使う。
    WithoutDestinationFilter,
}

/// 嗜好条件の文を固定順で組み立てる。
#[derive(Debug, Clone, Copy)]
pub(crate) struct PromptBuilder {
    tight_budget_usd: u32,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TIGHT_BUDGET_USD)
    }
}

impl PromptBuilder {
    pub(crate) const fn new(tight_budget_usd: u32) -> Self {
        Self { tight_budget_usd }
    }

    /// 名前生成呼び出し用のプロンプト。
    pub(crate) fn names_prompt(&self, params: &PreferenceParams) -> String {
        let mut prompt = base_sentence(params);
        self.push_clauses(&mut prompt, params, ClauseSet::Full);
        prompt
    }

    /// エンリッチメント1バッチ分のプロンプト。スタブは1から番号付けする。
    pub(crate) fn details_prompt(&self, stubs: &[DestinationStub], params: &PreferenceParams) -> String {
        let mut prompt = String::from("Provide details for these destinations:\n");
        for (index, stub) in stubs.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", index + 1, stub.label());
        }
        prompt.push('\n');
        prompt.push_str(&base_sentence(params));
        self.push_clauses(&mut prompt, params, ClauseSet::WithoutDestinationFilter);
        prompt
    }

    fn push_clauses(&self, prompt: &mut String, params: &PreferenceParams, set: ClauseSet) {
        if let Some(origin) = non_blank(params.origin.as_deref()) {
            let _ = write!(prompt, " I'm traveling from {origin}.");
        }

        match params.budget {
            Some(budget) if budget < self.tight_budget_usd => {
                let _ = write!(prompt, " My total budget is about ${budget} USD.");
            }
            _ => {
                if let Some(price) = non_blank(params.price.as_deref()) {
                    let _ = write!(prompt, " My budget is {price}.");
                }
            }
        }

        if let Some(range) = params.duration_range {
            let _ = write!(
                prompt,
                " The trip should last between {} and {} days.",
                range.min_days, range.max_days
            );
        }

        if set == ClauseSet::Full && !params.destination_filter.is_empty() {
            let _ = write!(
                prompt,
                " I'm specifically interested in {} - suggest specific places within.",
                join_list(&params.destination_filter)
            );
        }

        if !params.exclusions.is_empty() {
            let _ = write!(prompt, " Please avoid: {}.", join_list(&params.exclusions));
        }

        if !params.travel_styles.is_empty() {
            let _ = write!(prompt, " My travel style: {}.", join_list(&params.travel_styles));
        }
    }
}

fn base_sentence(params: &PreferenceParams) -> String {
    format!("I want to {} in {}.", params.vibe.trim(), params.time_period.trim())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
