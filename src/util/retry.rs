/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// AWS推奨のFull Jitter戦略を実装します。
use std::time::Duration;

use rand::Rng;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む）。1 なら再試行しない。
    pub max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 再試行しない設定。
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(1, 250, 10_000)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// 指定された再試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// `retry` は1から始まる再試行の番号。0 は初回試行で遅延なし。
    #[must_use]
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let capped_delay = self.delay_cap_ms(retry);
        if capped_delay == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=capped_delay))
    }

    /// ジッター前の遅延上限（ミリ秒）。
    fn delay_cap_ms(&self, retry: usize) -> u64 {
        if retry == 0 {
            return 0;
        }
        let shift = u32::try_from(retry - 1).unwrap_or(u32::MAX);
        self.base_delay_ms
            .saturating_mul(1_u64.checked_shl(shift).unwrap_or(u64::MAX))
            .min(self.max_delay_ms)
    }

    /// 1試行あたり `per_attempt` かかる場合に、全試行とバックオフを合わせた最悪所要時間。
    #[must_use]
    pub fn total_budget(&self, per_attempt: Duration) -> Duration {
        let attempts = u32::try_from(self.max_attempts.max(1)).unwrap_or(u32::MAX);
        let backoff_ms = (1..self.max_attempts)
            .map(|retry| self.delay_cap_ms(retry))
            .fold(0_u64, u64::saturating_add);
        per_attempt
            .saturating_mul(attempts)
            .saturating_add(Duration::from_millis(backoff_ms))
    }

    /// `attempts` 回試行した後にもう一度試せるか。
    #[must_use]
    pub const fn can_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }
}
