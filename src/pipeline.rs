//! 段階的な目的地探索。
//!
//! まず生成サービスに候補スタブの短いリストを求め、その後固定サイズのバッチでエンリッチする。
//! 利用側はスタブリストをすぐに受け取り、バッチごとに全件のスナップショットを受け取る。

pub(crate) mod candidates;
pub(crate) mod decode;
pub(crate) mod enrich;
pub mod models;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub(crate) mod prompt;

pub use candidates::EXPECTED_CANDIDATES;
pub use enrich::DEFAULT_BATCH_SIZE;
pub use models::{Destination, DestinationStub, ImagesKeywords, Pricing};
pub use orchestrator::{DiscoveryPipeline, PipelineSettings, RunOptions};
pub use params::{DurationRange, PreferenceParams};
pub use progress::{ProgressCallbacks, ProgressEvent};
pub use prompt::DEFAULT_TIGHT_BUDGET_USD;
