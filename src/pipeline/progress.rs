//! 進捗通知。
//!
//! コールバックには所有権付きのスナップショットを渡す。オーケストレーターの
//! バッファとは共有しないため、受け取った側は保持も変更もできる。

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::DiscoveryError;

use super::models::{Destination, DestinationStub};

type InitialFn = Box<dyn Fn(Vec<DestinationStub>) + Send + Sync>;
type BatchFn = Box<dyn Fn(Vec<Destination>, usize) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;
type ErrorFn = Box<dyn Fn(&DiscoveryError) + Send + Sync>;

/// 4つの任意の進捗コールバック。パイプラインのタスク上で同期的に呼ばれるため、すぐに戻ること。
#[derive(Default)]
pub struct ProgressCallbacks {
    on_initial_destinations: Option<InitialFn>,
    on_batch_complete: Option<BatchFn>,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl fmt::Debug for ProgressCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallbacks")
            .field("on_initial_destinations", &self.on_initial_destinations.is_some())
            .field("on_batch_complete", &self.on_batch_complete.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl ProgressCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_initial_destinations(
        mut self,
        callback: impl Fn(Vec<DestinationStub>) + Send + Sync + 'static,
    ) -> Self {
        self.on_initial_destinations = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_batch_complete(
        mut self,
        callback: impl Fn(Vec<Destination>, usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_batch_complete = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&DiscoveryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// すべての通知をチャネルへ転送する。送信はブロックせず、受信側が閉じていれば無視する。
    #[must_use]
    pub fn channel(sender: UnboundedSender<ProgressEvent>) -> Self {
        let initial = sender.clone();
        let batch = sender.clone();
        let complete = sender.clone();
        Self::new()
            .on_initial_destinations(move |destinations| {
                let _ = initial.send(ProgressEvent::InitialDestinations { destinations });
            })
            .on_batch_complete(move |destinations, batch_number| {
                let _ = batch.send(ProgressEvent::BatchComplete {
                    destinations,
                    batch_number,
                });
            })
            .on_complete(move || {
                let _ = complete.send(ProgressEvent::Complete);
            })
            .on_error(move |error| {
                let _ = sender.send(ProgressEvent::Error {
                    message: error.to_string(),
                });
            })
    }
}

/// 4種類の通知のメッセージ表現。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    InitialDestinations {
        destinations: Vec<DestinationStub>,
    },
    BatchComplete {
        destinations: Vec<Destination>,
        #[serde(rename = "batchNumber")]
        batch_number: usize,
    },
    Complete,
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// SSE のイベント名。
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialDestinations { .. } => "initial",
            Self::BatchComplete { .. } => "batch",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
        }
    }
}

/// 設定されたコールバックをコピーしたデータで呼び出す。
pub(crate) struct ProgressDispatcher<'a> {
    callbacks: &'a ProgressCallbacks,
}

impl<'a> ProgressDispatcher<'a> {
    pub(crate) fn new(callbacks: &'a ProgressCallbacks) -> Self {
        Self { callbacks }
    }

    pub(crate) fn initial(&self, stubs: &[DestinationStub]) {
        debug!(count = stubs.len(), "notifying initial destinations");
        if let Some(callback) = &self.callbacks.on_initial_destinations {
            callback(stubs.to_vec());
        }
    }

    pub(crate) fn batch_complete(&self, snapshot: Vec<Destination>, batch_number: usize) {
        debug!(batch_number, "notifying batch completion");
        if let Some(callback) = &self.callbacks.on_batch_complete {
            callback(snapshot, batch_number);
        }
    }

    pub(crate) fn complete(&self) {
        if let Some(callback) = &self.callbacks.on_complete {
            callback();
        }
    }

    pub(crate) fn error(&self, error: &DiscoveryError) {
        if let Some(callback) = &self.callbacks.on_error {
            callback(error);
        }
    }
}
