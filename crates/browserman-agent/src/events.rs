//! Externally observable session events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One unit of the per-session event stream.
///
/// Serialized as a bare object: `{"image": ...}`, `{"text": ...}` or
/// `{"done": true}` (with an `error` string when the session failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Image {
        /// Base64-encoded PNG.
        image: String,
    },
    Text {
        text: String,
    },
    Done {
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Event {
    pub fn image(encoded: impl Into<String>) -> Self {
        Self::Image {
            image: encoded.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn done() -> Self {
        Self::Done {
            done: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Done {
            done: true,
            error: Some(error.into()),
        }
    }

    /// Whether this is the terminal marker.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Destination for session events. Writes are awaited in emission order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Sink that only logs; useful when nobody is listening.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: Event) {
        match &event {
            Event::Image { image } => info!("event: image ({} bytes base64)", image.len()),
            Event::Text { text } => info!("event: text {}", text),
            Event::Done { error: None, .. } => info!("event: done"),
            Event::Done { error: Some(e), .. } => info!("event: done (error: {})", e),
        }
    }
}
