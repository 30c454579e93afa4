//! Shared fixtures for the in-crate tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use courier_core::{CourierError, CourierResult};

use crate::envelope::Envelope;
use crate::notification::Notification;
use crate::notification_payload;
use crate::transport::{NotificationEmitter, NotificationReceiver, NotificationStream, TagFilter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Ping {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub text: String,
}

notification_payload!(Ping, "test.Ping");

impl Ping {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            envelope: Envelope::new("test.Ping", "ping").with_id(id),
            text: text.to_string(),
        }
    }

    /// A ping without identity, for freeze-at-the-boundary tests.
    pub fn anonymous(text: &str) -> Self {
        Self {
            envelope: Envelope::new("test.Ping", "ping"),
            text: text.to_string(),
        }
    }

    pub fn tagged(id: &str, tag: &str) -> Self {
        Self {
            envelope: Envelope::new("test.Ping", "ping").with_id(id).with_tag(tag),
            text: String::new(),
        }
    }
}

pub(crate) fn arc(notification: impl Notification) -> Arc<dyn Notification> {
    Arc::new(notification)
}

/// Emitter that records every accepted notification.
pub(crate) struct RecordingEmitter {
    label: &'static str,
    pub seen: Mutex<Vec<Arc<dyn Notification>>>,
    fail_with: Option<CourierError>,
    barrier: Option<Arc<tokio::sync::Barrier>>,
    pub shutdowns: AtomicUsize,
}

impl RecordingEmitter {
    pub fn ok(label: &'static str) -> Self {
        Self {
            label,
            seen: Mutex::new(Vec::new()),
            fail_with: None,
            barrier: None,
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn failing(label: &'static str, error: CourierError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::ok(label)
        }
    }

    /// Emits only once every participant reached the barrier, proving
    /// wall-clock overlap of sibling emits.
    pub fn with_barrier(label: &'static str, barrier: Arc<tokio::sync::Barrier>) -> Self {
        Self {
            barrier: Some(barrier),
            ..Self::ok(label)
        }
    }

    pub fn seen_ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.envelope().id.to_string())
            .collect()
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn emit(
        &self,
        notification: Arc<dyn Notification>,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if cancel.is_cancelled() {
            return Err(CourierError::Cancelled);
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.seen.lock().unwrap().push(notification);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        self.label
    }
}

/// Receiver that yields a fixed batch and then completes.
pub(crate) struct FixedReceiver {
    label: &'static str,
    items: Mutex<Vec<Arc<dyn Notification>>>,
    fail_subscribe: bool,
}

impl FixedReceiver {
    pub fn yielding(label: &'static str, items: Vec<Arc<dyn Notification>>) -> Self {
        Self {
            label,
            items: Mutex::new(items),
            fail_subscribe: false,
        }
    }

    pub fn broken(label: &'static str) -> Self {
        Self {
            label,
            items: Mutex::new(Vec::new()),
            fail_subscribe: true,
        }
    }
}

#[async_trait]
impl NotificationReceiver for FixedReceiver {
    async fn subscribe(
        &self,
        filter: TagFilter,
        _cancel: CancellationToken,
    ) -> CourierResult<NotificationStream> {
        if self.fail_subscribe {
            return Err(CourierError::transport("subscribe refused"));
        }
        let items: Vec<_> = self
            .items
            .lock()
            .unwrap()
            .drain(..)
            .filter(|n| filter.matches(&n.envelope().tags))
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }

    async fn shutdown(&self) {}

    fn name(&self) -> &str {
        self.label
    }
}
