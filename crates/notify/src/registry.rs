//! Type identifier resolution and non-failing decoding.
//!
//! The registry replaces runtime reflection: decode thunks are stored at
//! registration time, keyed by the canonical type identifier. Lookup
//! tolerates versioned qualifiers (everything after the first comma is a
//! qualifier, not part of the name).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use courier_core::NotificationId;

use crate::notification::{GenericNotification, Notification};

type DecodeFn = dyn Fn(&str) -> Result<Box<dyn Notification>, serde_json::Error> + Send + Sync;

#[derive(Default, Clone)]
pub struct TypeRegistry {
    decoders: HashMap<String, Arc<DecodeFn>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `type_name`.
    pub fn register<T>(&mut self, type_name: impl Into<String>)
    where
        T: Notification + DeserializeOwned,
    {
        self.decoders.insert(
            type_name.into(),
            Arc::new(|body: &str| {
                serde_json::from_str::<T>(body)
                    .map(|payload| Box::new(payload) as Box<dyn Notification>)
            }),
        );
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Resolve a type identifier to its decode thunk.
    ///
    /// The full name is tried first; a versioned/qualified name falls back
    /// to the bare name before the first comma.
    pub fn resolve(&self, type_name: &str) -> Option<&Arc<DecodeFn>> {
        let trimmed = type_name.trim();
        if trimmed.is_empty() {
            debug!("empty notification type identifier");
            return None;
        }
        if let Some(decoder) = self.decoders.get(trimmed) {
            return Some(decoder);
        }
        if let Some((bare, _qualifiers)) = trimmed.split_once(',') {
            if let Some(decoder) = self.decoders.get(bare.trim_end()) {
                return Some(decoder);
            }
        }
        warn!(type_name = trimmed, "unresolved notification type");
        None
    }

    /// Decode `body` under `type_name`, falling back to a generic payload.
    ///
    /// Never fails: resolution misses and decode errors both yield a
    /// [`GenericNotification`] preserving the raw body. The wire identity
    /// wins over the decoded one; missing identity is defaulted.
    pub fn decode_or_fallback(
        &self,
        body: &str,
        type_name: &str,
        wire_id: Option<&str>,
        wire_timestamp: Option<DateTime<Utc>>,
    ) -> Box<dyn Notification> {
        let decoded = self.resolve(type_name).and_then(|decode| match decode(body) {
            Ok(notification) => Some(notification),
            Err(error) => {
                warn!(type_name, %error, "notification body failed to decode, using generic fallback");
                None
            }
        });

        let mut notification = decoded
            .unwrap_or_else(|| Box::new(GenericNotification::new(type_name, body)) as Box<dyn Notification>);

        let envelope = notification.envelope_mut();
        match wire_id {
            Some(id) if !id.trim().is_empty() => envelope.id = NotificationId::from(id),
            _ if envelope.id.is_empty() => envelope.id = NotificationId::generate(),
            _ => {}
        }
        envelope.timestamp = wire_timestamp.or(envelope.timestamp).or_else(|| Some(Utc::now()));
        notification
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
