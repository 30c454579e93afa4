//! Payload abstraction and the generic fallback variant.

use core::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// A typed payload moving through the fabric.
///
/// Concrete payloads are plain serde structs carrying a flattened
/// [`Envelope`] field plus their domain fields; [`notification_payload!`]
/// implements this trait for them. The trait stays object-safe so
/// transports can move payloads around as `Arc<dyn Notification>`.
pub trait Notification: Send + Sync + 'static {
    fn envelope(&self) -> &Envelope;

    fn envelope_mut(&mut self) -> &mut Envelope;

    /// Canonical logical type identifier used for routing and decoding.
    fn type_name(&self) -> &str;

    /// Canonical JSON form of the full payload.
    fn encode(&self) -> Result<String, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// True for the fallback produced when a type identifier could not be
    /// resolved on receive.
    fn is_generic(&self) -> bool {
        false
    }
}

/// Implement [`Notification`] for a serde payload struct with a flattened
/// `envelope` field.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct DeployStarted {
///     #[serde(flatten)]
///     envelope: Envelope,
///     service: String,
/// }
/// notification_payload!(DeployStarted, "deploy.Started");
/// ```
#[macro_export]
macro_rules! notification_payload {
    ($payload:ty, $type_name:literal) => {
        impl $crate::Notification for $payload {
            fn envelope(&self) -> &$crate::Envelope {
                &self.envelope
            }

            fn envelope_mut(&mut self) -> &mut $crate::Envelope {
                &mut self.envelope
            }

            fn type_name(&self) -> &str {
                $type_name
            }

            fn encode(&self) -> Result<String, ::serde_json::Error> {
                ::serde_json::to_string(self)
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn as_any_arc(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::core::any::Any + Send + Sync> {
                self
            }
        }
    };
}

/// Fallback payload preserving a body whose type could not be resolved.
///
/// The raw encoded body is carried verbatim so downstream consumers can
/// still inspect or re-route it; `notification_type` keeps the original
/// unresolved identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericNotification {
    #[serde(flatten)]
    pub envelope: Envelope,

    /// Raw encoded body exactly as received.
    pub raw: String,
}

impl GenericNotification {
    pub fn new(type_name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(type_name, String::new()),
            raw: raw.into(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl Notification for GenericNotification {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn type_name(&self) -> &str {
        &self.envelope.notification_type
    }

    fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(self.raw.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn is_generic(&self) -> bool {
        true
    }
}
