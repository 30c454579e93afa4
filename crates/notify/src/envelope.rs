//! Envelope carried by every notification.
//!
//! The envelope is the unit of transport: the fixed header fields every
//! payload shares, serialized verbatim across every transport. Receivers
//! never mutate it; identity is frozen once at the composite emitter
//! boundary and must match on every transport that sees the payload.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{NotificationId, Severity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Envelope {
    /// Stable identifier, identical across every transport. Empty until
    /// frozen at the composite emitter boundary.
    pub id: NotificationId,

    /// Creation time. `None` until frozen; immutable afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Logical type name of the payload (not a language type).
    pub notification_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    pub severity: Severity,

    pub message: String,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Envelope {
    pub fn new(notification_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: notification_type.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<NotificationId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Assign the missing identity fields. Returns true when anything
    /// changed. Already-set fields are left untouched.
    pub fn ensure_identity(&mut self) -> bool {
        let mut changed = false;
        if self.id.is_empty() {
            self.id = NotificationId::generate();
            changed = true;
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
            changed = true;
        }
        changed
    }
}
