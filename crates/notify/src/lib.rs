//! Fan-out/merge plane: one logical emit call reaching every transport,
//! one logical subscription merging every transport, with centralized
//! duplicate suppression keyed on the notification identifier.

pub mod dedup;
pub mod envelope;
pub mod fanout;
pub mod in_process;
pub mod merge;
pub mod notification;
pub mod options;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use dedup::DedupCache;
pub use envelope::Envelope;
pub use fanout::CompositeEmitter;
pub use in_process::{DEFAULT_CONDUIT_CAPACITY, InProcessConduit, InProcessEmitter, InProcessReceiver};
pub use merge::CompositeReceiver;
pub use notification::{GenericNotification, Notification};
pub use options::NotificationOptions;
pub use registry::TypeRegistry;
pub use transport::{NotificationEmitter, NotificationReceiver, NotificationStream, TagFilter};
