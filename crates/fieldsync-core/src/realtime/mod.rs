//! Real-time change notifications.
//!
//! Events only ever trigger local refreshes; nothing here talks to the sync
//! backend.

mod channel;
mod event;
mod hub;

pub use channel::{EventHandler, RealtimeOptions, RealtimeSubscription};
pub use event::{
    ChannelError, ConnectionInfo, DataUpdate, EventName, Notification, RealtimeEvent,
};
pub use hub::RealtimeHub;
