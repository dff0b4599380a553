//! Channel database, channels, sources and the event publisher.
//!
//! ```text
//!  driver ──producer_set──► ChannelSource ◄──consumer_get/set── Channel
//!                                                                 │
//!                     ChannelDatabase { name → Channel } ◄────────┘
//!                                │ CHANNEL_ADDED / CHANNEL_REMOVED / NEW_SAMPLE
//!                                ▼
//!                         ChannelPublisher ──► subscribers
//!                                └──────────► logging manager
//! ```

mod channel;
mod database;
mod publisher;
mod source;

pub use channel::Channel;
pub use database::{ChannelDatabase, ChannelView};
pub use publisher::{
    ChannelEvent, ChannelPublisher, Subscriber, SubscriberError, SubscriptionId,
};
pub use source::{
    ChannelPropertyDescriptor, ChannelSource, DevicePropertySource, RefreshCallback,
    SetCallback, SetOutcome,
};
