//! The mDNS / DNS-SD publisher abstraction (component D): polymorphic over
//! concrete responders, exposing idempotent publish/unpublish of hosts,
//! services (with subtypes, TXT, SRV) and key records, plus browse/resolve
//! subscriptions, to every upper-layer proxy.

pub mod callback_table;
pub mod model;
pub mod publisher;
pub mod responder;

pub use callback_table::{CallbackId, CallbackTable};
pub use model::{
    DiscoveredHostInfo, DiscoveredInstanceInfo, HostAddresses, KeyPublishOutcome, PublishOutcome,
    PublisherState, ServiceInstance, SubscriptionEvent,
};
pub use publisher::{KeyPublishCallback, Publisher, PublisherCore, PublishCallback};
pub use responder::SelfContainedPublisher;
