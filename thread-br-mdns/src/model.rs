//! Value types shared by every mDNS publisher backend.

use std::net::{Ipv4Addr, Ipv6Addr};

/// A service entry as carried by the publisher (`ServiceInstance` in the
/// data model): instance-name unique within (service-type, link), TXT keys
/// printable ASCII and ≤9 bytes per DNS-SD, total TXT record ≤1300 bytes.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub instance_name: String,
    pub service_type: String,
    pub subtypes: Vec<String>,
    pub host_name: String,
    pub port: u16,
    pub txt: Vec<(String, String)>,
}

impl ServiceInstance {
    /// Validates the boundary invariants before a publish is even attempted:
    /// zero-length names, TXT keys over 9 ASCII bytes, and oversized TXT
    /// records are all rejected here, not passed to the responder.
    pub fn validate(&self) -> Result<(), PublishOutcome> {
        if self.instance_name.is_empty() || self.instance_name.len() > 63 {
            return Err(PublishOutcome::Invalid);
        }

        let mut txt_len = 0usize;

        for (key, value) in &self.txt {
            if key.len() > 9 || !key.is_ascii() {
                return Err(PublishOutcome::Invalid);
            }

            txt_len += key.len() + value.len() + 1;
        }

        if txt_len > 1300 {
            return Err(PublishOutcome::Invalid);
        }

        Ok(())
    }
}

/// A host entry: a name plus the addresses it resolves to.
#[derive(Debug, Clone, Default)]
pub struct HostAddresses {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl HostAddresses {
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

/// The result a `publish_*`/`unpublish_*` completion callback is handed.
/// Deliberately narrower than `thread_br_ncp::CoreError` — this is exactly
/// the taxonomy §4.4 names for the publisher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Ok,
    /// The same (name, type) is already published by someone else on the
    /// LAN — not us.
    Duplicated,
    /// Superseded by a later call for the same name before this one
    /// completed.
    Aborted,
    Invalid,
    Other,
    NotFound,
}

/// Whether a `publish_key`/`unpublish_key` attempt made it onto the wire.
/// The Advertising Proxy proceeds with host/service publication regardless
/// of this outcome (§9 design note), but the outcome is still recorded so
/// tests can assert on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPublishOutcome {
    Published,
    Failed(PublishOutcome),
}

/// Publisher lifecycle state. A publisher in `Idle` queues requests and only
/// delivers their callbacks once it transitions to `Ready` (a responder
/// restart loses prior state, so `Idle` is also the signal to republish
/// everything once `Ready` is reached again).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Ready,
}

/// One discovered service instance, delivered to a `subscribe_service`
/// subscriber.
#[derive(Debug, Clone)]
pub struct DiscoveredInstanceInfo {
    pub instance_name: String,
    pub service_type: String,
    pub host_name: String,
    pub port: u16,
    pub txt: Vec<(String, String)>,
    pub addresses: HostAddresses,
}

/// One discovered host, delivered to a `subscribe_host` subscriber.
#[derive(Debug, Clone)]
pub struct DiscoveredHostInfo {
    pub host_name: String,
    pub addresses: HostAddresses,
}

/// An add/remove event for either subscription kind.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent<T> {
    Added(T),
    Removed(T),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ServiceInstance {
        ServiceInstance {
            instance_name: "dev1".into(),
            service_type: "_ipps._tcp".into(),
            subtypes: vec![],
            host_name: "dev1".into(),
            port: 631,
            txt: vec![],
        }
    }

    #[test]
    fn rejects_txt_key_over_nine_bytes() {
        let mut svc = instance();
        svc.txt.push(("way-too-long-key".into(), "v".into()));

        assert_eq!(svc.validate(), Err(PublishOutcome::Invalid));
    }

    #[test]
    fn accepts_well_formed_instance() {
        let svc = instance();
        assert_eq!(svc.validate(), Ok(()));
    }

    #[test]
    fn empty_host_addresses_reports_empty() {
        assert!(HostAddresses::default().is_empty());
    }
}
