//! SRPL (SRP Replication) peer discovery: browse for `_srpl-tls._tcp` peers
//! on the backbone and announce this agent's own SRP server over the same
//! service type, for multi-BR SRP-replication deployments.
//!
//! Grounded on `srpl_dnssd/srpl_dnssd.{hpp,cpp}`'s `SrplDnssd` (guarded by
//! `OTBR_ENABLE_SRP_REPLICATION` in the original; guarded here by
//! `AgentConfig::srpl_enabled`). Not named in spec.md's MODULE list — a
//! supplemented feature per SPEC_FULL.md §4 — but it reuses the Advertising
//! Proxy's publish/subscribe plumbing against the same [`Publisher`], just a
//! fixed service type and a caller-supplied TXT payload instead of a full
//! SRP-registration mirror.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thread_br_mdns::{CallbackId, DiscoveredInstanceInfo, Publisher, PublishOutcome, ServiceInstance, SubscriptionEvent};

pub const SERVICE_TYPE: &str = "_srpl-tls._tcp";
pub const PORT: u16 = 853;

/// Owns the one outstanding browse subscription (if any) and this agent's
/// own announced instance name (if registered), mirroring `SrplDnssd`'s
/// `mSubscriberId`/`mServiceInstanceName` pair.
pub struct SrplDnssd {
    host_name: String,
    subscription: Option<CallbackId>,
    registered_instance: Option<String>,
    discovered: Rc<RefCell<HashMap<String, DiscoveredInstanceInfo>>>,
}

impl SrplDnssd {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            subscription: None,
            registered_instance: None,
            discovered: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.subscription.is_some()
    }

    /// `StartBrowse`: subscribes for `_srpl-tls._tcp` peers, recording each
    /// discovered instance so `discovered_peers` reflects the live set.
    pub fn start_browse(&mut self, publisher: &mut dyn Publisher) {
        if self.subscription.is_some() {
            return;
        }

        let discovered = self.discovered.clone();

        let id = publisher.add_subscription_callbacks(
            Box::new(move |event: SubscriptionEvent<DiscoveredInstanceInfo>| {
                let mut discovered = discovered.borrow_mut();

                match event {
                    SubscriptionEvent::Added(info) if info.service_type == SERVICE_TYPE => {
                        discovered.insert(info.instance_name.clone(), info);
                    }
                    SubscriptionEvent::Removed(info) if info.service_type == SERVICE_TYPE => {
                        discovered.remove(&info.instance_name);
                    }
                    _ => {}
                }
            }),
            Box::new(|_| {}),
        );

        publisher.subscribe_service(SERVICE_TYPE, None);
        self.subscription = Some(id);
    }

    /// `StopBrowse`.
    pub fn stop_browse(&mut self, publisher: &mut dyn Publisher) {
        if let Some(id) = self.subscription.take() {
            publisher.remove_subscription_callbacks(id);
        }

        self.discovered.borrow_mut().clear();
    }

    pub fn discovered_peers(&self) -> Vec<DiscoveredInstanceInfo> {
        self.discovered.borrow().values().cloned().collect()
    }

    /// `RegisterService`: announces this agent's own SRPL endpoint with the
    /// given opaque TXT payload (replication-protocol specific, opaque to
    /// this module — it is passed through verbatim as a single `data` key,
    /// mirroring the original's raw `aTxtData`/`aTxtLength` pair).
    pub fn register_service(&mut self, instance_name: &str, txt: Vec<u8>, publisher: &mut dyn Publisher) {
        let service = ServiceInstance {
            instance_name: instance_name.to_string(),
            service_type: SERVICE_TYPE.to_string(),
            subtypes: Vec::new(),
            host_name: self.host_name.clone(),
            port: PORT,
            txt: vec![("data".to_string(), raw_string(&txt))],
        };

        self.registered_instance = Some(instance_name.to_string());

        publisher.publish_service(
            service,
            Box::new(|outcome| {
                if outcome != PublishOutcome::Ok {
                    log::warn!("SRPL: failed to register service: {outcome:?}");
                }
            }),
        );
    }

    /// `UnregisterService`.
    pub fn unregister_service(&mut self, publisher: &mut dyn Publisher) {
        if let Some(instance_name) = self.registered_instance.take() {
            publisher.unpublish_service(&instance_name, SERVICE_TYPE, Box::new(|_| {}));
        }
    }
}

fn raw_string(bytes: &[u8]) -> String {
    // As in `border_agent::raw_string`: the TXT transport treats this as an
    // opaque byte sequence, never re-validated as UTF-8.
    unsafe { String::from_utf8_unchecked(bytes.to_vec()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thread_br_mdns::{HostAddresses, KeyPublishCallback, KeyPublishOutcome, PublishCallback, PublisherState};

    #[derive(Default)]
    struct FakePublisher {
        published: Vec<ServiceInstance>,
        unpublished: Vec<(String, String)>,
        subscribed: Vec<String>,
        unsubscribed: Vec<CallbackId>,
        on_instance: Option<Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>>,
        next_id: u64,
    }

    impl Publisher for FakePublisher {
        fn state(&self) -> PublisherState {
            PublisherState::Ready
        }

        fn publish_service(&mut self, instance: ServiceInstance, callback: PublishCallback) {
            self.published.push(instance);
            callback(PublishOutcome::Ok);
        }

        fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: PublishCallback) {
            self.unpublished.push((instance_name.to_string(), service_type.to_string()));
            callback(PublishOutcome::Ok);
        }

        fn publish_host(&mut self, _host_name: &str, _addresses: HostAddresses, callback: PublishCallback) {
            callback(PublishOutcome::Ok);
        }

        fn unpublish_host(&mut self, _host_name: &str, callback: PublishCallback) {
            callback(PublishOutcome::Ok);
        }

        fn publish_key(&mut self, _name: &str, _key: Vec<u8>, callback: KeyPublishCallback) {
            callback(KeyPublishOutcome::Published);
        }

        fn unpublish_key(&mut self, _name: &str, callback: KeyPublishCallback) {
            callback(KeyPublishOutcome::Published);
        }

        fn subscribe_service(&mut self, service_type: &str, _instance: Option<&str>) {
            self.subscribed.push(service_type.to_string());
        }

        fn subscribe_host(&mut self, _host_name: &str) {}

        fn add_subscription_callbacks(
            &mut self,
            on_instance: Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>,
            _on_host: Box<dyn FnMut(SubscriptionEvent<thread_br_mdns::DiscoveredHostInfo>)>,
        ) -> CallbackId {
            self.on_instance = Some(on_instance);
            let id = self.next_id;
            self.next_id += 1;
            CallbackId::from(id)
        }

        fn remove_subscription_callbacks(&mut self, id: CallbackId) {
            self.unsubscribed.push(id);
            self.on_instance = None;
        }
    }

    #[test]
    fn start_browse_subscribes_to_srpl_service_type() {
        let mut srpl = SrplDnssd::new("br1");
        let mut publisher = FakePublisher::default();

        srpl.start_browse(&mut publisher);

        assert!(srpl.is_browsing());
        assert_eq!(publisher.subscribed, vec![SERVICE_TYPE.to_string()]);
    }

    #[test]
    fn discovered_peer_tracked_then_removed() {
        let mut srpl = SrplDnssd::new("br1");
        let mut publisher = FakePublisher::default();
        srpl.start_browse(&mut publisher);

        let info = DiscoveredInstanceInfo {
            instance_name: "peer1".into(),
            service_type: SERVICE_TYPE.into(),
            host_name: "peer1.local.".into(),
            port: PORT,
            txt: vec![],
            addresses: HostAddresses::default(),
        };

        (publisher.on_instance.as_mut().unwrap())(SubscriptionEvent::Added(info.clone()));
        assert_eq!(srpl.discovered_peers().len(), 1);

        (publisher.on_instance.as_mut().unwrap())(SubscriptionEvent::Removed(info));
        assert_eq!(srpl.discovered_peers().len(), 0);
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let mut srpl = SrplDnssd::new("br1");
        let mut publisher = FakePublisher::default();

        srpl.register_service("br1-srpl", vec![1, 2, 3], &mut publisher);
        assert_eq!(publisher.published[0].service_type, SERVICE_TYPE);
        assert_eq!(publisher.published[0].port, PORT);

        srpl.unregister_service(&mut publisher);
        assert_eq!(publisher.unpublished[0].0, "br1-srpl");
    }

    #[test]
    fn stop_browse_releases_subscription_and_clears_discovered() {
        let mut srpl = SrplDnssd::new("br1");
        let mut publisher = FakePublisher::default();
        srpl.start_browse(&mut publisher);

        srpl.stop_browse(&mut publisher);

        assert!(!srpl.is_browsing());
        assert_eq!(publisher.unsubscribed.len(), 1);
    }
}
