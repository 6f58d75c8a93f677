//! Discovery Proxy (component G): translates DNS-SD browse/resolve
//! requests the NCP's DNS-SD platform layer issues into mDNS subscriptions
//! against the publisher, and translates discovered results back.
//!
//! Grounded on `mdns/dnssd_plat.{hpp,cpp}`'s `DnssdPlatform` — the single
//! class that mirrors both the register/unregister surface (handled by
//! [`crate::advertising_proxy`] in this split) and the browser/resolver
//! surface this module owns. `RegisterKey`'s `KeyNameFor` name-join rule
//! is reused verbatim for the name-translation boundary described in
//! spec.md §4.7.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::IpAddr;
use std::rc::Rc;

use thread_br_mdns::{CallbackId, DiscoveredHostInfo, DiscoveredInstanceInfo, Publisher, SubscriptionEvent};
use thread_br_ncp::CoreError;

/// The four resolver kinds the NCP's DNS-SD platform layer can request,
/// per spec.md's `ResolverCall` data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverKind {
    ServiceBrowse,
    ServiceResolve,
    HostIpv6,
    HostIpv4,
}

/// What the NCP is told about a discovered service instance, translated
/// from a mDNS [`DiscoveredInstanceInfo`].
#[derive(Debug, Clone)]
pub struct BrowseResult {
    pub instance_name: String,
    pub service_type: String,
    pub host_name: String,
    pub port: u16,
    pub txt: Vec<(String, String)>,
    pub removed: bool,
}

/// What the NCP is told about a discovered host's addresses.
#[derive(Debug, Clone)]
pub struct AddressResult {
    pub host_name: String,
    pub addresses: Vec<IpAddr>,
    pub removed: bool,
}

/// Strips the trailing `.local.` / `.<domain>.` label the mDNS side uses,
/// leaving the unqualified name the NCP's DNS-SD platform layer expects —
/// spec.md §4.7's "fully-qualified ↔ unqualified" boundary rule.
pub fn to_unqualified(fully_qualified: &str) -> String {
    fully_qualified
        .trim_end_matches('.')
        .rsplit_once('.')
        .map(|(head, _domain)| head.to_string())
        .unwrap_or_else(|| fully_qualified.trim_end_matches('.').to_string())
}

/// Appends `.local.` to an unqualified name for use against the mDNS side.
pub fn to_fully_qualified(unqualified: &str) -> String {
    format!("{}.local.", unqualified.trim_end_matches('.'))
}

/// Builds the name a `register_key`/`unregister_key` call synthesises,
/// mirroring `DnssdPlatform::KeyNameFor`: `<name>` alone, or
/// `<name>.<service_type>` when a service type is present.
pub fn key_name_for(name: &str, service_type: Option<&str>) -> String {
    match service_type {
        Some(service_type) => format!("{name}.{service_type}"),
        None => name.to_string(),
    }
}

/// Maps a mDNS-side error onto the platform error taxonomy spec.md §4.7
/// names (`otbr→platform`). Every kind in that table already has an
/// identically-named `CoreError` variant, so the mapping is the identity —
/// kept as an explicit function so the translation boundary stays visible.
pub fn translate_error(err: CoreError) -> CoreError {
    err
}

type BrowseResultHandler = Rc<RefCell<Box<dyn FnMut(BrowseResult)>>>;
type AddressResultHandler = Rc<RefCell<Box<dyn FnMut(AddressResult)>>>;

/// Owns every live browse/resolve/address-resolver subscription, keyed on
/// (kind, query key) so a repeated `start_*` call is a no-op and a
/// `stop_*` call releases exactly the matching one — spec.md §8 scenario 6
/// requires this to happen within the same loop iteration, which holds
/// here since `remove_subscription_callbacks` is synchronous.
pub struct DiscoveryProxy {
    on_browse_result: BrowseResultHandler,
    on_address_result: AddressResultHandler,
    subscriptions: HashMap<(ResolverKind, String), CallbackId>,
}

impl DiscoveryProxy {
    pub fn new(on_browse_result: impl FnMut(BrowseResult) + 'static, on_address_result: impl FnMut(AddressResult) + 'static) -> Self {
        Self {
            on_browse_result: Rc::new(RefCell::new(Box::new(on_browse_result))),
            on_address_result: Rc::new(RefCell::new(Box::new(on_address_result))),
            subscriptions: HashMap::new(),
        }
    }

    /// `start_service_browser` (`instance` is `None`) / `start_service_resolver`
    /// (`instance` is `Some`).
    pub fn start_service_subscription(
        &mut self,
        kind: ResolverKind,
        service_type: &str,
        instance: Option<&str>,
        publisher: &mut dyn Publisher,
    ) {
        debug_assert!(matches!(kind, ResolverKind::ServiceBrowse | ResolverKind::ServiceResolve));

        let dedup_key = (kind, service_type.to_string());
        if self.subscriptions.contains_key(&dedup_key) {
            return;
        }

        let want_type = service_type.to_string();
        let want_instance = instance.map(str::to_string);
        let handler = self.on_browse_result.clone();

        let id = publisher.add_subscription_callbacks(
            Box::new(move |event: SubscriptionEvent<DiscoveredInstanceInfo>| {
                let (info, removed) = match event {
                    SubscriptionEvent::Added(info) => (info, false),
                    SubscriptionEvent::Removed(info) => (info, true),
                };

                if info.service_type != want_type {
                    return;
                }
                if let Some(want_instance) = &want_instance {
                    if &info.instance_name != want_instance {
                        return;
                    }
                }

                (handler.borrow_mut())(BrowseResult {
                    instance_name: info.instance_name,
                    service_type: info.service_type,
                    host_name: info.host_name,
                    port: info.port,
                    txt: info.txt,
                    removed,
                });
            }),
            Box::new(|_event: SubscriptionEvent<DiscoveredHostInfo>| {}),
        );

        publisher.subscribe_service(service_type, instance);
        self.subscriptions.insert(dedup_key, id);
    }

    /// `stop_service_browser` / `stop_service_resolver`.
    pub fn stop_service_subscription(&mut self, kind: ResolverKind, service_type: &str, publisher: &mut dyn Publisher) {
        if let Some(id) = self.subscriptions.remove(&(kind, service_type.to_string())) {
            publisher.remove_subscription_callbacks(id);
        }
    }

    /// `start_address_resolver_v6` / `start_address_resolver_v4`.
    pub fn start_address_subscription(&mut self, kind: ResolverKind, host_name: &str, publisher: &mut dyn Publisher) {
        debug_assert!(matches!(kind, ResolverKind::HostIpv6 | ResolverKind::HostIpv4));

        let dedup_key = (kind, host_name.to_string());
        if self.subscriptions.contains_key(&dedup_key) {
            return;
        }

        let want_v4 = kind == ResolverKind::HostIpv4;
        let want_host = host_name.to_string();
        let handler = self.on_address_result.clone();

        let id = publisher.add_subscription_callbacks(
            Box::new(|_event: SubscriptionEvent<DiscoveredInstanceInfo>| {}),
            Box::new(move |event: SubscriptionEvent<DiscoveredHostInfo>| {
                let (info, removed) = match event {
                    SubscriptionEvent::Added(info) => (info, false),
                    SubscriptionEvent::Removed(info) => (info, true),
                };

                if info.host_name != want_host {
                    return;
                }

                let addresses: Vec<IpAddr> = if want_v4 {
                    info.addresses.ipv4.into_iter().map(IpAddr::V4).collect()
                } else {
                    info.addresses.ipv6.into_iter().map(IpAddr::V6).collect()
                };

                if addresses.is_empty() && !removed {
                    return;
                }

                (handler.borrow_mut())(AddressResult {
                    host_name: info.host_name,
                    addresses,
                    removed,
                });
            }),
        );

        publisher.subscribe_host(host_name);
        self.subscriptions.insert(dedup_key, id);
    }

    /// `stop_address_resolver_v6` / `stop_address_resolver_v4`.
    pub fn stop_address_subscription(&mut self, kind: ResolverKind, host_name: &str, publisher: &mut dyn Publisher) {
        if let Some(id) = self.subscriptions.remove(&(kind, host_name.to_string())) {
            publisher.remove_subscription_callbacks(id);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thread_br_mdns::{HostAddresses, KeyPublishCallback, KeyPublishOutcome, PublishCallback, PublisherState, ServiceInstance};

    struct FakePublisher {
        next_id: u64,
        subscribed_services: Vec<String>,
        subscribed_hosts: Vec<String>,
        unsubscribed: Vec<u64>,
        on_instance: Option<Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>>,
        on_host: Option<Box<dyn FnMut(SubscriptionEvent<DiscoveredHostInfo>)>>,
    }

    impl FakePublisher {
        fn new() -> Self {
            Self {
                next_id: 0,
                subscribed_services: Vec::new(),
                subscribed_hosts: Vec::new(),
                unsubscribed: Vec::new(),
                on_instance: None,
                on_host: None,
            }
        }

        fn fire_instance(&mut self, event: SubscriptionEvent<DiscoveredInstanceInfo>) {
            if let Some(cb) = &mut self.on_instance {
                cb(event);
            }
        }

        fn fire_host(&mut self, event: SubscriptionEvent<DiscoveredHostInfo>) {
            if let Some(cb) = &mut self.on_host {
                cb(event);
            }
        }
    }

    impl Publisher for FakePublisher {
        fn state(&self) -> PublisherState {
            PublisherState::Ready
        }

        fn publish_service(&mut self, _instance: ServiceInstance, _callback: PublishCallback) {}
        fn unpublish_service(&mut self, _instance_name: &str, _service_type: &str, _callback: PublishCallback) {}
        fn publish_host(&mut self, _host_name: &str, _addresses: HostAddresses, _callback: PublishCallback) {}
        fn unpublish_host(&mut self, _host_name: &str, _callback: PublishCallback) {}
        fn publish_key(&mut self, _name: &str, _key: Vec<u8>, callback: KeyPublishCallback) {
            callback(KeyPublishOutcome::Published);
        }
        fn unpublish_key(&mut self, _name: &str, callback: KeyPublishCallback) {
            callback(KeyPublishOutcome::Published);
        }

        fn subscribe_service(&mut self, service_type: &str, _instance: Option<&str>) {
            self.subscribed_services.push(service_type.to_string());
        }

        fn subscribe_host(&mut self, host_name: &str) {
            self.subscribed_hosts.push(host_name.to_string());
        }

        fn add_subscription_callbacks(
            &mut self,
            on_instance: Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>,
            on_host: Box<dyn FnMut(SubscriptionEvent<DiscoveredHostInfo>)>,
        ) -> CallbackId {
            self.on_instance = Some(on_instance);
            self.on_host = Some(on_host);
            let id = self.next_id;
            self.next_id += 1;
            CallbackId::from(id)
        }

        fn remove_subscription_callbacks(&mut self, id: CallbackId) {
            self.unsubscribed.push(id.into());
            self.on_instance = None;
            self.on_host = None;
        }
    }

    #[test]
    fn unqualified_strips_domain_label() {
        assert_eq!(to_unqualified("myinstance._http._tcp.local."), "myinstance._http._tcp");
    }

    #[test]
    fn fully_qualified_appends_local() {
        assert_eq!(to_fully_qualified("_http._tcp"), "_http._tcp.local.");
    }

    #[test]
    fn key_name_joins_service_type_when_present() {
        assert_eq!(key_name_for("host", Some("_meshcop._udp")), "host._meshcop._udp");
        assert_eq!(key_name_for("host", None), "host");
    }

    #[test]
    fn error_translation_is_identity_for_shared_taxonomy() {
        assert_eq!(translate_error(CoreError::Aborted), CoreError::Aborted);
        assert_eq!(translate_error(CoreError::NotFound), CoreError::NotFound);
    }

    #[test]
    fn browse_forwards_only_matching_service_type() {
        let results = Rc::new(RefCell::new(Vec::new()));
        let r = results.clone();

        let mut proxy = DiscoveryProxy::new(move |result| r.borrow_mut().push(result), |_| {});
        let mut publisher = FakePublisher::new();

        proxy.start_service_subscription(ResolverKind::ServiceBrowse, "_http._tcp", None, &mut publisher);
        assert_eq!(publisher.subscribed_services, vec!["_http._tcp".to_string()]);

        publisher.fire_instance(SubscriptionEvent::Added(DiscoveredInstanceInfo {
            instance_name: "printer".into(),
            service_type: "_ipp._tcp".into(),
            host_name: "printer.local.".into(),
            port: 631,
            txt: vec![],
            addresses: HostAddresses::default(),
        }));
        assert!(results.borrow().is_empty());

        publisher.fire_instance(SubscriptionEvent::Added(DiscoveredInstanceInfo {
            instance_name: "web".into(),
            service_type: "_http._tcp".into(),
            host_name: "web.local.".into(),
            port: 80,
            txt: vec![],
            addresses: HostAddresses::default(),
        }));
        assert_eq!(results.borrow().len(), 1);
        assert_eq!(results.borrow()[0].instance_name, "web");
    }

    #[test]
    fn stop_releases_the_matching_subscription() {
        let mut proxy = DiscoveryProxy::new(|_| {}, |_| {});
        let mut publisher = FakePublisher::new();

        proxy.start_service_subscription(ResolverKind::ServiceBrowse, "_http._tcp", None, &mut publisher);
        assert_eq!(proxy.subscription_count(), 1);

        proxy.stop_service_subscription(ResolverKind::ServiceBrowse, "_http._tcp", &mut publisher);
        assert_eq!(proxy.subscription_count(), 0);
        assert_eq!(publisher.unsubscribed.len(), 1);
    }

    #[test]
    fn address_resolver_v6_ignores_v4_addresses_and_empty_additions() {
        let results = Rc::new(RefCell::new(Vec::new()));
        let r = results.clone();

        let mut proxy = DiscoveryProxy::new(|_| {}, move |result| r.borrow_mut().push(result));
        let mut publisher = FakePublisher::new();

        proxy.start_address_subscription(ResolverKind::HostIpv6, "router.local.", &mut publisher);

        publisher.fire_host(SubscriptionEvent::Added(DiscoveredHostInfo {
            host_name: "router.local.".into(),
            addresses: HostAddresses { ipv4: vec!["10.0.0.1".parse().unwrap()], ipv6: vec![] },
        }));
        assert!(results.borrow().is_empty());

        publisher.fire_host(SubscriptionEvent::Added(DiscoveredHostInfo {
            host_name: "router.local.".into(),
            addresses: HostAddresses { ipv4: vec![], ipv6: vec!["fd00::1".parse().unwrap()] },
        }));
        assert_eq!(results.borrow().len(), 1);
    }

    #[test]
    fn duplicate_start_is_a_no_op() {
        let mut proxy = DiscoveryProxy::new(|_| {}, |_| {});
        let mut publisher = FakePublisher::new();

        proxy.start_service_subscription(ResolverKind::ServiceBrowse, "_http._tcp", None, &mut publisher);
        proxy.start_service_subscription(ResolverKind::ServiceBrowse, "_http._tcp", None, &mut publisher);

        assert_eq!(publisher.subscribed_services.len(), 1);
    }
}
