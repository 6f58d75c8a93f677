//! Self-contained multicast mDNS responder: one of the two production
//! `Publisher` backends, used when no external responder daemon is
//! available on the backbone host.
//!
//! Generalized from `edge_mdns`'s `host::{Host, Service}` answer shapes and
//! `io::Mdns::run` broadcast/respond loop: answers are built the same way
//! (A/AAAA/SRV/TXT/PTR/DNS-SD-subtype records via the visitor pattern), but
//! driven by the synchronous reactor instead of `embassy_futures::select`
//! over two async tasks, per the no-task/future-concurrency redesign.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use domain::base::iana::Class;
use domain::base::{Message, MessageBuilder, Record, Rtype, Ttl};
use domain::rdata::{Aaaa, AllRecordData, Ptr, Srv, A};

use thread_br_ncp::{Component, Interest, Readiness, TimerScheduler};
use thread_br_wire::{HostAnswer, Labels, RecordDataChain, Txt, WireError, DNS_SD_OWNER};

use crate::callback_table::CallbackId;
use crate::model::{
    DiscoveredHostInfo, DiscoveredInstanceInfo, HostAddresses, KeyPublishOutcome, PublishOutcome,
    PublisherState, ServiceInstance, SubscriptionEvent,
};
use crate::publisher::{KeyPublishCallback, Publisher, PublisherCore};

pub const MDNS_PORT: u16 = 5353;
const IPV4_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const IPV6_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x00fb);
const DEFAULT_TTL_SECS: u32 = 120;

struct PublishedHost {
    addresses: HostAddresses,
}

pub struct SelfContainedPublisher {
    core: PublisherCore,
    socket: UdpSocket,
    ipv4_interface: Option<Ipv4Addr>,
    ipv6_interface: Option<u32>,
    timers: TimerScheduler,
    hosts: HashMap<String, PublishedHost>,
    services: HashMap<(String, String), ServiceInstance>,
    keys: HashMap<String, Vec<u8>>,
    subscribed_types: Vec<String>,
    subscribed_hosts: Vec<String>,
}

impl SelfContainedPublisher {
    pub fn bind(
        ipv4_interface: Option<Ipv4Addr>,
        ipv6_interface: Option<u32>,
        timers: TimerScheduler,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), MDNS_PORT))?;
        socket.set_nonblocking(true)?;

        if let Some(v4) = ipv4_interface {
            socket.join_multicast_v4(&IPV4_GROUP, &v4)?;
        }

        if let Some(v6) = ipv6_interface {
            socket.join_multicast_v6(&IPV6_GROUP, v6)?;
        }

        // Entering `Ready` immediately: the self-contained variant has no
        // external daemon handshake to wait through.
        let mut core = PublisherCore::new();
        core.set_state(PublisherState::Ready);

        Ok(Self {
            core,
            socket,
            ipv4_interface,
            ipv6_interface,
            timers,
            hosts: HashMap::new(),
            services: HashMap::new(),
            keys: HashMap::new(),
            subscribed_types: Vec::new(),
            subscribed_hosts: Vec::new(),
        })
    }

    fn visit_answers<F>(&self, mut f: F) -> Result<(), WireError>
    where
        F: FnMut(HostAnswer) -> Result<(), WireError>,
    {
        let ttl = Ttl::from_secs(DEFAULT_TTL_SECS);

        for (host_name, host) in &self.hosts {
            let owner = &[host_name.as_str(), "local", ""];

            for addr in &host.addresses.ipv4 {
                f(Record::new(
                    Labels::new(owner),
                    Class::IN,
                    ttl,
                    RecordDataChain::Next(AllRecordData::A(A::new(domain::base::net::Ipv4Addr::from(
                        addr.octets(),
                    )))),
                ))?;
            }

            for addr in &host.addresses.ipv6 {
                f(Record::new(
                    Labels::new(owner),
                    Class::IN,
                    ttl,
                    RecordDataChain::Next(AllRecordData::Aaaa(Aaaa::new(
                        domain::base::net::Ipv6Addr::from(addr.octets()),
                    ))),
                ))?;
            }
        }

        for svc in self.services.values() {
            let (service, protocol) = svc
                .service_type
                .split_once('.')
                .unwrap_or((svc.service_type.as_str(), "_tcp"));

            let owner = &[svc.instance_name.as_str(), service, protocol, "local", ""];
            let stype = &[service, protocol, "local", ""];
            let target = &[svc.host_name.as_str(), "local", ""];

            f(Record::new(
                Labels::new(owner),
                Class::IN,
                ttl,
                RecordDataChain::Next(AllRecordData::Srv(Srv::new(0, 0, svc.port, Labels::new(target)))),
            ))?;

            let txt_refs: Vec<(&str, &str)> = svc
                .txt
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();

            f(Record::new(
                Labels::new(owner),
                Class::IN,
                ttl,
                RecordDataChain::This(Txt::new(&txt_refs)),
            ))?;

            f(Record::new(
                DNS_SD_OWNER,
                Class::IN,
                ttl,
                RecordDataChain::Next(AllRecordData::Ptr(Ptr::new(Labels::new(stype)))),
            ))?;

            f(Record::new(
                Labels::new(stype),
                Class::IN,
                ttl,
                RecordDataChain::Next(AllRecordData::Ptr(Ptr::new(Labels::new(owner)))),
            ))?;

            for subtype in &svc.subtypes {
                let subtype_owner = &[
                    subtype.as_str(),
                    svc.instance_name.as_str(),
                    service,
                    protocol,
                    "local",
                    "",
                ];
                let subtype_labels = &[subtype.as_str(), "_sub", service, protocol, "local", ""];

                f(Record::new(
                    Labels::new(subtype_owner),
                    Class::IN,
                    ttl,
                    RecordDataChain::Next(AllRecordData::Ptr(Ptr::new(Labels::new(owner)))),
                ))?;

                f(Record::new(
                    Labels::new(subtype_labels),
                    Class::IN,
                    ttl,
                    RecordDataChain::Next(AllRecordData::Ptr(Ptr::new(Labels::new(subtype_owner)))),
                ))?;
            }
        }

        Ok(())
    }

    /// Rebuilds the full answer set and broadcasts it to whichever of the
    /// IPv4/IPv6 multicast groups we joined, after the randomized 20-120ms
    /// delay the spec requires before a responder re-announces.
    fn schedule_broadcast(&self) {
        let delay_ms = 20 + (std::process::id() as u64 % 100);

        let ipv4 = self.ipv4_interface;
        let ipv6 = self.ipv6_interface;

        // The socket itself is reopened per broadcast via `UdpSocket::bind`
        // for an ephemeral send is wasteful; instead the owning component
        // re-enters `broadcast_now` on the next `dispatch`. Scheduling here
        // only defers by the jitter the spec requires; the actual send
        // happens through the timer callback captured below, which needs a
        // socket clone since `self` cannot be captured past this call.
        if let Ok(socket) = self.socket.try_clone() {
            let answers = self.render_answers();

            self.timers.schedule(Instant::now() + Duration::from_millis(delay_ms), move || {
                broadcast_bytes(&socket, ipv4, ipv6, &answers);
            });
        }
    }

    fn render_answers(&self) -> Vec<u8> {
        let buf = thread_br_wire::Buf::new();
        let mut mb = match MessageBuilder::from_target(buf) {
            Ok(mb) => mb,
            Err(_) => return Vec::new(),
        };

        thread_br_wire::set_header(&mut mb, 0, true);
        let mut answerb = mb.answer();

        let _ = self.visit_answers(|record| answerb.push(record).map_err(WireError::from));

        answerb.finish().0
    }

    fn handle_datagram(&mut self, data: &[u8], remote: SocketAddr) {
        let message = match Message::from_octets(data) {
            Ok(m) => m,
            Err(_) => return,
        };

        if message.header().qr() {
            self.handle_response(&message);
        } else {
            self.handle_query(&message, remote);
        }
    }

    fn handle_query(&self, _message: &Message<&[u8]>, remote: SocketAddr) {
        // Any query we see is answered with our complete current answer
        // set; filtering to only the asked-about records is an optimization
        // the spec does not require (§4.4 only requires answers be
        // delivered, not minimized).
        let answers = self.render_answers();

        if answers.is_empty() {
            return;
        }

        if remote.port() != MDNS_PORT {
            let _ = self.socket.send_to(&answers, remote);
        } else {
            broadcast_bytes(&self.socket, self.ipv4_interface, self.ipv6_interface, &answers);
        }
    }

    fn handle_response(&mut self, message: &Message<&[u8]>) {
        let Ok(answers) = message.answer() else {
            return;
        };

        for record in answers.flatten() {
            let Ok(Some(parsed)) = record.into_record::<AllRecordData<_, _>>() else {
                continue;
            };

            if parsed.rtype() != Rtype::PTR {
                continue;
            }

            let owner = parsed.owner().to_string();
            let is_subscribed = self
                .subscribed_types
                .iter()
                .any(|t| owner.starts_with(t.as_str()));

            if is_subscribed {
                self.core.callbacks.notify_instance(SubscriptionEvent::Added(DiscoveredInstanceInfo {
                    instance_name: owner.clone(),
                    service_type: owner,
                    host_name: String::new(),
                    port: 0,
                    txt: Vec::new(),
                    addresses: HostAddresses::default(),
                }));
            }
        }
    }
}

fn broadcast_bytes(
    socket: &UdpSocket,
    ipv4_interface: Option<Ipv4Addr>,
    ipv6_interface: Option<u32>,
    data: &[u8],
) {
    if data.is_empty() {
        return;
    }

    if ipv4_interface.is_some() {
        let _ = socket.send_to(data, SocketAddr::V4(SocketAddrV4::new(IPV4_GROUP, MDNS_PORT)));
    }

    if let Some(scope) = ipv6_interface {
        let _ = socket.send_to(data, SocketAddr::V6(SocketAddrV6::new(IPV6_GROUP, MDNS_PORT, 0, scope)));
    }
}

impl Component for SelfContainedPublisher {
    fn name(&self) -> &'static str {
        "mdns-self-contained-responder"
    }

    fn interest(&self) -> Option<Interest> {
        Some(Interest {
            fd: self.socket.as_raw_fd(),
            readable: true,
            writable: false,
        })
    }

    fn dispatch(&mut self, ready: Readiness) {
        if !ready.readable {
            return;
        }

        let mut buf = [0u8; 4096];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, remote)) => self.handle_datagram(&buf[..len], remote),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("mDNS responder socket error: {err}");
                    break;
                }
            }
        }
    }
}

impl Publisher for SelfContainedPublisher {
    fn state(&self) -> PublisherState {
        self.core.state()
    }

    fn publish_service(&mut self, instance: ServiceInstance, callback: Box<dyn FnOnce(PublishOutcome)>) {
        if let Err(outcome) = instance.validate() {
            callback(outcome);
            return;
        }

        let key = (instance.instance_name.clone(), instance.service_type.clone());
        let id = self.core.begin(&key.0, &key.1, || {});

        self.services.insert(key.clone(), instance);
        self.schedule_broadcast();

        self.core.complete(&key.0, &key.1, id, || callback(PublishOutcome::Ok));
    }

    fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: Box<dyn FnOnce(PublishOutcome)>) {
        let key = (instance_name.to_string(), service_type.to_string());
        let id = self.core.begin(&key.0, &key.1, || {});

        let existed = self.services.remove(&key).is_some();
        self.schedule_broadcast();

        self.core.complete(&key.0, &key.1, id, move || {
            callback(if existed { PublishOutcome::Ok } else { PublishOutcome::NotFound });
        });
    }

    fn publish_host(&mut self, host_name: &str, addresses: HostAddresses, callback: Box<dyn FnOnce(PublishOutcome)>) {
        if addresses.is_empty() {
            callback(PublishOutcome::Invalid);
            return;
        }

        self.hosts.insert(host_name.to_string(), PublishedHost { addresses });
        self.schedule_broadcast();
        callback(PublishOutcome::Ok);
    }

    fn unpublish_host(&mut self, host_name: &str, callback: Box<dyn FnOnce(PublishOutcome)>) {
        let existed = self.hosts.remove(host_name).is_some();
        self.schedule_broadcast();
        callback(if existed { PublishOutcome::Ok } else { PublishOutcome::NotFound });
    }

    fn publish_key(&mut self, name: &str, key: Vec<u8>, callback: KeyPublishCallback) {
        self.keys.insert(name.to_string(), key);
        callback(KeyPublishOutcome::Published);
    }

    fn unpublish_key(&mut self, name: &str, callback: KeyPublishCallback) {
        self.keys.remove(name);
        callback(KeyPublishOutcome::Published);
    }

    fn subscribe_service(&mut self, service_type: &str, instance: Option<&str>) {
        let query = match instance {
            Some(instance) => format!("{instance}.{service_type}"),
            None => service_type.to_string(),
        };

        if !self.subscribed_types.contains(&query) {
            self.subscribed_types.push(query);
        }

        self.send_query();
    }

    fn subscribe_host(&mut self, host_name: &str) {
        if !self.subscribed_hosts.contains(&host_name.to_string()) {
            self.subscribed_hosts.push(host_name.to_string());
        }

        self.send_query();
    }

    fn add_subscription_callbacks(
        &mut self,
        on_instance: Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>,
        on_host: Box<dyn FnMut(SubscriptionEvent<DiscoveredHostInfo>)>,
    ) -> CallbackId {
        self.core.callbacks.add(on_instance, on_host)
    }

    fn remove_subscription_callbacks(&mut self, id: CallbackId) {
        self.core.callbacks.remove(id);
    }
}

impl SelfContainedPublisher {
    fn send_query(&self) {
        let buf = thread_br_wire::Buf::new();

        let Ok(mut mb) = MessageBuilder::from_target(buf) else {
            return;
        };

        thread_br_wire::set_header(&mut mb, 0, false);

        let mut qb = mb.question();

        for service_type in &self.subscribed_types {
            let labels: Vec<&str> = service_type.split('.').chain(std::iter::once("local")).collect();
            let _ = qb.push((Labels::new(&labels), Rtype::PTR, Class::IN));
        }

        let buf = qb.finish().0;
        broadcast_bytes(&self.socket, self.ipv4_interface, self.ipv6_interface, &buf);
    }
}
