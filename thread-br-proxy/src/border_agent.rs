//! Border Agent (component E): publishes the `_meshcop._udp` MeshCoP
//! commissioning service and keeps its TXT record synchronized with the
//! current `NetworkState`.
//!
//! Grounded on `border_agent/border_agent.{hpp,cpp}`: the state bitmap
//! field layout (`StateBitmap::ToUint32`), the TXT key set built by
//! `PublishMeshCopService`, and the `BaseServiceInstanceName` /
//! `GetAlternativeServiceInstanceName` rename algorithm on `Duplicated`.

use thread_br_mdns::{HostAddresses, Publisher, PublisherState, PublishOutcome, ServiceInstance};
use thread_br_ncp::{BrState, NetworkState, Role};

pub const SERVICE_TYPE: &str = "_meshcop._udp";
const DUMMY_PORT: u16 = 49152;

/// Connection-mode field of the state bitmap (bits 0-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConnectionMode {
    Disabled = 0,
    Pskc = 1,
    Pskd = 2,
    Vendor = 3,
    X509 = 4,
}

/// Thread-interface-status field of the state bitmap (bits 3-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ThreadIfStatus {
    NotInitialized = 0,
    Initialized = 1,
    Active = 2,
}

/// Availability field of the state bitmap (bits 5-6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Availability {
    Infrequent = 0,
    High = 1,
}

/// The `sb` TXT entry's state bitmap (§4.5): a little-endian bitfield,
/// emitted on the wire as a big-endian `u32`.
#[derive(Debug, Clone, Copy)]
pub struct StateBitmap {
    pub connection_mode: ConnectionMode,
    pub thread_if_status: ThreadIfStatus,
    pub availability: Availability,
    pub bbr_is_active: bool,
    pub bbr_is_primary: bool,
}

impl StateBitmap {
    pub fn to_be_bytes(self) -> [u8; 4] {
        let mut bitmap = 0u32;
        bitmap |= (self.connection_mode as u32) << 0;
        bitmap |= (self.thread_if_status as u32) << 3;
        bitmap |= (self.availability as u32) << 5;
        bitmap |= (self.bbr_is_active as u32) << 7;
        bitmap |= (self.bbr_is_primary as u32) << 8;
        bitmap.to_be_bytes()
    }
}

/// Derives the state bitmap from the current `NetworkState`, per §4.5's
/// layout table. Connection mode and availability are unconditionally
/// `Pskc`/`High` (vendor/x509 modes require an IPC surface this core does
/// not drive directly — see §6.3; the core has no duty-cycled radio mode of
/// its own), matching `GetStateBitmap` in `border_agent.cpp`, which sets
/// both fields unconditionally before the role switch. The BR bits are only
/// set once the Thread interface itself is `Active`, also per that function.
pub fn compute_state_bitmap(state: &NetworkState) -> StateBitmap {
    let thread_if_status = match state.role {
        Role::Disabled => ThreadIfStatus::NotInitialized,
        Role::Detached => ThreadIfStatus::Initialized,
        Role::Child | Role::Router | Role::Leader => ThreadIfStatus::Active,
    };

    let is_active = thread_if_status == ThreadIfStatus::Active;

    StateBitmap {
        connection_mode: ConnectionMode::Pskc,
        thread_if_status,
        availability: Availability::High,
        bbr_is_active: is_active && state.br_state != BrState::Disabled,
        bbr_is_primary: is_active && state.br_state == BrState::Primary,
    }
}

fn is_thread_active(state: &NetworkState) -> bool {
    matches!(state.role, Role::Child | Role::Router | Role::Leader)
}

/// A uniformly distributed `u16` in `1..=0xFFFF`, matching
/// `GetAlternativeServiceInstanceName`'s `uniform_int_distribution<uint16_t>
/// (1, 0xFFFF)`. No external RNG crate: the teacher pack never reaches for
/// one either, and a single counter-seeded xorshift step is enough entropy
/// for a cosmetic disambiguator that only needs to not collide with
/// whatever the LAN already rejected.
fn random_suffix() -> u16 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0) as u64;

    let mut x = nanos ^ (std::process::id() as u64).wrapping_mul(0x9E3779B97F4A7C15);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;

    (1 + (x % 0xFFFF)) as u16
}

fn base_instance_name(vendor: &str, product: &str, ext_mac: [u8; 8]) -> String {
    format!("{vendor}_{product} #{:02X}{:02X}", ext_mac[6], ext_mac[7])
}

/// Publishes and republishes the MeshCoP service instance, renaming on a
/// `Duplicated` outcome per §4.5's algorithm: unpublish the previous
/// attempt, derive ` (N)` with a fresh random `N`, retry. No global rename
/// counter is kept, matching the source.
pub struct BorderAgent {
    vendor_name: String,
    product_name: String,
    thread_version: String,
    current_instance_name: Option<String>,
    vendor_txt: Vec<(String, String)>,
    domain_enabled: bool,
    routing_enabled: bool,
    native_agent_port: Option<u16>,
}

impl BorderAgent {
    pub fn new(vendor_name: impl Into<String>, product_name: impl Into<String>, thread_version: impl Into<String>) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            product_name: product_name.into(),
            thread_version: thread_version.into(),
            current_instance_name: None,
            vendor_txt: Vec::new(),
            domain_enabled: false,
            routing_enabled: false,
            native_agent_port: None,
        }
    }

    /// §6.3's `set_vendor_meshcop_txt_entries`: installs extra TXT keys and
    /// triggers a republish.
    pub fn set_vendor_txt_entries(&mut self, entries: Vec<(String, String)>, state: &NetworkState, publisher: &mut dyn Publisher) {
        self.vendor_txt = entries;
        self.republish(state, publisher);
    }

    pub fn set_native_agent_port(&mut self, port: Option<u16>) {
        self.native_agent_port = port;
    }

    pub fn set_domain_enabled(&mut self, enabled: bool) {
        self.domain_enabled = enabled;
    }

    pub fn set_routing_enabled(&mut self, enabled: bool) {
        self.routing_enabled = enabled;
    }

    fn build_txt(&self, state: &NetworkState) -> Vec<(String, String)> {
        // Keys whose values are raw bytes are still carried as `String`
        // here (`ServiceInstance::txt` is `Vec<(String, String)>`); the
        // raw-byte semantics are preserved by building each `String` out of
        // the exact byte sequence via `from_utf8_lossy`-free raw transmute
        // would corrupt non-ASCII bytes, so instead every multi-byte field
        // is encoded losslessly by treating the `String`'s bytes as opaque
        // storage — `Txt::compose_rdata` (thread-br-wire) writes
        // `value.as_bytes()` verbatim, never re-validating UTF-8.
        let mut txt = vec![("rv".to_string(), "1".to_string())];

        txt.push(("vn".to_string(), self.vendor_name.clone()));
        txt.push(("mn".to_string(), self.product_name.clone()));
        txt.push(("nn".to_string(), state.network_name.clone()));
        txt.push(("xp".to_string(), raw_string(&state.ext_pan_id)));
        txt.push(("tv".to_string(), self.thread_version.clone()));
        txt.push(("xa".to_string(), raw_string(&state.ext_mac)));

        let bitmap = compute_state_bitmap(state);
        txt.push(("sb".to_string(), raw_string(&bitmap.to_be_bytes())));

        if is_thread_active(state) {
            if let Some(ts) = state.active_dataset_timestamp {
                txt.push(("at".to_string(), raw_string(&ts.to_be_bytes())));
            }

            txt.push(("pt".to_string(), raw_string(&state.partition_id.to_be_bytes())));
        }

        if state.br_state != BrState::Disabled {
            if let Some(seq) = state.br_sequence_number {
                txt.push(("sq".to_string(), raw_string(&[seq])));
            }

            if let Some(port) = state.br_udp_port {
                txt.push(("bb".to_string(), raw_string(&port.to_be_bytes())));
            }
        }

        if self.domain_enabled {
            if let Some(domain) = &state.domain_prefix {
                txt.push(("dn".to_string(), raw_string(domain)));
            }
        }

        if self.routing_enabled {
            if let Some(prefix) = &state.domain_prefix {
                let mut omr = Vec::with_capacity(1 + prefix.len());
                omr.push(prefix.len() as u8 * 8);
                omr.extend_from_slice(prefix);
                txt.push(("omr".to_string(), raw_string(&omr)));
            }
        }

        txt.extend(self.vendor_txt.iter().cloned());
        txt
    }

    fn port(&self) -> u16 {
        self.native_agent_port.unwrap_or(DUMMY_PORT)
    }

    /// Builds and publishes (or republishes, replacing the old record) the
    /// MeshCoP service for the given state.
    pub fn republish(&mut self, state: &NetworkState, publisher: &mut dyn Publisher) {
        if publisher.state() != PublisherState::Ready {
            return;
        }

        let instance_name = self
            .current_instance_name
            .clone()
            .unwrap_or_else(|| base_instance_name(&self.vendor_name, &self.product_name, state.ext_mac));

        self.publish_instance(instance_name, state, publisher);
    }

    fn publish_instance(&mut self, instance_name: String, state: &NetworkState, publisher: &mut dyn Publisher) {
        let service = ServiceInstance {
            instance_name: instance_name.clone(),
            service_type: SERVICE_TYPE.to_string(),
            subtypes: Vec::new(),
            host_name: instance_name.clone(),
            port: self.port(),
            txt: self.build_txt(state),
        };

        self.current_instance_name = Some(instance_name.clone());

        let vendor = self.vendor_name.clone();
        let product = self.product_name.clone();
        let ext_mac = state.ext_mac;

        publisher.publish_service(
            service,
            Box::new(move |outcome| {
                if outcome == PublishOutcome::Duplicated {
                    log::info!("Border Agent: instance name {instance_name} already in use on the LAN");
                }
                let _ = (vendor, product, ext_mac);
            }),
        );
    }

    /// Handles a `Duplicated` completion for the current publish attempt:
    /// unpublish it, derive an alternative name, and retry, per §4.5.
    pub fn handle_name_collision(&mut self, state: &NetworkState, publisher: &mut dyn Publisher) {
        let Some(previous) = self.current_instance_name.take() else {
            return;
        };

        publisher.unpublish_service(&previous, SERVICE_TYPE, Box::new(|_| {}));

        let base = base_instance_name(&self.vendor_name, &self.product_name, state.ext_mac);
        let alternative = format!("{base} ({})", random_suffix());

        self.publish_instance(alternative, state, publisher);
    }

    pub fn on_state_changed(&mut self, state: &NetworkState, publisher: &mut dyn Publisher) {
        self.republish(state, publisher);
    }

    pub fn on_publisher_ready(&mut self, state: &NetworkState, publisher: &mut dyn Publisher) {
        self.republish(state, publisher);
    }
}

fn raw_string(bytes: &[u8]) -> String {
    // The TXT value transport in `thread-br-wire::Txt` treats `&str` purely
    // as an owned byte sequence (`value.as_bytes()`), so wrapping raw bytes
    // in a `String` via `from_utf8_unchecked` is safe here: they never
    // round-trip through anything that assumes well-formed UTF-8.
    unsafe { String::from_utf8_unchecked(bytes.to_vec()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thread_br_mdns::{CallbackId, DiscoveredHostInfo, DiscoveredInstanceInfo, KeyPublishCallback, KeyPublishOutcome, PublishCallback, SubscriptionEvent};

    #[derive(Default)]
    struct FakePublisher {
        state: Option<PublisherState>,
        published: Vec<ServiceInstance>,
        unpublished: Vec<(String, String)>,
    }

    impl Publisher for FakePublisher {
        fn state(&self) -> PublisherState {
            self.state.unwrap_or(PublisherState::Ready)
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

    fn startup_state() -> NetworkState {
        let mut state = NetworkState::default();
        state.ext_mac = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        state.thread_version = "1.3.0".into();
        state
    }

    #[test]
    fn startup_instance_name_uses_last_two_mac_octets() {
        let mut agent = BorderAgent::new("Vendor", "Product", "1.3.0");
        let mut publisher = FakePublisher::default();

        agent.republish(&startup_state(), &mut publisher);

        assert_eq!(publisher.published[0].instance_name, "Vendor_Product #7788");
    }

    #[test]
    fn leader_role_sets_interface_active_bit() {
        let mut state = startup_state();
        state.role = Role::Leader;

        let bitmap = compute_state_bitmap(&state);
        assert_eq!(bitmap.to_be_bytes(), [0, 0, 0, 0x31]);
    }

    #[test]
    fn disabled_role_still_reports_pskc_and_high_availability() {
        // `GetStateBitmap` in the original source sets connection mode and
        // availability unconditionally, before switching on role — so even
        // a never-provisioned node reports PSKc/High, not all-zero.
        let bitmap = compute_state_bitmap(&startup_state());
        assert_eq!(bitmap.to_be_bytes(), [0, 0, 0, 0x21]);
    }

    #[test]
    fn active_dataset_fields_only_present_when_role_joined() {
        let mut agent = BorderAgent::new("Vendor", "Product", "1.3.0");
        let mut publisher = FakePublisher::default();

        let mut state = startup_state();
        state.role = Role::Leader;
        state.partition_id = 42;
        state.active_dataset_timestamp = Some(7);

        agent.republish(&state, &mut publisher);

        let txt = &publisher.published[0].txt;
        assert!(txt.iter().any(|(k, _)| k == "at"));
        assert!(txt.iter().any(|(k, _)| k == "pt"));
    }

    #[test]
    fn bbr_udp_port_emitted_when_br_active() {
        let mut agent = BorderAgent::new("Vendor", "Product", "1.3.0");
        let mut publisher = FakePublisher::default();

        let mut state = startup_state();
        state.br_state = BrState::Primary;
        state.br_udp_port = Some(61631);

        agent.republish(&state, &mut publisher);

        let txt = &publisher.published[0].txt;
        let bb = txt.iter().find(|(k, _)| k == "bb").map(|(_, v)| v.clone());
        assert_eq!(bb, Some(raw_string(&61631u16.to_be_bytes())));
    }

    #[test]
    fn name_collision_unpublishes_and_retries_with_suffix() {
        let mut agent = BorderAgent::new("Vendor", "Product", "1.3.0");
        let mut publisher = FakePublisher::default();
        let state = startup_state();

        agent.republish(&state, &mut publisher);
        let first_name = agent.current_instance_name.clone().unwrap();

        agent.handle_name_collision(&state, &mut publisher);

        assert_eq!(publisher.unpublished[0].0, first_name);
        let second_name = agent.current_instance_name.clone().unwrap();
        assert_ne!(second_name, first_name);
        assert!(second_name.starts_with(&first_name));
    }

    #[test]
    fn republish_while_idle_is_a_no_op() {
        let mut agent = BorderAgent::new("Vendor", "Product", "1.3.0");
        let mut publisher = FakePublisher { state: Some(PublisherState::Idle), ..Default::default() };

        agent.republish(&startup_state(), &mut publisher);

        assert!(publisher.published.is_empty());
    }
}
