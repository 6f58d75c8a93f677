//! Backbone Router (component H, optional): multicast-listener-registration
//! and ND-proxy bookkeeping against the backbone interface.
//!
//! Grounded on `backbone_router/smcroute_manager.{hpp,cpp}`'s `SMCRouteManager`:
//! a listener set plus enable/disable/add/remove, each mutating operation
//! going through `smcroutectl`/`smcrouted` shell invocations. `Flush` runs
//! before every bulk reconfiguration (`Enable`/`Disable`), matching §4.8.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::process::Command;

use thread_br_ncp::CoreError;

/// Runs the shell-level commands the backbone multicast routing daemon
/// exposes. Abstracted behind a trait (rather than calling `Command::new`
/// directly from [`BackboneRouter`]) so tests can swap in a recording fake —
/// spec.md §6.1 scopes the routing daemon itself out as an external
/// collaborator, but the shape of the commands it's driven with is this
/// crate's to own.
pub trait MulticastRouteCommands {
    fn run(&mut self, args: &[String]) -> Result<(), CoreError>;
}

/// Shells out to `smcroutectl`/`smcrouted`, matching `SystemUtils::ExecuteCommand`
/// in the original.
pub struct ShellMulticastRouteCommands;

impl MulticastRouteCommands for ShellMulticastRouteCommands {
    fn run(&mut self, args: &[String]) -> Result<(), CoreError> {
        let (program, rest) = args.split_first().ok_or(CoreError::InvalidArgs)?;

        let status = Command::new(program)
            .args(rest)
            .status()
            .map_err(|_| CoreError::MulticastRouting)?;

        if status.success() {
            Ok(())
        } else {
            Err(CoreError::MulticastRouting)
        }
    }
}

/// The magic admin-scope-and-above multicast group used by `AllowOutboundMulticast`
/// / `ForbidOutboundMulticast` in the original (`0xfff0`, i.e. 65520).
const OUTBOUND_MULTICAST_GROUP: &str = "65520";

/// Maintains the multicast-listener set and the `smcroutectl`-driven route
/// table mirroring it, plus ND-proxy arming for the domain prefix. Installs
/// routes on Primary-entry, tears them down on Primary-exit, matching §4.8.
pub struct BackboneRouter<C: MulticastRouteCommands = ShellMulticastRouteCommands> {
    commands: C,
    thread_ifname: String,
    backbone_ifname: String,
    listeners: BTreeSet<Ipv6Addr>,
    enabled: bool,
    nd_proxy_armed: bool,
}

impl<C: MulticastRouteCommands> BackboneRouter<C> {
    pub fn new(commands: C, thread_ifname: impl Into<String>, backbone_ifname: impl Into<String>) -> Self {
        Self {
            commands,
            thread_ifname: thread_ifname.into(),
            backbone_ifname: backbone_ifname.into(),
            listeners: BTreeSet::new(),
            enabled: false,
            nd_proxy_armed: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn nd_proxy_armed(&self) -> bool {
        self.nd_proxy_armed
    }

    fn flush(&mut self) -> Result<(), CoreError> {
        self.commands.run(&["smcroutectl".into(), "flush".into()])
    }

    fn allow_outbound_multicast(&mut self) -> Result<(), CoreError> {
        let thread_ifname = self.thread_ifname.clone();
        let backbone_ifname = self.backbone_ifname.clone();
        self.commands.run(&[
            "smcroutectl".into(),
            "add".into(),
            thread_ifname,
            "::".into(),
            "::".into(),
            OUTBOUND_MULTICAST_GROUP.into(),
            backbone_ifname,
        ])
    }

    fn forbid_outbound_multicast(&mut self) -> Result<(), CoreError> {
        let thread_ifname = self.thread_ifname.clone();
        let backbone_ifname = self.backbone_ifname.clone();
        self.commands.run(&[
            "smcroutectl".into(),
            "remove".into(),
            thread_ifname,
            "::".into(),
            "::".into(),
            OUTBOUND_MULTICAST_GROUP.into(),
            backbone_ifname,
        ])
    }

    fn add_route(&mut self, address: Ipv6Addr) -> Result<(), CoreError> {
        let backbone_ifname = self.backbone_ifname.clone();
        let thread_ifname = self.thread_ifname.clone();
        self.commands.run(&[
            "smcroutectl".into(),
            "add".into(),
            backbone_ifname,
            "::".into(),
            address.to_string(),
            thread_ifname,
        ])
    }

    fn delete_route(&mut self, address: Ipv6Addr) -> Result<(), CoreError> {
        let backbone_ifname = self.backbone_ifname.clone();
        let thread_ifname = self.thread_ifname.clone();
        self.commands.run(&[
            "smcroutectl".into(),
            "del".into(),
            backbone_ifname,
            "::".into(),
            address.to_string(),
            thread_ifname,
        ])
    }

    /// Called on Primary-entry (§4.8): flushes the table, allows outbound
    /// multicast, then installs a route for every currently-tracked
    /// listener, and arms ND-proxy for the domain prefix.
    pub fn on_primary_entry(&mut self) {
        if self.enabled {
            return;
        }

        self.enabled = true;

        if let Err(err) = self.flush() {
            log::warn!("Backbone Router: flush failed on enable: {err}");
        }

        if let Err(err) = self.allow_outbound_multicast() {
            log::warn!("Backbone Router: failed to allow outbound multicast: {err}");
        }

        let listeners: Vec<Ipv6Addr> = self.listeners.iter().copied().collect();
        for address in listeners {
            if let Err(err) = self.add_route(address) {
                log::warn!("Backbone Router: failed to add route for {address}: {err}");
            }
        }

        self.nd_proxy_armed = true;
    }

    /// Called on Primary-exit (§4.8): tears down every route, forbids
    /// outbound multicast, and disarms ND-proxy.
    pub fn on_primary_exit(&mut self) {
        if !self.enabled {
            return;
        }

        self.enabled = false;

        if let Err(err) = self.flush() {
            log::warn!("Backbone Router: flush failed on disable: {err}");
        }

        let listeners: Vec<Ipv6Addr> = self.listeners.iter().copied().collect();
        for address in listeners {
            if let Err(err) = self.delete_route(address) {
                log::warn!("Backbone Router: failed to delete route for {address}: {err}");
            }
        }

        if let Err(err) = self.forbid_outbound_multicast() {
            log::warn!("Backbone Router: failed to forbid outbound multicast: {err}");
        }

        self.nd_proxy_armed = false;
    }

    /// Adds a multicast listener address. Only touches the route table if
    /// currently enabled; otherwise the address is tracked for the next
    /// `on_primary_entry`.
    pub fn add_listener(&mut self, address: Ipv6Addr) {
        if !self.listeners.insert(address) {
            return;
        }

        if self.enabled {
            if let Err(err) = self.flush().and_then(|_| self.add_route(address)) {
                log::warn!("Backbone Router: failed to add route for {address}: {err}");
            }
        }
    }

    pub fn remove_listener(&mut self, address: Ipv6Addr) {
        if !self.listeners.remove(&address) {
            return;
        }

        if self.enabled {
            if let Err(err) = self.flush().and_then(|_| self.delete_route(address)) {
                log::warn!("Backbone Router: failed to delete route for {address}: {err}");
            }
        }
    }

    pub fn listeners(&self) -> impl Iterator<Item = &Ipv6Addr> {
        self.listeners.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingCommands {
        calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl MulticastRouteCommands for RecordingCommands {
        fn run(&mut self, args: &[String]) -> Result<(), CoreError> {
            self.calls.borrow_mut().push(args.to_vec());
            Ok(())
        }
    }

    fn router() -> (BackboneRouter<RecordingCommands>, Rc<RefCell<Vec<Vec<String>>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let commands = RecordingCommands { calls: calls.clone() };
        (BackboneRouter::new(commands, "wpan0", "eth0"), calls)
    }

    #[test]
    fn primary_entry_flushes_then_allows_then_adds_existing_listeners() {
        let (mut router, calls) = router();
        router.add_listener("ff04::1".parse().unwrap());

        router.on_primary_entry();

        assert!(router.is_enabled());
        assert!(router.nd_proxy_armed());

        let calls = calls.borrow();
        assert_eq!(calls[0][1], "flush");
        assert_eq!(calls[1][1], "add");
        assert_eq!(calls[1][5], "65520");
        assert_eq!(calls[2][1], "add");
        assert_eq!(calls[2][3], "ff04::1");
    }

    #[test]
    fn primary_exit_tears_down_routes_then_forbids_outbound() {
        let (mut router, calls) = router();
        router.add_listener("ff04::1".parse().unwrap());
        router.on_primary_entry();
        calls.borrow_mut().clear();

        router.on_primary_exit();

        assert!(!router.is_enabled());
        assert!(!router.nd_proxy_armed());

        let calls = calls.borrow();
        assert_eq!(calls[0][1], "flush");
        assert_eq!(calls[1][1], "del");
        assert_eq!(calls[2][1], "remove");
    }

    #[test]
    fn listener_added_while_disabled_only_installs_once_enabled() {
        let (mut router, calls) = router();

        router.add_listener("ff04::2".parse().unwrap());
        assert!(calls.borrow().is_empty());

        router.on_primary_entry();
        assert!(calls.borrow().iter().any(|c| c[1] == "add" && c.get(3) == Some(&"ff04::2".to_string())));
    }

    #[test]
    fn re_entering_primary_is_a_no_op() {
        let (mut router, calls) = router();
        router.on_primary_entry();
        let count = calls.borrow().len();

        router.on_primary_entry();
        assert_eq!(calls.borrow().len(), count);
    }
}
