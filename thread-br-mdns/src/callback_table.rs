//! Handle-table based callback dispatch.
//!
//! Source (and the teacher's C-style shim layer) wires callbacks with raw
//! back-pointers between components. Here, every registration gets an
//! integer id and lives in a table the publisher owns; a torn-down
//! subscriber removes its id instead of leaving a dangling pointer for the
//! publisher to call into. This mirrors the composition-over-pointers style
//! `edge_mdns`'s `ChainedHandler`/`ChainedHostAnswers` use, generalized from
//! compile-time chaining to a runtime table since subscribers come and go.

use std::collections::HashMap;

use crate::model::{DiscoveredHostInfo, DiscoveredInstanceInfo, SubscriptionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl From<u64> for CallbackId {
    fn from(id: u64) -> Self {
        CallbackId(id)
    }
}

impl From<CallbackId> for u64 {
    fn from(id: CallbackId) -> Self {
        id.0
    }
}

type InstanceCallback = Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>;
type HostCallback = Box<dyn FnMut(SubscriptionEvent<DiscoveredHostInfo>)>;

struct Entry {
    on_instance: InstanceCallback,
    on_host: HostCallback,
}

#[derive(Default)]
pub struct CallbackTable {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        on_instance: impl FnMut(SubscriptionEvent<DiscoveredInstanceInfo>) + 'static,
        on_host: impl FnMut(SubscriptionEvent<DiscoveredHostInfo>) + 'static,
    ) -> CallbackId {
        let id = self.next_id;
        self.next_id += 1;

        self.entries.insert(
            id,
            Entry {
                on_instance: Box::new(on_instance),
                on_host: Box::new(on_host),
            },
        );

        CallbackId(id)
    }

    pub fn remove(&mut self, id: CallbackId) -> bool {
        self.entries.remove(&id.0).is_some()
    }

    pub fn notify_instance(&mut self, event: SubscriptionEvent<DiscoveredInstanceInfo>) {
        for entry in self.entries.values_mut() {
            (entry.on_instance)(clone_instance_event(&event));
        }
    }

    pub fn notify_host(&mut self, event: SubscriptionEvent<DiscoveredHostInfo>) {
        for entry in self.entries.values_mut() {
            (entry.on_host)(clone_host_event(&event));
        }
    }
}

fn clone_instance_event(
    event: &SubscriptionEvent<DiscoveredInstanceInfo>,
) -> SubscriptionEvent<DiscoveredInstanceInfo> {
    match event {
        SubscriptionEvent::Added(info) => SubscriptionEvent::Added(info.clone()),
        SubscriptionEvent::Removed(info) => SubscriptionEvent::Removed(info.clone()),
    }
}

fn clone_host_event(
    event: &SubscriptionEvent<DiscoveredHostInfo>,
) -> SubscriptionEvent<DiscoveredHostInfo> {
    match event {
        SubscriptionEvent::Added(info) => SubscriptionEvent::Added(info.clone()),
        SubscriptionEvent::Removed(info) => SubscriptionEvent::Removed(info.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_callback_is_not_invoked_again() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let calls = Rc::new(RefCell::new(0));
        let mut table = CallbackTable::new();

        let c = calls.clone();
        let id = table.add(move |_| *c.borrow_mut() += 1, |_| {});

        table.notify_instance(SubscriptionEvent::Added(DiscoveredInstanceInfo {
            instance_name: "a".into(),
            service_type: "_t._tcp".into(),
            host_name: "h".into(),
            port: 1,
            txt: vec![],
            addresses: Default::default(),
        }));

        assert!(table.remove(id));

        table.notify_instance(SubscriptionEvent::Added(DiscoveredInstanceInfo {
            instance_name: "a".into(),
            service_type: "_t._tcp".into(),
            host_name: "h".into(),
            port: 1,
            txt: vec![],
            addresses: Default::default(),
        }));

        assert_eq!(*calls.borrow(), 1);
    }
}
