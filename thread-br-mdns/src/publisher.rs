//! The mDNS publisher abstraction (component D): polymorphic over concrete
//! responders, idempotent publish/unpublish, FIFO-ordered completions per
//! (instance, type) key, and add/remove browse & resolve subscriptions.

use std::collections::HashMap;

use crate::callback_table::{CallbackId, CallbackTable};
use crate::model::{
    DiscoveredHostInfo, DiscoveredInstanceInfo, HostAddresses, KeyPublishOutcome, PublishOutcome,
    PublisherState, ServiceInstance, SubscriptionEvent,
};

pub type PublishCallback = Box<dyn FnOnce(PublishOutcome)>;
pub type KeyPublishCallback = Box<dyn FnOnce(KeyPublishOutcome)>;

/// The publisher interface every proxy (Border Agent, Advertising Proxy,
/// Discovery Proxy) talks to. Two production variants exist: one backed by
/// an external responder daemon (Avahi/mDNSResponder-style), one
/// self-contained (see [`crate::responder::SelfContainedPublisher`]).
/// Neither variant leaks daemon-specific error codes past this boundary.
pub trait Publisher {
    fn state(&self) -> PublisherState;

    /// Idempotent: a second call for the same (instance, type) replaces the
    /// record and, per the FIFO-ordering invariant, aborts whichever prior
    /// call for that key had not yet completed.
    fn publish_service(&mut self, instance: ServiceInstance, callback: PublishCallback);
    fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: PublishCallback);

    fn publish_host(&mut self, host_name: &str, addresses: HostAddresses, callback: PublishCallback);
    fn unpublish_host(&mut self, host_name: &str, callback: PublishCallback);

    fn publish_key(&mut self, name: &str, key: Vec<u8>, callback: KeyPublishCallback);
    fn unpublish_key(&mut self, name: &str, callback: KeyPublishCallback);

    fn subscribe_service(&mut self, service_type: &str, instance: Option<&str>);
    fn subscribe_host(&mut self, host_name: &str);

    fn add_subscription_callbacks(
        &mut self,
        on_instance: Box<dyn FnMut(SubscriptionEvent<DiscoveredInstanceInfo>)>,
        on_host: Box<dyn FnMut(SubscriptionEvent<DiscoveredHostInfo>)>,
    ) -> CallbackId;
    fn remove_subscription_callbacks(&mut self, id: CallbackId);
}

/// Shared plumbing every `Publisher` backend is built on: the FIFO/supersede
/// bookkeeping per (instance, type) key, the `Idle`/`Ready` state machine
/// with deferred-delivery queueing, and the subscription callback table.
///
/// A backend embeds this, drives the actual wire protocol itself, and calls
/// back into these helpers at the right points (`begin_publish`,
/// `complete_publish`, `set_state`).
pub struct PublisherCore {
    state: PublisherState,
    state_listeners: Vec<Box<dyn FnMut(PublisherState)>>,
    next_op_id: u64,
    current_op: HashMap<String, u64>,
    deferred: Vec<Box<dyn FnOnce(&mut PublisherCore)>>,
    pub callbacks: CallbackTable,
}

impl Default for PublisherCore {
    fn default() -> Self {
        Self {
            state: PublisherState::Idle,
            state_listeners: Vec::new(),
            next_op_id: 0,
            current_op: HashMap::new(),
            deferred: Vec::new(),
            callbacks: CallbackTable::new(),
        }
    }
}

fn publish_key(instance_name: &str, service_type: &str) -> String {
    format!("{instance_name}|{service_type}")
}

impl PublisherCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn add_state_listener(&mut self, listener: impl FnMut(PublisherState) + 'static) {
        self.state_listeners.push(Box::new(listener));
    }

    /// Registers the start of a publish/unpublish for `key`. If a previous
    /// operation for the same key is still outstanding, its callback is
    /// invoked with `Aborted` immediately — it has been superseded. Returns
    /// the id this new operation must present to [`PublisherCore::complete`]
    /// for its completion to actually run.
    pub fn begin(&mut self, instance_name: &str, service_type: &str, abort: impl FnOnce()) -> u64 {
        let key = publish_key(instance_name, service_type);
        let id = self.next_op_id;
        self.next_op_id += 1;

        if self.current_op.insert(key, id).is_some() {
            abort();
        }

        id
    }

    /// Runs `completion` only if `id` is still the current operation for
    /// `key` (i.e. it was not superseded before it finished).
    pub fn complete(&mut self, instance_name: &str, service_type: &str, id: u64, completion: impl FnOnce()) {
        let key = publish_key(instance_name, service_type);

        if self.current_op.get(&key) == Some(&id) {
            self.current_op.remove(&key);
            completion();
        }
    }

    /// Queues `action` if the publisher is `Idle`, runs it immediately if
    /// `Ready`.
    pub fn run_when_ready(&mut self, action: impl FnOnce(&mut PublisherCore) + 'static) {
        if self.state == PublisherState::Ready {
            action(self);
        } else {
            self.deferred.push(Box::new(action));
        }
    }

    pub fn set_state(&mut self, state: PublisherState) {
        if self.state == state {
            return;
        }

        self.state = state;

        for listener in &mut self.state_listeners {
            listener(state);
        }

        if state == PublisherState::Ready {
            let deferred = std::mem::take(&mut self.deferred);

            for action in deferred {
                action(self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn second_publish_for_same_key_aborts_the_first() {
        let mut core = PublisherCore::new();
        let aborted = Rc::new(RefCell::new(false));

        let _first = core.begin("dev1", "_ipps._tcp", || {});

        let a = aborted.clone();
        let _second = core.begin("dev1", "_ipps._tcp", move || *a.borrow_mut() = true);

        assert!(*aborted.borrow());
    }

    #[test]
    fn completion_for_superseded_id_is_a_no_op() {
        let mut core = PublisherCore::new();
        let ran = Rc::new(RefCell::new(0));

        let first = core.begin("dev1", "_ipps._tcp", || {});
        let _second = core.begin("dev1", "_ipps._tcp", || {});

        let r = ran.clone();
        core.complete("dev1", "_ipps._tcp", first, move || *r.borrow_mut() += 1);

        assert_eq!(*ran.borrow(), 0);
    }

    #[test]
    fn ready_runs_deferred_work_queued_while_idle() {
        let mut core = PublisherCore::new();
        let ran = Rc::new(RefCell::new(false));

        let r = ran.clone();
        core.run_when_ready(move |_| *r.borrow_mut() = true);
        assert!(!*ran.borrow());

        core.set_state(PublisherState::Ready);
        assert!(*ran.borrow());
    }
}
