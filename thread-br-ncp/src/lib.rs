//! Event loop, timer wheel, NCP transport and NCP controller — the
//! lowest-level components of the Thread Border Router agent core.

pub mod controller;
pub mod error;
pub mod reactor;
pub mod transport;

pub use controller::{BrState, NcpController, NcpState, NetworkState, Role, StateChangedFlags, Value};
pub use error::CoreError;
pub use reactor::{Component, Interest, Readiness, Reactor, TimerHandle, TimerScheduler, TimerWheel};
pub use transport::{Frame, NcpTransport, RadioUrl};
