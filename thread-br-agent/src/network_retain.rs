//! Network-retain hook (§6.4): an optional shell-level sub-process this
//! agent stdins a single `S`/`R`/`E` character to, on join/commission
//! success, initialising→offline, and joined→offline transitions
//! respectively, so an out-of-band script can persist (or discard) the
//! datasets the NCP would otherwise lose on restart.
//!
//! Grounded on `agent/main.cpp` / `NetworkRetain`'s sub-process-with-stdin
//! shape, the same pattern `thread_br_ncp::transport::NcpTransport` uses
//! for its own subprocess `RadioUrl` variant.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use thread_br_ncp::{BrState, NetworkState, NcpState, Role, StateChangedFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Save,
    Recall,
    Erase,
}

impl Event {
    fn byte(self) -> u8 {
        match self {
            Event::Save => b'S',
            Event::Recall => b'R',
            Event::Erase => b'E',
        }
    }
}

/// Owns the configured hook command and the previous NCP/role state needed
/// to detect the three triggering transitions.
pub struct NetworkRetain {
    command: Option<Vec<String>>,
    last_ncp_state: NcpState,
    was_joined: bool,
}

impl NetworkRetain {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self {
            command,
            last_ncp_state: NcpState::Uninitialized,
            was_joined: false,
        }
    }

    /// Called exactly once, right after `NcpController::init()` succeeds —
    /// the one point where the NCP lifecycle state deterministically
    /// transitions out of `Uninitialized` into `Offline`, i.e. the
    /// "initialising→offline" edge.
    pub fn on_initialised(&mut self) {
        if self.last_ncp_state == NcpState::Uninitialized {
            self.run(Event::Recall);
            self.last_ncp_state = NcpState::Offline;
        }
    }

    /// Invoked from the controller's state-changed fan-out; tracks
    /// join/commission success (role entering `Child`/`Router`/`Leader`, or
    /// BR state becoming active) and fires "save" on the rising edge,
    /// "erase" on the falling edge back to fully disabled.
    pub fn on_state_changed(&mut self, state: &NetworkState, flags: StateChangedFlags) {
        if !flags.contains(StateChangedFlags::ROLE) {
            return;
        }

        let joined = matches!(state.role, Role::Child | Role::Router | Role::Leader)
            || state.br_state != BrState::Disabled;

        if joined && !self.was_joined {
            self.run(Event::Save);
        } else if !joined && self.was_joined {
            self.run(Event::Erase);
        }

        self.was_joined = joined;
    }

    fn run(&mut self, event: Event) {
        let Some(command) = &self.command else {
            return;
        };

        let Some((program, args)) = command.split_first() else {
            return;
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match child {
            Ok(mut child) => {
                if let Err(err) = write_and_close(&mut child, event.byte()) {
                    log::warn!("network-retain hook failed: {err}");
                }
            }
            Err(err) => log::warn!("failed to spawn network-retain hook: {err}"),
        }
    }
}

fn write_and_close(child: &mut Child, byte: u8) -> std::io::Result<()> {
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(&[byte])?;
    }

    child.stdin = None;
    child.wait()?;
    Ok(())
}
