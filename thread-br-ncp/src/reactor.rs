//! Single-threaded cooperative event loop and deadline-ordered timer wheel.
//!
//! Redesigned from the original `select()` + `fd_set` mainloop to use the
//! `polling` crate directly — the same readiness primitive the teacher's own
//! `async-io`-backed std network stack wraps — rather than reaching for an
//! async executor. Scheduling stays single-threaded and cooperative: there is
//! exactly one suspension point per iteration, the call to `Poller::wait`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use polling::{Event, Events, Poller};

use crate::error::CoreError;

/// The platform never waits longer than this between iterations, regardless
/// of how far out the next timer is.
const PLATFORM_MAX_WAIT: Duration = Duration::from_secs(10);
/// Once this many consecutive iterations have woken with a zero timeout, the
/// minimum wait is clamped upward so the loop can't busy-spin indefinitely.
const THRASH_CLAMP_STREAK: u32 = 200;
const THRASH_CLAMP_MIN_WAIT: Duration = Duration::from_millis(10);
/// Past this many consecutive zero-timeout iterations, something downstream
/// is stuck rescheduling itself with no progress; treat it as fatal rather
/// than spin forever.
const THRASH_ABORT_STREAK: u32 = 1000;

/// What a [`Component`] wants the reactor to poll for readiness on this
/// iteration.
#[derive(Debug, Clone, Copy)]
pub struct Interest {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// What came back for a component's registered interest (or all-`false` if
/// it registered none, or the iteration fired on a timer/timeout instead).
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// One of the fixed-order participants the reactor dispatches to every
/// iteration: NCP transport, Backbone Router, mDNS publisher, SRP/Discovery
/// proxies, IPC surfaces.
pub trait Component {
    fn name(&self) -> &'static str;

    /// The descriptor (if any) this component wants polled this iteration.
    fn interest(&self) -> Option<Interest> {
        None
    }

    /// An upper bound this component wants placed on the next wait, if any
    /// (e.g. "I have a request that will time out in 3400ms").
    fn poll_timeout(&self) -> Option<Duration> {
        None
    }

    /// Called once per iteration, whether or not this component's interest
    /// (if it registered one) became ready.
    fn dispatch(&mut self, ready: Readiness);
}

/// A handle returned by [`TimerWheel::schedule`], usable to cancel the task
/// before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

struct TimerEntry {
    id: u64,
    fire_at: Instant,
    action: Box<dyn FnOnce() + 'static>,
}

/// A deadline-ordered queue of nullary actions. Entries with equal fire-times
/// run in the order they were scheduled; a cancelled entry never runs.
#[derive(Default)]
pub struct TimerWheel {
    next_id: u64,
    // Kept sorted by (fire_at, id). Timer churn is low (one per in-flight
    // NCP request / republish debounce), so a sorted Vec beats a heap's
    // extra bookkeeping for cancellation.
    entries: Vec<TimerEntry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&mut self, fire_at: Instant, action: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let pos = self
            .entries
            .partition_point(|e| (e.fire_at, e.id) <= (fire_at, id));

        self.entries.insert(
            pos,
            TimerEntry {
                id,
                fire_at,
                action: Box::new(action),
            },
        );

        TimerHandle(id)
    }

    /// Removes the task without running it. Returns `false` if it already
    /// fired or never existed.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.id == handle.0) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.fire_at)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every task whose deadline has passed, in fire-time order.
    pub fn fire_due(&mut self, now: Instant) {
        while let Some(first) = self.entries.first() {
            if first.fire_at > now {
                break;
            }

            let entry = self.entries.remove(0);
            (entry.action)();
        }
    }

    /// Drops every pending task without running any of them (used when the
    /// NCP resets: in-flight requests become `Canceled`, not fired).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A cheaply-cloneable handle onto the reactor's single timer wheel.
///
/// The wheel itself is owned by the [`Reactor`] (component A, per the data
/// model); other components — chiefly the NCP controller's
/// `post_timer_task` and in-flight request timeouts — only ever get a handle
/// to schedule onto it, never ownership.
#[derive(Clone)]
pub struct TimerScheduler(Rc<RefCell<TimerWheel>>);

impl TimerScheduler {
    pub fn schedule<F>(&self, fire_at: Instant, action: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.0.borrow_mut().schedule(fire_at, action)
    }

    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.0.borrow_mut().cancel(handle)
    }
}

/// The event loop itself: owns the readiness primitive, the timer wheel, and
/// the fixed-order component list.
pub struct Reactor {
    poller: Poller,
    events: Events,
    timers: Rc<RefCell<TimerWheel>>,
    components: Vec<Box<dyn Component>>,
    terminate: Arc<AtomicBool>,
    zero_timeout_streak: u32,
}

impl Reactor {
    pub fn new() -> Result<Self, CoreError> {
        Ok(Self {
            poller: Poller::new().map_err(CoreError::from)?,
            events: Events::new(),
            timers: Rc::new(RefCell::new(TimerWheel::new())),
            components: Vec::new(),
            terminate: Arc::new(AtomicBool::new(false)),
            zero_timeout_streak: 0,
        })
    }

    /// Registers a component at the end of the fixed dispatch order. Callers
    /// are expected to register NCP transport, Backbone Router, mDNS,
    /// SRP/Discovery proxies and IPC in that order, per component design.
    pub fn register(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    /// A handle other components use to schedule/cancel timer tasks onto
    /// this reactor's wheel without taking ownership of it.
    pub fn timer_handle(&self) -> TimerScheduler {
        TimerScheduler(self.timers.clone())
    }

    /// A shared flag a signal handler can set to request a clean shutdown;
    /// checked once between each iteration.
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        self.terminate.clone()
    }

    /// Runs iterations until the terminate flag is set. Returns
    /// `Err(CoreError::Fatal)` if the loop detects main-loop thrashing (1000
    /// consecutive zero-timeout iterations).
    pub fn run(&mut self) -> Result<(), CoreError> {
        while !self.terminate.load(Ordering::Relaxed) {
            self.run_iteration()?;
        }

        Ok(())
    }

    fn run_iteration(&mut self) -> Result<(), CoreError> {
        // 1. Build the descriptor-readiness set from every component that
        // reports interest this iteration.
        for (key, component) in self.components.iter().enumerate() {
            if let Some(interest) = component.interest() {
                let event = Event {
                    key,
                    readable: interest.readable,
                    writable: interest.writable,
                };

                // SAFETY: the fd stays valid and registered for exactly the
                // duration of this `wait` call; it is deregistered below
                // before the component (or the reactor) can drop it.
                unsafe {
                    self.poller
                        .add(interest.fd, event)
                        .map_err(CoreError::from)?;
                }
            }
        }

        // 2. Compute the next deadline: timers, component-requested
        // timeouts, capped by the platform maximum.
        let now = Instant::now();

        let mut timeout = self
            .timers
            .borrow()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(PLATFORM_MAX_WAIT)
            .min(PLATFORM_MAX_WAIT);

        for component in &self.components {
            if let Some(requested) = component.poll_timeout() {
                timeout = timeout.min(requested);
            }
        }

        if timeout.is_zero() {
            self.zero_timeout_streak = self.zero_timeout_streak.saturating_add(1);
        } else {
            self.zero_timeout_streak = 0;
        }

        if self.zero_timeout_streak >= THRASH_ABORT_STREAK {
            log::error!("main-loop thrashing: {THRASH_ABORT_STREAK} consecutive zero-timeout iterations");
            return Err(CoreError::Fatal);
        }

        if self.zero_timeout_streak >= THRASH_CLAMP_STREAK {
            timeout = timeout.max(THRASH_CLAMP_MIN_WAIT);
        }

        // 3. Block on the readiness primitive with that timeout.
        self.events.clear();
        let woken = self.poller.wait(&mut self.events, Some(timeout));

        // Deregister before dispatch: components may close/replace their fd
        // from within `dispatch`, and a stale registration would outlive it.
        for component in &self.components {
            if let Some(interest) = component.interest() {
                let _ = self.poller.delete(interest.fd);
            }
        }

        woken.map_err(CoreError::from)?;

        // 4. Fire all timers whose deadline has passed.
        self.timers.borrow_mut().fire_due(Instant::now());

        // 5. Dispatch readiness to each component in fixed order.
        let ready_keys: HashSet<usize> = self.events.iter().map(|ev| ev.key).collect();

        for (key, component) in self.components.iter_mut().enumerate() {
            let ready = Readiness {
                readable: ready_keys.contains(&key),
                writable: ready_keys.contains(&key),
            };

            component.dispatch(ready);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn timer_wheel_fires_in_fire_time_then_insertion_order() {
        let mut wheel = TimerWheel::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let now = Instant::now();

        let o1 = order.clone();
        wheel.schedule(now, move || o1.borrow_mut().push(1));
        let o2 = order.clone();
        wheel.schedule(now, move || o2.borrow_mut().push(2));
        let o3 = order.clone();
        wheel.schedule(now + Duration::from_secs(10), move || o3.borrow_mut().push(3));

        wheel.fire_due(now);

        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::new();
        let fired = Rc::new(RefCell::new(false));
        let now = Instant::now();

        let f = fired.clone();
        let handle = wheel.schedule(now, move || *f.borrow_mut() = true);

        assert!(wheel.cancel(handle));
        wheel.fire_due(now + Duration::from_secs(1));

        assert!(!*fired.borrow());
    }

    #[test]
    fn next_deadline_is_earliest_pending() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();

        wheel.schedule(now + Duration::from_secs(5), || {});
        wheel.schedule(now + Duration::from_secs(1), || {});

        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_secs(1)));
    }
}
