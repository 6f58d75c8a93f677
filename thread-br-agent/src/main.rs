//! Process entry point: CLI parsing, component wiring, and the reactor run
//! loop that ties the NCP controller, mDNS publisher, and the Border
//! Agent/Advertising Proxy/Discovery Proxy/Backbone Router together.

mod cli;
mod config;
mod globals;
mod network_retain;
mod syslog_adapter;

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thread_br_mdns::{Publisher, SelfContainedPublisher};
use thread_br_ncp::{BrState, Component, CoreError, Interest, NcpController, NcpTransport, Readiness, Reactor, StateChangedFlags, Value};
use thread_br_proxy::{AdvertisingProxy, BackboneRouter, BorderAgent, DiscoveryProxy, SrplDnssd};

use cli::Action;
use config::AgentConfig;
use network_retain::NetworkRetain;
use syslog_adapter::SyslogAdapter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_VENDOR_NAME: &str = "OpenThread";
const DEFAULT_PRODUCT_NAME: &str = "BorderRouter";
const DEFAULT_THREAD_SPEC_VERSION: &str = "1.3.0";
const ADVERTISING_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match cli::parse(&args) {
        Ok(Action::Help) => {
            println!("usage: {}", cli::USAGE);
            ExitCode::SUCCESS
        }
        Ok(Action::Version) => {
            println!("thread-br-agent {VERSION}");
            ExitCode::SUCCESS
        }
        Ok(Action::PrintRadioVersion(config)) => {
            init_logging(&config);

            match print_radio_version(&config) {
                Ok(version) => {
                    println!("{version}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    log::error!("failed to query radio version: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        Ok(Action::Run(config)) => {
            init_logging(&config);
            install_panic_hook();

            match run(config) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    log::error!("agent terminated: {err}");
                    ExitCode::from(2)
                }
            }
        }
        Err(cli::ParseError(message)) => {
            eprintln!("thread-br-agent: {message}");
            eprintln!("usage: {}", cli::USAGE);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &AgentConfig) {
    let level = if config.verbose {
        log::Level::Debug
    } else {
        match config.debug_level {
            0..=2 => log::Level::Warn,
            3..=4 => log::Level::Info,
            5..=6 => log::Level::Debug,
            _ => log::Level::Trace,
        }
    };

    if config.use_syslog {
        if let Err(err) = SyslogAdapter::install(level) {
            eprintln!("thread-br-agent: failed to install syslog logger: {err}");
        }
    } else {
        env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level.to_string()));
    }
}

/// Installs a panic hook that logs at the highest level and exits the
/// process — the Rust-idiomatic analogue of `OnAllocateFailed`'s `abort()`
/// on unrecoverable allocation failure: a panic here means a core invariant
/// broke, and continuing would only corrupt more state.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        log::error!("fatal: {info}");
        std::process::exit(2);
    }));
}

/// Opens the radio link, queries `Radio:Version` and prints it, without
/// entering the reactor's run loop — matching the original's `--radio-version`
/// diagnostic, which reports the co-processor's firmware string and exits
/// before `Mainloop()`.
fn print_radio_version(config: &AgentConfig) -> Result<String, CoreError> {
    let reset_requested = Arc::new(AtomicBool::new(false));
    let transport = NcpTransport::open(&config.radio_url, reset_requested.clone())?;

    let mut reactor = Reactor::new()?;
    let timers = reactor.timer_handle();
    let mut controller = NcpController::new(transport, timers, reset_requested);
    controller.init()?;

    let result = Rc::new(RefCell::new(None));
    let terminate = reactor.terminate_handle();

    {
        let result = result.clone();
        let terminate = terminate.clone();
        controller.get_property("Radio:Version", move |reply| {
            *result.borrow_mut() = Some(reply);
            terminate.store(true, Ordering::Relaxed);
        });
    }

    reactor.register(Box::new(controller));
    reactor.run()?;

    match result.borrow_mut().take() {
        Some(Ok(Value::Str(version))) => Ok(version),
        Some(Ok(other)) => Ok(format!("{other:?}")),
        Some(Err(err)) => Err(err),
        None => Err(CoreError::Timeout),
    }
}

/// Delegates the fd-polling half of [`SelfContainedPublisher`] to the
/// reactor, while `Rc<RefCell<_>>` keeps it reachable from the Border
/// Agent/Advertising/Discovery Proxy/SRPL closures that need to call into
/// it as a [`Publisher`].
struct PublisherComponent(Rc<RefCell<SelfContainedPublisher>>);

impl Component for PublisherComponent {
    fn name(&self) -> &'static str {
        "mdns-publisher"
    }

    fn interest(&self) -> Option<Interest> {
        self.0.borrow().interest()
    }

    fn dispatch(&mut self, ready: Readiness) {
        self.0.borrow_mut().dispatch(ready);
    }
}

/// Same delegation for the NCP controller: owned by the reactor for
/// `dispatch`, but reachable from the Discovery Proxy / Advertising Proxy
/// result callbacks that need to report back into the NCP's typed property
/// surface.
struct ControllerComponent(Rc<RefCell<NcpController>>);

impl Component for ControllerComponent {
    fn name(&self) -> &'static str {
        "ncp-controller"
    }

    fn interest(&self) -> Option<Interest> {
        self.0.borrow().interest()
    }

    fn poll_timeout(&self) -> Option<Duration> {
        self.0.borrow().poll_timeout()
    }

    fn dispatch(&mut self, ready: Readiness) {
        self.0.borrow_mut().dispatch(ready);
    }
}

fn run(config: AgentConfig) -> Result<(), CoreError> {
    let reset_requested = Arc::new(AtomicBool::new(false));
    let transport = NcpTransport::open(&config.radio_url, reset_requested.clone())?;

    let mut reactor = Reactor::new()?;
    let timers = reactor.timer_handle();

    let mut inner_controller = NcpController::new(transport, timers.clone(), reset_requested.clone());

    let publisher = Rc::new(RefCell::new(
        SelfContainedPublisher::bind(None, Some(0), timers.clone()).map_err(CoreError::from)?,
    ));

    let vendor_name = config.vendor_name.clone().unwrap_or_else(|| DEFAULT_VENDOR_NAME.to_string());
    let product_name = config.product_name.clone().unwrap_or_else(|| DEFAULT_PRODUCT_NAME.to_string());

    let border_agent = Rc::new(RefCell::new(BorderAgent::new(vendor_name, product_name, DEFAULT_THREAD_SPEC_VERSION)));
    border_agent
        .borrow_mut()
        .set_domain_enabled(config.backbone_router_enabled);
    border_agent
        .borrow_mut()
        .set_routing_enabled(config.backbone_router_enabled);

    let backbone_router: Option<Rc<RefCell<BackboneRouter>>> = if config.backbone_router_enabled {
        let backbone_ifname = config.backbone_ifname.clone().unwrap_or_else(|| "eth0".to_string());
        Some(Rc::new(RefCell::new(BackboneRouter::new(
            thread_br_proxy::ShellMulticastRouteCommands,
            config.thread_ifname.clone(),
            backbone_ifname,
        ))))
    } else {
        None
    };

    let network_retain = Rc::new(RefCell::new(NetworkRetain::new(config.network_retain_hook.clone())));

    // Placeholder controller handle so the Advertising/Discovery Proxy
    // callbacks can report back into the NCP's typed property surface;
    // filled in once `inner_controller` is wrapped below.
    let controller = Rc::new(RefCell::new(inner_controller));

    let advertising_proxy = Rc::new(RefCell::new(AdvertisingProxy::new(timers.clone(), {
        let controller = controller.clone();
        move |host_handle, result| {
            let value = match &result {
                Ok(()) => Value::Bool(true),
                Err(_) => Value::Bool(false),
            };
            controller
                .borrow_mut()
                .set_property(&format!("Srp:AdvertisingResult:{host_handle}"), value, |_| {});
        }
    })));

    let discovery_proxy = Rc::new(RefCell::new(DiscoveryProxy::new(
        {
            let controller = controller.clone();
            move |result| {
                controller.borrow_mut().set_property(
                    &format!("Dnssd:BrowseResult:{}", result.instance_name),
                    Value::Bool(!result.removed),
                    |_| {},
                );
            }
        },
        {
            let controller = controller.clone();
            move |result| {
                controller.borrow_mut().set_property(
                    &format!("Dnssd:AddressResult:{}", result.host_name),
                    Value::Bool(!result.removed),
                    |_| {},
                );
            }
        },
    )));

    let srpl = if config.srpl_enabled {
        Some(Rc::new(RefCell::new(SrplDnssd::new(config.thread_ifname.clone()))))
    } else {
        None
    };

    {
        let publisher = publisher.clone();
        let border_agent = border_agent.clone();
        let backbone_router = backbone_router.clone();
        let network_retain = network_retain.clone();

        controller.borrow_mut().add_state_change_listener(move |state, flags| {
            border_agent.borrow_mut().on_state_changed(state, &mut *publisher.borrow_mut());
            network_retain.borrow_mut().on_state_changed(state, flags);

            if flags.contains(StateChangedFlags::BACKBONE_STATE) {
                if let Some(backbone) = &backbone_router {
                    let mut backbone = backbone.borrow_mut();
                    if state.br_state == BrState::Primary {
                        backbone.on_primary_entry();
                    } else {
                        backbone.on_primary_exit();
                    }
                }
            }
        });
    }

    controller.borrow_mut().init()?;
    network_retain.borrow_mut().on_initialised();

    if let Some(region_code) = config.region_code {
        controller
            .borrow_mut()
            .set_property("Region", Value::Bytes(region_code.to_vec()), |_| {});
    }

    if let Some(srpl) = &srpl {
        srpl.borrow_mut().start_browse(&mut *publisher.borrow_mut());
    }

    // Periodic poll so Advertising Proxy updates still time out and commit
    // even though nothing yet drives `advertising_handler` from a decoded
    // NCP notification (see DESIGN.md for the deferred wire-format gap).
    schedule_advertising_poll(&timers, advertising_proxy.clone(), publisher.clone());

    reactor.register(Box::new(ControllerComponent(controller)));
    reactor.register(Box::new(PublisherComponent(publisher)));

    globals::init(reactor.terminate_handle(), reset_requested);

    // `advertising_proxy` and `discovery_proxy` expose the entry points the
    // opaque NCP's SRP server / DNS-SD platform layer calls into directly
    // (§6.1) — that native call path is outside this core's scope (§1), so
    // nothing here drives them besides the periodic timeout poll above.
    let _ = &discovery_proxy;

    reactor.run()
}

fn schedule_advertising_poll(
    timers: &thread_br_ncp::TimerScheduler,
    advertising_proxy: Rc<RefCell<AdvertisingProxy>>,
    publisher: Rc<RefCell<SelfContainedPublisher>>,
) {
    let timers_for_reschedule = timers.clone();

    timers.schedule(Instant::now() + ADVERTISING_POLL_INTERVAL, move || {
        advertising_proxy.borrow_mut().poll(&mut *publisher.borrow_mut());
        schedule_advertising_poll(&timers_for_reschedule, advertising_proxy, publisher);
    });
}
