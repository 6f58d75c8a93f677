//! Border Agent, Advertising Proxy, Discovery Proxy and Backbone Router
//! (components E-H), plus the supplemented SRPL peer-discovery module —
//! the upper-layer proxies that sit between the NCP controller and the
//! mDNS publisher abstraction.

pub mod advertising_proxy;
pub mod backbone;
pub mod border_agent;
pub mod discovery_proxy;
pub mod srpl;

pub use advertising_proxy::{AdvertisingProxy, SrpHostHandle, SrpHostUpdate, SrpServiceUpdate};
pub use backbone::{BackboneRouter, MulticastRouteCommands, ShellMulticastRouteCommands};
pub use border_agent::{compute_state_bitmap, BorderAgent, StateBitmap, SERVICE_TYPE as BORDER_AGENT_SERVICE_TYPE};
pub use discovery_proxy::{AddressResult, BrowseResult, DiscoveryProxy, ResolverKind};
pub use srpl::SrplDnssd;
