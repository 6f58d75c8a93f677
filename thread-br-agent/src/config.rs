//! Plain configuration struct assembled from parsed CLI arguments.
//!
//! No `serde`/config-file format: the original reads everything from
//! `argv`, and so does this agent (SPEC_FULL.md §2.3) — there is no
//! `otbr-agent.conf` counterpart in scope.

use thread_br_ncp::RadioUrl;

pub const DEFAULT_THREAD_IFNAME: &str = "wpan0";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub thread_ifname: String,
    pub backbone_ifname: Option<String>,
    pub radio_url: RadioUrl,
    pub debug_level: u8,
    pub verbose: bool,
    /// Route log records through `syslog_adapter::SyslogAdapter` instead of
    /// `env_logger`, matching `main.cpp`'s default daemon-mode logging
    /// (`kSyslogIdent`) — a main()-level backend choice (SPEC_FULL.md §2.1).
    pub use_syslog: bool,
    /// ISO 3166-1 alpha-2 region code, pushed to the NCP as `Region` after
    /// init — a supplemented feature (SPEC_FULL.md §4), absent from the
    /// distilled spec but present throughout the original as `--reg`.
    pub region_code: Option<[u8; 2]>,
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
    pub backbone_router_enabled: bool,
    pub srpl_enabled: bool,
    /// Shell command (program plus args) invoked with a single `S`/`R`/`E`
    /// byte on stdin for the network-retain hook (§6.4). `None` disables
    /// persistence entirely, the default.
    pub network_retain_hook: Option<Vec<String>>,
}

impl AgentConfig {
    pub fn new(radio_url: RadioUrl) -> Self {
        Self {
            thread_ifname: DEFAULT_THREAD_IFNAME.to_string(),
            backbone_ifname: None,
            radio_url,
            debug_level: 0,
            verbose: false,
            use_syslog: false,
            region_code: None,
            vendor_name: None,
            product_name: None,
            backbone_router_enabled: false,
            srpl_enabled: false,
            network_retain_hook: None,
        }
    }
}
