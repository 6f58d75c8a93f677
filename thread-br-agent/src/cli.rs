//! Hand-rolled argument parser over `std::env::args()`.
//!
//! Grounded on `agent/main.cpp`'s `kOptions[]`/`getopt_long` table: short
//! options `-B <backbone-ifname>`, `-d <level>`, `-h`, `-I <ifname>`, `-V`,
//! `-v`, long-only `--radio-version` and `--reg <region>`, and a single
//! positional `RADIO_URL` argument. The `--thread-ifname`/`--backbone-ifname`
//! long forms accept the same values as `-I`/`-B` (spec.md §6.5's literal
//! grammar). No `clap` — the teacher's own CLI-facing examples
//! (`mdns_responder.rs` and friends) take their few knobs as plain
//! environment variables or constants, never a derive-based parser, and the
//! original's own surface is this narrow getopt table, not worth a
//! dependency to replicate.

use thread_br_ncp::RadioUrl;

use crate::config::AgentConfig;

pub const USAGE: &str =
    "thread-br-agent --thread-ifname IFNAME --backbone-ifname IFNAME [--reg REGION] [--radio-version] [-d LEVEL] [-v] [--syslog] RADIO_URL";

#[derive(Debug)]
pub enum Action {
    Run(AgentConfig),
    PrintRadioVersion(AgentConfig),
    Help,
    Version,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseError(pub String);

/// Parses `args` (excluding argv[0]). Mirrors the original's exit-code
/// conventions at the call site: `Help`/`Version` map to a clean exit,
/// `ParseError` to exit code 1.
pub fn parse(args: &[String]) -> Result<Action, ParseError> {
    let mut thread_ifname: Option<String> = None;
    let mut backbone_ifname: Option<String> = None;
    let mut debug_level: u8 = 0;
    let mut verbose = false;
    let mut use_syslog = false;
    let mut region_code: Option<[u8; 2]> = None;
    let mut print_radio_version = false;
    let mut positional: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "-h" | "--help" => return Ok(Action::Help),
            "-V" | "--version" => return Ok(Action::Version),
            "-v" | "--verbose" => verbose = true,
            "--syslog" => use_syslog = true,
            "--radio-version" => print_radio_version = true,
            "-B" | "--backbone-ifname" => {
                i += 1;
                backbone_ifname = Some(next_value(args, i, arg)?);
            }
            "-I" | "--thread-ifname" => {
                i += 1;
                thread_ifname = Some(next_value(args, i, arg)?);
            }
            "-d" => {
                i += 1;
                let value = next_value(args, i, "-d")?;
                debug_level = parse_debug_level(&value)?;
            }
            "--reg" => {
                i += 1;
                let value = next_value(args, i, "--reg")?;
                region_code = Some(parse_region(&value)?);
            }
            _ if arg.starts_with("-B") && arg.len() > 2 => {
                backbone_ifname = Some(arg[2..].to_string());
            }
            _ if arg.starts_with("-I") && arg.len() > 2 => {
                thread_ifname = Some(arg[2..].to_string());
            }
            _ if arg.starts_with("-d") && arg.len() > 2 => {
                debug_level = parse_debug_level(&arg[2..])?;
            }
            _ if arg.starts_with("--reg=") => {
                region_code = Some(parse_region(&arg["--reg=".len()..])?);
            }
            _ if arg.starts_with('-') && arg != "-" => {
                return Err(ParseError(format!("unrecognized option '{arg}'")));
            }
            _ => {
                if positional.is_some() {
                    return Err(ParseError("too many positional arguments".to_string()));
                }
                positional = Some(arg.clone());
            }
        }

        i += 1;
    }

    let radio_url_arg = positional.ok_or_else(|| ParseError("missing RADIO_URL argument".to_string()))?;
    let radio_url = RadioUrl::parse(&radio_url_arg).map_err(|_| ParseError(format!("invalid RADIO_URL '{radio_url_arg}'")))?;

    let mut config = AgentConfig::new(radio_url);
    if let Some(ifname) = thread_ifname {
        config.thread_ifname = ifname;
    }
    config.backbone_ifname = backbone_ifname;
    config.debug_level = debug_level;
    config.verbose = verbose;
    config.use_syslog = use_syslog;
    config.region_code = region_code;

    if print_radio_version {
        Ok(Action::PrintRadioVersion(config))
    } else {
        Ok(Action::Run(config))
    }
}

fn next_value(args: &[String], i: usize, opt: &str) -> Result<String, ParseError> {
    args.get(i)
        .cloned()
        .ok_or_else(|| ParseError(format!("option '{opt}' requires a value")))
}

fn parse_debug_level(s: &str) -> Result<u8, ParseError> {
    let level: u8 = s.parse().map_err(|_| ParseError(format!("invalid debug level '{s}'")))?;

    if level > 7 {
        return Err(ParseError(format!("debug level '{s}' out of range (0-7)")));
    }

    Ok(level)
}

fn parse_region(s: &str) -> Result<[u8; 2], ParseError> {
    let bytes = s.as_bytes();

    if bytes.len() != 2 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
        return Err(ParseError(format!("invalid region code '{s}', expected two letters")));
    }

    Ok([bytes[0].to_ascii_uppercase(), bytes[1].to_ascii_uppercase()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn help_and_version_short_circuit() {
        assert!(matches!(parse(&args(&["-h"])), Ok(Action::Help)));
        assert!(matches!(parse(&args(&["--version"])), Ok(Action::Version)));
    }

    #[test]
    fn missing_radio_url_is_an_error() {
        assert!(parse(&args(&["-v"])).is_err());
    }

    #[test]
    fn parses_full_option_set() {
        let action = parse(&args(&[
            "--reg",
            "us",
            "-I",
            "wpan1",
            "-B",
            "eth0",
            "-d",
            "4",
            "-v",
            "spinel+hdlc+uart:///dev/ttyUSB0?baudrate=115200",
        ]))
        .unwrap();

        let Action::Run(config) = action else {
            panic!("expected Run action");
        };

        assert_eq!(config.thread_ifname, "wpan1");
        assert_eq!(config.backbone_ifname.as_deref(), Some("eth0"));
        assert_eq!(config.debug_level, 4);
        assert!(config.verbose);
        assert_eq!(config.region_code, Some([b'U', b'S']));
    }

    #[test]
    fn long_form_ifname_flags_match_short_form() {
        let action = parse(&args(&[
            "--thread-ifname",
            "wpan2",
            "--backbone-ifname",
            "eth1",
            "spinel+hdlc+uart:///dev/ttyUSB0",
        ]))
        .unwrap();

        let Action::Run(config) = action else {
            panic!("expected Run action");
        };

        assert_eq!(config.thread_ifname, "wpan2");
        assert_eq!(config.backbone_ifname.as_deref(), Some("eth1"));
    }

    #[test]
    fn syslog_flag_is_captured() {
        let action = parse(&args(&["--syslog", "spinel+hdlc+uart:///dev/ttyUSB0"])).unwrap();

        let Action::Run(config) = action else {
            panic!("expected Run action");
        };

        assert!(config.use_syslog);
    }

    #[test]
    fn radio_version_flag_is_distinguished_from_run() {
        let action = parse(&args(&["--radio-version", "spinel+hdlc+uart:///dev/ttyUSB0"])).unwrap();
        assert!(matches!(action, Action::PrintRadioVersion(_)));
    }

    #[test]
    fn rejects_out_of_range_debug_level() {
        assert!(parse(&args(&["-d", "9", "spinel+hdlc+uart:///dev/ttyUSB0"])).is_err());
    }

    #[test]
    fn rejects_malformed_region_code() {
        assert!(parse(&args(&["--reg", "usa", "spinel+hdlc+uart:///dev/ttyUSB0"])).is_err());
    }
}
