//! vmw-rpci CLI
//!
//! Entry point for the `vmw-rpci` command-line tool.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;

use vmw_rpci::{guestinfo, logging, send_one, Backdoor, ChannelConfig, EffectiveConfig};
use vmw_rpci::{PROTOCOL_RPCI, PROTOCOL_TCLO};

#[derive(Parser)]
#[command(name = "vmw-rpci")]
#[command(about = "Talk to the hypervisor over an RPCI channel", version)]
struct Cli {
    /// Path to config file (default: $VMW_RPCI_CONFIG)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Move messages one word at a time even if bulk transfers are offered
    #[arg(long, global = true)]
    low_bandwidth: bool,

    /// Protocol to open: "rpci", "tclo", or a number (hex with 0x)
    #[arg(long, global = true, value_parser = parse_protocol)]
    protocol: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a command and print the host's reply
    Send {
        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Command words, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// guestinfo variables
    Info {
        #[command(subcommand)]
        action: InfoCommands,
    },

    /// Print the effective configuration and its sources
    Config,
}

#[derive(Subcommand)]
enum InfoCommands {
    /// Read a guestinfo key
    Get {
        key: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Write a guestinfo key
    Set { key: String, value: String },
}

fn parse_protocol(s: &str) -> Result<u32, String> {
    match s.to_ascii_lowercase().as_str() {
        "rpci" => Ok(PROTOCOL_RPCI),
        "tclo" => Ok(PROTOCOL_TCLO),
        other => {
            let parsed = match other.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => other.parse(),
            };
            parsed.map_err(|e| format!("invalid protocol {:?}: {}", s, e))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match EffectiveConfig::build(
        EffectiveConfig::resolve_path(cli.config.clone()).as_deref(),
        cli_overrides(&cli),
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = logging::enable(config.log_filter()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    match cli.command {
        Commands::Config => run_config(&config),
        Commands::Send { json, command } => {
            let (backdoor, channel_config) = connect(&config);
            run_send(&*backdoor, &channel_config, &command.join(" "), json);
        }
        Commands::Info { action } => {
            let (backdoor, channel_config) = connect(&config);
            match action {
                InfoCommands::Get { key, json } => {
                    run_info_get(&*backdoor, &channel_config, &key, json);
                }
                InfoCommands::Set { key, value } => {
                    run_info_set(&*backdoor, &channel_config, &key, &value);
                }
            }
        }
    }
}

fn connect(config: &EffectiveConfig) -> (Box<dyn Backdoor>, ChannelConfig) {
    let channel_config = match config.channel() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match host_backdoor() {
        Ok(backdoor) => (backdoor, channel_config),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Only flags that were given become overrides, so they never mask the file
fn cli_overrides(cli: &Cli) -> Option<Value> {
    let mut channel = serde_json::Map::new();
    if let Some(protocol) = cli.protocol {
        channel.insert("protocol".to_string(), json!(protocol));
    }
    if cli.low_bandwidth {
        channel.insert("prefer_low_bandwidth".to_string(), json!(true));
    }
    if channel.is_empty() {
        None
    } else {
        Some(json!({ "channel": channel }))
    }
}

#[cfg(target_arch = "x86_64")]
fn host_backdoor() -> Result<Box<dyn Backdoor>, String> {
    // SAFETY: this tool is meant to be run inside a guest of a hypervisor
    // that serves the backdoor ports; the user asserts as much by invoking it.
    Ok(Box::new(unsafe { vmw_rpci::IoPortBackdoor::new() }))
}

#[cfg(not(target_arch = "x86_64"))]
fn host_backdoor() -> Result<Box<dyn Backdoor>, String> {
    Err("the hypervisor backdoor is only reachable from x86_64 guests".to_string())
}

fn run_config(config: &EffectiveConfig) {
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            process::exit(1);
        }
    }
}

fn run_send(backdoor: &dyn Backdoor, config: &ChannelConfig, command: &str, json: bool) {
    let reply = match send_one(backdoor, config, command.as_bytes()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    };

    if json {
        let out = json!({
            "ok": reply.ok,
            "reply": reply.body_str(),
        });
        println!("{}", out);
    } else {
        println!("{}", reply.body_str());
    }

    if !reply.ok {
        process::exit(2);
    }
}

fn run_info_get(backdoor: &dyn Backdoor, config: &ChannelConfig, key: &str, json: bool) {
    let value = match guestinfo::get(backdoor, config, key) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    };

    if json {
        println!("{}", json!({ "key": key, "value": value }));
    } else if let Some(value) = &value {
        println!("{}", value);
    }

    if value.is_none() {
        if !json {
            eprintln!("{}: no value", key);
        }
        process::exit(2);
    }
}

fn run_info_set(backdoor: &dyn Backdoor, config: &ChannelConfig, key: &str, value: &str) {
    if let Err(e) = guestinfo::set(backdoor, config, key, value) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocol() {
        assert_eq!(parse_protocol("rpci"), Ok(PROTOCOL_RPCI));
        assert_eq!(parse_protocol("TCLO"), Ok(PROTOCOL_TCLO));
        assert_eq!(parse_protocol("0x49435052"), Ok(PROTOCOL_RPCI));
        assert_eq!(parse_protocol("7"), Ok(7));
        assert!(parse_protocol("nope").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["vmw-rpci", "config"]);
        assert!(cli_overrides(&cli).is_none());

        let cli = Cli::parse_from(["vmw-rpci", "--low-bandwidth", "--protocol", "tclo", "config"]);
        let overrides = cli_overrides(&cli).unwrap();
        assert_eq!(overrides["channel"]["protocol"], PROTOCOL_TCLO);
        assert_eq!(overrides["channel"]["prefer_low_bandwidth"], true);
    }

    #[test]
    fn test_send_joins_words() {
        let cli = Cli::parse_from(["vmw-rpci", "send", "info-get", "guestinfo.ip"]);
        match cli.command {
            Commands::Send { command, json } => {
                assert!(!json);
                assert_eq!(command.join(" "), "info-get guestinfo.ip");
            }
            _ => panic!("expected send"),
        }
    }
}
