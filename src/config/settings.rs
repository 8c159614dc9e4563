//! Runtime settings

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use crate::{
    config::{CliArgs, cli::TransportKind},
    core::{
        error::ConfigError, provision::PollOptions, scanner::ScanOptions,
        service::ClientOptions, types::WifiConfig,
    },
    security::SecurityScheme,
    transport::{DEFAULT_REQUEST_TIMEOUT, ble::DEFAULT_SCAN_TIMEOUT},
};

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: TransportKind,
    pub base_url: String,
    pub device_prefix: Option<String>,
    pub discovery_timeout: Duration,
    pub security: SecurityScheme,
    pub pop: Option<String>,
    pub wifi: WifiConfig,
    pub client: ClientOptions,
    pub endpoints_file: Option<PathBuf>,
}

impl TryFrom<CliArgs> for Settings {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let security = SecurityScheme::try_from(args.security)
            .map_err(ConfigError::InvalidSecurityScheme)?;
        if security == SecurityScheme::Sec1 && args.pop.is_none() {
            return Err(ConfigError::MissingProofOfPossession);
        }

        let extra = parse_custom_entries(&args.custom)?;
        let defaults = ClientOptions::default();

        Ok(Settings {
            transport: args.transport,
            base_url: args.base_url,
            device_prefix: Some(args.device_prefix).filter(|prefix| !prefix.is_empty()),
            discovery_timeout: seconds(args.discovery_timeout, DEFAULT_SCAN_TIMEOUT),
            security,
            pop: args.pop,
            wifi: WifiConfig {
                ssid: args.ssid,
                passphrase: args.passphrase,
                extra: Some(extra).filter(|extra| !extra.is_empty()),
            },
            client: ClientOptions {
                request_timeout: seconds(args.request_timeout, DEFAULT_REQUEST_TIMEOUT),
                scan: ScanOptions {
                    page_size: args.scan_page_size.max(1),
                    ..defaults.scan
                },
                poll: PollOptions {
                    interval: seconds(args.poll_interval, defaults.poll.interval),
                    max_polls: args.max_polls,
                },
            },
            endpoints_file: args.endpoints,
        })
    }
}

/// Negative or non-finite values fall back to `default`
fn seconds(value: f64, default: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(default)
}

fn parse_custom_entries(entries: &[String]) -> Result<BTreeMap<String, String>, ConfigError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ConfigError::InvalidCustomEntry(entry.clone())),
        })
        .collect()
}
