//! WiFi Provisioning Client - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wifi_provisioning::{
    WifiStationState,
    config::{CliArgs, EndpointMap, Settings, TransportKind},
    core::service::ProvisioningClient,
    security::{Security, SecurityScheme},
    transport::{
        BleTransport, SoftApTransport, Transport,
        ble::{BleAdapter, DiscoveryFilter},
    },
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wifi_provisioning=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::try_from(CliArgs::parse())?;
    info!(
        transport = ?settings.transport,
        security = ?settings.security,
        ssid = %settings.wifi.ssid,
        "Starting WiFi provisioning"
    );

    let endpoints = match &settings.endpoints_file {
        Some(path) => EndpointMap::load(path).await?,
        None => EndpointMap::default(),
    };

    // Stop on Ctrl-C/SIGTERM
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), aborting provisioning");
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, aborting provisioning");
            Ok(())
        }
        result = connect_and_provision(&settings, &endpoints) => result,
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}

/// Build the selected transport and provision the device behind it
async fn connect_and_provision(
    settings: &Settings,
    endpoints: &EndpointMap,
) -> Result<(), Box<dyn std::error::Error>> {
    match settings.transport {
        TransportKind::Softap => {
            let transport = SoftApTransport::new(&settings.base_url, endpoints.softap.clone())?;
            provision(Arc::new(transport), settings).await
        }
        TransportKind::Ble => {
            let adapter = BleAdapter::new().await?;
            let filter = DiscoveryFilter {
                service_uuid: endpoints.ble.service_uuid,
                name_prefix: settings.device_prefix.clone(),
            };

            let peripherals = adapter.scan(&filter, settings.discovery_timeout).await?;
            let Some(peripheral) = peripherals.first() else {
                error!("No provisioning device in range");
                return Err("no device found".into());
            };
            info!(
                "Using {} ({})",
                peripheral.name.as_deref().unwrap_or("unnamed"),
                peripheral.address
            );

            let transport = BleTransport::connect(
                adapter.adapter(),
                peripheral,
                &endpoints.ble,
                settings.client.request_timeout,
            )
            .await?;
            provision(Arc::new(transport), settings).await
        }
    }
}

/// Version, session, scan, configure and apply against one device
async fn provision<T: Transport>(
    transport: Arc<T>,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let security = Security::for_scheme(settings.security, settings.pop.as_deref())?;
    let client = ProvisioningClient::new(transport.clone(), security, settings.client);

    let result = run(&client, settings).await;

    client.close().await;
    if let Err(e) = transport.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    result
}

async fn run<T: Transport>(
    client: &ProvisioningClient<T>,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = client.get_version().await.inspect_err(report)?;
    let capabilities: Vec<_> = version.capabilities.iter().collect();
    info!(version = ?version.version, ?capabilities, "Device info");

    match settings.security {
        SecurityScheme::Sec1 if version.requires_pop() && settings.pop.as_deref() == Some("") => {
            error!("Device requires a proof of possession, pass it with --pop");
            return Err("proof of possession required".into());
        }
        SecurityScheme::Sec0 if !version.allows_unsecured() => {
            warn!("Device does not advertise unsecured sessions, the handshake may be refused");
        }
        _ => {}
    }

    client.establish_session().await.inspect_err(report)?;

    let outcome = client.scan_wifi().await;
    if let Some(e) = &outcome.error {
        warn!("WiFi scan unavailable: {}", e);
    }
    for network in outcome.results.values() {
        info!(
            ssid = %network.ssid,
            bssid = %network.bssid_string(),
            rssi = network.rssi,
            channel = network.channel,
            signal = ?network.signal_strength(),
            auth = ?network.auth,
            "Access point"
        );
    }

    match outcome.results.get(&settings.wifi.ssid) {
        Some(network) => {
            if client.requires_passphrase(network).await && settings.wifi.passphrase.is_empty() {
                error!("'{}' requires a passphrase", network.ssid);
                return Err("passphrase required".into());
            }
        }
        None if outcome.needs_manual_entry() => {
            info!("Using manually entered SSID '{}'", settings.wifi.ssid);
        }
        None => warn!("'{}' was not seen by the device", settings.wifi.ssid),
    }

    let mut last_state = None;
    client
        .provision(&settings.wifi, |state| {
            match &state {
                Ok(state) => info!(?state, "WiFi state"),
                Err(e) => error!("{}", e.user_message()),
            }
            last_state = Some(state);
        })
        .await
        .inspect_err(report)?;

    match last_state {
        Some(Ok(WifiStationState::Connected)) => {
            info!("Device joined '{}'", settings.wifi.ssid);
            Ok(())
        }
        Some(Ok(WifiStationState::ConnectionFailed(reason))) => {
            error!("Device failed to join '{}': {:?}", settings.wifi.ssid, reason);
            Err(format!("connection failed: {:?}", reason).into())
        }
        Some(Err(e)) => Err(e.into()),
        Some(Ok(state)) => Err(format!("provisioning ended in state {:?}", state).into()),
        None => Err("no WiFi state received".into()),
    }
}

fn report(e: &wifi_provisioning::ProvisionError) {
    error!("{}", e.user_message());
}
