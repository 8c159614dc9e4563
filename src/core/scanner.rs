//! WiFi scanning through the device, with state machine

use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    core::{
        error::{ScanError, ScanResult},
        session::Session,
        types::{ScanOutcome, WifiScanResult},
    },
    protocol::{self, ScanRequest, ScanResponse, Status, endpoints},
    transport::Transport,
};

/// Default number of entries fetched per result page
pub const DEFAULT_PAGE_SIZE: u8 = 4;

/// Default pause between scan status polls
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of status polls before giving up on a scan
pub const DEFAULT_MAX_STATUS_POLLS: u32 = 20;

/// Per-channel dwell time requested from the device
const SCAN_PERIOD_MS: u32 = 120;

/// Scan lifecycle as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Finished,
    Error,
}

/// Scan state machine
///
/// Guards against overlapping scans and keeps the last results around.
#[derive(Debug)]
struct ScanStateMachine {
    state: ScanState,
    results: Option<BTreeMap<String, WifiScanResult>>,
}

impl ScanStateMachine {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            results: None,
        }
    }

    fn start_scan(&mut self) {
        self.state = ScanState::Scanning;
        self.results = None;
    }

    fn complete_scan(&mut self, results: BTreeMap<String, WifiScanResult>) {
        self.state = ScanState::Finished;
        self.results = Some(results);
    }

    fn fail_scan(&mut self) {
        self.state = ScanState::Error;
        self.results = None;
    }

    fn abandon_scan(&mut self) {
        if self.state == ScanState::Scanning {
            self.state = ScanState::Idle;
        }
    }

    fn state(&self) -> ScanState {
        self.state
    }

    fn results(&self) -> Option<&BTreeMap<String, WifiScanResult>> {
        self.results.as_ref()
    }
}

/// Scan tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub page_size: u8,
    pub status_interval: Duration,
    pub max_status_polls: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            status_interval: DEFAULT_STATUS_INTERVAL,
            max_status_polls: DEFAULT_MAX_STATUS_POLLS,
        }
    }
}

/// Asks the device to scan for access points and collects the results
///
/// Results are keyed by SSID; an SSID seen more than once keeps its last
/// entry.
pub struct WifiScanner<T: Transport> {
    session: Arc<Session<T>>,
    options: ScanOptions,
    state_machine: Arc<RwLock<ScanStateMachine>>,
    /// Held for the whole scan; released even when the scan future is dropped
    scan_lock: Mutex<()>,
}

/// Puts the state machine back to `Idle` if a scan is dropped before it ends
struct AbandonGuard {
    state_machine: Arc<RwLock<ScanStateMachine>>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state_machine) = self.state_machine.try_write() {
            state_machine.abandon_scan();
            debug!("Scan abandoned before completion");
        }
    }
}

impl<T: Transport> WifiScanner<T> {
    pub fn new(session: Arc<Session<T>>, options: ScanOptions) -> Self {
        Self {
            session,
            options: ScanOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            state_machine: Arc::new(RwLock::new(ScanStateMachine::new())),
            scan_lock: Mutex::new(()),
        }
    }

    /// Run a complete scan
    ///
    /// Never fails outright: on error the outcome holds empty results and
    /// the error as a diagnostic.
    pub async fn start_scan(&self) -> ScanOutcome {
        let Ok(_scanning) = self.scan_lock.try_lock() else {
            return ScanOutcome::failed(ScanError::InProgress);
        };
        self.state_machine.write().await.start_scan();
        let mut guard = AbandonGuard {
            state_machine: self.state_machine.clone(),
            armed: true,
        };

        let result = self.run_scan().await;
        guard.armed = false;

        match result {
            Ok(results) => {
                info!("Scan finished with {} networks", results.len());
                self.state_machine
                    .write()
                    .await
                    .complete_scan(results.clone());
                ScanOutcome {
                    results,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.state_machine.write().await.fail_scan();
                ScanOutcome::failed(e)
            }
        }
    }

    pub async fn state(&self) -> ScanState {
        self.state_machine.read().await.state()
    }

    /// Results of the last successful scan
    pub async fn results(&self) -> Option<BTreeMap<String, WifiScanResult>> {
        self.state_machine.read().await.results().cloned()
    }

    async fn run_scan(&self) -> ScanResult<BTreeMap<String, WifiScanResult>> {
        let start = ScanRequest::Start {
            blocking: true,
            passive: false,
            group_channels: 0,
            period_ms: SCAN_PERIOD_MS,
        };
        match self.round_trip(&start).await? {
            ScanResponse::Start { status } => check(status)?,
            other => return Err(unexpected("Start", &other)),
        }

        let total = self.wait_finished().await?;
        debug!("Device found {} access points", total);

        let mut results = BTreeMap::new();
        let mut index: u8 = 0;
        while index < total {
            let count = self.options.page_size.min(total - index);
            let request = ScanRequest::Result {
                start_index: index,
                count,
            };
            let entries = match self.round_trip(&request).await? {
                ScanResponse::Result { status, entries } => {
                    check(status)?;
                    entries
                }
                other => return Err(unexpected("Result", &other)),
            };
            if entries.is_empty() {
                break;
            }
            index = index.saturating_add(u8::try_from(entries.len()).unwrap_or(u8::MAX));

            for entry in entries {
                match WifiScanResult::try_from(entry) {
                    Ok(network) if network.ssid.is_empty() => {
                        debug!("Skipping hidden network {}", network.bssid_string());
                    }
                    Ok(network) => {
                        results.insert(network.ssid.clone(), network);
                    }
                    Err(e) => debug!("Skipping scan entry: {}", e),
                }
            }
        }

        Ok(results)
    }

    /// Poll until the device reports the scan finished; returns the result count
    async fn wait_finished(&self) -> ScanResult<u8> {
        for poll in 0..self.options.max_status_polls {
            if poll > 0 {
                tokio::time::sleep(self.options.status_interval).await;
            }
            match self.round_trip(&ScanRequest::Status).await? {
                ScanResponse::Status {
                    status,
                    finished,
                    result_count,
                } => {
                    check(status)?;
                    if finished {
                        return Ok(result_count);
                    }
                }
                other => return Err(unexpected("Status", &other)),
            }
        }

        Err(ScanError::Timeout {
            polls: self.options.max_status_polls,
        })
    }

    async fn round_trip(&self, request: &ScanRequest) -> ScanResult<ScanResponse> {
        let payload = protocol::encode(request)?;
        let reply = self.session.request(endpoints::PROV_SCAN, &payload).await?;
        Ok(protocol::decode(&reply)?)
    }
}

fn check(status: Status) -> ScanResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ScanError::DeviceError(status))
    }
}

fn unexpected(expected: &str, got: &ScanResponse) -> ScanError {
    ScanError::BadResponse(format!("expected {} response, got {:?}", expected, got))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::error::SessionError,
        protocol::WifiScanEntry,
        security::Security,
        transport::MockDevice,
    };
    use pretty_assertions::assert_eq;

    fn entry(ssid: &str, rssi: i32) -> WifiScanEntry {
        WifiScanEntry {
            ssid: ssid.as_bytes().to_vec(),
            bssid: vec![0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01],
            rssi,
            channel: 6,
            auth: 3,
        }
    }

    fn options(page_size: u8) -> ScanOptions {
        ScanOptions {
            page_size,
            status_interval: Duration::from_millis(1),
            max_status_polls: 5,
        }
    }

    async fn scanner(device: &MockDevice, page_size: u8) -> WifiScanner<MockDevice> {
        let session = Arc::new(Session::new(
            Arc::new(device.clone()),
            Security::proof_of_possession("pop"),
            Duration::from_secs(1),
        ));
        session.establish().await.unwrap();
        WifiScanner::new(session, options(page_size))
    }

    #[test]
    fn test_scan_state_machine_transitions() {
        let mut sm = ScanStateMachine::new();
        assert_eq!(sm.state(), ScanState::Idle);

        sm.start_scan();
        assert_eq!(sm.state(), ScanState::Scanning);

        sm.complete_scan(BTreeMap::new());
        assert_eq!(sm.state(), ScanState::Finished);
        assert!(sm.results().is_some());

        // Only an unfinished scan is abandoned
        sm.abandon_scan();
        assert_eq!(sm.state(), ScanState::Finished);

        sm.start_scan();
        sm.fail_scan();
        assert_eq!(sm.state(), ScanState::Error);
        assert!(sm.results().is_none());

        sm.start_scan();
        sm.abandon_scan();
        assert_eq!(sm.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_ssid_last_entry_wins() {
        let device = MockDevice::sec1("pop");
        device
            .set_scan_entries(vec![entry("A", -40), entry("B", -60), entry("A", -45)])
            .await;
        let scanner = scanner(&device, 2).await;

        let outcome = scanner.start_scan().await;

        assert_eq!(outcome.error, None);
        let rssi: Vec<_> = outcome
            .results
            .iter()
            .map(|(ssid, network)| (ssid.as_str(), network.rssi))
            .collect();
        assert_eq!(rssi, vec![("A", -45), ("B", -60)]);
        assert_eq!(scanner.state().await, ScanState::Finished);
    }

    #[tokio::test]
    async fn test_pages_requested_until_count_reached() {
        let device = MockDevice::sec1("pop");
        let entries = (0..7).map(|i| entry(&format!("net-{}", i), -50)).collect();
        device.set_scan_entries(entries).await;
        device.set_scan_duration(3).await;
        let scanner = scanner(&device, 3).await;

        let outcome = scanner.start_scan().await;
        assert_eq!(outcome.results.len(), 7);

        let scan_requests = device
            .request_log()
            .await
            .iter()
            .filter(|path| *path == endpoints::PROV_SCAN)
            .count();
        // Start + 3 status polls + 3 pages
        assert_eq!(scan_requests, 7);
    }

    #[tokio::test]
    async fn test_empty_scan_is_not_an_error() {
        let device = MockDevice::sec1("pop");
        let scanner = scanner(&device, 4).await;

        let outcome = scanner.start_scan().await;

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.error, None);
        assert!(outcome.needs_manual_entry());
    }

    #[tokio::test]
    async fn test_device_error_gives_empty_results() {
        let device = MockDevice::sec1("pop");
        device.set_scan_entries(vec![entry("A", -40)]).await;
        device.set_scan_status(Status::InternalError).await;
        let scanner = scanner(&device, 4).await;

        let outcome = scanner.start_scan().await;

        assert!(outcome.results.is_empty());
        assert_eq!(
            outcome.error,
            Some(ScanError::DeviceError(Status::InternalError))
        );
        assert_eq!(scanner.state().await, ScanState::Error);
        assert_eq!(scanner.results().await, None);
    }

    #[tokio::test]
    async fn test_scan_that_never_finishes() {
        let device = MockDevice::sec1("pop");
        device.set_scan_duration(100).await;
        let scanner = scanner(&device, 4).await;

        let outcome = scanner.start_scan().await;
        assert_eq!(outcome.error, Some(ScanError::Timeout { polls: 5 }));
    }

    #[tokio::test]
    async fn test_overlapping_scan_rejected() {
        let device = MockDevice::sec1("pop");
        device.set_scan_entries(vec![entry("A", -40)]).await;
        let scanner = Arc::new(scanner(&device, 4).await);
        device.set_reply_delay(Duration::from_millis(100)).await;

        let first = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.start_scan().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = scanner.start_scan().await;
        assert_eq!(second.error, Some(ScanError::InProgress));
        assert_eq!(first.await.unwrap().results.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_scan_can_be_restarted() {
        let device = MockDevice::sec0();
        device.set_scan_entries(vec![entry("A", -40)]).await;
        let session = Arc::new(Session::new(
            Arc::new(device.clone()),
            Security::unsecured(),
            Duration::from_secs(1),
        ));
        session.establish().await.unwrap();
        let scanner = WifiScanner::new(session, options(4));
        device.set_reply_delay(Duration::from_millis(200)).await;

        let cancelled = tokio::time::timeout(Duration::from_millis(50), scanner.start_scan()).await;
        assert!(cancelled.is_err());
        assert_eq!(scanner.state().await, ScanState::Idle);

        device.set_reply_delay(Duration::ZERO).await;
        let outcome = scanner.start_scan().await;

        assert_eq!(outcome.error, None);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(scanner.state().await, ScanState::Finished);
    }

    #[tokio::test]
    async fn test_scan_without_session() {
        let device = MockDevice::sec0();
        let session = Arc::new(Session::new(
            Arc::new(device.clone()),
            Security::unsecured(),
            Duration::from_secs(1),
        ));
        let scanner = WifiScanner::new(session, options(4));

        let outcome = scanner.start_scan().await;

        assert_eq!(
            outcome.error,
            Some(ScanError::Session(SessionError::NotEstablished))
        );
        assert_eq!(device.request_count(), 0);
    }
}
