use crate::config::AccessPointConfig;
use crate::credentials::Credential;
use crate::error::NetworkError;
use crate::traits::{AuthMode, RadioEvent, ScanResult, ServiceAdvertiser, WifiRadio};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the simulated radio was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Scan,
    ConnectStation { ssid: String },
    StopStation,
    StartAccessPoint { ssid: String },
    StopAccessPoint,
    SetHostname(String),
    Advertise { hostname: String, port: u16 },
    Withdraw,
}

struct Sim {
    visible: Vec<ScanResult>,
    /// SSID → password the simulated network accepts.
    passwords: HashMap<String, String>,
    scan_fails: bool,
    /// Accept association requests but never report an outcome.
    unresponsive: bool,
    calls: Vec<RadioCall>,
    station_ip: Ipv4Addr,
}

/// A radio that simulates scanning and association without hardware.
///
/// Association succeeds when the SSID is visible and the password matches
/// the one registered with [`SimulatedRadio::add_network`]. Outcomes are
/// published on the event channel after `event_delay`, like a real driver
/// would report them asynchronously.
pub struct SimulatedRadio {
    sim: Mutex<Sim>,
    events: mpsc::Sender<RadioEvent>,
    event_delay: Duration,
}

impl SimulatedRadio {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<RadioEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let radio = Arc::new(Self {
            sim: Mutex::new(Sim {
                visible: Vec::new(),
                passwords: HashMap::new(),
                scan_fails: false,
                unresponsive: false,
                calls: Vec::new(),
                station_ip: Ipv4Addr::new(192, 168, 1, 50),
            }),
            events: tx,
            event_delay: Duration::from_millis(20),
        });
        (radio, rx)
    }

    /// A radio seeing a handful of neighbourhood networks, for running the
    /// daemon without hardware.
    pub fn with_demo_networks() -> (Arc<Self>, mpsc::Receiver<RadioEvent>) {
        let (radio, rx) = Self::new();
        radio.add_network("MyHomeWiFi", -42, AuthMode::Wpa3, "12345678");
        radio.add_network("CafeGuest", -61, AuthMode::Open, "");
        radio.add_network("Neighbor's Network", -77, AuthMode::Wpa2, "not-yours");
        radio.add_network("xfinitywifi", -55, AuthMode::WpaWpa2, "comcast");
        (radio, rx)
    }

    fn sim(&self) -> std::sync::MutexGuard<'_, Sim> {
        self.sim.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Makes a network visible and joinable with `password`.
    pub fn add_network(&self, ssid: &str, signal_strength: i16, auth_mode: AuthMode, password: &str) {
        let mut sim = self.sim();
        sim.visible.retain(|n| n.ssid != ssid);
        sim.visible.push(ScanResult {
            ssid: ssid.to_string(),
            signal_strength,
            auth_mode,
        });
        sim.passwords.insert(ssid.to_string(), password.to_string());
    }

    pub fn remove_network(&self, ssid: &str) {
        let mut sim = self.sim();
        sim.visible.retain(|n| n.ssid != ssid);
        sim.passwords.remove(ssid);
    }

    pub fn set_scan_fails(&self, fails: bool) {
        self.sim().scan_fails = fails;
    }

    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.sim().unresponsive = unresponsive;
    }

    pub fn set_station_ip(&self, ip: Ipv4Addr) {
        self.sim().station_ip = ip;
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.sim().calls.clone()
    }

    /// Simulates the upstream access point going away.
    pub async fn drop_link(&self) {
        let _ = self.events.send(RadioEvent::Disconnected).await;
    }

    fn record(&self, call: RadioCall) {
        tracing::debug!(?call, "simulated radio");
        self.sim().calls.push(call);
    }

    fn publish_later(&self, event: RadioEvent) {
        let tx = self.events.clone();
        let delay = self.event_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        });
    }
}

#[async_trait]
impl WifiRadio for SimulatedRadio {
    async fn scan(&self) -> Result<Vec<ScanResult>, NetworkError> {
        self.record(RadioCall::Scan);
        let sim = self.sim();
        if sim.scan_fails {
            return Err(NetworkError::ScanFailed("simulated scan failure".into()));
        }
        Ok(sim.visible.clone())
    }

    async fn connect_station(&self, credential: &Credential) -> Result<(), NetworkError> {
        self.record(RadioCall::ConnectStation {
            ssid: credential.ssid().to_string(),
        });

        let outcome = {
            let sim = self.sim();
            if sim.unresponsive {
                return Ok(());
            }
            let visible = sim.visible.iter().any(|n| n.ssid == credential.ssid());
            match sim.passwords.get(credential.ssid()) {
                Some(expected) if visible && expected == credential.password() => {
                    RadioEvent::Connected { ip: sim.station_ip }
                }
                _ => RadioEvent::Disconnected,
            }
        };
        self.publish_later(outcome);
        Ok(())
    }

    async fn stop_station(&self) -> Result<(), NetworkError> {
        self.record(RadioCall::StopStation);
        Ok(())
    }

    async fn start_access_point(&self, config: &AccessPointConfig) -> Result<Ipv4Addr, NetworkError> {
        self.record(RadioCall::StartAccessPoint {
            ssid: config.ssid.clone(),
        });
        self.publish_later(RadioEvent::ApStarted);
        Ok(config.address)
    }

    async fn stop_access_point(&self) -> Result<(), NetworkError> {
        self.record(RadioCall::StopAccessPoint);
        Ok(())
    }

    async fn set_hostname(&self, hostname: &str) -> Result<(), NetworkError> {
        self.record(RadioCall::SetHostname(hostname.to_string()));
        Ok(())
    }
}

/// Records mDNS registrations next to the radio calls, so tests see one
/// ordered history.
#[async_trait]
impl ServiceAdvertiser for SimulatedRadio {
    async fn advertise(&self, hostname: &str, _ip: Ipv4Addr, http_port: u16) -> Result<(), NetworkError> {
        self.record(RadioCall::Advertise {
            hostname: hostname.to_string(),
            port: http_port,
        });
        Ok(())
    }

    async fn withdraw(&self) -> Result<(), NetworkError> {
        self.record(RadioCall::Withdraw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn right_password_connects() {
        let (radio, mut rx) = SimulatedRadio::new();
        radio.add_network("Home", -40, AuthMode::Wpa2, "12345678");

        radio
            .connect_station(&Credential::new("Home", "12345678").unwrap())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(RadioEvent::Connected { .. })));

        radio
            .connect_station(&Credential::new("Home", "wrong").unwrap())
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(RadioEvent::Disconnected));
    }

    #[tokio::test]
    async fn invisible_network_never_connects() {
        let (radio, mut rx) = SimulatedRadio::new();
        radio
            .connect_station(&Credential::new("Nowhere", "").unwrap())
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(RadioEvent::Disconnected));
    }

    #[tokio::test]
    async fn calls_are_recorded_in_order() {
        let (radio, _rx) = SimulatedRadio::new();
        radio.set_scan_fails(true);
        assert!(radio.scan().await.is_err());
        radio.set_hostname("petbot").await.unwrap();
        assert_eq!(
            radio.calls(),
            vec![RadioCall::Scan, RadioCall::SetHostname("petbot".into())]
        );
    }
}
