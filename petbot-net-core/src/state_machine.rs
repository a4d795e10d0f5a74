//! Station / portal bring-up as a pure transition function.
//!
//! The machine never touches the radio itself. Each step returns the next
//! state plus the effects to run, and the supervisor feeds effect outcomes
//! back in as new events.

use crate::credentials::Credential;
use crate::traits::{RadioEvent, ScanResult};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Sub-steps of a station attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Scanning { saved: Vec<Credential> },
    Associating { credential: Credential, retries: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Init,
    TryingStation(Phase),
    ConnectedStation { ssid: String, ip: Ipv4Addr },
    PortalActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Boot,
    CredentialsLoaded(Vec<Credential>),
    ScanCompleted(Vec<ScanResult>),
    ScanFailed,
    Radio(RadioEvent),
    /// The radio refused the association request outright.
    AssociationFailed,
    ConnectTimeout,
    /// New credentials were saved through the management API.
    ReconnectRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LoadCredentials,
    Scan,
    ConnectStation(Credential),
    ArmConnectTimer,
    CancelConnectTimer,
    StopStation,
    /// Registers the hostname and the web service on the LAN (mDNS).
    AdvertiseHostname,
    WithdrawHostname,
    StartHttpServer,
    StartAccessPoint,
    StartDnsResponder,
    StopDnsResponder,
    StopAccessPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Association failures retried before giving up on the station path.
    pub retry_limit: u32,
    pub connect_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Advances the machine by one event.
pub fn transition(state: State, event: Event, policy: &Policy) -> (State, Vec<Action>) {
    use Action::*;

    match (state, event) {
        (State::Init, Event::Boot) => (State::TryingStation(Phase::Loading), vec![LoadCredentials]),

        (State::TryingStation(Phase::Loading), Event::CredentialsLoaded(saved)) => {
            if saved.is_empty() {
                enter_portal(Vec::new())
            } else {
                (State::TryingStation(Phase::Scanning { saved }), vec![Scan])
            }
        }

        (State::TryingStation(Phase::Scanning { saved }), Event::ScanCompleted(visible)) => {
            match select_best(&saved, &visible) {
                Some(credential) => (
                    State::TryingStation(Phase::Associating {
                        credential: credential.clone(),
                        retries: 0,
                    }),
                    vec![ConnectStation(credential), ArmConnectTimer],
                ),
                None => enter_portal(vec![StopStation]),
            }
        }

        (State::TryingStation(Phase::Scanning { .. }), Event::ScanFailed) => enter_portal(vec![StopStation]),

        (
            State::TryingStation(Phase::Associating { credential, retries }),
            Event::Radio(RadioEvent::Disconnected) | Event::AssociationFailed,
        ) => {
            if retries < policy.retry_limit {
                (
                    State::TryingStation(Phase::Associating {
                        credential: credential.clone(),
                        retries: retries + 1,
                    }),
                    vec![ConnectStation(credential), ArmConnectTimer],
                )
            } else {
                enter_portal(vec![CancelConnectTimer, StopStation])
            }
        }

        (State::TryingStation(Phase::Associating { .. }), Event::ConnectTimeout) => {
            enter_portal(vec![StopStation])
        }

        (
            State::TryingStation(Phase::Associating { credential, .. }),
            Event::Radio(RadioEvent::Connected { ip }),
        ) => (
            State::ConnectedStation {
                ssid: credential.ssid().to_string(),
                ip,
            },
            vec![CancelConnectTimer, AdvertiseHostname, StartHttpServer],
        ),

        // HTTP 服务保持运行，以便客户端继续轮询状态
        (State::PortalActive, Event::ReconnectRequested) => (
            State::TryingStation(Phase::Loading),
            vec![StopDnsResponder, StopAccessPoint, LoadCredentials],
        ),

        (State::ConnectedStation { .. }, Event::Radio(RadioEvent::Disconnected)) => (
            State::TryingStation(Phase::Loading),
            vec![WithdrawHostname, StopStation, LoadCredentials],
        ),

        // Stale radio events, duplicate reconnect requests, timers that
        // fired after the attempt they belonged to.
        (state, _) => (state, Vec::new()),
    }
}

fn enter_portal(mut actions: Vec<Action>) -> (State, Vec<Action>) {
    actions.extend([
        Action::StartAccessPoint,
        Action::StartHttpServer,
        Action::StartDnsResponder,
    ]);
    (State::PortalActive, actions)
}

/// Picks the saved credential whose network is visible with the strongest
/// signal. On equal signal the first match found is kept.
pub fn select_best(saved: &[Credential], visible: &[ScanResult]) -> Option<Credential> {
    let mut best: Option<(&Credential, i16)> = None;
    for credential in saved {
        for network in visible.iter().filter(|n| n.ssid == credential.ssid()) {
            if best.map_or(true, |(_, rssi)| network.signal_strength > rssi) {
                best = Some((credential, network.signal_strength));
            }
        }
    }
    best.map(|(c, _)| c.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Station,
    AccessPoint,
    Transitioning,
}

/// What the rest of the device may know about the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub mode: Mode,
    pub connected: bool,
    pub ip: Option<Ipv4Addr>,
}

impl SessionState {
    pub const INITIAL: SessionState = SessionState {
        mode: Mode::Transitioning,
        connected: false,
        ip: None,
    };

    /// Session derived from a machine state; `ap_ip` is the access point's
    /// address when the portal is up.
    pub fn from_state(state: &State, ap_ip: Option<Ipv4Addr>) -> Self {
        match state {
            State::Init | State::TryingStation(_) => Self::INITIAL,
            State::ConnectedStation { ip, .. } => SessionState {
                mode: Mode::Station,
                connected: true,
                ip: Some(*ip),
            },
            State::PortalActive => SessionState {
                mode: Mode::AccessPoint,
                connected: false,
                ip: ap_ip,
            },
        }
    }
}
