//! The task that owns the network session.
//!
//! It is the only writer of [`SessionState`]. Radio events, reconnect
//! requests and the connect timer are turned into state machine events; the
//! resulting actions are executed here and their outcomes fed back in.

use crate::config::AccessPointConfig;
use crate::credentials::CredentialStore;
use crate::dns::DnsResponder;
use crate::error::NetworkError;
use crate::state_machine::{transition, Action, Event, Phase, Policy, SessionState, State};
use crate::traits::{RadioEvent, ServiceAdvertiser, WifiRadio};
use crate::web_server::HttpLauncher;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reconnect,
    Shutdown,
}

/// Where the supervisor's servers are currently listening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceAddrs {
    pub http: Option<SocketAddr>,
    pub dns: Option<SocketAddr>,
}

/// Cloneable access to the supervisor for HTTP handlers and other tasks.
/// Readers never mutate the session; they only signal.
#[derive(Clone)]
pub struct NetworkHandle {
    commands: mpsc::Sender<Command>,
    session: watch::Receiver<SessionState>,
    services: watch::Receiver<ServiceAddrs>,
}

impl NetworkHandle {
    /// Asks the supervisor to retry the station path with the saved
    /// credentials. Returns false when the supervisor is gone.
    pub fn request_reconnect(&self) -> bool {
        match self.commands.try_send(Command::Reconnect) {
            Ok(()) => true,
            // 队列已满说明已有待处理的重连请求，合并即可
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn session(&self) -> SessionState {
        *self.session.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.clone()
    }

    pub fn services(&self) -> ServiceAddrs {
        *self.services.borrow()
    }

    /// Stops the supervisor and everything it started.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Receiving ends of a [`NetworkHandle`], consumed by [`NetworkSupervisor::new`].
pub struct Mailbox {
    commands: mpsc::Receiver<Command>,
    session: watch::Sender<SessionState>,
    services: watch::Sender<ServiceAddrs>,
}

/// Creates the handle before the supervisor exists, so the HTTP router can
/// hold it while the supervisor owns the router's launcher.
pub fn channel() -> (NetworkHandle, Mailbox) {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (session_tx, session_rx) = watch::channel(SessionState::INITIAL);
    let (services_tx, services_rx) = watch::channel(ServiceAddrs::default());
    (
        NetworkHandle {
            commands: cmd_tx,
            session: session_rx,
            services: services_rx,
        },
        Mailbox {
            commands: cmd_rx,
            session: session_tx,
            services: services_tx,
        },
    )
}

pub struct SupervisorConfig {
    pub policy: Policy,
    pub access_point: AccessPointConfig,
    pub hostname: String,
    /// Advertised when the HTTP server has no bound address yet.
    pub http_port: u16,
    pub dns_bind: SocketAddr,
}

pub struct NetworkSupervisor {
    state: State,
    config: SupervisorConfig,
    radio: Arc<dyn WifiRadio>,
    advertiser: Arc<dyn ServiceAdvertiser>,
    store: Arc<CredentialStore>,
    http: HttpLauncher,
    dns: Option<DnsResponder>,
    ap_ip: Option<Ipv4Addr>,
    deadline: Option<Instant>,
    pending: VecDeque<Event>,
    radio_events: mpsc::Receiver<RadioEvent>,
    radio_closed: bool,
    mailbox: Mailbox,
}

fn label(state: &State) -> &'static str {
    match state {
        State::Init => "INIT",
        State::TryingStation(Phase::Loading) => "TRYING_STATION/loading",
        State::TryingStation(Phase::Scanning { .. }) => "TRYING_STATION/scanning",
        State::TryingStation(Phase::Associating { .. }) => "TRYING_STATION/associating",
        State::ConnectedStation { .. } => "CONNECTED_STATION",
        State::PortalActive => "PORTAL_ACTIVE",
    }
}

impl NetworkSupervisor {
    pub fn new(
        config: SupervisorConfig,
        radio: Arc<dyn WifiRadio>,
        radio_events: mpsc::Receiver<RadioEvent>,
        advertiser: Arc<dyn ServiceAdvertiser>,
        store: Arc<CredentialStore>,
        http: HttpLauncher,
        mailbox: Mailbox,
    ) -> Self {
        Self {
            state: State::Init,
            config,
            radio,
            advertiser,
            store,
            http,
            dns: None,
            ap_ip: None,
            deadline: None,
            pending: VecDeque::new(),
            radio_events,
            radio_closed: false,
            mailbox,
        }
    }

    /// Runs until [`NetworkHandle::shutdown`] is called or every handle is dropped.
    pub async fn run(mut self) {
        self.pending.push_back(Event::Boot);

        loop {
            while let Some(event) = self.pending.pop_front() {
                self.step(event).await;
            }

            let deadline = self.deadline;
            let event = tokio::select! {
                ev = self.radio_events.recv(), if !self.radio_closed => match ev {
                    Some(ev) => Event::Radio(ev),
                    None => {
                        tracing::warn!("radio event channel closed");
                        self.radio_closed = true;
                        continue;
                    }
                },
                cmd = self.mailbox.commands.recv() => match cmd {
                    Some(Command::Reconnect) => Event::ReconnectRequested,
                    Some(Command::Shutdown) | None => break,
                },
                _ = wait_deadline(deadline) => {
                    self.deadline = None;
                    Event::ConnectTimeout
                }
            };
            self.pending.push_back(event);
        }

        self.shutdown().await;
    }

    async fn step(&mut self, event: Event) {
        let from = label(&self.state);
        let event_dbg = format!("{:?}", event);
        let reason = portal_reason(&event);
        let current = std::mem::replace(&mut self.state, State::Init);
        let (next, actions) = transition(current, event, &self.config.policy);
        self.state = next;

        let to = label(&self.state);
        if from != to {
            tracing::info!(from, to, "network state changed");
            if let (State::PortalActive, Some(reason)) = (&self.state, reason) {
                tracing::warn!("station path abandoned: {}", reason);
            }
        } else if actions.is_empty() {
            tracing::debug!(state = from, event = %event_dbg, "event ignored");
        }

        for action in actions {
            self.execute(action).await;
        }
        self.publish();
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::LoadCredentials => {
                let saved = self.store.load().await;
                tracing::info!(count = saved.len(), "saved credentials loaded");
                self.pending.push_back(Event::CredentialsLoaded(saved));
            }
            Action::Scan => match self.radio.scan().await {
                Ok(found) => {
                    tracing::info!(count = found.len(), "scan completed");
                    self.pending.push_back(Event::ScanCompleted(found));
                }
                Err(e) => {
                    tracing::warn!("scan failed: {}", e);
                    self.pending.push_back(Event::ScanFailed);
                }
            },
            Action::ConnectStation(credential) => {
                tracing::info!(ssid = %credential.ssid(), "connecting");
                if let Err(e) = self.radio.connect_station(&credential).await {
                    tracing::warn!(ssid = %credential.ssid(), "connect request rejected: {}", e);
                    self.pending.push_back(Event::AssociationFailed);
                }
            }
            Action::ArmConnectTimer => {
                self.deadline = Some(Instant::now() + self.config.policy.connect_timeout);
            }
            Action::CancelConnectTimer => self.deadline = None,
            Action::StopStation => {
                if let Err(e) = self.radio.stop_station().await {
                    tracing::warn!("stopping station failed: {}", e);
                }
            }
            Action::AdvertiseHostname => {
                let hostname = &self.config.hostname;
                if let Err(e) = self.radio.set_hostname(hostname).await {
                    tracing::warn!(hostname = %hostname, "hostname registration failed: {}", e);
                }
                let State::ConnectedStation { ip, .. } = self.state else {
                    return;
                };
                let port = self.http.local_addr().map_or(self.config.http_port, |a| a.port());
                if let Err(e) = self.advertiser.advertise(hostname, ip, port).await {
                    tracing::warn!(hostname = %hostname, "mDNS advertisement failed: {}", e);
                }
            }
            Action::WithdrawHostname => {
                if let Err(e) = self.advertiser.withdraw().await {
                    tracing::warn!("mDNS withdrawal failed: {}", e);
                }
            }
            Action::StartHttpServer => {
                if let Err(e) = self.http.ensure_started().await {
                    tracing::error!("HTTP server failed to start: {}", e);
                }
            }
            Action::StartAccessPoint => {
                let ap = &self.config.access_point;
                match self.radio.start_access_point(ap).await {
                    Ok(ip) => {
                        tracing::info!(ssid = %ap.ssid, auth = ?ap.auth(), %ip, "access point started");
                        self.ap_ip = Some(ip);
                    }
                    Err(e) => {
                        tracing::error!(ssid = %ap.ssid, "access point failed to start: {}", e);
                        self.ap_ip = Some(ap.address);
                    }
                }
            }
            Action::StartDnsResponder => {
                if self.dns.is_some() {
                    return;
                }
                let answer_ip = self.ap_ip.unwrap_or(self.config.access_point.address);
                match DnsResponder::start(self.config.dns_bind, answer_ip).await {
                    Ok(responder) => self.dns = Some(responder),
                    Err(e) => tracing::error!(bind = %self.config.dns_bind, "DNS responder failed to start: {}", e),
                }
            }
            Action::StopDnsResponder => {
                if let Some(responder) = self.dns.take() {
                    responder.stop().await;
                }
            }
            Action::StopAccessPoint => {
                if let Err(e) = self.radio.stop_access_point().await {
                    tracing::warn!("stopping access point failed: {}", e);
                }
                self.ap_ip = None;
            }
        }
    }

    fn publish(&self) {
        let session = SessionState::from_state(&self.state, self.ap_ip);
        self.mailbox.session.send_if_modified(|current| {
            let changed = *current != session;
            *current = session;
            changed
        });

        let services = ServiceAddrs {
            http: self.http.local_addr(),
            dns: self.dns.as_ref().map(|d| d.local_addr()),
        };
        self.mailbox.services.send_if_modified(|current| {
            let changed = *current != services;
            *current = services;
            changed
        });
    }

    async fn shutdown(&mut self) {
        tracing::info!(state = label(&self.state), "network supervisor stopping");
        if let Some(responder) = self.dns.take() {
            responder.stop().await;
        }
        self.http.stop().await;
        match self.state {
            State::PortalActive => {
                let _ = self.radio.stop_access_point().await;
            }
            State::ConnectedStation { .. } => {
                let _ = self.advertiser.withdraw().await;
                let _ = self.radio.stop_station().await;
            }
            State::TryingStation(_) => {
                let _ = self.radio.stop_station().await;
            }
            State::Init => {}
        }
        self.ap_ip = None;
        self.publish();
    }
}

/// Why an event may push a station attempt into the portal.
fn portal_reason(event: &Event) -> Option<NetworkError> {
    match event {
        Event::ScanCompleted(_) => Some(NetworkError::NoMatchingNetwork),
        Event::ConnectTimeout => Some(NetworkError::ConnectTimeout),
        Event::Radio(RadioEvent::Disconnected) | Event::AssociationFailed => {
            Some(NetworkError::AssociationFailed("retry limit reached".into()))
        }
        _ => None,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
