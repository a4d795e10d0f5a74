//! mDNS advertisement of the management UI once the station is up.

use crate::error::NetworkError;
use crate::traits::ServiceAdvertiser;
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;

const HTTP_SERVICE_TYPE: &str = "_http._tcp.local.";
const INSTANCE_NAME: &str = "PetBot";

struct Registration {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Publishes `<hostname>.local` and an `_http._tcp` service through an
/// `mdns-sd` responder. The responder thread only runs while something is
/// advertised.
#[derive(Default)]
pub struct MdnsAdvertiser {
    current: Mutex<Option<Registration>>,
}

impl MdnsAdvertiser {
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&self) -> Option<Registration> {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

/// The service record for the web UI on `hostname`.
pub fn http_service(hostname: &str, ip: Ipv4Addr, port: u16) -> Result<ServiceInfo, NetworkError> {
    let host = format!("{}.local.", hostname);
    let properties = HashMap::from([("path".to_string(), "/".to_string())]);
    ServiceInfo::new(
        HTTP_SERVICE_TYPE,
        INSTANCE_NAME,
        &host,
        IpAddr::V4(ip),
        port,
        properties,
    )
    .map_err(|e| NetworkError::Radio(format!("invalid mDNS record: {}", e)))
}

fn unregister(registration: Registration) {
    if let Err(e) = registration.daemon.unregister(&registration.fullname) {
        tracing::warn!(service = %registration.fullname, "mDNS unregister failed: {}", e);
    }
    if let Err(e) = registration.daemon.shutdown() {
        tracing::debug!("mDNS responder shutdown: {}", e);
    }
}

#[async_trait]
impl ServiceAdvertiser for MdnsAdvertiser {
    async fn advertise(&self, hostname: &str, ip: Ipv4Addr, http_port: u16) -> Result<(), NetworkError> {
        if let Some(previous) = self.take() {
            unregister(previous);
        }

        let info = http_service(hostname, ip, http_port)?;
        let fullname = info.get_fullname().to_string();
        let daemon = ServiceDaemon::new().map_err(|e| NetworkError::Radio(format!("mDNS responder: {}", e)))?;
        daemon
            .register(info)
            .map_err(|e| NetworkError::Radio(format!("mDNS register: {}", e)))?;

        tracing::info!(host = %format!("{}.local", hostname), %ip, port = http_port, "mDNS service advertised");
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = Some(Registration { daemon, fullname });
        Ok(())
    }

    async fn withdraw(&self) -> Result<(), NetworkError> {
        if let Some(registration) = self.take() {
            tracing::info!(service = %registration.fullname, "mDNS service withdrawn");
            unregister(registration);
        }
        Ok(())
    }
}
