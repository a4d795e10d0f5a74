// 后端：wpa_cli + hostapd
// STA 通过 wpa_cli 控制 wpa_supplicant；AP 通过 hostapd，DHCP 由 dnsmasq 提供（DNS 由本程序的应答器处理）。

use super::utils::{parse_scan_results, status_field};
use crate::config::{AccessPointConfig, ApAuth};
use crate::credentials::Credential;
use crate::error::NetworkError;
use crate::traits::{RadioEvent, ScanResult, WifiRadio};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const DEFAULT_IFACE: &str = "wlan0";
const HOSTAPD_CONF: &str = "/run/petbot-hostapd.conf";
const STATUS_POLL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct WpaCliRadio {
    iface: String,
    hostapd_conf: PathBuf,
    events: mpsc::Sender<RadioEvent>,
    // 控制 hostapd / dnsmasq 进程的句柄
    hostapd: Mutex<Option<Child>>,
    dnsmasq: Mutex<Option<Child>>,
    /// Polls `wpa_cli status` and turns state changes into radio events.
    monitor: Mutex<Option<JoinHandle<()>>>,
    ap_cidr: Mutex<Option<String>>,
    // hostapd 占用网卡期间为 true，此时不能碰 wpa_supplicant
    ap_active: AtomicBool,
    // 启动热点前最后一次扫描的结果，热点期间直接返回
    last_scan: Mutex<Option<Vec<ScanResult>>>,
}

impl WpaCliRadio {
    pub fn new() -> (Self, mpsc::Receiver<RadioEvent>) {
        Self::with_interface(DEFAULT_IFACE)
    }

    pub fn with_interface(iface: &str) -> (Self, mpsc::Receiver<RadioEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let radio = Self {
            iface: iface.to_string(),
            hostapd_conf: PathBuf::from(HOSTAPD_CONF),
            events: tx,
            hostapd: Mutex::new(None),
            dnsmasq: Mutex::new(None),
            monitor: Mutex::new(None),
            ap_cidr: Mutex::new(None),
            ap_active: AtomicBool::new(false),
            last_scan: Mutex::new(None),
        };
        (radio, rx)
    }

    async fn wpa_cli(&self, args: &[&str]) -> Result<String, NetworkError> {
        run(&self.iface, args).await
    }

    async fn ensure_supplicant(&self) {
        if self.wpa_cli(&["ping"]).await.is_ok() {
            return;
        }
        let _ = Command::new("wpa_supplicant")
            .arg("-B")
            .arg(format!("-i{}", self.iface))
            .arg("-c/etc/wpa_supplicant.conf")
            .status()
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    async fn scan_with_supplicant(&self) -> Result<Vec<ScanResult>, NetworkError> {
        self.ensure_supplicant().await;
        self.wpa_cli(&["scan"])
            .await
            .map_err(|e| NetworkError::ScanFailed(e.to_string()))?;

        // 等待一会儿以获取结果
        tokio::time::sleep(Duration::from_secs(5)).await;

        let output = self
            .wpa_cli(&["scan_results"])
            .await
            .map_err(|e| NetworkError::ScanFailed(e.to_string()))?;
        let networks = parse_scan_results(&output);
        *self.last_scan.lock().await = Some(networks.clone());
        Ok(networks)
    }

    async fn stop_monitor(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }
    }

    fn hostapd_config(&self, config: &AccessPointConfig) -> String {
        let mut conf = format!(
            "interface={}\ndriver=nl80211\nssid={}\nhw_mode=g\nchannel={}\nmax_num_sta={}\n",
            self.iface, config.ssid, config.channel, config.max_connections
        );
        match (config.auth(), config.passphrase()) {
            (ApAuth::Wpa2Personal, Some(pass)) => {
                conf.push_str("wpa=2\nwpa_key_mgmt=WPA-PSK\nrsn_pairwise=CCMP\n");
                conf.push_str(&format!("wpa_passphrase={}\n", pass));
            }
            _ => conf.push_str("auth_algs=1\n"),
        }
        conf
    }
}

async fn run(iface: &str, args: &[&str]) -> Result<String, NetworkError> {
    let output = Command::new("wpa_cli")
        .arg("-i")
        .arg(iface)
        .args(args)
        .output()
        .await
        .map_err(|e| NetworkError::Radio(format!("wpa_cli not runnable: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() || stdout.trim() == "FAIL" {
        return Err(NetworkError::Radio(format!(
            "wpa_cli {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(stdout)
}

/// Watches one association. Reports `Connected` once DHCP produced an
/// address, then keeps watching so a lost link is reported as `Disconnected`.
async fn monitor_association(iface: String, events: mpsc::Sender<RadioEvent>) {
    let mut connected = false;
    loop {
        tokio::time::sleep(STATUS_POLL).await;
        let status = match run(&iface, &["status"]).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("wpa_cli status failed: {}", e);
                continue;
            }
        };

        let state = status_field(&status, "wpa_state").unwrap_or("UNKNOWN");
        let ip = status_field(&status, "ip_address").and_then(|s| s.parse::<Ipv4Addr>().ok());

        match (connected, state, ip) {
            (false, "COMPLETED", Some(ip)) => {
                connected = true;
                let _ = events.send(RadioEvent::Connected { ip }).await;
            }
            (true, s, _) if s != "COMPLETED" => {
                let _ = events.send(RadioEvent::Disconnected).await;
                return;
            }
            (false, "DISCONNECTED" | "INACTIVE", _) if status.contains("reason=WRONG_KEY") => {
                let _ = events.send(RadioEvent::Disconnected).await;
                return;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl WifiRadio for WpaCliRadio {
    async fn scan(&self) -> Result<Vec<ScanResult>, NetworkError> {
        if self.ap_active.load(Ordering::SeqCst) {
            // 单网卡：hostapd 运行时扫描会把热点踢掉，只返回缓存
            let cached = self.last_scan.lock().await.clone().unwrap_or_default();
            tracing::debug!(count = cached.len(), "access point up, serving cached scan");
            return Ok(cached);
        }
        let networks = self.scan_with_supplicant().await?;
        tracing::debug!(count = networks.len(), "scan finished");
        Ok(networks)
    }

    async fn connect_station(&self, credential: &Credential) -> Result<(), NetworkError> {
        self.stop_monitor().await;
        self.ensure_supplicant().await;

        // 只保留当前这一个网络，凭据由本程序自己持久化
        let _ = self.wpa_cli(&["remove_network", "all"]).await;
        let id = self.wpa_cli(&["add_network"]).await?;
        let id = id.trim().to_string();
        if id.parse::<u32>().is_err() {
            return Err(NetworkError::AssociationFailed(format!(
                "unexpected add_network reply: {}",
                id
            )));
        }

        let ssid_arg = format!("\"{}\"", credential.ssid());
        self.wpa_cli(&["set_network", &id, "ssid", &ssid_arg]).await?;
        if credential.has_password() {
            let psk_arg = format!("\"{}\"", credential.password());
            self.wpa_cli(&["set_network", &id, "psk", &psk_arg]).await?;
        } else {
            self.wpa_cli(&["set_network", &id, "key_mgmt", "NONE"]).await?;
        }
        self.wpa_cli(&["select_network", &id]).await?;

        // 在后台运行 udhcpc 获取地址
        let _ = Command::new("udhcpc")
            .arg("-i")
            .arg(&self.iface)
            .arg("-q")
            .spawn();

        let handle = tokio::spawn(monitor_association(self.iface.clone(), self.events.clone()));
        *self.monitor.lock().await = Some(handle);
        tracing::info!(ssid = %credential.ssid(), "association requested");
        Ok(())
    }

    async fn stop_station(&self) -> Result<(), NetworkError> {
        self.stop_monitor().await;
        let _ = self.wpa_cli(&["disconnect"]).await;
        Ok(())
    }

    async fn start_access_point(&self, config: &AccessPointConfig) -> Result<Ipv4Addr, NetworkError> {
        let ap_err = |e: std::io::Error| NetworkError::AccessPoint(e.to_string());

        self.stop_monitor().await;
        // 热点起来后就不能再扫描了，先扫一次给配网页面用
        if !self.ap_active.load(Ordering::SeqCst) {
            match self.scan_with_supplicant().await {
                Ok(networks) => tracing::info!(count = networks.len(), "scan cached for the portal"),
                Err(e) => tracing::warn!("pre-portal scan failed: {}", e),
            }
        }
        self.ap_active.store(true, Ordering::SeqCst);

        // 在启动 AP 之前，清理可能残留的进程
        let _ = Command::new("killall")
            .args(["-9", "hostapd", "dnsmasq", "wpa_supplicant"])
            .status()
            .await;

        let cidr = format!("{}/24", config.address);
        let output = Command::new("ip")
            .args(["addr", "add", &cidr, "dev", &self.iface])
            .output()
            .await
            .map_err(ap_err)?;
        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            if !error_msg.contains("File exists") {
                return Err(NetworkError::AccessPoint(format!(
                    "Failed to set IP address: {}",
                    error_msg
                )));
            }
        }
        *self.ap_cidr.lock().await = Some(cidr);

        tokio::fs::write(&self.hostapd_conf, self.hostapd_config(config))
            .await
            .map_err(ap_err)?;
        let child = Command::new("hostapd")
            .arg(&self.hostapd_conf)
            .kill_on_drop(true)
            .spawn()
            .map_err(ap_err)?;
        *self.hostapd.lock().await = Some(child);

        // 只提供 DHCP；DNS 端口留给强制门户应答器
        let octets = config.address.octets();
        let range = format!(
            "--dhcp-range={0}.{1}.{2}.100,{0}.{1}.{2}.200,12h",
            octets[0], octets[1], octets[2]
        );
        let dnsmasq = Command::new("dnsmasq")
            .arg(format!("--interface={}", self.iface))
            .arg(range)
            .arg(format!("--dhcp-option=6,{}", config.address))
            .args(["--port=0", "--no-resolv", "--no-hosts", "--no-daemon"])
            .kill_on_drop(true)
            .spawn()
            .map_err(ap_err)?;
        *self.dnsmasq.lock().await = Some(dnsmasq);

        let _ = self.events.send(RadioEvent::ApStarted).await;
        Ok(config.address)
    }

    async fn stop_access_point(&self) -> Result<(), NetworkError> {
        self.ap_active.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.dnsmasq.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Some(mut child) = self.hostapd.lock().await.take() {
            let _ = child.kill().await;
        }

        if let Some(cidr) = self.ap_cidr.lock().await.take() {
            let output = Command::new("ip")
                .args(["addr", "del", &cidr, "dev", &self.iface])
                .output()
                .await
                .map_err(|e| NetworkError::AccessPoint(e.to_string()))?;
            if !output.status.success() {
                let error_msg = String::from_utf8_lossy(&output.stderr);
                if !error_msg.contains("Cannot assign requested address") {
                    return Err(NetworkError::AccessPoint(format!(
                        "Failed to clean up IP address: {}",
                        error_msg
                    )));
                }
            }
        }
        Ok(())
    }

    async fn set_hostname(&self, hostname: &str) -> Result<(), NetworkError> {
        let status = Command::new("hostname")
            .arg(hostname)
            .status()
            .await
            .map_err(|e| NetworkError::Radio(e.to_string()))?;
        if !status.success() {
            return Err(NetworkError::Radio(format!("hostname {} failed", hostname)));
        }
        Ok(())
    }
}
