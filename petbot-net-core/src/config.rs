use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// 顶层应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ap: AccessPointConfig,
    pub station: StationConfig,
    pub http: HttpConfig,
    pub dns: DnsConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
    pub ota: OtaConfig,
}

// ============= AP 配置 =============

/// Settings of the setup access point raised when no saved network is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    /// `None` or fewer than 8 characters means an open network.
    pub password: Option<String>,
    pub channel: u8,
    pub max_connections: u8,
    /// The access point's own address, used as the captive DNS answer.
    pub address: Ipv4Addr,
}

/// Access point authentication derived from the configured password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApAuth {
    Open,
    Wpa2Personal,
}

impl AccessPointConfig {
    pub const MIN_PASSWORD_LEN: usize = 8;

    pub fn auth(&self) -> ApAuth {
        match &self.password {
            Some(p) if p.chars().count() >= Self::MIN_PASSWORD_LEN => ApAuth::Wpa2Personal,
            _ => ApAuth::Open,
        }
    }

    /// The passphrase to configure, only when WPA2 is in effect.
    pub fn passphrase(&self) -> Option<&str> {
        match self.auth() {
            ApAuth::Wpa2Personal => self.password.as_deref(),
            ApAuth::Open => None,
        }
    }
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "PetBot-Setup".to_string(),
            password: Some("petbot123".to_string()),
            channel: 6,
            max_connections: 4,
            address: Ipv4Addr::new(192, 168, 4, 1),
        }
    }
}

// ============= STA 配置 =============

#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Hostname registered for DHCP / mDNS once associated.
    pub hostname: String,
    /// Bounded wait for an association attempt to produce an address.
    pub connect_timeout: Duration,
    /// Association failures tolerated before falling back to the portal.
    pub retry_limit: u32,
}

impl StationConfig {
    pub const DEFAULT_RETRY_LIMIT: u32 = 5;
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            hostname: "petbot".to_string(),
            connect_timeout: Duration::from_secs(10),
            retry_limit: Self::DEFAULT_RETRY_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_addr: SocketAddr,
    /// Where captive-portal OS connectivity checks are redirected.
    pub portal_url: String,
    /// Serve UI files from this directory instead of the embedded copy.
    pub ui_dir: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            portal_url: "http://petbot.com/".to_string(),
            ui_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub bind_addr: SocketAddr,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the credential blob.
    pub dir: PathBuf,
    pub capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/petbot"),
            capacity: crate::credentials::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub capacity: usize,
    pub line_len: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: crate::log_ring::DEFAULT_CAPACITY,
            line_len: crate::log_ring::DEFAULT_LINE_LEN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OtaConfig {
    /// Directory standing in for the inactive update partition.
    pub dir: PathBuf,
    pub max_image_size: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/petbot/ota"),
            max_image_size: crate::ota::DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ap: AccessPointConfig::default(),
            station: StationConfig::default(),
            http: HttpConfig::default(),
            dns: DnsConfig::default(),
            storage: StorageConfig::default(),
            log: LogConfig::default(),
            ota: OtaConfig::default(),
        }
    }
}

// ============= TOML 解析 =============

/// 用于解析 TOML 的临时结构
#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct AppConfigFile {
    ap: ApToml,
    station: StationToml,
    http: HttpToml,
    dns: DnsToml,
    storage: StorageToml,
    log: LogToml,
    ota: OtaToml,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct ApToml {
    ssid: Option<String>,
    password: Option<String>,
    channel: Option<u8>,
    max_connections: Option<u8>,
    address: Option<Ipv4Addr>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct StationToml {
    hostname: Option<String>,
    connect_timeout_secs: Option<u64>,
    retry_limit: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct HttpToml {
    bind_addr: Option<SocketAddr>,
    portal_url: Option<String>,
    ui_dir: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct DnsToml {
    bind_addr: Option<SocketAddr>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct StorageToml {
    dir: Option<PathBuf>,
    // 记录头用 u16 存条目数，超出范围在解析时直接报错
    capacity: Option<u16>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct LogToml {
    capacity: Option<usize>,
    line_len: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct OtaToml {
    dir: Option<PathBuf>,
    max_image_size: Option<u64>,
}

impl From<AppConfigFile> for AppConfig {
    fn from(t: AppConfigFile) -> Self {
        let d = AppConfig::default();

        // An empty password in the file means an open access point.
        let ap_password = match t.ap.password {
            Some(p) if p.is_empty() => None,
            Some(p) => Some(p),
            None => d.ap.password,
        };

        AppConfig {
            ap: AccessPointConfig {
                ssid: t.ap.ssid.unwrap_or(d.ap.ssid),
                password: ap_password,
                // 信道为 0 时回退到默认信道
                channel: t.ap.channel.filter(|c| *c != 0).unwrap_or(d.ap.channel),
                max_connections: t.ap.max_connections.unwrap_or(d.ap.max_connections),
                address: t.ap.address.unwrap_or(d.ap.address),
            },
            station: StationConfig {
                hostname: t.station.hostname.unwrap_or(d.station.hostname),
                connect_timeout: t
                    .station
                    .connect_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(d.station.connect_timeout),
                retry_limit: t.station.retry_limit.unwrap_or(d.station.retry_limit),
            },
            http: HttpConfig {
                bind_addr: t.http.bind_addr.unwrap_or(d.http.bind_addr),
                portal_url: t.http.portal_url.unwrap_or(d.http.portal_url),
                ui_dir: t.http.ui_dir.or(d.http.ui_dir),
            },
            dns: DnsConfig {
                bind_addr: t.dns.bind_addr.unwrap_or(d.dns.bind_addr),
            },
            storage: StorageConfig {
                dir: t.storage.dir.unwrap_or(d.storage.dir),
                capacity: t
                    .storage
                    .capacity
                    .filter(|c| *c > 0)
                    .map(usize::from)
                    .unwrap_or(d.storage.capacity),
            },
            log: LogConfig {
                capacity: t.log.capacity.filter(|c| *c > 0).unwrap_or(d.log.capacity),
                line_len: t.log.line_len.filter(|c| *c > 0).unwrap_or(d.log.line_len),
            },
            ota: OtaConfig {
                dir: t.ota.dir.unwrap_or(d.ota.dir),
                max_image_size: t.ota.max_image_size.unwrap_or(d.ota.max_image_size),
            },
        }
    }
}

// ============= 配置加载函数 =============

/// 从 TOML 字符串加载应用配置
pub fn load_config_from_toml_str(s: &str) -> crate::Result<AppConfig> {
    let parsed: AppConfigFile = toml::from_str(s)?;
    Ok(AppConfig::from(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_reference_defaults() {
        let cfg = load_config_from_toml_str("").unwrap();
        assert_eq!(cfg.ap.ssid, "PetBot-Setup");
        assert_eq!(cfg.ap.channel, 6);
        assert_eq!(cfg.station.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.station.retry_limit, 5);
        assert_eq!(cfg.storage.capacity, 8);
        assert_eq!(cfg.log.capacity, 256);
        assert_eq!(cfg.log.line_len, 160);
        assert_eq!(cfg.http.portal_url, "http://petbot.com/");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = load_config_from_toml_str(
            r#"
            [ap]
            ssid = "Rover"
            password = ""
            channel = 0

            [station]
            connect_timeout_secs = 3
            retry_limit = 0

            [http]
            bind_addr = "127.0.0.1:8080"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.ap.ssid, "Rover");
        assert_eq!(cfg.ap.password, None);
        assert_eq!(cfg.ap.channel, 6);
        assert_eq!(cfg.station.connect_timeout, Duration::from_secs(3));
        assert_eq!(cfg.station.retry_limit, 0);
        assert_eq!(cfg.http.bind_addr, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = load_config_from_toml_str("[ap]\nssdi = \"typo\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn storage_capacity_must_fit_the_record_header() {
        let cfg = load_config_from_toml_str("[storage]\ncapacity = 65535\n").unwrap();
        assert_eq!(cfg.storage.capacity, 65535);

        let err = load_config_from_toml_str("[storage]\ncapacity = 70000\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn short_ap_password_means_open_network() {
        let mut ap = AccessPointConfig::default();
        assert_eq!(ap.auth(), ApAuth::Wpa2Personal);
        assert_eq!(ap.passphrase(), Some("petbot123"));

        ap.password = Some("1234567".into());
        assert_eq!(ap.auth(), ApAuth::Open);
        assert_eq!(ap.passphrase(), None);

        ap.password = None;
        assert_eq!(ap.auth(), ApAuth::Open);
    }
}
