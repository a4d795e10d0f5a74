use crate::traits::{AuthMode, ScanResult};

/// Parse `wpa_cli scan_results` output into scan results.
///
/// ```text
/// bssid / frequency / signal level / flags / ssid
/// aa:bb:cc:dd:ee:ff	2437	-48	[WPA2-PSK-CCMP][ESS]	Home
/// ```
/// Hidden networks (empty or NUL SSID) and lines with a non-numeric signal
/// are skipped.
pub fn parse_scan_results(output: &str) -> Vec<ScanResult> {
    let mut networks = Vec::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 5 {
            continue;
        }
        let Ok(signal_strength) = parts[2].trim().parse::<i16>() else {
            continue;
        };
        let ssid = parts[4].to_string();
        if ssid.is_empty() || ssid.starts_with("\\x00") {
            continue;
        }

        networks.push(ScanResult {
            ssid,
            signal_strength,
            auth_mode: auth_from_flags(parts[3]),
        });
    }
    networks
}

fn auth_from_flags(flags: &str) -> AuthMode {
    if flags.contains("SAE") || flags.contains("WPA3") {
        AuthMode::Wpa3
    } else if flags.contains("WPA2") && flags.contains("[WPA-") {
        AuthMode::WpaWpa2
    } else if flags.contains("WPA2") || flags.contains("RSN") {
        AuthMode::Wpa2
    } else if flags.contains("WPA") {
        AuthMode::Wpa
    } else if flags.contains("WEP") {
        AuthMode::Wep
    } else if flags.is_empty() || flags == "[ESS]" {
        AuthMode::Open
    } else {
        AuthMode::Unknown
    }
}

/// Value of `key=` in `wpa_cli status` style output.
pub fn status_field<'a>(status: &'a str, key: &str) -> Option<&'a str> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
}
