//! Simulation configuration parameters
//!
//! All tunable parameters for a simulated device and the world around it.
//! Every struct is `#[serde(default)]`, so a JSON file only needs to name
//! the fields it overrides.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::primitives::adc::AdcMode;
use crate::wifi::eventmon::EventDelivery;
use crate::wifi::{AuthMode, IpInfo};

/// Top-level configuration: the device, its timing model and the world.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub device: DeviceConfig,
    pub timing: TimingConfig,
    pub world: WorldConfig,
}

/// Properties of the simulated ESP8266 itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Value returned by `node::chipid`.
    pub chip_id: u32,
    /// Station interface MAC.
    pub sta_mac: [u8; 6],
    /// Soft-AP interface MAC.
    pub ap_mac: [u8; 6],
    /// What happens to WiFi events that fire before a handler is registered.
    pub wifi_event_delivery: EventDelivery,
    /// Busy-wait budget before the software watchdog resets the chip.
    pub watchdog_timeout_ms: u32,
    /// Forward RTC corrections above this are stepped, below are slewed.
    pub rtc_step_threshold_ms: u32,
    /// TCP maximum segment size; inbound payloads are framed to this.
    pub tcp_mss: u16,
    /// Servers used by `sntp::sync` when the caller names none.
    pub sntp_servers: Vec<String>,
    /// ADC mode flashed into the init data at power-on.
    pub adc_mode: AdcMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            chip_id: 0x00a1_b2c3,
            sta_mac: [0x5c, 0xcf, 0x7f, 0xa1, 0xb2, 0xc3],
            ap_mac: [0x5e, 0xcf, 0x7f, 0xa1, 0xb2, 0xc3],
            wifi_event_delivery: EventDelivery::Drop,
            watchdog_timeout_ms: 3200,
            rtc_step_threshold_ms: 1000,
            tcp_mss: 1460,
            sntp_servers: (0..4).map(|i| format!("{i}.nodemcu.pool.ntp.org")).collect(),
            adc_mode: AdcMode::Tout,
        }
    }
}

/// Latencies of the simulated radio and network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// One-way latency of every simulated network hop.
    pub net_latency_ms: u32,
    /// Time for a DNS answer to arrive.
    pub dns_latency_ms: u32,
    /// Time from `wifi::sta::connect` to association.
    pub wifi_assoc_ms: u32,
    /// Time from association to a DHCP lease (or a DHCP timeout).
    pub dhcp_ms: u32,
    /// Delay before an auto-connect station retries.
    pub wifi_retry_ms: u32,
    /// Duration of an access point scan.
    pub scan_ms: u32,
    /// How long an SNTP round waits for a reply.
    pub sntp_timeout_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            net_latency_ms: 5,
            dns_latency_ms: 20,
            wifi_assoc_ms: 1500,
            dhcp_ms: 500,
            wifi_retry_ms: 5000,
            scan_ms: 2000,
            sntp_timeout_ms: 2000,
        }
    }
}

/// The outside world: radios, hosts and clocks the device can reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// True UTC time (seconds) at power-on.
    pub epoch_unix_secs: u64,
    /// How fast the device crystal runs relative to true time.
    pub counter_drift_ppm: i32,
    pub access_points: Vec<AccessPointConfig>,
    pub hosts: Vec<HostEntry>,
    pub ntp_servers: Vec<NtpServerConfig>,
    /// Raw TOUT pin reading (0-1023).
    pub adc_tout: u16,
    /// Supply voltage seen by `adc::readvdd33`.
    pub vdd33_mv: u16,
    /// Address remote peers use when connecting into the device.
    pub remote_client_ip: Ipv4Addr,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let pool = [
            Ipv4Addr::new(162, 159, 200, 1),
            Ipv4Addr::new(162, 159, 200, 123),
            Ipv4Addr::new(129, 6, 15, 28),
            Ipv4Addr::new(129, 6, 15, 29),
        ];
        let mut hosts = vec![HostEntry {
            name: "example.com".into(),
            ip: Ipv4Addr::new(93, 184, 216, 34),
        }];
        hosts.extend(pool.iter().enumerate().map(|(i, ip)| HostEntry {
            name: format!("{i}.nodemcu.pool.ntp.org"),
            ip: *ip,
        }));

        Self {
            epoch_unix_secs: 1_700_000_000,
            counter_drift_ppm: 0,
            access_points: vec![AccessPointConfig::default()],
            hosts,
            ntp_servers: pool
                .iter()
                .map(|ip| NtpServerConfig { ip: *ip, stratum: 2, reachable: true })
                .collect(),
            adc_tout: 512,
            vdd33_mv: 3300,
            remote_client_ip: Ipv4Addr::new(192, 168, 1, 50),
        }
    }
}

/// A simulated access point within radio range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub password: String,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i8,
    pub auth: AuthMode,
    /// When false the AP associates but never hands out a lease.
    pub dhcp: bool,
    /// Lease handed to the station.
    pub lease: IpInfo,
    /// DNS server announced with the lease.
    pub dns: Ipv4Addr,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "nodemcu-lab".into(),
            password: "correct-horse".into(),
            bssid: [0x18, 0xfe, 0x34, 0xa1, 0x00, 0x01],
            channel: 6,
            rssi: -58,
            auth: AuthMode::Wpa2Psk,
            dhcp: true,
            lease: IpInfo {
                ip: Ipv4Addr::new(192, 168, 1, 77),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::new(192, 168, 1, 1),
            },
            dns: Ipv4Addr::new(192, 168, 1, 1),
        }
    }
}

/// A name the simulated DNS resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    pub ip: Ipv4Addr,
}

/// An NTP server listening on UDP port 123 in the simulated world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpServerConfig {
    pub ip: Ipv4Addr,
    pub stratum: u8,
    /// Unreachable servers swallow requests.
    pub reachable: bool,
}

impl SimConfig {
    /// Range-check every field.  Invalid values are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.device;
        if d.watchdog_timeout_ms < 100 {
            return Err(ConfigError::ValidationFailed("watchdog_timeout_ms must be >= 100"));
        }
        if !(536..=1460).contains(&d.tcp_mss) {
            return Err(ConfigError::ValidationFailed("tcp_mss must be 536-1460"));
        }

        let t = &self.timing;
        if t.wifi_retry_ms == 0 {
            return Err(ConfigError::ValidationFailed("wifi_retry_ms must be > 0"));
        }
        if t.sntp_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("sntp_timeout_ms must be > 0"));
        }

        let w = &self.world;
        if !(-1000..=1000).contains(&w.counter_drift_ppm) {
            return Err(ConfigError::ValidationFailed("counter_drift_ppm must be -1000..1000"));
        }
        if w.adc_tout > 1023 {
            return Err(ConfigError::ValidationFailed("adc_tout must be 0-1023"));
        }
        for ap in &w.access_points {
            if ap.ssid.is_empty() || ap.ssid.len() > 32 {
                return Err(ConfigError::ValidationFailed("access point ssid must be 1-32 bytes"));
            }
            if !(1..=13).contains(&ap.channel) {
                return Err(ConfigError::ValidationFailed("access point channel must be 1-13"));
            }
        }
        Ok(())
    }

    /// Look up a world host by name (case-insensitive).
    pub(crate) fn host(&self, name: &str) -> Option<Ipv4Addr> {
        self.world
            .hosts
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.ip)
    }
}
