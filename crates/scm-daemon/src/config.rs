//! Daemon settings.
//!
//! Loaded from an optional TOML file. Every key has a default, so an absent
//! or empty file runs the stock deployment.
//!
//! ```toml
//! [scan]
//! dwell_secs = 30
//! segments_file = "/etc/scm/segments.txt"
//!
//! [telemetry]
//! modcod_enabled = true
//!
//! [device]
//! address = "10.0.0.7"
//!
//! [api]
//! listen = "127.0.0.1:8080"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use scm_core::actuator::Profile;
use scm_core::monitor::MonitorSettings;
use serde::Deserialize;

// ─── Input (as written in the file) ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsInput {
    pub scan: ScanInput,
    pub telemetry: TelemetryInput,
    pub monitor: MonitorInput,
    pub heartbeat: HeartbeatInput,
    pub device: DeviceInput,
    pub storage: StorageInput,
    pub api: ApiInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanInput {
    pub dwell_secs: Option<u64>,
    pub receive_timeout_secs: Option<u64>,
    pub segments_file: Option<PathBuf>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryInput {
    pub bind: Option<IpAddr>,
    pub sdd_port: Option<u16>,
    pub modcod_port: Option<u16>,
    pub modcod_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorInput {
    pub period_secs: Option<u64>,
    pub observation_secs: Option<u64>,
    pub alarm_script: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatInput {
    pub period_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceInput {
    pub address: Option<IpAddr>,
    pub snmp_port: Option<u16>,
    pub write_community: Option<String>,
    pub default_profile: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageInput {
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiInput {
    pub listen: Option<SocketAddr>,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub dwell: Duration,
    /// Silence on the SDD socket longer than this ends the dwell as invalid.
    pub receive_timeout: Duration,
    pub segments_file: PathBuf,
    pub enabled: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(5),
            segments_file: PathBuf::from("config.txt"),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub bind: IpAddr,
    pub sdd_port: u16,
    pub modcod_port: u16,
    pub modcod_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sdd_port: 1236,
            modcod_port: 1238,
            modcod_enabled: false,
        }
    }
}

impl TelemetryConfig {
    pub fn sdd_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.sdd_port)
    }

    pub fn modcod_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.modcod_port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub period: Duration,
    pub observation: Duration,
    pub alarm_script: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3600),
            observation: Duration::from_secs(86_400),
            alarm_script: PathBuf::from("./esno_monitor.sh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub address: IpAddr,
    pub snmp_port: u16,
    pub write_community: String,
    pub default_profile: Profile,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
            snmp_port: 161,
            write_community: "private".into(),
            default_profile: Profile::First,
        }
    }
}

impl DeviceConfig {
    pub fn snmp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.snmp_port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub scan: ScanConfig,
    pub telemetry: TelemetryConfig,
    pub monitor: MonitorConfig,
    pub heartbeat_period: Duration,
    pub device: DeviceConfig,
    pub database_url: String,
    /// Where the read-only HTTP API listens; `None` leaves it off.
    pub api_listen: Option<SocketAddr>,
}

pub const DEFAULT_DATABASE_URL: &str = "postgres://scm@localhost/tc1";

/// Shortest dwell that still leaves time after the settle window to accept samples.
pub const MIN_DWELL: Duration = Duration::from_secs(2);

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            telemetry: TelemetryConfig::default(),
            monitor: MonitorConfig::default(),
            heartbeat_period: Duration::from_secs(60),
            device: DeviceConfig::default(),
            database_url: DEFAULT_DATABASE_URL.into(),
            api_listen: None,
        }
    }
}

fn secs(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

impl SettingsInput {
    pub fn resolve(self) -> Result<Settings, String> {
        let defaults = Settings::default();

        let scan = ScanConfig {
            dwell: secs(self.scan.dwell_secs, defaults.scan.dwell).max(MIN_DWELL),
            receive_timeout: secs(
                self.scan.receive_timeout_secs,
                defaults.scan.receive_timeout,
            )
            .max(Duration::from_secs(1)),
            segments_file: self.scan.segments_file.unwrap_or(defaults.scan.segments_file),
            enabled: self.scan.enabled.unwrap_or(defaults.scan.enabled),
        };

        let telemetry = TelemetryConfig {
            bind: self.telemetry.bind.unwrap_or(defaults.telemetry.bind),
            sdd_port: self.telemetry.sdd_port.unwrap_or(defaults.telemetry.sdd_port),
            modcod_port: self
                .telemetry
                .modcod_port
                .unwrap_or(defaults.telemetry.modcod_port),
            modcod_enabled: self
                .telemetry
                .modcod_enabled
                .unwrap_or(defaults.telemetry.modcod_enabled),
        };
        if telemetry.sdd_port == telemetry.modcod_port {
            return Err(format!(
                "sdd_port and modcod_port must differ (both {})",
                telemetry.sdd_port
            ));
        }

        let monitor = MonitorConfig {
            period: secs(self.monitor.period_secs, defaults.monitor.period)
                .max(Duration::from_secs(1)),
            observation: secs(self.monitor.observation_secs, defaults.monitor.observation),
            alarm_script: self
                .monitor
                .alarm_script
                .unwrap_or(defaults.monitor.alarm_script),
        };
        if monitor.observation < scan.dwell {
            return Err(format!(
                "observation window ({}s) is shorter than one dwell ({}s)",
                monitor.observation.as_secs(),
                scan.dwell.as_secs()
            ));
        }

        let default_profile = match self.device.default_profile {
            None => defaults.device.default_profile,
            Some(id) => Profile::from_id(id)
                .ok_or_else(|| format!("default_profile must be 0 or 1, got {id}"))?,
        };
        let device = DeviceConfig {
            address: self.device.address.unwrap_or(defaults.device.address),
            snmp_port: self.device.snmp_port.unwrap_or(defaults.device.snmp_port),
            write_community: self
                .device
                .write_community
                .unwrap_or(defaults.device.write_community),
            default_profile,
        };

        Ok(Settings {
            scan,
            telemetry,
            monitor,
            heartbeat_period: secs(self.heartbeat.period_secs, defaults.heartbeat_period)
                .max(Duration::from_secs(1)),
            device,
            database_url: self.storage.database_url.unwrap_or(defaults.database_url),
            api_listen: self.api.listen,
        })
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(Settings::default());
        }
        let parsed: SettingsInput =
            toml::from_str(input).map_err(|e| format!("Invalid settings TOML: {}", e))?;
        parsed.resolve()
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no settings file, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(format!("Failed to read {}: {}", path.display(), e)),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            observation_window: self.monitor.observation,
            dwell: self.scan.dwell,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_all_defaults() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.scan.dwell, Duration::from_secs(30));
        assert_eq!(s.telemetry.sdd_addr(), "0.0.0.0:1236".parse().unwrap());
        assert!(!s.telemetry.modcod_enabled);
        assert_eq!(s.device.snmp_addr(), "192.168.1.50:161".parse().unwrap());
        assert_eq!(s.database_url, "postgres://scm@localhost/tc1");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let s = Settings::from_toml_str(
            r#"
            [scan]
            dwell_secs = 20

            [device]
            address = "10.0.0.7"
            default_profile = 1
            "#,
        )
        .unwrap();
        assert_eq!(s.scan.dwell, Duration::from_secs(20));
        assert_eq!(s.scan.receive_timeout, Duration::from_secs(5));
        assert_eq!(s.device.address.to_string(), "10.0.0.7");
        assert_eq!(s.device.default_profile, Profile::Second);
        assert_eq!(s.device.write_community, "private");
        assert_eq!(s.monitor_settings().dwell, Duration::from_secs(20));
    }

    #[test]
    fn zero_periods_are_clamped() {
        let s = Settings::from_toml_str("[scan]\ndwell_secs = 0\n[heartbeat]\nperiod_secs = 0").unwrap();
        assert_eq!(s.scan.dwell, MIN_DWELL);
        assert_eq!(s.heartbeat_period, Duration::from_secs(1));
    }

    #[test]
    fn dwell_outlasts_settle_window() {
        let settle = scm_core::sdd::SETTLE_TIME.to_std().unwrap();
        assert!(MIN_DWELL > settle);
        let s = Settings::from_toml_str("[scan]\ndwell_secs = 1").unwrap();
        assert_eq!(s.scan.dwell, MIN_DWELL);
        let s = Settings::from_toml_str("[scan]\ndwell_secs = 3").unwrap();
        assert_eq!(s.scan.dwell, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_profile_and_unknown_keys() {
        assert!(Settings::from_toml_str("[device]\ndefault_profile = 2").is_err());
        assert!(Settings::from_toml_str("[scan]\ndwel_secs = 2").is_err());
    }

    #[test]
    fn api_is_off_unless_configured() {
        assert_eq!(Settings::default().api_listen, None);
        let s = Settings::from_toml_str("[api]\nlisten = \"127.0.0.1:8080\"").unwrap();
        assert_eq!(s.api_listen, Some("127.0.0.1:8080".parse().unwrap()));
        assert!(Settings::from_toml_str("[api]\nlisten = \"localhost\"").is_err());
    }

    #[test]
    fn rejects_shared_ports() {
        let err = Settings::from_toml_str("[telemetry]\nmodcod_port = 1236").unwrap_err();
        assert!(err.contains("must differ"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let s = Settings::load(Path::new("/nonexistent/scm-daemon.toml")).unwrap();
        assert_eq!(s, Settings::default());
    }
}
