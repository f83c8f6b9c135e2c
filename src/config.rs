//! Static agent configuration.
//!
//! Built once at startup and shared read-only with every component. Nothing
//! re-reads the environment after [`Config::from_env`] returns, except the
//! gateway token, which is resolved per call by [`crate::token`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_POLICY_URL: &str = "https://api.metdezon.nl/bms/api/next_action.php";
const DEFAULT_TELEMETRY_URL: &str = "https://api.metdezon.nl/bms/api/telemetry.php";
const DEFAULT_HEARTBEAT_URL: &str = "https://api.metdezon.nl/bms/api/heartbeat.php";
const DEFAULT_GATEWAY_URL: &str = "http://supervisor/core/api";
const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_NOMINAL_POWER_W: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorKind {
    Sungrow,
    Enphase,
    Goodwe,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::Sungrow => "sungrow",
            VendorKind::Enphase => "enphase",
            VendorKind::Goodwe => "goodwe",
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sungrow" => Ok(VendorKind::Sungrow),
            "enphase" => Ok(VendorKind::Enphase),
            "goodwe" => Ok(VendorKind::Goodwe),
            other => Err(ConfigError::UnknownVendor(other.to_string())),
        }
    }
}

/// Gateway entities read for the heartbeat. `None` means "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorEntities {
    pub soc: Option<String>,
    pub mode: Option<String>,
    pub pv_power: Option<String>,
    pub grid_power: Option<String>,
}

/// Sungrow control surface (modbus_sungrow.yaml helpers and scripts)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SungrowEntities {
    pub forced_power: Option<String>,
    pub ems_mode_select: Option<String>,
    pub forced_cmd_select: Option<String>,
    pub script_forced_charge: Option<String>,
    pub script_forced_discharge: Option<String>,
    pub script_self_consumption: Option<String>,
}

/// Enphase control surface, each a `domain.service` name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnphaseServices {
    pub charge_from_grid: Option<String>,
    pub discharge_to_grid: Option<String>,
    pub restrict_discharge: Option<String>,
}

/// GoodWe out-of-process control script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoodweScript {
    pub interpreter: String,
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorSettings {
    Sungrow(SungrowEntities),
    Enphase(EnphaseServices),
    Goodwe(GoodweScript),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub vendor: VendorKind,
    pub client_id: String,
    pub api_key: Option<String>,
    pub policy_url: Option<String>,
    pub telemetry_url: Option<String>,
    pub interval: Duration,
    /// Fallback power when a directive carries none; `None` when unset or zero
    pub nominal_power_w: Option<u32>,
    pub verify_tls: bool,
    pub debug: bool,
    pub gateway_url: String,
    pub gateway_disabled: bool,
    pub sensors: SensorEntities,
    pub settings: VendorSettings,
}

impl Config {
    pub fn from_env(vendor: VendorKind) -> Result<Self, ConfigError> {
        Self::from_lookup(vendor, |key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Identifier keys distinguish "unset" (vendor default) from "set but empty"
    /// (explicitly not configured).
    pub fn from_lookup<F>(vendor: VendorKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let api_key = env.first_non_empty(&["API_KEY", "api_key"]);
        let client_id = env
            .first_non_empty(&["CLIENT_ID", "client_id"])
            .unwrap_or_else(|| format!("{}_agent", vendor));

        let telemetry_default = match vendor {
            VendorKind::Goodwe => DEFAULT_HEARTBEAT_URL,
            _ => DEFAULT_TELEMETRY_URL,
        };

        let interval_secs = env.parse("INTERVAL", DEFAULT_INTERVAL_SECS, "number of seconds")?;
        let nominal_power_w = match env.get("POWER") {
            None => Some(DEFAULT_NOMINAL_POWER_W),
            Some(v) if v.trim().is_empty() => None,
            Some(v) => {
                let watts = v.trim().parse::<u32>().map_err(|_| ConfigError::Invalid {
                    key: "POWER",
                    value: v.clone(),
                    expected: "non-negative number of watts",
                })?;
                Some(watts).filter(|w| *w > 0)
            }
        };

        let gateway_url = env
            .first_non_empty(&["HA_URL"])
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        let sensors = match vendor {
            VendorKind::Sungrow => SensorEntities {
                soc: env.identifier("SOC_ENTITY", Some("sensor.battery_level")),
                mode: env.identifier("MODE_ENTITY", None),
                pv_power: env.identifier("PV_ENTITY", Some("sensor.total_dc_power")),
                grid_power: env.identifier("GRID_ENTITY", Some("sensor.meter_active_power")),
            },
            VendorKind::Enphase => SensorEntities {
                soc: env.identifier("SOC_ENTITY", Some("sensor.battery_state_of_charge")),
                mode: env.identifier("MODE_ENTITY", None),
                pv_power: env.identifier("PV_ENTITY", Some("sensor.pv_power")),
                grid_power: env.identifier("GRID_ENTITY", Some("sensor.active_power")),
            },
            VendorKind::Goodwe => SensorEntities {
                soc: env.identifier("SOC_ENTITY", Some("sensor.battery_state_of_charge")),
                mode: env.identifier("MODE_ENTITY", None),
                pv_power: env.identifier("PV_ENTITY", None),
                grid_power: env.identifier("GRID_ENTITY", None),
            },
        };

        let settings = match vendor {
            VendorKind::Sungrow => VendorSettings::Sungrow(SungrowEntities {
                forced_power: env.identifier(
                    "FORCED_POWER_ENTITY",
                    Some("input_number.set_sg_forced_charge_discharge_power"),
                ),
                ems_mode_select: env
                    .identifier("EMS_MODE_INPUT", Some("input_select.set_sg_ems_mode")),
                forced_cmd_select: env.identifier(
                    "FORCE_CMD_INPUT",
                    Some("input_select.set_sg_battery_forced_charge_discharge_cmd"),
                ),
                script_forced_charge: env.identifier(
                    "SCRIPT_FORCE_CHARGE",
                    Some("script.sg_set_forced_charge_battery_mode"),
                ),
                script_forced_discharge: env.identifier(
                    "SCRIPT_FORCE_DISCH",
                    Some("script.sg_set_forced_discharge_battery_mode"),
                ),
                script_self_consumption: env
                    .identifier("SCRIPT_SELF_CONS", Some("script.sg_set_self_consumption_mode")),
            }),
            VendorKind::Enphase => VendorSettings::Enphase(EnphaseServices {
                charge_from_grid: env.identifier(
                    "ENPHASE_CHARGE_SCRIPT",
                    Some("script.toggle_enphase_charge_from_grid"),
                ),
                discharge_to_grid: env.identifier(
                    "ENPHASE_DISCHARGE_SCRIPT",
                    Some("script.toggle_enphase_discharge_to_grid"),
                ),
                restrict_discharge: env.identifier(
                    "ENPHASE_RESTRICT_COMMAND",
                    Some("rest_command.enphase_battery_restrict_discharge"),
                ),
            }),
            VendorKind::Goodwe => VendorSettings::Goodwe(GoodweScript {
                interpreter: env
                    .first_non_empty(&["GOODWE_PYTHON"])
                    .unwrap_or_else(|| "/config/ha/pymodbus/.venv/bin/python3".to_string()),
                script: env
                    .identifier("GOODWE_SETMODE_SCRIPT", Some("/config/ha/pymodbus/setmode.py")),
            }),
        };

        Ok(Config {
            vendor,
            client_id,
            api_key,
            policy_url: env.identifier("API_URL", Some(DEFAULT_POLICY_URL)),
            telemetry_url: env.identifier("TELEMETRY_URL", Some(telemetry_default)),
            interval: Duration::from_secs(interval_secs),
            nominal_power_w,
            verify_tls: env.flag("VERIFY_SSL", true),
            debug: env.flag("DEBUG", false),
            gateway_url,
            gateway_disabled: env.flag("DISABLE_HA", false),
            sensors,
            settings,
        })
    }

    /// Gateway REST root, always ending in `/api` without a trailing slash
    pub fn gateway_api_url(&self) -> String {
        normalize_gateway_url(&self.gateway_url)
    }
}

pub fn normalize_gateway_url(url: &str) -> String {
    let mut url = url.trim_end_matches('/').to_string();
    if !url.ends_with("/api") {
        url.push_str("/api");
    }
    url
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn first_non_empty(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.trim().is_empty())
    }

    fn identifier(&self, key: &str, default: Option<&str>) -> Option<String> {
        match self.get(key) {
            None => default.map(str::to_string),
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        }
    }

    fn parse(&self, key: &'static str, default: u64, expected: &'static str) -> Result<u64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                key,
                value: v,
                expected,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vendor: VendorKind, pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(vendor, move |key| map.get(key).cloned())
    }

    #[test]
    fn defaults_follow_vendor() {
        let cfg = config_with(VendorKind::Sungrow, &[]).unwrap();
        assert_eq!(cfg.vendor, VendorKind::Sungrow);
        assert_eq!(cfg.client_id, "sungrow_agent");
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.nominal_power_w, Some(2000));
        assert!(cfg.verify_tls);
        assert!(!cfg.debug);
        assert!(!cfg.gateway_disabled);
        assert_eq!(cfg.sensors.soc.as_deref(), Some("sensor.battery_level"));
        assert_eq!(cfg.sensors.mode, None);

        let goodwe = config_with(VendorKind::Goodwe, &[]).unwrap();
        assert_eq!(goodwe.telemetry_url.as_deref(), Some(DEFAULT_HEARTBEAT_URL));
        assert_eq!(goodwe.sensors.pv_power, None);
    }

    #[test]
    fn empty_identifier_means_not_configured() {
        let cfg = config_with(
            VendorKind::Sungrow,
            &[("SCRIPT_FORCE_CHARGE", ""), ("TELEMETRY_URL", "  ")],
        )
        .unwrap();
        let VendorSettings::Sungrow(entities) = cfg.settings else {
            panic!("expected sungrow settings");
        };
        assert_eq!(entities.script_forced_charge, None);
        assert!(entities.script_forced_discharge.is_some());
        assert_eq!(cfg.telemetry_url, None);
    }

    #[test]
    fn power_zero_or_empty_disables_nominal_power() {
        let zero = config_with(VendorKind::Sungrow, &[("POWER", "0")]).unwrap();
        assert_eq!(zero.nominal_power_w, None);
        let empty = config_with(VendorKind::Sungrow, &[("POWER", "")]).unwrap();
        assert_eq!(empty.nominal_power_w, None);
        let set = config_with(VendorKind::Sungrow, &[("POWER", "3500")]).unwrap();
        assert_eq!(set.nominal_power_w, Some(3500));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config_with(VendorKind::Enphase, &[("INTERVAL", "soon")]),
            Err(ConfigError::Invalid { key: "INTERVAL", .. })
        ));
        assert!(matches!(
            config_with(VendorKind::Enphase, &[("POWER", "-5")]),
            Err(ConfigError::Invalid { key: "POWER", .. })
        ));
    }

    #[test]
    fn flags_and_credentials() {
        let cfg = config_with(
            VendorKind::Enphase,
            &[
                ("VERIFY_SSL", "No"),
                ("DEBUG", "YES"),
                ("DISABLE_HA", "1"),
                ("api_key", "secret"),
                ("CLIENT_ID", ""),
                ("client_id", "house-42"),
            ],
        )
        .unwrap();
        assert!(!cfg.verify_tls);
        assert!(cfg.debug);
        assert!(cfg.gateway_disabled);
        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.client_id, "house-42");
    }

    #[test]
    fn gateway_url_is_normalized() {
        assert_eq!(normalize_gateway_url("http://ha.local:8123/"), "http://ha.local:8123/api");
        assert_eq!(normalize_gateway_url("http://supervisor/core/api"), "http://supervisor/core/api");
        assert_eq!(normalize_gateway_url("http://ha/api//"), "http://ha/api");
    }

    #[test]
    fn vendor_names_parse() {
        assert_eq!("GoodWe".parse::<VendorKind>().unwrap(), VendorKind::Goodwe);
        assert!(matches!(
            "victron".parse::<VendorKind>(),
            Err(ConfigError::UnknownVendor(_))
        ));
    }
}
