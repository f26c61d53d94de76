// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Nozzle configuration.
//!
//! Loaded from a TOML file, then overridden field by field from `NOZZLE_*`
//! environment variables so deployments can inject secrets without touching
//! the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Can not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Can not parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for environment variable {name}")]
    Env { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Nozzle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NozzleConfig {
    /// UAA server issuing the firehose token.
    pub uaa_url: String,
    /// UAA client id.
    pub username: String,
    /// UAA client secret.
    pub password: String,
    /// Firehose stream endpoint.
    pub traffic_controller_url: String,
    /// Subscription id; consumers sharing it split the firehose between them.
    pub firehose_subscription_id: String,
    /// Skip TLS verification towards UAA and the firehose.
    pub insecure_ssl_skip_verify: bool,
    /// Do not fetch a token before opening the stream.
    pub disable_access_control: bool,
    /// Close the stream after this many idle seconds (0 disables).
    pub idle_timeout_seconds: u32,

    /// InfluxDB HTTP endpoint.
    pub influxdb_url: String,
    /// Target database.
    pub influxdb_database: String,
    pub influxdb_user: String,
    pub influxdb_password: String,
    /// Accept self-signed certificates from InfluxDB.
    pub influxdb_allow_self_signed: bool,

    /// Seconds between batch flushes.
    pub flush_duration_seconds: u32,
    /// Prefix for the nozzle's own metric names.
    pub metric_prefix: String,
    /// Deployment label attached to the nozzle's own metrics.
    pub deployment: String,
}

impl Default for NozzleConfig {
    fn default() -> Self {
        Self {
            uaa_url: String::new(),
            username: String::new(),
            password: String::new(),
            traffic_controller_url: String::new(),
            firehose_subscription_id: "influxdb-firehose-nozzle".to_string(),
            insecure_ssl_skip_verify: false,
            disable_access_control: false,
            idle_timeout_seconds: 60,
            influxdb_url: String::new(),
            influxdb_database: String::new(),
            influxdb_user: String::new(),
            influxdb_password: String::new(),
            influxdb_allow_self_signed: false,
            flush_duration_seconds: 15,
            metric_prefix: String::new(),
            deployment: String::new(),
        }
    }
}

impl NozzleConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_file_with_overrides(path, |name| std::env::var(name).ok())
    }

    /// Like [`from_file`](Self::from_file), with overrides read from `lookup`
    /// instead of the process environment.
    pub fn from_file_with_overrides<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_overrides_from(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without overrides or validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Override fields from `lookup`. Unset and empty variables are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        override_string(&var, "NOZZLE_UAAURL", &mut self.uaa_url);
        override_string(&var, "NOZZLE_USERNAME", &mut self.username);
        override_string(&var, "NOZZLE_PASSWORD", &mut self.password);
        override_string(&var, "NOZZLE_TRAFFICCONTROLLERURL", &mut self.traffic_controller_url);
        override_string(&var, "NOZZLE_FIREHOSESUBSCRIPTIONID", &mut self.firehose_subscription_id);

        override_string(&var, "NOZZLE_INFLUXDBURL", &mut self.influxdb_url);
        override_string(&var, "NOZZLE_INFLUXDBDATABASE", &mut self.influxdb_database);
        override_string(&var, "NOZZLE_INFLUXDBUSER", &mut self.influxdb_user);
        override_string(&var, "NOZZLE_INFLUXDBPASSWORD", &mut self.influxdb_password);
        override_bool(&var, "NOZZLE_INFLUXDBALLOWSELFSIGNED", &mut self.influxdb_allow_self_signed)?;

        override_string(&var, "NOZZLE_METRICPREFIX", &mut self.metric_prefix);
        override_string(&var, "NOZZLE_DEPLOYMENT", &mut self.deployment);

        override_u32(&var, "NOZZLE_FLUSHDURATIONSECONDS", &mut self.flush_duration_seconds)?;

        override_bool(&var, "NOZZLE_INSECURESSLSKIPVERIFY", &mut self.insecure_ssl_skip_verify)?;
        override_bool(&var, "NOZZLE_DISABLEACCESSCONTROL", &mut self.disable_access_control)?;
        override_u32(&var, "NOZZLE_IDLETIMEOUTSECONDS", &mut self.idle_timeout_seconds)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_duration_seconds == 0 {
            return Err(ConfigError::Invalid(
                "flush_duration_seconds must be greater than zero".into(),
            ));
        }

        let required = [
            ("traffic_controller_url", &self.traffic_controller_url),
            ("firehose_subscription_id", &self.firehose_subscription_id),
            ("influxdb_url", &self.influxdb_url),
            ("influxdb_database", &self.influxdb_database),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{} is required", name)));
            }
        }

        if !self.disable_access_control && self.uaa_url.is_empty() {
            return Err(ConfigError::Invalid(
                "uaa_url is required unless disable_access_control is set".into(),
            ));
        }

        Ok(())
    }

    /// Interval between batch flushes.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.flush_duration_seconds))
    }

    /// Stream idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        }
    }
}

fn override_string<F>(var: &F, name: &'static str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = var(name) {
        *target = value;
    }
}

fn override_u32<F>(var: &F, name: &'static str, target: &mut u32) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = var(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { name, value })?;
    }
    Ok(())
}

fn override_bool<F>(var: &F, name: &'static str, target: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = var(name) {
        *target = parse_bool(&value).ok_or(ConfigError::Env { name, value })?;
    }
    Ok(())
}

/// Accepts the usual spellings: 1/0, t/f, true/false in lower, upper or title case.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
