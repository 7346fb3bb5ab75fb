use crate::api::API_BASE;
use crate::ping::ProbeTarget;
use crate::types::{OutageGroup, ProbeMethod};
use chrono_tz::Tz;
use config as config_crate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Ternopil.
pub const DEFAULT_CITY_ID: i64 = 1032;
pub const DEFAULT_PING_HOST: &str = "10.248.1.105";
pub const DEFAULT_PING_PORT: u16 = 80;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("schedule_interval_secs deve estar entre 300 e 900 (atual: {0})")]
    ScheduleInterval(u64),
    #[error("ping_interval_secs deve estar entre 2 e 10 (atual: {0})")]
    PingInterval(f64),
    #[error("ping_timeout_secs deve ser maior que zero (atual: {0})")]
    PingTimeout(f64),
    #[error("ping_port deve ser maior que zero para verificação TCP")]
    PingPort,
    #[error("http_timeout_secs deve ser maior que zero")]
    HttpTimeout,
    #[error("grupo inválido: {0}")]
    Group(String),
    #[error("fuso horário desconhecido: {0}")]
    Timezone(String),
}

/// Configuração operacional do serviço.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base da API de agendamento.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_city_id")]
    pub city_id: i64,
    pub street_id: i64,
    /// Só para exibição; resolvido pela API se ausente.
    #[serde(default)]
    pub street_name: Option<String>,
    /// Grupo de desligamento; resolvido pela API se ausente.
    #[serde(default)]
    pub group: Option<String>,
    /// Intervalo de atualização do agendamento (300–900 s).
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_ping_host")]
    pub ping_host: String,
    #[serde(default = "default_ping_port")]
    pub ping_port: u16,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: f64,
    /// Intervalo da verificação de alcance (2–10 s).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: f64,
    /// "icmp" ou "tcp".
    #[serde(default = "default_ping_method")]
    pub ping_method: String,
    /// Fuso usado para "hoje"/"amanhã".
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_api_base_url() -> String {
    API_BASE.to_string()
}
fn default_city_id() -> i64 {
    DEFAULT_CITY_ID
}
fn default_schedule_interval_secs() -> u64 {
    900
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_ping_host() -> String {
    DEFAULT_PING_HOST.to_string()
}
fn default_ping_port() -> u16 {
    DEFAULT_PING_PORT
}
fn default_ping_timeout_secs() -> f64 {
    1.0
}
fn default_ping_interval_secs() -> f64 {
    2.0
}
fn default_ping_method() -> String {
    "tcp".to_string()
}
fn default_timezone() -> String {
    "Europe/Kyiv".to_string()
}

impl Config {
    /// Lê `config.*` (opcional) do diretório atual e variáveis `GRID_*`.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config_crate::Config::builder()
            .add_source(config_crate::File::with_name("config").required(false))
            .add_source(config_crate::Environment::with_prefix("GRID"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(300..=900).contains(&self.schedule_interval_secs) {
            return Err(ConfigError::ScheduleInterval(self.schedule_interval_secs));
        }
        if !(2.0..=10.0).contains(&self.ping_interval_secs) {
            return Err(ConfigError::PingInterval(self.ping_interval_secs));
        }
        if !(self.ping_timeout_secs > 0.0 && self.ping_timeout_secs.is_finite()) {
            return Err(ConfigError::PingTimeout(self.ping_timeout_secs));
        }
        if self.method() == ProbeMethod::Tcp && self.ping_port == 0 {
            return Err(ConfigError::PingPort);
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::HttpTimeout);
        }
        if let Some(group) = &self.group {
            group.parse::<OutageGroup>().map_err(ConfigError::Group)?;
        }
        self.tz()?;
        Ok(())
    }

    pub fn method(&self) -> ProbeMethod {
        self.ping_method.parse().unwrap_or(ProbeMethod::Icmp)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn ping_target(&self) -> ProbeTarget {
        ProbeTarget {
            host: self.ping_host.clone(),
            port: Some(self.ping_port),
            timeout: Duration::from_secs_f64(self.ping_timeout_secs),
            method: self.method(),
        }
    }

    /// Snapshot das configurações efetivas, para diagnóstico.
    pub fn diagnostics(&self) -> serde_json::Value {
        json!({
            "group": self.group,
            "city_id": self.city_id,
            "street_id": self.street_id,
            "ping_ip": self.ping_host,
            "ping_port": self.ping_port,
            "ping_timeout": self.ping_timeout_secs,
            "ping_interval": self.ping_interval_secs,
            "ping_method": self.method(),
            "schedule_interval": self.schedule_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::config_crate::{File, FileFormat};

    fn from_toml(raw: &str) -> Config {
        config_crate::Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_point_at_ternopil() {
        let config = from_toml("street_id = 14");
        assert_eq!(config.city_id, 1032);
        assert_eq!(config.api_base_url, API_BASE);
        assert_eq!(config.schedule_interval_secs, 900);
        assert_eq!(config.ping_host, "10.248.1.105");
        assert_eq!(config.ping_port, 80);
        assert_eq!(config.method(), ProbeMethod::Tcp);
        assert_eq!(config.ping_interval(), Duration::from_secs(2));
        assert!(config.group.is_none());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn validation_rejects_out_of_range_intervals() {
        let mut config = from_toml("street_id = 14\nschedule_interval_secs = 60");
        assert_eq!(config.validate(), Err(ConfigError::ScheduleInterval(60)));

        config.schedule_interval_secs = 300;
        config.ping_interval_secs = 30.0;
        assert_eq!(config.validate(), Err(ConfigError::PingInterval(30.0)));

        config.ping_interval_secs = 5.0;
        config.ping_timeout_secs = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::PingTimeout(0.0)));
    }

    #[test]
    fn validation_checks_group_and_timezone() {
        let mut config = from_toml("street_id = 14\ngroup = \" \"");
        assert!(matches!(config.validate(), Err(ConfigError::Group(_))));

        config.group = Some("5.1".into());
        assert_eq!(config.validate(), Ok(()));

        config.group = Some("4.1".into());
        config.timezone = "Mars/Olympus".into();
        assert!(matches!(config.validate(), Err(ConfigError::Timezone(_))));
    }

    #[test]
    fn ping_target_and_diagnostics_reflect_settings() {
        let config = from_toml(
            "street_id = 14\ngroup = \"4.1\"\nping_method = \"ICMP\"\nping_timeout_secs = 1.5",
        );
        let target = config.ping_target();
        assert_eq!(target.method, ProbeMethod::Icmp);
        assert_eq!(target.timeout, Duration::from_millis(1500));

        let diag = config.diagnostics();
        assert_eq!(diag["group"], "4.1");
        assert_eq!(diag["ping_method"], "icmp");
        assert_eq!(diag["ping_port"], 80);
    }
}
