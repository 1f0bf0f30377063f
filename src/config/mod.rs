// config/mod.rs
use crate::{
    commands::{self, ValidationError},
    models::{Bulb, BulbState, House},
};
use config::{Config, ConfigError, Environment, File, Map, Source};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use std::{env, fs, io, time::Duration};

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    #[serde(default)]
    pub state: StateSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(deserialize_with = "inline_or_json")]
    pub bulbs: Vec<Bulb>,
    #[serde(deserialize_with = "inline_or_json")]
    pub houses: Vec<House>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub queue_prefix: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl BrokerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

/// When to record commanded attributes in the state store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Only after the broker accepted the message.
    #[default]
    Confirmed,
    /// After every publish attempt, delivered or not.
    Optimistic,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub update_policy: UpdatePolicy,
    /// Initial `{state, brightness, color}` of every bulb.
    pub default: Option<serde_json::Value>,
}

impl StateSettings {
    /// The configured default, held to the same rules as a control request.
    pub fn initial_state(&self) -> Result<BulbState, ValidationError> {
        match &self.default {
            Some(raw) => commands::validate(raw).map(BulbState::from),
            None => Ok(BulbState::default()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9000,
        }
    }
}

/// Variables understood by earlier deployments, mapped onto settings keys.
const LEGACY_VARIABLES: [(&str, &str); 6] = [
    ("BULBS", "bulbs"),
    ("HOUSES", "houses"),
    ("RABBITMQ_HOST", "broker.host"),
    ("RABBITMQ_USERNAME", "broker.username"),
    ("RABBITMQ_PASSWORD", "broker.password"),
    ("RABBITMQ_QUEUE_PREFIX", "broker.queue_prefix"),
];

impl Settings {
    /// Loads `config/config.*`, then `.env`, then the process environment, which
    /// wins over `.env` for any variable set in both.
    pub fn new() -> Result<Self, ConfigError> {
        let mut variables = read_dotenv(".env")?;
        variables.extend(env::vars());
        Self::load(File::with_name("config/config").required(false), variables)
    }

    fn load<S>(file: S, variables: Map<String, String>) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut builder = Config::builder().add_source(file);

        for (variable, key) in LEGACY_VARIABLES {
            builder = builder.set_override_option(key, variables.get(variable).cloned())?;
        }

        builder
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .source(Some(variables)),
            )
            .build()?
            .try_deserialize()
    }
}

/// Variables from a dotenv file. A missing file yields none.
fn read_dotenv(path: &str) -> Result<Map<String, String>, ConfigError> {
    match fs::File::open(path) {
        Ok(file) => parse_dotenv(file),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
        Err(err) => Err(ConfigError::Foreign(Box::new(err))),
    }
}

fn parse_dotenv(reader: impl io::Read) -> Result<Map<String, String>, ConfigError> {
    dotenvy::from_read_iter(reader)
        .collect::<Result<_, _>>()
        .map_err(|err| ConfigError::Foreign(Box::new(err)))
}

/// Accepts a list written inline in a config file, or JSON text from an
/// environment variable.
fn inline_or_json<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Inline(Vec<T>),
        Encoded(String),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Inline(items) => Ok(items),
        Raw::Encoded(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PowerState;
    use config::FileFormat;
    use serde_json::json;

    const TOML: &str = r##"
        bulbs = [
            { id = 1, name = "Kitchen" },
            { id = 2, name = "Hall" },
        ]
        houses = [{ id = 1, bulbs = [1, 2] }]

        [broker]
        host = "rabbit.local"
        username = "bulbs"
        password = "secret"
        queue_prefix = "lights"

        [state]
        update_policy = "optimistic"
        default = { state = "off", brightness = 40, color = "#ffffff" }
    "##;

    fn load(
        toml: &str,
        variables: &[(&str, &str)],
    ) -> Result<Settings, ConfigError> {
        let variables = variables
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::load(File::from_str(toml, FileFormat::Toml), variables)
    }

    #[test]
    fn reads_file_with_defaults() {
        let settings = load(TOML, &[]).unwrap();

        assert_eq!(settings.server.address, "0.0.0.0:5000");
        assert_eq!(settings.broker.port, 5672);
        assert_eq!(settings.broker.vhost, "/");
        assert_eq!(settings.broker.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.state.update_policy, UpdatePolicy::Optimistic);
        assert!(!settings.metrics.enabled);
        assert_eq!(settings.bulbs.len(), 2);
        assert_eq!(settings.bulbs[0].attributes["name"], "Kitchen");
        assert_eq!(settings.houses[0].bulbs, vec![1, 2]);
        assert_eq!(settings.state.default.unwrap()["brightness"], 40);
    }

    #[test]
    fn legacy_variables_override_the_file() {
        let settings = load(
            TOML,
            &[
                ("BULBS", r#"[{"id": 7, "name": "Porch", "watts": 9}]"#),
                ("HOUSES", r#"[{"id": 3, "bulbs": [7]}]"#),
                ("RABBITMQ_HOST", "broker.internal"),
                ("RABBITMQ_QUEUE_PREFIX", "prod"),
            ],
        )
        .unwrap();

        assert_eq!(settings.bulbs.len(), 1);
        assert_eq!(settings.bulbs[0].id, 7);
        assert_eq!(settings.bulbs[0].attributes["watts"], 9);
        assert_eq!(settings.houses[0].id, 3);
        assert_eq!(settings.broker.host, "broker.internal");
        assert_eq!(settings.broker.queue_prefix, "prod");
        assert_eq!(settings.broker.username, "bulbs");
    }

    #[test]
    fn environment_alone_is_enough() {
        let settings = load(
            "",
            &[
                ("BULBS", r#"[{"id": 1}]"#),
                ("HOUSES", r#"[{"id": 1, "bulbs": [1]}]"#),
                ("RABBITMQ_HOST", "localhost"),
                ("RABBITMQ_USERNAME", "guest"),
                ("RABBITMQ_PASSWORD", "guest"),
                ("RABBITMQ_QUEUE_PREFIX", "bulbs"),
            ],
        )
        .unwrap();

        assert_eq!(settings.state.update_policy, UpdatePolicy::Confirmed);
        assert_eq!(settings.broker.password, "guest");
    }

    #[test]
    fn malformed_bulb_json_is_an_error() {
        assert!(load(TOML, &[("BULBS", "[{\"id\": ")]).is_err());
        assert!(load(TOML, &[("HOUSES", "{}")]).is_err());
    }

    #[test]
    fn prefixed_variables_override_sections() {
        let settings = load(
            TOML,
            &[
                ("APP__SERVER__ADDRESS", "127.0.0.1:8080"),
                ("APP__STATE__UPDATE_POLICY", "confirmed"),
            ],
        )
        .unwrap();

        assert_eq!(settings.server.address, "127.0.0.1:8080");
        assert_eq!(settings.state.update_policy, UpdatePolicy::Confirmed);
    }

    #[test]
    fn dotenv_file_supplies_legacy_variables() {
        let dotenv = br#"
# broker
RABBITMQ_HOST=rabbit.env
RABBITMQ_USERNAME=guest
RABBITMQ_PASSWORD="guest"
RABBITMQ_QUEUE_PREFIX=bulbs
BULBS='[{"id": 5, "name": "Desk"}]'
HOUSES='[{"id": 2, "bulbs": [5]}]'
"#;
        let mut variables = parse_dotenv(dotenv.as_slice()).unwrap();
        variables.insert("RABBITMQ_HOST".to_string(), "rabbit.process".to_string());

        let settings = Settings::load(File::from_str("", FileFormat::Toml), variables).unwrap();

        assert_eq!(settings.broker.host, "rabbit.process");
        assert_eq!(settings.broker.password, "guest");
        assert_eq!(settings.bulbs[0].id, 5);
        assert_eq!(settings.bulbs[0].attributes["name"], "Desk");
        assert_eq!(settings.houses[0].bulbs, vec![5]);
    }

    #[test]
    fn missing_dotenv_file_is_empty() {
        assert!(read_dotenv("does/not/exist/.env").unwrap().is_empty());
    }

    #[test]
    fn malformed_dotenv_is_an_error() {
        assert!(parse_dotenv(b"NOT A VALID LINE".as_slice()).is_err());
    }

    #[test]
    fn initial_state_defaults_and_validates() {
        let settings = load(TOML, &[]).unwrap();
        assert_eq!(
            settings.state.initial_state().unwrap(),
            BulbState {
                state: PowerState::Off,
                brightness: 40,
                color: "#ffffff".to_string(),
            }
        );

        assert_eq!(
            StateSettings::default().initial_state().unwrap(),
            BulbState::default()
        );

        let invalid = StateSettings {
            default: Some(json!({"state": "dim", "brightness": 40, "color": "#ffffff"})),
            ..StateSettings::default()
        };
        assert!(matches!(
            invalid.initial_state(),
            Err(ValidationError::InvalidState(_))
        ));
    }
}
