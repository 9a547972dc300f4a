//! MongoDB connection configuration.
//!
//! A [`MongoConfig`] can be assembled with [`MongoConfig::builder`] or loaded
//! from a TOML file holding several named groups, one of which is active:
//!
//! ```toml
//! active = "default"
//!
//! [groups.default]
//! host = "127.0.0.1"
//! port = 27017
//! database = "mydb"
//! authentication = true
//! username = "app"
//! password = "${MONGO_PASSWORD}"
//! read_concern = "local"
//! legacy_support = true
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use mongodb::options::{ClientOptions, Credential, Tls, TlsOptions};
use serde::{Deserialize, Serialize};

use crate::error::{MongoError, MongoResult};
use crate::types::{ReadConcern, ReadPreference, ReturnAs, WriteConcern, WriteConcernLevel};

/// MongoDB connection configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MongoConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Authenticate with `username` and `password`.
    pub authentication: bool,
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Connect over TLS.
    pub tls: bool,
    /// Replica set name.
    pub replica_set: Option<String>,
    /// Database holding the credentials.
    pub auth_source: Option<String>,
    /// Give up after the first failed server selection round.
    pub server_selection_try_once: bool,
    /// Include driver detail in surfaced error messages.
    pub debug: bool,
    /// Default output shape of read results.
    pub return_as: ReturnAs,
    /// Write concern level for every write.
    pub write_concern: WriteConcernLevel,
    /// Require journaled writes; left to the server when unset.
    pub journal: Option<bool>,
    /// Read preference.
    pub read_preference: ReadPreference,
    /// Read concern.
    pub read_concern: ReadConcern,
    /// Replace ObjectId `_id` values with `{ "$id": "<hex>" }` in results.
    pub legacy_support: bool,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Connection timeout.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    #[serde(with = "duration_secs")]
    pub server_selection_timeout: Option<Duration>,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27017,
            database: String::new(),
            authentication: false,
            username: None,
            password: None,
            tls: false,
            replica_set: None,
            auth_source: None,
            server_selection_try_once: false,
            debug: false,
            return_as: ReturnAs::Array,
            write_concern: WriteConcernLevel::Majority,
            journal: None,
            read_preference: ReadPreference::Primary,
            read_concern: ReadConcern::Majority,
            legacy_support: false,
            app_name: Some("mortar".to_string()),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl fmt::Debug for MongoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("authentication", &self.authentication)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("replica_set", &self.replica_set)
            .field("auth_source", &self.auth_source)
            .field("server_selection_try_once", &self.server_selection_try_once)
            .field("debug", &self.debug)
            .field("return_as", &self.return_as)
            .field("write_concern", &self.write_concern)
            .field("journal", &self.journal)
            .field("read_preference", &self.read_preference)
            .field("read_concern", &self.read_concern)
            .field("legacy_support", &self.legacy_support)
            .field("app_name", &self.app_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .finish()
    }
}

impl MongoConfig {
    /// Create a builder for configuration.
    pub fn builder() -> MongoConfigBuilder {
        MongoConfigBuilder::new()
    }

    /// Check that every required setting is present.
    pub fn validate(&self) -> MongoResult<()> {
        if self.host.trim().is_empty() {
            return Err(MongoError::config("hostname missing from mongodb config"));
        }
        if self.port == 0 {
            return Err(MongoError::config("port number missing from mongodb config"));
        }
        if self.database.trim().is_empty() {
            return Err(MongoError::config("database name missing from mongodb config"));
        }
        if self.authentication {
            if is_blank(&self.username) {
                return Err(MongoError::config("username missing from mongodb config"));
            }
            if is_blank(&self.password) {
                return Err(MongoError::config("password missing from mongodb config"));
            }
        }
        Ok(())
    }

    /// The connection string, `mongodb://host:port/database`.
    pub fn connection_uri(&self) -> String {
        format!(
            "mongodb://{}:{}/{}",
            self.host.trim(),
            self.port,
            self.database.trim()
        )
    }

    /// The write concern applied to every write.
    pub fn write_concern(&self) -> WriteConcern {
        WriteConcern {
            level: self.write_concern.clone(),
            journal: self.journal,
            ..WriteConcern::default()
        }
    }

    /// Convert to MongoDB ClientOptions.
    pub async fn to_client_options(&self) -> MongoResult<ClientOptions> {
        self.validate()?;

        let mut options = ClientOptions::parse(self.connection_uri())
            .await
            .map_err(|e| MongoError::config(format!("failed to parse URI: {}", e)))?;

        if self.authentication {
            let mut credential = Credential::default();
            credential.username = self.username.as_deref().map(|u| u.trim().to_string());
            credential.password = self.password.as_deref().map(|p| p.trim().to_string());
            credential.source = non_blank(&self.auth_source);
            options.credential = Some(credential);
        }

        if let Some(replica_set) = non_blank(&self.replica_set) {
            options.repl_set_name = Some(replica_set);
        }

        if self.tls {
            options.tls = Some(Tls::Enabled(TlsOptions::default()));
        }

        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }

        if let Some(connect_timeout) = self.connect_timeout {
            options.connect_timeout = Some(connect_timeout);
        }

        // A single selection round is the closest the async driver offers.
        if self.server_selection_try_once {
            options.server_selection_timeout = self.connect_timeout;
        } else if let Some(selection_timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(selection_timeout);
        }

        options.selection_criteria = Some(self.read_preference.to_selection_criteria());
        options.read_concern = Some(self.read_concern.to_driver());

        Ok(options)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Builder for MongoDB configuration.
#[derive(Debug, Default)]
pub struct MongoConfigBuilder {
    config: MongoConfig,
}

impl MongoConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    /// Authenticate with the given credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.authentication = true;
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Enable or disable TLS.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.config.tls = enabled;
        self
    }

    /// Set the replica set name.
    pub fn replica_set(mut self, name: impl Into<String>) -> Self {
        self.config.replica_set = Some(name.into());
        self
    }

    /// Set the authentication database.
    pub fn auth_source(mut self, source: impl Into<String>) -> Self {
        self.config.auth_source = Some(source.into());
        self
    }

    /// Give up after one server selection round.
    pub fn server_selection_try_once(mut self, enabled: bool) -> Self {
        self.config.server_selection_try_once = enabled;
        self
    }

    /// Include driver detail in error messages.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Set the default output shape.
    pub fn return_as(mut self, shape: ReturnAs) -> Self {
        self.config.return_as = shape;
        self
    }

    /// Set the write concern level.
    pub fn write_concern(mut self, level: WriteConcernLevel) -> Self {
        self.config.write_concern = level;
        self
    }

    /// Require journaled writes.
    pub fn journal(mut self, enabled: bool) -> Self {
        self.config.journal = Some(enabled);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.config.read_preference = pref;
        self
    }

    /// Set the read concern.
    pub fn read_concern(mut self, concern: ReadConcern) -> Self {
        self.config.read_concern = concern;
        self
    }

    /// Wrap ObjectId `_id` values in results.
    pub fn legacy_support(mut self, enabled: bool) -> Self {
        self.config.legacy_support = enabled;
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = Some(name.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.config.server_selection_timeout = Some(duration);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> MongoResult<MongoConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A configuration file with named groups.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MongoConfigFile {
    /// Name of the group used when none is requested.
    pub active: Option<String>,
    /// Named configuration groups.
    #[serde(default)]
    pub groups: HashMap<String, MongoConfig>,
}

impl MongoConfigFile {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> MongoResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MongoError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` references.
    pub fn parse(content: &str) -> MongoResult<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| MongoError::config(e.to_string()))
    }

    /// Pick the requested group, or the active one, and validate it.
    pub fn resolve(&self, group: Option<&str>) -> MongoResult<MongoConfig> {
        let name = group
            .or(self.active.as_deref())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MongoError::config("MongoDB configuration is missing"))?;

        let config = self
            .groups
            .get(name)
            .ok_or_else(|| MongoError::config(format!("mongodb config group '{}' does not exist", name)))?;

        config.validate().map_err(|e| match e {
            MongoError::Config(msg) => MongoError::config(format!("{} (group '{}')", msg, name)),
            other => other,
        })?;

        Ok(config.clone())
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(content) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
