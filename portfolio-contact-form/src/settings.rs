use crate::secrets::SecretRepository;
use axum_extra::extract::cookie::Key;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Deserializer};
use std::fmt;
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const REDACTED: &str = "<redacted>";

/// Process-wide configuration, read once from the environment at startup and passed explicitly
/// to every component afterwards.
#[derive(Deserialize, Clone)]
pub struct Settings {
    #[serde(default, deserialize_with = "non_empty")]
    pub admin_email: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub email_user: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub email_pass: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub email_from: Option<String>,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Overrides `smtp_server` and `smtp_port` with a full transport URL.
    #[serde(default, deserialize_with = "non_empty")]
    pub smtp_url: Option<String>,
    /// Name of a Secrets Manager secret holding SMTP credentials.
    #[serde(default, deserialize_with = "non_empty")]
    pub smtp_credentials_secret: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub db_host: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub db_user: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub db_pass: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub db_name: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub database_url: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub secret_key: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Deserialize)]
pub struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    pub username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    pub password: String,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Unable to read configuration from the environment: {0}")]
    Environment(#[from] ConfigError),
    #[error("Invalid database host {0}")]
    DatabaseHost(String),
    #[error("Invalid database URL: {0}")]
    DatabaseUrl(#[from] url::ParseError),
}

impl Settings {
    /// Reads the settings from the process environment, after seeding it from a `.env` file in
    /// the working directory if there is one.
    pub fn from_env() -> Result<Self, SettingsError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        Self::from_source(Environment::default())
    }

    #[cfg(test)]
    pub fn from_vars<'a>(vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let vars: config::Map<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::from_source(Environment::default().source(Some(vars))).unwrap()
    }

    fn from_source(environment: Environment) -> Result<Self, SettingsError> {
        Ok(Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?)
    }

    /// The address mail is sent from: `EMAIL_FROM`, falling back to `EMAIL_USER`.
    pub fn sender_address(&self) -> Option<&str> {
        self.email_from.as_deref().or(self.email_user.as_deref())
    }

    /// Connection URL of the persistence store, if one is configured. `DATABASE_URL` wins over
    /// the individual `DB_*` settings, which describe a MySQL server.
    pub fn database_url(&self) -> Result<Option<String>, SettingsError> {
        if let Some(url) = &self.database_url {
            return Ok(Some(url.clone()));
        }
        let Some(host) = &self.db_host else {
            return Ok(None);
        };
        let mut url = Url::parse(&format!("mysql://{host}"))?;
        if let Some(user) = &self.db_user {
            url.set_username(user)
                .map_err(|()| SettingsError::DatabaseHost(host.clone()))?;
        }
        if let Some(password) = &self.db_pass {
            url.set_password(Some(password))
                .map_err(|()| SettingsError::DatabaseHost(host.clone()))?;
        }
        if let Some(name) = &self.db_name {
            url.set_path(name);
        }
        Ok(Some(url.into()))
    }

    /// Key signing the flash cookie. Without `SECRET_KEY` a random key is used, so pending flash
    /// messages do not survive a restart.
    pub fn flash_key(&self) -> Key {
        match &self.secret_key {
            Some(secret) => Key::from(Sha512::digest(secret.as_bytes()).as_slice()),
            None => {
                warn!("SECRET_KEY is not set; using a random key to sign flash messages");
                Key::generate()
            }
        }
    }

    pub fn needs_secret_credentials(&self) -> bool {
        self.smtp_credentials_secret.is_some()
            && (self.email_user.is_none() || self.email_pass.is_none())
    }

    /// Fills in missing SMTP credentials from the configured secret. A failure to fetch the
    /// secret is logged and leaves the settings untouched; the notifier then reports the
    /// incomplete configuration on every submission.
    pub async fn with_secret_credentials<SecretRepositoryT: SecretRepository>(
        mut self,
        secrets_repository: &SecretRepositoryT,
    ) -> Self {
        if !self.needs_secret_credentials() {
            return self;
        }
        let Some(name) = self.smtp_credentials_secret.as_deref() else {
            return self;
        };
        match secrets_repository.get_secret::<SmtpCredentials>(name).await {
            Ok(credentials) => {
                self.email_user.get_or_insert(credentials.username);
                self.email_pass.get_or_insert(credentials.password);
            }
            Err(error) => {
                warn!("Could not retrieve SMTP credentials {name} from AWS secrets manager: {error}");
            }
        }
        self
    }
}

// Passwords and keys never reach the logs.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("admin_email", &self.admin_email)
            .field("email_user", &self.email_user)
            .field("email_pass", &self.email_pass.as_ref().map(|_| REDACTED))
            .field("email_from", &self.email_from)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_url", &self.smtp_url.as_deref().map(redact_url_password))
            .field("smtp_credentials_secret", &self.smtp_credentials_secret)
            .field("db_host", &self.db_host)
            .field("db_user", &self.db_user)
            .field("db_pass", &self.db_pass.as_ref().map(|_| REDACTED))
            .field("db_name", &self.db_name)
            .field(
                "database_url",
                &self.database_url.as_deref().map(redact_url_password),
            )
            .field("secret_key", &self.secret_key.as_ref().map(|_| REDACTED))
            .field("bind_address", &self.bind_address)
            .finish()
    }
}

fn redact_url_password(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some(REDACTED));
            parsed.into()
        }
        Ok(_) => url.into(),
        Err(_) => REDACTED.into(),
    }
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.trim().is_empty()))
}

fn default_smtp_server() -> String {
    DEFAULT_SMTP_SERVER.into()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.into()
}
