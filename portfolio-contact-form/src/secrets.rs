use async_trait::async_trait;
use aws_config::BehaviorVersion;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[async_trait]
pub trait SecretRepository {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError>;
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Unable to fetch secret {name}: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Missing secret {0}")]
    MissingSecret(String),
    #[error("Malformed secret: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&config);
        Self(secrets_client)
    }

    async fn get_secret<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError> {
        let secret = self
            .0
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|error| SecretError::Unavailable {
                name: name.into(),
                source: Box::new(error),
            })?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(SecretError::MissingSecret(name.into()));
        };
        Ok(serde_json::from_str(secret_value)?)
    }
}
