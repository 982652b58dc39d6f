mod handler;
mod notifier;
mod pages;
mod secrets;
mod settings;
mod store;
mod validation;

use anyhow::Context;
use handler::{install_panic_hook, router, ContactFormHandler};
use notifier::SmtpNotifier;
use secrets::{AwsSecretsManagerSecretRepository, SecretRepository};
use settings::Settings;
use store::ContactStore;
use tokio::net::TcpListener;
use tracing::info;

const LAMBDA_RUNTIME_VARIABLE: &str = "AWS_LAMBDA_RUNTIME_API";

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    install_panic_hook();

    let mut settings = Settings::from_env().context("Could not load settings")?;
    if settings.needs_secret_credentials() {
        let secrets_repository = AwsSecretsManagerSecretRepository::open().await;
        settings = settings.with_secret_credentials(&secrets_repository).await;
    }

    let store = settings
        .database_url()
        .context("Could not determine database URL")?
        .map(ContactStore::new);
    if store.is_none() {
        info!("No database configured; submissions are only sent by email");
    }
    let handler = ContactFormHandler::new(SmtpNotifier::new(&settings), store);
    let app = router(handler, settings.flash_key());

    if std::env::var_os(LAMBDA_RUNTIME_VARIABLE).is_some() {
        lambda_http::run(app).await
    } else {
        let listener = TcpListener::bind(&settings.bind_address)
            .await
            .with_context(|| format!("Could not bind to {}", settings.bind_address))?;
        info!("Listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
