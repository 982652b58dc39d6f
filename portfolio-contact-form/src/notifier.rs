use crate::{
    settings::Settings,
    validation::{Submission, DEFAULT_SUBJECT},
};
use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::{error, info, warn};

const SUBJECT_PREFIX: &str = "New Contact Form Submission: ";
const IMPLICIT_TLS_PORT: u16 = 465;

/// Tells the site owner about a new submission.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, submission: &Submission) -> Result<(), NotifyError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Email configuration incomplete: {0} is not set")]
    ConfigurationIncomplete(&'static str),
    #[error("Invalid email address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddressError,
    },
    #[error("Error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Unable to set up SMTP transport: {0}")]
    Transport(#[source] lettre::transport::smtp::Error),
    #[error("Error sending message: {0}")]
    Send(#[source] lettre::transport::smtp::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum TransportKind<'a> {
    Url(&'a str),
    ImplicitTls,
    StartTls,
}

/// Sends one plain-text email per submission to the administrator over SMTP.
///
/// Each call opens its own SMTP session and closes it before returning.
pub struct SmtpNotifier {
    sender: Option<String>,
    username: Option<String>,
    password: Option<String>,
    recipient: Option<String>,
    server: String,
    port: u16,
    url: Option<String>,
}

impl SmtpNotifier {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sender: settings.sender_address().map(Into::into),
            username: settings.email_user.clone(),
            password: settings.email_pass.clone(),
            recipient: settings.admin_email.clone(),
            server: settings.smtp_server.clone(),
            port: settings.smtp_port,
            url: settings.smtp_url.clone(),
        }
    }

    async fn send(&self, submission: &Submission) -> Result<(), NotifyError> {
        let Some(sender) = self.sender.as_deref() else {
            return Err(NotifyError::ConfigurationIncomplete("EMAIL_USER"));
        };
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(NotifyError::ConfigurationIncomplete(if self.username.is_none() {
                "EMAIL_USER"
            } else {
                "EMAIL_PASS"
            }));
        };
        let Some(recipient) = self.recipient.as_deref() else {
            return Err(NotifyError::ConfigurationIncomplete("ADMIN_EMAIL"));
        };

        let email = construct_email_message(sender, recipient, submission)?;
        let mailer =
            self.initialise_mailer(Credentials::new(username.clone(), password.clone()))?;
        mailer.send(email).await.map_err(NotifyError::Send)?;
        info!("Sent contact form notification to {recipient}");
        Ok(())
    }

    fn transport_kind(&self) -> TransportKind<'_> {
        match (&self.url, self.port) {
            (Some(url), _) => TransportKind::Url(url),
            (None, IMPLICIT_TLS_PORT) => TransportKind::ImplicitTls,
            (None, _) => TransportKind::StartTls,
        }
    }

    fn initialise_mailer(
        &self,
        credentials: Credentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let builder = match self.transport_kind() {
            TransportKind::Url(url) => {
                info!("initialise_mailer: Connecting to {url}");
                let builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(url)
                    .map_err(NotifyError::Transport)?;
                // Credentials are never sent over a plaintext connection. A relay which insists
                // on authentication then rejects the message instead.
                return Ok(if url_uses_tls(url) {
                    builder.credentials(credentials).build()
                } else {
                    builder.build()
                });
            }
            TransportKind::ImplicitTls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server)
                    .map_err(NotifyError::Transport)?
            }
            TransportKind::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server)
                    .map_err(NotifyError::Transport)?
            }
        };
        info!("initialise_mailer: Connecting to {}:{}", self.server, self.port);
        Ok(builder.port(self.port).credentials(credentials).build())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, submission: &Submission) -> Result<(), NotifyError> {
        let result = self.send(submission).await;
        if let Err(error) = &result {
            error!("Email sending failed: {error}");
        }
        result
    }
}

fn construct_email_message(
    sender: &str,
    recipient: &str,
    submission: &Submission,
) -> Result<Message, NotifyError> {
    let subject = if submission.subject.is_empty() {
        DEFAULT_SUBJECT
    } else {
        submission.subject.as_str()
    };
    let mut builder = Message::builder()
        .from(parse_mailbox(sender)?)
        .to(parse_mailbox(recipient)?)
        .subject(format!("{SUBJECT_PREFIX}{subject}"))
        .header(ContentType::TEXT_PLAIN);
    // The visitor's address is only checked loosely, so it may not be a valid mailbox.
    match submission.email.parse::<Mailbox>() {
        Ok(reply_to) => builder = builder.reply_to(reply_to),
        Err(error) => warn!(
            "Sending without Reply-To, {} is not a valid mailbox: {error}",
            submission.email
        ),
    }
    Ok(builder.body(compose_body(submission, subject))?)
}

fn compose_body(submission: &Submission, subject: &str) -> String {
    format!(
        "You have received a new message from your portfolio website:\n\
         \n\
         Name: {}\n\
         Email: {}\n\
         Subject: {subject}\n\
         Message:\n\
         {}\n",
        submission.name, submission.email, submission.message
    )
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|source| NotifyError::InvalidAddress {
            address: address.into(),
            source,
        })
}

fn url_uses_tls(url: &str) -> bool {
    url.starts_with("smtps://") || url.contains("tls=required")
}
