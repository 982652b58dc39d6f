use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};
use tokio::{
    sync::watch::{self, error::RecvError, Receiver, Sender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const REJECTING_SMTP_PORT: u16 = 4568;

/// One message as accepted by the fake relay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceivedMail {
    pub sender: String,
    pub recipients: Vec<String>,
    /// Raw DATA section: headers followed by the encoded body.
    pub content: String,
}

#[derive(Clone)]
struct RecordingHandler {
    current: ReceivedMail,
    outbox: Arc<Sender<ReceivedMail>>,
    delivered: Arc<AtomicUsize>,
}

impl Handler for RecordingHandler {
    fn data_start(
        &mut self,
        _domain: &str,
        from: &str,
        _is8bit: bool,
        to: &[String],
    ) -> mailin_embedded::Response {
        self.current = ReceivedMail {
            sender: from.into(),
            recipients: to.to_vec(),
            content: String::new(),
        };
        mailin_embedded::response::OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.current.content.push_str(&String::from_utf8_lossy(buf));
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        self.outbox.send_replace(std::mem::take(&mut self.current));
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        password: &str,
    ) -> mailin_embedded::Response {
        debug!("Got authentication data {authorization_id}, {authentication_id}, {password}");
        mailin_embedded::response::AUTH_OK
    }
}

/// A plaintext SMTP relay on a fixed local port which records every message it accepts.
pub struct FakeSmtpServer {
    port: u16,
    server: Mutex<Option<Server<RecordingHandler>>>,
    inbox: tokio::sync::Mutex<Receiver<ReceivedMail>>,
    delivered: Arc<AtomicUsize>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        Self::on_port(SMTP_PORT)
    }

    pub fn on_port(port: u16) -> Self {
        let (sender, receiver) = watch::channel(ReceivedMail::default());
        let delivered = Arc::new(AtomicUsize::new(0));
        let handler = RecordingHandler {
            current: ReceivedMail::default(),
            outbox: Arc::new(sender),
            delivered: delivered.clone(),
        };
        let mut server = Server::new(handler);
        server
            .with_name("portfolio.localhost")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("127.0.0.1:{port}"))
            .unwrap();
        Self {
            port,
            server: Mutex::new(Some(server)),
            inbox: tokio::sync::Mutex::new(receiver),
            delivered,
        }
    }

    /// Starts serving on a background thread. Subsequent calls are no-ops.
    pub fn start(&self) {
        let mut guard = self.server.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    pub fn url(&self) -> String {
        format!("smtp://localhost:{}", self.port)
    }

    /// Waits for the next message accepted after the last call to this method or to `flush`.
    pub async fn last_mail(&self) -> Result<ReceivedMail, RecvError> {
        let mut receiver = self.inbox.lock().await;
        receiver.changed().await?;
        let mail = receiver.borrow_and_update().clone();
        Ok(mail)
    }

    /// Discards any message accepted so far so that `last_mail` only sees new deliveries.
    pub async fn flush(&self) {
        let mut receiver = self.inbox.lock().await;
        let _ = timeout(Duration::from_millis(100), receiver.changed()).await;
        let _ = receiver.borrow_and_update();
    }

    pub fn delivery_count(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct RejectingSmtpHandler;

impl Handler for RejectingSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts (once per process) a relay on [`REJECTING_SMTP_PORT`] which fails every session, and
/// returns its URL.
pub fn start_rejecting_smtp_server() -> String {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| {
        let mut server = Server::new(RejectingSmtpHandler);
        server
            .with_name("portfolio.localhost")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("127.0.0.1:{REJECTING_SMTP_PORT}"))
            .unwrap();
        std::thread::spawn(move || {
            let _ = server.serve();
        });
    });
    format!("smtp://localhost:{REJECTING_SMTP_PORT}")
}
