use crate::{
    notifier::{Notifier, NotifyError},
    pages::{render_home, THANK_YOU_PAGE},
    store::ContactStore,
    validation::{ContactForm, ValidationError},
};
use axum::{
    extract::{rejection::FormRejection, FromRef, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, Key, SameSite},
    SignedCookieJar,
};
use futures_util::FutureExt;
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Once},
};
use thiserror::Error;
use tracing::{error, info};

pub const HOME_PATH: &str = "/";
pub const SUBMIT_PATH: &str = "/submit";
pub const THANK_YOU_PATH: &str = "/thankyou";

pub const FLASH_COOKIE: &str = "flash";

pub const SUBMISSION_FAILED_MESSAGE: &str =
    "There was an error submitting your form. Please try again.";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// Turns a posted contact form into a stored record (when a store is configured) and an email to
/// the site owner.
pub struct ContactFormHandler<NotifierT: Notifier> {
    notifier: NotifierT,
    store: Option<ContactStore>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid submission: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Unable to notify: {0}")]
    Notify(#[from] NotifyError),
    #[error("Unexpected error: {description}")]
    Unexpected {
        description: String,
        trace: Option<Backtrace>,
    },
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Makes every panic record its backtrace for the submission guard, then runs the previously
/// installed hook. Later calls are no-ops.
pub fn install_panic_hook() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

impl SubmitError {
    fn log(&self) {
        match self {
            SubmitError::Invalid(reason) => info!("Rejected contact form submission: {reason}"),
            // The notifier logs its own failures.
            SubmitError::Notify(_) => {}
            SubmitError::Unexpected {
                description,
                trace: Some(trace),
            } => error!("Unexpected error handling contact form: {description}\n{trace}"),
            SubmitError::Unexpected { description, .. } => {
                error!("Unexpected error handling contact form: {description}")
            }
        }
    }

    fn flash_message(&self) -> String {
        match self {
            SubmitError::Invalid(reason) => reason.to_string(),
            SubmitError::Notify(_) => SUBMISSION_FAILED_MESSAGE.into(),
            SubmitError::Unexpected { .. } => UNEXPECTED_ERROR_MESSAGE.into(),
        }
    }
}

impl<NotifierT: Notifier> ContactFormHandler<NotifierT> {
    pub fn new(notifier: NotifierT, store: Option<ContactStore>) -> Self {
        Self { notifier, store }
    }

    pub async fn process_form(&self, form: ContactForm) -> Result<(), SubmitError> {
        let submission = form.validate()?;
        if let Some(store) = &self.store {
            // Storing is best-effort: the owner still gets the email.
            if let Err(error) = store.record(&submission).await {
                error!("Could not store contact form submission: {error}");
            }
        }
        self.notifier.notify(&submission).await?;
        Ok(())
    }

    /// Like [`Self::process_form`], but also turns a panic anywhere below into an error.
    /// The backtrace is only available once [`install_panic_hook`] has run.
    async fn process_form_guarded(&self, form: ContactForm) -> Result<(), SubmitError> {
        PANIC_BACKTRACE.with(RefCell::take);
        match AssertUnwindSafe(self.process_form(form)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(SubmitError::Unexpected {
                description: format!(
                    "panic while processing submission: {}",
                    panic_message(panic.as_ref())
                ),
                trace: PANIC_BACKTRACE.with(RefCell::take),
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "(no message)"
    }
}

pub struct AppState<NotifierT: Notifier> {
    handler: Arc<ContactFormHandler<NotifierT>>,
    flash_key: Key,
}

impl<NotifierT: Notifier> Clone for AppState<NotifierT> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            flash_key: self.flash_key.clone(),
        }
    }
}

impl<NotifierT: Notifier> FromRef<AppState<NotifierT>> for Key {
    fn from_ref(state: &AppState<NotifierT>) -> Self {
        state.flash_key.clone()
    }
}

pub fn router<NotifierT: Notifier>(
    handler: ContactFormHandler<NotifierT>,
    flash_key: Key,
) -> Router {
    Router::new()
        .route(HOME_PATH, get(home))
        .route(SUBMIT_PATH, post(submit::<NotifierT>))
        .route(THANK_YOU_PATH, get(thank_you))
        .with_state(AppState {
            handler: Arc::new(handler),
            flash_key,
        })
}

async fn home(jar: SignedCookieJar) -> Response {
    let flash = jar
        .get(FLASH_COOKIE)
        .map(|cookie| cookie.value().to_owned());
    let jar = if flash.is_some() {
        jar.remove(Cookie::build(FLASH_COOKIE).path(HOME_PATH))
    } else {
        jar
    };
    match render_home(flash.as_deref()) {
        Ok(page) => (jar, Html(page)).into_response(),
        Err(error) => {
            error!("Error rendering contact form page: {error}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn submit<NotifierT: Notifier>(
    State(state): State<AppState<NotifierT>>,
    jar: SignedCookieJar,
    form: Result<Form<ContactForm>, FormRejection>,
) -> Response {
    let result = match form {
        Ok(Form(form)) => state.handler.process_form_guarded(form).await,
        Err(rejection) => Err(SubmitError::Unexpected {
            description: format!("could not decode form: {rejection}"),
            trace: None,
        }),
    };
    match result {
        Ok(()) => Redirect::to(THANK_YOU_PATH).into_response(),
        Err(error) => {
            error.log();
            (with_flash(jar, error.flash_message()), Redirect::to(HOME_PATH)).into_response()
        }
    }
}

async fn thank_you() -> Html<&'static str> {
    Html(THANK_YOU_PAGE)
}

fn with_flash(jar: SignedCookieJar, message: String) -> SignedCookieJar {
    jar.add(
        Cookie::build((FLASH_COOKIE, message))
            .path(HOME_PATH)
            .http_only(true)
            .same_site(SameSite::Lax),
    )
}
