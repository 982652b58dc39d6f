use serde::Serialize;
use tinytemplate::{error::Error, TinyTemplate};

const HOME_TEMPLATE_NAME: &str = "home";
const HOME_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/home.html"));

pub const THANK_YOU_PAGE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/thankyou.html"));

#[derive(Serialize)]
struct Context<'a> {
    flash: Option<&'a str>,
}

/// Renders the contact form, with the pending flash message above it if there is one.
pub fn render_home(flash: Option<&str>) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_template(HOME_TEMPLATE_NAME, HOME_TEMPLATE)?;
    tt.render(HOME_TEMPLATE_NAME, &Context { flash })
}

#[cfg(test)]
mod tests {
    use super::render_home;
    use googletest::prelude::*;

    const MALICIOUS_CONTENT: &str = "<script>doEvil();</script>";

    #[test]
    fn renders_form_posting_to_submit() -> Result<()> {
        let output = render_home(None).unwrap();

        verify_that!(
            output,
            all!(
                contains_substring(r#"action="/submit""#),
                contains_substring(r#"name="name""#),
                contains_substring(r#"name="email""#),
                contains_substring(r#"name="subject""#),
                contains_substring(r#"name="message""#)
            )
        )
    }

    #[test]
    fn omits_flash_when_absent() -> Result<()> {
        let output = render_home(None).unwrap();

        verify_that!(output, not(contains_substring(r#"class="flash""#)))
    }

    #[test]
    fn renders_flash_message() -> Result<()> {
        let output = render_home(Some("Please fill in all required fields.")).unwrap();

        verify_that!(
            output,
            contains_substring(
                r#"<p class="flash" role="alert">Please fill in all required fields.</p>"#
            )
        )
    }

    #[test]
    fn escapes_flash_message() -> Result<()> {
        let output = render_home(Some(MALICIOUS_CONTENT)).unwrap();

        verify_that!(output, not(contains_substring(MALICIOUS_CONTENT)))
    }
}
