//! Interactive authorization step.
//!
//! Obtaining an authorization code needs a human to approve the app in a
//! browser. [`Authorizer`] models that as a capability so the exchange logic
//! never performs the interaction itself.

use std::io::{BufRead, Write};
use tracing::{debug, warn};

use super::OAuthError;

/// Hands an authorization URL to a human and returns the resulting code.
pub trait Authorizer {
    fn open_for_authorization(&mut self, url: &str) -> Result<String, OAuthError>;
}

/// Console flow: print the URL, try to open a browser, read the code back.
///
/// The answer may be the bare code or the whole redirect URL.
pub struct ConsoleAuthorizer<R, W> {
    input: R,
    output: W,
    open_browser: bool,
}

impl ConsoleAuthorizer<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Console authorizer on stdin/stdout that opens the system browser.
    pub fn stdio() -> Self {
        Self::with_io(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleAuthorizer<R, W> {
    pub fn with_io(input: R, output: W) -> Self {
        Self {
            input,
            output,
            open_browser: true,
        }
    }

    /// Only print the URL.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    fn prompt(&mut self, url: &str) -> std::io::Result<()> {
        writeln!(self.output, "Authorization URL: {url}")?;
        writeln!(self.output)?;
        writeln!(self.output, "1. Visit this URL in your browser and authorize the app.")?;
        writeln!(self.output, "2. You will be redirected to the app's redirect URI.")?;
        writeln!(
            self.output,
            "3. Paste the redirect URL, or just its 'code' parameter, below."
        )?;
        write!(self.output, "\nAuthorization code: ")?;
        self.output.flush()
    }
}

fn io_error(e: std::io::Error) -> OAuthError {
    OAuthError::Other(format!("Console I/O failed: {e}"))
}

impl<R: BufRead, W: Write> Authorizer for ConsoleAuthorizer<R, W> {
    fn open_for_authorization(&mut self, url: &str) -> Result<String, OAuthError> {
        if self.open_browser {
            match open::that(url) {
                Ok(()) => debug!("Opened authorization URL in browser"),
                Err(e) => warn!(error = %e, "Could not open browser, visit the URL manually"),
            }
        }

        self.prompt(url).map_err(io_error)?;

        let mut line = String::new();
        self.input.read_line(&mut line).map_err(io_error)?;
        parse_authorization_input(&line)
    }
}

/// Extract the authorization code from what the user pasted.
///
/// Accepts a bare code, a full redirect URL, or a bare query string
/// (`code=...&state=...`). A redirect carrying `error` is a failed exchange.
pub fn parse_authorization_input(input: &str) -> Result<String, OAuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(OAuthError::NotAuthorized(
            "No authorization code entered".to_string(),
        ));
    }

    let query = match url::Url::parse(input) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            parsed.query().unwrap_or_default().to_string()
        }
        _ if input.contains("code=") || input.contains("error=") => {
            input.trim_start_matches('?').to_string()
        }
        _ => return Ok(input.to_string()),
    };

    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let detail = match description {
            Some(d) => format!("Authorization denied: {error} ({d})"),
            None => format!("Authorization denied: {error}"),
        };
        return Err(OAuthError::ExchangeFailed(detail));
    }

    code.filter(|c| !c.is_empty()).ok_or_else(|| {
        OAuthError::NotAuthorized("Redirect URL has no 'code' parameter".to_string())
    })
}
