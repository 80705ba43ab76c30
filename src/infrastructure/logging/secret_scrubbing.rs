use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

static SCRUBBER: LazyLock<SecretScrubber> = LazyLock::new(SecretScrubber::new);

/// Scrub a log message with the shared scrubber.
pub fn scrub(message: &str) -> String {
    SCRUBBER.scrub_message(message)
}

/// Redacts credentials from text before it reaches a log line.
///
/// Backend frames and HTTP headers are logged at debug level; the login
/// frame carries the API key in its params, so every frame goes through here.
#[derive(Clone)]
pub struct SecretScrubber {
    api_key_pattern: Regex,
    auth_params_pattern: Regex,
    token_pattern: Regex,
    bearer_pattern: Regex,
    password_pattern: Regex,
}

impl SecretScrubber {
    /// Create a new secret scrubber
    pub fn new() -> Self {
        Self {
            // Backend API keys: "<numeric id>-<long alphanumeric secret>"
            api_key_pattern: Regex::new(r"\b\d+-[A-Za-z0-9]{32,}\b").expect("valid regex"),
            // Params of any auth.* call
            auth_params_pattern: Regex::new(
                r#"("method"\s*:\s*"auth\.[^"]*"\s*,\s*"params"\s*:\s*)\[[^\]]*\]"#,
            )
            .expect("valid regex"),
            // Generic key/token fields
            token_pattern: Regex::new(
                r#"["']?(?:api_key|apikey|token|secret)["']?\s*[:=]\s*["']?([a-zA-Z0-9-_\.]{8,})["']?"#,
            )
            .expect("valid regex"),
            // Bearer tokens in Authorization headers
            bearer_pattern: Regex::new(r"Bearer\s+[a-zA-Z0-9-_\.]+").expect("valid regex"),
            // Password fields
            password_pattern: Regex::new(r#"["']?password["']?\s*[:=]\s*["']?([^"'\s,}]+)["']?"#)
                .expect("valid regex"),
        }
    }

    /// Scrub a message of sensitive data
    pub fn scrub_message(&self, message: &str) -> String {
        let mut scrubbed = self
            .auth_params_pattern
            .replace_all(message, r#"${1}["[REDACTED]"]"#)
            .to_string();
        scrubbed = self
            .api_key_pattern
            .replace_all(&scrubbed, "[API_KEY_REDACTED]")
            .to_string();
        scrubbed = self
            .bearer_pattern
            .replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]")
            .to_string();
        scrubbed = self
            .token_pattern
            .replace_all(&scrubbed, |caps: &Captures| {
                let full_match = &caps[0];
                if let Some(colon_pos) = full_match.find(':') {
                    format!("{}:[REDACTED]", &full_match[..colon_pos])
                } else if let Some(eq_pos) = full_match.find('=') {
                    format!("{}=[REDACTED]", &full_match[..eq_pos])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        scrubbed = self
            .password_pattern
            .replace_all(&scrubbed, "password=[REDACTED]")
            .to_string();
        scrubbed
    }
}

impl Default for SecretScrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretScrubber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretScrubber").finish()
    }
}
