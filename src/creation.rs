//! Creation response classification
//!
//! The portal answers the creation POST in three recognizably different
//! shapes: a redirect when the request was accepted, a small JSON body
//! naming an invalid verification text, or an HTML/JSON body that says
//! nothing useful. Keeping the classification pure lets the retry loop
//! in the portal module stay free of parsing concerns.

/// Marker body the portal returns for a wrong captcha answer
const INVALID_CHALLENGE_MARKER: &str = r#"{"status":"Texto de verificação inválido"}"#;

/// Substrings that mark an accepted creation in a 200 body
const ACCEPTED_MARKERS: [&str; 2] = [r#""status":"ok""#, r#""status":"success""#];

/// What one creation POST meant
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreationOutcome {
    /// The portal accepted the request; it will appear in the catalog
    Accepted,
    /// The captcha answer was wrong; retry with a fresh challenge
    InvalidChallenge,
    /// Anything else; retried like a wrong answer, logged with context
    Unexpected {
        /// HTTP status of the response
        status: u16,
        /// Leading slice of the body for the log line
        body_snippet: String,
    },
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    let mut end = trimmed.len().min(200);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

/// Classify the portal's answer to a creation POST.
///
/// Redirects always mean success because the no-redirect client is used
/// for this call and the portal bounces accepted requests back to the
/// listing page.
pub fn classify_creation_response(status: u16, body: &str) -> CreationOutcome {
    if (300..400).contains(&status) {
        return CreationOutcome::Accepted;
    }
    if status == 200 {
        let trimmed = body.trim();
        if trimmed == INVALID_CHALLENGE_MARKER {
            return CreationOutcome::InvalidChallenge;
        }
        if ACCEPTED_MARKERS.iter().any(|marker| trimmed.contains(marker)) {
            return CreationOutcome::Accepted;
        }
    }
    CreationOutcome::Unexpected {
        status,
        body_snippet: snippet(body),
    }
}
