//! Credential access for remote calls.
//!
//! The anti-forgery token lives in the browser's cookie jar and can rotate at
//! any time, so it is read on demand for every call and never cached here.

use parking_lot::RwLock;

use crate::constants::graphql::{CSRF_COOKIE, VIEWER_COOKIE};

pub trait CredentialAccessor: Send + Sync {
    /// Anti-forgery token for the active domain, if signed in.
    fn anti_forgery_token(&self) -> Option<String>;

    /// Identifier of the signed-in viewer, if known.
    fn viewer_id(&self) -> Option<String>;

    /// Session cookies to attach to outgoing requests, when the transport
    /// does not manage them itself.
    fn cookie_header(&self) -> Option<String> {
        None
    }
}

/// Credentials backed by a `Cookie` header string for the host domain.
#[derive(Debug, Default)]
pub struct CookieCredentials {
    header: RwLock<String>,
}

impl CookieCredentials {
    pub fn from_header(header: impl Into<String>) -> Self {
        Self {
            header: RwLock::new(header.into()),
        }
    }

    /// Replace the jar contents, e.g. after the host rotated its cookies.
    pub fn set_header(&self, header: impl Into<String>) {
        *self.header.write() = header.into();
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.header.read();
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.trim_matches('"').to_string())
        })
    }
}

impl CredentialAccessor for CookieCredentials {
    fn anti_forgery_token(&self) -> Option<String> {
        self.cookie(CSRF_COOKIE)
    }

    fn viewer_id(&self) -> Option<String> {
        let raw = self.cookie(VIEWER_COOKIE)?;
        parse_viewer_cookie(&raw)
    }

    fn cookie_header(&self) -> Option<String> {
        let header = self.header.read();
        (!header.trim().is_empty()).then(|| header.clone())
    }
}

/// `u%3D55644285` (or already decoded `u=55644285`) -> `55644285`
fn parse_viewer_cookie(raw: &str) -> Option<String> {
    let decoded = raw.replace("%3D", "=").replace("%3d", "=");
    let id: String = decoded
        .strip_prefix("u=")?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_csrf_token() {
        let creds = CookieCredentials::from_header("guest_id=v1; ct0=abc123; lang=en");
        assert_eq!(creds.anti_forgery_token().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_missing_token() {
        let creds = CookieCredentials::from_header("guest_id=v1; ct0=");
        assert_eq!(creds.anti_forgery_token(), None);
        assert_eq!(CookieCredentials::default().anti_forgery_token(), None);
    }

    #[test]
    fn test_viewer_id_from_encoded_cookie() {
        let creds = CookieCredentials::from_header("twid=u%3D55644285; ct0=x");
        assert_eq!(creds.viewer_id().as_deref(), Some("55644285"));

        let quoted = CookieCredentials::from_header("twid=\"u=1234\"");
        assert_eq!(quoted.viewer_id().as_deref(), Some("1234"));

        let garbage = CookieCredentials::from_header("twid=nope");
        assert_eq!(garbage.viewer_id(), None);
    }

    #[test]
    fn test_token_is_read_on_demand() {
        let creds = CookieCredentials::from_header("ct0=first");
        creds.set_header("ct0=second");
        assert_eq!(creds.anti_forgery_token().as_deref(), Some("second"));
    }
}
