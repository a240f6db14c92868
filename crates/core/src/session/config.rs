use std::collections::HashMap;

use crate::error::{Result, RtspError};
use crate::protocol::{Credentials, Method};

use super::retry::{NoRetry, RetryPolicy};

/// Default media path when only a hostname is given.
pub const DEFAULT_PATH: &str = "axis-media/media.amp";

/// Client session configuration.
///
/// Either `uri` or `hostname` must be set. With a hostname the URI is
/// `rtsp://<hostname>/<path>[?<parameters joined by &>]`; a full `uri`
/// overrides all three.
#[derive(Debug)]
pub struct SessionConfig {
    pub uri: Option<String>,
    pub hostname: Option<String>,
    pub path: String,
    /// Query parameters such as `resolution=1280x720`.
    pub parameters: Vec<String>,
    /// Headers added to every request of a method, after the common ones.
    pub default_headers: HashMap<Method, Vec<(String, String)>>,
    /// Headers added to every request.
    pub common_headers: Vec<(String, String)>,
    pub credentials: Option<Credentials>,
    pub retry: Box<dyn RetryPolicy>,
    /// Request that renews the session: `OPTIONS` or `GET_PARAMETER`.
    pub keepalive: Method,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut default_headers = HashMap::new();
        default_headers.insert(
            Method::Setup,
            vec![("Blocksize".to_string(), "64000".to_string())],
        );
        default_headers.insert(
            Method::Describe,
            vec![("Accept".to_string(), "application/sdp".to_string())],
        );
        Self {
            uri: None,
            hostname: None,
            path: DEFAULT_PATH.to_string(),
            parameters: Vec::new(),
            default_headers,
            common_headers: Vec::new(),
            credentials: None,
            retry: Box::new(NoRetry),
            keepalive: Method::Options,
        }
    }
}

impl SessionConfig {
    pub fn with_uri(uri: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            ..Self::default()
        }
    }

    pub fn with_hostname(hostname: &str) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.resolve_uri()?;
        match self.keepalive {
            Method::Options | Method::GetParameter => Ok(()),
            other => Err(RtspError::InvalidConfig(format!(
                "{other} cannot renew a session"
            ))),
        }
    }

    /// The request URI for OPTIONS, DESCRIBE, PLAY, PAUSE and TEARDOWN.
    pub fn resolve_uri(&self) -> Result<String> {
        if let Some(uri) = self.uri.as_deref().filter(|u| !u.is_empty()) {
            url::Url::parse(uri)?;
            return Ok(uri.to_string());
        }
        let hostname = self
            .hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(RtspError::MissingUri)?;
        let path = self.path.trim_start_matches('/');
        let uri = if self.parameters.is_empty() {
            format!("rtsp://{hostname}/{path}")
        } else {
            format!("rtsp://{hostname}/{path}?{}", self.parameters.join("&"))
        };
        url::Url::parse(&uri)?;
        Ok(uri)
    }

    pub(crate) fn headers_for(&self, method: Method) -> impl Iterator<Item = &(String, String)> {
        self.common_headers
            .iter()
            .chain(self.default_headers.get(&method).into_iter().flatten())
    }
}
