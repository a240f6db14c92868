//! RTSP authentication (RFC 2326 §D.2, RFC 2617).
//!
//! A `401 Unauthorized` response carries a `WWW-Authenticate` challenge.
//! The session answers it once by retransmitting the rejected request
//! with an `Authorization` header:
//!
//! | Scheme | Header value |
//! |--------|--------------|
//! | Basic  | `Basic base64(user:pass)` |
//! | Digest | `Digest username=.., realm=.., nonce=.., uri=.., response=..` |
//!
//! Digest follows RFC 2617 §3.2.2: `MD5` and `MD5-sess` algorithms, and the
//! `auth` / `auth-int` quality-of-protection options (`auth` is preferred
//! when the server offers both).

use std::collections::HashMap;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use md5::{Digest, Md5};

use crate::error::{ParseErrorKind, Result, RtspError};

/// Username/password pair for an RTSP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// A parsed `WWW-Authenticate` header: scheme plus `key=value` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lower-cased scheme name (`basic`, `digest`, ...).
    pub scheme: String,
    /// Parameters with lower-cased keys and unquoted values.
    pub params: HashMap<String, String>,
}

impl Challenge {
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.is_empty() {
            return Err(RtspError::parse(ParseErrorKind::InvalidChallenge));
        }

        let params = split_params(rest)
            .into_iter()
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((key.trim().to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        Ok(Challenge {
            scheme: scheme.to_ascii_lowercase(),
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Split on commas that are not inside a quoted string.
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn md5_hex(input: &[u8]) -> String {
    format!("{:x}", Md5::digest(input))
}

/// `Authorization: Basic` value (RFC 2617 §2).
pub fn basic_authorization(credentials: &Credentials) -> String {
    let pair = format!("{}:{}", credentials.username, credentials.password);
    format!("Basic {}", BASE64_STANDARD.encode(pair.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    fn as_str(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

/// Digest state derived from one challenge. The nonce count increments on
/// every authorization computed against the same nonce.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Option<String>,
    qop: Option<Qop>,
    nonce_count: u32,
}

impl DigestAuth {
    pub fn from_challenge(challenge: &Challenge) -> Result<Self> {
        let realm = challenge
            .param("realm")
            .ok_or(RtspError::parse(ParseErrorKind::InvalidChallenge))?;
        let nonce = challenge
            .param("nonce")
            .ok_or(RtspError::parse(ParseErrorKind::InvalidChallenge))?;

        let offered: Vec<&str> = challenge
            .param("qop")
            .map(|q| q.split(',').map(str::trim).collect())
            .unwrap_or_default();
        let qop = if offered.contains(&"auth") {
            Some(Qop::Auth)
        } else if offered.contains(&"auth-int") {
            Some(Qop::AuthInt)
        } else {
            None
        };

        Ok(Self {
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            opaque: challenge.param("opaque").map(str::to_string),
            algorithm: challenge.param("algorithm").map(str::to_string),
            qop,
            nonce_count: 0,
        })
    }

    /// Compute the `Authorization` value with a fresh random cnonce.
    pub fn authorization(
        &mut self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        body: &[u8],
    ) -> String {
        let cnonce = format!("{:08x}", rand::random::<u32>());
        self.authorization_with_cnonce(credentials, method, uri, body, &cnonce)
    }

    pub fn authorization_with_cnonce(
        &mut self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        body: &[u8],
        cnonce: &str,
    ) -> String {
        let mut ha1 = md5_hex(
            format!(
                "{}:{}:{}",
                credentials.username, self.realm, credentials.password
            )
            .as_bytes(),
        );
        let sess = self
            .algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("md5-sess"));
        if sess {
            ha1 = md5_hex(format!("{}:{}:{}", ha1, self.nonce, cnonce).as_bytes());
        }

        let ha2 = match self.qop {
            Some(Qop::AuthInt) => {
                md5_hex(format!("{}:{}:{}", method, uri, md5_hex(body)).as_bytes())
            }
            _ => md5_hex(format!("{}:{}", method, uri).as_bytes()),
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            credentials.username, self.realm, self.nonce, uri
        );

        let response = match self.qop {
            Some(qop) => {
                self.nonce_count += 1;
                let nc = format!("{:08x}", self.nonce_count);
                header.push_str(&format!(
                    ", qop={}, nc={}, cnonce=\"{}\"",
                    qop.as_str(),
                    nc,
                    cnonce
                ));
                md5_hex(
                    format!(
                        "{}:{}:{}:{}:{}:{}",
                        ha1,
                        self.nonce,
                        nc,
                        cnonce,
                        qop.as_str(),
                        ha2
                    )
                    .as_bytes(),
                )
            }
            None => md5_hex(format!("{}:{}:{}", ha1, self.nonce, ha2).as_bytes()),
        };

        header.push_str(&format!(", response=\"{}\"", response));
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={}", algorithm));
        }
        header
    }
}

/// Authorization scheme chosen from a challenge.
#[derive(Debug, Clone)]
pub enum Authenticator {
    Basic,
    Digest(DigestAuth),
}

impl Authenticator {
    /// Build an authenticator from a `WWW-Authenticate` header value.
    /// Unknown schemes yield [`RtspError::UnsupportedAuth`].
    pub fn from_challenge(header: &str) -> Result<Self> {
        let challenge = Challenge::parse(header)?;
        match challenge.scheme.as_str() {
            "basic" => Ok(Authenticator::Basic),
            "digest" => Ok(Authenticator::Digest(DigestAuth::from_challenge(
                &challenge,
            )?)),
            other => Err(RtspError::UnsupportedAuth(other.to_string())),
        }
    }

    pub fn authorization(
        &mut self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        body: &[u8],
    ) -> String {
        match self {
            Authenticator::Basic => basic_authorization(credentials),
            Authenticator::Digest(digest) => {
                digest.authorization(credentials, method, uri, body)
            }
        }
    }
}
