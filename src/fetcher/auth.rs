//! Request authentication
//!
//! API keys are attached verbatim; signed templates additionally carry an
//! HMAC-SHA256 signature (hex) over the encoded query string followed by the JSON
//! body, computed after every other parameter has been placed.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use super::HttpRequest;
use crate::template::{AuthSpec, KeyLocation};

type HmacSha256 = Hmac<Sha256>;

/// API credentials of one job
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// API key
    pub api_key: Option<String>,
    /// Signing secret
    pub secret: Option<String>,
}

impl Credentials {
    /// No credentials (public endpoints)
    pub fn none() -> Self {
        Self::default()
    }

    /// Key and optional secret
    pub fn new(api_key: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            secret,
        }
    }

    /// Read credentials from the named environment variables
    ///
    /// Unset or empty variables yield `None` for that credential.
    pub fn from_env(api_key_var: Option<&str>, secret_var: Option<&str>) -> Self {
        let read = |var: Option<&str>| {
            var.and_then(|name| std::env::var(name).ok())
                .filter(|value| !value.is_empty())
        };
        Self {
            api_key: read(api_key_var),
            secret: read(secret_var),
        }
    }
}

// Never print secrets
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("secret", &redact(&self.secret))
            .finish()
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &str) -> Result<String, String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| format!("invalid signing key: {e}"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Encode query pairs the way they go on the wire
pub fn encode_query(query: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish()
}

fn place(request: &mut HttpRequest, location: KeyLocation, name: &str, value: String) {
    match location {
        KeyLocation::Header => request.headers.push((name.to_string(), value)),
        KeyLocation::Query => request.query.push((name.to_string(), value)),
    }
}

/// Attach credentials to a built request
pub fn apply_auth(
    request: &mut HttpRequest,
    spec: &AuthSpec,
    credentials: &Credentials,
) -> Result<(), String> {
    match spec {
        AuthSpec::None => Ok(()),
        AuthSpec::ApiKey { location, name } => {
            let key = credentials.api_key.clone().ok_or("missing API key")?;
            place(request, *location, name, key);
            Ok(())
        }
        AuthSpec::Signed {
            key_location,
            key_name,
            signature_location,
            signature_name,
            timestamp_param,
        } => {
            let key = credentials.api_key.clone().ok_or("missing API key")?;
            let secret = credentials.secret.as_deref().ok_or("missing signing secret")?;

            if let Some(param) = timestamp_param {
                request
                    .query
                    .push((param.clone(), Utc::now().timestamp_millis().to_string()));
            }
            place(request, *key_location, key_name, key);

            let mut payload = encode_query(&request.query);
            if let Some(body) = &request.body {
                payload.push_str(&body.to_string());
            }
            let signature = sign(secret, &payload)?;
            place(request, *signature_location, signature_name, signature);
            Ok(())
        }
    }
}
