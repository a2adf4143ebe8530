//! Upstream identity providers.
//!
//! The bridge only needs two things from a provider: where to send the user, and a way to check
//! the assertion the user comes back with. Nothing inside an assertion is trusted before
//! `verify` succeeded.
use std::fmt;

use base64::{decode_config, URL_SAFE_NO_PAD};
use ring::hmac;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::primitives::Time;
use crate::primitives::user::Claims;

/// Registered JWT claims which are consumed by verification and not copied to the user.
const REGISTERED: &[&str] = &["iss", "sub", "aud", "exp", "iat", "nbf", "nonce", "azp", "jti", "at_hash"];

/// The verified content of an upstream assertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamIdentity {
    /// The subject identifier at the upstream provider.
    pub subject: String,

    /// Further claims about the subject, such as `email` or `name`.
    pub claims: Claims,
}

/// Why an upstream assertion was not accepted.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Not a well formed assertion.
    #[error("malformed assertion")]
    Malformed,

    /// The signature does not verify.
    #[error("invalid signature")]
    Signature,

    /// Issued by someone else than the configured provider.
    #[error("unexpected issuer")]
    Issuer,

    /// Issued for another client of the provider.
    #[error("unexpected audience")]
    Audience,

    /// Past its expiry.
    #[error("assertion expired")]
    Expired,

    /// Does not repeat the nonce of the login.
    #[error("nonce mismatch")]
    Nonce,
}

/// An identity provider this host federates logins to.
pub trait UpstreamProvider: Send + Sync {
    /// The name under which upstream identities are linked, e.g. `google`.
    fn name(&self) -> &str;

    /// The url to send the user to, carrying the sealed state and the nonce.
    fn authorize_url(&self, state: &str, nonce: &str) -> Url;

    /// Verify an assertion and extract the identity it asserts.
    fn verify(&self, assertion: &str, nonce: &str, now: Time) -> Result<UpstreamIdentity, UpstreamError>;
}

/// A provider asserting identities as HS256 signed ID tokens, keyed with the client secret.
pub struct SharedSecretProvider {
    name: String,
    client_id: String,
    secret: hmac::Key,
    authorize_endpoint: Url,
    issuer: String,
    callback: Url,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

impl SharedSecretProvider {
    /// Configure a provider.
    pub fn new(
        name: &str, client_id: &str, client_secret: &[u8], authorize_endpoint: Url, issuer: &str, callback: Url,
    ) -> Self {
        SharedSecretProvider {
            name: name.to_string(),
            client_id: client_id.to_string(),
            secret: hmac::Key::new(hmac::HMAC_SHA256, client_secret),
            authorize_endpoint,
            issuer: issuer.to_string(),
            callback,
        }
    }

    fn payload(&self, assertion: &str) -> Result<Map<String, Value>, UpstreamError> {
        let mut parts = assertion.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None) => (header, payload, signature),
            _ => return Err(UpstreamError::Malformed),
        };

        let header = decode_config(header, URL_SAFE_NO_PAD).map_err(|_| UpstreamError::Malformed)?;
        let header: Header = serde_json::from_slice(&header).map_err(|_| UpstreamError::Malformed)?;
        if header.alg != "HS256" {
            return Err(UpstreamError::Malformed);
        }

        let signature = decode_config(signature, URL_SAFE_NO_PAD).map_err(|_| UpstreamError::Malformed)?;
        let signed = assertion.rfind('.').map_or("", |dot| &assertion[..dot]);
        hmac::verify(&self.secret, signed.as_bytes(), &signature)
            .map_err(|_| UpstreamError::Signature)?;

        let payload = decode_config(payload, URL_SAFE_NO_PAD).map_err(|_| UpstreamError::Malformed)?;
        serde_json::from_slice(&payload).map_err(|_| UpstreamError::Malformed)
    }
}

fn audience_contains(aud: Option<&Value>, client_id: &str) -> bool {
    match aud {
        Some(Value::String(aud)) => aud == client_id,
        Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(client_id)),
        _ => false,
    }
}

impl UpstreamProvider for SharedSecretProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorize_url(&self, state: &str, nonce: &str) -> Url {
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "id_token")
            .append_pair("response_mode", "form_post")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.callback.as_str())
            .append_pair("scope", "openid email profile")
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        url
    }

    fn verify(&self, assertion: &str, nonce: &str, now: Time) -> Result<UpstreamIdentity, UpstreamError> {
        let payload = self.payload(assertion)?;

        if payload.get("iss").and_then(Value::as_str) != Some(self.issuer.as_str()) {
            return Err(UpstreamError::Issuer);
        }

        if !audience_contains(payload.get("aud"), &self.client_id) {
            return Err(UpstreamError::Audience);
        }

        match payload.get("exp").and_then(Value::as_i64) {
            Some(exp) if now.timestamp() < exp => (),
            Some(_) => return Err(UpstreamError::Expired),
            None => return Err(UpstreamError::Malformed),
        }

        if payload.get("nonce").and_then(Value::as_str) != Some(nonce) {
            return Err(UpstreamError::Nonce);
        }

        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .filter(|sub| !sub.is_empty())
            .ok_or(UpstreamError::Malformed)?
            .to_string();

        let claims = payload
            .iter()
            .filter(|(claim, _)| !REGISTERED.contains(&claim.as_str()))
            .filter_map(|(claim, value)| value.as_str().map(|value| (claim.as_str(), value)))
            .collect();

        Ok(UpstreamIdentity { subject, claims })
    }
}

impl fmt::Debug for SharedSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedSecretProvider")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer)
            .field("authorize_endpoint", &self.authorize_endpoint.as_str())
            .finish()
    }
}
