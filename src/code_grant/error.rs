//! Errors defined in [rfc6749].
//!
//! [rfc6749]: https://tools.ietf.org/html/rfc6749#section-5.2
use std::borrow::Cow;
use std::fmt;
use std::vec;

use serde_json::{Map, Value};
use thiserror::Error;

/// Every way a token request can fail.
///
/// All of them are terminal for the request. The protocol rendering deliberately maps several
/// variants onto the same response so that a caller can not tell which check failed.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum IssuanceError {
    /// The client is unknown or failed to authenticate.
    #[error("client not found")]
    ClientNotFound,

    /// The client may not use the requested grant kind.
    #[error("grant kind not allowed for client")]
    GrantNotAllowed,

    /// No validator handles the requested grant kind.
    #[error("unsupported grant kind")]
    UnsupportedGrant,

    /// The presented credential was rejected by the grant validator.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A federated login callback was forged, expired or did not match the login state.
    #[error("upstream assertion invalid")]
    UpstreamAssertionInvalid,

    /// Tokens could not be signed.
    #[error("signing unavailable")]
    SigningUnavailable,

    /// The request was malformed, a parameter was missing or repeated.
    #[error("invalid request")]
    InvalidRequest,

    /// The scope parameter was not valid scope syntax.
    #[error("invalid scope")]
    InvalidScope,
}

/// All defined error codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessTokenErrorType {
    /// The request is missing a required parameter, includes an unsupported parameter value (other
    /// than grant type), repeats a parameter, includes multiple credentials, utilizes more than one
    /// mechanism for authenticating the client, or is otherwise malformed.
    InvalidRequest,

    /// The provided authorization grant (e.g., resource owner credentials) or refresh token is
    /// invalid, expired, revoked, or was issued to another client.
    InvalidGrant,

    /// The authenticated client is not authorized to use this authorization grant type.
    UnauthorizedClient,

    /// The authorization grant type is not supported by the authorization server.
    UnsupportedGrantType,

    /// The requested scope is invalid, unknown, malformed, or exceeds the scope granted by the
    /// resource owner.
    InvalidScope,

    /// The server encountered an unexpected condition that prevented it from fulfilling the
    /// request.
    ServerError,
}

/// Represents parameters of an error in an [Issuing Error Response][Issuing Error].
///
/// [Issuing Error]: https://tools.ietf.org/html/rfc6749#section-5.2
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessTokenError {
    error: AccessTokenErrorType,
    description: Option<Cow<'static, str>>,
}

impl IssuanceError {
    /// The protocol error code of this error.
    pub fn error_type(&self) -> AccessTokenErrorType {
        match self {
            IssuanceError::ClientNotFound => AccessTokenErrorType::InvalidGrant,
            IssuanceError::AuthenticationFailed => AccessTokenErrorType::InvalidGrant,
            IssuanceError::UpstreamAssertionInvalid => AccessTokenErrorType::InvalidGrant,
            IssuanceError::GrantNotAllowed => AccessTokenErrorType::UnauthorizedClient,
            IssuanceError::UnsupportedGrant => AccessTokenErrorType::UnsupportedGrantType,
            IssuanceError::InvalidScope => AccessTokenErrorType::InvalidScope,
            IssuanceError::InvalidRequest => AccessTokenErrorType::InvalidRequest,
            IssuanceError::SigningUnavailable => AccessTokenErrorType::ServerError,
        }
    }

    /// The error response sent to the client.
    pub fn description(&self) -> AccessTokenError {
        let mut error = AccessTokenError::new(self.error_type());
        match self {
            IssuanceError::UnsupportedGrant => error.explain("The grant type is not supported"),
            IssuanceError::InvalidScope => error.explain("The scope is not well formed"),
            _ => (),
        }
        error
    }

    /// Render the error response as json.
    pub fn to_json(&self) -> String {
        self.description().to_json()
    }
}

impl AccessTokenErrorType {
    fn description(self) -> &'static str {
        match self {
            AccessTokenErrorType::InvalidRequest => "invalid_request",
            AccessTokenErrorType::InvalidGrant => "invalid_grant",
            AccessTokenErrorType::UnauthorizedClient => "unauthorized_client",
            AccessTokenErrorType::UnsupportedGrantType => "unsupported_grant_type",
            AccessTokenErrorType::InvalidScope => "invalid_scope",
            AccessTokenErrorType::ServerError => "server_error",
        }
    }
}

impl AsRef<str> for AccessTokenErrorType {
    fn as_ref(&self) -> &str {
        self.description()
    }
}

impl fmt::Display for AccessTokenErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AccessTokenError {
    /// An error response without description.
    pub fn new(error: AccessTokenErrorType) -> Self {
        AccessTokenError {
            error,
            description: None,
        }
    }

    /// Add a human readable description.
    pub fn explain<D: Into<Cow<'static, str>>>(&mut self, description: D) {
        self.description = Some(description.into());
    }

    /// The error code.
    pub fn kind(&self) -> AccessTokenErrorType {
        self.error
    }

    /// Iterate over the key value pairs that describe this error.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Cow<'static, str>)> {
        self.clone().into_iter()
    }

    /// Convert the error into a json string, viable for being sent over a network with
    /// `application/json` encoding.
    pub fn to_json(&self) -> String {
        let asmap = self
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.into_owned())))
            .collect::<Map<String, Value>>();
        Value::Object(asmap).to_string()
    }
}

impl IntoIterator for AccessTokenError {
    type Item = (&'static str, Cow<'static, str>);
    type IntoIter = vec::IntoIter<(&'static str, Cow<'static, str>)>;

    fn into_iter(self) -> Self::IntoIter {
        let mut vec = vec![("error", Cow::Borrowed(self.error.description()))];
        if let Some(description) = self.description {
            vec.push(("error_description", description));
        }
        vec.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes() {
        assert_eq!(IssuanceError::ClientNotFound.error_type().as_ref(), "invalid_grant");
        assert_eq!(IssuanceError::GrantNotAllowed.error_type().as_ref(), "unauthorized_client");
        assert_eq!(IssuanceError::UnsupportedGrant.error_type().as_ref(), "unsupported_grant_type");
        assert_eq!(IssuanceError::AuthenticationFailed.error_type().as_ref(), "invalid_grant");
        assert_eq!(IssuanceError::UpstreamAssertionInvalid.error_type().as_ref(), "invalid_grant");
        assert_eq!(IssuanceError::SigningUnavailable.error_type().as_ref(), "server_error");
        assert_eq!(IssuanceError::InvalidScope.error_type().as_ref(), "invalid_scope");
        assert_eq!(IssuanceError::InvalidRequest.error_type().as_ref(), "invalid_request");
    }

    #[test]
    fn failed_authentication_is_indistinguishable() {
        let unknown_client = IssuanceError::ClientNotFound.to_json();
        let wrong_secret = IssuanceError::AuthenticationFailed.to_json();
        assert_eq!(unknown_client, wrong_secret);
        assert_eq!(wrong_secret, r#"{"error":"invalid_grant"}"#);
    }

    #[test]
    fn description_encoding() {
        let json = IssuanceError::UnsupportedGrant.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"], "unsupported_grant_type");
        assert!(value["error_description"].is_string());
    }
}
