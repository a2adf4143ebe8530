//! Adapts form encoded token requests to the engine.
//!
//! An http front-end hands the parsed body and the credentials of an `Authorization: Basic`
//! header to [`token_request`] and renders whatever [`TokenEndpoint::handle`] returns. Both are
//! independent of any particular web framework.
//!
//! [`token_request`]: fn.token_request.html
//! [`TokenEndpoint::handle`]: struct.TokenEndpoint.html#method.handle
mod query;

pub use self::query::{NormalizedParameter, QueryParameter};

use std::sync::Arc;
use std::str::from_utf8;

use base64::decode;
use chrono::Utc;

use crate::code_grant::error::IssuanceError;
use crate::code_grant::issuance::TokenEngine;
use crate::primitives::Time;
use crate::primitives::grant::{GrantKind, GrantRequest};
use crate::primitives::scope::Scope;

/// Parameters with a fixed meaning for every grant kind.
const COMMON: &[&str] = &["grant_type", "client_id", "client_secret", "scope"];

/// Client credentials from an `Authorization: Basic` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuthorization {
    /// The client id.
    pub client_id: String,

    /// The client secret.
    pub secret: Vec<u8>,
}

/// A rendered response of the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenEndpointResponse {
    /// The http status code.
    pub status: u16,

    /// The json body.
    pub body: String,
}

/// Serves the token endpoint with an engine.
#[derive(Clone)]
pub struct TokenEndpoint {
    engine: Arc<TokenEngine>,
}

impl BasicAuthorization {
    /// Parse the value of an `Authorization` header.
    ///
    /// Returns `None` for other schemes and malformed credentials.
    pub fn parse(header: &str) -> Option<Self> {
        let mut split = header.splitn(2, ' ');
        let scheme = split.next()?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = decode(split.next()?.trim()).ok()?;
        let colon = decoded.iter().position(|&b| b == b':')?;
        let client_id = from_utf8(&decoded[..colon]).ok()?.to_string();
        Some(BasicAuthorization {
            client_id,
            secret: decoded[colon + 1..].to_vec(),
        })
    }
}

impl std::fmt::Debug for BasicAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BasicAuthorization")
            .field("client_id", &self.client_id)
            .field("secret", &"<hidden>")
            .finish()
    }
}

/// Turn the parameters of a token request into a grant request.
///
/// Repeated parameters count as absent. The `external` kind is reserved for the federation
/// bridge and never accepted from a request. Authenticating the client both by header and by
/// body parameters is an invalid request.
pub fn token_request(
    params: &dyn QueryParameter, authorization: Option<&BasicAuthorization>,
) -> Result<GrantRequest, IssuanceError> {
    let grant_type = params
        .unique_value("grant_type")
        .ok_or(IssuanceError::InvalidRequest)?;
    let kind = GrantKind::new(&grant_type);
    if kind == GrantKind::external() {
        return Err(IssuanceError::UnsupportedGrant);
    }

    let body_id = params.unique_value("client_id");
    let body_secret = params.unique_value("client_secret");
    let (client_id, client_secret) = match authorization {
        Some(_) if body_secret.is_some() => return Err(IssuanceError::InvalidRequest),
        Some(auth) => match body_id {
            Some(ref id) if *id != auth.client_id => return Err(IssuanceError::InvalidRequest),
            _ => (auth.client_id.clone(), Some(auth.secret.clone())),
        },
        None => {
            let id = body_id.ok_or(IssuanceError::InvalidRequest)?;
            (id.into_owned(), body_secret.map(|secret| secret.as_bytes().to_vec()))
        }
    };

    let scope = match params.unique_value("scope") {
        Some(scope) => Some(scope.parse::<Scope>().map_err(|_| IssuanceError::InvalidScope)?),
        None => None,
    };

    let request = if kind == GrantKind::password() {
        let username = params.unique_value("username").ok_or(IssuanceError::InvalidRequest)?;
        let password = params.unique_value("password").ok_or(IssuanceError::InvalidRequest)?;
        GrantRequest::password(&client_id, &username, password.as_bytes())
    } else if kind == GrantKind::refresh() {
        let token = params.unique_value("refresh_token").ok_or(IssuanceError::InvalidRequest)?;
        GrantRequest::refresh(&client_id, &token)
    } else {
        let extension = params.normalize().extension_parameters(COMMON);
        GrantRequest::extension(&client_id, kind, extension)
    };

    let request = match client_secret {
        Some(secret) => request.with_client_secret(&secret),
        None => request,
    };

    Ok(match scope {
        Some(scope) => request.with_scope(scope),
        None => request,
    })
}

impl TokenEndpoint {
    /// Serve token requests with the engine.
    pub fn new(engine: Arc<TokenEngine>) -> Self {
        TokenEndpoint { engine }
    }

    /// Handle a complete token request.
    pub fn handle(
        &self, params: &dyn QueryParameter, authorization: Option<&BasicAuthorization>,
    ) -> TokenEndpointResponse {
        self.handle_at(params, authorization, Utc::now())
    }

    /// Handle a complete token request as if it arrived at `now`.
    pub fn handle_at(
        &self, params: &dyn QueryParameter, authorization: Option<&BasicAuthorization>, now: Time,
    ) -> TokenEndpointResponse {
        let issued = token_request(params, authorization).and_then(|request| self.engine.issue_at(request, now));
        match issued {
            Ok(issued) => TokenEndpointResponse {
                status: 200,
                body: issued.response(now).to_json(),
            },
            Err(err) => TokenEndpointResponse {
                status: match err {
                    IssuanceError::SigningUnavailable => 500,
                    _ => 400,
                },
                body: err.to_json(),
            },
        }
    }
}
