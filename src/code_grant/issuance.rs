//! The token issuance engine.
//!
//! Every request runs through the same strictly sequential steps:
//!
//! 1. resolve the client and check it may use the grant kind,
//! 2. authenticate the client,
//! 3. let the validator of the kind authenticate the subject,
//! 4. narrow the requested scope by the client's and the subject's permissions,
//! 5. sign the resulting tokens.
//!
//! The engine keeps no state between requests. It may be shared by any number of threads.
use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::primitives::Time;
use crate::primitives::grant::{AuthenticatedSubject, Credential, GrantKind, GrantRequest};
use crate::primitives::registrar::EncodedClient;
use crate::primitives::registry::Registry;
use crate::primitives::scope::Scope;
use crate::primitives::signer::{Token, TokenClaims, TokenSigner, TokenUse};
use crate::primitives::user::Claims;

use super::error::IssuanceError;
use super::refresh::{SERVICE, SUBJECT_TYPE};
use super::validator::{Context, Dispatch, ValidatorChain};

/// The scope token which requests an identity token.
const OPENID: &str = "openid";

/// How long issued tokens remain valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifetimes {
    /// Lifetime of access tokens.
    pub access: Duration,

    /// Lifetime of identity tokens.
    pub identity: Duration,

    /// Lifetime of refresh tokens.
    pub refresh: Duration,
}

/// Orchestrates registry, validator chain and signer.
pub struct TokenEngine {
    registry: Arc<dyn Registry>,
    signer: Arc<TokenSigner>,
    validators: ValidatorChain,
    lifetimes: Lifetimes,
}

/// The tokens produced by one successful request.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
    /// The bearer token for resource access.
    pub access: Token,

    /// The identity token, present iff `openid` was granted.
    pub identity: Option<Token>,

    /// The refresh token, present iff the client may use the refresh grant.
    pub refresh: Option<Token>,

    /// The scope after narrowing.
    pub scope: Scope,
}

/// Token Response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The access token issued by the authorization server.
    pub access_token: String,

    /// The identity token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// The type of the token issued.
    pub token_type: String,

    /// The lifetime in seconds of the access token.
    pub expires_in: i64,

    /// The refresh token, which can be used to obtain new access tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// The scope, which limits the permissions on the access token.
    pub scope: String,
}

impl Default for Lifetimes {
    fn default() -> Self {
        Lifetimes {
            access: Duration::seconds(3600),
            identity: Duration::seconds(300),
            refresh: Duration::seconds(2_592_000),
        }
    }
}

impl TokenEngine {
    /// Compose an engine with default token lifetimes.
    pub fn new(registry: Arc<dyn Registry>, signer: Arc<TokenSigner>, validators: ValidatorChain) -> Self {
        TokenEngine {
            registry,
            signer,
            validators,
            lifetimes: Lifetimes::default(),
        }
    }

    /// Replace the token lifetimes.
    pub fn with_lifetimes(mut self, lifetimes: Lifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    /// The registry the engine resolves against.
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// The signer of all tokens.
    pub fn signer(&self) -> &Arc<TokenSigner> {
        &self.signer
    }

    /// Issue tokens for the request.
    pub fn issue(&self, request: GrantRequest) -> Result<IssuedTokens, IssuanceError> {
        self.issue_at(request, Utc::now())
    }

    /// Issue tokens for the request as if it arrived at `now`.
    pub fn issue_at(&self, request: GrantRequest, now: Time) -> Result<IssuedTokens, IssuanceError> {
        match self.try_issue(&request, now) {
            Ok(issued) => {
                info!(
                    "Issued tokens to client {} for subject {} via {} with scope '{}'",
                    request.client_id, issued.access.claims.sub, request.kind, issued.scope
                );
                Ok(issued)
            }
            Err(err) => {
                warn!(
                    "Token request of client {} via {} failed: {}",
                    request.client_id, request.kind, err
                );
                Err(err)
            }
        }
    }

    fn try_issue(&self, request: &GrantRequest, now: Time) -> Result<IssuedTokens, IssuanceError> {
        let client = self
            .registry
            .find_client(&request.client_id)
            .ok_or(IssuanceError::ClientNotFound)?;

        if !client.permits(&request.kind) {
            return Err(IssuanceError::GrantNotAllowed);
        }

        if !Self::bound_by_bridge(request) {
            self.registry
                .check_client(&request.client_id, request.client_secret.as_ref().map(Vec::as_slice))
                .map_err(|_| IssuanceError::ClientNotFound)?;
        }

        let context = Context {
            registry: &*self.registry,
            signer: &self.signer,
            client,
            now,
        };

        let subject = self
            .validators
            .dispatch(request, &context)
            .map_err(|dispatch| match dispatch {
                Dispatch::Unsupported => IssuanceError::UnsupportedGrant,
                Dispatch::Rejected(reason) => {
                    debug!("Grant {} rejected: {}", request.kind, reason);
                    IssuanceError::AuthenticationFailed
                }
            })?;

        let scope = narrow(request.scope.as_ref(), client, &subject);
        self.sign_all(client, &subject, scope, now)
    }

    /// Bridge requests carry a client bound into the sealed login state at initiation.
    fn bound_by_bridge(request: &GrantRequest) -> bool {
        match &request.credential {
            Credential::External(linked) => {
                request.kind == GrantKind::external() && linked.client_id() == request.client_id
            }
            _ => false,
        }
    }

    fn sign_all(
        &self, client: &EncodedClient, subject: &AuthenticatedSubject, scope: Scope, now: Time,
    ) -> Result<IssuedTokens, IssuanceError> {
        let sign = |claims| self.signer.sign(claims).map_err(|_| IssuanceError::SigningUnavailable);

        let mut access_claims = Claims::new();
        if let Some(provider) = &subject.provider {
            access_claims.insert("idp", provider.as_str());
        }
        let access = sign(
            TokenClaims::new(
                TokenUse::Access,
                &subject.subject,
                &client.client_id,
                scope.clone(),
                now,
                now + self.lifetimes.access,
            )
            .with_claims(access_claims),
        )?;

        let identity = if scope.contains(OPENID) {
            let released = self
                .registry
                .find_scopes(&scope)
                .into_iter()
                .filter(|definition| definition.is_identity())
                .flat_map(|definition| definition.claims.iter().map(String::as_str))
                .collect::<Vec<_>>();
            let claims = subject.claims.released(released);
            Some(sign(
                TokenClaims::new(
                    TokenUse::Id,
                    &subject.subject,
                    &client.client_id,
                    scope.clone(),
                    now,
                    now + self.lifetimes.identity,
                )
                .with_claims(claims),
            )?)
        } else {
            None
        };

        let refresh = if client.permits(&GrantKind::refresh()) {
            let mut claims = Claims::new();
            if subject.service {
                claims.insert(SUBJECT_TYPE, SERVICE);
            }
            Some(sign(
                TokenClaims::new(
                    TokenUse::Refresh,
                    &subject.subject,
                    &client.client_id,
                    scope.clone(),
                    now,
                    now + self.lifetimes.refresh,
                )
                .with_claims(claims),
            )?)
        } else {
            None
        };

        Ok(IssuedTokens {
            access,
            identity,
            refresh,
            scope,
        })
    }
}

/// Intersect the requested scope with everything the client and the subject may have.
///
/// An omitted request asks for the whole scope of the client. An empty result is not an error.
fn narrow(requested: Option<&Scope>, client: &EncodedClient, subject: &AuthenticatedSubject) -> Scope {
    let requested = requested.unwrap_or(&client.allowed_scope);
    let granted = requested.intersect(&client.allowed_scope);
    match &subject.entitled {
        Some(entitled) => granted.intersect(entitled),
        None => granted,
    }
}

impl fmt::Debug for TokenEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenEngine")
            .field("issuer", &self.signer.issuer())
            .field("validators", &self.validators)
            .field("lifetimes", &self.lifetimes)
            .finish()
    }
}

impl IssuedTokens {
    /// The token endpoint response, with the remaining lifetime counted from `now`.
    pub fn response(&self, now: Time) -> TokenResponse {
        TokenResponse {
            access_token: self.access.value.clone(),
            id_token: self.identity.as_ref().map(|token| token.value.clone()),
            token_type: "Bearer".to_owned(),
            expires_in: self.access.claims.exp - now.timestamp(),
            refresh_token: self.refresh.as_ref().map(|token| token.value.clone()),
            scope: self.scope.to_string(),
        }
    }
}

impl TokenResponse {
    /// Convert the token into a json string, viable for being sent over a network with
    /// `application/json` encoding.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"server_error"}"#.to_owned())
    }
}
