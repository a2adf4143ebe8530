//! Grant validators and their dispatch by grant kind.
//!
//! A validator checks the credential of exactly one grant kind. The chain maps each kind to its
//! validator and runs exactly the one matching a request, there is no fallthrough to other kinds.
//! Additional kinds are registered while composing the host, the dispatch itself never changes.
use std::collections::HashMap;
use std::fmt;

use crate::primitives::Time;
use crate::primitives::grant::{AuthenticatedSubject, GrantKind, GrantRequest};
use crate::primitives::registrar::EncodedClient;
use crate::primitives::registry::Registry;
use crate::primitives::signer::{TokenError, TokenSigner};

use thiserror::Error;

use super::custom::CustomGrant;
use super::external::ExternalGrant;
use super::password::PasswordGrant;
use super::refresh::RefreshGrant;

/// Everything a validator may consult besides the request itself.
pub struct Context<'a> {
    /// The catalog of clients, scopes and users.
    pub registry: &'a dyn Registry,

    /// Verifies tokens issued earlier, such as refresh tokens.
    pub signer: &'a TokenSigner,

    /// The client on whose behalf the request is made, already resolved and authenticated.
    pub client: &'a EncodedClient,

    /// The instant of the request.
    pub now: Time,
}

/// Why a validator refused a request.
///
/// The reason is only logged, a caller always sees the same authentication failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Reject {
    /// Unknown user or wrong secret, not distinguished.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The credential does not have the shape this grant kind requires.
    #[error("malformed credential")]
    Malformed,

    /// The presented token was not accepted.
    #[error("token rejected: {0}")]
    InvalidToken(TokenError),

    /// The credential was issued to a different client.
    #[error("credential belongs to another client")]
    ForeignClient,

    /// The subject of the credential no longer resolves.
    #[error("subject does not exist")]
    UnknownSubject,

    /// A custom grant refused for its own reason.
    #[error("custom grant refused: {0}")]
    Refused(String),
}

/// The capability of checking one kind of grant.
pub trait GrantValidator: Send + Sync {
    /// The grant kind this validator is selected for.
    fn kind(&self) -> GrantKind;

    /// Check the credential of the request and determine the subject it authenticates.
    fn attempt(&self, request: &GrantRequest, context: &Context) -> Result<AuthenticatedSubject, Reject>;
}

/// The outcome of dispatching a request that did not produce a subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// No validator is registered for the kind.
    Unsupported,

    /// The validator of the kind refused.
    Rejected(Reject),
}

/// Maps grant kinds to their validators.
#[derive(Default)]
pub struct ValidatorChain {
    validators: HashMap<GrantKind, Box<dyn GrantValidator>>,
}

impl ValidatorChain {
    /// A chain without any validator, rejecting every request as unsupported.
    pub fn new() -> Self {
        ValidatorChain::default()
    }

    /// A chain with the password, refresh and external validators.
    pub fn standard() -> Self {
        ValidatorChain::new()
            .with(PasswordGrant)
            .with(RefreshGrant)
            .with(ExternalGrant)
    }

    /// Register a validator for its kind, returning the one it replaces.
    pub fn register<V: GrantValidator + 'static>(&mut self, validator: V) -> Option<Box<dyn GrantValidator>> {
        self.validators.insert(validator.kind(), Box::new(validator))
    }

    /// Builder style variant of `register`.
    pub fn with<V: GrantValidator + 'static>(mut self, validator: V) -> Self {
        self.register(validator);
        self
    }

    /// Register a custom grant kind decided by a predicate.
    pub fn custom<F>(&mut self, kind: GrantKind, predicate: F)
    where
        F: Fn(&GrantRequest, &dyn Registry) -> Result<AuthenticatedSubject, Reject> + Send + Sync + 'static,
    {
        self.register(CustomGrant::new(kind, predicate));
    }

    /// Whether a validator for the kind is registered.
    pub fn supports(&self, kind: &GrantKind) -> bool {
        self.validators.contains_key(kind)
    }

    /// Run the validator selected by the kind of the request.
    pub fn dispatch(&self, request: &GrantRequest, context: &Context) -> Result<AuthenticatedSubject, Dispatch> {
        let validator = self
            .validators
            .get(&request.kind)
            .ok_or(Dispatch::Unsupported)?;
        validator.attempt(request, context).map_err(Dispatch::Rejected)
    }
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut kinds: Vec<_> = self.validators.keys().map(GrantKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ValidatorChain").field("kinds", &kinds).finish()
    }
}
