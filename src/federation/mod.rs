//! Bridges logins at an upstream identity provider into local sessions.
//!
//! A federated login moves through a fixed sequence of phases:
//!
//! ```text
//! Initiated -> AwaitingUpstream -> UpstreamReturned -> Linked
//!                                        \---------------> Rejected
//! ```
//!
//! Each phase after `Initiated` is a distinct type that is only obtainable from the previous one,
//! so skipping a verification step does not compile. `Rejected` is an error carrying
//! `IssuanceError::UpstreamAssertionInvalid`. No attempt is retried, a rejected login starts over.
//!
//! While the user is away at the upstream provider, no server side state is kept. The login
//! context is sealed into the `state` parameter, see [`state`].
//!
//! [`state`]: state/index.html
pub mod state;
pub mod upstream;

use std::fmt;
use std::sync::Arc;

use base64::{encode_config, URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, warn};
use url::Url;

use crate::code_grant::error::IssuanceError;
use crate::code_grant::issuance::{IssuedTokens, TokenEngine};
use crate::primitives::Time;
use crate::primitives::grant::{GrantKind, GrantRequest, LinkedSubject};
use crate::primitives::scope::Scope;
use crate::primitives::user::User;

use self::state::{LoginContext, StateSealer};
use self::upstream::{UpstreamIdentity, UpstreamProvider};

/// The phases of a federated login.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The front-end asked to start a login.
    Initiated,

    /// The user was sent to the upstream provider.
    AwaitingUpstream,

    /// The upstream provider returned a verified assertion.
    UpstreamReturned,

    /// The upstream identity is resolved to a local user.
    Linked,

    /// The callback was forged, expired or did not match the login.
    Rejected,
}

/// Converts upstream logins into grant requests of the `external` kind.
pub struct Bridge {
    engine: Arc<TokenEngine>,
    provider: Box<dyn UpstreamProvider>,
    sealer: StateSealer,
    login_lifetime: Duration,
    random: SystemRandom,
}

/// The user should be redirected to the upstream provider.
#[derive(Clone, Debug)]
pub struct AwaitingUpstream {
    /// The sealed state. The front-end must also bind it to the user agent, e.g. in a cookie.
    pub state: String,

    /// Where to send the user.
    pub redirect_url: Url,
}

/// The parameters the upstream provider sent to the callback.
#[derive(Clone, Debug)]
pub struct UpstreamCallback {
    /// The state parameter as echoed by the upstream provider.
    pub state: String,

    /// The signed assertion, an ID token.
    pub assertion: String,
}

/// A verified upstream login, not yet resolved to a local user.
#[derive(Clone, Debug)]
pub struct UpstreamReturned {
    context: LoginContext,
    identity: UpstreamIdentity,
}

/// A completed federated login.
#[derive(Clone, Debug)]
pub struct Linked {
    user: User,
    provider: String,
    context: LoginContext,
}

impl Bridge {
    /// Bridge logins at the provider into the engine.
    pub fn new(engine: Arc<TokenEngine>, provider: Box<dyn UpstreamProvider>, sealer: StateSealer) -> Self {
        Bridge {
            engine,
            provider,
            sealer,
            login_lifetime: Duration::seconds(600),
            random: SystemRandom::new(),
        }
    }

    /// Replace the time a user has to complete the upstream login.
    pub fn with_login_lifetime(mut self, lifetime: Duration) -> Self {
        self.login_lifetime = lifetime;
        self
    }

    /// The name of the upstream provider.
    pub fn provider(&self) -> &str {
        self.provider.name()
    }

    /// Start a login for the client.
    pub fn initiate(
        &self, client_id: &str, redirect_uri: Option<&Url>, scope: Option<Scope>,
    ) -> Result<AwaitingUpstream, IssuanceError> {
        self.initiate_at(client_id, redirect_uri, scope, Utc::now())
    }

    /// Start a login for the client as if it happened at `now`.
    pub fn initiate_at(
        &self, client_id: &str, redirect_uri: Option<&Url>, scope: Option<Scope>, now: Time,
    ) -> Result<AwaitingUpstream, IssuanceError> {
        let client = self
            .engine
            .registry()
            .find_client(client_id)
            .ok_or(IssuanceError::ClientNotFound)?;

        if !client.permits(&GrantKind::external()) {
            return Err(IssuanceError::GrantNotAllowed);
        }

        let redirect_uri = client
            .bound_redirect(redirect_uri)
            .ok_or(IssuanceError::InvalidRequest)?
            .clone();

        let context = LoginContext {
            client_id: client_id.to_string(),
            redirect_uri,
            scope,
            nonce: self.nonce()?,
            until: (now + self.login_lifetime).timestamp(),
        };

        let state = self
            .sealer
            .seal(&context)
            .map_err(|_| IssuanceError::SigningUnavailable)?;
        let redirect_url = self.provider.authorize_url(&state, &context.nonce);

        debug!("Federated login of client {} awaiting {}", client_id, self.provider.name());
        Ok(AwaitingUpstream { state, redirect_url })
    }

    /// Verify the callback of the upstream provider.
    ///
    /// `bound_state` is the state the front-end bound to the user agent when redirecting it. It
    /// must equal the state echoed by the provider, which must in turn be authentic and unexpired.
    pub fn receive(&self, bound_state: &str, callback: UpstreamCallback) -> Result<UpstreamReturned, IssuanceError> {
        self.receive_at(bound_state, callback, Utc::now())
    }

    /// Verify the callback as if it arrived at `now`.
    pub fn receive_at(
        &self, bound_state: &str, callback: UpstreamCallback, now: Time,
    ) -> Result<UpstreamReturned, IssuanceError> {
        if bound_state != callback.state {
            return Err(self.reject("state does not belong to this user agent"));
        }

        let context = self
            .sealer
            .open(&callback.state, now)
            .map_err(|err| self.reject(&err.to_string()))?;

        let identity = self
            .provider
            .verify(&callback.assertion, &context.nonce, now)
            .map_err(|err| self.reject(&err.to_string()))?;

        debug!("Upstream {} returned for client {}", self.provider.name(), context.client_id);
        Ok(UpstreamReturned { context, identity })
    }

    /// Resolve the upstream identity to a local user, creating it on the first login.
    pub fn link(&self, returned: UpstreamReturned) -> Result<Linked, IssuanceError> {
        let provider = self.provider.name();
        let registry = self.engine.registry();
        let UpstreamReturned { context, identity } = returned;

        let user = match registry.find_user_by_external_link(provider, &identity.subject) {
            Some(user) => user,
            None => registry
                .create_linked_user(provider, &identity.subject, identity.claims)
                .map_err(|err| {
                    warn!("Could not link identity of {}: {}", provider, err);
                    IssuanceError::AuthenticationFailed
                })?,
        };

        debug!("Upstream identity of {} linked for client {}", provider, context.client_id);
        Ok(Linked {
            user,
            provider: provider.to_string(),
            context,
        })
    }

    /// Issue tokens for a linked login through the engine.
    pub fn complete(&self, linked: &Linked) -> Result<IssuedTokens, IssuanceError> {
        self.engine.issue(linked.grant_request())
    }

    /// Run all steps after the upstream provider returned.
    pub fn callback(
        &self, bound_state: &str, callback: UpstreamCallback,
    ) -> Result<(Linked, IssuedTokens), IssuanceError> {
        let returned = self.receive(bound_state, callback)?;
        let linked = self.link(returned)?;
        let issued = self.complete(&linked)?;
        Ok((linked, issued))
    }

    fn nonce(&self) -> Result<String, IssuanceError> {
        let mut bytes = [0u8; 16];
        self.random
            .fill(&mut bytes)
            .map_err(|_| IssuanceError::SigningUnavailable)?;
        Ok(encode_config(&bytes, URL_SAFE_NO_PAD))
    }

    fn reject(&self, reason: &str) -> IssuanceError {
        debug!("Federated login via {} rejected: {}", self.provider.name(), reason);
        IssuanceError::UpstreamAssertionInvalid
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("provider", &self.provider.name())
            .field("login_lifetime", &self.login_lifetime)
            .finish()
    }
}

impl AwaitingUpstream {
    /// The phase of the login.
    pub fn phase(&self) -> Phase {
        Phase::AwaitingUpstream
    }
}

impl UpstreamReturned {
    /// The phase of the login.
    pub fn phase(&self) -> Phase {
        Phase::UpstreamReturned
    }

    /// The subject identifier at the upstream provider.
    pub fn external_subject(&self) -> &str {
        &self.identity.subject
    }

    /// The client that initiated the login.
    pub fn client_id(&self) -> &str {
        &self.context.client_id
    }
}

impl Linked {
    /// The phase of the login.
    pub fn phase(&self) -> Phase {
        Phase::Linked
    }

    /// The local user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// The client that initiated the login.
    pub fn client_id(&self) -> &str {
        &self.context.client_id
    }

    /// Where to return the user to, as bound at initiation.
    pub fn redirect_uri(&self) -> &Url {
        &self.context.redirect_uri
    }

    /// The grant request of the `external` kind for the linked subject.
    pub fn grant_request(&self) -> GrantRequest {
        let linked = LinkedSubject::new(&self.user.subject, &self.provider, &self.context.client_id);
        let request = GrantRequest::external(linked);
        match &self.context.scope {
            Some(scope) => request.with_scope(scope.clone()),
            None => request,
        }
    }
}

impl From<&IssuanceError> for Phase {
    fn from(err: &IssuanceError) -> Phase {
        match err {
            IssuanceError::UpstreamAssertionInvalid => Phase::Rejected,
            _ => Phase::Initiated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::upstream::tests::{assertion, id_token, provider, SECRET};
    use crate::code_grant::validator::ValidatorChain;
    use crate::primitives::registrar::Client;
    use crate::primitives::registrar::tests::PlainPolicy;
    use crate::primitives::registry::MemoryRegistry;
    use crate::primitives::scope::ScopeDefinition;
    use crate::primitives::signer::{SigningKey, TokenSigner};

    fn bridge() -> Bridge {
        let mut registry = MemoryRegistry::with_policy(PlainPolicy);
        registry.register_scope(ScopeDefinition::identity("openid", "User identifier", &["sub"]));
        registry.register_scope(ScopeDefinition::identity("email", "Email", &["email"]));
        registry
            .register_client(
                Client::public("webapp", "openid email".parse().unwrap())
                    .with_grant(GrantKind::external())
                    .with_redirect_uris(vec!["https://webapp.example/cb".parse().unwrap()]),
            )
            .unwrap();
        registry
            .register_client(Client::public("native", "openid".parse().unwrap()))
            .unwrap();
        let signer = TokenSigner::new(SigningKey::ephemeral().unwrap(), "https://idsvr.example".parse().unwrap());
        let engine = TokenEngine::new(Arc::new(registry), Arc::new(signer), ValidatorChain::standard());
        Bridge::new(Arc::new(engine), Box::new(provider()), StateSealer::ephemeral().unwrap())
    }

    fn nonce_of(awaiting: &AwaitingUpstream) -> String {
        awaiting
            .redirect_url
            .query_pairs()
            .find(|(key, _)| key == "nonce")
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    #[test]
    fn full_login() {
        let bridge = bridge();
        let now = Utc::now();
        let awaiting = bridge.initiate_at("webapp", None, None, now).unwrap();
        assert_eq!(awaiting.phase(), Phase::AwaitingUpstream);

        let exp = (now + Duration::minutes(5)).timestamp();
        let callback = UpstreamCallback {
            state: awaiting.state.clone(),
            assertion: assertion(SECRET, &id_token("g-123", &nonce_of(&awaiting), exp)),
        };
        let returned = bridge.receive_at(&awaiting.state, callback, now).unwrap();
        assert_eq!(returned.external_subject(), "g-123");

        let linked = bridge.link(returned).unwrap();
        assert_eq!(linked.phase(), Phase::Linked);
        assert_eq!(linked.redirect_uri().as_str(), "https://webapp.example/cb");
        assert_eq!(linked.user().claims.get("idp"), Some("google"));

        let issued = bridge.complete(&linked).unwrap();
        assert_eq!(issued.access.claims.sub, linked.user().subject);
        assert_eq!(issued.scope, "email openid".parse().unwrap());
        let identity = issued.identity.unwrap();
        assert_eq!(identity.claims.claims.get("email"), Some("alice@gmail.example"));
    }

    #[test]
    fn initiation_checks_client() {
        let bridge = bridge();
        assert_eq!(bridge.initiate("nobody", None, None).unwrap_err(), IssuanceError::ClientNotFound);
        assert_eq!(bridge.initiate("native", None, None).unwrap_err(), IssuanceError::GrantNotAllowed);
        let foreign: Url = "https://evil.example/cb".parse().unwrap();
        assert_eq!(
            bridge.initiate("webapp", Some(&foreign), None).unwrap_err(),
            IssuanceError::InvalidRequest
        );
    }

    #[test]
    fn mismatched_state_is_rejected() {
        let bridge = bridge();
        let now = Utc::now();
        let first = bridge.initiate_at("webapp", None, None, now).unwrap();
        let second = bridge.initiate_at("webapp", None, None, now).unwrap();

        let exp = (now + Duration::minutes(5)).timestamp();
        let callback = UpstreamCallback {
            state: first.state.clone(),
            assertion: assertion(SECRET, &id_token("g-123", &nonce_of(&first), exp)),
        };
        // The user agent carries the state of another login.
        let err = bridge.receive_at(&second.state, callback.clone(), now).unwrap_err();
        assert_eq!(err, IssuanceError::UpstreamAssertionInvalid);
        assert_eq!(Phase::from(&err), Phase::Rejected);

        // Too late.
        let late = now + Duration::seconds(600);
        assert_eq!(
            bridge.receive_at(&first.state, callback, late).unwrap_err(),
            IssuanceError::UpstreamAssertionInvalid
        );
    }

    #[test]
    fn assertion_must_repeat_nonce() {
        let bridge = bridge();
        let now = Utc::now();
        let awaiting = bridge.initiate_at("webapp", None, None, now).unwrap();
        let exp = (now + Duration::minutes(5)).timestamp();
        let callback = UpstreamCallback {
            state: awaiting.state.clone(),
            assertion: assertion(SECRET, &id_token("g-123", "replayed nonce", exp)),
        };
        assert_eq!(
            bridge.receive_at(&awaiting.state, callback, now).unwrap_err(),
            IssuanceError::UpstreamAssertionInvalid
        );
    }
}
