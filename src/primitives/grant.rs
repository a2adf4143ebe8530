//! Describes a single authentication attempt and its successful outcome.
//!
//! A `GrantRequest` is created per inbound token request and discarded after issuance or failure.
//! A grant validator turns it into an `AuthenticatedSubject`, which the issuance engine consumes
//! immediately. Neither is ever persisted or shared between requests.
use super::scope::Scope;
use super::user::{Claims, User};

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::iter::FromIterator;

/// The key by which a grant validator is selected.
///
/// The standard kinds are provided as constructors, custom kinds may use any other name. Kinds are
/// compared verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantKind(String);

/// Additional parameters of a custom grant.
///
/// Each key maps to a single value. Parameters which were sent more than once never make it into
/// this map, see the `endpoint` module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    inner: HashMap<String, String>,
}

/// The credential presented with a grant request, specific to its kind.
#[derive(Clone)]
pub enum Credential {
    /// Resource owner password credentials.
    Password {
        /// The login name of the user.
        username: String,

        /// The presented secret.
        password: Vec<u8>,
    },

    /// A previously issued refresh token.
    Refresh {
        /// The token as issued.
        token: String,
    },

    /// A subject resolved by the federation bridge.
    ///
    /// Can only be constructed by the bridge itself after it verified an upstream login.
    External(LinkedSubject),

    /// The raw parameters of a custom grant.
    Extension(Parameters),
}

/// A local subject bound to an upstream identity by a completed federated login.
///
/// There is no public constructor, a front-end can not forge one. The subject is bound to the
/// client that initiated the login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedSubject {
    subject: String,
    provider: String,
    client_id: String,
}

/// One inbound authentication attempt.
#[derive(Clone)]
pub struct GrantRequest {
    /// The identifier of the requesting client.
    pub client_id: String,

    /// The secret of a confidential client.
    pub client_secret: Option<Vec<u8>>,

    /// The requested scope, `None` if the request did not specify any.
    pub scope: Option<Scope>,

    /// Selects the grant validator.
    pub kind: GrantKind,

    /// Kind specific credential payload.
    pub credential: Credential,
}

/// The result of a successful grant validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    /// The subject identifier.
    pub subject: String,

    /// Claims about the subject which may be released into an identity token.
    pub claims: Claims,

    /// Scopes the subject itself is entitled to.
    ///
    /// `None` for service subjects, whose tokens are only narrowed by the client's permissions.
    pub entitled: Option<Scope>,

    /// Whether the subject is a service rather than a user of the registry.
    pub service: bool,

    /// The upstream provider which authenticated the subject, for federated logins.
    pub provider: Option<String>,
}

impl GrantKind {
    /// Construct an arbitrary grant kind.
    pub fn new(kind: &str) -> Self {
        GrantKind(kind.to_string())
    }

    /// The resource owner password grant, `password`.
    pub fn password() -> Self {
        GrantKind::new("password")
    }

    /// The refresh grant, `refresh_token`.
    pub fn refresh() -> Self {
        GrantKind::new("refresh_token")
    }

    /// The kind of requests synthesized by the federation bridge, `external`.
    pub fn external() -> Self {
        GrantKind::new("external")
    }

    /// The verbatim name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for GrantKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Parameters {
    /// An empty parameter map.
    pub fn new() -> Self {
        Parameters::default()
    }

    /// Get the value associated with a key.
    pub fn unique_value(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Iterate over all key-value pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Parameters {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl LinkedSubject {
    pub(crate) fn new(subject: &str, provider: &str, client_id: &str) -> Self {
        LinkedSubject {
            subject: subject.to_string(),
            provider: provider.to_string(),
            client_id: client_id.to_string(),
        }
    }

    /// The local subject identifier.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The upstream provider that authenticated the subject.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The client that initiated the federated login.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl GrantRequest {
    /// A password grant request.
    pub fn password(client_id: &str, username: &str, password: &[u8]) -> Self {
        GrantRequest::new(
            client_id,
            GrantKind::password(),
            Credential::Password {
                username: username.to_string(),
                password: password.to_vec(),
            },
        )
    }

    /// A refresh grant request.
    pub fn refresh(client_id: &str, token: &str) -> Self {
        GrantRequest::new(
            client_id,
            GrantKind::refresh(),
            Credential::Refresh {
                token: token.to_string(),
            },
        )
    }

    /// A custom grant request with raw parameters.
    pub fn extension(client_id: &str, kind: GrantKind, parameters: Parameters) -> Self {
        GrantRequest::new(client_id, kind, Credential::Extension(parameters))
    }

    pub(crate) fn external(linked: LinkedSubject) -> Self {
        let client_id = linked.client_id.clone();
        GrantRequest::new(&client_id, GrantKind::external(), Credential::External(linked))
    }

    fn new(client_id: &str, kind: GrantKind, credential: Credential) -> Self {
        GrantRequest {
            client_id: client_id.to_string(),
            client_secret: None,
            scope: None,
            kind,
            credential,
        }
    }

    /// Request a specific scope instead of everything the client is permitted.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Authenticate the client with its secret.
    pub fn with_client_secret(mut self, secret: &[u8]) -> Self {
        self.client_secret = Some(secret.to_vec());
        self
    }
}

impl AuthenticatedSubject {
    /// A user authenticated by some grant, entitled to its registered scopes.
    pub fn user(user: &User) -> Self {
        AuthenticatedSubject {
            subject: user.subject.clone(),
            claims: user.claims.clone(),
            entitled: Some(user.scopes.clone()),
            service: false,
            provider: user.external.as_ref().map(|link| link.provider.clone()),
        }
    }

    /// A non-user subject, such as a service, without own entitlements.
    pub fn service(subject: &str) -> Self {
        AuthenticatedSubject {
            subject: subject.to_string(),
            claims: Claims::new(),
            entitled: None,
            service: true,
            provider: None,
        }
    }

    /// Restrict the entitlement further, for example to the scope of a previous grant.
    pub fn narrowed_to(mut self, ceiling: &Scope) -> Self {
        self.entitled = Some(match self.entitled {
            Some(entitled) => entitled.intersect(ceiling),
            None => ceiling.clone(),
        });
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Credential::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<hidden>")
                .finish(),
            Credential::Refresh { .. } => f.debug_struct("Refresh").finish(),
            Credential::External(linked) => f.debug_tuple("External").field(linked).finish(),
            Credential::Extension(params) => f
                .debug_tuple("Extension")
                .field(&params.inner.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

impl fmt::Debug for GrantRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GrantRequest")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<hidden>"))
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("credential", &self.credential)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_secrets() {
        let request = GrantRequest::password("webapp", "alice", b"correct")
            .with_client_secret(b"client-secret");
        let debug = format!("{:?}", request);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("correct"));
        assert!(!debug.contains("client-secret"));
    }

    #[test]
    fn narrowing_entitlements() {
        let user = User::new("alice").with_scopes("openid profile email".parse().unwrap());
        let subject = AuthenticatedSubject::user(&user).narrowed_to(&"openid email".parse().unwrap());
        assert_eq!(subject.entitled, Some("email openid".parse().unwrap()));

        let service = AuthenticatedSubject::service("svc").narrowed_to(&"api".parse().unwrap());
        assert_eq!(service.entitled, Some("api".parse().unwrap()));
    }

    #[test]
    fn standard_kinds() {
        assert_eq!(GrantKind::password().as_str(), "password");
        assert_eq!(GrantKind::refresh().as_str(), "refresh_token");
        assert_eq!(GrantKind::external().to_string(), "external");
        assert_eq!(GrantKind::new("custom"), GrantKind::new("custom"));
    }
}
