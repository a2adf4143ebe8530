//! Local subjects and the claims asserted about them.
use super::scope::Scope;

use std::collections::BTreeMap;
use std::fmt;

/// Key/value assertions about a subject, such as `name` or `email`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims {
    inner: BTreeMap<String, String>,
}

/// Association of a local user with the subject identifier of an upstream provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalLink {
    /// The name of the upstream provider, e.g. `google`.
    pub provider: String,

    /// The subject identifier as asserted by the upstream provider.
    pub subject: String,
}

/// A local subject record.
///
/// The subject identifier is the anchor for every token issued for this user, regardless of the
/// grant that authenticated the session. It never changes during the lifetime of the user.
#[derive(Clone)]
pub struct User {
    /// Unique and stable subject identifier.
    pub subject: String,

    /// Login name for the password grant, if the user has a local password at all.
    pub username: Option<String>,

    /// Claims released into identity tokens, filtered by the granted identity scopes.
    pub claims: Claims,

    /// Scopes this user is entitled to, before intersection with the client's permissions.
    pub scopes: Scope,

    /// The upstream identity this user is linked to, if any.
    pub external: Option<ExternalLink>,

    /// Password data as encoded by the registry's password policy.
    pub(crate) passdata: Option<Vec<u8>>,
}

impl Claims {
    /// An empty claim set.
    pub fn new() -> Self {
        Claims::default()
    }

    /// Set a claim, replacing any previous value of the same type.
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, claim: K, value: V) {
        self.inner.insert(claim.into(), value.into());
    }

    /// Builder style variant of `insert`.
    pub fn with<K: Into<String>, V: Into<String>>(mut self, claim: K, value: V) -> Self {
        self.insert(claim, value);
        self
    }

    /// Get the value of a claim.
    pub fn get(&self, claim: &str) -> Option<&str> {
        self.inner.get(claim).map(String::as_str)
    }

    /// Iterate over all claims, ordered by claim type.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Only the claims whose type is listed.
    pub fn released<'a, I>(&self, claim_types: I) -> Claims
    where
        I: IntoIterator<Item = &'a str>,
    {
        let inner = claim_types
            .into_iter()
            .filter_map(|claim| {
                self.inner
                    .get(claim)
                    .map(|value| (claim.to_string(), value.clone()))
            })
            .collect();
        Claims { inner }
    }

    /// Whether no claim is present.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> std::iter::FromIterator<(K, V)> for Claims {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Claims {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl User {
    /// A user without password, claims or entitlements.
    pub fn new(subject: &str) -> Self {
        User {
            subject: subject.to_string(),
            username: None,
            claims: Claims::new(),
            scopes: Scope::empty(),
            external: None,
            passdata: None,
        }
    }

    /// Set the login name for the password grant.
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    /// Replace the claims.
    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    /// Replace the scopes this user is entitled to.
    pub fn with_scopes(mut self, scopes: Scope) -> Self {
        self.scopes = scopes;
        self
    }

    /// Link the user to an upstream identity.
    pub fn with_external(mut self, provider: &str, subject: &str) -> Self {
        self.external = Some(ExternalLink {
            provider: provider.to_string(),
            subject: subject.to_string(),
        });
        self
    }

    /// Whether the user can authenticate with a local password.
    pub fn has_password(&self) -> bool {
        self.passdata.is_some()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("User")
            .field("subject", &self.subject)
            .field("username", &self.username)
            .field("claims", &self.claims)
            .field("scopes", &self.scopes)
            .field("external", &self.external)
            .field("passdata", &self.passdata.as_ref().map(|_| "<hidden>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_claims() {
        let claims = Claims::new()
            .with("name", "Alice Smith")
            .with("email", "alice@example.com")
            .with("website", "https://alice.example");

        let released = claims.released(vec!["name", "email", "phone_number"]);
        assert_eq!(released.get("name"), Some("Alice Smith"));
        assert_eq!(released.get("email"), Some("alice@example.com"));
        assert_eq!(released.get("website"), None);
        assert_eq!(released.iter().count(), 2);
    }

    #[test]
    fn debug_hides_password() {
        let mut user = User::new("alice").with_username("alice");
        user.passdata = Some(b"correct".to_vec());
        let debug = format!("{:?}", user);
        assert!(!debug.contains("correct"));
        assert!(debug.contains("<hidden>"));
    }
}
