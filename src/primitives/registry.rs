//! The catalog of clients, scopes and users.
//!
//! Clients and scopes are fixed once the first request is served. Users are read-mostly: the only
//! write path is `create_linked_user`, used by the federation bridge on the first login of an
//! upstream identity.
use super::registrar::{Argon2, EncodedClient, PasswordPolicy, PolicyError, RegisteredClient, Client};
use super::scope::{Scope, ScopeDefinition};
use super::user::{Claims, User};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use base64::{encode_config, URL_SAFE_NO_PAD};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::OnceCell;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Checked against in place of a missing user or password.
const DUMMY_PASSWORD: &[u8] = b"dummy password";

/// Lookup of the records a grant is validated against.
///
/// All methods take `&self` and may be called by any number of concurrent requests.
pub trait Registry: Send + Sync {
    /// Look up a client by its id.
    fn find_client(&self, client_id: &str) -> Option<&EncodedClient>;

    /// Authenticate a client with the secret it presented, if any.
    ///
    /// Fails for unknown clients, public clients presenting a secret and confidential clients
    /// presenting none or the wrong one. The failures are not distinguished.
    fn check_client(&self, client_id: &str, secret: Option<&[u8]>) -> Result<(), RegistryError>;

    /// The definitions of all known scopes among the requested ones.
    ///
    /// Unknown scope names are dropped silently.
    fn find_scopes(&self, scope: &Scope) -> Vec<&ScopeDefinition>;

    /// Look up a user by subject identifier.
    fn find_user(&self, subject: &str) -> Option<User>;

    /// Find the user with the username and check the password.
    ///
    /// Unknown usernames and wrong passwords are not distinguished, and both perform a full
    /// password verification.
    fn authenticate_user(&self, username: &str, password: &[u8]) -> Option<User>;

    /// Resolve the local user linked to an upstream identity.
    fn find_user_by_external_link(&self, provider: &str, external_subject: &str) -> Option<User>;

    /// Create a user linked to an upstream identity, or return the one which is already linked.
    ///
    /// Concurrent calls for the same identity all return the same user.
    fn create_linked_user(
        &self, provider: &str, external_subject: &str, claims: Claims,
    ) -> Result<User, RegistryError>;
}

/// Errors of the registry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The record does not exist or the credentials did not match.
    #[error("registry lookup failed")]
    Unspecified,

    /// A primitive the registry relies on failed, such as randomness or the password policy.
    #[error("registry primitive failed: {0}")]
    PrimitiveError(String),
}

/// A registry held entirely in memory.
///
/// The link table is lost on process restart.
pub struct MemoryRegistry {
    clients: HashMap<String, EncodedClient>,
    scopes: BTreeMap<String, ScopeDefinition>,
    users: DashMap<String, User>,
    usernames: HashMap<String, String>,
    links: DashMap<(String, String), String>,
    password_policy: Box<dyn PasswordPolicy>,
    dummy: OnceCell<Vec<u8>>,
    random: SystemRandom,
}

impl MemoryRegistry {
    /// Create an empty registry storing secrets with `Argon2`.
    pub fn new() -> Self {
        MemoryRegistry::with_policy(Argon2::default())
    }

    /// Create an empty registry with a different password policy.
    ///
    /// The stored form of the dummy password is derived here, so that failed logins of unknown
    /// users only ever cost a single check.
    pub fn with_policy<P: PasswordPolicy + 'static>(policy: P) -> Self {
        let dummy = OnceCell::new();
        if let Ok(stored) = policy.store("", DUMMY_PASSWORD) {
            let _ = dummy.set(stored);
        }

        MemoryRegistry {
            clients: HashMap::new(),
            scopes: BTreeMap::new(),
            users: DashMap::new(),
            usernames: HashMap::new(),
            links: DashMap::new(),
            password_policy: Box::new(policy),
            dummy,
            random: SystemRandom::new(),
        }
    }

    /// Insert or overwrite a client, encoding its secret with the password policy.
    pub fn register_client(&mut self, client: Client) -> Result<(), PolicyError> {
        let encoded = client.encode(&*self.password_policy)?;
        self.clients.insert(encoded.client_id.clone(), encoded);
        Ok(())
    }

    /// Insert or overwrite a scope definition.
    pub fn register_scope(&mut self, scope: ScopeDefinition) {
        self.scopes.insert(scope.name.clone(), scope);
    }

    /// Insert or overwrite a user.
    ///
    /// The password is stored through the password policy, bound to the subject. A user with an
    /// upstream identity is linked to it right away.
    pub fn register_user(&mut self, mut user: User, password: Option<&[u8]>) -> Result<(), PolicyError> {
        user.passdata = match password {
            Some(password) => Some(self.password_policy.store(&user.subject, password)?),
            None => None,
        };

        if let Some(username) = &user.username {
            self.usernames.insert(username.clone(), user.subject.clone());
        }

        if let Some(link) = &user.external {
            self.links.insert(
                (link.provider.clone(), link.subject.clone()),
                user.subject.clone(),
            );
        }

        self.users.insert(user.subject.clone(), user);
        Ok(())
    }

    /// All identity scopes, which a linked user is entitled to.
    fn identity_scopes(&self) -> Scope {
        self.scopes
            .values()
            .filter(|scope| scope.is_identity())
            .map(|scope| scope.name.as_str())
            .collect()
    }

    fn new_subject(&self) -> Result<String, RegistryError> {
        let mut bytes = [0u8; 16];
        self.random
            .fill(&mut bytes)
            .map_err(|_| RegistryError::PrimitiveError("no randomness available".into()))?;
        Ok(encode_config(&bytes, URL_SAFE_NO_PAD))
    }

    /// Burn the same work as a real password check.
    fn dummy_check(&self, password: &[u8]) {
        let dummy = self
            .dummy
            .get_or_try_init(|| self.password_policy.store("", DUMMY_PASSWORD));
        if let Ok(stored) = dummy {
            let _ = self.password_policy.check("", password, stored);
        }
    }

    #[cfg(test)]
    pub(crate) fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        MemoryRegistry::new()
    }
}

impl fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("clients", &self.clients.len())
            .field("scopes", &self.scopes.len())
            .field("users", &self.users.len())
            .field("links", &self.links.len())
            .finish()
    }
}

impl Registry for MemoryRegistry {
    fn find_client(&self, client_id: &str) -> Option<&EncodedClient> {
        self.clients.get(client_id)
    }

    fn check_client(&self, client_id: &str, secret: Option<&[u8]>) -> Result<(), RegistryError> {
        let client = self.clients.get(client_id).ok_or(RegistryError::Unspecified)?;
        RegisteredClient::new(client, &*self.password_policy)
            .check_authentication(secret)
            .map_err(|_| RegistryError::Unspecified)
    }

    fn find_scopes(&self, scope: &Scope) -> Vec<&ScopeDefinition> {
        scope.iter().filter_map(|name| self.scopes.get(name)).collect()
    }

    fn find_user(&self, subject: &str) -> Option<User> {
        self.users.get(subject).map(|user| user.clone())
    }

    fn authenticate_user(&self, username: &str, password: &[u8]) -> Option<User> {
        let user = self
            .usernames
            .get(username)
            .and_then(|subject| self.find_user(subject));

        let user = match user {
            Some(user) => user,
            None => {
                self.dummy_check(password);
                return None;
            }
        };

        let stored = match &user.passdata {
            Some(stored) => stored,
            None => {
                self.dummy_check(password);
                return None;
            }
        };

        match self.password_policy.check(&user.subject, password, stored) {
            Ok(()) => Some(user),
            Err(_) => None,
        }
    }

    fn find_user_by_external_link(&self, provider: &str, external_subject: &str) -> Option<User> {
        let key = (provider.to_string(), external_subject.to_string());
        let subject = self.links.get(&key).map(|subject| subject.clone())?;
        self.find_user(&subject)
    }

    fn create_linked_user(
        &self, provider: &str, external_subject: &str, claims: Claims,
    ) -> Result<User, RegistryError> {
        let key = (provider.to_string(), external_subject.to_string());
        match self.links.entry(key) {
            Entry::Occupied(linked) => {
                let subject = linked.get().clone();
                drop(linked);
                self.find_user(&subject).ok_or(RegistryError::Unspecified)
            }
            Entry::Vacant(vacant) => {
                let subject = self.new_subject()?;
                let claims = claims
                    .with("idp", provider)
                    .with("external_sub", external_subject);
                let user = User::new(&subject)
                    .with_claims(claims)
                    .with_scopes(self.identity_scopes())
                    .with_external(provider, external_subject);

                // The user must be visible before the link is.
                self.users.insert(subject.clone(), user.clone());
                vacant.insert(subject);
                Ok(user)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::grant::GrantKind;
    use super::super::registrar::tests::PlainPolicy;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Counts the work done by the wrapped policy.
    #[derive(Clone, Default)]
    struct CountingPolicy {
        stores: Arc<AtomicUsize>,
        checks: Arc<AtomicUsize>,
    }

    impl PasswordPolicy for CountingPolicy {
        fn store(&self, id: &str, passphrase: &[u8]) -> Result<Vec<u8>, PolicyError> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            PlainPolicy.store(id, passphrase)
        }

        fn check(&self, id: &str, passphrase: &[u8], stored: &[u8]) -> Result<(), PolicyError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            PlainPolicy.check(id, passphrase, stored)
        }
    }

    fn registry() -> MemoryRegistry {
        let mut registry = MemoryRegistry::with_policy(PlainPolicy);
        registry.register_scope(ScopeDefinition::identity("openid", "Your user identifier", &["sub"]));
        registry.register_scope(ScopeDefinition::identity("email", "Your email", &["email"]));
        registry.register_scope(ScopeDefinition::resource("api", "The api"));
        registry
            .register_client(
                Client::confidential("backend", "api".parse().unwrap(), b"backend-secret")
                    .with_grant(GrantKind::password()),
            )
            .unwrap();
        registry
            .register_client(Client::public("webapp", "openid".parse().unwrap()))
            .unwrap();
        registry
            .register_user(User::new("alice").with_username("alice"), Some(b"correct"))
            .unwrap();
        registry
    }

    #[test]
    fn client_authentication() {
        let registry = registry();
        assert!(registry.check_client("backend", Some(b"backend-secret")).is_ok());
        assert!(registry.check_client("backend", Some(b"wrong")).is_err());
        assert!(registry.check_client("backend", None).is_err());
        assert!(registry.check_client("webapp", None).is_ok());
        assert!(registry.check_client("webapp", Some(b"anything")).is_err());
        assert_eq!(registry.check_client("unknown", None), Err(RegistryError::Unspecified));
    }

    #[test]
    fn unknown_scopes_are_dropped() {
        let registry = registry();
        let found = registry.find_scopes(&"openid nonsense api".parse().unwrap());
        let names: Vec<_> = found.iter().map(|scope| scope.name.as_str()).collect();
        assert_eq!(names, vec!["api", "openid"]);
    }

    #[test]
    fn user_authentication() {
        let registry = registry();
        assert_eq!(registry.authenticate_user("alice", b"correct").unwrap().subject, "alice");
        assert!(registry.authenticate_user("alice", b"wrong").is_none());
        assert!(registry.authenticate_user("bob", b"correct").is_none());
    }

    #[test]
    fn every_failed_login_checks_one_password() {
        let policy = CountingPolicy::default();
        let mut registry = MemoryRegistry::with_policy(policy.clone());
        registry
            .register_user(User::new("alice").with_username("alice"), Some(b"correct"))
            .unwrap();
        registry
            .register_user(User::new("carol").with_username("carol"), None)
            .unwrap();

        let attempts = vec![
            ("alice", &b"wrong"[..]),
            ("mallory", &b"correct"[..]),
            ("carol", &b"correct"[..]),
            ("alice", &b"correct"[..]),
        ];
        for (username, password) in attempts {
            let before = policy.checks.load(Ordering::SeqCst);
            registry.authenticate_user(username, password);
            assert_eq!(policy.checks.load(Ordering::SeqCst) - before, 1, "{}", username);
        }
    }

    #[test]
    fn dummy_password_is_stored_upfront() {
        let policy = CountingPolicy::default();
        let registry = MemoryRegistry::with_policy(policy.clone());
        assert_eq!(policy.stores.load(Ordering::SeqCst), 1);

        assert!(registry.authenticate_user("mallory", b"guess").is_none());
        assert!(registry.authenticate_user("mallory", b"guess").is_none());
        assert_eq!(policy.stores.load(Ordering::SeqCst), 1);
        assert_eq!(policy.checks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn linking_is_idempotent() {
        let registry = registry();
        let claims = Claims::new().with("email", "alice@gmail.example");
        let first = registry.create_linked_user("google", "g-123", claims.clone()).unwrap();
        let second = registry.create_linked_user("google", "g-123", claims).unwrap();
        assert_eq!(first.subject, second.subject);
        assert_eq!(registry.user_count(), 2);

        let found = registry.find_user_by_external_link("google", "g-123").unwrap();
        assert_eq!(found.subject, first.subject);
        assert_eq!(found.claims.get("idp"), Some("google"));
        assert_eq!(found.claims.get("external_sub"), Some("g-123"));
        assert_eq!(found.scopes, "email openid".parse().unwrap());
        assert!(!found.has_password());

        assert!(registry.find_user_by_external_link("github", "g-123").is_none());
    }

    #[test]
    fn concurrent_linking_creates_one_user() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    registry
                        .create_linked_user("google", "g-race", Claims::new())
                        .unwrap()
                        .subject
                })
            })
            .collect();

        let subjects: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(subjects.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(registry.user_count(), 2);
    }

    #[test]
    fn pre_linked_user() {
        let mut registry = registry();
        registry
            .register_user(User::new("carol").with_external("google", "g-carol"), None)
            .unwrap();
        let carol = registry.create_linked_user("google", "g-carol", Claims::new()).unwrap();
        assert_eq!(carol.subject, "carol");
    }
}
