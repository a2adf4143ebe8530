//! Startup configuration and the composition of a host.
//!
//! Settings are read from a YAML file and may be overridden by environment variables prefixed
//! with `IDSVR_`, nested keys separated by a double underscore. For example
//! `IDSVR_SIGNING__KEY_PATH` replaces `signing.key_path`. Everything is validated before a
//! [`Host`] is built, a host never starts with a partial catalog.
//!
//! ```yaml
//! issuer: https://idsvr.example
//! signing:
//!   key_path: /etc/idsvr/signing.pem
//! scopes:
//!   - name: openid
//!     display_name: User identifier
//!     kind: identity
//!     claims: [sub]
//! clients:
//!   - client_id: webapp
//!     grant_types: [password, refresh_token]
//!     scopes: openid
//! users:
//!   - subject: "818727"
//!     username: alice
//!     password: correct horse
//!     scopes: openid
//! ```
//!
//! [`Host`]: struct.Host.html
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::config::{Config, Environment, File, FileFormat};
use chrono::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::code_grant::issuance::{Lifetimes, TokenEngine};
use crate::code_grant::validator::{Reject, ValidatorChain};
use crate::endpoint::TokenEndpoint;
use crate::federation::Bridge;
use crate::federation::state::StateSealer;
use crate::federation::upstream::SharedSecretProvider;
use crate::primitives::grant::{AuthenticatedSubject, GrantKind, GrantRequest};
use crate::primitives::registrar::{Argon2, Client, PasswordPolicy, PolicyError};
use crate::primitives::registry::{MemoryRegistry, Registry};
use crate::primitives::scope::{Scope, ScopeDefinition, ScopeKind};
use crate::primitives::signer::{KeyError, SigningKey, TokenSigner, RESERVED_CLAIMS};
use crate::primitives::user::{Claims, User};

/// Errors preventing a host from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The sources could not be read or deserialized.
    #[error("Configuration build error: {0}")]
    Build(#[from] ::config::ConfigError),

    /// The settings are inconsistent.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// No signing key is available.
    #[error("Signing key unavailable: {0}")]
    Signing(#[from] KeyError),

    /// A secret could not be stored.
    #[error("Could not store secret: {0}")]
    Password(#[from] PolicyError),
}

/// The complete startup configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// The issuer identifier placed into every token.
    pub issuer: Url,

    /// Lifetime of access tokens in seconds.
    #[serde(default = "default_access_lifetime")]
    pub access_token_lifetime: i64,

    /// Lifetime of identity tokens in seconds.
    #[serde(default = "default_identity_lifetime")]
    pub identity_token_lifetime: i64,

    /// Lifetime of refresh tokens in seconds.
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_token_lifetime: i64,

    /// Where the signing key comes from.
    #[serde(default)]
    pub signing: SigningSettings,

    /// The registered client applications.
    #[serde(default)]
    pub clients: Vec<ClientSettings>,

    /// The registered scopes.
    #[serde(default)]
    pub scopes: Vec<ScopeSettings>,

    /// The local users.
    #[serde(default)]
    pub users: Vec<UserSettings>,

    /// The identity provider logins are federated to, if any.
    #[serde(default)]
    pub upstream: Option<UpstreamSettings>,
}

/// Source of the token signing key.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SigningSettings {
    /// An Ed25519 PKCS#8 key, PEM or DER encoded.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Generate a key on startup instead. Tokens do not survive a restart.
    #[serde(default)]
    pub ephemeral: bool,
}

/// A client application.
#[derive(Clone, Deserialize)]
pub struct ClientSettings {
    /// The unique client id.
    pub client_id: String,

    /// The secret of a confidential client, absent for public clients.
    #[serde(default)]
    pub secret: Option<String>,

    /// The grant kinds the client may use.
    #[serde(default)]
    pub grant_types: Vec<GrantKind>,

    /// The scope the client may at most obtain.
    #[serde(default)]
    pub scopes: Scope,

    /// Redirect targets after a federated login, the first is the default.
    #[serde(default)]
    pub redirect_uris: Vec<Url>,
}

/// A scope definition.
#[derive(Clone, Debug, Deserialize)]
pub struct ScopeSettings {
    /// The scope token.
    pub name: String,

    /// Human readable name, defaults to the token.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Whether this is an identity or a resource scope.
    pub kind: ScopeKind,

    /// Claim types an identity scope releases.
    #[serde(default)]
    pub claims: Vec<String>,
}

/// A local user.
#[derive(Clone, Deserialize)]
pub struct UserSettings {
    /// The stable subject identifier.
    pub subject: String,

    /// Login name for the password grant.
    #[serde(default)]
    pub username: Option<String>,

    /// The password, stored through the password policy on startup.
    #[serde(default)]
    pub password: Option<String>,

    /// Claims about the user.
    #[serde(default)]
    pub claims: Claims,

    /// The scopes the user is entitled to.
    #[serde(default)]
    pub scopes: Scope,

    /// An upstream identity this user is linked to from the start.
    #[serde(default)]
    pub external: Option<ExternalSettings>,
}

/// A pre-configured link to an upstream identity.
#[derive(Clone, Debug, Deserialize)]
pub struct ExternalSettings {
    /// Name of the upstream provider.
    pub provider: String,

    /// Subject identifier at the upstream provider.
    pub subject: String,
}

/// The upstream identity provider.
#[derive(Clone, Deserialize)]
pub struct UpstreamSettings {
    /// The name identities are linked under, e.g. `google`.
    pub provider: String,

    /// The client id of this host at the provider.
    pub client_id: String,

    /// The client secret of this host at the provider, also keying its assertions.
    pub client_secret: String,

    /// The authorization endpoint of the provider.
    pub authorize_endpoint: Url,

    /// The issuer the provider's assertions must carry.
    pub issuer: String,

    /// The callback of this host the provider returns to.
    pub callback: Url,

    /// Seconds a user has to complete the upstream login.
    #[serde(default = "default_login_lifetime")]
    pub login_lifetime: i64,

    /// Key of the login state, shared between instances. Generated on startup if absent.
    #[serde(default)]
    pub state_secret: Option<String>,
}

fn default_access_lifetime() -> i64 {
    3600
}

fn default_identity_lifetime() -> i64 {
    300
}

fn default_refresh_lifetime() -> i64 {
    2_592_000
}

fn default_login_lifetime() -> i64 {
    600
}

impl Settings {
    /// Load from a YAML file and the `IDSVR_` environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
        Settings::from_sources(path.as_ref(), environment())
    }

    fn from_sources(path: &Path, environment: Environment) -> Result<Settings, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path))
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse YAML text, without environment overrides.
    pub fn from_yaml(text: &str) -> Result<Settings, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifetimes = [
            ("access_token_lifetime", self.access_token_lifetime),
            ("identity_token_lifetime", self.identity_token_lifetime),
            ("refresh_token_lifetime", self.refresh_token_lifetime),
        ];
        if let Some((name, _)) = lifetimes.iter().find(|(_, seconds)| *seconds <= 0) {
            return Err(invalid(format!("{} must be positive", name)));
        }

        if self.signing.key_path.is_none() && !self.signing.ephemeral {
            return Err(invalid("signing.key_path is required unless signing.ephemeral is set"));
        }

        let mut scopes = HashSet::new();
        for scope in &self.scopes {
            if scope.name.parse::<Scope>().ok().map(|parsed| parsed.iter().count()) != Some(1) {
                return Err(invalid(format!("'{}' is not a single scope token", scope.name)));
            }
            if !scopes.insert(scope.name.as_str()) {
                return Err(invalid(format!("scope '{}' is declared twice", scope.name)));
            }
            // `sub` is always the subject identifier, releasing it is a no-op.
            let registered = scope
                .claims
                .iter()
                .find(|claim| claim.as_str() != "sub" && RESERVED_CLAIMS.contains(&claim.as_str()));
            if let Some(claim) = registered {
                return Err(invalid(format!("scope '{}' releases the registered claim '{}'", scope.name, claim)));
            }
        }

        let mut clients = HashSet::new();
        for client in &self.clients {
            if !clients.insert(client.client_id.as_str()) {
                return Err(invalid(format!("client '{}' is declared twice", client.client_id)));
            }
            if let Some(unknown) = client.scopes.iter().find(|scope| !scopes.contains(scope)) {
                return Err(invalid(format!(
                    "client '{}' references undeclared scope '{}'",
                    client.client_id, unknown
                )));
            }
        }

        let mut subjects = HashSet::new();
        let mut usernames = HashSet::new();
        let mut links = HashSet::new();
        for user in &self.users {
            if !subjects.insert(user.subject.as_str()) {
                return Err(invalid(format!("subject '{}' is declared twice", user.subject)));
            }
            if let Some(username) = &user.username {
                if !usernames.insert(username.as_str()) {
                    return Err(invalid(format!("username '{}' is declared twice", username)));
                }
            }
            if let Some(external) = &user.external {
                if !links.insert((external.provider.as_str(), external.subject.as_str())) {
                    return Err(invalid(format!("user '{}' repeats an external link", user.subject)));
                }
            }
            if let Some(unknown) = user.scopes.iter().find(|scope| !scopes.contains(scope)) {
                return Err(invalid(format!(
                    "user '{}' references undeclared scope '{}'",
                    user.subject, unknown
                )));
            }
        }

        if let Some(upstream) = &self.upstream {
            if upstream.client_secret.is_empty() {
                return Err(invalid("upstream.client_secret must not be empty"));
            }
            if upstream.login_lifetime <= 0 {
                return Err(invalid("upstream.login_lifetime must be positive"));
            }
            if upstream.state_secret.as_ref().map_or(false, String::is_empty) {
                return Err(invalid("upstream.state_secret must not be empty"));
            }
        }

        Ok(())
    }

    /// The token lifetimes.
    pub fn lifetimes(&self) -> Lifetimes {
        Lifetimes {
            access: Duration::seconds(self.access_token_lifetime),
            identity: Duration::seconds(self.identity_token_lifetime),
            refresh: Duration::seconds(self.refresh_token_lifetime),
        }
    }
}

/// Variables like `IDSVR_SIGNING__KEY_PATH`.
fn environment() -> Environment {
    Environment::with_prefix("IDSVR")
        .prefix_separator("_")
        .separator("__")
}

fn invalid<S: Into<String>>(message: S) -> ConfigError {
    ConfigError::Validation(message.into())
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("client_id", &self.client_id)
            .field("confidential", &self.secret.is_some())
            .field("grant_types", &self.grant_types)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl std::fmt::Debug for UserSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("UserSettings")
            .field("subject", &self.subject)
            .field("username", &self.username)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// A fully composed identity host.
#[derive(Debug)]
pub struct Host {
    engine: Arc<TokenEngine>,
    bridge: Option<Bridge>,
}

/// Collects extensions before a host is built.
pub struct HostBuilder {
    settings: Settings,
    validators: ValidatorChain,
    policy: Box<dyn PasswordPolicy>,
    signing_key: Option<SigningKey>,
}

impl Host {
    /// Start composing a host from validated settings.
    pub fn builder(settings: Settings) -> HostBuilder {
        HostBuilder {
            settings,
            validators: ValidatorChain::standard(),
            policy: Box::new(Argon2::default()),
            signing_key: None,
        }
    }

    /// The issuance engine.
    pub fn engine(&self) -> &Arc<TokenEngine> {
        &self.engine
    }

    /// The federation bridge, if an upstream provider is configured.
    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    /// A token endpoint serving requests with the engine.
    pub fn token_endpoint(&self) -> TokenEndpoint {
        TokenEndpoint::new(self.engine.clone())
    }
}

impl HostBuilder {
    /// Accept an additional grant kind, decided by the predicate.
    ///
    /// Registering one of the standard kinds replaces its validator.
    pub fn custom_grant<F>(mut self, kind: &str, predicate: F) -> Self
    where
        F: Fn(&GrantRequest, &dyn Registry) -> Result<AuthenticatedSubject, Reject> + Send + Sync + 'static,
    {
        self.validators.custom(GrantKind::new(kind), predicate);
        self
    }

    /// Store client secrets and user passwords with another policy than `Argon2`.
    pub fn password_policy<P: PasswordPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Sign with this key instead of the configured one.
    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Compose the host.
    pub fn build(self) -> Result<Host, ConfigError> {
        let HostBuilder {
            settings,
            validators,
            policy,
            signing_key,
        } = self;
        settings.validate()?;

        let registry = Arc::new(registry(&settings, policy)?);
        let key = match (signing_key, &settings.signing.key_path) {
            (Some(key), _) => key,
            (None, Some(path)) => SigningKey::from_pkcs8_file(path)?,
            (None, None) => {
                warn!("Signing with an ephemeral key, tokens do not survive a restart");
                SigningKey::ephemeral()?
            }
        };
        let signer = Arc::new(TokenSigner::new(key, settings.issuer.clone()));

        let engine = TokenEngine::new(registry, signer, validators).with_lifetimes(settings.lifetimes());
        let engine = Arc::new(engine);

        let bridge = match &settings.upstream {
            Some(upstream) => Some(bridge(&engine, upstream)?),
            None => None,
        };

        info!(
            "Identity host for {} ready with {} clients, federation {}",
            settings.issuer,
            settings.clients.len(),
            bridge.as_ref().map_or("disabled", Bridge::provider),
        );
        Ok(Host { engine, bridge })
    }
}

fn registry(settings: &Settings, policy: Box<dyn PasswordPolicy>) -> Result<MemoryRegistry, ConfigError> {
    let mut registry = MemoryRegistry::with_policy(policy);

    for scope in &settings.scopes {
        registry.register_scope(ScopeDefinition {
            name: scope.name.clone(),
            display_name: scope.display_name.clone().unwrap_or_else(|| scope.name.clone()),
            kind: scope.kind,
            claims: scope.claims.clone(),
        });
    }

    for client in &settings.clients {
        let registered = match &client.secret {
            Some(secret) => Client::confidential(&client.client_id, client.scopes.clone(), secret.as_bytes()),
            None => Client::public(&client.client_id, client.scopes.clone()),
        };
        let registered = client
            .grant_types
            .iter()
            .cloned()
            .fold(registered, Client::with_grant)
            .with_redirect_uris(client.redirect_uris.clone());
        registry.register_client(registered)?;
    }

    for user in &settings.users {
        let mut registered = User::new(&user.subject)
            .with_claims(user.claims.clone())
            .with_scopes(user.scopes.clone());
        if let Some(username) = &user.username {
            registered = registered.with_username(username);
        }
        if let Some(external) = &user.external {
            registered = registered.with_external(&external.provider, &external.subject);
        }
        registry.register_user(registered, user.password.as_ref().map(String::as_bytes))?;
    }

    Ok(registry)
}

fn bridge(engine: &Arc<TokenEngine>, upstream: &UpstreamSettings) -> Result<Bridge, ConfigError> {
    let provider = SharedSecretProvider::new(
        &upstream.provider,
        &upstream.client_id,
        upstream.client_secret.as_bytes(),
        upstream.authorize_endpoint.clone(),
        &upstream.issuer,
        upstream.callback.clone(),
    );

    let sealer = match &upstream.state_secret {
        Some(secret) => StateSealer::new(secret.as_bytes()),
        None => StateSealer::ephemeral().map_err(|_| KeyError::Unavailable)?,
    };

    let bridge = Bridge::new(engine.clone(), Box::new(provider), sealer)
        .with_login_lifetime(Duration::seconds(upstream.login_lifetime));
    Ok(bridge)
}
