//! Client records and the policy by which their secrets are stored.
//!
//! Each client is registered with the grant kinds it may use, the scope it may at most obtain and
//! the redirect targets of its interactive flows. Confidential clients additionally own a secret
//! which is never kept verbatim but encoded by a `PasswordPolicy` on registration. The same
//! policy protects user passwords in the registry.
use super::grant::GrantKind;
use super::scope::Scope;

use std::collections::HashSet;
use std::fmt;

use argon2::{self, Config};
use rand::{thread_rng, RngCore};
use thiserror::Error;
use url::Url;

/// Clients are registered users of tokens.
///
/// There are two types of clients, public and confidential. Public clients operate without proof
/// of identity while confidential clients are authenticated by their secret before any grant is
/// validated on their behalf.
#[derive(Clone, Debug)]
pub struct Client {
    client_id: String,
    grant_kinds: HashSet<GrantKind>,
    allowed_scope: Scope,
    redirect_uris: Vec<Url>,
    client_type: ClientType,
}

/// A client whose credentials have been wrapped by a password policy.
///
/// This is the representation kept by a registry. It is immutable after registration.
#[derive(Clone, Debug)]
pub struct EncodedClient {
    /// The id of this client, unique within a registry.
    pub client_id: String,

    /// Grant kinds this client may request tokens with.
    pub grant_kinds: HashSet<GrantKind>,

    /// The maximal scope a token for this client may carry.
    pub allowed_scope: Scope,

    /// Valid redirect targets for interactive flows. The first entry is the default.
    pub redirect_uris: Vec<Url>,

    /// The authentication data.
    pub encoded_client: ClientType,
}

/// Recombines an `EncodedClient` and a `PasswordPolicy` to check authentication.
pub struct RegisteredClient<'a> {
    client: &'a EncodedClient,
    policy: &'a dyn PasswordPolicy,
}

/// Enumeration of the two defined client types.
#[derive(Clone)]
pub enum ClientType {
    /// A public client with no authentication information.
    Public,

    /// A confidential client who needs to be authenticated before communicating.
    Confidential {
        /// Byte data encoding the secret under the used policy.
        passdata: Vec<u8>,
    },
}

/// Failures of a password policy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The passphrase does not match the stored data.
    #[error("passphrase mismatch")]
    Mismatch,

    /// The policy could not operate, for example because no randomness was available.
    #[error("password policy failed: {0}")]
    Unavailable(String),
}

impl fmt::Debug for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            ClientType::Public => write!(f, "<public>"),
            ClientType::Confidential { .. } => write!(f, "<confidential>"),
        }
    }
}

impl Client {
    /// Create a public client.
    pub fn public(client_id: &str, allowed_scope: Scope) -> Client {
        Client {
            client_id: client_id.to_string(),
            grant_kinds: HashSet::new(),
            allowed_scope,
            redirect_uris: Vec::new(),
            client_type: ClientType::Public,
        }
    }

    /// Create a confidential client.
    pub fn confidential(client_id: &str, allowed_scope: Scope, passphrase: &[u8]) -> Client {
        Client {
            client_id: client_id.to_string(),
            grant_kinds: HashSet::new(),
            allowed_scope,
            redirect_uris: Vec::new(),
            client_type: ClientType::Confidential {
                passdata: passphrase.to_owned(),
            },
        }
    }

    /// Permit an additional grant kind.
    pub fn with_grant(mut self, kind: GrantKind) -> Self {
        self.grant_kinds.insert(kind);
        self
    }

    /// Add redirect targets for interactive flows.
    pub fn with_redirect_uris(mut self, uris: Vec<Url>) -> Self {
        self.redirect_uris.extend(uris);
        self
    }

    /// The identifier of this client.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Obscure the clients authentication data.
    ///
    /// This applies a one-way function to the passphrase using the password hashing method of the
    /// policy. The resulting passdata is then used for validating authentication details provided
    /// when later reasserting the identity of a client.
    pub fn encode(self, policy: &dyn PasswordPolicy) -> Result<EncodedClient, PolicyError> {
        let encoded_client = match self.client_type {
            ClientType::Public => ClientType::Public,
            ClientType::Confidential { passdata: passphrase } => ClientType::Confidential {
                passdata: policy.store(&self.client_id, &passphrase)?,
            },
        };

        Ok(EncodedClient {
            client_id: self.client_id,
            grant_kinds: self.grant_kinds,
            allowed_scope: self.allowed_scope,
            redirect_uris: self.redirect_uris,
            encoded_client,
        })
    }
}

impl EncodedClient {
    /// Whether the client may request tokens with this grant kind.
    pub fn permits(&self, kind: &GrantKind) -> bool {
        self.grant_kinds.contains(kind)
    }

    /// Choose the redirect target for an interactive flow.
    ///
    /// A requested target must match one of the registered ones exactly, no normalization beyond
    /// url parsing is performed. Without a request the first registered target is chosen.
    pub fn bound_redirect(&self, requested: Option<&Url>) -> Option<&Url> {
        match requested {
            None => self.redirect_uris.first(),
            Some(url) => self
                .redirect_uris
                .iter()
                .find(|registered| registered.as_str() == url.as_str()),
        }
    }
}

impl<'a> RegisteredClient<'a> {
    /// Binds a client and a policy reference together.
    ///
    /// The policy should be the same or equivalent to the policy used to create the encoded client
    /// data, as otherwise authentication will obviously not work.
    pub fn new(client: &'a EncodedClient, policy: &'a dyn PasswordPolicy) -> Self {
        RegisteredClient { client, policy }
    }

    /// Try to authenticate with the client and passphrase. This check will succeed if either the
    /// client is public and no passphrase was provided or if the client is confidential and the
    /// passphrase matches.
    pub fn check_authentication(&self, passphrase: Option<&[u8]>) -> Result<(), PolicyError> {
        match (passphrase, &self.client.encoded_client) {
            (None, &ClientType::Public) => Ok(()),
            (Some(provided), &ClientType::Confidential { passdata: ref stored }) => {
                self.policy.check(&self.client.client_id, provided, stored)
            }
            _ => Err(PolicyError::Mismatch),
        }
    }
}

/// Determines how passphrases are stored and checked.
///
/// The provided library implementation is based on `Argon2`.
pub trait PasswordPolicy: Send + Sync {
    /// Transform the passphrase so it can be stored. The `id` is bound into the result.
    fn store(&self, id: &str, passphrase: &[u8]) -> Result<Vec<u8>, PolicyError>;

    /// Check if the stored data corresponds to that of the id and passphrase.
    fn check(&self, id: &str, passphrase: &[u8], stored: &[u8]) -> Result<(), PolicyError>;
}

/// Store passwords using `Argon2` to derive the stored value.
#[derive(Clone, Debug, Default)]
pub struct Argon2 {}

impl PasswordPolicy for Argon2 {
    fn store(&self, id: &str, passphrase: &[u8]) -> Result<Vec<u8>, PolicyError> {
        let mut config = Config::default();
        config.ad = id.as_bytes();
        config.secret = &[];

        let mut salt = vec![0; 32];
        thread_rng()
            .try_fill_bytes(salt.as_mut_slice())
            .map_err(|err| PolicyError::Unavailable(err.to_string()))?;

        let encoded = argon2::hash_encoded(passphrase, &salt, &config)
            .map_err(|err| PolicyError::Unavailable(err.to_string()))?;
        Ok(encoded.into_bytes())
    }

    fn check(&self, id: &str, passphrase: &[u8], stored: &[u8]) -> Result<(), PolicyError> {
        let hash = String::from_utf8(stored.to_vec());
        let valid = match hash {
            Ok(hash) => argon2::verify_encoded_ext(&hash, passphrase, &[], id.as_bytes())
                .map_err(|_| PolicyError::Mismatch),
            _ => Err(PolicyError::Mismatch),
        };

        match valid {
            Ok(true) => Ok(()),
            _ => Err(PolicyError::Mismatch),
        }
    }
}

impl<P: PasswordPolicy + ?Sized> PasswordPolicy for Box<P> {
    fn store(&self, id: &str, passphrase: &[u8]) -> Result<Vec<u8>, PolicyError> {
        (**self).store(id, passphrase)
    }

    fn check(&self, id: &str, passphrase: &[u8], stored: &[u8]) -> Result<(), PolicyError> {
        (**self).check(id, passphrase, stored)
    }
}
