//! A collection of primitives shared by the grant validators, the issuance engine and the bridge.
//!
//! A primitive is the smallest independent unit of policy. The [`Registry`] answers which
//! clients, scopes and users exist, the [`TokenSigner`] turns a claim set into a signed token and
//! verifies it again, and the types in [`grant`] describe a single authentication attempt and its
//! outcome. Keeping these apart makes it possible to substitute, for example, a database backed
//! registry without touching the engine.
//!
//! ```
//! # use idsvr_host::primitives::registry::MemoryRegistry;
//! # use idsvr_host::primitives::signer::{SigningKey, TokenSigner};
//! let registry = MemoryRegistry::new();
//! let signer = TokenSigner::new(SigningKey::ephemeral().unwrap(),
//!     "https://idsvr.example".parse().unwrap());
//! # let _ = (registry, signer);
//! ```
//!
//! [`Registry`]: registry/trait.Registry.html
//! [`TokenSigner`]: signer/struct.TokenSigner.html
//! [`grant`]: grant/index.html

use chrono::DateTime;
use chrono::Utc;

pub mod grant;
pub mod registrar;
pub mod registry;
pub mod scope;
pub mod signer;
pub mod user;

/// Timestamps are always utc.
pub type Time = DateTime<Utc>;

/// Commonly used primitives for front-ends and composition.
pub mod prelude {
    pub use super::grant::{AuthenticatedSubject, Credential, GrantKind, GrantRequest};
    pub use super::registrar::{Argon2, Client, PasswordPolicy};
    pub use super::registry::{MemoryRegistry, Registry};
    pub use super::scope::{Scope, ScopeDefinition, ScopeKind};
    pub use super::signer::{SigningKey, Token, TokenClaims, TokenSigner, TokenUse};
    pub use super::user::{Claims, User};
}
