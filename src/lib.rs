//! # idsvr-host
//!
//! The core of an OpenID Connect identity provider: an in-memory catalog of clients, scopes and
//! users, a pipeline of pluggable grant validators, and a signing authority minting access,
//! identity and refresh tokens for the registered client applications.
//!
//! ## About
//!
//! A token request passes through a fixed sequence of steps. The requesting client is resolved in
//! the [`Registry`] and, if confidential, authenticated. The requested grant kind must be one the
//! client is permitted to use. Then exactly one [`GrantValidator`] (selected by the grant kind)
//! decides whether the presented credential proves a subject. Finally the requested scope is
//! narrowed to what both the client and the subject are entitled to and the [`TokenSigner`]
//! produces the signed tokens. All of this is orchestrated by the [`TokenEngine`].
//!
//! Logins performed at an upstream identity provider enter through the [`Bridge`]. It verifies
//! the callback, resolves (or creates, exactly once) the local user linked to the upstream
//! subject and hands a grant request of the dedicated external kind to the very same engine.
//!
//! ## Composition
//!
//! Everything is constructed explicitly, there is no global state. The usual way is to load
//! [`Settings`] and build a [`Host`] from them, registering custom grant kinds on the way:
//!
//! ```no_run
//! # use idsvr_host::config::{Host, Settings};
//! # use idsvr_host::code_grant::validator::Reject;
//! # use idsvr_host::primitives::grant::{AuthenticatedSubject, Credential};
//! let settings = Settings::load("idsvr.yaml").expect("Invalid configuration");
//! let host = Host::builder(settings)
//!     .custom_grant("custom", |request, _registry| match &request.credential {
//!         Credential::Extension(params) if params.unique_value("custom_credential").is_some()
//!             => Ok(AuthenticatedSubject::service("818727")),
//!         _ => Err(Reject::InvalidCredentials),
//!     })
//!     .build()
//!     .expect("Failed to start identity host");
//! ```
//!
//! The HTTP layer, login views and key provisioning are not part of this crate. The front-end
//! turns form parameters into a [`GrantRequest`] with [`endpoint::token_request`] and renders the
//! [`TokenResponse`] or the error json.
//!
//! [`Registry`]: primitives/registry/trait.Registry.html
//! [`GrantValidator`]: code_grant/validator/trait.GrantValidator.html
//! [`TokenSigner`]: primitives/signer/struct.TokenSigner.html
//! [`TokenEngine`]: code_grant/issuance/struct.TokenEngine.html
//! [`Bridge`]: federation/struct.Bridge.html
//! [`Settings`]: config/struct.Settings.html
//! [`Host`]: config/struct.Host.html
//! [`GrantRequest`]: primitives/grant/struct.GrantRequest.html
//! [`TokenResponse`]: code_grant/issuance/struct.TokenResponse.html
#![warn(missing_docs)]

extern crate argon2;
extern crate base64;
extern crate chrono;
extern crate dashmap;
extern crate once_cell;
extern crate rand;
extern crate ring;
extern crate rmp_serde;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate thiserror;
extern crate tracing;
extern crate url;

pub mod code_grant;
pub mod config;
pub mod endpoint;
pub mod federation;
pub mod primitives;
