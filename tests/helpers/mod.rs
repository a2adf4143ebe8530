//! Shared setup of the integration tests.
use std::sync::Arc;

use base64::{encode_config, URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use ring::hmac;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use url::Url;

use idsvr_host::code_grant::validator::Reject;
use idsvr_host::config::{Host, Settings};
use idsvr_host::federation::{AwaitingUpstream, UpstreamCallback};
use idsvr_host::primitives::grant::{AuthenticatedSubject, Credential};

pub mod defaults {
    pub const ISSUER: &str = "https://idsvr.example";
    pub const UPSTREAM_SECRET: &[u8] = b"upstream-client-secret";
    pub const UPSTREAM_ISSUER: &str = "https://accounts.example";
    pub const UPSTREAM_CLIENT: &str = "idsvr-at-google";
    pub const CUSTOM_SUBJECT: &str = "818727";
}

pub const SETTINGS: &str = r#"
issuer: https://idsvr.example
signing:
  ephemeral: true
scopes:
  - name: openid
    display_name: User identifier
    kind: identity
    claims: [sub]
  - name: profile
    display_name: User profile
    kind: identity
    claims: [name, website]
  - name: email
    kind: identity
    claims: [email]
  - name: api
    display_name: The api
    kind: resource
clients:
  - client_id: webapp
    grant_types: [password, custom, refresh_token, external]
    scopes: openid profile
    redirect_uris: [https://webapp.example/cb]
  - client_id: spa
    grant_types: [external]
    scopes: openid email
    redirect_uris: [https://spa.example/cb]
  - client_id: reports
    grant_types: [refresh_token]
    scopes: api
  - client_id: backend
    secret: backend-secret
    grant_types: [password, custom]
    scopes: api profile
users:
  - subject: alice
    username: alice
    password: correct
    scopes: openid profile
    claims:
      name: Alice Smith
      website: https://alice.example
  - subject: bob
    username: bob
    password: hunter2
    scopes: profile api
upstream:
  provider: google
  client_id: idsvr-at-google
  client_secret: upstream-client-secret
  authorize_endpoint: https://accounts.example/o/oauth2/auth
  issuer: https://accounts.example
  callback: https://idsvr.example/login/googlecallback
"#;

/// Route log output of the library through the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn settings() -> Settings {
    Settings::from_yaml(SETTINGS).expect("Test settings are valid")
}

/// A host with the default password policy and the custom grant kind.
pub fn host() -> Host {
    init_tracing();
    Host::builder(settings())
        .custom_grant("custom", |request, _registry| match &request.credential {
            Credential::Extension(params) if params.unique_value("custom_credential") == Some("valid") => {
                Ok(AuthenticatedSubject::service(defaults::CUSTOM_SUBJECT))
            }
            _ => Err(Reject::InvalidCredentials),
        })
        .build()
        .expect("Test host starts")
}

pub fn shared_host() -> Arc<Host> {
    Arc::new(host())
}

/// An ID token as the upstream provider signs it.
pub fn upstream_assertion(payload: &Value) -> String {
    let header = encode_config(br#"{"alg":"HS256","typ":"JWT"}"#, URL_SAFE_NO_PAD);
    let payload = encode_config(payload.to_string().as_bytes(), URL_SAFE_NO_PAD);
    let signed = format!("{}.{}", header, payload);
    let key = hmac::Key::new(hmac::HMAC_SHA256, defaults::UPSTREAM_SECRET);
    let signature = hmac::sign(&key, signed.as_bytes());
    format!("{}.{}", signed, encode_config(signature.as_ref(), URL_SAFE_NO_PAD))
}

pub fn query_value(url: &Url, key: &str) -> String {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| panic!("{} lacks {}", url, key))
}

/// The callback of a successful upstream login for the subject.
pub fn upstream_callback(awaiting: &AwaitingUpstream, subject: &str) -> UpstreamCallback {
    let nonce = query_value(&awaiting.redirect_url, "nonce");
    let state = query_value(&awaiting.redirect_url, "state");
    let payload = json!({
        "iss": defaults::UPSTREAM_ISSUER,
        "aud": defaults::UPSTREAM_CLIENT,
        "sub": subject,
        "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
        "nonce": nonce,
        "email": format!("{}@gmail.example", subject),
        "name": "Upstream User",
    });

    UpstreamCallback {
        state,
        assertion: upstream_assertion(&payload),
    }
}
