extern crate idsvr_host;
extern crate base64;
extern crate chrono;
extern crate ring;
extern crate serde_json;
extern crate tracing_subscriber;
extern crate url;

use chrono::{Duration, Utc};

use idsvr_host::code_grant::error::IssuanceError;
use idsvr_host::primitives::grant::{GrantKind, GrantRequest, Parameters};
use idsvr_host::primitives::scope::Scope;
use idsvr_host::primitives::signer::{TokenError, TokenUse};

#[allow(dead_code)]
mod helpers;

use helpers::defaults::*;

fn scope(text: &str) -> Scope {
    text.parse().unwrap()
}

fn custom(client_id: &str, credential: &str) -> GrantRequest {
    let params: Parameters = vec![("custom_credential", credential)].into_iter().collect();
    GrantRequest::extension(client_id, GrantKind::new("custom"), params)
}

#[test]
fn password_login() {
    let host = helpers::host();
    let issued = host
        .engine()
        .issue(GrantRequest::password("webapp", "alice", b"correct"))
        .expect("Password login failed");

    assert_eq!(issued.access.claims.sub, "alice");
    assert_eq!(issued.access.claims.aud, "webapp");
    assert_eq!(issued.access.claims.iss, ISSUER);
    assert_eq!(issued.scope, scope("openid profile"));

    let identity = issued.identity.expect("openid was granted");
    assert_eq!(identity.claims.sub, "alice");
    assert_eq!(identity.claims.claims.get("name"), Some("Alice Smith"));
}

#[test]
fn wrong_password() {
    let host = helpers::host();
    let err = host
        .engine()
        .issue(GrantRequest::password("webapp", "alice", b"incorrect"))
        .unwrap_err();
    assert_eq!(err, IssuanceError::AuthenticationFailed);
}

#[test]
fn failures_do_not_reveal_their_cause() {
    let host = helpers::host();
    let engine = host.engine();

    let failures = vec![
        engine.issue(GrantRequest::password("webapp", "alice", b"incorrect")),
        engine.issue(GrantRequest::password("webapp", "mallory", b"correct")),
        engine.issue(GrantRequest::password("webapp", "mallory", b"incorrect")),
        engine.issue(GrantRequest::password("unknown", "alice", b"correct")),
        engine.issue(GrantRequest::password("backend", "bob", b"hunter2").with_client_secret(b"guess")),
        engine.issue(GrantRequest::password("backend", "bob", b"hunter2")),
    ];

    let bodies: Vec<String> = failures
        .into_iter()
        .map(|result| result.expect_err("Login succeeded").to_json())
        .collect();
    for body in &bodies {
        assert_eq!(body, r#"{"error":"invalid_grant"}"#);
    }
}

#[test]
fn grant_kind_must_be_permitted() {
    let host = helpers::host();
    let engine = host.engine();

    // Valid and invalid credentials alike.
    let attempts = vec![
        GrantRequest::password("spa", "alice", b"correct"),
        GrantRequest::password("spa", "alice", b"incorrect"),
        GrantRequest::password("reports", "bob", b"hunter2"),
        custom("spa", "valid"),
        custom("reports", "invalid"),
        GrantRequest::refresh("spa", "not a token"),
        GrantRequest::refresh("backend", "not a token").with_client_secret(b"backend-secret"),
        GrantRequest::refresh("backend", "not a token").with_client_secret(b"wrong"),
        GrantRequest::refresh("backend", "not a token"),
        GrantRequest::extension("webapp", GrantKind::new("device_code"), Parameters::new()),
    ];

    for attempt in attempts {
        let kind = attempt.kind.clone();
        let client = attempt.client_id.clone();
        assert_eq!(
            engine.issue(attempt).unwrap_err(),
            IssuanceError::GrantNotAllowed,
            "{} used {}",
            client,
            kind
        );
    }
}

#[test]
fn scope_narrowing() {
    let host = helpers::host();
    let engine = host.engine();

    // backend permits {api, profile}, bob is entitled to {profile, api}, alice to {openid, profile}.
    let cases = vec![
        ("bob", "hunter2", "api profile openid", "api profile"),
        ("bob", "hunter2", "api email", "api"),
        ("alice", "correct", "api profile openid", "profile"),
        ("alice", "correct", "api", ""),
        ("alice", "correct", "unknown profile", "profile"),
    ];

    for (username, password, requested, expected) in cases {
        let request = GrantRequest::password("backend", username, password.as_bytes())
            .with_client_secret(b"backend-secret")
            .with_scope(scope(requested));
        let issued = engine.issue(request).unwrap();
        assert_eq!(issued.scope, scope(expected), "{} requested {}", username, requested);

        // Narrowing twice does not change the result.
        let again = GrantRequest::password("backend", username, password.as_bytes())
            .with_client_secret(b"backend-secret")
            .with_scope(issued.scope.clone());
        assert_eq!(engine.issue(again).unwrap().scope, issued.scope);
    }
}

#[test]
fn custom_grant() {
    let host = helpers::host();
    let engine = host.engine();

    let issued = engine.issue(custom("webapp", "valid")).unwrap();
    assert_eq!(issued.access.claims.sub, CUSTOM_SUBJECT);
    assert_eq!(issued.scope, scope("openid profile"));

    assert_eq!(
        engine.issue(custom("webapp", "invalid")).unwrap_err(),
        IssuanceError::AuthenticationFailed
    );
}

#[test]
fn token_verification() {
    let host = helpers::host();
    let engine = host.engine();
    let now = Utc::now();
    let issued = engine
        .issue_at(GrantRequest::password("webapp", "alice", b"correct"), now)
        .unwrap();

    let signer = engine.signer();
    let exp = issued.access.claims.exp;
    let at = |timestamp: i64| now + Duration::seconds(timestamp - now.timestamp());

    let claims = signer
        .verify_at(&issued.access.value, TokenUse::Access, at(exp - 1))
        .unwrap();
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.aud, "webapp");
    assert_eq!(claims.scope, scope("openid profile"));

    assert_eq!(
        signer.verify_at(&issued.access.value, TokenUse::Access, at(exp + 1)),
        Err(TokenError::Expired)
    );
    assert_eq!(
        signer.verify_at(&issued.access.value, TokenUse::Refresh, now),
        Err(TokenError::Use)
    );

    // A token of another host does not verify.
    let other = helpers::host();
    assert!(other.engine().signer().verify_at(&issued.access.value, TokenUse::Access, now).is_err());
}

#[test]
fn refresh_grant() {
    let host = helpers::host();
    let engine = host.engine();
    let issued = engine.issue(GrantRequest::password("webapp", "alice", b"correct")).unwrap();
    let refresh = issued.refresh.expect("webapp may refresh");

    let narrowed = engine
        .issue(GrantRequest::refresh("webapp", &refresh.value).with_scope(scope("openid")))
        .unwrap();
    assert_eq!(narrowed.access.claims.sub, "alice");
    assert_eq!(narrowed.scope, scope("openid"));

    // The narrowed token can not regain the dropped scope.
    let widened = engine
        .issue(GrantRequest::refresh("webapp", &narrowed.refresh.unwrap().value).with_scope(scope("openid profile")))
        .unwrap();
    assert_eq!(widened.scope, scope("openid"));

    // Access tokens do not refresh.
    assert_eq!(
        engine
            .issue(GrantRequest::refresh("webapp", &issued.access.value))
            .unwrap_err(),
        IssuanceError::AuthenticationFailed
    );

    // Clients without the refresh grant get no refresh token.
    let backend = engine
        .issue(GrantRequest::password("backend", "bob", b"hunter2").with_client_secret(b"backend-secret"))
        .unwrap();
    assert!(backend.refresh.is_none());
}

#[test]
fn refresh_is_bound_to_client() {
    let host = helpers::host();
    let engine = host.engine();
    let issued = engine.issue(GrantRequest::password("webapp", "alice", b"correct")).unwrap();
    let refresh = issued.refresh.unwrap();

    assert_eq!(
        engine.issue(GrantRequest::refresh("reports", &refresh.value)).unwrap_err(),
        IssuanceError::AuthenticationFailed
    );
}

#[test]
fn issuance_is_thread_safe() {
    let host = helpers::shared_host();
    let threads: Vec<_> = (0..4)
        .map(|i| {
            let host = host.clone();
            std::thread::spawn(move || {
                let request = if i % 2 == 0 {
                    GrantRequest::password("webapp", "alice", b"correct")
                } else {
                    custom("webapp", "valid")
                };
                host.engine().issue(request).map(|issued| issued.access.claims.sub)
            })
        })
        .collect();

    let subjects: Vec<_> = threads
        .into_iter()
        .map(|thread| thread.join().expect("Issuing thread panicked").unwrap())
        .collect();
    assert_eq!(subjects, vec!["alice", CUSTOM_SUBJECT, "alice", CUSTOM_SUBJECT]);
}
