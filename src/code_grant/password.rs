//! The resource owner password credentials grant.
use crate::primitives::grant::{AuthenticatedSubject, Credential, GrantKind, GrantRequest};

use super::validator::{Context, GrantValidator, Reject};

/// Checks a username and password against the registry.
///
/// Unknown usernames and wrong passwords are rejected alike, after the same amount of hashing.
#[derive(Clone, Copy, Debug, Default)]
pub struct PasswordGrant;

impl GrantValidator for PasswordGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::password()
    }

    fn attempt(&self, request: &GrantRequest, context: &Context) -> Result<AuthenticatedSubject, Reject> {
        let (username, password) = match &request.credential {
            Credential::Password { username, password } => (username, password),
            _ => return Err(Reject::Malformed),
        };

        context
            .registry
            .authenticate_user(username, password)
            .map(|user| AuthenticatedSubject::user(&user))
            .ok_or(Reject::InvalidCredentials)
    }
}
