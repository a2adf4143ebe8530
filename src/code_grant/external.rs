//! The grant kind synthesized by the federation bridge.
use crate::primitives::grant::{AuthenticatedSubject, Credential, GrantKind, GrantRequest};

use super::validator::{Context, GrantValidator, Reject};

/// Accepts subjects that the bridge already resolved from a verified upstream login.
///
/// The credential can not be constructed outside of this crate, so the only check left is that
/// the subject still exists and the login was initiated by the requesting client.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExternalGrant;

impl GrantValidator for ExternalGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::external()
    }

    fn attempt(&self, request: &GrantRequest, context: &Context) -> Result<AuthenticatedSubject, Reject> {
        let linked = match &request.credential {
            Credential::External(linked) => linked,
            _ => return Err(Reject::Malformed),
        };

        if linked.client_id() != context.client.client_id {
            return Err(Reject::ForeignClient);
        }

        context
            .registry
            .find_user(linked.subject())
            .map(|user| AuthenticatedSubject::user(&user))
            .ok_or(Reject::UnknownSubject)
    }
}
