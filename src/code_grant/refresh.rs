//! Re-issuance from a refresh token.
use crate::primitives::grant::{AuthenticatedSubject, Credential, GrantKind, GrantRequest};
use crate::primitives::signer::TokenUse;

use super::validator::{Context, GrantValidator, Reject};

/// Extra claim marking refresh tokens of subjects which are not users of the registry.
pub(crate) const SUBJECT_TYPE: &str = "subject_type";
pub(crate) const SERVICE: &str = "service";

/// Validates a refresh token issued earlier by the same signer.
///
/// The token must be unexpired, issued for refreshing and to the requesting client. The subject
/// is resolved again so that current claims and entitlements apply. The scope of the original
/// grant is a ceiling, a refresh never widens it.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefreshGrant;

impl GrantValidator for RefreshGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::refresh()
    }

    fn attempt(&self, request: &GrantRequest, context: &Context) -> Result<AuthenticatedSubject, Reject> {
        let token = match &request.credential {
            Credential::Refresh { token } => token,
            _ => return Err(Reject::Malformed),
        };

        let claims = context
            .signer
            .verify_at(token, TokenUse::Refresh, context.now)
            .map_err(Reject::InvalidToken)?;

        if claims.aud != context.client.client_id {
            return Err(Reject::ForeignClient);
        }

        let subject = if claims.claims.get(SUBJECT_TYPE) == Some(SERVICE) {
            AuthenticatedSubject::service(&claims.sub)
        } else {
            let user = context
                .registry
                .find_user(&claims.sub)
                .ok_or(Reject::UnknownSubject)?;
            AuthenticatedSubject::user(&user)
        };

        Ok(subject.narrowed_to(&claims.scope))
    }
}
