//! Grant kinds defined by the embedding application.
use std::fmt;

use crate::primitives::grant::{AuthenticatedSubject, GrantKind, GrantRequest};
use crate::primitives::registry::Registry;

use super::validator::{Context, GrantValidator, Reject};

/// A grant kind whose credential is judged by a predicate.
///
/// The predicate receives the whole request, usually inspecting `Credential::Extension`, and
/// read-only access to the registry.
pub struct CustomGrant<F> {
    kind: GrantKind,
    predicate: F,
}

impl<F> CustomGrant<F>
where
    F: Fn(&GrantRequest, &dyn Registry) -> Result<AuthenticatedSubject, Reject> + Send + Sync,
{
    /// Handle the kind with the predicate.
    pub fn new(kind: GrantKind, predicate: F) -> Self {
        CustomGrant { kind, predicate }
    }
}

impl<F> GrantValidator for CustomGrant<F>
where
    F: Fn(&GrantRequest, &dyn Registry) -> Result<AuthenticatedSubject, Reject> + Send + Sync,
{
    fn kind(&self) -> GrantKind {
        self.kind.clone()
    }

    fn attempt(&self, request: &GrantRequest, context: &Context) -> Result<AuthenticatedSubject, Reject> {
        (self.predicate)(request, context.registry)
    }
}

impl<F> fmt::Debug for CustomGrant<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CustomGrant").field("kind", &self.kind).finish()
    }
}
