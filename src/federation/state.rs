//! The anti-forgery state of a federated login.
//!
//! Nothing about a pending login is held in server memory. Instead the whole context is encoded
//! into the `state` parameter of the upstream redirect and authenticated with an HMAC. When the
//! upstream provider sends the user back, the context is recovered from the state alone.
use ring::hmac;
use ring::rand::SystemRandom;
use thiserror::Error;
use url::Url;

use base64::{decode_config, encode_config, URL_SAFE_NO_PAD};

use crate::primitives::Time;
use crate::primitives::scope::Scope;

/// Binds the sealed data to its use, a state can not be confused with any other token.
const TAG: &str = "federated-login";

/// Everything needed to continue a login after the upstream provider returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginContext {
    /// The client that initiated the login.
    pub client_id: String,

    /// Where the client expects the user to return, already bound to its registration.
    pub redirect_uri: Url,

    /// The scope the client asked for, `None` for the full permitted scope.
    pub scope: Option<Scope>,

    /// The nonce the upstream assertion must repeat.
    pub nonce: String,

    /// Expiry, in seconds since the unix epoch.
    pub until: i64,
}

/// Seals and opens login states with a secret key.
pub struct StateSealer {
    secret: hmac::Key,
}

/// Reasons a state was not accepted.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SealError {
    /// The state is not well formed or the tag does not verify.
    #[error("state is not authentic")]
    Forged,

    /// The login took longer than permitted.
    #[error("state expired")]
    Expired,

    /// The state could not be produced.
    #[error("state could not be sealed")]
    Unavailable,
}

#[derive(Serialize, Deserialize)]
struct SealedState(Vec<u8>, Vec<u8>);

impl StateSealer {
    /// Use a configured secret, for example shared by several instances behind a load balancer.
    pub fn new(secret: &[u8]) -> Self {
        StateSealer {
            secret: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// A sealer whose states are only valid for the program execution.
    pub fn ephemeral() -> Result<Self, SealError> {
        let secret = hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new())
            .map_err(|_| SealError::Unavailable)?;
        Ok(StateSealer { secret })
    }

    /// Encode and authenticate the context.
    pub fn seal(&self, context: &LoginContext) -> Result<String, SealError> {
        let message = rmp_serde::to_vec(&(TAG, context)).map_err(|_| SealError::Unavailable)?;
        let tag = hmac::sign(&self.secret, &message);
        let sealed = rmp_serde::to_vec(&SealedState(message, tag.as_ref().to_vec()))
            .map_err(|_| SealError::Unavailable)?;
        Ok(encode_config(&sealed, URL_SAFE_NO_PAD))
    }

    /// Verify and decode a state, rejecting it from its expiry on.
    pub fn open(&self, state: &str, now: Time) -> Result<LoginContext, SealError> {
        let decoded = decode_config(state, URL_SAFE_NO_PAD).map_err(|_| SealError::Forged)?;
        let SealedState(message, tag) = rmp_serde::from_slice(&decoded).map_err(|_| SealError::Forged)?;
        hmac::verify(&self.secret, &message, &tag).map_err(|_| SealError::Forged)?;

        let (used_as, context): (String, LoginContext) =
            rmp_serde::from_slice(&message).map_err(|_| SealError::Forged)?;
        if used_as != TAG {
            return Err(SealError::Forged);
        }

        if now.timestamp() >= context.until {
            return Err(SealError::Expired);
        }

        Ok(context)
    }
}
