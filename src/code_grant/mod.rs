//! Available backend algorithms.
//!
//! The backend codifies the requirements on token requests into a sequence of checks. The grant
//! validators judge a single credential each, the issuance engine runs the checks common to all
//! grants and signs the result. Neither knows about http, the `endpoint` module adapts form
//! encoded requests.
pub mod custom;
pub mod error;
pub mod external;
pub mod issuance;
pub mod password;
pub mod refresh;
pub mod validator;
