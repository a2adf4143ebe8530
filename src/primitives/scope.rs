//! Defines the Scope type and parsing/formatting according to the rfc.
use std::{fmt, str};

use std::collections::BTreeSet;
use std::iter::FromIterator;

use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};

/// Scope of a token, a set of scope-tokens encoded with separation by spaces.
///
/// Tokens are kept ordered so that the string representation of equal scopes is equal as well.
/// This makes the `scope` claim of two tokens with the same grant byte-for-byte comparable.
#[derive(PartialEq, Eq, Clone, Debug, Default, Hash)]
pub struct Scope {
    tokens: BTreeSet<String>,
}

/// Whether a scope asserts facts about the subject or grants access to some resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// Releases claims about the user into the identity token, such as `openid` or `profile`.
    Identity,

    /// Grants access to an api.
    Resource,
}

/// A registered scope as known to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeDefinition {
    /// The scope token, unique within a registry.
    pub name: String,

    /// A human readable name for consent and login screens.
    pub display_name: String,

    /// Identity or resource scope.
    pub kind: ScopeKind,

    /// Claim types released into identity tokens when this scope is granted.
    pub claims: Vec<String>,
}

impl Scope {
    fn invalid_scope_char(ch: char) -> bool {
        match ch {
            '\x21' => false,
            ch if ch >= '\x23' && ch <= '\x5b' => false,
            ch if ch >= '\x5d' && ch <= '\x7e' => false,
            ' ' => false, // Space separator is a valid char
            _ => true,
        }
    }

    /// The empty scope, granting nothing.
    pub fn empty() -> Scope {
        Scope::default()
    }

    /// The scope tokens present in both scopes.
    pub fn intersect(&self, rhs: &Scope) -> Scope {
        Scope {
            tokens: self.tokens.intersection(&rhs.tokens).cloned().collect(),
        }
    }

    /// Test for a single scope token.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Whether no token at all is contained.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate over the individual scope tokens, in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

impl ScopeDefinition {
    /// An identity scope releasing the given claim types.
    pub fn identity(name: &str, display_name: &str, claims: &[&str]) -> Self {
        ScopeDefinition {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: ScopeKind::Identity,
            claims: claims.iter().map(|claim| claim.to_string()).collect(),
        }
    }

    /// A resource scope, which releases no claims.
    pub fn resource(name: &str, display_name: &str) -> Self {
        ScopeDefinition {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: ScopeKind::Resource,
            claims: Vec::new(),
        }
    }

    /// Whether this scope asserts facts about the subject.
    pub fn is_identity(&self) -> bool {
        self.kind == ScopeKind::Identity
    }
}

/// Error returned from parsing a scope as encoded in a token request.
#[derive(Debug)]
pub struct ParseScopeErr;

impl str::FromStr for Scope {
    type Err = ParseScopeErr;

    fn from_str(string: &str) -> Result<Scope, ParseScopeErr> {
        if string.find(Scope::invalid_scope_char).is_some() {
            return Err(ParseScopeErr);
        }
        let tokens = string.split(' ').filter(|s| !s.is_empty());
        Ok(Scope {
            tokens: tokens.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for ParseScopeErr {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Encountered invalid character in scope token")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let output = self.iter().collect::<Vec<&str>>().join(" ");
        fmt.write_str(&output)
    }
}

impl<'a> FromIterator<&'a str> for Scope {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Scope {
            tokens: iter.into_iter().map(str::to_string).collect(),
        }
    }
}

impl FromIterator<String> for Scope {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Scope {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Scope, D::Error> {
        let as_string = String::deserialize(deserializer)?;
        as_string.parse().map_err(DeError::custom)
    }
}
