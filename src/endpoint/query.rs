use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::iter::FromIterator;

use serde::de;
use serde::Deserializer;
use url::form_urlencoded;

use crate::primitives::grant::Parameters;

/// Allows access to the parameters of a form encoded token request.
///
/// Basically use any type of `HashMap` that maps 'str-likes' to 'str-likes', or parse the body
/// into a `NormalizedParameter` with `from_form`.
pub trait QueryParameter {
    /// Get the **unique** value associated with a key.
    ///
    /// If there are multiple values, return `None`. This prevents order dependent processing and
    /// confusion between different components who parse the request from different ends.
    fn unique_value(&self, key: &str) -> Option<Cow<str>>;

    /// Guarantees that one can grab an owned copy.
    fn normalize(&self) -> NormalizedParameter;
}

/// The query parameter normal form.
///
/// Internally a hashmap but this may change due to optimizations.
#[derive(Clone, Debug, Default)]
pub struct NormalizedParameter {
    /// The value is `None` if the key appeared at least twice.
    inner: HashMap<Cow<'static, str>, Option<Cow<'static, str>>>,
}

impl QueryParameter for NormalizedParameter {
    fn unique_value(&self, key: &str) -> Option<Cow<str>> {
        self.inner
            .get(key)
            .and_then(|val| val.as_ref().map(Cow::as_ref).map(Cow::Borrowed))
    }

    fn normalize(&self) -> NormalizedParameter {
        self.clone()
    }
}

impl NormalizedParameter {
    /// Create an empty map.
    pub fn new() -> Self {
        NormalizedParameter::default()
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &str) -> Self {
        form_urlencoded::parse(body.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    /// Insert a key-value-pair or mark key as dead if already present.
    ///
    /// Since each key must appear at most once, we do not remove it from the map but instead mark
    /// the key as having a duplicate entry.
    pub fn insert_or_poison(&mut self, key: Cow<'static, str>, val: Cow<'static, str>) {
        let unique_val = Some(val);
        self.inner
            .entry(key)
            .and_modify(|val| *val = None)
            .or_insert(unique_val);
    }

    /// The unique parameters whose key is not listed in `except`.
    pub fn extension_parameters(&self, except: &[&str]) -> Parameters {
        self.inner
            .iter()
            .filter(|&(key, _)| !except.contains(&&**key))
            .filter_map(|(key, val)| val.as_ref().map(|val| (key.to_string(), val.to_string())))
            .collect()
    }
}

impl<'de> de::Deserialize<'de> for NormalizedParameter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor(NormalizedParameter);

        impl<'a> de::Visitor<'a> for Visitor {
            type Value = NormalizedParameter;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a sequence of key-value-pairs")
            }

            fn visit_seq<A>(mut self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'a>,
            {
                while let Some((key, value)) = access.next_element::<(String, String)>()? {
                    self.0.insert_or_poison(key.into(), value.into())
                }

                Ok(self.0)
            }
        }

        let visitor = Visitor(NormalizedParameter::default());
        deserializer.deserialize_seq(visitor)
    }
}

impl<K, V> FromIterator<(K, V)> for NormalizedParameter
where
    K: Into<Cow<'static, str>>,
    V: Into<Cow<'static, str>>,
{
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut target = NormalizedParameter::default();
        iter.into_iter()
            .for_each(|(k, v)| target.insert_or_poison(k.into(), v.into()));
        target
    }
}

impl<K, V, S: BuildHasher> QueryParameter for HashMap<K, V, S>
where
    K: Borrow<str> + Eq + Hash,
    V: Borrow<str>,
{
    fn unique_value(&self, key: &str) -> Option<Cow<str>> {
        self.get(key).map(|value| Cow::Borrowed(value.borrow()))
    }

    fn normalize(&self) -> NormalizedParameter {
        self.iter()
            .map(|(key, val)| (key.borrow().to_string(), val.borrow().to_string()))
            .collect()
    }
}

impl<'a, Q: QueryParameter + 'a + ?Sized> QueryParameter for &'a Q {
    fn unique_value(&self, key: &str) -> Option<Cow<str>> {
        (**self).unique_value(key)
    }

    fn normalize(&self) -> NormalizedParameter {
        (**self).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_absent() {
        let params = NormalizedParameter::from_form("grant_type=password&scope=openid&scope=api&user%20name=a+b");
        assert_eq!(params.unique_value("grant_type").as_deref(), Some("password"));
        assert_eq!(params.unique_value("scope"), None);
        assert_eq!(params.unique_value("user name").as_deref(), Some("a b"));

        let collected: NormalizedParameter = vec![("scope", "openid"), ("scope", "api"), ("client_id", "webapp")]
            .into_iter()
            .collect();
        assert_eq!(collected.unique_value("scope"), None);
        assert_eq!(collected.unique_value("client_id").as_deref(), Some("webapp"));
        assert_eq!(collected.normalize().unique_value("scope"), None);
    }

    #[test]
    fn extension_parameters_skip_poisoned() {
        let params = NormalizedParameter::from_form("grant_type=custom&custom_credential=x&dup=1&dup=2");
        let extension = params.extension_parameters(&["grant_type"]);
        assert_eq!(extension.unique_value("custom_credential"), Some("x"));
        assert_eq!(extension.unique_value("dup"), None);
        assert_eq!(extension.unique_value("grant_type"), None);
    }
}
