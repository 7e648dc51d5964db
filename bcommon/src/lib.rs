//! Shared primitives for the banter workspace crates.
//!
//! ```rust
//! use bcommon::{GenerationSettings, MetadataMap, SessionId};
//!
//! let session = SessionId::from("BANTER-SESSION|1234");
//! let mut metadata = MetadataMap::new();
//! metadata.insert("purpose".to_string(), "assistants".to_string());
//!
//! let settings = GenerationSettings::default().with_temperature(0.4);
//! assert_eq!(session.as_str(), "BANTER-SESSION|1234");
//! assert_eq!(settings.temperature, Some(0.4));
//! ```

pub mod future {
    //! Shared async future aliases.
    //!
    //! ```rust
    //! use bcommon::BoxFuture;
    //!
    //! fn str_len<'a>(value: &'a str) -> BoxFuture<'a, usize> {
    //!     Box::pin(async move { value.len() })
    //! }
    //!
    //! let _future = str_len("hello");
    //! ```

    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

pub mod context {
    //! Session identifier newtype and shared metadata map.
    //!
    //! ```rust
    //! use bcommon::{MetadataMap, SessionId};
    //!
    //! let session = SessionId::new("session-42");
    //! let mut metadata = MetadataMap::new();
    //! metadata.insert("order".to_string(), "ascending".to_string());
    //!
    //! assert_eq!(session.to_string(), "session-42");
    //! ```

    use std::collections::HashMap;
    use std::fmt::{Display, Formatter};

    pub type MetadataMap = HashMap<String, String>;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct SessionId(String);

    impl SessionId {
        pub fn new(value: impl Into<String>) -> Self {
            Self(value.into())
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl Display for SessionId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<String> for SessionId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    impl From<&str> for SessionId {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }
}

pub mod model {
    //! Generation settings shared by the generative backends.
    //!
    //! ```rust
    //! use bcommon::GenerationSettings;
    //!
    //! let settings = GenerationSettings::default()
    //!     .with_temperature(0.4)
    //!     .with_max_output_tokens(2048);
    //!
    //! assert_eq!(settings.temperature, Some(0.4));
    //! assert_eq!(settings.max_output_tokens, Some(2048));
    //! ```

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct GenerationSettings {
        pub temperature: Option<f32>,
        pub max_output_tokens: Option<u32>,
        pub top_p: Option<f32>,
        pub top_k: Option<u32>,
    }

    impl GenerationSettings {
        pub fn with_temperature(mut self, temperature: f32) -> Self {
            self.temperature = Some(temperature);
            self
        }

        pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
            self.max_output_tokens = Some(max_output_tokens);
            self
        }

        pub fn with_top_p(mut self, top_p: f32) -> Self {
            self.top_p = Some(top_p);
            self
        }

        pub fn with_top_k(mut self, top_k: u32) -> Self {
            self.top_k = Some(top_k);
            self
        }
    }
}

pub mod registry {
    //! Generic registry map wrapper used by runtime registries.
    //!
    //! ```rust
    //! use bcommon::Registry;
    //!
    //! let mut registry = Registry::new();
    //! registry.insert("gpt-4".to_string(), 8192_u32);
    //!
    //! assert_eq!(registry.get("gpt-4"), Some(&8192));
    //! assert!(registry.contains_key("gpt-4"));
    //! ```

    use std::borrow::Borrow;
    use std::collections::HashMap;
    use std::hash::Hash;

    #[derive(Debug, Clone)]
    pub struct Registry<K, V> {
        items: HashMap<K, V>,
    }

    impl<K, V> Default for Registry<K, V>
    where
        K: Eq + Hash,
    {
        fn default() -> Self {
            Self {
                items: HashMap::new(),
            }
        }
    }

    impl<K, V> Registry<K, V>
    where
        K: Eq + Hash,
    {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, key: K, value: V) -> Option<V> {
            self.items.insert(key, value)
        }

        pub fn get<Q>(&self, key: &Q) -> Option<&V>
        where
            K: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.items.get(key)
        }

        pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
        where
            K: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.items.remove(key)
        }

        pub fn contains_key<Q>(&self, key: &Q) -> bool
        where
            K: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.items.contains_key(key)
        }

        pub fn keys(&self) -> impl Iterator<Item = &K> {
            self.items.keys()
        }

        pub fn values(&self) -> impl Iterator<Item = &V> {
            self.items.values()
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }
    }
}

pub use context::{MetadataMap, SessionId};
pub use future::BoxFuture;
pub use model::GenerationSettings;
pub use registry::Registry;

#[cfg(test)]
mod tests {
    use super::{GenerationSettings, Registry, SessionId};

    #[test]
    fn session_id_round_trips_strings() {
        let session = SessionId::new("BANTER-SESSION|abc");

        assert_eq!(session.as_str(), "BANTER-SESSION|abc");
        assert_eq!(session.to_string(), "BANTER-SESSION|abc");
        assert_eq!(SessionId::from("x"), SessionId::new("x"));
    }

    #[test]
    fn generation_settings_builder_helpers_set_values() {
        let settings = GenerationSettings::default()
            .with_temperature(0.4)
            .with_max_output_tokens(2048)
            .with_top_p(1.0)
            .with_top_k(32);

        assert_eq!(settings.temperature, Some(0.4));
        assert_eq!(settings.max_output_tokens, Some(2048));
        assert_eq!(settings.top_p, Some(1.0));
        assert_eq!(settings.top_k, Some(32));
    }

    #[test]
    fn generic_registry_basic_lifecycle() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry.insert("gemini-pro".to_string(), 1_u32);
        assert_eq!(registry.get("gemini-pro"), Some(&1));
        assert!(registry.contains_key("gemini-pro"));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("gemini-pro");
        assert_eq!(removed, Some(1));
        assert!(registry.is_empty());
    }
}
