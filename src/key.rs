//! Deterministic resource keys
//!
//! A [`ResourceKey`] is the identity of one query: the resource name plus every
//! parameter that affects the response. Single-flight deduplication, caching and
//! invalidation are all keyed on it, so two rules must hold:
//!
//! - logically different queries never produce the same key, and
//! - semantically identical queries always produce the same key.
//!
//! The builder sorts parameters by name, so insertion order does not matter, and
//! escapes the separator characters in names and values so that no combination of
//! parameters can alias another.
//!
//! ```rust
//! use storefront_sync::key::ResourceKey;
//!
//! let a = ResourceKey::builder("predictions")
//!     .param("days", 30)
//!     .param("include_historical", true)
//!     .build();
//! let b = ResourceKey::builder("predictions")
//!     .param("include_historical", true)
//!     .param("days", 30)
//!     .build();
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "predictions:days=30:include_historical=true");
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc};

use rust_decimal::Decimal;

/// Opaque, cheaply clonable cache/single-flight key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Key for a resource that takes no parameters.
    pub fn new(resource: &str) -> Self {
        Self::builder(resource).build()
    }

    /// Start building a key for `resource`.
    pub fn builder(resource: &str) -> KeyBuilder {
        KeyBuilder {
            resource: escape(resource),
            params: BTreeMap::new(),
        }
    }

    /// The encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The resource name this key was built for (still escaped).
    pub fn resource(&self) -> &str {
        split_unescaped(&self.0).next().unwrap_or_default()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({})", self.0)
    }
}

/// Builder returned by [`ResourceKey::builder`].
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    resource: String,
    params: BTreeMap<String, String>,
}

impl KeyBuilder {
    /// Add a parameter. A later parameter with the same name replaces the earlier one.
    ///
    /// Parameters whose [`KeyParam::key_segment`] is `None` (e.g. `Option::None`) are
    /// omitted, so "not given" and "explicitly absent" are the same query.
    pub fn param(mut self, name: &str, value: impl KeyParam) -> Self {
        match value.key_segment() {
            Some(segment) => {
                self.params.insert(escape(name), escape(&segment));
            }
            None => {
                self.params.remove(&escape(name));
            }
        }
        self
    }

    pub fn build(self) -> ResourceKey {
        let mut encoded = self.resource;
        for (name, value) in &self.params {
            encoded.push(':');
            encoded.push_str(name);
            encoded.push('=');
            encoded.push_str(value);
        }
        ResourceKey(Arc::from(encoded))
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | ':' | '=') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn split_unescaped(encoded: &str) -> impl Iterator<Item = &str> {
    let mut escaped = false;
    encoded.split(move |ch: char| {
        if escaped {
            escaped = false;
            return false;
        }
        if ch == '\\' {
            escaped = true;
            return false;
        }
        ch == ':'
    })
}

/// Conversion of a parameter value into its key segment.
///
/// Implemented for primitives, strings, [`Decimal`] and `Option<T>`. Custom
/// types that implement `Display` can opt in with [`resource_param!`](crate::resource_param).
pub trait KeyParam {
    /// The canonical text for this value, or `None` to omit the parameter.
    fn key_segment(&self) -> Option<String>;
}

macro_rules! display_key_param {
    ($($type:ty),* $(,)?) => {
        $(
            impl KeyParam for $type {
                fn key_segment(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

display_key_param!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char, String, str,
);

impl KeyParam for f32 {
    fn key_segment(&self) -> Option<String> {
        // -0.0 and 0.0 are the same query
        Some(if *self == 0.0 { "0".to_string() } else { self.to_string() })
    }
}

impl KeyParam for f64 {
    fn key_segment(&self) -> Option<String> {
        Some(if *self == 0.0 { "0".to_string() } else { self.to_string() })
    }
}

impl KeyParam for Decimal {
    fn key_segment(&self) -> Option<String> {
        // 1.50 and 1.5 are the same query
        Some(self.normalize().to_string())
    }
}

impl<T: KeyParam + ?Sized> KeyParam for &T {
    fn key_segment(&self) -> Option<String> {
        (**self).key_segment()
    }
}

impl<T: KeyParam> KeyParam for Option<T> {
    fn key_segment(&self) -> Option<String> {
        self.as_ref().and_then(KeyParam::key_segment)
    }
}

/// Macro to enable a custom type to be used directly as a key parameter
///
/// The type must implement `Display`; its display text becomes the key segment.
///
/// # Example
///
/// ```rust
/// use storefront_sync::{key::ResourceKey, resource_param};
///
/// #[derive(Debug)]
/// struct ChartFormat(&'static str);
///
/// impl std::fmt::Display for ChartFormat {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str(self.0)
///     }
/// }
///
/// resource_param!(ChartFormat);
///
/// let key = ResourceKey::builder("predictions")
///     .param("chart_format", ChartFormat("line"))
///     .build();
/// assert_eq!(key.as_str(), "predictions:chart_format=line");
/// ```
#[macro_export]
macro_rules! resource_param {
    ($type:ty) => {
        impl $crate::key::KeyParam for $type {
            fn key_segment(&self) -> Option<String> {
                Some(self.to_string())
            }
        }
    };
}
