//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. The commerce backend
//! hands out opaque string identifiers, so the wrappers are string-backed.

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>` and `From<&str>` implementations
///
/// # Example
///
/// ```rust
/// # use sugarloaf_core::define_id;
/// define_id!(UserId);
/// define_id!(OrderId);
///
/// let user_id = UserId::new("U_1");
/// let order_id = OrderId::new("O_1");
///
/// // These are different types, so this won't compile:
/// // let _: UserId = order_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// View the underlying identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper, returning the underlying `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Numeric form of the identifier, when the backend used one.
            ///
            /// Backends that issue sequential numeric IDs allow ordering by
            /// identifier (e.g., promotion tie-breaking); non-numeric IDs
            /// return `None`.
            #[must_use]
            pub fn as_numeric(&self) -> Option<i64> {
                self.0.trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '_')
                    .parse()
                    .ok()
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Define standard entity IDs
define_id!(ProductId);
define_id!(VariantId);
define_id!(CustomerId);
define_id!(OrderId);
define_id!(PromotionId);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types() {
        let variant = VariantId::new("V_42");
        assert_eq!(variant.as_str(), "V_42");
        assert_eq!(variant.to_string(), "V_42");
    }

    #[test]
    fn test_serde_transparent() {
        let id = VariantId::new("V_7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"V_7\"");
        let back: VariantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_as_numeric_plain() {
        assert_eq!(PromotionId::new("12").as_numeric(), Some(12));
    }

    #[test]
    fn test_as_numeric_prefixed() {
        assert_eq!(PromotionId::new("T_34").as_numeric(), Some(34));
    }

    #[test]
    fn test_as_numeric_opaque() {
        assert_eq!(PromotionId::new("a1b2-c3").as_numeric(), None);
    }
}
