//! NewType wrappers for the names that flow through a pick run.
//!
//! Bins, products and named robot poses are all plain strings on the wire;
//! wrapping them keeps a product name from being passed where a bin name is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Shelf bin identifier as used in the order file (e.g., "bin_A").
    BinName
);

newtype_string!(
    /// Product identifier as used in the order file (e.g., "oreo_mega_stuf").
    ///
    /// The same name may appear several times in one bin; each occurrence is
    /// a separate `Product`.
    ProductName
);

newtype_string!(
    /// Name of a stored joint configuration known to the motion service
    /// (e.g., "home", "right_dropoff").
    NamedPose
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_name_creation() {
        let bin = BinName::new("bin_A");
        assert_eq!(bin.as_str(), "bin_A");
        assert_eq!(bin.to_string(), "bin_A");
    }

    #[test]
    fn test_product_name_from_string() {
        let name: ProductName = "oreo_mega_stuf".into();
        assert_eq!(name.as_str(), "oreo_mega_stuf");

        let name: ProductName = String::from("crayola_64_ct").into();
        assert_eq!(name.into_inner(), "crayola_64_ct");
    }

    #[test]
    fn test_named_pose_serde() {
        let pose = NamedPose::new("home");
        let json = serde_json::to_string(&pose).unwrap();
        assert_eq!(json, "\"home\"");

        let parsed: NamedPose = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pose);
    }

    #[test]
    fn test_borrow_lookup() {
        use std::collections::BTreeMap;

        let mut bins = BTreeMap::new();
        bins.insert(BinName::new("bin_B"), 2);
        assert_eq!(bins.get("bin_B"), Some(&2));
        assert!(bins.get("bin_Z").is_none());
    }
}
