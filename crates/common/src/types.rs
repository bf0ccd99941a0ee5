use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a store. Doubles as its default persistence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StoreId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_id_displays_raw_string() {
        let id = StoreId::new("user");
        assert_eq!(id.to_string(), "user");
        assert_eq!(id.as_str(), "user");
    }

    #[test]
    fn store_id_from_str_and_string_agree() {
        assert_eq!(StoreId::from("cart"), StoreId::from(String::from("cart")));
    }
}
