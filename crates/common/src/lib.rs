//! Shared identifiers used across the statevault crates.

mod types;

pub use types::StoreId;

pub fn crate_info() -> &'static str {
    "statevault-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
