//! Per-provider API keys.

use std::collections::HashMap;

use genflow_core::error::GenerationError;
use genflow_core::types::ProviderKind;

/// API keys keyed by provider. `Debug` never prints the keys.
#[derive(Clone, Default)]
pub struct Credentials {
    keys: HashMap<ProviderKind, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `GENFLOW_<PROVIDER>_API_KEY` for every provider.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut credentials = Self::new();
        for kind in ProviderKind::ALL {
            if let Some(key) = lookup(&Self::env_var(kind)) {
                credentials.insert(kind, key);
            }
        }
        credentials
    }

    /// Environment variable holding `kind`'s key, e.g. `GENFLOW_SUTU_API_KEY`.
    pub fn env_var(kind: ProviderKind) -> String {
        format!("GENFLOW_{}_API_KEY", kind.as_str().to_ascii_uppercase())
    }

    /// Set a key. Blank keys are ignored.
    pub fn insert(&mut self, kind: ProviderKind, key: impl Into<String>) {
        let key = key.into().trim().to_string();
        if !key.is_empty() {
            self.keys.insert(kind, key);
        }
    }

    pub fn with(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        self.insert(kind, key);
        self
    }

    /// The key for `kind`, or a configuration error naming the variable.
    pub fn get(&self, kind: ProviderKind) -> Result<&str, GenerationError> {
        self.keys.get(&kind).map(String::as_str).ok_or_else(|| {
            GenerationError::Configuration(format!(
                "Missing API key for provider {kind} (set {})",
                Self::env_var(kind)
            ))
        })
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.keys.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("configured", &self.configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn env_var_names() {
        assert_eq!(Credentials::env_var(ProviderKind::Kie), "GENFLOW_KIE_API_KEY");
        assert_eq!(Credentials::env_var(ProviderKind::Yijia), "GENFLOW_YIJIA_API_KEY");
    }

    #[test]
    fn lookup_skips_blank_keys() {
        let credentials = Credentials::from_lookup(|name| match name {
            "GENFLOW_SUTU_API_KEY" => Some("sk-1".into()),
            "GENFLOW_DAYU_API_KEY" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(credentials.get(ProviderKind::Sutu).unwrap(), "sk-1");
        assert_eq!(credentials.configured(), vec![ProviderKind::Sutu]);
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let err = Credentials::new().get(ProviderKind::Yunwu).unwrap_err();
        assert_matches!(err, GenerationError::Configuration(ref msg) if msg.contains("GENFLOW_YUNWU_API_KEY"));
    }

    #[test]
    fn debug_hides_keys() {
        let credentials = Credentials::new().with(ProviderKind::Kie, "sk-secret");
        assert!(!format!("{credentials:?}").contains("sk-secret"));
    }
}
