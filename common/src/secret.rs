// Secrets injected into the entry point's environment

use crate::config::SecretBinding;
use std::fmt;
use tracing::warn;

pub const MASK: &str = "***";

/// A named secret value. Debug and Display never reveal the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    name: String,
    value: String,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Environment variable name the value is exposed under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &MASK)
            .finish()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, MASK)
    }
}

/// Read every binding's value from the runner's environment.
/// Unset sources resolve to an empty value, matching how CI platforms inject
/// undefined secrets.
pub fn resolve_secrets(bindings: &[SecretBinding]) -> Vec<Secret> {
    bindings
        .iter()
        .map(|binding| {
            let value = std::env::var(binding.source_var()).unwrap_or_else(|_| {
                warn!(
                    secret = %binding.name,
                    source_env = %binding.source_var(),
                    "Secret source is not set, injecting an empty value"
                );
                String::new()
            });
            Secret::new(binding.name.clone(), value)
        })
        .collect()
}

/// Every variable a binding touches: the injected name and its source.
/// Stage processes have these removed from their inherited environment.
pub fn bound_env_vars(bindings: &[SecretBinding]) -> Vec<String> {
    let mut names: Vec<String> = bindings
        .iter()
        .flat_map(|binding| [binding.name.clone(), binding.source_var().to_string()])
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Replaces secret values in captured text
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    values: Vec<String>,
}

impl SecretMasker {
    pub fn new(secrets: &[Secret]) -> Self {
        let mut values: Vec<String> = secrets
            .iter()
            .map(|s| s.expose().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole
        values.sort_by(|a, b| b.len().cmp(&a.len()));
        values.dedup();
        Self { values }
    }

    pub fn mask(&self, text: &str) -> String {
        self.values
            .iter()
            .fold(text.to_string(), |acc, value| acc.replace(value.as_str(), MASK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_hide_value() {
        let secret = Secret::new("EMAIL_PASSWORD", "hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.to_string(), "EMAIL_PASSWORD=***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_masker_replaces_every_occurrence() {
        let masker = SecretMasker::new(&[Secret::new("A", "hunter2")]);
        assert_eq!(
            masker.mask("login hunter2 failed, retry hunter2"),
            "login *** failed, retry ***"
        );
    }

    #[test]
    fn test_masker_prefers_longest_value() {
        let masker = SecretMasker::new(&[Secret::new("A", "abc"), Secret::new("B", "abcdef")]);
        assert_eq!(masker.mask("xabcdefx"), "x***x");
    }

    #[test]
    fn test_masker_ignores_empty_values() {
        let masker = SecretMasker::new(&[Secret::new("A", "")]);
        assert_eq!(masker.mask("unchanged"), "unchanged");
    }

    #[test]
    fn test_resolve_secrets_reads_source_env() {
        std::env::set_var("SECRET_RS_TEST_SOURCE", "s3cr3t");
        let bindings = vec![
            SecretBinding {
                name: "EMAIL_PASSWORD".to_string(),
                from_env: Some("SECRET_RS_TEST_SOURCE".to_string()),
            },
            SecretBinding {
                name: "SECRET_RS_TEST_UNSET".to_string(),
                from_env: None,
            },
        ];
        let secrets = resolve_secrets(&bindings);
        assert_eq!(secrets[0].name(), "EMAIL_PASSWORD");
        assert_eq!(secrets[0].expose(), "s3cr3t");
        assert_eq!(secrets[1].expose(), "");
    }

    #[test]
    fn test_bound_env_vars_cover_name_and_source() {
        let bindings = vec![
            SecretBinding {
                name: "EMAIL_PASSWORD".to_string(),
                from_env: None,
            },
            SecretBinding {
                name: "SMTP_TOKEN".to_string(),
                from_env: Some("CI_SMTP_TOKEN".to_string()),
            },
        ];
        assert_eq!(
            bound_env_vars(&bindings),
            vec!["CI_SMTP_TOKEN", "EMAIL_PASSWORD", "SMTP_TOKEN"]
        );
    }
}
