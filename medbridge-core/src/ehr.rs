//! EHR endpoint registry
//!
//! Maps an EHR identifier to the SMART authorization endpoints, FHIR base URL
//! and scope string used when connecting a patient to that system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// Identifier for caller-supplied FHIR servers
pub const GENERIC_EHR: &str = "generic";

/// Scopes requested from every EHR unless configured otherwise
pub const DEFAULT_SCOPES: &str = "openid fhirUser patient/*.read launch/patient";

/// OAuth and FHIR endpoints for one EHR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EhrConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub fhir_base: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

impl EhrConfig {
    /// Derive well-known endpoints from the base URL of a generic FHIR server
    pub fn generic(fhir_url: &str) -> Self {
        let base = fhir_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/auth/authorize", base),
            token_url: format!("{}/auth/token", base),
            fhir_base: base.to_string(),
            scopes: default_scopes(),
        }
    }
}

/// Registry of known EHR systems
#[derive(Debug, Clone)]
pub struct EhrRegistry {
    known: HashMap<String, EhrConfig>,
}

impl Default for EhrRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EhrRegistry {
    /// Empty registry: only `generic` resolves
    pub fn new() -> Self {
        Self {
            known: HashMap::new(),
        }
    }

    /// Registry preloaded with the Epic and Cerner sandbox endpoints
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert(
            "epic",
            EhrConfig {
                authorize_url: "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/authorize"
                    .to_string(),
                token_url: "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/token".to_string(),
                fhir_base: "https://fhir.epic.com/interconnect-fhir-oauth/api/FHIR/R4".to_string(),
                scopes: default_scopes(),
            },
        );
        registry.insert(
            "cerner",
            EhrConfig {
                authorize_url: "https://authorization.cerner.com/tenants/ec2458f2-1e24-41c8-b71b-0e701af7583d/protocols/oauth2/profiles/smart-v1/personas/patient/authorize".to_string(),
                token_url: "https://authorization.cerner.com/tenants/ec2458f2-1e24-41c8-b71b-0e701af7583d/protocols/oauth2/profiles/smart-v1/token".to_string(),
                fhir_base: "https://fhir-open.cerner.com/r4/ec2458f2-1e24-41c8-b71b-0e701af7583d".to_string(),
                scopes: default_scopes(),
            },
        );
        registry
    }

    /// Add or replace the configuration for an EHR
    pub fn insert(&mut self, ehr: impl Into<String>, config: EhrConfig) {
        self.known.insert(ehr.into(), config);
    }

    /// Names of the statically configured EHRs, sorted
    pub fn known_ehrs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.known.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve an EHR identifier to its endpoints.
    ///
    /// Known identifiers win; `generic` needs `fhir_url` to derive endpoints.
    pub fn resolve(&self, ehr: &str, fhir_url: Option<&str>) -> Result<EhrConfig> {
        if let Some(config) = self.known.get(ehr) {
            return Ok(config.clone());
        }

        match fhir_url {
            Some(url) if ehr == GENERIC_EHR && !url.trim().is_empty() => {
                Ok(EhrConfig::generic(url.trim()))
            }
            _ => Err(CoreError::InvalidEhr {
                ehr: ehr.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_ehrs_resolve() {
        let registry = EhrRegistry::with_defaults();
        for ehr in ["epic", "cerner"] {
            let config = registry.resolve(ehr, None).unwrap();
            assert!(config.authorize_url.starts_with("https://"));
            assert!(config.token_url.starts_with("https://"));
            assert!(config.fhir_base.starts_with("https://"));
            assert_eq!(config.scopes, DEFAULT_SCOPES);
        }
    }

    #[test]
    fn test_known_ehr_ignores_fhir_url() {
        let registry = EhrRegistry::with_defaults();
        let config = registry.resolve("epic", Some("https://other.example")).unwrap();
        assert!(config.fhir_base.contains("fhir.epic.com"));
    }

    #[test]
    fn test_generic_requires_url() {
        let registry = EhrRegistry::with_defaults();
        let err = registry.resolve("generic", None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidEhr { ref ehr } if ehr == "generic"));

        assert!(registry.resolve("generic", Some("  ")).is_err());
    }

    #[test]
    fn test_generic_strips_trailing_slash() {
        let registry = EhrRegistry::with_defaults();
        let config = registry
            .resolve("generic", Some("https://host/api/"))
            .unwrap();
        assert_eq!(config.fhir_base, "https://host/api");
        assert_eq!(config.authorize_url, "https://host/api/auth/authorize");
        assert_eq!(config.token_url, "https://host/api/auth/token");
    }

    #[test]
    fn test_unknown_ehr() {
        let registry = EhrRegistry::with_defaults();
        assert!(registry.resolve("meditech", Some("https://host")).is_err());
    }

    #[test]
    fn test_configured_override() {
        let mut registry = EhrRegistry::with_defaults();
        registry.insert("epic", EhrConfig::generic("http://localhost:9000/fhir"));
        let config = registry.resolve("epic", None).unwrap();
        assert_eq!(config.token_url, "http://localhost:9000/fhir/auth/token");
        assert_eq!(registry.known_ehrs(), vec!["cerner", "epic"]);
    }
}
