use medbridge_core::{EhrConfig, EhrRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// JWT secret used when none is configured. Development only.
pub const DEV_JWT_SECRET: &str = "medbridge-dev-secret-change-in-production";

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub smart: SmartSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt: JwtSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub secret: Option<String>,
    pub public_key_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub database: String,
}

/// SMART-on-FHIR client registration and EHR endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartSettings {
    pub client_id: String,
    pub redirect_uri: String,
    /// 32-byte key, base64 or hex. Tokens are stored unencrypted without it.
    pub encryption_key: Option<String>,
    pub http_timeout_secs: u64,
    /// Extra or overriding EHR endpoints, keyed by EHR id
    pub ehrs: HashMap<String, EhrConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database: "medbridge.sqlite".to_string(),
        }
    }
}

impl Default for SmartSettings {
    fn default() -> Self {
        Self {
            client_id: "medbridge-local-dev".to_string(),
            redirect_uri: "http://localhost:8000/api/fhir/callback".to_string(),
            encryption_key: None,
            http_timeout_secs: 30,
            ehrs: HashMap::new(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("MEDBRIDGE_PORT")
            && let Ok(port_num) = port.parse()
        {
            self.server.port = port_num;
        }

        if let Some(host) = var("MEDBRIDGE_HOST") {
            self.server.host = host;
        }

        if let Some(data_dir) = var("MEDBRIDGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(client_id) = var("SMART_CLIENT_ID") {
            self.smart.client_id = client_id;
        }

        if let Some(redirect_uri) = var("SMART_REDIRECT_URI") {
            self.smart.redirect_uri = redirect_uri;
        }

        if let Some(key) = var("ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()) {
            self.smart.encryption_key = Some(key);
        }

        if let Some(secret) = var("JWT_SECRET").filter(|s| !s.is_empty()) {
            self.auth.jwt.secret = Some(secret);
        }
    }

    /// Get the full path to the database
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database)
    }

    /// Built-in EHRs with configured entries layered on top
    pub fn ehr_registry(&self) -> EhrRegistry {
        let mut registry = EhrRegistry::with_defaults();
        for (ehr, config) in &self.smart.ehrs {
            registry.insert(ehr.clone(), config.clone());
        }
        registry
    }

    /// Outbound HTTP timeout for token and FHIR requests
    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.smart.http_timeout_secs.max(1))
    }
}
