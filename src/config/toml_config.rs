use crate::core::ownership::OwnershipTable;
use crate::core::ConfigProvider;
use crate::utils::error::{ReconError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_DATABASE_PATH: &str = "./shipments.db";
pub const DEFAULT_SHIPMENT_ID_PREFIX: &str = "ocn-";
pub const DEFAULT_EDITOR: &str = "system";

const LOG_FORMATS: [&str; 2] = ["compact", "json"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub store: StoreConfig,
    pub identity: IdentityConfig,
    pub ownership: Option<OwnershipConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub shipment_id_prefix: String,
    /// Recorded as `updated_by` on every write.
    pub editor: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            shipment_id_prefix: DEFAULT_SHIPMENT_ID_PREFIX.to_string(),
            editor: DEFAULT_EDITOR.to_string(),
        }
    }
}

/// Explicit field ownership. Keys left out of both lists belong to Master.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipConfig {
    pub house: Vec<String>,
    pub master: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LOG_FORMATS[0].to_string(),
            verbose: false,
        }
    }
}

impl ReconConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ReconError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATABASE_PATH})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ReconError::ConfigValidationError {
            field: "environment".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_path("store.database_path", &self.store.database_path)?;
        validation::validate_non_empty_string(
            "identity.shipment_id_prefix",
            &self.identity.shipment_id_prefix,
        )?;
        validation::validate_non_empty_string("identity.editor", &self.identity.editor)?;

        if let Some(ownership) = &self.ownership {
            let known = OwnershipTable::known_keys();
            validation::validate_allowed_values("ownership.house", &ownership.house, &known)?;
            validation::validate_allowed_values("ownership.master", &ownership.master, &known)?;
            validation::validate_disjoint("ownership", &ownership.house, &ownership.master)?;
        }

        validation::validate_allowed_values(
            "logging.format",
            std::slice::from_ref(&self.logging.format),
            &LOG_FORMATS,
        )?;

        Ok(())
    }

    pub fn database_path(&self) -> &str {
        &self.store.database_path
    }

    pub fn uses_json_logs(&self) -> bool {
        self.logging.format == "json"
    }

    /// Command-line flags take precedence over the file.
    pub fn with_overrides(mut self, database: Option<String>, editor: Option<String>) -> Self {
        if let Some(path) = database {
            self.store.database_path = path;
        }
        if let Some(editor) = editor {
            self.identity.editor = editor;
        }
        self
    }
}

impl ConfigProvider for ReconConfig {
    fn shipment_id_prefix(&self) -> &str {
        &self.identity.shipment_id_prefix
    }

    fn editor(&self) -> &str {
        &self.identity.editor
    }

    fn ownership(&self) -> Result<OwnershipTable> {
        match &self.ownership {
            Some(lists) => OwnershipTable::from_lists(&lists.house, &lists.master),
            None => Ok(OwnershipTable::default()),
        }
    }
}

impl Validate for ReconConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
