use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PrylockError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PrylockConfig {
    pub scan: ScanConfig,
    pub resolve: ResolveConfig,
}

impl PrylockConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), PrylockError> {
        self.scan.validate()?;
        self.resolve.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub initial_buffer_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            initial_buffer_bytes: 64 * 1024,
        }
    }
}

impl ScanConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), PrylockError> {
        if self.initial_buffer_bytes < 1024 {
            return Err(PrylockError::Config {
                message: "scan.initial_buffer_bytes 不能小于 1024".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolveConfig {
    pub name_buffer_bytes: usize,
    pub skip_object_types: Vec<u16>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            name_buffer_bytes: 2048,
            skip_object_types: Vec::new(),
        }
    }
}

impl ResolveConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), PrylockError> {
        if self.name_buffer_bytes < 512 {
            return Err(PrylockError::Config {
                message: "resolve.name_buffer_bytes 不能小于 512".to_string(),
            });
        }
        if self.name_buffer_bytes > 1024 * 1024 {
            return Err(PrylockError::Config {
                message: "resolve.name_buffer_bytes 不能大于 1048576".to_string(),
            });
        }
        Ok(())
    }
}

#[allow(clippy::missing_errors_doc)]
pub fn load_yaml_file(path: &Path) -> Result<PrylockConfig, PrylockError> {
    let text = std::fs::read_to_string(path)?;
    serde_yaml::from_str(text.as_str()).map_err(|e| PrylockError::Config {
        message: format!("解析配置失败: {e}"),
    })
}
