// Configuration management with layered configuration (defaults, file, env)

use crate::errors::{ScheduleError, ValidationError};
use crate::schedule::{parse_schedule, parse_timezone};
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

/// Definition of the single pipeline this runner executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Source tree copied into every run's workspace
    pub source_dir: String,
    /// Parent directory of per-run workspaces
    pub workspace_root: String,
    /// Directory holding run records
    pub state_dir: String,
    #[serde(default)]
    pub keep_workspace: bool,
    /// Entry names skipped during checkout, matched against every path component
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    pub trigger: TriggerConfig,
    pub runtime: RuntimeConfig,
    pub dependencies: DependenciesConfig,
    pub entry_point: EntryPointConfig,
    #[serde(default)]
    pub secrets: Vec<SecretBinding>,
    pub artifact: ArtifactConfig,
}

fn default_exclude() -> Vec<String> {
    vec![".git".to_string(), "target".to_string(), ".runs".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Five-field POSIX or seconds-precision cron expression
    pub cron: String,
    /// Timezone the cron expression is evaluated in
    #[serde(default = "default_timezone_name")]
    pub timezone: String,
    /// Timezone used only when logging local fire times
    #[serde(default = "default_display_timezone_name")]
    pub display_timezone: String,
    /// Whether out-of-band dispatch is allowed
    #[serde(default = "default_true")]
    pub manual: bool,
}

fn default_timezone_name() -> String {
    "UTC".to_string()
}

fn default_display_timezone_name() -> String {
    "Africa/Johannesburg".to_string()
}

fn default_true() -> bool {
    true
}

impl TriggerConfig {
    pub fn timezone(&self) -> Result<Tz, ScheduleError> {
        parse_timezone(&self.timezone)
    }

    pub fn display_timezone(&self) -> Result<Tz, ScheduleError> {
        parse_timezone(&self.display_timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub program: String,
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
    /// Pinned version prefix, e.g. "3" or "3.11"
    #[serde(default)]
    pub version: Option<String>,
}

fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenciesConfig {
    /// Installer command line; package names are appended
    pub installer: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default = "default_install_timeout")]
    pub timeout_seconds: u64,
}

fn default_install_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointConfig {
    /// Program to run; defaults to the runtime program
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

/// Binds a secret read from the runner's environment to a variable of the entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretBinding {
    /// Variable name the entry point sees
    pub name: String,
    /// Variable the value is read from; defaults to `name`
    #[serde(default)]
    pub from_env: Option<String>,
}

impl SecretBinding {
    pub fn source_var(&self) -> &str {
        self.from_env.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub name: String,
    /// Glob matched against file names in the workspace root
    pub path: String,
    #[serde(default)]
    pub if_no_files_found: IfNoFilesFound,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    90
}

/// What the upload stage does when the glob matches nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfNoFilesFound {
    #[default]
    Warn,
    Ignore,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend
    pub path: String,
    #[serde(default)]
    pub minio: Option<MinioConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    Minio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub claim_ttl_seconds: u64,
    pub prune_interval_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with built-in defaults so partial files are accepted
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        let pipeline = &self.pipeline;

        if pipeline.name.trim().is_empty() {
            return Err(ValidationError::MissingField("pipeline.name".to_string()));
        }
        if pipeline.source_dir.is_empty() {
            return Err(ValidationError::MissingField(
                "pipeline.source_dir".to_string(),
            ));
        }
        if pipeline.workspace_root.is_empty() {
            return Err(ValidationError::MissingField(
                "pipeline.workspace_root".to_string(),
            ));
        }

        // Trigger
        parse_schedule(&pipeline.trigger.cron)?;
        pipeline.trigger.timezone()?;
        pipeline.trigger.display_timezone()?;

        if pipeline.runtime.program.is_empty() {
            return Err(ValidationError::MissingField(
                "pipeline.runtime.program".to_string(),
            ));
        }
        if !pipeline.dependencies.packages.is_empty() && pipeline.dependencies.installer.is_empty()
        {
            return Err(ValidationError::MissingField(
                "pipeline.dependencies.installer".to_string(),
            ));
        }
        if pipeline.entry_point.timeout_seconds == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.entry_point.timeout_seconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if let Some(binding) = pipeline.secrets.iter().find(|s| s.name.is_empty()) {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.secrets".to_string(),
                reason: format!("binding from '{}' has an empty name", binding.source_var()),
            });
        }

        // Artifact
        if pipeline.artifact.name.trim().is_empty() {
            return Err(ValidationError::MissingField(
                "pipeline.artifact.name".to_string(),
            ));
        }
        if pipeline.artifact.path.trim().is_empty() {
            return Err(ValidationError::MissingField(
                "pipeline.artifact.path".to_string(),
            ));
        }
        if pipeline.artifact.path.contains('/') || pipeline.artifact.path.contains('\\') {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.artifact.path".to_string(),
                reason: "only file-name patterns in the workspace root are supported".to_string(),
            });
        }
        if pipeline.artifact.retention_days == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.artifact.retention_days".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        // Storage
        match self.storage.backend {
            StorageBackend::Filesystem if self.storage.path.is_empty() => {
                return Err(ValidationError::MissingField("storage.path".to_string()));
            }
            StorageBackend::Minio => match &self.storage.minio {
                None => {
                    return Err(ValidationError::MissingField("storage.minio".to_string()));
                }
                Some(minio) if minio.endpoint.is_empty() || minio.bucket.is_empty() => {
                    return Err(ValidationError::InvalidFieldValue {
                        field: "storage.minio".to_string(),
                        reason: "endpoint and bucket cannot be empty".to_string(),
                    });
                }
                Some(_) => {}
            },
            StorageBackend::Filesystem => {}
        }

        // Scheduler
        if self.scheduler.poll_interval_seconds == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "scheduler.poll_interval_seconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.scheduler.prune_interval_hours == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "scheduler.prune_interval_hours".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig {
                name: "weekly-crypto-report".to_string(),
                source_dir: ".".to_string(),
                workspace_root: ".runs/workspaces".to_string(),
                state_dir: ".runs/state".to_string(),
                keep_workspace: false,
                exclude: default_exclude(),
                trigger: TriggerConfig {
                    // 08:45 UTC every Thursday (10:45 in UTC+2)
                    cron: "45 8 * * 4".to_string(),
                    timezone: default_timezone_name(),
                    display_timezone: default_display_timezone_name(),
                    manual: true,
                },
                runtime: RuntimeConfig {
                    program: "python3".to_string(),
                    version_args: default_version_args(),
                    version: Some("3".to_string()),
                },
                dependencies: DependenciesConfig {
                    installer: vec![
                        "python3".to_string(),
                        "-m".to_string(),
                        "pip".to_string(),
                        "install".to_string(),
                    ],
                    packages: vec!["pycoingecko".to_string(), "pillow".to_string()],
                    timeout_seconds: default_install_timeout(),
                },
                entry_point: EntryPointConfig {
                    program: None,
                    args: vec!["main.py".to_string()],
                    timeout_seconds: 1800,
                },
                secrets: vec![SecretBinding {
                    name: "EMAIL_PASSWORD".to_string(),
                    from_env: None,
                }],
                artifact: ArtifactConfig {
                    name: "crypto-report".to_string(),
                    path: "Crypto_Report_*.png".to_string(),
                    if_no_files_found: IfNoFilesFound::Warn,
                    retention_days: default_retention_days(),
                },
            },
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                path: ".runs/artifacts".to_string(),
                minio: None,
            },
            scheduler: SchedulerConfig {
                poll_interval_seconds: 10,
                claim_ttl_seconds: 3600,
                prune_interval_hours: 24,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_pipeline_matches_weekly_report() {
        let settings = Settings::default();
        assert_eq!(settings.pipeline.trigger.cron, "45 8 * * 4");
        assert_eq!(settings.pipeline.artifact.name, "crypto-report");
        assert_eq!(settings.pipeline.artifact.path, "Crypto_Report_*.png");
        assert_eq!(settings.pipeline.secrets[0].source_var(), "EMAIL_PASSWORD");
        assert_eq!(
            settings.pipeline.dependencies.packages,
            vec!["pycoingecko", "pillow"]
        );
    }

    #[test]
    fn test_validation_catches_invalid_cron() {
        let mut settings = Settings::default();
        settings.pipeline.trigger.cron = "not a cron".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unknown_timezone() {
        let mut settings = Settings::default();
        settings.pipeline.trigger.display_timezone = "Mars/Olympus".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_nested_artifact_path() {
        let mut settings = Settings::default();
        settings.pipeline.artifact.path = "out/*.png".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_minio_backend_without_config() {
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackend::Minio;
        settings.storage.minio = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_timeout() {
        let mut settings = Settings::default();
        settings.pipeline.entry_point.timeout_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_if_no_files_found_deserializes_lowercase() {
        let value: IfNoFilesFound = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(value, IfNoFilesFound::Error);
        assert_eq!(IfNoFilesFound::default(), IfNoFilesFound::Warn);
    }
}
