use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use wisp_storage::LatencyProfile;

pub const SETTINGS_DIRECTORY_NAME: &str = "wisp";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Default scope key for the single history surface the shell mounts.
pub const DEFAULT_SCOPE_KEY: &str = "history";

/// Surface tag the shell stamps onto its own title-typing events.
pub const DEFAULT_SURFACE_TAG: &str = "shell";

/// Settings that persist across shell restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellSettings {
    #[serde(default = "default_scope_key")]
    pub scope_key: String,
    #[serde(default = "default_surface_tag")]
    pub surface_tag: String,
    /// One of `disabled`, `fast`, `realistic`.
    #[serde(default = "default_latency")]
    pub latency: String,
    /// Directory holding the view-state file. Defaults to the platform data
    /// dir when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            scope_key: default_scope_key(),
            surface_tag: default_surface_tag(),
            latency: default_latency(),
            data_dir: None,
        }
    }
}

impl ShellSettings {
    pub fn latency_profile(&self) -> LatencyProfile {
        LatencyProfile::parse(&self.latency).unwrap_or_else(|| {
            tracing::warn!(
                "unknown latency profile '{}', falling back to '{}'",
                self.latency,
                LatencyProfile::default().name()
            );
            LatencyProfile::default()
        })
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
                .unwrap_or_else(|| PathBuf::from(".wisp"))
        })
    }

    pub fn normalized(mut self) -> Self {
        self.scope_key = self.scope_key.trim().to_string();
        if self.scope_key.is_empty() {
            self.scope_key = default_scope_key();
        }
        self.surface_tag = self.surface_tag.trim().to_string();
        if self.surface_tag.is_empty() {
            self.surface_tag = default_surface_tag();
        }
        self.latency = self.latency.trim().to_ascii_lowercase();
        if LatencyProfile::parse(&self.latency).is_none() {
            self.latency = default_latency();
        }
        self
    }
}

pub struct ShellSettingsStore {
    settings: Arc<ArcSwap<ShellSettings>>,
    config_path: PathBuf,
}

impl ShellSettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".wisp"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ShellSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ShellSettings) -> Result<(), SettingsError> {
        let normalized = settings.normalized();
        self.persist(&normalized)?;
        self.settings.store(Arc::new(normalized));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> ShellSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return ShellSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(ShellSettings::default())).merge(Json::file(path));

        match figment.extract::<ShellSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ShellSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ShellSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_scope_key() -> String {
    DEFAULT_SCOPE_KEY.to_string()
}

fn default_surface_tag() -> String {
    DEFAULT_SURFACE_TAG.to_string()
}

fn default_latency() -> String {
    LatencyProfile::default().name().to_string()
}
