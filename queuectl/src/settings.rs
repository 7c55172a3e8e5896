// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use airactionqueue::QueueConfig;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Prefix of environment variables overriding the configuration, e.g.
/// `AIRQUEUE_DATABASE__PATH` or `AIRQUEUE_QUEUE__MAX_RETRIES`.
const ENV_PREFIX: &str = "AIRQUEUE";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    /// Path of the SQLite database holding the queue
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("action_queue.db")
}

/// Loads the settings from an optional YAML file and the environment.
///
/// Environment variables take precedence over the file.
pub fn get_configuration(path: Option<&Path>) -> Result<Settings, ConfigError> {
    load(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load(path: Option<&Path>, environment: Environment) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
    }
    builder.add_source(environment).build()?.try_deserialize()
}
