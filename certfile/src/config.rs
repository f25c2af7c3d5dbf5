// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{num::NonZeroUsize, path::PathBuf};

#[cfg(feature = "cli")]
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Configuration for the certificate installer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The directory the certificate files are installed in.
    ///
    /// The directory must already exist; it is never created. Once the installer starts,
    /// it is confined to this directory. The certificate, chain, and full chain are placed in
    /// it as `cert.pem`, `chain.pem`, and `fullchain.pem` respectively.
    ///
    /// Defaults to "/etc/ssl/acme" if not set.
    #[serde(default = "default_certificate_directory")]
    pub certificate_directory: PathBuf,

    /// The largest certificate or chain, in bytes, that will be accepted from the producer.
    ///
    /// If this is not set, there is no limit.
    #[serde(default)]
    pub max_artifact_size: Option<NonZeroUsize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            certificate_directory: default_certificate_directory(),
            max_artifact_size: None,
        }
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            toml::ser::to_string_pretty(&self).unwrap_or_default()
        )
    }
}

fn default_certificate_directory() -> PathBuf {
    PathBuf::from("/etc/ssl/acme")
}

#[cfg(feature = "cli")]
fn private_load_config<T>(path: &std::path::Path) -> anyhow::Result<T>
where
    T: Default + std::fmt::Display + serde::de::DeserializeOwned,
{
    let config = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read from path {path:?}"))?;
    tracing::info!(path=%path.display(), "Read from configuration file");
    toml::from_str(&config)
        .inspect_err(|error| {
            eprintln!("Failed to parse configuration loaded from {path:?}:\n{error}");
            eprintln!("Example config file:\n\n{}", T::default());
        })
        .context("configuration file is invalid")
}

/// Load the configuration with fallback options.
///
/// If `path` is [`None`], the `default` path, which should be relative to CONFIGURATION_DIRECTORY, is
/// checked.  If the default config doesn't exist, the [`Default`] implementation is returned. It's
/// expected that CONFIGURATION_DIRECTORY is set via systemd.
///
/// # Errors
///
/// In the event that one of the config files exists, but is invalid, an error is returned.
#[cfg(feature = "cli")]
pub fn load_config<T>(path: Option<PathBuf>, default: &std::path::Path) -> anyhow::Result<T>
where
    T: Default + std::fmt::Display + serde::de::DeserializeOwned,
{
    path.or_else(|| {
        std::env::var("CONFIGURATION_DIRECTORY")
            .inspect_err(|error| {
                tracing::warn!(
                    ?error,
                    "CONFIGURATION_DIRECTORY environment variable isn't readable"
                );
            })
            .map(PathBuf::from)
            .ok()
            .map(|base_path| base_path.join(default))
            .filter(|path| path.is_file())
    })
    .map_or_else(
        || {
            tracing::warn!("No configuration file found; using defaults");
            Ok(T::default())
        },
        |path| {
            tracing::info!(?path, "Attempting to load configuration");
            private_load_config::<T>(&path)
        },
    )
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn defaults_when_fields_missing() -> Result<()> {
        let config: Config = toml::from_str("")?;
        assert_eq!(config.certificate_directory, PathBuf::from("/etc/ssl/acme"));
        assert!(config.max_artifact_size.is_none());

        Ok(())
    }

    // The output of the `config` command must be loadable as a configuration file.
    #[test]
    fn display_round_trips() -> Result<()> {
        let config = Config {
            certificate_directory: PathBuf::from("/var/lib/acme/example.com"),
            max_artifact_size: NonZeroUsize::new(1024 * 1024),
        };
        let parsed: Config = toml::from_str(&config.to_string())?;
        assert_eq!(parsed.certificate_directory, config.certificate_directory);
        assert_eq!(parsed.max_artifact_size, config.max_artifact_size);

        Ok(())
    }

    #[test]
    fn zero_limit_rejected() {
        let result = toml::from_str::<Config>("max_artifact_size = 0");
        assert!(result.is_err());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn load_explicit_path() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("installer.toml");
        std::fs::write(
            &path,
            "certificate_directory = \"/srv/certs\"\nmax_artifact_size = 65536\n",
        )?;

        let config: Config = load_config(Some(path), std::path::Path::new("unused.toml"))?;
        assert_eq!(config.certificate_directory, PathBuf::from("/srv/certs"));
        assert_eq!(config.max_artifact_size, NonZeroUsize::new(65536));

        Ok(())
    }

    #[cfg(feature = "cli")]
    #[test]
    fn load_invalid_file() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("installer.toml");
        std::fs::write(&path, "certificate_directory = 42\n")?;

        let result = load_config::<Config>(Some(path), std::path::Path::new("unused.toml"));
        assert!(result.is_err());

        Ok(())
    }
}
