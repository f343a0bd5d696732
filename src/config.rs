//! Crate-wide settings.
//!
//! | Variable                 | Field           | Default   |
//! |--------------------------|-----------------|-----------|
//! | `GLCOMPOSE_GLSL_VERSION` | `glsl_version`  | `120`     |
//! | `GLCOMPOSE_SHADER_PATH`  | `shader_paths`  | empty     |
//!
//! The shader path uses the platform's path-list syntax (`:` on Unix, `;`
//! on Windows).

use std::ffi::OsString;
use std::path::PathBuf;

use crate::texture::{Filter, Wrap};

/// Environment variable overriding [`Config::glsl_version`].
pub const GLSL_VERSION_VAR: &str = "GLCOMPOSE_GLSL_VERSION";
/// Environment variable overriding [`Config::shader_paths`].
pub const SHADER_PATH_VAR: &str = "GLCOMPOSE_SHADER_PATH";

/// Settings shared by shaders, programs and textures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Version emitted in the `#version` preamble of compiled shaders.
    pub glsl_version: String,
    /// Directories searched for named shader sources.
    pub shader_paths: Vec<PathBuf>,
    /// Default filter for textures made through [`Config::texture`].
    pub filter: Filter,
    /// Default wrapping for textures made through [`Config::texture`].
    pub wrap: Wrap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            glsl_version: "120".to_owned(),
            shader_paths: Vec::new(),
            filter: Filter::default(),
            wrap: Wrap::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var_os(key))
    }

    /// Defaults overridden by whatever `lookup` returns.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let mut config = Self::default();
        if let Some(version) = lookup(GLSL_VERSION_VAR).and_then(|v| v.into_string().ok()) {
            let version = version.trim();
            if version.is_empty() {
                log::warn!("ignoring empty {GLSL_VERSION_VAR}");
            } else {
                version.clone_into(&mut config.glsl_version);
            }
        }
        if let Some(paths) = lookup(SHADER_PATH_VAR) {
            config.shader_paths = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        log::debug!(
            "GLSL version {}, {} shader path(s)",
            config.glsl_version,
            config.shader_paths.len()
        );
        config
    }

    /// Apply the default sampling to a texture.
    #[must_use]
    pub fn texture(&self, texture: crate::texture::Texture) -> crate::texture::Texture {
        texture.with_filter(self.filter).with_wrap(self.wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_vars(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.glsl_version, "120");
    }

    #[test]
    fn overrides() {
        let joined = std::env::join_paths(["/opt/shaders", "/usr/share/shaders"]).ok();
        let config = Config::from_vars(|key| match key {
            GLSL_VERSION_VAR => Some(" 330 core ".into()),
            SHADER_PATH_VAR => joined.clone(),
            _ => None,
        });
        assert_eq!(config.glsl_version, "330 core");
        assert_eq!(
            config.shader_paths,
            [PathBuf::from("/opt/shaders"), PathBuf::from("/usr/share/shaders")]
        );
    }

    #[test]
    fn blank_version_keeps_default() {
        let config = Config::from_vars(|key| (key == GLSL_VERSION_VAR).then(|| "  ".into()));
        assert_eq!(config.glsl_version, "120");
    }
}
