//! Resolving shader names to GLSL source.
//!
//! A string that already looks like code is used as is. Anything else is
//! treated as a name and resolved, in order, against the built-in sources,
//! the filesystem path it spells, and each configured search directory. A
//! name that resolves nowhere is returned unchanged and will fail later as
//! GLSL.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;

/// Translation by a `vec2` offset.
///
/// # Uniforms
///
/// | Name        | Type   | Description       |
/// |-------------|--------|-------------------|
/// | `translate` | `vec2` | Offset to add     |
pub const TRANSLATE_SRC: &str = r"uniform vec2 translate;

vec2 forward(vec2 position) { return position + translate; }

vec2 inverse(vec2 position) { return position - translate; }
";

/// Per-axis scaling.
///
/// # Uniforms
///
/// | Name    | Type   | Description         |
/// |---------|--------|---------------------|
/// | `scale` | `vec2` | Per-axis multiplier |
pub const SCALE_SRC: &str = r"uniform vec2 scale;

vec2 forward(vec2 position) { return position * scale; }

vec2 inverse(vec2 position) { return position / scale; }
";

/// Promotes a 2D position to homogeneous clip coordinates.
pub const POSITION_SRC: &str = r"vec4 position(vec2 xy) { return vec4(xy, 0.0, 1.0); }
";

/// Grayscale colormap over `[0, 1]`.
pub const GRAY_SRC: &str = r"vec4 colormap(float t) { return vec4(vec3(clamp(t, 0.0, 1.0)), 1.0); }
";

const BUILTINS: [(&str, &str); 4] = [
    ("transforms/translate.glsl", TRANSLATE_SRC),
    ("transforms/scale.glsl", SCALE_SRC),
    ("transforms/position.glsl", POSITION_SRC),
    ("colormaps/gray.glsl", GRAY_SRC),
];

/// Whether `text` is GLSL rather than a name.
#[must_use]
pub fn looks_like_code(text: &str) -> bool {
    text.contains(['\n', ';', '{'])
}

/// Name to source lookup.
#[derive(Clone, Debug, Default)]
pub struct ShaderLibrary {
    paths: Vec<PathBuf>,
}

impl ShaderLibrary {
    /// A library searching `paths` after the built-ins and literal paths.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// A library using [`Config::shader_paths`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.shader_paths.clone())
    }

    /// Search directories.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Built-in source registered under `name`.
    #[must_use]
    pub fn builtin(name: &str) -> Option<&'static str> {
        BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, src)| *src)
    }

    /// Source for `name_or_code`.
    ///
    /// # Errors
    ///
    /// [`Error::Io`](crate::Error::Io) when a matching file exists but
    /// cannot be read.
    pub fn get(&self, name_or_code: &str) -> Result<String> {
        if looks_like_code(name_or_code) {
            return Ok(name_or_code.to_owned());
        }
        if let Some(source) = Self::builtin(name_or_code) {
            return Ok(source.to_owned());
        }
        let literal = Path::new(name_or_code);
        let candidates = std::iter::once(literal.to_path_buf())
            .chain(self.paths.iter().map(|dir| dir.join(literal)));
        for candidate in candidates {
            if candidate.is_file() {
                log::debug!("loading shader `{name_or_code}` from {}", candidate.display());
                return Ok(std::fs::read_to_string(candidate)?);
            }
        }
        Ok(name_or_code.to_owned())
    }
}
