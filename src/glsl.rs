//! Just enough GLSL scanning to compose shaders at runtime.
//!
//! This is not a GLSL parser. It recognizes:
//!
//! - top-level declarations `qualifier type name[, name...];` where the
//!   qualifier is one of `uniform`, `attribute`, `varying`, `in`, `out`,
//!   `const`, `extern` or absent, optionally followed by a precision
//!   qualifier. `layout(...)` prefixes and interpolation qualifiers
//!   (`flat`, `smooth`, `centroid`...) are accepted and dropped;
//! - function definitions `type name(params) { body }` with balanced-brace
//!   body capture;
//! - hook tokens `<name>`, `<name(args)>`, `<name.function>` and
//!   `<name.function(args)>` anywhere in the source.
//!
//! Array suffixes must be positive integer literals; anything else is a
//! [`Error::Parse`]. So is a qualified declaration of a built-in type that
//! names nothing. Unqualified statements that are not declarations (and
//! interface blocks) are skipped.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backend::ShaderStage;
use crate::error::{Error, Result};

static HOOK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\s*([A-Za-z_]\w*)(?:\.([A-Za-z_]\w*))?(?:\(([^<>]*)\))?\s*>")
        .expect("static hook pattern")
});

static FUNCTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)\s+([A-Za-z_]\w*)\s*\(([^()]*)\)\s*\{")
        .expect("static function pattern")
});

static DECLARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(?:\[\s*([^\]]*?)\s*\])?$").expect("static declarator pattern")
});

static LAYOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\blayout\s*\([^()]*\)").expect("static layout pattern"));

const PRECISIONS: [&str; 3] = ["lowp", "mediump", "highp"];

const AUXILIARY: [&str; 7] = [
    "flat",
    "smooth",
    "noperspective",
    "centroid",
    "sample",
    "invariant",
    "precise",
];

/// Storage qualifier of a top-level declaration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// `uniform`.
    Uniform,
    /// `attribute`.
    Attribute,
    /// `varying`.
    Varying,
    /// `in`: an attribute in the vertex stage, a varying after it.
    In,
    /// `out`.
    Out,
    /// `const`.
    Const,
    /// `extern`.
    Extern,
    /// No qualifier (a plain global).
    Plain,
}

impl Qualifier {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "uniform" => Self::Uniform,
            "attribute" => Self::Attribute,
            "varying" => Self::Varying,
            "in" => Self::In,
            "out" => Self::Out,
            "const" => Self::Const,
            "extern" => Self::Extern,
            _ => return None,
        })
    }
}

/// One declared name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    /// Storage qualifier.
    pub qualifier: Qualifier,
    /// GLSL type name as written (`vec4`, `sampler2D`, a struct name...).
    pub type_name: String,
    /// Declared name, without array suffix.
    pub name: String,
    /// Array length for `name[N]`.
    pub array: Option<usize>,
}

impl Declaration {
    /// Individually addressable names: `name` for scalars, `name[0]` up to
    /// `name[N-1]` for arrays.
    #[must_use]
    pub fn expand(&self) -> Vec<String> {
        expand(&self.name, self.array)
    }

    /// Whether this is a per-vertex input of a `stage` shader.
    #[must_use]
    pub fn is_attribute(&self, stage: ShaderStage) -> bool {
        match self.qualifier {
            Qualifier::Attribute => true,
            Qualifier::In => stage == ShaderStage::Vertex,
            _ => false,
        }
    }
}

/// Per-element names of an array of length `len`, or `name` itself.
#[must_use]
pub fn expand(name: &str, len: Option<usize>) -> Vec<String> {
    match len {
        Some(n) => (0..n).map(|i| format!("{name}[{i}]")).collect(),
        None => vec![name.to_owned()],
    }
}

/// A function definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    /// Return type.
    pub return_type: String,
    /// Function name.
    pub name: String,
    /// Parameter list, without the parentheses.
    pub params: String,
    /// Body, without the outer braces.
    pub body: String,
}

/// An occurrence of a hook placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookToken {
    /// Hook name.
    pub name: String,
    /// Function selected with `<name.function>`.
    pub function: Option<String>,
    /// Arguments given with `<name(args)>`.
    pub args: Option<String>,
    /// Byte range of the whole token in the scanned text.
    pub range: Range<usize>,
}

/// Built-in GLSL types understood by reflection and uniform upload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum GlslType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    Bool,
    BVec2,
    BVec3,
    BVec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler1D,
    Sampler2D,
    SamplerCube,
}

const GLSL_TYPES: [(GlslType, &str, u32); 18] = [
    (GlslType::Float, "float", glow::FLOAT),
    (GlslType::Vec2, "vec2", glow::FLOAT_VEC2),
    (GlslType::Vec3, "vec3", glow::FLOAT_VEC3),
    (GlslType::Vec4, "vec4", glow::FLOAT_VEC4),
    (GlslType::Int, "int", glow::INT),
    (GlslType::IVec2, "ivec2", glow::INT_VEC2),
    (GlslType::IVec3, "ivec3", glow::INT_VEC3),
    (GlslType::IVec4, "ivec4", glow::INT_VEC4),
    (GlslType::Bool, "bool", glow::BOOL),
    (GlslType::BVec2, "bvec2", glow::BOOL_VEC2),
    (GlslType::BVec3, "bvec3", glow::BOOL_VEC3),
    (GlslType::BVec4, "bvec4", glow::BOOL_VEC4),
    (GlslType::Mat2, "mat2", glow::FLOAT_MAT2),
    (GlslType::Mat3, "mat3", glow::FLOAT_MAT3),
    (GlslType::Mat4, "mat4", glow::FLOAT_MAT4),
    (GlslType::Sampler1D, "sampler1D", glow::SAMPLER_1D),
    (GlslType::Sampler2D, "sampler2D", glow::SAMPLER_2D),
    (GlslType::SamplerCube, "samplerCube", glow::SAMPLER_CUBE),
];

impl GlslType {
    /// Look up a GLSL type name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        GLSL_TYPES.iter().find(|t| t.1 == name).map(|t| t.0)
    }

    /// Look up a reflected GL type enum.
    #[must_use]
    pub fn from_gl_enum(value: u32) -> Option<Self> {
        GLSL_TYPES.iter().find(|t| t.2 == value).map(|t| t.0)
    }

    /// The GLSL spelling.
    #[must_use]
    pub fn name(self) -> &'static str {
        GLSL_TYPES
            .iter()
            .find(|t| t.0 == self)
            .map_or("?", |t| t.1)
    }

    /// The GL enum reported by reflection.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        GLSL_TYPES.iter().find(|t| t.0 == self).map_or(0, |t| t.2)
    }

    /// Number of scalar components.
    #[must_use]
    pub fn components(self) -> usize {
        match self {
            Self::Float
            | Self::Int
            | Self::Bool
            | Self::Sampler1D
            | Self::Sampler2D
            | Self::SamplerCube => 1,
            Self::Vec2 | Self::IVec2 | Self::BVec2 => 2,
            Self::Vec3 | Self::IVec3 | Self::BVec3 => 3,
            Self::Vec4 | Self::IVec4 | Self::BVec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }

    /// Attribute locations a value of this type occupies: one per matrix
    /// column.
    #[must_use]
    pub fn columns(self) -> usize {
        match self {
            Self::Mat2 => 2,
            Self::Mat3 => 3,
            Self::Mat4 => 4,
            _ => 1,
        }
    }

    /// Whether values of this type are texture units.
    #[must_use]
    pub fn is_sampler(self) -> bool {
        matches!(self, Self::Sampler1D | Self::Sampler2D | Self::SamplerCube)
    }
}

/// Remove `//` and `/* */` comments. Newlines inside block comments are
/// kept so line numbers survive.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut last = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if last == '*' && c == '/' {
                        break;
                    }
                    last = c;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Every hook token in `source`, in order of appearance.
#[must_use]
pub fn hooks(source: &str) -> Vec<HookToken> {
    HOOK.captures_iter(source)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(HookToken {
                name: caps[1].to_owned(),
                function: caps.get(2).map(|m| m.as_str().to_owned()),
                args: caps.get(3).map(|m| m.as_str().trim().to_owned()),
                range: whole.range(),
            })
        })
        .collect()
}

pub(crate) fn hook_pattern() -> &'static Regex {
    &HOOK
}

/// Byte offset of the brace closing the one at `open`.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Function definitions at the top level of `source`.
#[must_use]
pub fn functions(source: &str) -> Vec<Function> {
    let text = strip_comments(source);
    let mut found = Vec::new();
    let mut resume = 0;
    for caps in FUNCTION_HEADER.captures_iter(&text) {
        let Some(whole) = caps.get(0) else { continue };
        // Headers nested in an earlier body are not top level.
        if whole.start() < resume {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = matching_brace(&text, open) else {
            break;
        };
        found.push(Function {
            return_type: caps[1].to_owned(),
            name: caps[2].to_owned(),
            params: caps[3].trim().to_owned(),
            body: text[open + 1..close].to_owned(),
        });
        resume = close + 1;
    }
    found
}

/// Replace every top-level `{ ... }` block with `;`.
fn strip_bodies(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '{' => {
                if depth == 0 {
                    out.push(';');
                }
                depth += 1;
            }
            '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Split on commas outside parentheses.
fn split_declarators(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_declarator(
    item: &str,
    qualifier: Qualifier,
    type_name: &str,
    statement: &str,
) -> Result<Declaration> {
    let item = item.split('=').next().unwrap_or(item).trim();
    let caps = DECLARATOR
        .captures(item)
        .ok_or_else(|| Error::Parse(format!("malformed declaration `{statement}`")))?;
    let array = match caps.get(2) {
        None => None,
        Some(len) => match len.as_str().parse::<usize>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                return Err(Error::Parse(format!(
                    "array length `{}` in `{statement}` is not a positive integer literal",
                    len.as_str()
                )))
            }
        },
    };
    Ok(Declaration {
        qualifier,
        type_name: type_name.to_owned(),
        name: caps[1].to_owned(),
        array,
    })
}

/// Top-level variable declarations of `source`, in order.
///
/// Comments, hook tokens, preprocessor lines, function bodies, prototypes,
/// `precision` statements, struct definitions and interface blocks are
/// ignored.
///
/// # Errors
///
/// [`Error::Parse`] for a qualified declaration that does not match the
/// accepted syntax, and for zero or non-literal array lengths.
pub fn declarations(source: &str) -> Result<Vec<Declaration>> {
    let text = strip_comments(source);
    let text = HOOK.replace_all(&text, "");
    let text: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    let text = LAYOUT.replace_all(&text, " ");
    let text = strip_bodies(&text);

    let mut found = Vec::new();
    for statement in text.split(';') {
        let statement = statement.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut words = statement
            .split(' ')
            .filter(|w| !w.is_empty() && !AUXILIARY.contains(w))
            .peekable();
        let Some(&first) = words.peek() else { continue };
        if matches!(first, "precision" | "struct") {
            continue;
        }
        let qualifier = Qualifier::parse(first);
        if qualifier.is_some() {
            words.next();
        }
        if words.peek().is_some_and(|w| PRECISIONS.contains(w)) {
            words.next();
        }
        let type_name = words.next().unwrap_or_default();
        let rest = words.collect::<Vec<_>>().join(" ");
        match qualifier {
            None => {
                // prototypes, expression statements, stray names after blocks
                if statement.contains('(') || rest.is_empty() {
                    continue;
                }
                let mut plain = Vec::new();
                for item in split_declarators(&rest) {
                    match parse_declarator(item, Qualifier::Plain, type_name, &statement) {
                        Ok(decl) => plain.push(decl),
                        Err(err) if is_bad_array(item) => return Err(err),
                        Err(_) => {
                            plain.clear();
                            break;
                        }
                    }
                }
                found.append(&mut plain);
            }
            Some(qualifier) => {
                if type_name.is_empty() {
                    return Err(Error::Parse(format!("missing type in `{statement}`")));
                }
                if rest.is_empty() {
                    // `uniform Block { ... } name;` leaves just the block name
                    if GlslType::parse(type_name).is_none() {
                        continue;
                    }
                    return Err(Error::Parse(format!("missing name in `{statement}`")));
                }
                if qualifier != Qualifier::Const && rest.contains('(') {
                    continue;
                }
                for item in split_declarators(&rest) {
                    found.push(parse_declarator(item, qualifier, type_name, &statement)?);
                }
            }
        }
    }
    Ok(found)
}

fn is_bad_array(item: &str) -> bool {
    let item = item.split('=').next().unwrap_or(item);
    DECLARATOR
        .captures(item.trim())
        .and_then(|caps| caps.get(2))
        .is_some()
}
