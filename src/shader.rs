//! A single shader stage with hook placeholders.
//!
//! Hooks are `<name>` tokens left in the source for the caller to fill in,
//! either with literal code or with a [`Snippet`]. All hooks are replaced in
//! one pass over the original source, so text a binding brings in is never
//! scanned for further hooks. The code of every bound snippet (and of the
//! snippets it depends on) is inserted once, after the leading preprocessor
//! lines.
//!
//! A shader with unbound hooks refuses to compile. Compiler logs are parsed
//! into [`Diagnostic`]s; three vendor formats are understood:
//!
//! | Format                      | Example                                   |
//! |-----------------------------|-------------------------------------------|
//! | `file(line) : message`      | `0(12) : error C0000: syntax error`       |
//! | `ERROR: file:line: message` | `ERROR: 0:12: 'x' : undeclared identifier` |
//! | `file:line(col): message`   | `0:12(5): error: 'x' undeclared`          |

use std::fmt::Write as _;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::backend::{Backend, Handle, ShaderStage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::glsl::{self, Declaration, GlslType, Qualifier};
use crate::library::ShaderLibrary;
use crate::resource::{GpuResource, ResourceState};
use crate::snippet::{self, Snippet};

static PAREN_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\((\d+)\)\s*:\s*(.*)$").expect("static diagnostic pattern")
});

static ERROR_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*ERROR:\s*(\d+):(\d+):\s*(.*)$").expect("static diagnostic pattern")
});

static COLUMN_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+):(\d+)\((\d+)\):\s*(.*)$").expect("static diagnostic pattern")
});

/// Lines of source shown on each side of a failing line.
const CONTEXT_LINES: usize = 3;

/// One compiler message tied to a source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based line in the submitted source.
    pub line: usize,
    /// Message text after the location prefix.
    pub message: String,
}

/// Parse one compiler log line, or `None` if it is in no known format.
#[must_use]
pub fn parse_diagnostic(line: &str) -> Option<Diagnostic> {
    let (caps, line_group, message_group) = if let Some(caps) = COLUMN_DIAGNOSTIC.captures(line) {
        (caps, 2, 4)
    } else if let Some(caps) = ERROR_DIAGNOSTIC.captures(line) {
        (caps, 2, 3)
    } else {
        (PAREN_DIAGNOSTIC.captures(line)?, 2, 3)
    };
    Some(Diagnostic {
        line: caps[line_group].parse().ok()?,
        message: caps[message_group].trim().to_owned(),
    })
}

/// Parse a whole compiler log. Lines in no known format are skipped as long
/// as at least one line parses.
///
/// # Errors
///
/// [`Error::UnrecognizedDiagnostic`] when nothing in `log` parses.
pub fn parse_diagnostics(log: &str) -> Result<Vec<Diagnostic>> {
    let diagnostics: Vec<_> = log.lines().filter_map(parse_diagnostic).collect();
    if diagnostics.is_empty() {
        return Err(Error::UnrecognizedDiagnostic(log.trim().to_owned()));
    }
    Ok(diagnostics)
}

/// Numbered excerpt of `source` around 1-based `line`, with the line
/// itself marked.
#[must_use]
pub fn context(source: &str, line: usize) -> String {
    let first = line.saturating_sub(CONTEXT_LINES).max(1);
    let last = line + CONTEXT_LINES;
    let mut out = String::new();
    for (number, text) in (1..).zip(source.lines()) {
        if number < first || number > last {
            continue;
        }
        let marker = if number == line { '>' } else { ' ' };
        let _ = writeln!(out, "{marker}{number:>5} | {text}");
    }
    out
}

/// What a hook is replaced with.
#[derive(Clone, Debug)]
pub enum HookBinding {
    /// Literal GLSL.
    Code(String),
    /// A call to the snippet; its code is inserted into the shader.
    Snippet(Snippet),
}

impl HookBinding {
    fn replacement(&self, caps: &Captures<'_>) -> String {
        match self {
            Self::Code(code) => code.clone(),
            Self::Snippet(snippet) => {
                let function = caps.get(2).map(|m| m.as_str());
                let args = caps.get(3).map(|m| m.as_str().trim());
                snippet.mangled_call(function, args, false)
            }
        }
    }
}

impl From<&str> for HookBinding {
    fn from(code: &str) -> Self {
        Self::Code(code.to_owned())
    }
}

impl From<String> for HookBinding {
    fn from(code: String) -> Self {
        Self::Code(code)
    }
}

impl From<Snippet> for HookBinding {
    fn from(snippet: Snippet) -> Self {
        Self::Snippet(snippet)
    }
}

/// Byte offset just past the leading block of preprocessor and blank lines,
/// or 0 when the source does not start with a directive.
fn after_directives(source: &str) -> usize {
    let mut end = 0;
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            end = offset + line.len();
        } else if !trimmed.is_empty() {
            break;
        }
        offset += line.len();
    }
    end
}

/// One shader stage.
#[derive(Debug)]
pub struct Shader {
    state: ResourceState,
    stage: ShaderStage,
    source: String,
    version: String,
    bindings: IndexMap<String, HookBinding>,
    submitted: Option<String>,
}

impl Shader {
    /// A shader from GLSL source, using the default GLSL version.
    #[must_use]
    pub fn new(stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            state: ResourceState::new(),
            stage,
            source: source.into(),
            version: Config::default().glsl_version,
            bindings: IndexMap::new(),
            submitted: None,
        }
    }

    /// A shader whose source is code or a name resolved by `library`.
    ///
    /// # Errors
    ///
    /// Whatever [`ShaderLibrary::get`] returns.
    pub fn from_library(stage: ShaderStage, name: &str, library: &ShaderLibrary) -> Result<Self> {
        Ok(Self::new(stage, library.get(name)?))
    }

    /// Emit `#version version` unless the source has its own directive.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Pipeline stage.
    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Source as given, hooks unresolved.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source passed to the driver by the last compilation.
    #[must_use]
    pub fn submitted(&self) -> Option<&str> {
        self.submitted.as_deref()
    }

    /// Whether the last submitted source no longer matches what the current
    /// bindings produce, for instance after a bound snippet was recomposed.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match (&self.submitted, self.compile_source()) {
            (None, _) => false,
            (Some(submitted), Ok(current)) => *submitted != current,
            (Some(_), Err(_)) => true,
        }
    }

    /// Distinct hook names outside comments, in order of first appearance.
    #[must_use]
    pub fn hooks(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for token in glsl::hooks(&glsl::strip_comments(&self.source)) {
            if !names.contains(&token.name) {
                names.push(token.name);
            }
        }
        names
    }

    /// Whether the source declares hook `name`.
    #[must_use]
    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks().iter().any(|h| h == name)
    }

    /// Hooks with nothing bound.
    #[must_use]
    pub fn pending_hooks(&self) -> Vec<String> {
        self.hooks()
            .into_iter()
            .filter(|h| !self.bindings.contains_key(h))
            .collect()
    }

    /// Current binding of `name`.
    #[must_use]
    pub fn hook(&self, name: &str) -> Option<&HookBinding> {
        self.bindings.get(name)
    }

    /// Snippets bound to hooks, in binding order.
    #[must_use]
    pub fn snippets(&self) -> Vec<Snippet> {
        self.bindings
            .values()
            .filter_map(|b| match b {
                HookBinding::Snippet(s) => Some(s.clone()),
                HookBinding::Code(_) => None,
            })
            .collect()
    }

    /// Bind a hook and schedule recompilation; returns the previous binding.
    pub fn set_hook(
        &mut self,
        name: impl Into<String>,
        binding: impl Into<HookBinding>,
    ) -> Option<HookBinding> {
        let name = name.into();
        if !self.has_hook(&name) {
            log::warn!("binding hook <{name}> which the {:?} source never uses", self.stage);
        }
        self.state.invalidate_data();
        self.bindings.insert(name, binding.into())
    }

    /// Remove a hook binding.
    pub fn clear_hook(&mut self, name: &str) -> Option<HookBinding> {
        self.state.invalidate_data();
        self.bindings.shift_remove(name)
    }

    /// The source with comments removed, every bound hook replaced and
    /// snippet code inserted. Unbound hooks are left as they are.
    #[must_use]
    pub fn hooked_source(&self) -> String {
        let source = glsl::strip_comments(&self.source);
        let replaced = glsl::hook_pattern().replace_all(&source, |caps: &Captures<'_>| {
            match self.bindings.get(&caps[1]) {
                Some(binding) => binding.replacement(caps),
                None => caps[0].to_owned(),
            }
        });
        let code = snippet::code_of(&self.snippets());
        if code.is_empty() {
            return replaced.into_owned();
        }
        let at = after_directives(&replaced);
        let mut out = String::with_capacity(replaced.len() + code.len() + 1);
        out.push_str(&replaced[..at]);
        out.push_str(&code);
        if !code.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&replaced[at..]);
        out
    }

    /// The text handed to the driver: the hooked source behind a
    /// `#version` preamble.
    ///
    /// # Errors
    ///
    /// [`Error::PendingHooks`] while any hook is unbound.
    pub fn compile_source(&self) -> Result<String> {
        let pending = self.pending_hooks();
        if !pending.is_empty() {
            return Err(Error::PendingHooks {
                stage: self.stage,
                hooks: pending,
            });
        }
        let hooked = self.hooked_source();
        if hooked.trim_start().starts_with("#version") {
            return Ok(hooked);
        }
        Ok(format!("#version {}\n{hooked}", self.version))
    }

    fn variables(&self, wanted: impl Fn(&Declaration) -> bool) -> Result<Vec<(String, GlslType)>> {
        let mut out: Vec<(String, GlslType)> = Vec::new();
        for decl in glsl::declarations(&self.hooked_source())? {
            if !wanted(&decl) {
                continue;
            }
            let Some(gtype) = GlslType::parse(&decl.type_name) else {
                log::debug!("skipping `{}` of non-builtin type {}", decl.name, decl.type_name);
                continue;
            };
            for name in decl.expand() {
                if !out.iter().any(|(n, _)| *n == name) {
                    out.push((name, gtype));
                }
            }
        }
        Ok(out)
    }

    /// Declared uniforms, arrays expanded to `name[i]`.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for malformed declarations.
    pub fn uniforms(&self) -> Result<Vec<(String, GlslType)>> {
        self.variables(|d| d.qualifier == Qualifier::Uniform)
    }

    /// Declared attributes (`attribute`, or `in` in a vertex shader), arrays
    /// expanded to `name[i]`.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for malformed declarations.
    pub fn attributes(&self) -> Result<Vec<(String, GlslType)>> {
        self.variables(|d| d.is_attribute(self.stage))
    }

    fn compile_error(&self, source: &str, log: &str) -> Error {
        let diagnostics = match parse_diagnostics(log) {
            Ok(diagnostics) => diagnostics,
            Err(err) => return err,
        };
        for d in &diagnostics {
            log::error!("{:?} shader line {}: {}", self.stage, d.line, d.message);
        }
        let first = &diagnostics[0];
        let excerpt = context(source, first.line);
        log::error!("{excerpt}");
        Error::Compile {
            stage: self.stage,
            line: first.line,
            message: first.message.clone(),
            context: excerpt,
        }
    }
}

impl GpuResource for Shader {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }

    fn on_prepare(&mut self) -> Result<()> {
        if self.is_stale() {
            self.state.invalidate_data();
        }
        Ok(())
    }

    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
        gl.create_shader(self.stage)
    }

    fn on_bind(&mut self, _gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        Ok(())
    }

    fn on_unbind(&mut self, _gl: &mut dyn Backend, _handle: Handle) {}

    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
        gl.delete_shader(handle);
    }

    fn on_update(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        let source = self.compile_source()?;
        log::debug!("compiling {:?} shader {handle}", self.stage);
        let result = gl
            .compile_shader(handle, &source)
            .map_err(|log| self.compile_error(&source, &log));
        self.submitted = Some(source);
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    const FRAGMENT: &str = "uniform vec4 color;
void main() { gl_FragColor = <filter(color)>; }
";

    #[test]
    fn hooks_ignore_comments() {
        let shader = Shader::new(
            ShaderStage::Fragment,
            "// <commented>\nvoid main() { gl_FragColor = <color>; } /* <also> */",
        );
        assert_eq!(shader.hooks(), ["color"]);
    }

    #[test]
    fn pending_hooks_block_compilation() {
        let mut shader = Shader::new(ShaderStage::Fragment, FRAGMENT);
        let err = shader.compile_source().unwrap_err();
        assert!(matches!(
            err,
            Error::PendingHooks { stage: ShaderStage::Fragment, ref hooks } if hooks == &["filter"]
        ));

        shader.set_hook("filter", "vec4(1.0)");
        assert!(shader.pending_hooks().is_empty());
        let source = shader.compile_source().unwrap();
        assert!(source.starts_with("#version 120\n"));
        assert!(source.contains("gl_FragColor = vec4(1.0);"));
    }

    #[test]
    fn replacement_is_single_pass() {
        let mut shader = Shader::new(ShaderStage::Fragment, "void main() { <a>; }");
        shader.set_hook("a", "<b>");
        shader.set_hook("b", "never");
        assert_eq!(shader.hooked_source(), "void main() { <b>; }");
    }

    #[test]
    fn existing_version_directive_is_kept() {
        let shader = Shader::new(ShaderStage::Vertex, "#version 330 core\nvoid main() {}\n")
            .with_version("100");
        assert_eq!(
            shader.compile_source().unwrap(),
            "#version 330 core\nvoid main() {}\n"
        );
    }

    #[test]
    fn snippet_code_follows_directives() {
        let invert = Snippet::new("vec4 invert(vec4 c) { return vec4(1.0 - c.rgb, c.a); }").unwrap();
        let mut shader = Shader::new(
            ShaderStage::Fragment,
            format!("#extension GL_OES_standard_derivatives : enable\n{FRAGMENT}"),
        );
        shader.set_hook("filter", invert.clone());
        let hooked = shader.hooked_source();
        let name = format!("invert_{}", invert.id());
        let lines: Vec<&str> = hooked.lines().collect();
        assert!(lines[0].starts_with("#extension"));
        assert!(lines[1].starts_with(&format!("vec4 {name}(vec4 c)")));
        assert!(hooked.contains(&format!("gl_FragColor = {name}(color);")));
    }

    #[test]
    fn declarations_cover_snippet_uniforms() {
        let scale = Snippet::new("uniform float gain; vec4 amplify(vec4 c) { return c * gain; }")
            .unwrap();
        let mut shader = Shader::new(ShaderStage::Fragment, FRAGMENT);
        shader.set_hook("filter", scale.clone());
        let uniforms = shader.uniforms().unwrap();
        assert_eq!(
            uniforms,
            [
                (format!("gain_{}", scale.id()), GlslType::Float),
                ("color".to_owned(), GlslType::Vec4),
            ]
        );
    }

    #[test]
    fn arrays_expand() {
        let shader = Shader::new(
            ShaderStage::Vertex,
            "uniform float weights[3];\nattribute vec2 position;\nvoid main() {}",
        );
        let names: Vec<_> = shader.uniforms().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["weights[0]", "weights[1]", "weights[2]"]);
        assert_eq!(
            shader.attributes().unwrap(),
            [("position".to_owned(), GlslType::Vec2)]
        );
    }

    #[test]
    fn vendor_diagnostic_formats() {
        assert_eq!(
            parse_diagnostic("0(12) : error C0000: syntax error, unexpected '}'"),
            Some(Diagnostic {
                line: 12,
                message: "error C0000: syntax error, unexpected '}'".to_owned()
            })
        );
        assert_eq!(
            parse_diagnostic("ERROR: 0:7: 'foo' : undeclared identifier"),
            Some(Diagnostic {
                line: 7,
                message: "'foo' : undeclared identifier".to_owned()
            })
        );
        assert_eq!(
            parse_diagnostic("0:3(14): error: `bar' undeclared"),
            Some(Diagnostic {
                line: 3,
                message: "error: `bar' undeclared".to_owned()
            })
        );
        assert_eq!(parse_diagnostic("compilation terminated."), None);
        assert!(matches!(
            parse_diagnostics("something went wrong"),
            Err(Error::UnrecognizedDiagnostic(_))
        ));
    }

    #[test]
    fn context_marks_the_failing_line() {
        let source = (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let excerpt = context(&source, 2);
        let lines: Vec<&str> = excerpt.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "     1 | line 1");
        assert_eq!(lines[1], ">    2 | line 2");
        assert_eq!(lines[4], "     5 | line 5");
    }

    #[test]
    fn compile_failure_reports_line_and_context() {
        let mut gl = HeadlessBackend::new();
        gl.fail_compile(ShaderStage::Vertex, "ERROR: 0:2: 'pos' : undeclared identifier\n");
        let mut shader = Shader::new(ShaderStage::Vertex, "void main() {\n  gl_Position = pos;\n}\n");
        let err = shader.activate(&mut gl).unwrap_err();
        let Error::Compile { stage, line, message, context } = err else {
            panic!("expected a compile error, got {err:?}");
        };
        assert_eq!(stage, ShaderStage::Vertex);
        assert_eq!(line, 2);
        assert_eq!(message, "'pos' : undeclared identifier");
        assert!(context.contains(">    2 | void main() {"));
        assert!(shader.flags().needs_update);
    }

    #[test]
    fn hooks_in_comments_are_not_replaced() {
        let mut shader = Shader::new(
            ShaderStage::Fragment,
            "// uses <color>\nvoid main() { gl_FragColor = <color>; }",
        );
        assert_eq!(shader.pending_hooks(), ["color"]);
        shader.set_hook("color", "vec4(1.0)");
        let hooked = shader.hooked_source();
        assert_eq!(hooked.lines().count(), 2);
        assert_eq!(hooked.matches("vec4(1.0)").count(), 1);
        assert!(!hooked.contains("uses"));
    }

    #[test]
    fn glsl_140_stage_inputs() {
        let vertex = Shader::new(
            ShaderStage::Vertex,
            "#version 140\nin vec2 a_position;\nout vec2 v_local;\n\
             void main() { v_local = a_position; gl_Position = vec4(a_position, 0.0, 1.0); }",
        );
        assert!(vertex.uniforms().unwrap().is_empty());
        assert_eq!(
            vertex.attributes().unwrap(),
            [("a_position".to_owned(), GlslType::Vec2)]
        );

        let fragment = Shader::new(
            ShaderStage::Fragment,
            "#version 140\nin vec2 v_local;\nuniform vec4 u_color;\nout vec4 frag_color;\n\
             void main() { frag_color = u_color; }",
        );
        assert!(fragment.attributes().unwrap().is_empty());
        assert_eq!(
            fragment.uniforms().unwrap(),
            [("u_color".to_owned(), GlslType::Vec4)]
        );
    }

    #[test]
    fn recomposed_snippet_recompiles() {
        let mut gl = HeadlessBackend::new();
        let outer = Snippet::new("vec4 tint(vec4 c) { return c * 0.5; }").unwrap();
        let mut shader = Shader::new(ShaderStage::Fragment, FRAGMENT);
        shader.set_hook("filter", outer.clone());
        shader.activate(&mut gl).unwrap();
        assert!(!shader.is_stale());

        let inner = Snippet::new("vec4 invert(vec4 c) { return 1.0 - c; }").unwrap();
        outer.call([&inner]).unwrap();
        assert!(shader.is_stale());
        shader.activate(&mut gl).unwrap();
        assert!(!shader.is_stale());
        let handle = shader.handle().unwrap();
        assert!(gl
            .shader_source(handle)
            .unwrap()
            .contains(&format!("invert_{}(color)", inner.id())));
    }

    #[test]
    fn rebinding_recompiles() {
        let mut gl = HeadlessBackend::new();
        let mut shader = Shader::new(ShaderStage::Fragment, FRAGMENT);
        shader.set_hook("filter", "color");
        shader.activate(&mut gl).unwrap();
        let handle = shader.handle().unwrap();
        assert!(gl.shader_source(handle).unwrap().contains("= color;"));

        shader.set_hook("filter", "color.bgra");
        assert!(shader.flags().needs_update);
        shader.activate(&mut gl).unwrap();
        assert!(gl.shader_source(handle).unwrap().contains("= color.bgra;"));
    }
}
