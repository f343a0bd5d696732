//! Linked programs: shader stages plus their uniform and attribute tables.
//!
//! A program is addressed by name. [`Program::set`] looks the name up as,
//! in order, a hook of any stage, a uniform, an attribute, and finally the
//! unmangled name of a uniform or attribute declared by an attached
//! snippet, and routes the value accordingly:
//!
//! | Key        | Accepts                          | Effect                       |
//! |------------|----------------------------------|------------------------------|
//! | hook       | code, [`Snippet`]                | rebind, relink on next use   |
//! | uniform    | data, texture                    | upload on next use           |
//! | attribute  | [`BufferView`], float constant   | rebind on next use           |
//!
//! Uniform and attribute tables are rebuilt from the hooked sources every
//! time a hook or snippet changes; values survive for names that remain.
//! Activity and locations come from reflection after each link.

use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::backend::{ActiveVariable, Backend, DrawMode, Handle, ShaderStage, UniformData};
use crate::buffer::{Buffer, BufferView, SharedBuffer};
use crate::config::Config;
use crate::dtype::{DType, RecordLayout};
use crate::error::{Error, Result};
use crate::glsl;
use crate::library::ShaderLibrary;
use crate::resource::{GpuResource, ResourceState};
use crate::shader::{HookBinding, Shader};
use crate::snippet::Snippet;
use crate::texture::SharedTexture;
use crate::variable::{Attribute, AttributeBinding, Uniform, UniformValue};

/// Everything needed to build a [`Program`].
#[derive(Clone, Debug)]
pub struct ProgramDescriptor {
    /// Vertex stage: code or a library name.
    pub vertex: String,
    /// Fragment stage: code or a library name.
    pub fragment: String,
    /// Optional geometry stage: code or a library name.
    pub geometry: Option<String>,
    /// Allocate a zeroed vertex buffer of this many vertices, one `f32`
    /// field per attribute, and bind every attribute to it.
    pub count: Option<usize>,
    /// GLSL version for stages without a `#version` directive.
    pub version: String,
    /// Resolves stage names to source.
    pub library: ShaderLibrary,
}

impl ProgramDescriptor {
    /// Vertex and fragment stages with default settings.
    #[must_use]
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::from_config(vertex, fragment, &Config::default())
    }

    /// Vertex and fragment stages with the version and search paths of
    /// `config`.
    #[must_use]
    pub fn from_config(
        vertex: impl Into<String>,
        fragment: impl Into<String>,
        config: &Config,
    ) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
            geometry: None,
            count: None,
            version: config.glsl_version.clone(),
            library: ShaderLibrary::from_config(config),
        }
    }

    /// Add a geometry stage.
    #[must_use]
    pub fn with_geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    /// Allocate a vertex buffer of `count` vertices.
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// A value for [`Program::set`].
#[derive(Clone, Debug)]
pub enum ProgramValue {
    /// Literal GLSL for a hook.
    Code(String),
    /// A snippet for a hook.
    Snippet(Snippet),
    /// A uniform value, or a constant for an attribute.
    Uniform(UniformValue),
    /// An attribute source.
    Attribute(AttributeBinding),
}

impl ProgramValue {
    /// Short name of the value's kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Code(_) => "code",
            Self::Snippet(_) => "snippet",
            Self::Uniform(value) => value.kind(),
            Self::Attribute(binding) => binding.kind(),
        }
    }
}

impl From<&str> for ProgramValue {
    fn from(code: &str) -> Self {
        Self::Code(code.to_owned())
    }
}

impl From<String> for ProgramValue {
    fn from(code: String) -> Self {
        Self::Code(code)
    }
}

impl From<Snippet> for ProgramValue {
    fn from(snippet: Snippet) -> Self {
        Self::Snippet(snippet)
    }
}

impl From<&Snippet> for ProgramValue {
    fn from(snippet: &Snippet) -> Self {
        Self::Snippet(snippet.clone())
    }
}

impl From<BufferView> for ProgramValue {
    fn from(view: BufferView) -> Self {
        Self::Attribute(AttributeBinding::Buffer(view))
    }
}

impl From<AttributeBinding> for ProgramValue {
    fn from(binding: AttributeBinding) -> Self {
        Self::Attribute(binding)
    }
}

macro_rules! uniform_value_from {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for ProgramValue {
            fn from(value: $ty) -> Self {
                Self::Uniform(UniformValue::from(value))
            }
        })*
    };
}

uniform_value_from!(
    f32,
    [f32; 2],
    [f32; 3],
    [f32; 4],
    [f32; 9],
    [f32; 16],
    i32,
    [i32; 2],
    [i32; 3],
    [i32; 4],
    bool,
    UniformData,
    UniformValue,
    SharedTexture,
);

/// What a program key names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// A hook of at least one stage.
    Hook(String),
    /// A uniform, by its key in [`Program::uniforms`].
    Uniform(String),
    /// An attribute, by its key in [`Program::attributes`].
    Attribute(String),
    /// Nothing.
    NotFound,
}

/// Names a driver reports for one active variable, arrays expanded.
fn reported_names(variable: &ActiveVariable) -> Vec<String> {
    match variable.name.strip_suffix("[0]") {
        Some(base) => glsl::expand(base, Some(variable.size)),
        None if variable.size > 1 => glsl::expand(&variable.name, Some(variable.size)),
        None => vec![variable.name.clone()],
    }
}

/// A GPU program.
#[derive(Debug)]
pub struct Program {
    state: ResourceState,
    shaders: Vec<Shader>,
    uniforms: IndexMap<String, Uniform>,
    attributes: IndexMap<String, Attribute>,
    snippets: Vec<Snippet>,
    vertex_buffer: Option<SharedBuffer>,
}

impl Program {
    /// A program from vertex and fragment code or library names.
    ///
    /// # Errors
    ///
    /// As [`Program::with_descriptor`].
    pub fn new(vertex: &str, fragment: &str) -> Result<Self> {
        Self::with_descriptor(ProgramDescriptor::new(vertex, fragment))
    }

    /// A program as described.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when a stage file cannot be read, [`Error::Parse`] for
    /// malformed declarations, and the vertex buffer errors of
    /// [`Buffer::zeroed`] when `count` is set.
    pub fn with_descriptor(descriptor: ProgramDescriptor) -> Result<Self> {
        let ProgramDescriptor {
            vertex,
            fragment,
            geometry,
            count,
            version,
            library,
        } = descriptor;
        let build = |stage: ShaderStage, source: &str| -> Result<Shader> {
            Ok(Shader::from_library(stage, source, &library)?.with_version(version.clone()))
        };
        let mut shaders = vec![build(ShaderStage::Vertex, &vertex)?];
        if let Some(geometry) = &geometry {
            shaders.push(build(ShaderStage::Geometry, geometry)?);
        }
        shaders.push(build(ShaderStage::Fragment, &fragment)?);

        let mut program = Self {
            state: ResourceState::new(),
            shaders,
            uniforms: IndexMap::new(),
            attributes: IndexMap::new(),
            snippets: Vec::new(),
            vertex_buffer: None,
        };
        program.rebuild()?;
        if let Some(count) = count {
            program.allocate_vertices(count)?;
        }
        log::debug!(
            "program {}: {} uniform(s), {} attribute(s), hooks {:?}",
            program.id(),
            program.uniforms.len(),
            program.attributes.len(),
            program.hooks()
        );
        Ok(program)
    }

    fn allocate_vertices(&mut self, count: usize) -> Result<()> {
        let layout = self
            .attributes
            .values()
            .fold(RecordLayout::new(), |layout, attribute| {
                layout.field(attribute.name(), DType::F32, attribute.gtype().components())
            });
        let buffer = Buffer::zeroed(layout, count)?.shared();
        for attribute in self.attributes.values_mut() {
            if let Some(view) = BufferView::new(&buffer, attribute.name()) {
                attribute.set(AttributeBinding::Buffer(view))?;
            }
        }
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    /// Recompute the uniform and attribute tables from the hooked sources.
    fn rebuild(&mut self) -> Result<()> {
        let mut uniforms = IndexMap::new();
        let mut attributes = IndexMap::new();
        for shader in &self.shaders {
            for (name, gtype) in shader.uniforms()? {
                if uniforms.contains_key(&name) {
                    continue;
                }
                let uniform = match self.uniforms.swap_remove(&name) {
                    Some(uniform) if uniform.gtype() == gtype => uniform,
                    _ => Uniform::new(name.clone(), gtype),
                };
                uniforms.insert(name, uniform);
            }
            for (name, gtype) in shader.attributes()? {
                if attributes.contains_key(&name) {
                    continue;
                }
                let attribute = match self.attributes.swap_remove(&name) {
                    Some(attribute) if attribute.gtype() == gtype => attribute,
                    _ => Attribute::new(name.clone(), gtype),
                };
                attributes.insert(name, attribute);
            }
        }
        self.uniforms = uniforms;
        self.attributes = attributes;
        Ok(())
    }

    /// Stages in pipeline order.
    #[must_use]
    pub fn shaders(&self) -> &[Shader] {
        &self.shaders
    }

    /// The stage `stage`, if present.
    #[must_use]
    pub fn shader(&self, stage: ShaderStage) -> Option<&Shader> {
        self.shaders.iter().find(|s| s.stage() == stage)
    }

    /// Distinct hook names across stages.
    #[must_use]
    pub fn hooks(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for hook in self.shaders.iter().flat_map(Shader::hooks) {
            if !names.contains(&hook) {
                names.push(hook);
            }
        }
        names
    }

    /// Hooks still unbound in some stage.
    #[must_use]
    pub fn pending_hooks(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for hook in self.shaders.iter().flat_map(Shader::pending_hooks) {
            if !names.contains(&hook) {
                names.push(hook);
            }
        }
        names
    }

    /// Uniform table in declaration order.
    #[must_use]
    pub fn uniforms(&self) -> &IndexMap<String, Uniform> {
        &self.uniforms
    }

    /// One uniform.
    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    /// Attribute table in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &IndexMap<String, Attribute> {
        &self.attributes
    }

    /// One attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Vertex buffer allocated from [`ProgramDescriptor::count`].
    #[must_use]
    pub fn vertex_buffer(&self) -> Option<&SharedBuffer> {
        self.vertex_buffer.as_ref()
    }

    /// Attached snippets.
    #[must_use]
    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    fn reachable_snippets(&self) -> Vec<Snippet> {
        let mut out: Vec<Snippet> = Vec::new();
        for snippet in self.snippets.iter().flat_map(Snippet::snippets) {
            if !out.contains(&snippet) {
                out.push(snippet);
            }
        }
        out
    }

    /// Resolve a key. Unmangled snippet names resolve to the first attached
    /// snippet that declares them.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Lookup {
        if self.shaders.iter().any(|s| s.has_hook(name)) {
            return Lookup::Hook(name.to_owned());
        }
        if self.uniforms.contains_key(name) {
            return Lookup::Uniform(name.to_owned());
        }
        if self.attributes.contains_key(name) {
            return Lookup::Attribute(name.to_owned());
        }
        let split = name.find('[').unwrap_or(name.len());
        let (base, suffix) = name.split_at(split);
        for snippet in self.reachable_snippets() {
            let Some(mangled) = snippet.mangled(base) else {
                continue;
            };
            let key = format!("{mangled}{suffix}");
            if self.uniforms.contains_key(&key) {
                return Lookup::Uniform(key);
            }
            if self.attributes.contains_key(&key) {
                return Lookup::Attribute(key);
            }
        }
        Lookup::NotFound
    }

    /// Assign a hook, uniform or attribute by name.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownProgramKey`] when nothing is named `name`,
    /// [`Error::TypeMismatch`] when the value does not suit the key, and
    /// [`Error::Parse`] when a new hook binding leaves malformed
    /// declarations.
    pub fn set(&mut self, name: &str, value: impl Into<ProgramValue>) -> Result<()> {
        let value = value.into();
        match self.lookup(name) {
            Lookup::Hook(hook) => self.set_hook(&hook, value),
            Lookup::Uniform(key) => self.set_uniform(&key, value),
            Lookup::Attribute(key) => self.set_attribute(&key, value),
            Lookup::NotFound => Err(Error::UnknownProgramKey(name.to_owned())),
        }
    }

    fn set_hook(&mut self, hook: &str, value: ProgramValue) -> Result<()> {
        let binding = match value {
            ProgramValue::Code(code) => HookBinding::Code(code),
            ProgramValue::Snippet(snippet) => HookBinding::Snippet(snippet),
            other => {
                return Err(Error::TypeMismatch {
                    name: hook.to_owned(),
                    expected: "code or a snippet",
                    found: other.kind(),
                })
            }
        };
        let mut replaced = Vec::new();
        for shader in self.shaders.iter_mut().filter(|s| s.has_hook(hook)) {
            if let Some(HookBinding::Snippet(old)) = shader.set_hook(hook, binding.clone()) {
                replaced.push(old);
            }
        }
        for old in replaced {
            if !self.shaders.iter().any(|s| s.snippets().contains(&old)) {
                old.detach(self)?;
            }
        }
        match &binding {
            HookBinding::Snippet(snippet) => snippet.attach(self)?,
            HookBinding::Code(_) => self.rebuild()?,
        }
        self.state.invalidate_object();
        log::debug!("program {}: hook `{hook}` rebound", self.id());
        Ok(())
    }

    fn set_uniform(&mut self, key: &str, value: ProgramValue) -> Result<()> {
        let ProgramValue::Uniform(value) = value else {
            return Err(Error::TypeMismatch {
                name: key.to_owned(),
                expected: "a uniform value",
                found: value.kind(),
            });
        };
        let uniform = self
            .uniforms
            .get_mut(key)
            .ok_or_else(|| Error::UnknownProgramKey(key.to_owned()))?;
        uniform.set(value.clone())?;
        let active = uniform.is_active();
        if !active && self.state.handle().is_some() {
            log::warn!("uniform `{key}` is not used by program {}", self.id());
        }
        if let Some(owner) = self.reachable_snippets().into_iter().find(|s| s.owns(key)) {
            owner.set(key, value)?;
        }
        self.state.invalidate_data();
        Ok(())
    }

    fn set_attribute(&mut self, key: &str, value: ProgramValue) -> Result<()> {
        let found = value.kind();
        let binding = match value {
            ProgramValue::Attribute(binding) => Some(binding),
            ProgramValue::Uniform(UniformValue::Data(data)) => AttributeBinding::constant(data),
            _ => None,
        }
        .ok_or_else(|| Error::TypeMismatch {
            name: key.to_owned(),
            expected: "a buffer view or a float constant",
            found,
        })?;
        let attribute = self
            .attributes
            .get_mut(key)
            .ok_or_else(|| Error::UnknownProgramKey(key.to_owned()))?;
        attribute.set(binding)
    }

    /// Record an attached snippet and rebuild the tables.
    pub(crate) fn attach_snippet(&mut self, snippet: &Snippet) -> Result<()> {
        if !self.snippets.contains(snippet) {
            self.snippets.push(snippet.clone());
        }
        self.rebuild()
    }

    /// Forget an attached snippet and rebuild the tables.
    pub(crate) fn detach_snippet(&mut self, snippet: &Snippet) -> Result<()> {
        self.snippets.retain(|s| s != snippet);
        self.rebuild()
    }

    /// Vertices a non-indexed draw covers: the first active buffer-bound
    /// attribute's count, else the allocated vertex buffer's, else 0.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.attributes
            .values()
            .filter(|a| a.is_active())
            .find_map(Attribute::count)
            .or_else(|| self.vertex_buffer.as_ref().map(|b| b.borrow().count()))
            .unwrap_or(0)
    }

    /// Activate, draw and deactivate. With `indices`, draws every index of
    /// that buffer; otherwise [`Program::vertex_count`] vertices.
    ///
    /// # Errors
    ///
    /// Activation errors of the program, its stages, textures and buffers,
    /// and [`Error::TypeMismatch`] when `indices` is not an index buffer.
    pub fn draw(
        &mut self,
        gl: &mut dyn Backend,
        mode: DrawMode,
        indices: Option<&SharedBuffer>,
    ) -> Result<()> {
        self.activate(gl)?;
        let result = match indices {
            Some(indices) => draw_indexed(gl, mode, indices),
            None => {
                gl.draw_arrays(mode, 0, self.vertex_count());
                Ok(())
            }
        };
        self.deactivate(gl);
        result
    }

    fn link(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        for shader in &mut self.shaders {
            shader.activate(gl)?;
            if let Some(object) = shader.handle() {
                gl.attach_shader(handle, object);
            }
        }
        gl.link_program(handle).map_err(|log| {
            log::error!("program {handle} link failed: {log}");
            Error::Link(log)
        })?;
        self.reflect(gl, handle);
        Ok(())
    }

    fn reflect(&mut self, gl: &mut dyn Backend, handle: Handle) {
        let active: HashSet<String> = gl
            .active_uniforms(handle)
            .iter()
            .flat_map(reported_names)
            .collect();
        for (name, uniform) in &mut self.uniforms {
            let is_active = active.contains(name);
            let location = if is_active {
                gl.uniform_location(handle, name)
            } else {
                None
            };
            uniform.reflect(is_active, location);
        }

        let active: HashSet<String> = gl
            .active_attributes(handle)
            .iter()
            .flat_map(reported_names)
            .collect();
        for (name, attribute) in &mut self.attributes {
            let is_active = active.contains(name);
            let location = if is_active {
                gl.attribute_location(handle, name)
            } else {
                None
            };
            attribute.reflect(is_active, location);
        }
        log::debug!(
            "program {handle}: {} of {} uniform(s) and {} of {} attribute(s) active",
            self.uniforms.values().filter(|u| u.is_active()).count(),
            self.uniforms.len(),
            self.attributes.values().filter(|a| a.is_active()).count(),
            self.attributes.len()
        );
    }

    /// Pull uniform values set on attached snippets; returns whether any
    /// changed.
    fn sync_snippet_values(&mut self) -> Result<bool> {
        let mut changed = false;
        for snippet in &self.snippets {
            for (key, value) in snippet.uniform_values() {
                if let Some(uniform) = self.uniforms.get_mut(&key) {
                    changed |= uniform.set_if_changed(&value)?;
                }
            }
        }
        Ok(changed)
    }
}

fn draw_indexed(gl: &mut dyn Backend, mode: DrawMode, indices: &SharedBuffer) -> Result<()> {
    let mut indices = indices.borrow_mut();
    let Some(index_type) = indices.index_type() else {
        return Err(Error::TypeMismatch {
            name: "indices".to_owned(),
            expected: "an index buffer",
            found: "a vertex buffer",
        });
    };
    indices.activate(gl)?;
    gl.draw_elements(mode, indices.count(), index_type);
    Ok(())
}

impl GpuResource for Program {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }

    fn on_prepare(&mut self) -> Result<()> {
        let id = self.id();
        let unattached = self
            .reachable_snippets()
            .iter()
            .any(|s| !s.programs().contains(&id));
        let stale = self.shaders.iter().any(Shader::is_stale);
        if unattached || stale {
            // a bound snippet was recomposed after it was attached
            let roots = self.snippets.clone();
            for snippet in &roots {
                snippet.attach(self)?;
            }
            if roots.is_empty() {
                self.rebuild()?;
            }
        }
        if stale {
            log::debug!("program {id}: bound snippets changed, relinking");
            self.state.invalidate_object();
        }
        Ok(())
    }

    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
        let handle = gl.create_program()?;
        if let Err(err) = self.link(gl, handle) {
            gl.delete_program(handle);
            return Err(err);
        }
        Ok(handle)
    }

    fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        if self.sync_snippet_values()? {
            self.state.invalidate_data();
        }
        gl.use_program(Some(handle));

        let mut unit = 0;
        for uniform in self.uniforms.values_mut() {
            if !uniform.is_active() {
                continue;
            }
            let Some(UniformValue::Texture(texture)) = uniform.value() else {
                continue;
            };
            let texture = Rc::clone(texture);
            gl.active_texture_unit(unit);
            texture.borrow_mut().activate(gl)?;
            if uniform.bind_unit(unit) {
                self.state.invalidate_data();
            }
            unit += 1;
        }

        for attribute in self.attributes.values() {
            attribute.bind(gl)?;
        }
        Ok(())
    }

    fn on_unbind(&mut self, gl: &mut dyn Backend, _handle: Handle) {
        for attribute in self.attributes.values() {
            attribute.unbind(gl);
        }
        gl.use_program(None);
    }

    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
        gl.delete_program(handle);
        for shader in &mut self.shaders {
            shader.delete(gl);
        }
    }

    fn on_update(&mut self, gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        for uniform in self.uniforms.values_mut() {
            uniform.upload(gl);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{Call, HeadlessBackend, IndexType};
    use crate::library::TRANSLATE_SRC;
    use crate::texture::Texture;

    const VERTEX: &str = "attribute vec2 position;
attribute vec4 color;
varying vec4 v_color;
void main() {
    v_color = color;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

    const FRAGMENT: &str = "varying vec4 v_color;
uniform float gain;
void main() { gl_FragColor = v_color * gain; }
";

    const HOOKED_VERTEX: &str = "attribute vec2 position;
void main() {
    vec2 p = <first(position)>;
    vec2 q = <second(p)>;
    gl_Position = vec4(q, 0.0, 1.0);
}
";

    const PLAIN_FRAGMENT: &str = "void main() { gl_FragColor = vec4(1.0); }\n";

    fn set_uniform_calls(gl: &HeadlessBackend) -> Vec<Call> {
        gl.calls()
            .iter()
            .filter(|c| matches!(c, Call::SetUniform(..)))
            .cloned()
            .collect()
    }

    #[test]
    fn tables_come_from_every_stage() {
        let program = Program::new(VERTEX, FRAGMENT).unwrap();
        let uniforms: Vec<_> = program.uniforms().keys().cloned().collect();
        let attributes: Vec<_> = program.attributes().keys().cloned().collect();
        assert_eq!(uniforms, ["gain"]);
        assert_eq!(attributes, ["position", "color"]);
        assert!(program.hooks().is_empty());
        assert_eq!(program.lookup("gain"), Lookup::Uniform("gain".to_owned()));
        assert_eq!(program.lookup("color"), Lookup::Attribute("color".to_owned()));
        assert_eq!(program.lookup("v_color"), Lookup::NotFound);
    }

    #[test]
    fn count_allocates_a_vertex_buffer() {
        let mut program =
            Program::with_descriptor(ProgramDescriptor::new(VERTEX, FRAGMENT).with_count(3)).unwrap();
        let buffer = Rc::clone(program.vertex_buffer().unwrap());
        assert_eq!(buffer.borrow().count(), 3);
        assert_eq!(buffer.borrow().stride(), 24);

        let mut gl = HeadlessBackend::new();
        program.set("gain", 0.5_f32).unwrap();
        program.draw(&mut gl, DrawMode::Triangles, None).unwrap();
        let calls = gl.calls();
        assert!(calls.contains(&Call::DrawArrays {
            mode: DrawMode::Triangles,
            first: 0,
            count: 3,
        }));
        assert!(calls.contains(&Call::EnableAttribute(0)));
        assert!(calls.contains(&Call::EnableAttribute(1)));
        let location = program.uniform("gain").unwrap().location().unwrap();
        assert!(calls.contains(&Call::SetUniform(location, UniformData::Float(0.5))));
    }

    #[test]
    fn indexed_draws_use_the_index_buffer() {
        let mut program =
            Program::with_descriptor(ProgramDescriptor::new(VERTEX, FRAGMENT).with_count(4)).unwrap();
        let indices = Buffer::index(&[0_u16, 1, 2, 2, 1, 3]).unwrap().shared();
        let mut gl = HeadlessBackend::new();
        program.draw(&mut gl, DrawMode::Triangles, Some(&indices)).unwrap();
        assert!(gl.calls().contains(&Call::DrawElements {
            mode: DrawMode::Triangles,
            count: 6,
            index_type: IndexType::U16,
        }));

        let vertices = Rc::clone(program.vertex_buffer().unwrap());
        assert!(matches!(
            program.draw(&mut gl, DrawMode::Triangles, Some(&vertices)),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn attributes_take_views_and_constants() {
        let mut program = Program::new(VERTEX, FRAGMENT).unwrap();
        let layout = RecordLayout::new().field("xy", DType::F32, 2);
        let buffer = Buffer::zeroed(layout, 5).unwrap().shared();
        program
            .set("position", BufferView::new(&buffer, "xy").unwrap())
            .unwrap();
        program.set("color", [1.0_f32, 0.0, 0.0, 1.0]).unwrap();
        assert!(matches!(
            program.set("color", "red"),
            Err(Error::TypeMismatch { .. })
        ));

        let mut gl = HeadlessBackend::new();
        program.set("gain", 1.0_f32).unwrap();
        program.draw(&mut gl, DrawMode::Points, None).unwrap();
        let calls = gl.calls();
        assert!(calls.contains(&Call::AttributeConstant(1, [1.0, 0.0, 0.0, 1.0])));
        assert!(calls.contains(&Call::DrawArrays {
            mode: DrawMode::Points,
            first: 0,
            count: 5,
        }));
    }

    #[test]
    fn unknown_keys_and_wrong_kinds() {
        let mut program = Program::new(VERTEX, FRAGMENT).unwrap();
        assert!(matches!(
            program.set("missing", 1.0_f32),
            Err(Error::UnknownProgramKey(name)) if name == "missing"
        ));
        assert!(matches!(
            program.set("gain", [1.0_f32, 2.0]),
            Err(Error::TypeMismatch { expected: "float", .. })
        ));
        assert!(matches!(
            program.set("gain", "1.0"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn inactive_uniforms_are_not_uploaded() {
        let mut gl = HeadlessBackend::new();
        gl.mark_inactive("gain");
        let mut program = Program::new(VERTEX, FRAGMENT).unwrap();
        program.activate(&mut gl).unwrap();
        assert!(!program.uniform("gain").unwrap().is_active());

        program.set("gain", 2.0_f32).unwrap();
        program.activate(&mut gl).unwrap();
        assert!(set_uniform_calls(&gl).is_empty());
    }

    #[test]
    fn link_failure_releases_the_program() {
        let mut gl = HeadlessBackend::new();
        gl.fail_link("error: main() not defined in fragment stage");
        let mut program = Program::new(VERTEX, FRAGMENT).unwrap();
        let err = program.activate(&mut gl).unwrap_err();
        assert!(matches!(err, Error::Link(ref log) if log.contains("main()")));
        assert!(program.handle().is_none());
        let created = gl
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::CreateProgram(h) => Some(*h),
                _ => None,
            })
            .unwrap();
        assert!(!gl.is_live(created));
    }

    #[test]
    fn unbound_hooks_block_activation() {
        let mut program = Program::new(HOOKED_VERTEX, PLAIN_FRAGMENT).unwrap();
        assert_eq!(program.hooks(), ["first", "second"]);
        assert_eq!(program.lookup("first"), Lookup::Hook("first".to_owned()));

        let mut gl = HeadlessBackend::new();
        let err = program.activate(&mut gl).unwrap_err();
        assert!(matches!(err, Error::PendingHooks { ref hooks, .. } if hooks == &["first", "second"]));

        program.set("first", "position").unwrap();
        program.set("second", "p * 0.5").unwrap();
        assert!(program.pending_hooks().is_empty());
        program.activate(&mut gl).unwrap();
        let vertex = program.shader(ShaderStage::Vertex).unwrap();
        let source = gl.shader_source(vertex.handle().unwrap()).unwrap();
        assert!(source.contains("vec2 q = p * 0.5;"));
    }

    #[test]
    fn hook_values_must_be_code_or_snippets() {
        let mut program = Program::new(HOOKED_VERTEX, PLAIN_FRAGMENT).unwrap();
        assert!(matches!(
            program.set("first", 1.0_f32),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn snippets_from_one_source_stay_distinct() {
        let first = Snippet::new(TRANSLATE_SRC).unwrap();
        let second = Snippet::new(TRANSLATE_SRC).unwrap();
        let mut program = Program::new(HOOKED_VERTEX, PLAIN_FRAGMENT).unwrap();
        program.set("first", &first).unwrap();
        program.set("second", &second).unwrap();

        let a = format!("translate_{}", first.id());
        let b = format!("translate_{}", second.id());
        assert!(program.uniform(&a).is_some() && program.uniform(&b).is_some());
        assert_eq!(program.lookup("translate"), Lookup::Uniform(a.clone()));
        assert_eq!(first.programs(), [program.id()]);

        let mut gl = HeadlessBackend::new();
        program.activate(&mut gl).unwrap();
        let vertex = program.shader(ShaderStage::Vertex).unwrap();
        let source = gl.shader_source(vertex.handle().unwrap()).unwrap();
        assert!(source.contains(&format!("vec2 p = forward_{}(position);", first.id())));
        assert!(source.contains(&format!("vec2 q = forward_{}(p);", second.id())));
        assert_eq!(source.matches("uniform vec2 translate_").count(), 2);
    }

    #[test]
    fn snippet_values_reach_the_program() {
        let first = Snippet::new(TRANSLATE_SRC).unwrap();
        let second = Snippet::new(TRANSLATE_SRC).unwrap();
        let mut program = Program::new(HOOKED_VERTEX, PLAIN_FRAGMENT).unwrap();
        program.set("first", &first).unwrap();
        program.set("second", &second).unwrap();

        let mut gl = HeadlessBackend::new();
        program.activate(&mut gl).unwrap();
        gl.take_calls();

        second.set("translate", [1.0_f32, 2.0]).unwrap();
        program.activate(&mut gl).unwrap();
        let key = format!("translate_{}", second.id());
        let location = program.uniform(&key).unwrap().location().unwrap();
        assert_eq!(
            set_uniform_calls(&gl),
            [Call::SetUniform(location, UniformData::Vec2([1.0, 2.0]))]
        );

        // through the program, by unmangled name, lands on the first snippet
        program.set("translate", [3.0_f32, 4.0]).unwrap();
        assert_eq!(first.get("translate"), Some(UniformValue::from([3.0_f32, 4.0])));
    }

    #[test]
    fn rebinding_a_hook_relinks_and_detaches() {
        let first = Snippet::new(TRANSLATE_SRC).unwrap();
        let other = Snippet::new(TRANSLATE_SRC).unwrap();
        let mut program = Program::new(HOOKED_VERTEX, PLAIN_FRAGMENT).unwrap();
        program.set("first", &first).unwrap();
        program.set("second", "p").unwrap();

        let mut gl = HeadlessBackend::new();
        program.activate(&mut gl).unwrap();
        let old = program.handle().unwrap();

        program.set("first", &other).unwrap();
        assert!(program.flags().needs_delete);
        assert!(first.programs().is_empty());
        assert_eq!(program.snippets(), [other.clone()]);
        assert!(program.uniform(&format!("translate_{}", first.id())).is_none());

        program.activate(&mut gl).unwrap();
        assert_ne!(program.handle().unwrap(), old);
        assert!(!gl.is_live(old));
    }

    #[test]
    fn samplers_get_consecutive_units() {
        let fragment = "uniform sampler2D base;
uniform sampler2D overlay;
void main() { gl_FragColor = texture2D(base, vec2(0.0)) + texture2D(overlay, vec2(0.0)); }
";
        let vertex = "attribute vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }\n";
        let mut program = Program::new(vertex, fragment).unwrap();
        let base = Texture::new_2d(2, 2, 4, DType::U8).unwrap().shared();
        let overlay = Texture::new_2d(2, 2, 1, DType::U8).unwrap().shared();
        program.set("base", Rc::clone(&base)).unwrap();
        program.set("overlay", Rc::clone(&overlay)).unwrap();
        assert!(matches!(program.set("base", 0_i32), Err(Error::TypeMismatch { .. })));

        let mut gl = HeadlessBackend::new();
        program.activate(&mut gl).unwrap();
        assert_eq!(program.uniform("base").unwrap().unit(), Some(0));
        assert_eq!(program.uniform("overlay").unwrap().unit(), Some(1));
        assert!(base.borrow().handle().is_some() && overlay.borrow().handle().is_some());

        let base_at = program.uniform("base").unwrap().location().unwrap();
        let overlay_at = program.uniform("overlay").unwrap().location().unwrap();
        let uploads = set_uniform_calls(&gl);
        assert!(uploads.contains(&Call::SetUniform(base_at, UniformData::Int(0))));
        assert!(uploads.contains(&Call::SetUniform(overlay_at, UniformData::Int(1))));
    }

    #[test]
    fn array_uniforms_expand() {
        let fragment = "uniform float weights[3];\nvoid main() { gl_FragColor = vec4(weights[0]); }\n";
        let vertex = "void main() { gl_Position = vec4(0.0); }\n";
        let mut program = Program::new(vertex, fragment).unwrap();
        program.set("weights[2]", 0.25_f32).unwrap();

        let mut gl = HeadlessBackend::new();
        program.activate(&mut gl).unwrap();
        let uniform = program.uniform("weights[2]").unwrap();
        assert!(uniform.is_active());
        assert_eq!(
            set_uniform_calls(&gl),
            [Call::SetUniform(uniform.location().unwrap(), UniformData::Float(0.25))]
        );
    }

    #[test]
    fn matrix_attributes_get_a_column_per_location() {
        let vertex = "attribute vec2 position;
attribute mat4 model;
void main() { gl_Position = model * vec4(position, 0.0, 1.0); }
";
        let mut program =
            Program::with_descriptor(ProgramDescriptor::new(vertex, PLAIN_FRAGMENT).with_count(2))
                .unwrap();
        assert_eq!(program.vertex_buffer().unwrap().borrow().stride(), 72);

        let mut gl = HeadlessBackend::new();
        program.draw(&mut gl, DrawMode::Points, None).unwrap();
        assert_eq!(program.attribute("model").unwrap().location(), Some(1));
        let enabled: Vec<_> = gl
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::EnableAttribute(index) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(enabled, [0, 1, 2, 3, 4]);
        assert!(gl.calls().contains(&Call::DrawArrays {
            mode: DrawMode::Points,
            first: 0,
            count: 2,
        }));
    }

    #[test]
    fn glsl_140_programs_reflect_stage_inputs() {
        let vertex = "#version 140
in vec2 a_position;
uniform vec2 u_offset;
out vec2 v_local;
void main() { v_local = a_position; gl_Position = vec4(a_position + u_offset, 0.0, 1.0); }
";
        let fragment = "#version 140
in vec2 v_local;
uniform vec4 u_color;
out vec4 frag_color;
void main() { frag_color = u_color * v_local.x; }
";
        let mut program = Program::new(vertex, fragment).unwrap();
        let uniforms: Vec<_> = program.uniforms().keys().cloned().collect();
        let attributes: Vec<_> = program.attributes().keys().cloned().collect();
        assert_eq!(uniforms, ["u_offset", "u_color"]);
        assert_eq!(attributes, ["a_position"]);

        let mut gl = HeadlessBackend::new();
        program.set("a_position", [0.5_f32, 0.5]).unwrap();
        program.activate(&mut gl).unwrap();
        assert!(program.attribute("a_position").unwrap().is_active());
        assert!(program.uniform("u_color").unwrap().is_active());
    }

    #[test]
    fn recomposing_a_bound_snippet_relinks() {
        let vertex = "attribute vec2 position;
void main() { gl_Position = vec4(<f(position)>, 0.0, 1.0); }
";
        let outer = Snippet::new("vec2 twice(vec2 p) { return p * 2.0; }").unwrap();
        let mut program = Program::new(vertex, PLAIN_FRAGMENT).unwrap();
        program.set("f", &outer).unwrap();

        let mut gl = HeadlessBackend::new();
        program.draw(&mut gl, DrawMode::Points, None).unwrap();
        let old = program.handle().unwrap();
        assert!(program.uniforms().is_empty());

        let inner = Snippet::new("uniform vec2 off; vec2 shift(vec2 p) { return p + off; }").unwrap();
        outer.call([&inner]).unwrap();
        program.draw(&mut gl, DrawMode::Points, None).unwrap();

        assert_ne!(program.handle().unwrap(), old);
        let submitted = program.shader(ShaderStage::Vertex).unwrap().submitted().unwrap();
        assert!(submitted.contains(&format!(
            "twice_{}(shift_{}(position))",
            outer.id(),
            inner.id()
        )));
        let off = format!("off_{}", inner.id());
        assert!(program.uniform(&off).unwrap().is_active());
        assert!(inner.programs().contains(&program.id()));
        program.set("off", [1.0_f32, 0.0]).unwrap();
        assert_eq!(inner.get("off"), Some(UniformValue::from([1.0_f32, 0.0])));
    }
}
