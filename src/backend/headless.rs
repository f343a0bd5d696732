//! A [`Backend`] that needs no GL context.
//!
//! Handles are plain counters, every call is appended to a log, and program
//! reflection is derived from the declarations of the attached shaders'
//! compiled source. Compile and link failures can be scripted per stage.

use std::collections::{HashMap, HashSet};

use super::{
    ActiveVariable, AttribPointer, Attachment, Backend, BufferTarget, DrawMode, Handle, IndexType,
    Location, SamplerParams, ShaderStage, TextureDesc, TextureRegion, TextureTarget, UniformData,
    Usage,
};
use crate::error::{Error, Result};
use crate::glsl::{self, Declaration, GlslType, Qualifier};

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Call {
    CreateBuffer(Handle),
    DeleteBuffer(Handle),
    BindBuffer(BufferTarget, Option<Handle>),
    AllocateBuffer { target: BufferTarget, size: usize, usage: Usage },
    UploadBuffer { target: BufferTarget, offset: usize, len: usize },
    CreateTexture(Handle),
    DeleteTexture(Handle),
    ActiveTextureUnit(u32),
    BindTexture(TextureTarget, Option<Handle>),
    TextureParameters(TextureTarget, SamplerParams),
    AllocateTexture(TextureDesc),
    UploadTexture { region: TextureRegion, len: usize },
    CreateShader(Handle, ShaderStage),
    DeleteShader(Handle),
    CompileShader(Handle),
    CreateProgram(Handle),
    DeleteProgram(Handle),
    AttachShader(Handle, Handle),
    DetachShader(Handle, Handle),
    LinkProgram(Handle),
    UseProgram(Option<Handle>),
    SetUniform(Location, UniformData),
    EnableAttribute(u32),
    DisableAttribute(u32),
    AttributePointer(u32, AttribPointer),
    AttributeConstant(u32, [f32; 4]),
    DrawArrays { mode: DrawMode, first: usize, count: usize },
    DrawElements { mode: DrawMode, count: usize, index_type: IndexType },
    CreateFramebuffer(Handle),
    DeleteFramebuffer(Handle),
    BindFramebuffer(Option<Handle>),
    AttachTexture(Attachment, Option<Handle>),
    AttachRenderbuffer(Attachment, Option<Handle>),
    CreateRenderbuffer(Handle),
    DeleteRenderbuffer(Handle),
    BindRenderbuffer(Option<Handle>),
    RenderbufferStorage { internal_format: u32, width: usize, height: usize },
}

#[derive(Default)]
struct ProgramRecord {
    shaders: Vec<Handle>,
    uniforms: Vec<ActiveVariable>,
    attributes: Vec<ActiveVariable>,
    locations: HashMap<String, Location>,
}

/// Context-free recording backend.
#[derive(Default)]
pub struct HeadlessBackend {
    calls: Vec<Call>,
    next_handle: u32,
    next_location: u32,
    lost: bool,
    sources: HashMap<Handle, (ShaderStage, String)>,
    programs: HashMap<Handle, ProgramRecord>,
    compile_failures: HashMap<ShaderStage, String>,
    link_failure: Option<String>,
    inactive: HashSet<String>,
    live: HashSet<Handle>,
}

impl HeadlessBackend {
    /// A backend with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            ..Self::default()
        }
    }

    /// Every call made so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Drain the call log.
    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    /// Source last compiled into `shader`.
    #[must_use]
    pub fn shader_source(&self, shader: Handle) -> Option<&str> {
        self.sources.get(&shader).map(|(_, s)| s.as_str())
    }

    /// Whether `handle` names an object that has been created and not
    /// deleted.
    #[must_use]
    pub fn is_live(&self, handle: Handle) -> bool {
        self.live.contains(&handle)
    }

    /// Simulate a lost context: every subsequent creation fails.
    pub fn lose_context(&mut self) {
        self.lost = true;
    }

    /// Make compilation of every shader of `stage` fail with `log`.
    pub fn fail_compile(&mut self, stage: ShaderStage, log: impl Into<String>) {
        self.compile_failures.insert(stage, log.into());
    }

    /// Make every link fail with `log`.
    pub fn fail_link(&mut self, log: impl Into<String>) {
        self.link_failure = Some(log.into());
    }

    /// Report a declared variable as unused by the linked program.
    pub fn mark_inactive(&mut self, name: impl Into<String>) {
        self.inactive.insert(name.into());
    }

    fn issue(&mut self, operation: &'static str) -> Result<Handle> {
        if self.lost {
            return Err(Error::driver(operation, "no current context"));
        }
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle);
        Ok(handle)
    }

    fn release(&mut self, handle: Handle) {
        self.live.remove(&handle);
    }

    /// Reflection as a driver would report it: arrays collapse to a single
    /// `name[0]` entry whose size is the array length.
    fn reflect(
        &self,
        shaders: &[Handle],
        wanted: impl Fn(&Declaration, ShaderStage) -> bool,
    ) -> Vec<ActiveVariable> {
        let mut seen = HashSet::new();
        let mut active = Vec::new();
        for (stage, source) in shaders.iter().filter_map(|s| self.sources.get(s)) {
            let Ok(declarations) = glsl::declarations(source) else {
                continue;
            };
            for decl in declarations {
                if !wanted(&decl, *stage) || self.inactive.contains(&decl.name) {
                    continue;
                }
                let Some(gtype) = GlslType::parse(&decl.type_name) else {
                    continue;
                };
                if !seen.insert(decl.name.clone()) {
                    continue;
                }
                let (name, size) = match decl.array {
                    Some(n) => (format!("{}[0]", decl.name), n),
                    None => (decl.name, 1),
                };
                active.push(ActiveVariable {
                    name,
                    gl_type: gtype.gl_enum(),
                    size,
                });
            }
        }
        active
    }
}

impl Backend for HeadlessBackend {
    fn create_buffer(&mut self) -> Result<Handle> {
        let handle = self.issue("create buffer")?;
        self.calls.push(Call::CreateBuffer(handle));
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: Handle) {
        self.release(buffer);
        self.calls.push(Call::DeleteBuffer(buffer));
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<Handle>) {
        self.calls.push(Call::BindBuffer(target, buffer));
    }

    fn allocate_buffer(&mut self, target: BufferTarget, size: usize, usage: Usage) {
        self.calls
            .push(Call::AllocateBuffer { target, size, usage });
    }

    fn upload_buffer(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
        self.calls.push(Call::UploadBuffer {
            target,
            offset,
            len: data.len(),
        });
    }

    fn create_texture(&mut self) -> Result<Handle> {
        let handle = self.issue("create texture")?;
        self.calls.push(Call::CreateTexture(handle));
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: Handle) {
        self.release(texture);
        self.calls.push(Call::DeleteTexture(texture));
    }

    fn active_texture_unit(&mut self, unit: u32) {
        self.calls.push(Call::ActiveTextureUnit(unit));
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<Handle>) {
        self.calls.push(Call::BindTexture(target, texture));
    }

    fn texture_parameters(&mut self, target: TextureTarget, params: SamplerParams) {
        self.calls.push(Call::TextureParameters(target, params));
    }

    fn allocate_texture(&mut self, desc: &TextureDesc) {
        self.calls.push(Call::AllocateTexture(*desc));
    }

    fn upload_texture(&mut self, region: &TextureRegion, data: &[u8]) {
        self.calls.push(Call::UploadTexture {
            region: *region,
            len: data.len(),
        });
    }

    fn create_shader(&mut self, stage: ShaderStage) -> Result<Handle> {
        let handle = self.issue("create shader")?;
        self.sources.insert(handle, (stage, String::new()));
        self.calls.push(Call::CreateShader(handle, stage));
        Ok(handle)
    }

    fn delete_shader(&mut self, shader: Handle) {
        self.release(shader);
        self.sources.remove(&shader);
        self.calls.push(Call::DeleteShader(shader));
    }

    fn compile_shader(&mut self, shader: Handle, source: &str) -> Result<(), String> {
        self.calls.push(Call::CompileShader(shader));
        let Some((stage, stored)) = self.sources.get_mut(&shader) else {
            return Err(format!("unknown shader {shader}"));
        };
        source.clone_into(stored);
        match self.compile_failures.get(stage) {
            Some(log) => Err(log.clone()),
            None => Ok(()),
        }
    }

    fn create_program(&mut self) -> Result<Handle> {
        let handle = self.issue("create program")?;
        self.programs.insert(handle, ProgramRecord::default());
        self.calls.push(Call::CreateProgram(handle));
        Ok(handle)
    }

    fn delete_program(&mut self, program: Handle) {
        self.release(program);
        self.programs.remove(&program);
        self.calls.push(Call::DeleteProgram(program));
    }

    fn attach_shader(&mut self, program: Handle, shader: Handle) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.shaders.push(shader);
        }
        self.calls.push(Call::AttachShader(program, shader));
    }

    fn detach_shader(&mut self, program: Handle, shader: Handle) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.shaders.retain(|&s| s != shader);
        }
        self.calls.push(Call::DetachShader(program, shader));
    }

    fn link_program(&mut self, program: Handle) -> Result<(), String> {
        self.calls.push(Call::LinkProgram(program));
        if let Some(log) = &self.link_failure {
            return Err(log.clone());
        }
        let shaders = self
            .programs
            .get(&program)
            .map(|r| r.shaders.clone())
            .ok_or_else(|| format!("unknown program {program}"))?;
        let uniforms = self.reflect(&shaders, |d, _| d.qualifier == Qualifier::Uniform);
        let attributes = self.reflect(&shaders, Declaration::is_attribute);
        if let Some(record) = self.programs.get_mut(&program) {
            record.uniforms = uniforms;
            record.attributes = attributes;
            record.locations.clear();
        }
        Ok(())
    }

    fn use_program(&mut self, program: Option<Handle>) {
        self.calls.push(Call::UseProgram(program));
    }

    fn active_uniforms(&mut self, program: Handle) -> Vec<ActiveVariable> {
        self.programs
            .get(&program)
            .map(|r| r.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_attributes(&mut self, program: Handle) -> Vec<ActiveVariable> {
        self.programs
            .get(&program)
            .map(|r| r.attributes.clone())
            .unwrap_or_default()
    }

    fn uniform_location(&mut self, program: Handle, name: &str) -> Option<Location> {
        let next = Location(self.next_location);
        let record = self.programs.get_mut(&program)?;
        let base = name.split('[').next().unwrap_or(name);
        if !record
            .uniforms
            .iter()
            .any(|u| u.name.split('[').next() == Some(base))
        {
            return None;
        }
        let location = *record.locations.entry(name.to_owned()).or_insert(next);
        if location == next {
            self.next_location += 1;
        }
        Some(location)
    }

    fn attribute_location(&mut self, program: Handle, name: &str) -> Option<u32> {
        // matrices take one location per column
        let record = self.programs.get(&program)?;
        let mut location = 0;
        for attribute in &record.attributes {
            if attribute.name == name {
                return u32::try_from(location).ok();
            }
            location += GlslType::from_gl_enum(attribute.gl_type).map_or(1, GlslType::columns);
        }
        None
    }

    fn set_uniform(&mut self, location: Location, data: &UniformData) {
        self.calls.push(Call::SetUniform(location, *data));
    }

    fn enable_attribute(&mut self, index: u32) {
        self.calls.push(Call::EnableAttribute(index));
    }

    fn disable_attribute(&mut self, index: u32) {
        self.calls.push(Call::DisableAttribute(index));
    }

    fn attribute_pointer(&mut self, index: u32, pointer: &AttribPointer) {
        self.calls.push(Call::AttributePointer(index, *pointer));
    }

    fn attribute_constant(&mut self, index: u32, value: [f32; 4]) {
        self.calls.push(Call::AttributeConstant(index, value));
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: usize, count: usize) {
        self.calls.push(Call::DrawArrays { mode, first, count });
    }

    fn draw_elements(&mut self, mode: DrawMode, count: usize, index_type: IndexType) {
        self.calls.push(Call::DrawElements {
            mode,
            count,
            index_type,
        });
    }

    fn create_framebuffer(&mut self) -> Result<Handle> {
        let handle = self.issue("create framebuffer")?;
        self.calls.push(Call::CreateFramebuffer(handle));
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: Handle) {
        self.release(framebuffer);
        self.calls.push(Call::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<Handle>) {
        self.calls.push(Call::BindFramebuffer(framebuffer));
    }

    fn attach_texture(&mut self, attachment: Attachment, texture: Option<Handle>) {
        self.calls.push(Call::AttachTexture(attachment, texture));
    }

    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: Option<Handle>) {
        self.calls
            .push(Call::AttachRenderbuffer(attachment, renderbuffer));
    }

    fn framebuffer_status(&mut self) -> u32 {
        ::glow::FRAMEBUFFER_COMPLETE
    }

    fn create_renderbuffer(&mut self) -> Result<Handle> {
        let handle = self.issue("create renderbuffer")?;
        self.calls.push(Call::CreateRenderbuffer(handle));
        Ok(handle)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: Handle) {
        self.release(renderbuffer);
        self.calls.push(Call::DeleteRenderbuffer(renderbuffer));
    }

    fn bind_renderbuffer(&mut self, renderbuffer: Option<Handle>) {
        self.calls.push(Call::BindRenderbuffer(renderbuffer));
    }

    fn renderbuffer_storage(&mut self, internal_format: u32, width: usize, height: usize) {
        self.calls.push(Call::RenderbufferStorage {
            internal_format,
            width,
            height,
        });
    }
}
