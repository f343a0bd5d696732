//! [`Backend`] implementation over a live OpenGL context via [glow].
//!
//! glow object names differ per platform (integers on desktop, JS objects on
//! the web), so this backend hands out its own [`Handle`]s and keeps a table
//! from handle to glow object for each object kind.
//!
//! [glow]: https://docs.rs/glow

use std::collections::HashMap;
use std::sync::Arc;

use ::glow::{HasContext, PixelUnpackData};

use super::{
    ActiveVariable, AttribPointer, Attachment, Backend, BufferTarget, DrawMode, Handle, IndexType,
    Location, SamplerParams, ShaderStage, TextureDesc, TextureRegion, TextureTarget, UniformData,
    Usage,
};
use crate::error::{Error, Result};

/// Convert a size or offset to the `i32` GL entry points expect.
///
/// Values past `i32::MAX` cannot be expressed to GL at all; they are clamped
/// and the driver reports the resulting error.
fn gl_int(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Reinterpret a GL enum as the `i32` that `tex_parameter_i32` and
/// `tex_image_*` take for enum-valued arguments.
#[expect(clippy::cast_possible_wrap)]
fn gl_enum_param(value: u32) -> i32 {
    // GL enum values are small enough that the cast is always safe.
    value as i32
}

/// Uniform locations issued as [`Location`]s, remembered per program so a
/// relinked or deleted program drops its entries.
#[derive(Debug)]
struct LocationTable<T> {
    next: u32,
    entries: HashMap<Location, (Handle, T)>,
}

impl<T> LocationTable<T> {
    fn new() -> Self {
        Self {
            next: 0,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, program: Handle, location: T) -> Option<Location> {
        let key = Location(self.next);
        self.next = self.next.checked_add(1)?;
        self.entries.insert(key, (program, location));
        Some(key)
    }

    fn get(&self, location: Location) -> Option<&T> {
        self.entries.get(&location).map(|(_, loc)| loc)
    }

    fn release(&mut self, program: Handle) {
        self.entries.retain(|_, (owner, _)| *owner != program);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A [`Backend`] that issues real GL calls.
pub struct GlowBackend {
    /// The OpenGL context, shared via [`Arc`] so callers can keep issuing
    /// their own GL calls alongside this backend.
    gl: Arc<::glow::Context>,
    /// Vertex array object kept bound for the lifetime of the backend; core
    /// profiles reject attribute setup without one.
    vao: ::glow::VertexArray,
    next_handle: u32,
    buffers: HashMap<Handle, ::glow::Buffer>,
    textures: HashMap<Handle, ::glow::Texture>,
    shaders: HashMap<Handle, ::glow::Shader>,
    programs: HashMap<Handle, ::glow::Program>,
    framebuffers: HashMap<Handle, ::glow::Framebuffer>,
    renderbuffers: HashMap<Handle, ::glow::Renderbuffer>,
    locations: LocationTable<::glow::UniformLocation>,
}

impl GlowBackend {
    /// Wrap a GL context.
    ///
    /// Creates and binds the vertex array object used for all attribute
    /// state.
    ///
    /// # Safety
    ///
    /// The `gl` context must be current and valid for as long as the backend
    /// is used, and only used from the thread it is current on. The caller
    /// must call [`destroy`](Self::destroy) before the context is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`] if the vertex array object cannot be created.
    pub unsafe fn new(gl: Arc<::glow::Context>) -> Result<Self> {
        let vao = unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| Error::driver("create vertex array", e))?;
            gl.bind_vertex_array(Some(vao));
            gl.pixel_store_i32(::glow::UNPACK_ALIGNMENT, 1);
            vao
        };

        Ok(Self {
            gl,
            vao,
            next_handle: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            renderbuffers: HashMap::new(),
            locations: LocationTable::new(),
        })
    }

    /// The wrapped context.
    #[must_use]
    pub fn context(&self) -> &Arc<::glow::Context> {
        &self.gl
    }

    /// Delete every GL object still owned by this backend.
    ///
    /// # Safety
    ///
    /// Must be called with the same context current that was passed to
    /// [`new`](Self::new), and at most once.
    pub unsafe fn destroy(&mut self) {
        let gl = &self.gl;
        unsafe {
            for (_, program) in self.programs.drain() {
                gl.delete_program(program);
            }
            for (_, shader) in self.shaders.drain() {
                gl.delete_shader(shader);
            }
            for (_, buffer) in self.buffers.drain() {
                gl.delete_buffer(buffer);
            }
            for (_, texture) in self.textures.drain() {
                gl.delete_texture(texture);
            }
            for (_, framebuffer) in self.framebuffers.drain() {
                gl.delete_framebuffer(framebuffer);
            }
            for (_, renderbuffer) in self.renderbuffers.drain() {
                gl.delete_renderbuffer(renderbuffer);
            }
            gl.bind_vertex_array(None);
            gl.delete_vertex_array(self.vao);
        }
        self.locations.clear();
    }

    fn issue(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

impl Backend for GlowBackend {
    fn create_buffer(&mut self) -> Result<Handle> {
        let buffer = unsafe { self.gl.create_buffer() }.map_err(|e| Error::driver("create buffer", e))?;
        let handle = self.issue();
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: Handle) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            unsafe { self.gl.delete_buffer(buffer) };
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<Handle>) {
        let buffer = buffer.and_then(|h| self.buffers.get(&h).copied());
        unsafe { self.gl.bind_buffer(target.gl_enum(), buffer) };
    }

    fn allocate_buffer(&mut self, target: BufferTarget, size: usize, usage: Usage) {
        unsafe {
            self.gl
                .buffer_data_size(target.gl_enum(), gl_int(size), usage.gl_enum());
        }
    }

    fn upload_buffer(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_sub_data_u8_slice(target.gl_enum(), gl_int(offset), data);
        }
    }

    fn create_texture(&mut self) -> Result<Handle> {
        let texture =
            unsafe { self.gl.create_texture() }.map_err(|e| Error::driver("create texture", e))?;
        let handle = self.issue();
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: Handle) {
        if let Some(texture) = self.textures.remove(&texture) {
            unsafe { self.gl.delete_texture(texture) };
        }
    }

    fn active_texture_unit(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(::glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<Handle>) {
        let texture = texture.and_then(|h| self.textures.get(&h).copied());
        unsafe { self.gl.bind_texture(target.gl_enum(), texture) };
    }

    fn texture_parameters(&mut self, target: TextureTarget, params: SamplerParams) {
        let gl = &self.gl;
        let target = target.gl_enum();
        unsafe {
            gl.tex_parameter_i32(
                target,
                ::glow::TEXTURE_MIN_FILTER,
                gl_enum_param(params.min_filter),
            );
            gl.tex_parameter_i32(
                target,
                ::glow::TEXTURE_MAG_FILTER,
                gl_enum_param(params.mag_filter),
            );
            gl.tex_parameter_i32(target, ::glow::TEXTURE_WRAP_S, gl_enum_param(params.wrap));
            gl.tex_parameter_i32(target, ::glow::TEXTURE_WRAP_T, gl_enum_param(params.wrap));
        }
    }

    fn allocate_texture(&mut self, desc: &TextureDesc) {
        let gl = &self.gl;
        unsafe {
            match desc.target {
                TextureTarget::D1 => gl.tex_image_1d(
                    ::glow::TEXTURE_1D,
                    0,
                    gl_enum_param(desc.internal_format),
                    gl_int(desc.width),
                    0,
                    desc.format,
                    desc.gl_type,
                    PixelUnpackData::Slice(None),
                ),
                TextureTarget::D2 => gl.tex_image_2d(
                    ::glow::TEXTURE_2D,
                    0,
                    gl_enum_param(desc.internal_format),
                    gl_int(desc.width),
                    gl_int(desc.height),
                    0,
                    desc.format,
                    desc.gl_type,
                    PixelUnpackData::Slice(None),
                ),
            }
        }
    }

    fn upload_texture(&mut self, region: &TextureRegion, data: &[u8]) {
        let gl = &self.gl;
        unsafe {
            match region.target {
                TextureTarget::D1 => gl.tex_sub_image_1d(
                    ::glow::TEXTURE_1D,
                    0,
                    gl_int(region.x),
                    gl_int(region.width),
                    region.format,
                    region.gl_type,
                    PixelUnpackData::Slice(Some(data)),
                ),
                TextureTarget::D2 => gl.tex_sub_image_2d(
                    ::glow::TEXTURE_2D,
                    0,
                    gl_int(region.x),
                    gl_int(region.y),
                    gl_int(region.width),
                    gl_int(region.height),
                    region.format,
                    region.gl_type,
                    PixelUnpackData::Slice(Some(data)),
                ),
            }
        }
    }

    fn create_shader(&mut self, stage: ShaderStage) -> Result<Handle> {
        let shader = unsafe { self.gl.create_shader(stage.gl_enum()) }
            .map_err(|e| Error::driver("create shader", e))?;
        let handle = self.issue();
        self.shaders.insert(handle, shader);
        Ok(handle)
    }

    fn delete_shader(&mut self, shader: Handle) {
        if let Some(shader) = self.shaders.remove(&shader) {
            unsafe { self.gl.delete_shader(shader) };
        }
    }

    fn compile_shader(&mut self, shader: Handle, source: &str) -> Result<(), String> {
        let shader = *self
            .shaders
            .get(&shader)
            .ok_or_else(|| format!("unknown shader {shader}"))?;
        unsafe {
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if self.gl.get_shader_compile_status(shader) {
                Ok(())
            } else {
                Err(self.gl.get_shader_info_log(shader))
            }
        }
    }

    fn create_program(&mut self) -> Result<Handle> {
        let program =
            unsafe { self.gl.create_program() }.map_err(|e| Error::driver("create program", e))?;
        let handle = self.issue();
        self.programs.insert(handle, program);
        Ok(handle)
    }

    fn delete_program(&mut self, program: Handle) {
        self.locations.release(program);
        if let Some(program) = self.programs.remove(&program) {
            unsafe { self.gl.delete_program(program) };
        }
    }

    fn attach_shader(&mut self, program: Handle, shader: Handle) {
        if let (Some(&program), Some(&shader)) =
            (self.programs.get(&program), self.shaders.get(&shader))
        {
            unsafe { self.gl.attach_shader(program, shader) };
        }
    }

    fn detach_shader(&mut self, program: Handle, shader: Handle) {
        if let (Some(&program), Some(&shader)) =
            (self.programs.get(&program), self.shaders.get(&shader))
        {
            unsafe { self.gl.detach_shader(program, shader) };
        }
    }

    fn link_program(&mut self, program: Handle) -> Result<(), String> {
        self.locations.release(program);
        let program = *self
            .programs
            .get(&program)
            .ok_or_else(|| format!("unknown program {program}"))?;
        unsafe {
            self.gl.link_program(program);
            if self.gl.get_program_link_status(program) {
                Ok(())
            } else {
                Err(self.gl.get_program_info_log(program))
            }
        }
    }

    fn use_program(&mut self, program: Option<Handle>) {
        let program = program.and_then(|h| self.programs.get(&h).copied());
        unsafe { self.gl.use_program(program) };
    }

    fn active_uniforms(&mut self, program: Handle) -> Vec<ActiveVariable> {
        let Some(&program) = self.programs.get(&program) else {
            return Vec::new();
        };
        unsafe {
            (0..self.gl.get_active_uniforms(program))
                .filter_map(|index| self.gl.get_active_uniform(program, index))
                .map(|u| ActiveVariable {
                    name: u.name,
                    gl_type: u.utype,
                    size: usize::try_from(u.size).unwrap_or(1),
                })
                .collect()
        }
    }

    fn active_attributes(&mut self, program: Handle) -> Vec<ActiveVariable> {
        let Some(&program) = self.programs.get(&program) else {
            return Vec::new();
        };
        unsafe {
            (0..self.gl.get_active_attributes(program))
                .filter_map(|index| self.gl.get_active_attribute(program, index))
                .map(|a| ActiveVariable {
                    name: a.name,
                    gl_type: a.atype,
                    size: usize::try_from(a.size).unwrap_or(1),
                })
                .collect()
        }
    }

    fn uniform_location(&mut self, program: Handle, name: &str) -> Option<Location> {
        let object = *self.programs.get(&program)?;
        let location = unsafe { self.gl.get_uniform_location(object, name) }?;
        let issued = self.locations.insert(program, location);
        log::trace!("program {program}: {} uniform location(s) live", self.locations.len());
        issued
    }

    fn attribute_location(&mut self, program: Handle, name: &str) -> Option<u32> {
        let program = *self.programs.get(&program)?;
        unsafe { self.gl.get_attrib_location(program, name) }
    }

    fn set_uniform(&mut self, location: Location, data: &UniformData) {
        let Some(loc) = self.locations.get(location) else {
            return;
        };
        let gl = &self.gl;
        let loc = Some(loc);
        unsafe {
            match *data {
                UniformData::Float(x) => gl.uniform_1_f32(loc, x),
                UniformData::Vec2([x, y]) => gl.uniform_2_f32(loc, x, y),
                UniformData::Vec3([x, y, z]) => gl.uniform_3_f32(loc, x, y, z),
                UniformData::Vec4([x, y, z, w]) => gl.uniform_4_f32(loc, x, y, z, w),
                UniformData::Int(x) => gl.uniform_1_i32(loc, x),
                UniformData::IVec2([x, y]) => gl.uniform_2_i32(loc, x, y),
                UniformData::IVec3([x, y, z]) => gl.uniform_3_i32(loc, x, y, z),
                UniformData::IVec4([x, y, z, w]) => gl.uniform_4_i32(loc, x, y, z, w),
                UniformData::Mat2(ref m) => gl.uniform_matrix_2_f32_slice(loc, false, m),
                UniformData::Mat3(ref m) => gl.uniform_matrix_3_f32_slice(loc, false, m),
                UniformData::Mat4(ref m) => gl.uniform_matrix_4_f32_slice(loc, false, m),
            }
        }
    }

    fn enable_attribute(&mut self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) };
    }

    fn disable_attribute(&mut self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) };
    }

    fn attribute_pointer(&mut self, index: u32, pointer: &AttribPointer) {
        unsafe {
            self.gl.vertex_attrib_pointer_f32(
                index,
                gl_int(pointer.components),
                pointer.gl_type,
                pointer.normalized,
                gl_int(pointer.stride),
                gl_int(pointer.offset),
            );
        }
    }

    fn attribute_constant(&mut self, index: u32, [x, y, z, w]: [f32; 4]) {
        unsafe { self.gl.vertex_attrib_4_f32(index, x, y, z, w) };
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: usize, count: usize) {
        unsafe {
            self.gl
                .draw_arrays(mode.gl_enum(), gl_int(first), gl_int(count));
        }
    }

    fn draw_elements(&mut self, mode: DrawMode, count: usize, index_type: IndexType) {
        unsafe {
            self.gl
                .draw_elements(mode.gl_enum(), gl_int(count), index_type.gl_enum(), 0);
        }
    }

    fn create_framebuffer(&mut self) -> Result<Handle> {
        let framebuffer = unsafe { self.gl.create_framebuffer() }
            .map_err(|e| Error::driver("create framebuffer", e))?;
        let handle = self.issue();
        self.framebuffers.insert(handle, framebuffer);
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: Handle) {
        if let Some(framebuffer) = self.framebuffers.remove(&framebuffer) {
            unsafe { self.gl.delete_framebuffer(framebuffer) };
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<Handle>) {
        let framebuffer = framebuffer.and_then(|h| self.framebuffers.get(&h).copied());
        unsafe { self.gl.bind_framebuffer(::glow::FRAMEBUFFER, framebuffer) };
    }

    fn attach_texture(&mut self, attachment: Attachment, texture: Option<Handle>) {
        let texture = texture.and_then(|h| self.textures.get(&h).copied());
        unsafe {
            self.gl.framebuffer_texture_2d(
                ::glow::FRAMEBUFFER,
                attachment.gl_enum(),
                ::glow::TEXTURE_2D,
                texture,
                0,
            );
        }
    }

    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: Option<Handle>) {
        let renderbuffer = renderbuffer.and_then(|h| self.renderbuffers.get(&h).copied());
        unsafe {
            self.gl.framebuffer_renderbuffer(
                ::glow::FRAMEBUFFER,
                attachment.gl_enum(),
                ::glow::RENDERBUFFER,
                renderbuffer,
            );
        }
    }

    fn framebuffer_status(&mut self) -> u32 {
        unsafe { self.gl.check_framebuffer_status(::glow::FRAMEBUFFER) }
    }

    fn create_renderbuffer(&mut self) -> Result<Handle> {
        let renderbuffer = unsafe { self.gl.create_renderbuffer() }
            .map_err(|e| Error::driver("create renderbuffer", e))?;
        let handle = self.issue();
        self.renderbuffers.insert(handle, renderbuffer);
        Ok(handle)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: Handle) {
        if let Some(renderbuffer) = self.renderbuffers.remove(&renderbuffer) {
            unsafe { self.gl.delete_renderbuffer(renderbuffer) };
        }
    }

    fn bind_renderbuffer(&mut self, renderbuffer: Option<Handle>) {
        let renderbuffer = renderbuffer.and_then(|h| self.renderbuffers.get(&h).copied());
        unsafe { self.gl.bind_renderbuffer(::glow::RENDERBUFFER, renderbuffer) };
    }

    fn renderbuffer_storage(&mut self, internal_format: u32, width: usize, height: usize) {
        unsafe {
            self.gl.renderbuffer_storage(
                ::glow::RENDERBUFFER,
                internal_format,
                gl_int(width),
                gl_int(height),
            );
        }
    }
}
