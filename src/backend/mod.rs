//! The driver seam.
//!
//! Every GPU call made by the resource, shader and program layers goes
//! through [`Backend`]. Two implementations ship with the crate:
//!
//! - [`GlowBackend`], which forwards to a live OpenGL context via [glow].
//! - [`HeadlessBackend`], which needs no context: it hands out fake handles,
//!   records every call, and derives program reflection from shader source.
//!
//! The GL context is process-wide mutable state. Backends are driven from a
//! single thread, in call order; nothing here is `Send` and no attempt is
//! made to serialize access from several threads.
//!
//! [glow]: https://docs.rs/glow

mod glow;
mod headless;

pub use self::glow::GlowBackend;
pub use self::headless::{Call, HeadlessBackend};

use std::fmt;

use crate::error::Result;

/// Backend-issued identity of a GPU object.
///
/// A resource that has not been created has no handle at all (`None`), which
/// takes the place of GL's invalid `-1`/`0` names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Backend-issued uniform location, valid for the program that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location(pub u32);

/// Buffer binding point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// `GL_ARRAY_BUFFER`, vertex attribute data.
    Vertex,
    /// `GL_ELEMENT_ARRAY_BUFFER`, draw indices.
    Index,
}

impl BufferTarget {
    /// The GL enum for this target.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Vertex => ::glow::ARRAY_BUFFER,
            Self::Index => ::glow::ELEMENT_ARRAY_BUFFER,
        }
    }
}

/// Buffer usage hint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Usage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten occasionally.
    #[default]
    Dynamic,
    /// Rewritten every frame.
    Stream,
}

impl Usage {
    /// The GL enum for this hint.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Static => ::glow::STATIC_DRAW,
            Self::Dynamic => ::glow::DYNAMIC_DRAW,
            Self::Stream => ::glow::STREAM_DRAW,
        }
    }
}

/// Texture binding point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// `GL_TEXTURE_1D`.
    D1,
    /// `GL_TEXTURE_2D`.
    D2,
}

impl TextureTarget {
    /// The GL enum for this target.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::D1 => ::glow::TEXTURE_1D,
            Self::D2 => ::glow::TEXTURE_2D,
        }
    }
}

/// Programmable pipeline stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Geometry shader.
    Geometry,
    /// Fragment shader.
    Fragment,
}

impl ShaderStage {
    /// The GL enum for this stage.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Vertex => ::glow::VERTEX_SHADER,
            Self::Geometry => ::glow::GEOMETRY_SHADER,
            Self::Fragment => ::glow::FRAGMENT_SHADER,
        }
    }
}

/// Primitive assembly mode for draw calls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DrawMode {
    /// `GL_POINTS`.
    Points,
    /// `GL_LINES`.
    Lines,
    /// `GL_LINE_STRIP`.
    LineStrip,
    /// `GL_LINE_LOOP`.
    LineLoop,
    /// `GL_TRIANGLES`.
    Triangles,
    /// `GL_TRIANGLE_STRIP`.
    TriangleStrip,
    /// `GL_TRIANGLE_FAN`.
    TriangleFan,
}

impl DrawMode {
    /// The GL enum for this mode.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Points => ::glow::POINTS,
            Self::Lines => ::glow::LINES,
            Self::LineStrip => ::glow::LINE_STRIP,
            Self::LineLoop => ::glow::LINE_LOOP,
            Self::Triangles => ::glow::TRIANGLES,
            Self::TriangleStrip => ::glow::TRIANGLE_STRIP,
            Self::TriangleFan => ::glow::TRIANGLE_FAN,
        }
    }
}

/// Element type of an index buffer, derived from its element width.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// 1-byte indices.
    U8,
    /// 2-byte indices.
    U16,
    /// 4-byte indices.
    U32,
}

impl IndexType {
    /// The GL enum for this index type.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::U8 => ::glow::UNSIGNED_BYTE,
            Self::U16 => ::glow::UNSIGNED_SHORT,
            Self::U32 => ::glow::UNSIGNED_INT,
        }
    }
}

/// Framebuffer attachment point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// `GL_COLOR_ATTACHMENTi`.
    Color(u32),
    /// `GL_DEPTH_ATTACHMENT`.
    Depth,
    /// `GL_STENCIL_ATTACHMENT`.
    Stencil,
}

impl Attachment {
    /// The GL enum for this attachment point.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Color(i) => ::glow::COLOR_ATTACHMENT0 + i,
            Self::Depth => ::glow::DEPTH_ATTACHMENT,
            Self::Stencil => ::glow::STENCIL_ATTACHMENT,
        }
    }
}

/// Storage description for a full texture (re)allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    /// Binding point.
    pub target: TextureTarget,
    /// Width in texels.
    pub width: usize,
    /// Height in texels (1 for 1D textures).
    pub height: usize,
    /// Sized or base internal format.
    pub internal_format: u32,
    /// Pixel format of uploaded data.
    pub format: u32,
    /// Pixel type of uploaded data.
    pub gl_type: u32,
}

/// Sub-rectangle of a texture targeted by an upload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureRegion {
    /// Binding point.
    pub target: TextureTarget,
    /// First texel column.
    pub x: usize,
    /// First texel row (0 for 1D textures).
    pub y: usize,
    /// Width in texels.
    pub width: usize,
    /// Height in texels.
    pub height: usize,
    /// Pixel format of the data.
    pub format: u32,
    /// Pixel type of the data.
    pub gl_type: u32,
}

/// Sampling parameters applied on texture setup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SamplerParams {
    /// `GL_TEXTURE_MIN_FILTER` value.
    pub min_filter: u32,
    /// `GL_TEXTURE_MAG_FILTER` value.
    pub mag_filter: u32,
    /// `GL_TEXTURE_WRAP_*` value, applied to every axis.
    pub wrap: u32,
}

/// A variable reported active by post-link reflection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveVariable {
    /// Name as reported by the driver (arrays as `name[0]`).
    pub name: String,
    /// GL type enum.
    pub gl_type: u32,
    /// Array length, 1 for scalars.
    pub size: usize,
}

/// Layout of one vertex attribute inside a bound vertex buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AttribPointer {
    /// Components per vertex (1 to 4).
    pub components: usize,
    /// GL type of each component.
    pub gl_type: u32,
    /// Whether integer data is normalized to `[0, 1]`/`[-1, 1]`.
    pub normalized: bool,
    /// Bytes between consecutive vertices.
    pub stride: usize,
    /// Byte offset of the first component.
    pub offset: usize,
}

/// A uniform value in the shape the driver accepts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformData {
    /// `float`.
    Float(f32),
    /// `vec2`.
    Vec2([f32; 2]),
    /// `vec3`.
    Vec3([f32; 3]),
    /// `vec4`.
    Vec4([f32; 4]),
    /// `int`, `bool` and sampler units.
    Int(i32),
    /// `ivec2`/`bvec2`.
    IVec2([i32; 2]),
    /// `ivec3`/`bvec3`.
    IVec3([i32; 3]),
    /// `ivec4`/`bvec4`.
    IVec4([i32; 4]),
    /// `mat2`, column major.
    Mat2([f32; 4]),
    /// `mat3`, column major.
    Mat3([f32; 9]),
    /// `mat4`, column major.
    Mat4([f32; 16]),
}

/// Raw GPU operations needed by the resource layer.
///
/// Creation methods fail only when the context is missing or lost; that
/// failure is fatal to the calling operation and never retried. Compile and
/// link methods return the driver's info log on failure.
pub trait Backend {
    /// Create a buffer object.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot allocate a buffer name.
    fn create_buffer(&mut self) -> Result<Handle>;
    /// Delete a buffer object.
    fn delete_buffer(&mut self, buffer: Handle);
    /// Bind (or unbind, with `None`) a buffer.
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<Handle>);
    /// (Re)allocate storage for the bound buffer; contents are undefined.
    fn allocate_buffer(&mut self, target: BufferTarget, size: usize, usage: Usage);
    /// Upload bytes into the bound buffer at `offset`.
    fn upload_buffer(&mut self, target: BufferTarget, offset: usize, data: &[u8]);

    /// Create a texture object.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot allocate a texture name.
    fn create_texture(&mut self) -> Result<Handle>;
    /// Delete a texture object.
    fn delete_texture(&mut self, texture: Handle);
    /// Select the active texture unit.
    fn active_texture_unit(&mut self, unit: u32);
    /// Bind (or unbind) a texture on the active unit.
    fn bind_texture(&mut self, target: TextureTarget, texture: Option<Handle>);
    /// Apply filtering and wrapping to the bound texture.
    fn texture_parameters(&mut self, target: TextureTarget, params: SamplerParams);
    /// (Re)allocate storage for the bound texture; contents are undefined.
    fn allocate_texture(&mut self, desc: &TextureDesc);
    /// Upload texels into a region of the bound texture.
    fn upload_texture(&mut self, region: &TextureRegion, data: &[u8]);

    /// Create a shader object for `stage`.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot allocate a shader name.
    fn create_shader(&mut self, stage: ShaderStage) -> Result<Handle>;
    /// Delete a shader object.
    fn delete_shader(&mut self, shader: Handle);
    /// Set the source of and compile a shader.
    ///
    /// # Errors
    ///
    /// Returns the compiler info log when compilation fails.
    fn compile_shader(&mut self, shader: Handle, source: &str) -> Result<(), String>;
    /// Create a program object.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot allocate a program name.
    fn create_program(&mut self) -> Result<Handle>;
    /// Delete a program object.
    fn delete_program(&mut self, program: Handle);
    /// Attach a compiled shader to a program.
    fn attach_shader(&mut self, program: Handle, shader: Handle);
    /// Detach a shader from a program.
    fn detach_shader(&mut self, program: Handle, shader: Handle);
    /// Link a program.
    ///
    /// # Errors
    ///
    /// Returns the linker info log when linking fails.
    fn link_program(&mut self, program: Handle) -> Result<(), String>;
    /// Make a program current (or clear it with `None`).
    fn use_program(&mut self, program: Option<Handle>);
    /// Uniforms the linked program actually uses.
    fn active_uniforms(&mut self, program: Handle) -> Vec<ActiveVariable>;
    /// Attributes the linked program actually uses.
    fn active_attributes(&mut self, program: Handle) -> Vec<ActiveVariable>;
    /// Location of a uniform in a linked program.
    fn uniform_location(&mut self, program: Handle, name: &str) -> Option<Location>;
    /// Location of an attribute in a linked program.
    fn attribute_location(&mut self, program: Handle, name: &str) -> Option<u32>;
    /// Upload a uniform value to the current program.
    fn set_uniform(&mut self, location: Location, data: &UniformData);
    /// Enable an attribute array.
    fn enable_attribute(&mut self, index: u32);
    /// Disable an attribute array.
    fn disable_attribute(&mut self, index: u32);
    /// Point an attribute at the bound vertex buffer.
    fn attribute_pointer(&mut self, index: u32, pointer: &AttribPointer);
    /// Give a disabled attribute a constant value.
    fn attribute_constant(&mut self, index: u32, value: [f32; 4]);
    /// Issue a non-indexed draw.
    fn draw_arrays(&mut self, mode: DrawMode, first: usize, count: usize);
    /// Issue an indexed draw from the bound index buffer.
    fn draw_elements(&mut self, mode: DrawMode, count: usize, index_type: IndexType);

    /// Create a framebuffer object.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot allocate a framebuffer name.
    fn create_framebuffer(&mut self) -> Result<Handle>;
    /// Delete a framebuffer object.
    fn delete_framebuffer(&mut self, framebuffer: Handle);
    /// Bind (or restore the default, with `None`) a framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<Handle>);
    /// Attach a 2D texture to the bound framebuffer.
    fn attach_texture(&mut self, attachment: Attachment, texture: Option<Handle>);
    /// Attach a renderbuffer to the bound framebuffer.
    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: Option<Handle>);
    /// Completeness status of the bound framebuffer.
    fn framebuffer_status(&mut self) -> u32;
    /// Create a renderbuffer object.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot allocate a renderbuffer name.
    fn create_renderbuffer(&mut self) -> Result<Handle>;
    /// Delete a renderbuffer object.
    fn delete_renderbuffer(&mut self, renderbuffer: Handle);
    /// Bind (or unbind) a renderbuffer.
    fn bind_renderbuffer(&mut self, renderbuffer: Option<Handle>);
    /// (Re)allocate storage for the bound renderbuffer.
    fn renderbuffer_storage(&mut self, internal_format: u32, width: usize, height: usize);
}
