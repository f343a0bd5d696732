//! OpenGL resource management and runtime GLSL composition on top of [glow].
//!
//! Every GPU object (buffers, textures, shaders, programs, framebuffers)
//! follows one deferred lifecycle: state changes only mark the object, and
//! the next [`activate`](GpuResource::activate) performs whatever creation,
//! parameter setup and upload is pending. Programs are assembled from
//! shader stages whose `<hook>` placeholders are filled with literal code
//! or with [`Snippet`]s, reusable GLSL fragments whose symbols are mangled
//! so any number of them can share a shader.
//!
//! # Features
//!
//! - **Dirty-range uploads**: buffers and textures upload only the span
//!   written since the last activation (whole rows for 2D textures).
//! - **Snippet composition**: call nesting (`a.call([&b])`) and arithmetic
//!   chaining (`&a + &b`), with cycles rejected up front.
//! - **Name-addressed programs**: [`Program::set`] routes a value to a hook,
//!   a uniform or an attribute, type-checking uniforms and skipping ones the
//!   linker dropped.
//! - **Compiler diagnostics** from the three common vendor log formats,
//!   with the offending source lines attached.
//! - **Skyline texture atlases** for packing many small images.
//! - **Headless backend** recording every call, for tests without a GL
//!   context.
//!
//! # Safety
//!
//! [`GlowBackend`](backend::GlowBackend) issues raw GL calls and must be
//! created and used with a valid, current OpenGL context; its constructor
//! is `unsafe` for that reason. Everything above the [`Backend`] trait is
//! safe.
//!
//! [glow]: https://docs.rs/glow

pub mod atlas;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod dtype;
pub mod error;
pub mod framebuffer;
pub mod glsl;
pub mod library;
pub mod packing;
pub mod program;
pub mod resource;
pub mod shader;
pub mod snippet;
pub mod texture;
pub mod variable;

pub use atlas::{Atlas, AtlasCache, Skyline};
pub use backend::Backend;
pub use buffer::{Buffer, BufferView};
pub use config::Config;
pub use error::{Error, Result};
pub use framebuffer::FrameBuffer;
pub use program::{Lookup, Program, ProgramDescriptor};
pub use resource::{GpuResource, ResourceView};
pub use shader::Shader;
pub use snippet::Snippet;
pub use texture::Texture;
