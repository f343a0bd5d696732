//! Off-screen render targets.

use std::cell::RefCell;
use std::rc::Rc;

use crate::backend::{Attachment, Backend, Handle};
use crate::error::{Error, Result};
use crate::resource::{GpuResource, ResourceState};
use crate::texture::SharedTexture;

/// A render buffer shared between framebuffers.
pub type SharedRenderBuffer = Rc<RefCell<RenderBuffer>>;

/// Storage for a framebuffer attachment that is never sampled.
#[derive(Debug)]
pub struct RenderBuffer {
    state: ResourceState,
    internal_format: u32,
    width: usize,
    height: usize,
}

impl RenderBuffer {
    /// A render buffer with the given sized internal format.
    #[must_use]
    pub fn new(internal_format: u32, width: usize, height: usize) -> Self {
        Self {
            state: ResourceState::new(),
            internal_format,
            width,
            height,
        }
    }

    /// RGBA8 color storage.
    #[must_use]
    pub fn color(width: usize, height: usize) -> Self {
        Self::new(glow::RGBA8, width, height)
    }

    /// 16-bit depth storage.
    #[must_use]
    pub fn depth(width: usize, height: usize) -> Self {
        Self::new(glow::DEPTH_COMPONENT16, width, height)
    }

    /// 8-bit stencil storage.
    #[must_use]
    pub fn stencil(width: usize, height: usize) -> Self {
        Self::new(glow::STENCIL_INDEX8, width, height)
    }

    /// Wrap for sharing.
    #[must_use]
    pub fn shared(self) -> SharedRenderBuffer {
        Rc::new(RefCell::new(self))
    }

    /// `(width, height)`.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Re-specify storage at a new size on the next activation.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.state.invalidate_setup();
    }
}

impl GpuResource for RenderBuffer {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }

    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
        gl.create_renderbuffer()
    }

    fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        gl.bind_renderbuffer(Some(handle));
        Ok(())
    }

    fn on_unbind(&mut self, gl: &mut dyn Backend, _handle: Handle) {
        gl.bind_renderbuffer(None);
    }

    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
        gl.delete_renderbuffer(handle);
    }

    fn on_setup(&mut self, gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        gl.renderbuffer_storage(self.internal_format, self.width, self.height);
        Ok(())
    }
}

/// What a framebuffer attachment point renders into.
#[derive(Clone, Debug)]
pub enum AttachmentSource {
    /// A texture, sampleable after rendering.
    Texture(SharedTexture),
    /// A render buffer.
    RenderBuffer(SharedRenderBuffer),
}

impl AttachmentSource {
    fn activate(&self, gl: &mut dyn Backend) -> Result<Option<Handle>> {
        match self {
            Self::Texture(texture) => {
                let mut texture = texture.borrow_mut();
                texture.activate(gl)?;
                Ok(texture.handle())
            }
            Self::RenderBuffer(buffer) => {
                let mut buffer = buffer.borrow_mut();
                buffer.activate(gl)?;
                Ok(buffer.handle())
            }
        }
    }

    fn resize(&self, width: usize, height: usize) {
        match self {
            Self::Texture(texture) => texture.borrow_mut().resize(height, width),
            Self::RenderBuffer(buffer) => buffer.borrow_mut().resize(width, height),
        }
    }
}

/// A framebuffer with color, depth and stencil attachments.
///
/// Attachments are shared, not owned: deleting the framebuffer leaves them
/// alive.
#[derive(Debug)]
pub struct FrameBuffer {
    state: ResourceState,
    width: usize,
    height: usize,
    color: Vec<AttachmentSource>,
    depth: Option<AttachmentSource>,
    stencil: Option<AttachmentSource>,
}

impl FrameBuffer {
    /// A framebuffer without attachments.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            state: ResourceState::new(),
            width,
            height,
            color: Vec::new(),
            depth: None,
            stencil: None,
        }
    }

    /// Add the next color attachment.
    #[must_use]
    pub fn with_color(mut self, source: AttachmentSource) -> Self {
        self.color.push(source);
        self
    }

    /// Set the depth attachment.
    #[must_use]
    pub fn with_depth(mut self, source: AttachmentSource) -> Self {
        self.depth = Some(source);
        self
    }

    /// Set the stencil attachment.
    #[must_use]
    pub fn with_stencil(mut self, source: AttachmentSource) -> Self {
        self.stencil = Some(source);
        self
    }

    /// `(width, height)`.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Color attachments in attachment order.
    #[must_use]
    pub fn color(&self) -> &[AttachmentSource] {
        &self.color
    }

    /// Resize every attachment and re-attach them on the next activation.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        for (_, source) in self.attachments() {
            source.resize(width, height);
        }
        self.state.invalidate_setup();
    }

    fn attachments(&self) -> impl Iterator<Item = (Attachment, &AttachmentSource)> {
        let color = (0u32..).zip(&self.color).map(|(i, s)| (Attachment::Color(i), s));
        let depth = self.depth.iter().map(|s| (Attachment::Depth, s));
        let stencil = self.stencil.iter().map(|s| (Attachment::Stencil, s));
        color.chain(depth).chain(stencil)
    }
}

impl GpuResource for FrameBuffer {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }

    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
        gl.create_framebuffer()
    }

    fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        gl.bind_framebuffer(Some(handle));
        Ok(())
    }

    fn on_unbind(&mut self, gl: &mut dyn Backend, _handle: Handle) {
        gl.bind_framebuffer(None);
    }

    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
        gl.delete_framebuffer(handle);
    }

    fn on_setup(&mut self, gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        for (attachment, source) in self.attachments() {
            let handle = source.activate(gl)?;
            match source {
                AttachmentSource::Texture(_) => gl.attach_texture(attachment, handle),
                AttachmentSource::RenderBuffer(_) => gl.attach_renderbuffer(attachment, handle),
            }
        }
        let status = gl.framebuffer_status();
        if status != glow::FRAMEBUFFER_COMPLETE {
            return Err(Error::driver(
                "framebuffer setup",
                format!("incomplete framebuffer (status {status:#x})"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{Call, HeadlessBackend};
    use crate::dtype::DType;
    use crate::texture::Texture;

    fn target() -> (SharedTexture, SharedRenderBuffer, FrameBuffer) {
        let color = Texture::new_2d(32, 64, 4, DType::U8).unwrap().shared();
        let depth = RenderBuffer::depth(64, 32).shared();
        let fbo = FrameBuffer::new(64, 32)
            .with_color(AttachmentSource::Texture(Rc::clone(&color)))
            .with_depth(AttachmentSource::RenderBuffer(Rc::clone(&depth)));
        (color, depth, fbo)
    }

    #[test]
    fn setup_attaches_every_source() {
        let (color, depth, mut fbo) = target();
        let mut gl = HeadlessBackend::new();
        fbo.activate(&mut gl).unwrap();

        let color_handle = color.borrow().handle();
        let depth_handle = depth.borrow().handle();
        assert!(color_handle.is_some() && depth_handle.is_some());
        let calls = gl.calls();
        assert!(calls.contains(&Call::AttachTexture(Attachment::Color(0), color_handle)));
        assert!(calls.contains(&Call::AttachRenderbuffer(Attachment::Depth, depth_handle)));
        assert!(calls.contains(&Call::RenderbufferStorage {
            internal_format: glow::DEPTH_COMPONENT16,
            width: 64,
            height: 32,
        }));
    }

    #[test]
    fn resize_reattaches_a_new_texture() {
        let (color, depth, mut fbo) = target();
        let mut gl = HeadlessBackend::new();
        fbo.activate(&mut gl).unwrap();
        let before = color.borrow().handle().unwrap();

        fbo.resize(128, 16);
        fbo.activate(&mut gl).unwrap();
        let after = color.borrow().handle().unwrap();
        assert_ne!(before, after);
        assert_eq!(color.borrow().shape(), (16, 128, 4));
        assert_eq!(depth.borrow().size(), (128, 16));
        assert!(gl
            .calls()
            .contains(&Call::AttachTexture(Attachment::Color(0), Some(after))));
    }

    #[test]
    fn deleting_the_framebuffer_keeps_attachments() {
        let (color, _depth, mut fbo) = target();
        let mut gl = HeadlessBackend::new();
        fbo.activate(&mut gl).unwrap();
        fbo.delete(&mut gl);
        let handle = color.borrow().handle().unwrap();
        assert!(gl.is_live(handle));
    }
}
