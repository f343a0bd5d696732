//! 1D and 2D textures backed by a CPU-side texel grid.
//!
//! Writes go to the CPU copy and widen a pending byte range, like
//! [`Buffer`](crate::buffer::Buffer). On upload the range is snapped to
//! whole rows (2D) or whole texels (1D), since the transfer primitive only
//! takes rectangular regions.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::backend::{Backend, Handle, SamplerParams, TextureDesc, TextureRegion, TextureTarget};
use crate::buffer::DirtyRange;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::resource::{GpuResource, ResourceState};

/// A texture shared between programs and atlases.
pub type SharedTexture = Rc<RefCell<Texture>>;

/// Sampling filter for minification or magnification.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest texel.
    Nearest,
    /// Bilinear.
    #[default]
    Linear,
}

impl Filter {
    /// The GL enum for this filter.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Nearest => glow::NEAREST,
            Self::Linear => glow::LINEAR,
        }
    }
}

/// Coordinate wrapping, applied to every axis.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Wrap {
    /// Clamp to the edge texel.
    #[default]
    ClampToEdge,
    /// Tile.
    Repeat,
    /// Tile, mirroring every other repetition.
    MirroredRepeat,
}

impl Wrap {
    /// The GL enum for this mode.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::ClampToEdge => glow::CLAMP_TO_EDGE,
            Self::Repeat => glow::REPEAT,
            Self::MirroredRepeat => glow::MIRRORED_REPEAT,
        }
    }
}

/// Pixel format for a channel count.
///
/// # Errors
///
/// [`Error::UnsupportedFormat`] outside `1..=4`.
pub fn format_for(channels: usize) -> Result<u32> {
    match channels {
        1 => Ok(glow::RED),
        2 => Ok(glow::RG),
        3 => Ok(glow::RGB),
        4 => Ok(glow::RGBA),
        _ => Err(Error::UnsupportedFormat { channels }),
    }
}

/// Pixel type for an element type.
///
/// # Errors
///
/// [`Error::UnsupportedType`] for `f64`.
pub fn gl_type_for(dtype: DType) -> Result<u32> {
    match dtype {
        DType::I8 => Ok(glow::BYTE),
        DType::U8 => Ok(glow::UNSIGNED_BYTE),
        DType::I16 => Ok(glow::SHORT),
        DType::U16 => Ok(glow::UNSIGNED_SHORT),
        DType::I32 => Ok(glow::INT),
        DType::U32 => Ok(glow::UNSIGNED_INT),
        DType::F32 => Ok(glow::FLOAT),
        DType::F64 => Err(Error::UnsupportedType(dtype)),
    }
}

/// Storage format: 32-bit float formats for `f32` data, the pixel format
/// itself otherwise.
///
/// # Errors
///
/// As [`format_for`] and [`gl_type_for`].
pub fn internal_format_for(channels: usize, dtype: DType) -> Result<u32> {
    let format = format_for(channels)?;
    gl_type_for(dtype)?;
    if dtype != DType::F32 {
        return Ok(format);
    }
    Ok(match channels {
        1 => glow::R32F,
        2 => glow::RG32F,
        3 => glow::RGB32F,
        _ => glow::RGBA32F,
    })
}

/// Grow `range` outward to multiples of `stride`.
#[must_use]
pub fn snap_to_rows(range: Range<usize>, stride: usize) -> Range<usize> {
    if stride == 0 {
        return range;
    }
    let start = range.start / stride * stride;
    let end = range.end.div_ceil(stride) * stride;
    start..end
}

/// A 1D or 2D texture.
#[derive(Debug)]
pub struct Texture {
    state: ResourceState,
    target: TextureTarget,
    rows: usize,
    cols: usize,
    channels: usize,
    dtype: DType,
    format: u32,
    gl_type: u32,
    internal_format: u32,
    min_filter: Filter,
    mag_filter: Filter,
    wrap: Wrap,
    data: Vec<u8>,
    pending: DirtyRange,
    allocated: bool,
}

impl Texture {
    fn with_shape(
        target: TextureTarget,
        rows: usize,
        cols: usize,
        channels: usize,
        dtype: DType,
    ) -> Result<Self> {
        let format = format_for(channels)?;
        let gl_type = gl_type_for(dtype)?;
        let internal_format = internal_format_for(channels, dtype)?;
        let len = rows * cols * channels * dtype.size();
        Ok(Self {
            state: ResourceState::new(),
            target,
            rows,
            cols,
            channels,
            dtype,
            format,
            gl_type,
            internal_format,
            min_filter: Filter::default(),
            mag_filter: Filter::default(),
            wrap: Wrap::default(),
            data: vec![0; len],
            pending: DirtyRange::covering(0..len),
            allocated: false,
        })
    }

    /// A zeroed 1D texture of `width` texels.
    ///
    /// # Errors
    ///
    /// As [`format_for`] and [`gl_type_for`].
    pub fn new_1d(width: usize, channels: usize, dtype: DType) -> Result<Self> {
        Self::with_shape(TextureTarget::D1, 1, width, channels, dtype)
    }

    /// A zeroed 2D texture of shape `(rows, cols, channels)`.
    ///
    /// # Errors
    ///
    /// As [`format_for`] and [`gl_type_for`].
    pub fn new_2d(rows: usize, cols: usize, channels: usize, dtype: DType) -> Result<Self> {
        Self::with_shape(TextureTarget::D2, rows, cols, channels, dtype)
    }

    /// A 2D texture holding typed texels, row-major.
    ///
    /// # Errors
    ///
    /// As [`new_2d`](Self::new_2d); [`Error::OutOfBounds`] when `texels`
    /// does not hold exactly `rows * cols * channels` values.
    pub fn from_texels<T: Element>(
        rows: usize,
        cols: usize,
        channels: usize,
        texels: &[T],
    ) -> Result<Self> {
        let mut texture = Self::new_2d(rows, cols, channels, T::DTYPE)?;
        let bytes: &[u8] = bytemuck::cast_slice(texels);
        if bytes.len() != texture.data.len() {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: bytes.len(),
                size: texture.data.len(),
            });
        }
        texture.data.copy_from_slice(bytes);
        Ok(texture)
    }

    /// An RGBA8 texture from a decoded image.
    ///
    /// # Errors
    ///
    /// Never in practice; the signature matches the other constructors.
    pub fn from_image(image: &image::RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_texels(height as usize, width as usize, 4, image.as_raw().as_slice())
    }

    /// Use `filter` for both minification and magnification.
    #[must_use]
    pub fn with_filter(self, filter: Filter) -> Self {
        self.with_filters(filter, filter)
    }

    /// Set the minification and magnification filters.
    #[must_use]
    pub fn with_filters(mut self, min: Filter, mag: Filter) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self
    }

    /// The `(min, mag)` filter pair.
    #[must_use]
    pub fn filters(&self) -> (Filter, Filter) {
        (self.min_filter, self.mag_filter)
    }

    /// Set the wrapping mode.
    #[must_use]
    pub fn with_wrap(mut self, wrap: Wrap) -> Self {
        self.wrap = wrap;
        self
    }

    /// Wrap for sharing.
    #[must_use]
    pub fn shared(self) -> SharedTexture {
        Rc::new(RefCell::new(self))
    }

    /// `(rows, cols, channels)`; 1D textures have one row.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.channels)
    }

    /// Binding point.
    #[must_use]
    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Pixel format.
    #[must_use]
    pub fn format(&self) -> u32 {
        self.format
    }

    /// Storage format.
    #[must_use]
    pub fn internal_format(&self) -> u32 {
        self.internal_format
    }

    /// Bytes per texel.
    #[must_use]
    pub fn texel_size(&self) -> usize {
        self.channels * self.dtype.size()
    }

    /// Bytes per row.
    #[must_use]
    pub fn row_stride(&self) -> usize {
        self.cols * self.texel_size()
    }

    /// CPU-side texels.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Byte range that the next activation uploads, before snapping.
    #[must_use]
    pub fn pending_range(&self) -> Option<Range<usize>> {
        self.pending.get()
    }

    /// Overwrite raw bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] past the end of the texel grid.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(Error::OutOfBounds {
                offset,
                len: data.len(),
                size: self.data.len(),
            })?;
        self.data[offset..end].copy_from_slice(data);
        self.pending.mark(offset..end);
        self.state.invalidate_data();
        Ok(())
    }

    /// Overwrite the `width` x `height` texel rectangle at `(x, y)` with
    /// tightly packed row-major texels.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] when the rectangle leaves the texture or
    /// `data` has the wrong size.
    pub fn set_region(
        &mut self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        data: &[u8],
    ) -> Result<()> {
        let texel = self.texel_size();
        let row_len = width * texel;
        if x + width > self.cols || y + height > self.rows || data.len() != row_len * height {
            return Err(Error::OutOfBounds {
                offset: y * self.row_stride() + x * texel,
                len: data.len(),
                size: self.data.len(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        let stride = self.row_stride();
        for (row, chunk) in data.chunks(row_len).enumerate() {
            let start = (y + row) * stride + x * texel;
            self.data[start..start + row_len].copy_from_slice(chunk);
        }
        let first = y * stride + x * texel;
        let last = (y + height - 1) * stride + (x + width) * texel;
        self.pending.mark(first..last);
        self.state.invalidate_data();
        Ok(())
    }

    /// Change the texel dimensions, discarding the contents.
    ///
    /// A live texture is destroyed and recreated on the next activation.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        if self.target == TextureTarget::D1 {
            self.rows = 1;
        } else {
            self.rows = rows;
        }
        self.cols = cols;
        let len = self.rows * self.cols * self.texel_size();
        self.data = vec![0; len];
        self.pending = DirtyRange::covering(0..len);
        self.allocated = false;
        self.state.invalidate_object();
        self.state.invalidate_data();
    }

    /// Use `filter` for both minification and magnification.
    pub fn set_filter(&mut self, filter: Filter) {
        self.set_filters(filter, filter);
    }

    /// Change the `(min, mag)` filters; re-applied on the next activation.
    pub fn set_filters(&mut self, min: Filter, mag: Filter) {
        if self.filters() != (min, mag) {
            self.min_filter = min;
            self.mag_filter = mag;
            self.state.invalidate_setup();
        }
    }

    /// Change the wrapping mode; re-applied on the next activation.
    pub fn set_wrap(&mut self, wrap: Wrap) {
        if self.wrap != wrap {
            self.wrap = wrap;
            self.state.invalidate_setup();
        }
    }

    fn desc(&self) -> TextureDesc {
        TextureDesc {
            target: self.target,
            width: self.cols,
            height: self.rows,
            internal_format: self.internal_format,
            format: self.format,
            gl_type: self.gl_type,
        }
    }

    fn region(&self, range: &Range<usize>) -> TextureRegion {
        let mut region = TextureRegion {
            target: self.target,
            x: 0,
            y: 0,
            width: self.cols,
            height: 1,
            format: self.format,
            gl_type: self.gl_type,
        };
        match self.target {
            TextureTarget::D1 => {
                let texel = self.texel_size();
                region.x = range.start / texel;
                region.width = range.len() / texel;
            }
            TextureTarget::D2 => {
                let stride = self.row_stride();
                region.y = range.start / stride;
                region.height = range.len() / stride;
            }
        }
        region
    }
}

impl GpuResource for Texture {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }

    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
        let handle = gl.create_texture()?;
        self.allocated = false;
        self.pending.mark(0..self.data.len());
        Ok(handle)
    }

    fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        gl.bind_texture(self.target, Some(handle));
        Ok(())
    }

    fn on_unbind(&mut self, gl: &mut dyn Backend, _handle: Handle) {
        gl.bind_texture(self.target, None);
    }

    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
        gl.delete_texture(handle);
        self.allocated = false;
    }

    fn on_setup(&mut self, gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        gl.texture_parameters(
            self.target,
            SamplerParams {
                min_filter: self.min_filter.gl_enum(),
                mag_filter: self.mag_filter.gl_enum(),
                wrap: self.wrap.gl_enum(),
            },
        );
        Ok(())
    }

    fn on_update(&mut self, gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        if !self.allocated {
            gl.allocate_texture(&self.desc());
            self.allocated = true;
        }
        let Some(range) = self.pending.take() else {
            return Ok(());
        };
        let granularity = match self.target {
            TextureTarget::D1 => self.texel_size(),
            TextureTarget::D2 => self.row_stride(),
        };
        let snapped = snap_to_rows(range, granularity);
        let snapped = snapped.start..snapped.end.min(self.data.len());
        if snapped.is_empty() {
            return Ok(());
        }
        let region = self.region(&snapped);
        log::trace!(
            "uploading texture rows {}..{} ({} bytes)",
            region.y,
            region.y + region.height,
            snapped.len()
        );
        gl.upload_texture(&region, &self.data[snapped]);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{Call, HeadlessBackend};

    fn uploads(gl: &HeadlessBackend) -> Vec<(TextureRegion, usize)> {
        gl.calls()
            .iter()
            .filter_map(|c| match c {
                Call::UploadTexture { region, len } => Some((*region, *len)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn channel_counts_map_to_formats() {
        let formats: Vec<u32> = (1..=4)
            .map(|c| Texture::new_2d(2, 2, c, DType::U8).unwrap().format())
            .collect();
        assert_eq!(formats, [glow::RED, glow::RG, glow::RGB, glow::RGBA]);
        assert!(matches!(
            Texture::new_2d(2, 2, 5, DType::U8),
            Err(Error::UnsupportedFormat { channels: 5 })
        ));
    }

    #[test]
    fn element_types() {
        assert_eq!(gl_type_for(DType::U16).unwrap(), glow::UNSIGNED_SHORT);
        assert_eq!(gl_type_for(DType::F32).unwrap(), glow::FLOAT);
        assert!(matches!(
            Texture::new_1d(4, 1, DType::F64),
            Err(Error::UnsupportedType(DType::F64))
        ));
        assert_eq!(internal_format_for(4, DType::F32).unwrap(), glow::RGBA32F);
        assert_eq!(internal_format_for(3, DType::U8).unwrap(), glow::RGB);
    }

    #[test]
    fn snapping() {
        assert_eq!(snap_to_rows(5..13, 4), 4..16);
        assert_eq!(snap_to_rows(8..12, 4), 8..12);
    }

    #[test]
    fn partial_update_is_row_snapped() {
        // 4 rows of 3 RGBA8 texels: 12 bytes per row
        let mut texture = Texture::new_2d(4, 3, 4, DType::U8).unwrap();
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        gl.take_calls();

        texture.write(14, &[255; 3]).unwrap();
        texture.write(26, &[255; 2]).unwrap();
        texture.activate(&mut gl).unwrap();
        let ups = uploads(&gl);
        assert_eq!(ups.len(), 1);
        let (region, len) = ups[0];
        assert_eq!((region.y, region.height, region.width), (1, 2, 3));
        assert_eq!(len, 24);
    }

    #[test]
    fn one_dimensional_updates_snap_to_texels() {
        let mut texture = Texture::new_1d(8, 2, DType::U16).unwrap();
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        gl.take_calls();

        texture.write(5, &[1, 2, 3]).unwrap();
        texture.activate(&mut gl).unwrap();
        let (region, len) = uploads(&gl)[0];
        assert_eq!((region.x, region.width, region.height), (1, 1, 1));
        assert_eq!(len, 4);
    }

    #[test]
    fn set_region_marks_its_rows() {
        let mut texture = Texture::new_2d(8, 8, 1, DType::U8).unwrap();
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        texture.set_region(2, 3, 2, 2, &[9; 4]).unwrap();
        assert_eq!(texture.as_bytes()[3 * 8 + 2], 9);
        assert_eq!(texture.as_bytes()[4 * 8 + 3], 9);
        assert_eq!(texture.pending_range(), Some(26..36));
        assert!(matches!(
            texture.set_region(7, 7, 2, 2, &[0; 4]),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn first_activation_allocates_then_uploads_everything() {
        let mut texture = Texture::new_2d(2, 2, 1, DType::F32).unwrap();
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        let calls = gl.calls();
        assert!(matches!(calls[0], Call::CreateTexture(_)));
        assert!(matches!(calls[2], Call::TextureParameters(TextureTarget::D2, _)));
        assert!(matches!(
            calls[3],
            Call::AllocateTexture(TextureDesc { internal_format: glow::R32F, .. })
        ));
        assert_eq!(uploads(&gl)[0].1, 16);
    }

    #[test]
    fn resize_recreates_the_texture() {
        let mut texture = Texture::new_2d(2, 2, 4, DType::U8).unwrap();
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        let before = texture.handle().unwrap();

        texture.resize(4, 4);
        assert!(texture.flags().needs_delete);
        texture.activate(&mut gl).unwrap();
        assert!(!gl.is_live(before));
        assert_ne!(texture.handle(), Some(before));
        assert_eq!(texture.shape(), (4, 4, 4));
        assert!(gl.calls().iter().any(|c| matches!(
            c,
            Call::AllocateTexture(TextureDesc { width: 4, height: 4, .. })
        )));
    }

    #[test]
    fn sampling_changes_only_rerun_setup() {
        let mut texture = Texture::new_2d(2, 2, 1, DType::U8).unwrap();
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        gl.take_calls();

        texture.set_filter(Filter::Nearest);
        texture.activate(&mut gl).unwrap();
        assert_eq!(
            gl.calls()[1],
            Call::TextureParameters(
                TextureTarget::D2,
                SamplerParams {
                    min_filter: glow::NEAREST,
                    mag_filter: glow::NEAREST,
                    wrap: glow::CLAMP_TO_EDGE,
                }
            )
        );
        assert!(uploads(&gl).is_empty());
    }

    #[test]
    fn min_and_mag_filters_are_independent() {
        let mut texture = Texture::new_2d(2, 2, 1, DType::U8)
            .unwrap()
            .with_filters(Filter::Linear, Filter::Nearest);
        assert_eq!(texture.filters(), (Filter::Linear, Filter::Nearest));
        let mut gl = HeadlessBackend::new();
        texture.activate(&mut gl).unwrap();
        assert!(gl.calls().contains(&Call::TextureParameters(
            TextureTarget::D2,
            SamplerParams {
                min_filter: glow::LINEAR,
                mag_filter: glow::NEAREST,
                wrap: glow::CLAMP_TO_EDGE,
            }
        )));

        texture.set_filters(Filter::Linear, Filter::Nearest);
        assert!(!texture.flags().needs_setup);
        texture.set_filters(Filter::Nearest, Filter::Nearest);
        assert!(texture.flags().needs_setup);
    }

    #[test]
    fn from_image_is_rgba8() {
        let image = image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 4]));
        let texture = Texture::from_image(&image).unwrap();
        assert_eq!(texture.shape(), (2, 3, 4));
        assert_eq!(&texture.as_bytes()[..4], &[1, 2, 3, 4]);
    }
}
