//! Vertex and index buffers with deferred, range-tracked uploads.
//!
//! CPU-side writes only touch the local copy and widen a single pending
//! byte range; the next activation uploads exactly that range. Disjoint
//! writes between two uploads coalesce into their enclosing interval, so the
//! bytes between them are re-uploaded too.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::backend::{AttribPointer, Backend, BufferTarget, Handle, IndexType, Usage};
use crate::dtype::{DType, Element, Field, RecordLayout};
use crate::error::{Error, Result};
use crate::resource::{GpuResource, ResourceState, ResourceView};

/// A buffer shared between the programs and views that use it.
pub type SharedBuffer = Rc<RefCell<Buffer>>;

/// Smallest interval enclosing every write since the last upload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtyRange {
    span: Option<Range<usize>>,
}

impl DirtyRange {
    /// A range covering `range`.
    #[must_use]
    pub fn covering(range: Range<usize>) -> Self {
        let mut dirty = Self::default();
        dirty.mark(range);
        dirty
    }

    /// Widen the pending interval to include `range`. Empty ranges are
    /// ignored.
    pub fn mark(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        self.span = Some(match self.span.take() {
            Some(span) => span.start.min(range.start)..span.end.max(range.end),
            None => range,
        });
    }

    /// The pending interval, if any.
    #[must_use]
    pub fn get(&self) -> Option<Range<usize>> {
        self.span.clone()
    }

    /// Remove and return the pending interval.
    pub fn take(&mut self) -> Option<Range<usize>> {
        self.span.take()
    }
}

/// What the buffer's bytes contain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Structured vertex records.
    Vertex(RecordLayout),
    /// Draw indices.
    Index(IndexType),
}

/// A vertex or index buffer.
#[derive(Debug)]
pub struct Buffer {
    state: ResourceState,
    kind: BufferKind,
    usage: Usage,
    data: Vec<u8>,
    pending: DirtyRange,
    /// Size of the GPU-side storage, `None` until allocated.
    allocated: Option<usize>,
}

impl Buffer {
    fn with_data(kind: BufferKind, data: Vec<u8>) -> Self {
        let pending = DirtyRange::covering(0..data.len());
        Self {
            state: ResourceState::new(),
            kind,
            usage: Usage::default(),
            data,
            pending,
            allocated: None,
        }
    }

    /// A vertex buffer over raw record bytes.
    ///
    /// # Errors
    ///
    /// [`Error::UnstructuredBuffer`] for a layout without fields, and
    /// [`Error::OutOfBounds`] when `data` is not a whole number of records.
    pub fn vertex(layout: RecordLayout, data: Vec<u8>) -> Result<Self> {
        layout.require_structured()?;
        let whole = data.len() - data.len() % layout.stride().max(1);
        if whole != data.len() {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: data.len(),
                size: whole,
            });
        }
        Ok(Self::with_data(BufferKind::Vertex(layout), data))
    }

    /// A vertex buffer of `count` zeroed records.
    ///
    /// # Errors
    ///
    /// [`Error::UnstructuredBuffer`] for a layout without fields.
    pub fn zeroed(layout: RecordLayout, count: usize) -> Result<Self> {
        let data = vec![0; layout.stride() * count];
        Self::vertex(layout, data)
    }

    /// A vertex buffer from `#[repr(C)]` records matching `layout`.
    ///
    /// # Errors
    ///
    /// As [`vertex`](Self::vertex); also [`Error::OutOfBounds`] when the
    /// record type's size differs from the layout stride.
    pub fn from_records<T: bytemuck::Pod>(layout: RecordLayout, records: &[T]) -> Result<Self> {
        if std::mem::size_of::<T>() != layout.stride() {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: std::mem::size_of::<T>(),
                size: layout.stride(),
            });
        }
        Self::vertex(layout, bytemuck::cast_slice(records).to_vec())
    }

    /// An index buffer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidIndexType`] unless `T` is `u8`, `u16` or `u32`.
    pub fn index<T: Element>(indices: &[T]) -> Result<Self> {
        let index_type = match T::DTYPE {
            DType::U8 => IndexType::U8,
            DType::U16 => IndexType::U16,
            DType::U32 => IndexType::U32,
            other => return Err(Error::InvalidIndexType(other)),
        };
        Ok(Self::with_data(
            BufferKind::Index(index_type),
            bytemuck::cast_slice(indices).to_vec(),
        ))
    }

    /// Set the usage hint. Takes effect on the next (re)allocation.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Wrap for sharing between programs and views.
    #[must_use]
    pub fn shared(self) -> SharedBuffer {
        Rc::new(RefCell::new(self))
    }

    /// Overwrite `data.len()` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] when the write would run past the end.
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
        self.mark(offset..end);
        Ok(())
    }

    /// Scatter `values` into the field `name` of consecutive records,
    /// starting at the first. Every `components` values fill that field of
    /// one record, at the field's offset; the record's other fields are left
    /// alone. A short final group fills only the leading components.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownProgramKey`] for an unknown field,
    /// [`Error::TypeMismatch`] when `T` differs from the field type, and
    /// [`Error::OutOfBounds`] when `values` spans more records than exist.
    pub fn write_field<T: Element>(&mut self, name: &str, values: &[T]) -> Result<()> {
        let BufferKind::Vertex(layout) = &self.kind else {
            return Err(Error::UnstructuredBuffer);
        };
        let (_, field) = layout
            .get(name)
            .ok_or_else(|| Error::UnknownProgramKey(name.to_owned()))?;
        if field.dtype != T::DTYPE {
            return Err(Error::TypeMismatch {
                name: name.to_owned(),
                expected: field.dtype.name(),
                found: T::DTYPE.name(),
            });
        }
        let (offset, field_size, stride) = (field.offset, field.size(), layout.stride());
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let records = bytes.len().div_ceil(field_size);
        if records * stride > self.data.len() {
            return Err(Error::OutOfBounds {
                offset,
                len: records * stride,
                size: self.data.len(),
            });
        }
        for (record, chunk) in bytes.chunks(field_size).enumerate() {
            let start = record * stride + offset;
            self.data[start..start + chunk.len()].copy_from_slice(chunk);
        }
        if records > 0 {
            let last = (records - 1) * stride + offset + field_size;
            self.mark(offset..last.min(self.data.len()));
        }
        Ok(())
    }

    /// Replace the whole contents. A size change reallocates GPU storage on
    /// the next upload.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] when a vertex buffer is given a partial record.
    pub fn set_data(&mut self, data: Vec<u8>) -> Result<()> {
        let element = self.element_size();
        if data.len() % element != 0 {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: data.len(),
                size: data.len() - data.len() % element,
            });
        }
        self.data = data;
        self.pending = DirtyRange::default();
        self.mark(0..self.data.len());
        Ok(())
    }

    fn mark(&mut self, range: Range<usize>) {
        self.pending.mark(range);
        self.state.invalidate_data();
    }

    /// Byte range that the next activation uploads.
    #[must_use]
    pub fn pending_range(&self) -> Option<Range<usize>> {
        self.pending.get()
    }

    /// CPU-side contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of records (vertex buffers) or indices (index buffers).
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / self.element_size()
    }

    /// Bytes per record (vertex buffers) or per index (index buffers).
    #[must_use]
    pub fn stride(&self) -> usize {
        self.element_size()
    }

    fn element_size(&self) -> usize {
        match &self.kind {
            BufferKind::Vertex(layout) => layout.stride().max(1),
            BufferKind::Index(IndexType::U8) => 1,
            BufferKind::Index(IndexType::U16) => 2,
            BufferKind::Index(IndexType::U32) => 4,
        }
    }

    /// Contents description.
    #[must_use]
    pub fn kind(&self) -> &BufferKind {
        &self.kind
    }

    /// Index element type, for index buffers.
    #[must_use]
    pub fn index_type(&self) -> Option<IndexType> {
        match self.kind {
            BufferKind::Index(index_type) => Some(index_type),
            BufferKind::Vertex(_) => None,
        }
    }

    /// Binding point.
    #[must_use]
    pub fn target(&self) -> BufferTarget {
        match self.kind {
            BufferKind::Vertex(_) => BufferTarget::Vertex,
            BufferKind::Index(_) => BufferTarget::Index,
        }
    }
}

impl GpuResource for Buffer {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }

    fn on_create(&mut self, gl: &mut dyn Backend) -> Result<Handle> {
        let handle = gl.create_buffer()?;
        self.allocated = None;
        self.pending.mark(0..self.data.len());
        Ok(handle)
    }

    fn on_bind(&mut self, gl: &mut dyn Backend, handle: Handle) -> Result<()> {
        gl.bind_buffer(self.target(), Some(handle));
        Ok(())
    }

    fn on_unbind(&mut self, gl: &mut dyn Backend, _handle: Handle) {
        gl.bind_buffer(self.target(), None);
    }

    fn on_delete(&mut self, gl: &mut dyn Backend, handle: Handle) {
        gl.delete_buffer(handle);
        self.allocated = None;
    }

    fn on_update(&mut self, gl: &mut dyn Backend, _handle: Handle) -> Result<()> {
        let target = self.target();
        if self.allocated != Some(self.data.len()) {
            gl.allocate_buffer(target, self.data.len(), self.usage);
            self.allocated = Some(self.data.len());
        }
        if let Some(range) = self.pending.take() {
            log::trace!("uploading buffer bytes {range:?}");
            gl.upload_buffer(target, range.start, &self.data[range]);
        }
        Ok(())
    }
}

/// One field of a structured vertex buffer, as seen by an attribute.
///
/// Shares the base buffer's GPU object; activating the view activates (and
/// uploads) the base.
#[derive(Clone, Debug)]
pub struct BufferView {
    base: SharedBuffer,
    field: Field,
    stride: usize,
}

impl BufferView {
    /// View the field `name` of `base`. `None` if `base` is not a vertex
    /// buffer or has no such field.
    #[must_use]
    pub fn new(base: &SharedBuffer, name: &str) -> Option<Self> {
        let buffer = base.borrow();
        let BufferKind::Vertex(layout) = buffer.kind() else {
            return None;
        };
        let (_, field) = layout.get(name)?;
        Some(Self {
            field: field.clone(),
            stride: layout.stride(),
            base: Rc::clone(base),
        })
    }

    /// Field being viewed.
    #[must_use]
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Byte offset of the field inside a record.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.field.offset
    }

    /// Bytes between consecutive records.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Components per record.
    #[must_use]
    pub fn components(&self) -> usize {
        self.field.components
    }

    /// Number of records in the base buffer.
    #[must_use]
    pub fn count(&self) -> usize {
        self.base.borrow().count()
    }

    /// Attribute pointer describing this field.
    #[must_use]
    pub fn pointer(&self, normalized: bool) -> AttribPointer {
        AttribPointer {
            components: self.field.components,
            gl_type: self.field.dtype.gl_enum(),
            normalized,
            stride: self.stride,
            offset: self.field.offset,
        }
    }
}

impl ResourceView for BufferView {
    type Base = Buffer;

    fn base(&self) -> &SharedBuffer {
        &self.base
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{Call, HeadlessBackend};

    fn layout() -> RecordLayout {
        RecordLayout::new()
            .field("position", DType::F32, 2)
            .field("size", DType::F32, 1)
    }

    fn uploads(gl: &HeadlessBackend) -> Vec<(usize, usize)> {
        gl.calls()
            .iter()
            .filter_map(|c| match c {
                Call::UploadBuffer { offset, len, .. } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn dirty_range_is_the_enclosing_interval() {
        let mut buffer = Buffer::zeroed(layout(), 4).unwrap();
        let mut gl = HeadlessBackend::new();
        buffer.activate(&mut gl).unwrap();
        assert_eq!(buffer.pending_range(), None);

        buffer.write(0, &[1; 4]).unwrap();
        buffer.write(10, &[2; 4]).unwrap();
        assert_eq!(buffer.pending_range(), Some(0..14));
    }

    #[test]
    fn update_uploads_exactly_the_pending_span() {
        let mut buffer = Buffer::zeroed(layout(), 4).unwrap();
        let mut gl = HeadlessBackend::new();
        buffer.activate(&mut gl).unwrap();
        assert_eq!(uploads(&gl), [(0, 48)]);
        gl.take_calls();

        buffer.write(20, &[7; 4]).unwrap();
        buffer.write(8, &[7; 4]).unwrap();
        buffer.activate(&mut gl).unwrap();
        assert_eq!(uploads(&gl), [(8, 16)]);
        assert!(!gl
            .calls()
            .iter()
            .any(|c| matches!(c, Call::AllocateBuffer { .. })));
        assert_eq!(buffer.pending_range(), None);
    }

    #[test]
    fn nothing_pending_uploads_nothing() {
        let mut buffer = Buffer::zeroed(layout(), 2).unwrap();
        let mut gl = HeadlessBackend::new();
        buffer.activate(&mut gl).unwrap();
        gl.take_calls();
        buffer.activate(&mut gl).unwrap();
        assert!(uploads(&gl).is_empty());
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let mut buffer = Buffer::zeroed(layout(), 1).unwrap();
        assert!(matches!(
            buffer.write(10, &[0; 4]),
            Err(Error::OutOfBounds { size: 12, .. })
        ));
    }

    #[test]
    fn resizing_reallocates_storage() {
        let mut buffer = Buffer::zeroed(layout(), 1).unwrap();
        let mut gl = HeadlessBackend::new();
        buffer.activate(&mut gl).unwrap();
        gl.take_calls();

        buffer.set_data(vec![0; 36]).unwrap();
        buffer.activate(&mut gl).unwrap();
        assert!(gl.calls().contains(&Call::AllocateBuffer {
            target: BufferTarget::Vertex,
            size: 36,
            usage: Usage::Dynamic,
        }));
        assert_eq!(uploads(&gl), [(0, 36)]);
    }

    #[test]
    fn write_field_scatters_into_records() {
        let mut buffer = Buffer::zeroed(layout(), 3).unwrap();
        let mut gl = HeadlessBackend::new();
        buffer.activate(&mut gl).unwrap();

        buffer.write_field("size", &[1.0_f32, 2.0, 3.0]).unwrap();
        let sizes: Vec<f32> = buffer
            .as_bytes()
            .chunks(12)
            .map(|r| bytemuck::pod_read_unaligned(&r[8..12]))
            .collect();
        assert_eq!(sizes, [1.0, 2.0, 3.0]);
        assert_eq!(buffer.pending_range(), Some(8..36));
    }

    #[test]
    fn write_field_fills_components_and_leaves_other_fields() {
        let mut buffer = Buffer::zeroed(layout(), 2).unwrap();
        buffer.write_field("size", &[9.0_f32, 9.0]).unwrap();
        buffer.write_field("position", &[1.0_f32, 2.0, 3.0]).unwrap();
        let records: Vec<[f32; 3]> = buffer
            .as_bytes()
            .chunks(12)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(records, [[1.0, 2.0, 9.0], [3.0, 0.0, 9.0]]);
    }

    #[test]
    fn write_field_checks_type() {
        let mut buffer = Buffer::zeroed(layout(), 1).unwrap();
        assert!(matches!(
            buffer.write_field("size", &[1_u32]),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            buffer.write_field("missing", &[1.0_f32]),
            Err(Error::UnknownProgramKey(_))
        ));
    }

    #[test]
    fn vertex_buffer_needs_fields() {
        assert!(matches!(
            Buffer::vertex(RecordLayout::new(), Vec::new()),
            Err(Error::UnstructuredBuffer)
        ));
    }

    #[test]
    fn index_types() {
        let buffer = Buffer::index(&[0_u16, 1, 2]).unwrap();
        assert_eq!(buffer.index_type(), Some(IndexType::U16));
        assert_eq!(buffer.count(), 3);
        assert_eq!(buffer.target(), BufferTarget::Index);
        assert!(matches!(
            Buffer::index(&[0.0_f32]),
            Err(Error::InvalidIndexType(DType::F32))
        ));
    }

    #[test]
    fn view_shares_the_base_handle() {
        let base = Buffer::zeroed(layout(), 5).unwrap().shared();
        let view = BufferView::new(&base, "size").unwrap();
        assert_eq!(view.offset(), 8);
        assert_eq!(view.stride(), 12);
        assert_eq!(view.count(), 5);

        let mut gl = HeadlessBackend::new();
        view.activate(&mut gl).unwrap();
        assert!(view.handle().is_some());
        assert_eq!(view.handle(), base.borrow().handle());
        assert!(BufferView::new(&base, "missing").is_none());
    }
}
