//! Element types and structured record layouts for CPU-side data.
//!
//! Buffers and textures hold raw bytes; these types describe how to read
//! them. A [`RecordLayout`] is the structured (named-field) description of
//! one vertex, tightly packed in field order.

use crate::error::{Error, Result};

/// Scalar element type of buffer or texture data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    /// `i8`.
    I8,
    /// `u8`.
    U8,
    /// `i16`.
    I16,
    /// `u16`.
    U16,
    /// `i32`.
    I32,
    /// `u32`.
    U32,
    /// `f32`.
    F32,
    /// `f64`; valid for CPU-side records only, GL has no texture type for it.
    F64,
}

impl DType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Rust name of the element type.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// GL component type for attribute pointers.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::I8 => glow::BYTE,
            Self::U8 => glow::UNSIGNED_BYTE,
            Self::I16 => glow::SHORT,
            Self::U16 => glow::UNSIGNED_SHORT,
            Self::I32 => glow::INT,
            Self::U32 => glow::UNSIGNED_INT,
            Self::F32 => glow::FLOAT,
            Self::F64 => glow::DOUBLE,
        }
    }
}

/// Rust element types that map onto a [`DType`].
pub trait Element: bytemuck::Pod {
    /// The matching element type.
    const DTYPE: DType;
}

macro_rules! element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

element! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    f32 => F32,
    f64 => F64,
}

/// One named field of a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name, matched against attribute names.
    pub name: String,
    /// Component type.
    pub dtype: DType,
    /// Components per record: 1 to 4 for vector attributes, every column
    /// for matrix attributes.
    pub components: usize,
    /// Byte offset inside the record.
    pub offset: usize,
}

impl Field {
    /// Size of the field in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.dtype.size() * self.components
    }
}

/// Tightly packed structured record layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordLayout {
    fields: Vec<Field>,
    stride: usize,
}

impl RecordLayout {
    /// An empty layout; add fields with [`field`](Self::field).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, packed directly after the previous one.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, dtype: DType, components: usize) -> Self {
        let field = Field {
            name: name.into(),
            dtype,
            components,
            offset: self.stride,
        };
        self.stride += field.size();
        self.fields.push(field);
        self
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look a field up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Bytes per record.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Whether the layout has at least one field.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Reject layouts without fields.
    ///
    /// # Errors
    ///
    /// [`Error::UnstructuredBuffer`] for an empty layout.
    pub fn require_structured(&self) -> Result<()> {
        if self.is_structured() {
            Ok(())
        } else {
            Err(Error::UnstructuredBuffer)
        }
    }
}
