//! Uniform and attribute slots of a program.
//!
//! Each slot keeps its value CPU-side with a dirty flag; the owning program
//! uploads dirty, active slots when it is activated. Activity and locations
//! come from post-link reflection; until then every slot is inactive.

use std::rc::Rc;

use crate::backend::{Backend, Location, UniformData};
use crate::buffer::BufferView;
use crate::error::{Error, Result};
use crate::glsl::GlslType;
use crate::resource::ResourceView;
use crate::texture::SharedTexture;

/// A value assignable to a uniform.
#[derive(Clone, Debug)]
pub enum UniformValue {
    /// Plain data.
    Data(UniformData),
    /// A texture for a sampler uniform; the unit is assigned at bind time.
    Texture(SharedTexture),
}

impl UniformValue {
    /// Short name of the value's shape, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data(UniformData::Float(_)) => "float",
            Self::Data(UniformData::Vec2(_)) => "vec2",
            Self::Data(UniformData::Vec3(_)) => "vec3",
            Self::Data(UniformData::Vec4(_)) => "vec4",
            Self::Data(UniformData::Int(_)) => "int",
            Self::Data(UniformData::IVec2(_)) => "ivec2",
            Self::Data(UniformData::IVec3(_)) => "ivec3",
            Self::Data(UniformData::IVec4(_)) => "ivec4",
            Self::Data(UniformData::Mat2(_)) => "mat2",
            Self::Data(UniformData::Mat3(_)) => "mat3",
            Self::Data(UniformData::Mat4(_)) => "mat4",
            Self::Texture(_) => "texture",
        }
    }
}

impl PartialEq for UniformValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Texture(a), Self::Texture(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(value: $ty) -> Self {
                Self::Data(UniformData::$variant(value))
            }
        })*
    };
}

uniform_from! {
    f32 => Float,
    [f32; 2] => Vec2,
    [f32; 3] => Vec3,
    [f32; 4] => Vec4,
    i32 => Int,
    [i32; 2] => IVec2,
    [i32; 3] => IVec3,
    [i32; 4] => IVec4,
    [f32; 9] => Mat3,
    [f32; 16] => Mat4,
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        Self::Data(UniformData::Int(i32::from(value)))
    }
}

impl From<UniformData> for UniformValue {
    fn from(value: UniformData) -> Self {
        Self::Data(value)
    }
}

impl From<SharedTexture> for UniformValue {
    fn from(value: SharedTexture) -> Self {
        Self::Texture(value)
    }
}

/// Convert `data` to the shape `gtype` expects, or `None` if it cannot.
fn coerce(gtype: GlslType, data: UniformData) -> Option<UniformData> {
    use UniformData as D;
    Some(match (gtype, data) {
        (GlslType::Float, D::Float(_))
        | (GlslType::Vec2, D::Vec2(_))
        | (GlslType::Vec3, D::Vec3(_))
        | (GlslType::Vec4, D::Vec4(_))
        | (GlslType::Int | GlslType::Bool, D::Int(_))
        | (GlslType::IVec2 | GlslType::BVec2, D::IVec2(_))
        | (GlslType::IVec3 | GlslType::BVec3, D::IVec3(_))
        | (GlslType::IVec4 | GlslType::BVec4, D::IVec4(_))
        | (GlslType::Mat2, D::Mat2(_))
        | (GlslType::Mat3, D::Mat3(_))
        | (GlslType::Mat4, D::Mat4(_)) => data,
        #[expect(clippy::cast_precision_loss)]
        (GlslType::Float, D::Int(i)) => D::Float(i as f32),
        (GlslType::Mat2, D::Vec4(m)) => D::Mat2(m),
        _ => return None,
    })
}

/// A uniform slot.
#[derive(Clone, Debug)]
pub struct Uniform {
    name: String,
    gtype: GlslType,
    value: Option<UniformValue>,
    unit: Option<u32>,
    location: Option<Location>,
    active: bool,
    dirty: bool,
}

impl Uniform {
    /// An unset, inactive slot.
    #[must_use]
    pub fn new(name: impl Into<String>, gtype: GlslType) -> Self {
        Self {
            name: name.into(),
            gtype,
            value: None,
            unit: None,
            location: None,
            active: false,
            dirty: false,
        }
    }

    /// Name, with `[i]` suffix for array elements.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    pub fn gtype(&self) -> GlslType {
        self.gtype
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> Option<&UniformValue> {
        self.value.as_ref()
    }

    /// Whether the linked program uses this uniform.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the value changed since the last upload.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Location in the linked program.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Texture unit assigned at the last bind, for samplers.
    #[must_use]
    pub fn unit(&self) -> Option<u32> {
        self.unit
    }

    /// Assign a value.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] when the value does not fit the declared
    /// type. Samplers take textures only.
    pub fn set(&mut self, value: UniformValue) -> Result<()> {
        let value = self.check(value)?;
        self.value = Some(value);
        self.dirty = true;
        Ok(())
    }

    /// Assign unless the value is unchanged; returns whether it changed.
    pub(crate) fn set_if_changed(&mut self, value: &UniformValue) -> Result<bool> {
        let value = self.check(value.clone())?;
        if self.value.as_ref() == Some(&value) {
            return Ok(false);
        }
        self.value = Some(value);
        self.dirty = true;
        Ok(true)
    }

    fn check(&self, value: UniformValue) -> Result<UniformValue> {
        let found = value.kind();
        let checked = match value {
            UniformValue::Texture(_) if self.gtype.is_sampler() => Some(value),
            UniformValue::Data(data) if !self.gtype.is_sampler() => {
                coerce(self.gtype, data).map(UniformValue::Data)
            }
            _ => None,
        };
        checked.ok_or_else(|| Error::TypeMismatch {
            name: self.name.clone(),
            expected: if self.gtype.is_sampler() {
                "texture"
            } else {
                self.gtype.name()
            },
            found,
        })
    }

    pub(crate) fn reflect(&mut self, active: bool, location: Option<Location>) {
        self.active = active && location.is_some();
        self.location = location;
        self.unit = None;
        self.dirty = self.value.is_some();
    }

    /// Record the texture unit for this sampler; returns whether it moved.
    pub(crate) fn bind_unit(&mut self, unit: u32) -> bool {
        if self.unit == Some(unit) {
            return false;
        }
        self.unit = Some(unit);
        self.dirty = true;
        true
    }

    /// Upload if active and dirty.
    pub(crate) fn upload(&mut self, gl: &mut dyn Backend) {
        let (true, true, Some(location)) = (self.active, self.dirty, self.location) else {
            return;
        };
        let data = match &self.value {
            Some(UniformValue::Data(data)) => *data,
            Some(UniformValue::Texture(_)) => match self.unit.and_then(|u| i32::try_from(u).ok()) {
                Some(unit) => UniformData::Int(unit),
                None => return,
            },
            None => return,
        };
        log::trace!("uniform {} = {data:?}", self.name);
        gl.set_uniform(location, &data);
        self.dirty = false;
    }
}

/// Where an attribute takes its values from.
#[derive(Clone, Debug)]
pub enum AttributeBinding {
    /// One field of a structured vertex buffer.
    Buffer(BufferView),
    /// The same value for every vertex.
    Constant([f32; 4]),
}

impl AttributeBinding {
    /// Short name of the binding kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer view",
            Self::Constant(_) => "constant",
        }
    }

    /// A constant binding from scalar or vector uniform data; missing
    /// components default to `(0, 0, 0, 1)`.
    #[must_use]
    pub fn constant(data: UniformData) -> Option<Self> {
        let mut value = [0.0, 0.0, 0.0, 1.0];
        match data {
            UniformData::Float(x) => value[0] = x,
            UniformData::Vec2(v) => value[..2].copy_from_slice(&v),
            UniformData::Vec3(v) => value[..3].copy_from_slice(&v),
            UniformData::Vec4(v) => value = v,
            _ => return None,
        }
        Some(Self::Constant(value))
    }
}

impl From<BufferView> for AttributeBinding {
    fn from(view: BufferView) -> Self {
        Self::Buffer(view)
    }
}

/// An attribute slot.
#[derive(Clone, Debug)]
pub struct Attribute {
    name: String,
    gtype: GlslType,
    binding: Option<AttributeBinding>,
    location: Option<u32>,
    active: bool,
    normalized: bool,
}

impl Attribute {
    /// An unbound, inactive slot.
    #[must_use]
    pub fn new(name: impl Into<String>, gtype: GlslType) -> Self {
        Self {
            name: name.into(),
            gtype,
            binding: None,
            location: None,
            active: false,
            normalized: false,
        }
    }

    /// Name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    pub fn gtype(&self) -> GlslType {
        self.gtype
    }

    /// Current binding.
    #[must_use]
    pub fn binding(&self) -> Option<&AttributeBinding> {
        self.binding.as_ref()
    }

    /// Whether the linked program uses this attribute.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Attribute index in the linked program.
    #[must_use]
    pub fn location(&self) -> Option<u32> {
        self.location
    }

    /// Number of vertices behind a buffer binding.
    #[must_use]
    pub fn count(&self) -> Option<usize> {
        match &self.binding {
            Some(AttributeBinding::Buffer(view)) => Some(view.count()),
            _ => None,
        }
    }

    /// Normalize integer buffer data to `[0, 1]` or `[-1, 1]`.
    pub fn set_normalized(&mut self, normalized: bool) {
        self.normalized = normalized;
    }

    /// Bind a source. A matrix attribute takes a field holding every
    /// column, one after the other.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] for a buffer field with more than four
    /// components, or, for a matrix, a field whose size is not a whole
    /// matrix.
    pub fn set(&mut self, binding: AttributeBinding) -> Result<()> {
        if let AttributeBinding::Buffer(view) = &binding {
            let columns = self.gtype.columns();
            let fits = if columns > 1 {
                view.components() == self.gtype.components()
            } else {
                (1..=4).contains(&view.components())
            };
            if !fits {
                return Err(Error::TypeMismatch {
                    name: self.name.clone(),
                    expected: if columns > 1 {
                        "a field holding the whole matrix"
                    } else {
                        "a field of 1 to 4 components"
                    },
                    found: "a field of another width",
                });
            }
        }
        self.binding = Some(binding);
        Ok(())
    }

    pub(crate) fn reflect(&mut self, active: bool, location: Option<u32>) {
        self.active = active && location.is_some();
        self.location = location;
    }

    pub(crate) fn bind(&self, gl: &mut dyn Backend) -> Result<()> {
        let (true, Some(location)) = (self.active, self.location) else {
            return Ok(());
        };
        match &self.binding {
            Some(AttributeBinding::Buffer(view)) => {
                view.activate(gl)?;
                let columns = self.gtype.columns();
                let mut pointer = view.pointer(self.normalized);
                pointer.components /= columns;
                let column_bytes = pointer.components * view.field().dtype.size();
                for column in (0..columns).filter_map(|c| u32::try_from(c).ok()) {
                    gl.enable_attribute(location + column);
                    gl.attribute_pointer(location + column, &pointer);
                    pointer.offset += column_bytes;
                }
            }
            Some(AttributeBinding::Constant(value)) => {
                gl.disable_attribute(location);
                gl.attribute_constant(location, *value);
            }
            None => {}
        }
        Ok(())
    }

    pub(crate) fn unbind(&self, gl: &mut dyn Backend) {
        if let (true, Some(location), Some(AttributeBinding::Buffer(_))) =
            (self.active, self.location, &self.binding)
        {
            for column in (0..self.gtype.columns()).filter_map(|c| u32::try_from(c).ok()) {
                gl.disable_attribute(location + column);
            }
        }
    }
}
