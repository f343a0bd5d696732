//! Packing per-item uniform records into an RGBA32F texture.
//!
//! Each record of `n` floats takes `t = next_power_of_two(ceil(n / 4))`
//! texels. A row is [`ROW_TEXELS`] texels wide and holds `ROW_TEXELS / t`
//! records, so a record never straddles two rows and a shader finds record
//! `i` at texel `(i / per_row, (i % per_row) * t)`.

use crate::error::{Error, Result};
use crate::texture::Texture;

/// Texels per packed row.
pub const ROW_TEXELS: usize = 1024;

/// Placement of `count` records of `floats` floats each.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Packing {
    floats: usize,
    count: usize,
    texels_per_record: usize,
    records_per_row: usize,
}

impl Packing {
    /// Compute the placement.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] when one record needs more than a row.
    pub fn new(floats: usize, count: usize) -> Result<Self> {
        let texels_per_record = floats.div_ceil(4).next_power_of_two();
        if texels_per_record > ROW_TEXELS {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: texels_per_record,
                size: ROW_TEXELS,
            });
        }
        Ok(Self {
            floats,
            count,
            texels_per_record,
            records_per_row: ROW_TEXELS / texels_per_record,
        })
    }

    /// Texels per record.
    #[must_use]
    pub fn texels_per_record(&self) -> usize {
        self.texels_per_record
    }

    /// Records per row.
    #[must_use]
    pub fn records_per_row(&self) -> usize {
        self.records_per_row
    }

    /// Texture shape `(rows, cols, 4)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        let rows = self.count.div_ceil(self.records_per_row);
        (rows, self.records_per_row * self.texels_per_record, 4)
    }

    /// `(row, col)` of the first texel of record `index`.
    #[must_use]
    pub fn texel(&self, index: usize) -> (usize, usize) {
        (
            index / self.records_per_row,
            (index % self.records_per_row) * self.texels_per_record,
        )
    }

    /// Lay `records` (`floats` values each, back to back) out in a new
    /// texture. Padding texels are zero.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] when `records` is not `count * floats` long.
    pub fn pack(&self, records: &[f32]) -> Result<Texture> {
        if records.len() != self.count * self.floats {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: records.len(),
                size: self.count * self.floats,
            });
        }
        let (rows, cols, channels) = self.shape();
        let mut texels = vec![0.0_f32; rows * cols * channels];
        if self.floats > 0 {
            for (index, record) in records.chunks(self.floats).enumerate() {
                let (row, col) = self.texel(index);
                let start = (row * cols + col) * channels;
                texels[start..start + record.len()].copy_from_slice(record);
            }
        }
        Texture::from_texels(rows, cols, channels, &texels)
    }
}

/// Shorthand for [`Packing::new`] followed by [`Packing::pack`].
///
/// # Errors
///
/// As those two.
pub fn pack(records: &[f32], floats: usize) -> Result<Texture> {
    let count = if floats == 0 { 0 } else { records.len() / floats };
    Packing::new(floats, count)?.pack(records)
}
