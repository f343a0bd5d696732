//! Texture atlases packed with the Skyline Bottom-Left heuristic.
//!
//! The skyline is the upper boundary of the space packed so far, stored as a
//! list of horizontal segments sorted by `x` and covering the full width. A
//! request is placed at the segment where its top edge ends up lowest,
//! preferring the narrowest segment on ties. Regions are never freed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::backend::Backend;
use crate::dtype::DType;
use crate::error::Result;
use crate::resource::GpuResource;
use crate::texture::{SharedTexture, Texture};

/// One horizontal segment of the skyline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Left edge.
    pub x: usize,
    /// Height of the packed space under this segment.
    pub y: usize,
    /// Segment width.
    pub width: usize,
}

/// An allocated rectangle, in texels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    /// Left edge.
    pub x: usize,
    /// Top edge.
    pub y: usize,
    /// Width.
    pub width: usize,
    /// Height.
    pub height: usize,
}

/// Skyline bin packer for a fixed `width` x `height` area.
#[derive(Clone, Debug)]
pub struct Skyline {
    width: usize,
    height: usize,
    nodes: Vec<Node>,
    used: usize,
}

impl Skyline {
    /// An empty packer.
    #[must_use]
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            width,
            height,
            nodes: vec![Node { x: 0, y: 0, width }],
            used: 0,
        }
    }

    /// Current skyline segments, sorted by `x`.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Texels handed out so far.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// `(height, width)` of the packed area.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Lowest `y` at which a `width` x `height` rectangle anchored at node
    /// `index` clears every segment it spans.
    fn fit(&self, index: usize, height: usize, width: usize) -> Option<usize> {
        let anchor = self.nodes[index];
        if anchor.x + width > self.width {
            return None;
        }
        let mut y = anchor.y;
        let mut left = width;
        for node in &self.nodes[index..] {
            if left == 0 {
                break;
            }
            y = y.max(node.y);
            if y + height > self.height {
                return None;
            }
            left = left.saturating_sub(node.width);
        }
        (left == 0).then_some(y)
    }

    /// Reserve a `height` x `width` rectangle.
    ///
    /// Returns `None` when nothing fits; zero-sized requests never fit.
    pub fn allocate(&mut self, height: usize, width: usize) -> Option<Region> {
        if width == 0 || height == 0 {
            return None;
        }

        let mut best: Option<(usize, usize, usize, Region)> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            let Some(y) = self.fit(index, height, width) else {
                continue;
            };
            let top = y + height;
            let better = match best {
                None => true,
                Some((best_top, best_width, _, _)) => {
                    top < best_top || (top == best_top && node.width < best_width)
                }
            };
            if better {
                let region = Region {
                    x: node.x,
                    y,
                    width,
                    height,
                };
                best = Some((top, node.width, index, region));
            }
        }
        let (_, _, index, region) = best?;

        self.nodes.insert(
            index,
            Node {
                x: region.x,
                y: region.y + height,
                width,
            },
        );

        // Shrink or drop segments now covered by the new one.
        let i = index + 1;
        while i < self.nodes.len() {
            let prev = self.nodes[i - 1];
            let edge = prev.x + prev.width;
            let node = &mut self.nodes[i];
            if node.x >= edge {
                break;
            }
            let shrink = edge - node.x;
            if shrink >= node.width {
                self.nodes.remove(i);
                continue;
            }
            node.x += shrink;
            node.width -= shrink;
            break;
        }

        self.merge();
        self.used += width * height;
        Some(region)
    }

    /// Fuse neighbouring segments at the same height.
    fn merge(&mut self) {
        let mut i = 0;
        while i + 1 < self.nodes.len() {
            if self.nodes[i].y == self.nodes[i + 1].y {
                self.nodes[i].width += self.nodes[i + 1].width;
                self.nodes.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

/// A skyline packer paired with its backing texture.
#[derive(Debug)]
pub struct Atlas {
    skyline: Skyline,
    texture: SharedTexture,
}

impl Atlas {
    /// An empty atlas over a new `height` x `width` texture.
    ///
    /// # Errors
    ///
    /// As [`Texture::new_2d`].
    pub fn new(height: usize, width: usize, channels: usize, dtype: DType) -> Result<Self> {
        let texture = Texture::new_2d(height, width, channels, dtype)?.shared();
        log::debug!("created {width}x{height} atlas with {channels} channels");
        Ok(Self {
            skyline: Skyline::new(height, width),
            texture,
        })
    }

    /// Reserve a region; `None` when the atlas is full.
    pub fn allocate(&mut self, height: usize, width: usize) -> Option<Region> {
        let region = self.skyline.allocate(height, width);
        if region.is_none() {
            log::warn!(
                "atlas full: no room for {width}x{height} ({} texels used)",
                self.skyline.used()
            );
        }
        region
    }

    /// Copy tightly packed texels into `region` of the backing texture.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`](crate::Error::OutOfBounds) when `data` does
    /// not match the region size.
    pub fn set_region(&mut self, region: Region, data: &[u8]) -> Result<()> {
        self.texture.borrow_mut().set_region(
            region.x,
            region.y,
            region.width,
            region.height,
            data,
        )
    }

    /// Backing texture.
    #[must_use]
    pub fn texture(&self) -> &SharedTexture {
        &self.texture
    }

    /// The packer.
    #[must_use]
    pub fn skyline(&self) -> &Skyline {
        &self.skyline
    }

    /// Texels handed out so far.
    #[must_use]
    pub fn used(&self) -> usize {
        self.skyline.used()
    }
}

/// Shape shared by every atlas in a cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtlasShape {
    /// Rows.
    pub height: usize,
    /// Columns.
    pub width: usize,
    /// Channels per texel.
    pub channels: usize,
    /// Element type.
    pub dtype: DType,
}

impl Default for AtlasShape {
    fn default() -> Self {
        Self {
            height: 1024,
            width: 1024,
            channels: 1,
            dtype: DType::U8,
        }
    }
}

/// Named atlases created on first use.
///
/// Owned by the caller; nothing is torn down implicitly. Call
/// [`clear`](Self::clear) with the backend to release the textures.
#[derive(Debug, Default)]
pub struct AtlasCache {
    shape: AtlasShape,
    atlases: HashMap<String, Atlas>,
}

impl AtlasCache {
    /// An empty cache creating atlases of `shape`.
    #[must_use]
    pub fn new(shape: AtlasShape) -> Self {
        Self {
            shape,
            atlases: HashMap::new(),
        }
    }

    /// The atlas for `key`, created if missing.
    ///
    /// # Errors
    ///
    /// As [`Atlas::new`].
    pub fn get_or_create(&mut self, key: &str) -> Result<&mut Atlas> {
        match self.atlases.entry(key.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let AtlasShape {
                    height,
                    width,
                    channels,
                    dtype,
                } = self.shape;
                Ok(entry.insert(Atlas::new(height, width, channels, dtype)?))
            }
        }
    }

    /// The atlas for `key`, if created.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Atlas> {
        self.atlases.get(key)
    }

    /// Number of atlases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.atlases.len()
    }

    /// Whether no atlas has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atlases.is_empty()
    }

    /// Delete every texture and forget every atlas.
    pub fn clear(&mut self, gl: &mut dyn Backend) {
        for (_, atlas) in self.atlases.drain() {
            atlas.texture.borrow_mut().delete(gl);
        }
    }
}
