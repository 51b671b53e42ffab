//! Bitmaps and the per-hierarchy bitmap cache.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

/// RGBA8888 pixel buffer.
///
/// Pixels live behind an `Arc`; an immutable bitmap can be shared freely
/// between threads. Mutable bitmaps copy on write.
#[derive(Clone)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Arc<Vec<u8>>,
    mutable: bool,
}

impl Bitmap {
    /// Creates an immutable bitmap. `pixels` must hold `width * height * 4` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels: Arc::new(pixels),
            mutable: false,
        }
    }

    /// Creates a zeroed, mutable bitmap.
    pub fn new_mutable(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: Arc::new(vec![0; width as usize * height as usize * 4]),
            mutable: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable access to the pixels, `None` for immutable bitmaps.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        if !self.mutable {
            return None;
        }
        Some(Arc::make_mut(&mut self.pixels).as_mut_slice())
    }

    /// Immutable copy sharing nothing the producer can still write to.
    pub fn as_shared(&self) -> Self {
        if !self.mutable {
            return self.clone();
        }
        Self {
            width: self.width,
            height: self.height,
            pixels: Arc::new(self.pixels.as_ref().clone()),
            mutable: false,
        }
    }

    /// Bytes held by the pixel buffer.
    pub fn allocation_size(&self) -> usize {
        self.pixels.len()
    }

    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        self.pixels.hash(&mut hasher);
        hasher.finish()
    }

    fn compress(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pixels.len() / 4);
        {
            let mut writer =
                brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_WINDOW);
            writer.write_all(&self.pixels)?;
            writer.flush()?;
        }
        Ok(out)
    }

    fn decompress(width: u32, height: u32, compressed: &[u8]) -> std::io::Result<Self> {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        brotli::Decompressor::new(compressed, BROTLI_BUFFER).read_to_end(&mut pixels)?;
        if pixels.len() != width as usize * height as usize * 4 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "bitmap {width}x{height} decompressed to {} bytes",
                    pixels.len()
                ),
            ));
        }
        Ok(Self::new(width, height, pixels))
    }
}

/// Empty 0x0 bitmap, used as a placeholder until an id is resolved.
impl Default for Bitmap {
    fn default() -> Self {
        Self::new(0, 0, Vec::new())
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && (Arc::ptr_eq(&self.pixels, &other.pixels) || self.pixels == other.pixels)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mutable", &self.mutable)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct WireBitmap {
    width: u32,
    height: u32,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

impl Serialize for Bitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self.compress().map_err(serde::ser::Error::custom)?;
        WireBitmap {
            width: self.width,
            height: self.height,
            data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireBitmap::deserialize(deserializer)?;
        Self::decompress(wire.width, wire.height, &wire.data).map_err(serde::de::Error::custom)
    }
}

/// Base64 string encoding for byte payloads, readable by both wire forms.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Deduplicating, ordered bitmap store shared by a hierarchy.
#[derive(Debug, Default)]
pub struct BitmapCache {
    bitmaps: Vec<Bitmap>,
    by_hash: FxHashMap<u64, Vec<usize>>,
    memory: Option<usize>,
}

impl BitmapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of an equal bitmap, inserting a shared copy if none exists.
    pub fn get_or_assign_id(&mut self, bitmap: &Bitmap) -> usize {
        let hash = bitmap.content_hash();
        if let Some(candidates) = self.by_hash.get(&hash) {
            if let Some(&id) = candidates.iter().find(|&&id| self.bitmaps[id] == *bitmap) {
                return id;
            }
        }

        let id = self.bitmaps.len();
        self.bitmaps.push(bitmap.as_shared());
        self.by_hash.entry(hash).or_default().push(id);
        self.memory = None;
        id
    }

    pub fn get(&self, id: usize) -> Option<&Bitmap> {
        self.bitmaps.get(id)
    }

    pub fn len(&self) -> usize {
        self.bitmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }

    pub fn bitmaps(&self) -> &[Bitmap] {
        &self.bitmaps
    }

    /// Re-inserts every bitmap of `other`, returning the id remapping indexed by old id.
    pub fn merge_with_cache(&mut self, other: &BitmapCache) -> Vec<usize> {
        other
            .bitmaps
            .iter()
            .map(|bitmap| self.get_or_assign_id(bitmap))
            .collect()
    }

    pub fn memory_usage(&mut self) -> usize {
        *self
            .memory
            .get_or_insert_with(|| self.bitmaps.iter().map(Bitmap::allocation_size).sum())
    }

    pub(crate) fn from_bitmaps(bitmaps: Vec<Bitmap>) -> Self {
        let mut cache = Self::new();
        for bitmap in bitmaps {
            // Keep positional ids stable even when the producer sent duplicates.
            let hash = bitmap.content_hash();
            let id = cache.bitmaps.len();
            cache.bitmaps.push(bitmap);
            cache.by_hash.entry(hash).or_default().push(id);
        }
        cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Bitmap {
        Bitmap::new(width, height, vec![value; width as usize * height as usize * 4])
    }

    #[test]
    fn same_content_gets_same_id() {
        let mut cache = BitmapCache::new();
        let first = cache.get_or_assign_id(&solid(4, 4, 7));
        let second = cache.get_or_assign_id(&solid(4, 4, 7));
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        let third = cache.get_or_assign_id(&solid(4, 4, 8));
        assert_eq!(third, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn mutable_bitmaps_are_frozen_on_insert() {
        let mut cache = BitmapCache::new();
        let mut bitmap = Bitmap::new_mutable(2, 2);
        let id = cache.get_or_assign_id(&bitmap);
        assert!(!cache.get(id).expect("cached").is_mutable());

        bitmap.pixels_mut().expect("mutable")[0] = 255;
        assert_eq!(cache.get(id).expect("cached").pixels()[0], 0);
    }

    #[test]
    fn memory_estimate_is_invalidated_on_insert() {
        let mut cache = BitmapCache::new();
        cache.get_or_assign_id(&solid(2, 2, 1));
        assert_eq!(cache.memory_usage(), 16);
        cache.get_or_assign_id(&solid(4, 4, 1));
        assert_eq!(cache.memory_usage(), 16 + 64);
    }

    #[test]
    fn merge_remaps_ids() {
        let mut left = BitmapCache::new();
        left.get_or_assign_id(&solid(1, 1, 1));
        let mut right = BitmapCache::new();
        right.get_or_assign_id(&solid(1, 1, 2));
        right.get_or_assign_id(&solid(1, 1, 1));

        assert_eq!(left.merge_with_cache(&right), vec![1, 0]);
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn compressed_payload_survives_json() {
        let bitmap = solid(8, 8, 42);
        let json = serde_json::to_string(&bitmap).expect("encode");
        let decoded: Bitmap = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded, bitmap);
    }
}
