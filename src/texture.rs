use std::cell::RefCell;
use std::rc::Rc;

use crate::buffer::{ClientBuffer, PixelFormat, ShmBuffer};
use crate::error::{LucentError, LucentResult};
use crate::region::Region;

/// A sampleable texture. Effects and the scene hold these only through the
/// reference-counted [`TextureHandle`]; a backend may keep device-side
/// resources keyed by [`Texture::id`].
#[derive(Debug)]
pub struct Texture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    /// CPU pixel mirror, premultiplied RGBA8, tightly packed. Present on the
    /// software path; a pure-GPU texture may leave this empty.
    pub pixels: RefCell<Vec<u8>>,
}

/// Reference-counted texture handle. The only way texture memory outlives a
/// frame.
pub type TextureHandle = Rc<Texture>;

impl Texture {
    pub fn new_cpu(id: u64, width: u32, height: u32, pixels: Vec<u8>) -> TextureHandle {
        Rc::new(Self {
            id,
            width,
            height,
            pixels: RefCell::new(pixels),
        })
    }

    pub fn sample_nearest(&self, u: f64, v: f64) -> [u8; 4] {
        let pixels = self.pixels.borrow();
        if pixels.is_empty() || self.width == 0 || self.height == 0 {
            return [0, 0, 0, 0];
        }
        let x = ((u * f64::from(self.width)) as i64).clamp(0, i64::from(self.width) - 1) as usize;
        let y = ((v * f64::from(self.height)) as i64).clamp(0, i64::from(self.height) - 1) as usize;
        let idx = (y * self.width as usize + x) * 4;
        [pixels[idx], pixels[idx + 1], pixels[idx + 2], pixels[idx + 3]]
    }
}

/// Turns committed client buffers into sampleable textures and keeps them in
/// sync with damage. One provider per surface pixmap.
pub trait SurfaceTextureProvider {
    fn is_valid(&self) -> bool;

    fn texture(&self) -> Option<TextureHandle>;

    /// Allocates the texture for the committed buffer. Failure leaves the
    /// provider invalid; the item paints the fallback colour until a later
    /// commit succeeds.
    fn create(&mut self, buffer: &ClientBuffer) -> LucentResult<()>;

    /// Re-uploads at least the damaged region from the committed buffer.
    fn update(&mut self, buffer: &ClientBuffer, damage: &Region) -> LucentResult<()>;
}

/// Converts one row of ARGB8888/XRGB8888 bytes (B,G,R,A memory order) into
/// premultiplied RGBA8.
fn convert_row(format: PixelFormat, src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let (b, g, r) = (s[0], s[1], s[2]);
        let a = if format.has_alpha() { s[3] } else { 255 };
        // ARGB8888 commits are already premultiplied.
        d[0] = r;
        d[1] = g;
        d[2] = b;
        d[3] = a;
    }
}

/// CPU texture provider for shared-memory buffers. The reference
/// implementation used by the software backend and by any backend that
/// uploads shm through a staging copy.
pub struct ShmTextureProvider {
    id: u64,
    texture: Option<TextureHandle>,
}

impl ShmTextureProvider {
    pub fn new(id: u64) -> Self {
        Self { id, texture: None }
    }

    fn upload_full(&mut self, shm: &ShmBuffer) -> LucentResult<()> {
        validate_shm(shm)?;
        let mut pixels = vec![0u8; (shm.width * shm.height * 4) as usize];
        for y in 0..shm.height as usize {
            let src_off = y * shm.stride as usize;
            let src = &shm.data[src_off..src_off + (shm.width * 4) as usize];
            let dst_off = y * (shm.width * 4) as usize;
            convert_row(shm.format, src, &mut pixels[dst_off..dst_off + (shm.width * 4) as usize]);
        }
        self.texture = Some(Texture::new_cpu(self.id, shm.width, shm.height, pixels));
        Ok(())
    }
}

fn validate_shm(shm: &ShmBuffer) -> LucentResult<()> {
    if shm.width == 0 || shm.height == 0 {
        return Err(LucentError::buffer_import("shm buffer has zero size"));
    }
    if shm.stride < shm.width * shm.format.bytes_per_pixel() {
        return Err(LucentError::buffer_import("shm stride smaller than row"));
    }
    let needed = shm.stride as usize * (shm.height as usize - 1) + (shm.width * 4) as usize;
    if shm.data.len() < needed {
        return Err(LucentError::buffer_import(format!(
            "shm pool too small: have {}, need {needed}",
            shm.data.len()
        )));
    }
    Ok(())
}

impl SurfaceTextureProvider for ShmTextureProvider {
    fn is_valid(&self) -> bool {
        self.texture.is_some()
    }

    fn texture(&self) -> Option<TextureHandle> {
        self.texture.clone()
    }

    fn create(&mut self, buffer: &ClientBuffer) -> LucentResult<()> {
        match buffer {
            ClientBuffer::Shm(shm) => self.upload_full(shm),
            other => Err(LucentError::buffer_import(format!(
                "{} buffers require a gpu-capable backend",
                other.kind_name()
            ))),
        }
    }

    fn update(&mut self, buffer: &ClientBuffer, damage: &Region) -> LucentResult<()> {
        let ClientBuffer::Shm(shm) = buffer else {
            return Err(LucentError::buffer_import(
                "buffer kind changed under an shm texture",
            ));
        };
        let Some(texture) = &self.texture else {
            return self.create(buffer);
        };
        if texture.width != shm.width || texture.height != shm.height {
            // Size change invalidates the allocation.
            return self.upload_full(shm);
        }
        validate_shm(shm)?;
        let row_bytes = (shm.width * 4) as usize;
        let mut pixels = texture.pixels.borrow_mut();
        for rect in damage.rects() {
            let y0 = rect.y.clamp(0, shm.height as i32) as usize;
            let y1 = rect.bottom().clamp(0, shm.height as i32) as usize;
            let x0 = rect.x.clamp(0, shm.width as i32) as usize;
            let x1 = rect.right().clamp(0, shm.width as i32) as usize;
            if x1 <= x0 {
                continue;
            }
            for y in y0..y1 {
                let src_off = y * shm.stride as usize + x0 * 4;
                let dst_off = y * row_bytes + x0 * 4;
                convert_row(
                    shm.format,
                    &shm.data[src_off..src_off + (x1 - x0) * 4],
                    &mut pixels[dst_off..dst_off + (x1 - x0) * 4],
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::PixelRect;

    fn checker(width: u32, height: u32) -> ShmBuffer {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                if (x + y) % 2 == 0 {
                    data.extend_from_slice(&[0, 0, 255, 255]); // red in BGRA
                } else {
                    data.extend_from_slice(&[255, 0, 0, 255]); // blue in BGRA
                }
            }
        }
        ShmBuffer {
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Argb8888,
            data,
        }
    }

    #[test]
    fn create_converts_bgra_to_rgba() {
        let mut provider = ShmTextureProvider::new(1);
        provider
            .create(&ClientBuffer::Shm(checker(2, 1)))
            .unwrap();
        let tex = provider.texture().unwrap();
        assert_eq!(tex.sample_nearest(0.0, 0.0), [255, 0, 0, 255]);
        assert_eq!(tex.sample_nearest(0.9, 0.0), [0, 0, 255, 255]);
    }

    #[test]
    fn xrgb_forces_opaque_alpha() {
        let mut provider = ShmTextureProvider::new(1);
        let mut buf = checker(1, 1);
        buf.format = PixelFormat::Xrgb8888;
        buf.data[3] = 0;
        provider.create(&ClientBuffer::Shm(buf)).unwrap();
        let tex = provider.texture().unwrap();
        assert_eq!(tex.sample_nearest(0.0, 0.0)[3], 255);
    }

    #[test]
    fn update_touches_only_damaged_rows() {
        let mut provider = ShmTextureProvider::new(1);
        let mut buf = checker(2, 2);
        provider.create(&ClientBuffer::Shm(buf.clone())).unwrap();

        // Rewrite the whole source, damage only the bottom row.
        for px in buf.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 255, 0, 255]); // green in BGRA
        }
        provider
            .update(
                &ClientBuffer::Shm(buf),
                &Region::from_rect(PixelRect::new(0, 1, 2, 1)),
            )
            .unwrap();
        let tex = provider.texture().unwrap();
        assert_eq!(tex.sample_nearest(0.0, 0.0), [255, 0, 0, 255]);
        assert_eq!(tex.sample_nearest(0.0, 0.9), [0, 255, 0, 255]);
    }

    #[test]
    fn dmabuf_is_an_import_error_on_the_cpu_path() {
        let mut provider = ShmTextureProvider::new(1);
        let err = provider
            .create(&ClientBuffer::Dmabuf(crate::buffer::DmabufBuffer {
                width: 1,
                height: 1,
                fourcc: 0,
                modifier: 0,
                planes: vec![],
            }))
            .unwrap_err();
        assert!(matches!(err, LucentError::BufferImport(_)));
        assert!(!provider.is_valid());
    }

    #[test]
    fn undersized_pool_is_rejected() {
        let mut provider = ShmTextureProvider::new(1);
        let mut buf = checker(4, 4);
        buf.data.truncate(8);
        assert!(provider.create(&ClientBuffer::Shm(buf)).is_err());
    }
}
