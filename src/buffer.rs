/// Pixel formats the scene understands on the client-buffer boundary.
///
/// Both are 32-bit little-endian words, so the in-memory byte order is
/// B, G, R, A. `Argb8888` carries premultiplied alpha; `Xrgb8888` ignores the
/// alpha byte entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Argb8888,
    Xrgb8888,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }

    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Argb8888)
    }
}

/// A shared-memory client buffer: plain bytes, CPU-uploaded.
#[derive(Clone, Debug)]
pub struct ShmBuffer {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl ShmBuffer {
    /// A solid-colour buffer, straight (non-premultiplied) RGBA input.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            // ARGB8888 little-endian: B, G, R, A.
            data.extend_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]);
        }
        Self {
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Argb8888,
            data,
        }
    }
}

/// One plane of a dmabuf. The fd is owned by the embedder; the scene only
/// forwards it to the backend for import.
#[derive(Clone, Copy, Debug)]
pub struct DmabufPlane {
    pub fd: i32,
    pub offset: u32,
    pub stride: u32,
}

/// A dmabuf client buffer, imported zero-copy where the backend can.
#[derive(Clone, Debug)]
pub struct DmabufBuffer {
    pub width: u32,
    pub height: u32,
    /// drm fourcc code.
    pub fourcc: u32,
    pub modifier: u64,
    pub planes: Vec<DmabufPlane>,
}

/// An EGL-stream producer handle (legacy driver path).
#[derive(Clone, Copy, Debug)]
pub struct EglStreamBuffer {
    pub width: u32,
    pub height: u32,
    pub stream: u64,
}

/// The currently committed content of a client surface. Opaque to the scene;
/// only texture providers look inside.
#[derive(Clone, Debug)]
pub enum ClientBuffer {
    Shm(ShmBuffer),
    Dmabuf(DmabufBuffer),
    EglStream(EglStreamBuffer),
}

impl ClientBuffer {
    pub fn size(&self) -> (u32, u32) {
        match self {
            Self::Shm(b) => (b.width, b.height),
            Self::Dmabuf(b) => (b.width, b.height),
            Self::EglStream(b) => (b.width, b.height),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Shm(_) => "shm",
            Self::Dmabuf(_) => "dmabuf",
            Self::EglStream(_) => "egl-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_buffer_has_bgra_layout() {
        let b = ShmBuffer::solid(1, 1, [0xAA, 0xBB, 0xCC, 0xFF]);
        assert_eq!(b.data, vec![0xCC, 0xBB, 0xAA, 0xFF]);
        assert_eq!(b.stride, 4);
    }

    #[test]
    fn buffer_size_is_uniform_across_kinds() {
        let shm = ClientBuffer::Shm(ShmBuffer::solid(4, 2, [0, 0, 0, 255]));
        assert_eq!(shm.size(), (4, 2));
        let dma = ClientBuffer::Dmabuf(DmabufBuffer {
            width: 8,
            height: 16,
            fourcc: 0x3432_5258,
            modifier: 0,
            planes: vec![],
        });
        assert_eq!(dma.size(), (8, 16));
    }
}
