use crate::backend::RenderBackend;
use crate::buffer::ClientBuffer;
use crate::core::SurfaceId;
use crate::error::LucentResult;
use crate::region::Region;
use crate::texture::{SurfaceTextureProvider, TextureHandle};

/// Coarse classification of surface content, forwarded from clients and used
/// by effects (video bypasses some recolouring, cursors skip deformation).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentType {
    #[default]
    Normal,
    Video,
    Cursor,
}

/// Upload state of a surface's pixmap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixmapState {
    /// No texture has ever been uploaded.
    #[default]
    Unbound,
    /// Texture matches the committed buffer.
    Bound,
    /// Buffer was released or resized; the previous texture is still
    /// paintable until the next upload lands.
    Stale,
}

/// Wraps the committed client buffer and the texture uploaded from it.
///
/// A stale pixmap keeps serving its previous texture so content never
/// flashes; the damage covering the stale region is recorded by the caller
/// before the commit completes.
#[derive(Default)]
pub struct SurfacePixmap {
    state: PixmapState,
    generation: u64,
    buffer: Option<ClientBuffer>,
    provider: Option<Box<dyn SurfaceTextureProvider>>,
}

impl SurfacePixmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PixmapState {
        self.state
    }

    /// Monotonic count of successful uploads.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffer(&self) -> Option<&ClientBuffer> {
        self.buffer.as_ref()
    }

    /// Stores a newly committed buffer. A size change makes the current
    /// texture stale immediately.
    pub fn attach(&mut self, buffer: ClientBuffer) {
        if self.state == PixmapState::Bound {
            let same_size = self
                .buffer
                .as_ref()
                .map(|old| old.size() == buffer.size())
                .unwrap_or(false);
            if !same_size {
                self.state = PixmapState::Stale;
            }
        }
        self.buffer = Some(buffer);
    }

    /// The client released the buffer backing the current texture.
    pub fn mark_stale(&mut self) {
        if self.state == PixmapState::Bound {
            self.state = PixmapState::Stale;
        }
    }

    /// Uploads the committed buffer, at least over `damage`.
    ///
    /// A transient import failure leaves the previous texture (if any) in
    /// place and is retried on the next commit; the error is reported so the
    /// caller can log it, but the frame goes on.
    pub fn upload(&mut self, backend: &mut dyn RenderBackend, damage: &Region) -> LucentResult<()> {
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(());
        };
        if self.provider.is_none() {
            self.provider = Some(backend.make_texture(buffer)?);
        }
        let Some(provider) = self.provider.as_mut() else {
            return Ok(());
        };
        let result = if provider.is_valid() && self.state != PixmapState::Unbound {
            provider.update(buffer, damage)
        } else {
            provider.create(buffer)
        };
        match result {
            Ok(()) => {
                self.state = PixmapState::Bound;
                self.generation += 1;
                Ok(())
            }
            Err(err) => {
                if self.state == PixmapState::Bound {
                    self.state = PixmapState::Stale;
                }
                Err(err)
            }
        }
    }

    /// The sampleable texture. While stale this is the previous upload.
    pub fn texture(&self) -> Option<TextureHandle> {
        self.provider.as_ref().and_then(|p| p.texture())
    }

    pub fn is_valid(&self) -> bool {
        self.provider.as_ref().map(|p| p.is_valid()).unwrap_or(false)
    }
}

impl std::fmt::Debug for SurfacePixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfacePixmap")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("has_buffer", &self.buffer.is_some())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Scene-side state of one client surface item.
#[derive(Debug)]
pub struct SurfaceState {
    pub surface: SurfaceId,
    /// Union of rectangles covering visible pixels, surface-local.
    pub shape: Region,
    /// Sub-region guaranteed fully opaque, surface-local.
    pub opaque: Region,
    pub content_type: ContentType,
    pub pixmap: SurfacePixmap,
    /// Surface-local damage not yet uploaded to the texture. Drained when
    /// the pixmap uploads during paint.
    pub pending_upload: Region,
    /// Back-reference to the X11 window for Xwayland surfaces.
    pub x11_window: Option<u32>,
}

impl SurfaceState {
    pub fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            shape: Region::new(),
            opaque: Region::new(),
            content_type: ContentType::Normal,
            pixmap: SurfacePixmap::new(),
            pending_upload: Region::new(),
            x11_window: None,
        }
    }
}
