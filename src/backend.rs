use std::time::Duration;

use crate::buffer::ClientBuffer;
use crate::core::{Matrix4, Rgba8Premul};
use crate::error::{LucentError, LucentResult};
use crate::output::Output;
use crate::quad::WindowQuadList;
use crate::region::Region;
use crate::shader::{ShaderId, ShaderSource};
use crate::target::{RenderTargetId, RenderTargetInfo, TargetFormat};
use crate::texture::{SurfaceTextureProvider, TextureHandle};

/// What the active backend composites with. Effects query this to decide
/// whether their techniques are available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositingType {
    /// CPU rasterizer; fixed-function shading only.
    Software,
    /// Shader-capable GPU path.
    Gpu,
}

/// What to sample while drawing a quad batch.
#[derive(Clone, Debug)]
pub enum TextureRef<'a> {
    Handle(&'a TextureHandle),
    /// Sample the colour attachment of an offscreen target.
    Target(RenderTargetId),
    Solid(Rgba8Premul),
}

/// Uniform state for one quad-batch draw. The bound shader decides which
/// fields it consumes.
#[derive(Clone, Debug)]
pub struct DrawParams {
    /// Logical → device-pixel transform, window transform already folded in.
    pub mvp: Matrix4,
    pub opacity: f64,
    pub brightness: f64,
    pub saturation: f64,
    pub shader: Option<ShaderId>,
    /// Scissor region in device pixels; `None` draws unclipped.
    pub clip: Option<Region>,
    /// Direction of a 1-D blur pass, unit vector in texture space.
    pub blur_direction: (f64, f64),
    pub blur_radius: u32,
    pub blur_sigma: f64,
}

impl DrawParams {
    pub fn new(mvp: Matrix4) -> Self {
        Self {
            mvp,
            opacity: 1.0,
            brightness: 1.0,
            saturation: 1.0,
            shader: None,
            clip: None,
            blur_direction: (1.0, 0.0),
            blur_radius: 0,
            blur_sigma: 1.0,
        }
    }
}

/// CPU/GPU timing pair recorded around a frame, when the backend supports
/// timer queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTimings {
    pub cpu: Duration,
    pub gpu: Option<Duration>,
}

/// Result of a successful present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentFeedback {
    /// When the frame's pixels reached (or will reach) the screen.
    pub timestamp: Duration,
}

/// CPU-side staging for streamed quad vertices. Both backends batch through
/// one of these and flush per draw call; interleaved layout is
/// `x, y, u, v` as f32.
#[derive(Debug, Default)]
pub struct StreamingBuffer {
    pub data: Vec<f32>,
}

impl StreamingBuffer {
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn push_vertex(&mut self, x: f32, y: f32, u: f32, v: f32) {
        self.data.extend_from_slice(&[x, y, u, v]);
    }

    pub fn vertex_count(&self) -> usize {
        self.data.len() / 4
    }
}

/// The rendering abstraction the scene drives. One backend instance serves
/// all outputs; per-output state is keyed by the output passed to
/// [`RenderBackend::bind_screen`].
///
/// All methods are infallible from the chain's point of view except where a
/// `LucentResult` says otherwise; failures there are recovered by the caller
/// per the error taxonomy (fallback colours, disabled effects, skipped
/// frames) and never propagate across effect boundaries.
pub trait RenderBackend {
    fn compositing_type(&self) -> CompositingType;

    /// Makes `output`'s framebuffer the draw destination for subsequent
    /// calls (while the target stack is empty). A failure here makes the
    /// scheduler skip frames until the backend recovers.
    fn bind_screen(&mut self, output: &Output) -> LucentResult<()>;

    /// Commits the bound screen, returning the presentation timestamp.
    fn present(&mut self, output: &Output, damage: &Region, now: Duration)
    -> LucentResult<PresentFeedback>;

    /// Wraps a committed client buffer in a texture provider appropriate for
    /// the buffer kind.
    fn make_texture(&mut self, buffer: &ClientBuffer) -> LucentResult<Box<dyn SurfaceTextureProvider>>;

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> LucentResult<RenderTargetInfo>;

    fn destroy_render_target(&mut self, id: RenderTargetId);

    /// Redirects draw calls: `Some` binds an offscreen target, `None`
    /// rebinds the screen framebuffer.
    fn bind_render_target(&mut self, target: Option<RenderTargetId>) -> LucentResult<()>;

    /// Copies an offscreen target's colour attachment onto the currently
    /// bound destination at `dest` (device pixels).
    fn blit(&mut self, source: RenderTargetId, dest: crate::region::PixelRect) -> LucentResult<()>;

    /// Copies `src` (device pixels) of the bound screen framebuffer into a
    /// target, for effects that sample their backdrop.
    fn blit_from_screen(
        &mut self,
        target: RenderTargetId,
        src: crate::region::PixelRect,
    ) -> LucentResult<()>;

    fn shader_from_source(&mut self, source: &ShaderSource) -> LucentResult<ShaderId>;

    /// Draws a textured quad batch onto the bound destination.
    fn draw_quads(
        &mut self,
        quads: &WindowQuadList,
        texture: TextureRef<'_>,
        params: &DrawParams,
    ) -> LucentResult<()>;

    /// Clears `region` (device pixels) of the bound destination.
    fn clear(&mut self, region: &Region, color: Rgba8Premul) -> LucentResult<()>;

    /// Reads one pixel from the bound destination. Coordinates are device
    /// pixels with the origin at the bottom-left.
    fn read_pixel(&mut self, x: u32, y: u32) -> LucentResult<Rgba8Premul>;

    /// Timings of the most recently presented frame.
    fn last_frame_timings(&self) -> FrameTimings {
        FrameTimings::default()
    }

    /// Whether the last frames indicate a wedged GPU; a `true` here makes
    /// the scheduler request a scene-wide resource reset.
    fn gpu_looks_stuck(&self) -> bool {
        false
    }

    /// Drops and re-creates device resources after a fault.
    fn reset_resources(&mut self) {}
}

/// Which backend to construct at startup.
#[derive(Clone, Copy, Debug)]
pub enum BackendKind {
    Software,
    #[cfg(feature = "gpu")]
    Gpu,
}

pub fn create_backend(kind: BackendKind) -> LucentResult<Box<dyn RenderBackend>> {
    match kind {
        BackendKind::Software => Ok(Box::new(crate::backend_sw::SoftwareBackend::new())),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(crate::backend_gpu::GpuBackend::new()?)),
        #[allow(unreachable_patterns)]
        _ => Err(LucentError::validation("requested backend is not available")),
    }
}
