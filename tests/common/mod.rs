//! Shared fixtures: a recording backend that delegates to the software
//! rasterizer while logging every draw, clear and present, plus scene
//! builders used across the suites.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use kurbo::Rect;
use lucent::{
    BackendKind, ClientBuffer, Compositor, CompositingType, DelegateId, DrawParams, FrameTimings,
    LucentError, LucentResult, Matrix4, Options, Output, OutputId, PixelRect, PresentFeedback,
    Region, RenderBackend, Rgba8Premul, ShaderId, ShaderSource, ShmBuffer, SoftwareBackend,
    SurfaceId, SurfaceTextureProvider, TargetFormat, TextureRef, WindowDesc, WindowId,
    WindowQuadList,
};

#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub shader: Option<ShaderId>,
    pub quad_count: usize,
    pub deformed: bool,
    pub solid: bool,
    pub sampled_target: bool,
    pub sampled_texture: bool,
    pub mvp: Matrix4,
}

#[derive(Default)]
pub struct RecordLog {
    pub draws: Vec<DrawRecord>,
    pub clears: Vec<Region>,
    pub presents: Vec<Region>,
}

impl RecordLog {
    pub fn window_draws(&self) -> Vec<DrawRecord> {
        self.draws
            .iter()
            .filter(|d| d.sampled_texture || d.solid)
            .cloned()
            .collect()
    }

    pub fn reset(&mut self) {
        self.draws.clear();
        self.clears.clear();
        self.presents.clear();
    }
}

#[derive(Clone, Copy, Debug)]
pub enum PresentFailure {
    Timeout,
    OutputGone,
}

/// Wraps the software backend; accepts custom shader sources (handing out
/// ids without compiling them) so shader-binding effects run everywhere.
pub struct RecordingBackend {
    inner: SoftwareBackend,
    pub log: Rc<RefCell<RecordLog>>,
    pub fail_next_present: Rc<RefCell<Option<PresentFailure>>>,
    next_custom: u64,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            inner: SoftwareBackend::new(),
            log: Rc::new(RefCell::new(RecordLog::default())),
            fail_next_present: Rc::new(RefCell::new(None)),
            next_custom: 0,
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn compositing_type(&self) -> CompositingType {
        CompositingType::Gpu
    }

    fn bind_screen(&mut self, output: &Output) -> LucentResult<()> {
        self.inner.bind_screen(output)
    }

    fn present(
        &mut self,
        output: &Output,
        damage: &Region,
        now: Duration,
    ) -> LucentResult<PresentFeedback> {
        if let Some(failure) = self.fail_next_present.borrow_mut().take() {
            return Err(match failure {
                PresentFailure::Timeout => LucentError::present_timeout("no vblank ack"),
                PresentFailure::OutputGone => LucentError::output_removed(output.name.clone()),
            });
        }
        self.log.borrow_mut().presents.push(damage.clone());
        self.inner.present(output, damage, now)
    }

    fn make_texture(
        &mut self,
        buffer: &ClientBuffer,
    ) -> LucentResult<Box<dyn SurfaceTextureProvider>> {
        self.inner.make_texture(buffer)
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> LucentResult<lucent::RenderTargetInfo> {
        self.inner.create_render_target(width, height, format)
    }

    fn destroy_render_target(&mut self, id: lucent::RenderTargetId) {
        self.inner.destroy_render_target(id);
    }

    fn bind_render_target(&mut self, target: Option<lucent::RenderTargetId>) -> LucentResult<()> {
        self.inner.bind_render_target(target)
    }

    fn blit(&mut self, source: lucent::RenderTargetId, dest: PixelRect) -> LucentResult<()> {
        self.inner.blit(source, dest)
    }

    fn blit_from_screen(
        &mut self,
        target: lucent::RenderTargetId,
        src: PixelRect,
    ) -> LucentResult<()> {
        self.inner.blit_from_screen(target, src)
    }

    fn shader_from_source(&mut self, source: &ShaderSource) -> LucentResult<ShaderId> {
        match source {
            ShaderSource::Builtin(_) => self.inner.shader_from_source(source),
            ShaderSource::Custom { .. } => {
                self.next_custom += 1;
                Ok(ShaderId(10_000 + self.next_custom))
            }
        }
    }

    fn draw_quads(
        &mut self,
        quads: &WindowQuadList,
        texture: TextureRef<'_>,
        params: &DrawParams,
    ) -> LucentResult<()> {
        self.log.borrow_mut().draws.push(DrawRecord {
            shader: params.shader,
            quad_count: quads.len(),
            deformed: quads.iter().any(|q| q.is_transformed()),
            solid: matches!(texture, TextureRef::Solid(_)),
            sampled_target: matches!(texture, TextureRef::Target(_)),
            sampled_texture: matches!(texture, TextureRef::Handle(_)),
            mvp: params.mvp,
        });
        self.inner.draw_quads(quads, texture, params)
    }

    fn clear(&mut self, region: &Region, color: Rgba8Premul) -> LucentResult<()> {
        self.log.borrow_mut().clears.push(region.clone());
        self.inner.clear(region, color)
    }

    fn read_pixel(&mut self, x: u32, y: u32) -> LucentResult<Rgba8Premul> {
        self.inner.read_pixel(x, y)
    }

    fn last_frame_timings(&self) -> FrameTimings {
        self.inner.last_frame_timings()
    }
}

pub const OUTPUT: OutputId = OutputId(1);
pub const DELEGATE: DelegateId = DelegateId(1);

pub fn output_800x600() -> Output {
    Output::new(
        OUTPUT,
        "TEST-1",
        Rect::new(0.0, 0.0, 800.0, 600.0),
        1.0,
        Duration::from_nanos(16_666_667),
        DELEGATE,
    )
}

pub fn software_compositor() -> Compositor {
    let mut comp = Compositor::new(BackendKind::Software).expect("software backend");
    comp.add_output(output_800x600());
    comp
}

pub fn recording_compositor() -> (
    Compositor,
    Rc<RefCell<RecordLog>>,
    Rc<RefCell<Option<PresentFailure>>>,
) {
    let backend = RecordingBackend::new();
    let log = backend.log.clone();
    let fail = backend.fail_next_present.clone();
    let mut comp = Compositor::with_backend(Box::new(backend), Options::default());
    comp.add_output(output_800x600());
    (comp, log, fail)
}

/// Adds a window and commits a solid-colour buffer covering it.
pub fn solid_window(
    comp: &mut Compositor,
    surface: SurfaceId,
    geometry: Rect,
    rgba: [u8; 4],
) -> WindowId {
    let id = comp.window_added(WindowDesc::new(surface, geometry));
    let (w, h) = (geometry.width() as u32, geometry.height() as u32);
    comp.commit_buffer(
        surface,
        ClientBuffer::Shm(ShmBuffer::solid(w, h, rgba)),
        &Region::from_rect(PixelRect::new(0, 0, w as i32, h as i32)),
    )
    .expect("commit");
    id
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}
