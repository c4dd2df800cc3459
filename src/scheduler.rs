use std::time::Duration;

use kurbo::Rect;

use crate::backend::RenderBackend;
use crate::chain::{self, EffectChain, FrameState, PaintCtx};
use crate::core::{DelegateId, Matrix4, OutputId, SurfaceId};
use crate::damage::{collect_damage, reset_damage};
use crate::error::LucentError;
use crate::host::EffectHost;
use crate::paint::{PaintMask, ScreenPaintData, ScreenPrePaintData};
use crate::region::{PixelRect, Region};
use crate::scene::Scene;
use crate::shader::ShaderManager;
use crate::target::TargetStack;

/// The frame-callback promise: every surface visible in a presented frame
/// gets exactly one completion, timestamped no earlier than the vblank that
/// drove the frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameFeedback {
    pub delegate: DelegateId,
    pub timestamp: Duration,
    pub surfaces: Vec<SurfaceId>,
}

/// What one scheduler tick did.
#[derive(Clone, Debug, Default)]
pub struct FrameResult {
    /// The paint pipeline ran.
    pub painted: bool,
    /// The frame reached the screen.
    pub presented: bool,
    /// The pipeline ran but the frame was discarded.
    pub aborted: bool,
    pub feedback: Option<FrameFeedback>,
}

impl FrameResult {
    fn idle() -> Self {
        Self::default()
    }
}

/// Drives one frame per output refresh. The clock source is the output's
/// vblank signal delivered by the embedder; `next_vblank` doubles as the
/// deadline for a monotonic-timer fallback when no hardware signal exists.
pub struct FrameScheduler {
    output: OutputId,
    refresh: Duration,
    next_vblank: Duration,
    /// Frames to silently drop after a present timeout.
    skip_frames: u32,
    frames_finished: u64,
    target_failure_logged: bool,
}

impl FrameScheduler {
    pub fn new(output: OutputId, refresh: Duration) -> Self {
        Self {
            output,
            refresh: refresh.max(Duration::from_millis(1)),
            next_vblank: Duration::ZERO,
            skip_frames: 0,
            frames_finished: 0,
            target_failure_logged: false,
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    /// Deadline for the timer fallback.
    pub fn next_vblank(&self) -> Duration {
        self.next_vblank
    }

    pub fn frames_finished(&self) -> u64 {
        self.frames_finished
    }

    /// One vblank tick. Skips idle frames (no damage, no animation),
    /// otherwise runs pre-paint → paint → post-paint and presents.
    pub fn on_vblank(
        &mut self,
        now: Duration,
        scene: &mut Scene,
        chain: &mut EffectChain,
        backend: &mut dyn RenderBackend,
        shaders: &mut ShaderManager,
        host: &mut EffectHost,
    ) -> FrameResult {
        // The clock advances whether or not a frame is produced.
        if self.next_vblank <= now {
            let refresh = self.refresh.as_nanos().max(1);
            let behind = (now - self.next_vblank).as_nanos() / refresh + 1;
            self.next_vblank += self.refresh * (behind as u32);
        }

        let Some(output) = scene.output(self.output).cloned() else {
            return FrameResult::idle();
        };
        let delegate = output.delegate;

        if self.skip_frames > 0 {
            self.skip_frames -= 1;
            return FrameResult::idle();
        }

        self.apply_host_requests(scene, host, &output.geometry);

        // Idle detection: no damage and no animation-requested frame means
        // no pipeline run at all.
        let mut damage = collect_damage(scene, delegate);
        let frame_requested = scene.tree.take_frame_request(delegate);
        if damage.is_empty() && !frame_requested {
            return FrameResult::idle();
        }

        chain.begin_frame();
        let clip = PixelRect::from_logical(output.geometry);
        damage = chain.expand_damage(&damage).intersected(clip);
        if damage.is_empty() {
            damage.add(clip);
        }

        let mut frame = FrameState::new(delegate, output.clone(), now);
        let mut targets = TargetStack::new();
        let background = scene.background();

        let paint_result = {
            let mut ctx = PaintCtx {
                slots: chain.slots_mut(),
                scene: &mut *scene,
                backend: &mut *backend,
                shaders: &mut *shaders,
                host: &mut *host,
                targets: &mut targets,
                frame: &mut frame,
            };

            let mut pre = ScreenPrePaintData {
                mask: PaintMask::empty(),
                paint: damage.clone(),
            };
            chain::pre_paint_screen_from(&mut ctx, 0, &mut pre);
            let mut painted_region = pre.paint.intersected(clip);
            if pre.mask.contains(PaintMask::SCREEN_TRANSFORMED) {
                painted_region = Region::from_rect(clip);
            }
            ctx.frame.damage = painted_region;
            ctx.frame.screen_mask = pre.mask;

            chain::run_window_prepaint(&mut ctx);

            if let Err(err) = ctx.backend.bind_screen(&output) {
                tracing::warn!(output = %output.name, error = %err, "screen bind failed; skipping frame");
                return FrameResult::idle();
            }

            if pre.mask.contains(PaintMask::SCREEN_BACKGROUND_FIRST) {
                let device = ctx.frame.device_clip(&ctx.frame.damage.clone());
                if let Err(err) = ctx.backend.clear(&device, background) {
                    tracing::warn!(error = %err, "background clear failed");
                }
                ctx.frame.background_painted = true;
            }

            let mut sdata = ScreenPaintData {
                mask: pre.mask,
                projection: ctx.frame.projection,
                screen_transform: Matrix4::IDENTITY,
                target_width: output.device_width(),
                target_height: output.device_height(),
                device_scale: output.scale,
            };
            chain::paint_screen_from(&mut ctx, 0, &mut sdata)
        };

        // Post-paint runs in strict reverse order, aborted frames included.
        chain.post_paint_screen(host);

        if !targets.is_balanced() {
            if !self.target_failure_logged {
                tracing::warn!(
                    depth = targets.depth(),
                    "render target stack unbalanced after post-paint"
                );
                self.target_failure_logged = true;
            }
            targets.drain_unbalanced();
            if let Err(err) = backend.bind_render_target(None) {
                tracing::warn!(error = %err, "failed to rebind screen after unbalanced targets");
            }
        }

        if let Err(err) = paint_result {
            tracing::error!(error = %err, "frame aborted");
            return FrameResult { painted: true, aborted: true, ..FrameResult::default() };
        }

        // An output removed mid-frame finishes its paint but never
        // presents; its damage is retained for a replacement.
        let alive = scene.output(self.output).map(|o| o.enabled).unwrap_or(false);
        if !alive {
            return FrameResult { painted: true, aborted: true, ..FrameResult::default() };
        }

        let damage = frame.damage.clone();
        match backend.present(&output, &damage, now) {
            Ok(feedback) => {
                reset_damage(scene, delegate);
                self.frames_finished += 1;

                let timings = backend.last_frame_timings();
                if timings.cpu > self.refresh {
                    tracing::warn!(
                        cpu_ms = timings.cpu.as_millis() as u64,
                        budget_ms = self.refresh.as_millis() as u64,
                        "frame overran its budget"
                    );
                }
                if backend.gpu_looks_stuck() {
                    tracing::error!("gpu appears stuck; resetting backend resources");
                    backend.reset_resources();
                }

                let mut surfaces = frame.visible_surfaces.clone();
                surfaces.sort();
                surfaces.dedup();
                FrameResult {
                    painted: true,
                    presented: true,
                    aborted: false,
                    feedback: Some(FrameFeedback {
                        delegate,
                        timestamp: feedback.timestamp.max(now),
                        surfaces,
                    }),
                }
            }
            Err(LucentError::PresentTimeout(msg)) => {
                tracing::warn!(error = %msg, "present timed out; skipping a frame");
                self.skip_frames = 1;
                // The frame-callback queue resets: nobody is notified for
                // this frame.
                FrameResult { painted: true, aborted: true, ..FrameResult::default() }
            }
            Err(err) => {
                tracing::warn!(error = %err, "present failed; damage retained");
                FrameResult { painted: true, aborted: true, ..FrameResult::default() }
            }
        }
    }

    /// Applies queued host requests (repaints, on-screen message changes)
    /// to the scene before damage is queried.
    fn apply_host_requests(&mut self, scene: &mut Scene, host: &mut EffectHost, geometry: &Rect) {
        let (full, region, frame_req) = host.take_repaints();
        if full {
            let rects: Vec<Rect> = scene.outputs().map(|o| o.geometry).collect();
            for r in rects {
                scene.damage_global_rect(r);
            }
        }
        for r in region.rects() {
            scene.tree.add_global_damage(*r);
        }
        if frame_req {
            scene.tree.schedule_frame();
        }

        if host.take_message_dirty() {
            match host.on_screen_message().cloned() {
                Some(_) => {
                    let w = 480.0f64.min(geometry.width());
                    let rect = Rect::new(
                        geometry.x0 + (geometry.width() - w) / 2.0,
                        geometry.y0 + 40.0,
                        geometry.x0 + (geometry.width() + w) / 2.0,
                        geometry.y0 + 120.0,
                    );
                    scene.set_overlay(None, rect);
                    scene.damage_global_rect(rect);
                }
                None => {
                    scene.clear_overlay();
                }
            }
        }
    }
}
