use std::any::Any;

use kurbo::Rect;

use crate::backend::{DrawParams, TextureRef};
use crate::chain::PaintWindowCursor;
use crate::core::{ItemId, Matrix4};
use crate::effect::{Effect, Feature};
use crate::error::LucentResult;
use crate::paint::{PaintMask, WindowPaintData};
use crate::quad::{QuadKind, WindowQuad, WindowQuadList};
use crate::region::{PixelRect, Region};
use crate::shader::ShaderTraits;
use crate::target::RenderTargetInfo;
use crate::window::EffectWindow;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    pub radius: u32,
    pub sigma: f64,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self { radius: 10, sigma: 5.0 }
    }
}

/// Blurs the backdrop behind translucent windows with a two-pass separable
/// gaussian: screen → target A, A blurred horizontally into B, B blurred
/// vertically back onto the screen, then the window paints over it.
pub struct BlurEffect {
    config: BlurConfig,
    ping: Option<RenderTargetInfo>,
    pong: Option<RenderTargetInfo>,
    alloc_failure_logged: bool,
}

impl BlurEffect {
    pub fn new(config: BlurConfig) -> Self {
        Self {
            config,
            ping: None,
            pong: None,
            alloc_failure_logged: false,
        }
    }

    pub fn config(&self) -> &BlurConfig {
        &self.config
    }

    fn ensure_targets(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        width: u32,
        height: u32,
    ) -> LucentResult<(RenderTargetInfo, RenderTargetInfo)> {
        let stale = |t: Option<RenderTargetInfo>| {
            t.map(|info| info.width < width || info.height < height)
                .unwrap_or(true)
        };
        if stale(self.ping) {
            if let Some(old) = self.ping.take() {
                chain.backend().destroy_render_target(old.id);
            }
            self.ping = Some(chain.create_render_target(width, height)?);
        }
        if stale(self.pong) {
            if let Some(old) = self.pong.take() {
                chain.backend().destroy_render_target(old.id);
            }
            self.pong = Some(chain.create_render_target(width, height)?);
        }
        match (self.ping, self.pong) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(crate::error::LucentError::render_target(
                "blur targets unavailable",
            )),
        }
    }

    fn blur_backdrop(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        window: &EffectWindow,
        data: &WindowPaintData,
    ) -> LucentResult<()> {
        let radius = self.config.radius;
        let frame = chain.frame();
        let scale = frame.output.scale;
        let screen = frame.output.geometry;
        let projection = frame.projection * frame.screen_transform;

        // Sampling footprint: the window extended by the kernel radius.
        let bounds = data.quads.bounds() + window.geometry.origin().to_vec2();
        let expanded = bounds.inflate(f64::from(radius), f64::from(radius)).intersect(screen);
        if expanded.is_zero_area() {
            return Ok(());
        }
        let device = PixelRect::from_logical(Rect::new(
            (expanded.x0 - screen.x0) * scale,
            (expanded.y0 - screen.y0) * scale,
            (expanded.x1 - screen.x0) * scale,
            (expanded.y1 - screen.y0) * scale,
        ));
        let (w, h) = (device.width.max(1) as u32, device.height.max(1) as u32);

        let (ping, pong) = self.ensure_targets(chain, w, h)?;
        let shader = chain.builtin_shader(ShaderTraits::MAP_TEXTURE | ShaderTraits::BLUR_1D)?;

        chain.backend().blit_from_screen(ping.id, device)?;

        // Horizontal pass into the second target, in target pixel space.
        let pass_rect = Rect::new(0.0, 0.0, f64::from(w), f64::from(h));
        let uv = Rect::new(
            0.0,
            0.0,
            f64::from(w) / f64::from(ping.width),
            f64::from(h) / f64::from(ping.height),
        );
        let mut quads = WindowQuadList::new();
        quads.push(WindowQuad::from_rect(QuadKind::Contents, ItemId(0), pass_rect, uv));

        let mut params = DrawParams::new(Matrix4::IDENTITY);
        params.shader = Some(shader);
        params.blur_radius = radius;
        params.blur_sigma = self.config.sigma;
        params.blur_direction = (1.0, 0.0);

        chain.push_render_target(pong.id)?;
        let horizontal = chain
            .backend()
            .draw_quads(&quads, TextureRef::Target(ping.id), &params);
        chain.pop_render_target()?;
        horizontal?;

        // Vertical pass straight onto the screen over the expanded rect.
        let uv = Rect::new(
            0.0,
            0.0,
            f64::from(w) / f64::from(pong.width),
            f64::from(h) / f64::from(pong.height),
        );
        let mut screen_quads = WindowQuadList::new();
        screen_quads.push(WindowQuad::from_rect(QuadKind::Contents, ItemId(0), expanded, uv));
        let mut params = DrawParams::new(projection);
        params.shader = Some(shader);
        params.blur_radius = radius;
        params.blur_sigma = self.config.sigma;
        params.blur_direction = (0.0, 1.0);
        chain
            .backend()
            .draw_quads(&screen_quads, TextureRef::Target(pong.id), &params)
    }
}

impl Effect for BlurEffect {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn requested_chain_position(&self) -> i32 {
        50
    }

    fn is_active(&self) -> bool {
        self.config.radius > 0
    }

    fn provides(&self) -> &'static [Feature] {
        &[Feature::Blur]
    }

    /// Every damaged pixel can bleed into its kernel neighbourhood, so
    /// frame damage widens by the radius.
    fn expanded_region(&self, damage: &Region) -> Region {
        damage.expanded(self.config.radius as i32)
    }

    fn paint_window(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        window: &EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        let applicable = window.is_normal()
            && !mask.contains(PaintMask::WINDOW_TRANSFORMED)
            && self.config.radius > 0;
        if applicable {
            if let Err(err) = self.blur_backdrop(chain, window, data) {
                // Allocation failures disable the blur for this frame only;
                // the window still paints normally.
                if !self.alloc_failure_logged {
                    tracing::warn!(error = %err, "blur disabled for this frame");
                    self.alloc_failure_logged = true;
                }
            }
        }
        chain.forward(window, mask, region, data)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
