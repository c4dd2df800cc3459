use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::chain::{PaintWindowCursor, ScreenPrePaintCursor, WindowPrePaintCursor};
use crate::core::WindowId;
use crate::effect::Effect;
use crate::error::LucentResult;
use crate::host::{EffectHost, HostHandle};
use crate::paint::{PaintMask, ScreenPrePaintData, WindowPaintData, WindowPrePaintData};
use crate::region::Region;
use crate::timeline::{Ease, TimeLine};
use crate::window::EffectWindow;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WavyConfig {
    /// Peak vertex displacement, logical pixels.
    pub amplitude: f64,
    /// Grid subdivision per quad axis.
    pub grid: u32,
    pub duration_ms: u64,
    /// Wave phase velocity, radians per second.
    pub speed: f64,
    /// Spatial wavelength, logical pixels per radian.
    pub wavelength: f64,
}

impl Default for WavyConfig {
    fn default() -> Self {
        Self {
            amplitude: 10.0,
            grid: 30,
            duration_ms: 1000,
            speed: 8.0,
            wavelength: 20.0,
        }
    }
}

struct Wave {
    timeline: TimeLine,
    started: Option<Duration>,
}

/// Ripples a window with a travelling sinusoidal deformation on a quad
/// grid. The wave runs for the configured duration, then the window snaps
/// back to its original quads.
pub struct WavyEffect {
    config: WavyConfig,
    waves: BTreeMap<WindowId, Wave>,
}

impl WavyEffect {
    pub fn new(config: WavyConfig) -> Self {
        Self {
            config,
            waves: BTreeMap::new(),
        }
    }

    /// Starts (or restarts) the wave on a window.
    pub fn start(&mut self, window: WindowId, host: &mut EffectHost) {
        self.waves.insert(
            window,
            Wave {
                timeline: TimeLine::new(Duration::from_millis(self.config.duration_ms))
                    .with_ease(Ease::Linear),
                started: None,
            },
        );
        host.add_repaint_full();
    }

    pub fn is_animating(&self, window: WindowId) -> bool {
        self.waves.contains_key(&window)
    }
}

impl Effect for WavyEffect {
    fn name(&self) -> &'static str {
        "wavywindows"
    }

    fn is_active(&self) -> bool {
        !self.waves.is_empty()
    }

    fn pre_paint_screen(
        &mut self,
        chain: &mut ScreenPrePaintCursor<'_, '_>,
        data: &mut ScreenPrePaintData,
    ) {
        let present = chain.present_time();
        for wave in self.waves.values_mut() {
            let started = *wave.started.get_or_insert(present);
            let elapsed = present.saturating_sub(started);
            let delta = elapsed.saturating_sub(wave.timeline.elapsed());
            wave.timeline.advance(delta);
        }
        chain.forward(data);
    }

    fn pre_paint_window(
        &mut self,
        chain: &mut WindowPrePaintCursor<'_, '_>,
        window: &EffectWindow,
        data: &mut WindowPrePaintData,
    ) {
        match self.waves.get(&window.id).map(|w| w.timeline.done()) {
            // Final frame paints the window restored.
            Some(true) => {
                self.waves.remove(&window.id);
            }
            Some(false) => {
                data.mask |= PaintMask::WINDOW_TRANSFORMED;
                data.quads = data.quads.make_grid(self.config.grid);
            }
            None => {}
        }
        chain.forward(window, data);
    }

    fn paint_window(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        window: &EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        if let Some(wave) = self.waves.get(&window.id) {
            let t = wave.timeline.elapsed().as_secs_f64();
            let amplitude = self.config.amplitude;
            let freq = 1.0 / self.config.wavelength;
            let phase = t * self.config.speed;
            for quad in data.quads.iter_mut() {
                for v in &mut quad.verts {
                    v.position.x = v.original.x + amplitude * (v.original.y * freq + phase).sin();
                    v.position.y = v.original.y + amplitude * (v.original.x * freq + phase).cos();
                }
            }
        }
        chain.forward(window, mask, region, data)
    }

    fn post_paint_screen(&mut self, host: &mut EffectHost) {
        if !self.waves.is_empty() {
            host.add_repaint_full();
        }
    }

    fn window_deleted(&mut self, window: WindowId, _api: &mut HostHandle<'_>) {
        self.waves.remove(&window);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
