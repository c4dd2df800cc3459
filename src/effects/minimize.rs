use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::chain::{PaintWindowCursor, ScreenPrePaintCursor, WindowPrePaintCursor};
use crate::core::WindowId;
use crate::effect::Effect;
use crate::error::LucentResult;
use crate::host::{EffectHost, HostHandle};
use crate::paint::{DisableReasons, PaintMask, ScreenPrePaintData, WindowPaintData, WindowPrePaintData};
use crate::region::Region;
use crate::timeline::{Ease, TimeLine};
use crate::window::EffectWindow;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MinimizeConfig {
    pub duration_ms: u64,
    pub ease: Ease,
}

impl Default for MinimizeConfig {
    fn default() -> Self {
        Self {
            duration_ms: 300,
            ease: Ease::Linear,
        }
    }
}

struct MinimizeAnim {
    timeline: TimeLine,
    started: Option<Duration>,
    /// true while minimizing, false while restoring.
    shrinking: bool,
}

/// Scales a window towards (or back from) its taskbar icon geometry when it
/// is minimized or restored, forcing the window to keep painting while the
/// animation runs.
pub struct MinimizeEffect {
    config: MinimizeConfig,
    animations: BTreeMap<WindowId, MinimizeAnim>,
}

impl MinimizeEffect {
    pub fn new(config: MinimizeConfig) -> Self {
        Self {
            config,
            animations: BTreeMap::new(),
        }
    }

    pub fn is_animating(&self, window: WindowId) -> bool {
        self.animations.contains_key(&window)
    }

    fn begin(&mut self, window: &EffectWindow, shrinking: bool, host: &mut EffectHost) {
        if window.icon_geometry.is_none() {
            return;
        }
        self.animations.insert(
            window.id,
            MinimizeAnim {
                timeline: TimeLine::new(Duration::from_millis(self.config.duration_ms))
                    .with_ease(self.config.ease),
                started: None,
                shrinking,
            },
        );
        host.add_repaint_full();
    }
}

impl Effect for MinimizeEffect {
    fn name(&self) -> &'static str {
        "minimizeanimation"
    }

    fn is_active(&self) -> bool {
        !self.animations.is_empty()
    }

    fn pre_paint_screen(
        &mut self,
        chain: &mut ScreenPrePaintCursor<'_, '_>,
        data: &mut ScreenPrePaintData,
    ) {
        let present = chain.present_time();
        for anim in self.animations.values_mut() {
            let started = *anim.started.get_or_insert(present);
            let elapsed = present.saturating_sub(started);
            let delta = elapsed.saturating_sub(anim.timeline.elapsed());
            anim.timeline.advance(delta);
        }
        chain.forward(data);
    }

    fn pre_paint_window(
        &mut self,
        chain: &mut WindowPrePaintCursor<'_, '_>,
        window: &EffectWindow,
        data: &mut WindowPrePaintData,
    ) {
        if self.animations.contains_key(&window.id) {
            data.enable_painting(DisableReasons::MINIMIZED | DisableReasons::HIDDEN);
            data.mask |= PaintMask::WINDOW_TRANSFORMED;
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
        if let (Some(anim), Some(icon)) = (self.animations.get(&window.id), window.icon_geometry) {
            let mut progress = anim.timeline.value();
            if !anim.shrinking {
                progress = 1.0 - progress;
            }
            let geo = window.geometry;
            if geo.width() > 0.0 && geo.height() > 0.0 {
                data.x_scale = 1.0 + (icon.width() / geo.width() - 1.0) * progress;
                data.y_scale = 1.0 + (icon.height() / geo.height() - 1.0) * progress;
                data.x_translation = (icon.x0 - geo.x0) * progress;
                data.y_translation = (icon.y0 - geo.y0) * progress;
            }
        }
        chain.forward(window, mask, region, data)
    }

    fn post_paint_screen(&mut self, host: &mut EffectHost) {
        let before = self.animations.len();
        self.animations.retain(|_, anim| !anim.timeline.done());
        if before > 0 {
            // Still animating, or one more frame to settle the end state.
            host.add_repaint_full();
        }
    }

    fn window_minimized(&mut self, window: &EffectWindow, api: &mut HostHandle<'_>) {
        self.begin(window, true, api.host);
    }

    fn window_unminimized(&mut self, window: &EffectWindow, api: &mut HostHandle<'_>) {
        self.begin(window, false, api.host);
    }

    fn window_deleted(&mut self, window: WindowId, _api: &mut HostHandle<'_>) {
        self.animations.remove(&window);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompositingType;
    use kurbo::Rect;

    fn snapshot(icon: Option<Rect>) -> EffectWindow {
        EffectWindow {
            id: WindowId(1),
            surface: crate::core::SurfaceId(1),
            item: crate::core::ItemId(1),
            geometry: Rect::new(100.0, 100.0, 366.67, 420.0),
            icon_geometry: icon,
            minimized: true,
            deleted: false,
            active: false,
            kind: crate::window::WindowKind::Normal,
            content_type: crate::surface::ContentType::Normal,
            has_valid_texture: true,
        }
    }

    #[test]
    fn minimize_without_icon_geometry_does_not_animate() {
        let mut host = EffectHost::new(CompositingType::Software);
        let mut effect = MinimizeEffect::new(MinimizeConfig::default());
        let w = snapshot(None);
        let scene = crate::scene::Scene::new();
        let mut api = HostHandle { scene: &scene, host: &mut host };
        effect.window_minimized(&w, &mut api);
        assert!(!effect.is_active());
    }

    #[test]
    fn minimize_with_icon_starts_timeline() {
        let mut host = EffectHost::new(CompositingType::Software);
        let mut effect = MinimizeEffect::new(MinimizeConfig::default());
        let w = snapshot(Some(Rect::new(50.0, 10.0, 82.0, 42.0)));
        let scene = crate::scene::Scene::new();
        let mut api = HostHandle { scene: &scene, host: &mut host };
        effect.window_minimized(&w, &mut api);
        assert!(effect.is_animating(WindowId(1)));
        assert!(host.has_pending_repaints());
    }
}
