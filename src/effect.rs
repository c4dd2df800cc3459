use std::any::Any;

use kurbo::Rect;

use crate::chain::{
    DrawWindowCursor, PaintScreenCursor, PaintWindowCursor, ScreenPrePaintCursor,
    WindowPrePaintCursor,
};
use crate::core::{Atom, WindowId};
use crate::error::LucentResult;
use crate::host::{EffectHost, HostHandle};
use crate::paint::{PaintMask, ScreenPaintData, ScreenPrePaintData, WindowPaintData, WindowPrePaintData};
use crate::region::Region;
use crate::window::EffectWindow;

/// Features an effect can supply to the rest of the compositor. At most one
/// provider per feature participates; the first in chain order wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    Outline,
    ScreenInversion,
    Highlighting,
    Blur,
}

/// A pluggable visual effect bracketing every paint operation.
///
/// Every hook has a forwarding default, so an effect implements only the
/// hooks it cares about and the chain skips the rest at no cost. Paint-phase
/// hooks receive a cursor to the remaining chain; the convention is to
/// adjust the data and forward, and an effect that does not forward fully
/// replaces whatever the rest of the chain (and the scene) would have drawn.
///
/// Paint hooks of an inactive effect are skipped for the whole frame;
/// lifecycle and property hooks are never skipped. Activity is sampled once
/// per frame, so an effect activated by a mid-frame event joins at the next
/// frame.
pub trait Effect: Any {
    fn name(&self) -> &'static str;

    /// Sort key within the chain; lower runs earlier.
    fn requested_chain_position(&self) -> i32 {
        0
    }

    fn is_active(&self) -> bool {
        true
    }

    fn provides(&self) -> &'static [Feature] {
        &[]
    }

    /// Widens frame damage to this effect's sampling footprint.
    fn expanded_region(&self, damage: &Region) -> Region {
        damage.clone()
    }

    // Paint phase.

    fn pre_paint_screen(
        &mut self,
        chain: &mut ScreenPrePaintCursor<'_, '_>,
        data: &mut ScreenPrePaintData,
    ) {
        chain.forward(data);
    }

    fn paint_screen(
        &mut self,
        chain: &mut PaintScreenCursor<'_, '_>,
        data: &mut ScreenPaintData,
    ) -> LucentResult<()> {
        chain.forward(data)
    }

    fn post_paint_screen(&mut self, host: &mut EffectHost) {
        let _ = host;
    }

    fn pre_paint_window(
        &mut self,
        chain: &mut WindowPrePaintCursor<'_, '_>,
        window: &EffectWindow,
        data: &mut WindowPrePaintData,
    ) {
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
        chain.forward(window, mask, region, data)
    }

    fn draw_window(
        &mut self,
        chain: &mut DrawWindowCursor<'_, '_>,
        window: &EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        chain.forward(window, mask, region, data)
    }

    fn post_paint_window(&mut self, window: &EffectWindow, host: &mut EffectHost) {
        let _ = (window, host);
    }

    // Lifecycle and property hooks; dispatched between frames, never
    // skipped. Per-window state held by an effect is keyed by `WindowId`
    // and evicted in `window_deleted`.

    fn window_added(&mut self, window: &EffectWindow, api: &mut HostHandle<'_>) {
        let _ = (window, api);
    }

    fn window_deleted(&mut self, window: WindowId, api: &mut HostHandle<'_>) {
        let _ = (window, api);
    }

    fn window_minimized(&mut self, window: &EffectWindow, api: &mut HostHandle<'_>) {
        let _ = (window, api);
    }

    fn window_unminimized(&mut self, window: &EffectWindow, api: &mut HostHandle<'_>) {
        let _ = (window, api);
    }

    fn window_activated(&mut self, window: Option<WindowId>, api: &mut HostHandle<'_>) {
        let _ = (window, api);
    }

    fn window_geometry_changed(
        &mut self,
        window: &EffectWindow,
        old: Rect,
        api: &mut HostHandle<'_>,
    ) {
        let _ = (window, old, api);
    }

    fn property_notify(&mut self, window: Option<WindowId>, atom: &Atom, api: &mut HostHandle<'_>) {
        let _ = (window, atom, api);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
