use std::collections::BTreeMap;
use std::time::Duration;

use kurbo::Rect;

use crate::backend::{DrawParams, RenderBackend, TextureRef};
use crate::core::{DelegateId, ItemId, Matrix4, SurfaceId, WindowId};
use crate::effect::{Effect, Feature};
use crate::error::{LucentError, LucentResult};
use crate::host::{EffectHost, HostHandle};
use crate::paint::{
    DisableReasons, PaintMask, ScreenPaintData, ScreenPrePaintData, WindowPaintData,
    WindowPrePaintData,
};
use crate::quad::WindowQuadList;
use crate::region::{PixelRect, Region};
use crate::scene::Scene;
use crate::shader::{ShaderId, ShaderManager, ShaderTraits};
use crate::surface::PixmapState;
use crate::target::{RenderTargetId, RenderTargetInfo, TargetFormat, TargetStack};
use crate::output::Output;
use crate::window::EffectWindow;

/// Nested window paints deeper than this abort the frame.
const MAX_PAINT_DEPTH: u8 = 8;

/// One loaded effect plus its chain bookkeeping. The effect is parked in an
/// `Option` so dispatch can lend it out while the rest of the chain stays
/// reachable.
pub struct EffectSlot {
    pub name: &'static str,
    pub position: i32,
    pub(crate) effect: Option<Box<dyn Effect>>,
    /// Latched false when the effect fails to load its resources; its paint
    /// hooks become pass-throughs permanently.
    pub valid: bool,
    /// Sampled once per frame from `is_active`.
    pub active: bool,
    pub features: &'static [Feature],
    seq: u64,
}

impl EffectSlot {
    fn runnable(&self) -> bool {
        self.valid && self.active && self.effect.is_some()
    }
}

/// Per-window state assembled during pre-paint and consumed while painting.
#[derive(Clone)]
pub struct FrameWindow {
    pub snapshot: EffectWindow,
    pub mask: PaintMask,
    /// Paint region, global coordinates.
    pub region: Region,
    /// Opaque clip usable for occlusion below this window, global
    /// coordinates.
    pub clip: Region,
    pub quads: WindowQuadList,
    pub will_paint: bool,
}

/// Everything one frame accumulates between pre-paint and present.
pub struct FrameState {
    pub delegate: DelegateId,
    pub output: Output,
    pub present_time: Duration,
    pub projection: Matrix4,
    pub screen_transform: Matrix4,
    pub screen_mask: PaintMask,
    /// Damage being painted, global coordinates.
    pub damage: Region,
    pub background_painted: bool,
    pub paint_order: Vec<WindowId>,
    pub windows: BTreeMap<WindowId, FrameWindow>,
    pub depth: u8,
    pub visible_surfaces: Vec<SurfaceId>,
}

impl FrameState {
    pub fn new(delegate: DelegateId, output: Output, present_time: Duration) -> Self {
        let projection = Matrix4::ortho(
            output.geometry,
            f64::from(output.device_width()),
            f64::from(output.device_height()),
        );
        Self {
            delegate,
            output,
            present_time,
            projection,
            screen_transform: Matrix4::IDENTITY,
            screen_mask: PaintMask::empty(),
            damage: Region::new(),
            background_painted: false,
            paint_order: Vec::new(),
            windows: BTreeMap::new(),
            depth: 0,
            visible_surfaces: Vec::new(),
        }
    }

    /// Maps a global-coordinate region into device pixels on this frame's
    /// output.
    pub fn device_clip(&self, region: &Region) -> Region {
        let ox = self.output.geometry.x0;
        let oy = self.output.geometry.y0;
        let s = self.output.scale;
        let mut out = Region::new();
        for r in region.rects() {
            let logical = r.to_logical();
            out.add(PixelRect::from_logical(Rect::new(
                (logical.x0 - ox) * s,
                (logical.y0 - oy) * s,
                (logical.x1 - ox) * s,
                (logical.y1 - oy) * s,
            )));
        }
        out
    }
}

/// Mutable state shared by every stage of one frame's paint pass.
pub(crate) struct PaintCtx<'a> {
    pub slots: &'a mut [EffectSlot],
    pub scene: &'a mut Scene,
    pub backend: &'a mut dyn RenderBackend,
    pub shaders: &'a mut ShaderManager,
    pub host: &'a mut EffectHost,
    pub targets: &'a mut TargetStack,
    pub frame: &'a mut FrameState,
}

fn next_runnable(slots: &[EffectSlot], from: usize) -> Option<usize> {
    (from..slots.len()).find(|i| slots[*i].runnable())
}

// Cursors. Each wraps the shared context plus the index of the next effect
// to run; `forward` resumes the chain from there.

pub struct ScreenPrePaintCursor<'c, 'a> {
    pub(crate) ctx: &'c mut PaintCtx<'a>,
    pub(crate) next: usize,
}

impl ScreenPrePaintCursor<'_, '_> {
    pub fn forward(&mut self, data: &mut ScreenPrePaintData) {
        pre_paint_screen_from(self.ctx, self.next, data);
    }

    pub fn present_time(&self) -> Duration {
        self.ctx.frame.present_time
    }

    pub fn host(&mut self) -> &mut EffectHost {
        &mut *self.ctx.host
    }

    pub fn output(&self) -> &Output {
        &self.ctx.frame.output
    }
}

pub struct PaintScreenCursor<'c, 'a> {
    pub(crate) ctx: &'c mut PaintCtx<'a>,
    pub(crate) next: usize,
}

impl PaintScreenCursor<'_, '_> {
    pub fn forward(&mut self, data: &mut ScreenPaintData) -> LucentResult<()> {
        paint_screen_from(self.ctx, self.next, data)
    }

    pub fn host(&mut self) -> &mut EffectHost {
        &mut *self.ctx.host
    }

    pub fn output(&self) -> &Output {
        &self.ctx.frame.output
    }

    pub fn read_pixel(&mut self, x: u32, y: u32) -> LucentResult<crate::core::Rgba8Premul> {
        self.ctx.backend.read_pixel(x, y)
    }

    /// Paints one window through the full window chain, as a fullscreen
    /// effect replacing the ordinary screen walk would.
    pub fn paint_window(
        &mut self,
        id: WindowId,
        mask: PaintMask,
        region: &Region,
    ) -> LucentResult<()> {
        let Some(fw) = self.ctx.frame.windows.get(&id).cloned() else {
            return Ok(());
        };
        let snapshot = fw.snapshot.clone();
        let mut data = WindowPaintData::new(fw.quads.clone(), self.ctx.scene.fallback_color());
        paint_window_from(self.ctx, 0, &snapshot, mask | fw.mask, region, &mut data)
    }
}

pub struct WindowPrePaintCursor<'c, 'a> {
    pub(crate) ctx: &'c mut PaintCtx<'a>,
    pub(crate) next: usize,
}

impl WindowPrePaintCursor<'_, '_> {
    pub fn forward(&mut self, window: &EffectWindow, data: &mut WindowPrePaintData) {
        pre_paint_window_from(self.ctx, self.next, window, data);
    }

    pub fn present_time(&self) -> Duration {
        self.ctx.frame.present_time
    }

    pub fn host(&mut self) -> &mut EffectHost {
        &mut *self.ctx.host
    }
}

pub struct PaintWindowCursor<'c, 'a> {
    pub(crate) ctx: &'c mut PaintCtx<'a>,
    pub(crate) next: usize,
}

impl PaintWindowCursor<'_, '_> {
    pub fn forward(
        &mut self,
        window: &EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        paint_window_from(self.ctx, self.next, window, mask, region, data)
    }

    pub fn host(&mut self) -> &mut EffectHost {
        &mut *self.ctx.host
    }

    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut *self.ctx.backend
    }

    pub fn frame(&self) -> &FrameState {
        &*self.ctx.frame
    }

    pub fn builtin_shader(&mut self, traits: ShaderTraits) -> LucentResult<ShaderId> {
        self.ctx.shaders.shader(traits, &mut *self.ctx.backend)
    }

    pub fn push_shader(&mut self, shader: ShaderId) {
        self.ctx.shaders.push(shader);
    }

    pub fn pop_shader(&mut self) -> Option<ShaderId> {
        self.ctx.shaders.pop()
    }

    pub fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
    ) -> LucentResult<RenderTargetInfo> {
        self.ctx
            .backend
            .create_render_target(width, height, TargetFormat::Rgba8Premul)
    }

    pub fn push_render_target(&mut self, target: RenderTargetId) -> LucentResult<()> {
        self.ctx.targets.push(target);
        self.ctx.backend.bind_render_target(Some(target))
    }

    pub fn pop_render_target(&mut self) -> LucentResult<RenderTargetId> {
        let popped = self.ctx.targets.pop()?;
        self.ctx.backend.bind_render_target(self.ctx.targets.current())?;
        Ok(popped)
    }

    /// Paints another window through the full window chain, e.g. to render
    /// a live thumbnail. Nested paints are depth-guarded; a chain that
    /// never terminates aborts the frame.
    pub fn paint_other_window(
        &mut self,
        id: WindowId,
        mask: PaintMask,
        region: &Region,
    ) -> LucentResult<()> {
        let Some(fw) = self.ctx.frame.windows.get(&id).cloned() else {
            return Ok(());
        };
        let mut data = WindowPaintData::new(fw.quads.clone(), self.ctx.scene.fallback_color());
        paint_window_from(self.ctx, 0, &fw.snapshot, mask | fw.mask, region, &mut data)
    }
}

pub struct DrawWindowCursor<'c, 'a> {
    pub(crate) ctx: &'c mut PaintCtx<'a>,
    pub(crate) next: usize,
}

impl DrawWindowCursor<'_, '_> {
    pub fn forward(
        &mut self,
        window: &EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        draw_window_from(self.ctx, self.next, window, mask, region, data)
    }

    pub fn host(&mut self) -> &mut EffectHost {
        &mut *self.ctx.host
    }

    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut *self.ctx.backend
    }

    pub fn frame(&self) -> &FrameState {
        &*self.ctx.frame
    }
}

// Chain dispatch. Each `*_from` resumes the chain at the first runnable
// slot at or after `from`; when the chain is exhausted the terminal
// behaviour runs.

pub(crate) fn pre_paint_screen_from(
    ctx: &mut PaintCtx<'_>,
    from: usize,
    data: &mut ScreenPrePaintData,
) {
    let Some(i) = next_runnable(ctx.slots, from) else {
        return;
    };
    let Some(mut effect) = ctx.slots[i].effect.take() else {
        return;
    };
    let mut cursor = ScreenPrePaintCursor { ctx: &mut *ctx, next: i + 1 };
    effect.pre_paint_screen(&mut cursor, data);
    ctx.slots[i].effect = Some(effect);
}

pub(crate) fn paint_screen_from(
    ctx: &mut PaintCtx<'_>,
    from: usize,
    data: &mut ScreenPaintData,
) -> LucentResult<()> {
    match next_runnable(ctx.slots, from) {
        Some(i) => {
            let Some(mut effect) = ctx.slots[i].effect.take() else {
                return Ok(());
            };
            let result = {
                let mut cursor = PaintScreenCursor { ctx: &mut *ctx, next: i + 1 };
                effect.paint_screen(&mut cursor, data)
            };
            ctx.slots[i].effect = Some(effect);
            result
        }
        None => terminal_paint_screen(ctx, data),
    }
}

pub(crate) fn pre_paint_window_from(
    ctx: &mut PaintCtx<'_>,
    from: usize,
    window: &EffectWindow,
    data: &mut WindowPrePaintData,
) {
    let Some(i) = next_runnable(ctx.slots, from) else {
        return;
    };
    let Some(mut effect) = ctx.slots[i].effect.take() else {
        return;
    };
    let mut cursor = WindowPrePaintCursor { ctx: &mut *ctx, next: i + 1 };
    effect.pre_paint_window(&mut cursor, window, data);
    ctx.slots[i].effect = Some(effect);
}

pub(crate) fn paint_window_from(
    ctx: &mut PaintCtx<'_>,
    from: usize,
    window: &EffectWindow,
    mask: PaintMask,
    region: &Region,
    data: &mut WindowPaintData,
) -> LucentResult<()> {
    if from == 0 {
        if ctx.frame.depth >= MAX_PAINT_DEPTH {
            return Err(LucentError::chain_recursion(format!(
                "window {:?} painted at depth {}",
                window.id, ctx.frame.depth
            )));
        }
        ctx.frame.depth += 1;
    }
    let result = match next_runnable(ctx.slots, from) {
        Some(i) => match ctx.slots[i].effect.take() {
            Some(mut effect) => {
                let result = {
                    let mut cursor = PaintWindowCursor { ctx: &mut *ctx, next: i + 1 };
                    effect.paint_window(&mut cursor, window, mask, region, data)
                };
                ctx.slots[i].effect = Some(effect);
                result
            }
            None => Ok(()),
        },
        // The paint chain bottoms out in the draw chain, which starts over
        // so every effect gets its draw hook.
        None => draw_window_from(ctx, 0, window, mask, region, data),
    };
    if from == 0 {
        ctx.frame.depth = ctx.frame.depth.saturating_sub(1);
    }
    result
}

pub(crate) fn draw_window_from(
    ctx: &mut PaintCtx<'_>,
    from: usize,
    window: &EffectWindow,
    mask: PaintMask,
    region: &Region,
    data: &mut WindowPaintData,
) -> LucentResult<()> {
    match next_runnable(ctx.slots, from) {
        Some(i) => {
            let Some(mut effect) = ctx.slots[i].effect.take() else {
                return Ok(());
            };
            let result = {
                let mut cursor = DrawWindowCursor { ctx: &mut *ctx, next: i + 1 };
                effect.draw_window(&mut cursor, window, mask, region, data)
            };
            ctx.slots[i].effect = Some(effect);
            result
        }
        None => terminal_draw_window(ctx, window, region, data),
    }
}

/// The built-in screen paint: clear the background over the damage, then
/// walk the stacking order painting windows bottom-up with opaque occlusion
/// culling, then the cursor and overlay items on top.
fn terminal_paint_screen(ctx: &mut PaintCtx<'_>, data: &mut ScreenPaintData) -> LucentResult<()> {
    ctx.frame.projection = data.projection;
    ctx.frame.screen_transform = data.screen_transform;
    ctx.frame.screen_mask = data.mask;

    if !ctx.frame.background_painted {
        let clip = ctx.frame.device_clip(&ctx.frame.damage.clone());
        ctx.backend.clear(&clip, ctx.scene.background())?;
        ctx.frame.background_painted = true;
    }

    let order = ctx.frame.paint_order.clone();
    let cull = !data
        .mask
        .intersects(PaintMask::SCREEN_TRANSFORMED | PaintMask::SCREEN_WITH_TRANSFORMED_WINDOWS);

    // Accumulate opaque coverage top-down so lower windows only paint what
    // actually shows through.
    let mut regions: BTreeMap<WindowId, Region> = BTreeMap::new();
    let mut overhead = Region::new();
    for wid in order.iter().rev() {
        let Some(fw) = ctx.frame.windows.get(wid) else {
            continue;
        };
        let mut region = fw.region.clone();
        if cull {
            region.subtract_region(&overhead);
            if !fw.mask.contains(PaintMask::WINDOW_TRANSLUCENT)
                && !fw.mask.contains(PaintMask::WINDOW_TRANSFORMED)
            {
                overhead.union_with(&fw.clip);
            }
        }
        regions.insert(*wid, region);
    }

    for wid in order {
        let Some(fw) = ctx.frame.windows.get(&wid).cloned() else {
            continue;
        };
        let region = regions.remove(&wid).unwrap_or_default();
        if region.is_empty() {
            continue;
        }
        let snapshot = fw.snapshot.clone();
        let mut wdata = WindowPaintData::new(fw.quads.clone(), ctx.scene.fallback_color());
        paint_window_from(ctx, 0, &snapshot, data.mask | fw.mask, &region, &mut wdata)?;
        post_paint_window_all(ctx, &snapshot);
    }

    // Cursor and overlay ride above every window, outside the effect chain.
    let damage = ctx.frame.damage.clone();
    if let Some(item) = ctx.scene.overlay_item() {
        draw_item_direct(ctx, item, &damage)?;
    }
    if let Some(item) = ctx.scene.cursor_item() {
        draw_item_direct(ctx, item, &damage)?;
    }
    Ok(())
}

/// Reverse-order post-paint for one window, right after its paint recursion
/// unwinds.
fn post_paint_window_all(ctx: &mut PaintCtx<'_>, window: &EffectWindow) {
    for i in (0..ctx.slots.len()).rev() {
        if !ctx.slots[i].runnable() {
            continue;
        }
        let Some(mut effect) = ctx.slots[i].effect.take() else {
            continue;
        };
        effect.post_paint_window(window, &mut *ctx.host);
        ctx.slots[i].effect = Some(effect);
    }
}

/// The built-in window draw: upload pending surface content, group quads by
/// item, and hand batches to the backend with the paint data folded into
/// draw parameters.
fn terminal_draw_window(
    ctx: &mut PaintCtx<'_>,
    window: &EffectWindow,
    region: &Region,
    data: &mut WindowPaintData,
) -> LucentResult<()> {
    if region.is_empty() || data.quads.is_empty() || data.opacity <= 0.0 {
        return Ok(());
    }

    // Group quads by source item, preserving build order (shadow below
    // decoration below contents).
    let mut groups: Vec<(ItemId, WindowQuadList)> = Vec::new();
    for quad in data.quads.iter() {
        match groups.last_mut() {
            Some((id, list)) if *id == quad.item => list.push(*quad),
            _ => {
                let mut list = WindowQuadList::new();
                list.push(*quad);
                groups.push((quad.item, list));
            }
        }
    }

    // Upload pass: bring surface textures up to date before sampling.
    for (item_id, _) in &groups {
        let Some(state) = ctx.scene.tree.get_mut(*item_id).and_then(|i| i.surface_mut()) else {
            continue;
        };
        let pending = std::mem::take(&mut state.pending_upload);
        let needs_upload =
            !pending.is_empty() || (state.pixmap.state() != PixmapState::Bound && state.pixmap.buffer().is_some());
        if needs_upload {
            if let Err(err) = state.pixmap.upload(&mut *ctx.backend, &pending) {
                tracing::debug!(surface = state.surface.0, error = %err, "buffer import failed; painting fallback");
            }
        }
    }

    let window_origin = ctx
        .scene
        .window(window.id)
        .map(|w| ctx.scene.tree.global_position(w.item))
        .unwrap_or(window.geometry.origin());
    let base = ctx.frame.projection * ctx.frame.screen_transform * data.transform(window_origin);
    let clip = ctx.frame.device_clip(region);

    for (item_id, quads) in groups {
        let Some(item) = ctx.scene.tree.get(item_id) else {
            continue;
        };
        let mut params = DrawParams::new(base);
        params.opacity = data.opacity * item.opacity();
        params.brightness = data.brightness;
        params.saturation = data.saturation;
        params.shader = data.shader.or(ctx.shaders.current());
        params.clip = Some(clip.clone());

        let texture = item.texture();
        match &texture {
            Some(handle) => {
                ctx.backend
                    .draw_quads(&quads, TextureRef::Handle(handle), &params)?;
            }
            None => {
                ctx.backend
                    .draw_quads(&quads, TextureRef::Solid(data.fallback), &params)?;
            }
        }
        if let Some(surface) = item.surface() {
            ctx.frame.visible_surfaces.push(surface.surface);
        }
    }
    Ok(())
}

/// Paints a free-standing item (cursor, overlay) without effect bracketing.
fn draw_item_direct(ctx: &mut PaintCtx<'_>, item_id: ItemId, damage: &Region) -> LucentResult<()> {
    if !ctx.scene.tree.effective_visible(item_id) {
        return Ok(());
    }
    let quads = ctx.scene.tree.quads(item_id);
    if quads.is_empty() {
        return Ok(());
    }
    let Some(item) = ctx.scene.tree.get(item_id) else {
        return Ok(());
    };
    // Overlay and cursor textures are supplied externally; until one
    // arrives there is nothing to show.
    let Some(texture) = item.texture() else {
        return Ok(());
    };
    let origin = ctx.scene.tree.global_position(item_id);
    let mut params = DrawParams::new(
        ctx.frame.projection * ctx.frame.screen_transform * Matrix4::translation(origin.x, origin.y),
    );
    params.opacity = item.opacity();
    params.clip = Some(ctx.frame.device_clip(damage));
    ctx.backend
        .draw_quads(&quads, TextureRef::Handle(&texture), &params)
}

/// Builds the quad list for a whole window: every visible descendant item's
/// quads, translated into window-local coordinates.
pub(crate) fn build_window_quads(scene: &mut Scene, window: WindowId) -> WindowQuadList {
    let Some(w) = scene.window(window) else {
        return WindowQuadList::new();
    };
    let root = w.item;
    let root_origin = scene.tree.global_position(root);
    let mut out = WindowQuadList::new();
    for item in scene.tree.subtree(root) {
        if item == root {
            continue;
        }
        if !scene
            .tree
            .get(item)
            .map(|i| i.explicit_visible())
            .unwrap_or(false)
        {
            continue;
        }
        let origin = scene.tree.global_position(item);
        let quads = scene
            .tree
            .quads(item)
            .translated(origin.x - root_origin.x, origin.y - root_origin.y);
        for q in quads.iter() {
            out.push(*q);
        }
    }
    out
}

/// The ordered effect list. Dispatch alternates between the chain and the
/// scene: each hook may adjust data and forward, and the terminal handlers
/// do the actual compositing.
#[derive(Default)]
pub struct EffectChain {
    slots: Vec<EffectSlot>,
    next_seq: u64,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an effect, keeping the chain sorted by requested position
    /// (stable for equal positions).
    pub fn add(&mut self, effect: Box<dyn Effect>) {
        self.next_seq += 1;
        let slot = EffectSlot {
            name: effect.name(),
            position: effect.requested_chain_position(),
            features: effect.provides(),
            effect: Some(effect),
            valid: true,
            active: false,
            seq: self.next_seq,
        };
        self.slots.push(slot);
        self.slots.sort_by_key(|s| (s.position, s.seq));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.slots.len();
        self.slots.retain(|s| s.name != name);
        self.slots.len() != before
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.name).collect()
    }

    /// Marks an effect permanently broken; its paint hooks are skipped from
    /// now on.
    pub fn mark_invalid(&mut self, name: &str) {
        for slot in &mut self.slots {
            if slot.name == name {
                slot.valid = false;
            }
        }
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.name == name && s.valid)
    }

    /// The first valid effect in chain order supplying `feature`, if any.
    pub fn provider_of(&self, feature: Feature) -> Option<&'static str> {
        self.slots
            .iter()
            .find(|s| s.valid && s.features.contains(&feature))
            .map(|s| s.name)
    }

    /// Samples activity for the coming frame.
    pub fn begin_frame(&mut self) {
        for slot in &mut self.slots {
            slot.active = slot.valid
                && slot
                    .effect
                    .as_ref()
                    .map(|e| e.is_active())
                    .unwrap_or(false);
        }
    }

    pub fn any_active(&self) -> bool {
        self.slots.iter().any(|s| s.active)
    }

    /// Folds every active effect's damage expansion over `damage`.
    pub fn expand_damage(&self, damage: &Region) -> Region {
        let mut out = damage.clone();
        for slot in &self.slots {
            if !slot.runnable() {
                continue;
            }
            if let Some(effect) = slot.effect.as_ref() {
                out = effect.expanded_region(&out);
            }
        }
        out
    }

    /// Reverse-order screen post-paint; strict reverse of the paint order.
    pub fn post_paint_screen(&mut self, host: &mut EffectHost) {
        for slot in self.slots.iter_mut().rev() {
            if !slot.valid || !slot.active {
                continue;
            }
            if let Some(effect) = slot.effect.as_mut() {
                effect.post_paint_screen(host);
            }
        }
    }

    /// Typed access to a loaded effect, for toggles and tests.
    pub fn effect_mut<T: Effect>(&mut self) -> Option<&mut T> {
        for slot in &mut self.slots {
            if let Some(effect) = slot.effect.as_mut() {
                if let Some(typed) = effect.as_any_mut().downcast_mut::<T>() {
                    return Some(typed);
                }
            }
        }
        None
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [EffectSlot] {
        &mut self.slots
    }

    // Lifecycle dispatch; valid effects only, never gated on activity.

    pub fn window_added(&mut self, scene: &Scene, host: &mut EffectHost, window: &EffectWindow) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.window_added(window, &mut api);
                }
            }
        }
    }

    pub fn window_deleted(&mut self, scene: &Scene, host: &mut EffectHost, window: WindowId) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.window_deleted(window, &mut api);
                }
            }
        }
    }

    pub fn window_minimized(&mut self, scene: &Scene, host: &mut EffectHost, window: &EffectWindow) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.window_minimized(window, &mut api);
                }
            }
        }
    }

    pub fn window_unminimized(
        &mut self,
        scene: &Scene,
        host: &mut EffectHost,
        window: &EffectWindow,
    ) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.window_unminimized(window, &mut api);
                }
            }
        }
    }

    pub fn window_activated(&mut self, scene: &Scene, host: &mut EffectHost, window: Option<WindowId>) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.window_activated(window, &mut api);
                }
            }
        }
    }

    pub fn window_geometry_changed(
        &mut self,
        scene: &Scene,
        host: &mut EffectHost,
        window: &EffectWindow,
        old: Rect,
    ) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.window_geometry_changed(window, old, &mut api);
                }
            }
        }
    }

    pub fn property_notify(
        &mut self,
        scene: &Scene,
        host: &mut EffectHost,
        window: Option<WindowId>,
        atom: &crate::core::Atom,
    ) {
        let mut api = HostHandle { scene, host };
        for slot in &mut self.slots {
            if slot.valid {
                if let Some(effect) = slot.effect.as_mut() {
                    effect.property_notify(window, atom, &mut api);
                }
            }
        }
    }
}

/// Assembles the per-window pre-paint state for every window in stacking
/// order, running the pre-paint-window chain for each.
pub(crate) fn run_window_prepaint(ctx: &mut PaintCtx<'_>) {
    let order = ctx.scene.stacking_order();
    for wid in order {
        let Some(snapshot) = ctx.scene.effect_window(wid) else {
            continue;
        };
        let Some(w) = ctx.scene.window(wid) else {
            continue;
        };
        let surface_item = w.surface_item;
        let root_item = w.item;

        let mut disabled = DisableReasons::empty();
        if snapshot.minimized {
            disabled |= DisableReasons::MINIMIZED;
        }
        if snapshot.deleted {
            disabled |= DisableReasons::DELETED;
        }
        if !snapshot.minimized && !snapshot.deleted && !ctx.scene.tree.effective_visible(root_item)
        {
            disabled |= DisableReasons::HIDDEN;
        }

        // Opaque coverage decides the default translucency mask.
        let item_rect = ctx
            .scene
            .tree
            .get(surface_item)
            .map(|i| i.rect())
            .unwrap_or_default();
        let opaque_local = ctx.scene.tree.opaque(surface_item);
        let fully_opaque = snapshot.has_valid_texture
            && opaque_local.contains_rect(PixelRect::from_logical(item_rect));
        let mut mask = PaintMask::empty();
        mask |= if fully_opaque {
            PaintMask::WINDOW_OPAQUE
        } else {
            PaintMask::WINDOW_TRANSLUCENT
        };

        let origin = ctx.scene.tree.global_position(surface_item);
        let clip = opaque_local.translated(origin.x.floor() as i32, origin.y.floor() as i32);

        let quads = build_window_quads(ctx.scene, wid);
        let mut data = WindowPrePaintData {
            mask,
            paint: ctx.frame.damage.clone(),
            clip,
            quads,
            disabled,
        };
        pre_paint_window_from(ctx, 0, &snapshot, &mut data);

        let will_paint = data.will_paint() && !data.quads.is_empty();
        if will_paint {
            ctx.frame.paint_order.push(wid);
        }
        ctx.frame.windows.insert(
            wid,
            FrameWindow {
                snapshot,
                mask: data.mask,
                region: data.paint,
                clip: if data.mask.contains(PaintMask::WINDOW_OPAQUE) {
                    data.clip
                } else {
                    Region::new()
                },
                quads: data.quads,
                will_paint,
            },
        );
    }
}
