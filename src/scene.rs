use std::collections::BTreeMap;

use kurbo::{Point, Rect, Size};

use crate::buffer::ClientBuffer;
use crate::core::{DelegateId, ItemId, OutputId, Rgba8Premul, SurfaceId, WindowId};
use crate::error::{LucentError, LucentResult};
use crate::item::{ItemKind, ItemTree};
use crate::output::Output;
use crate::region::{PixelRect, Region};
use crate::surface::{ContentType, SurfaceState};
use crate::texture::TextureHandle;
use crate::window::{EffectWindow, Window, WindowDesc};

/// Margin a shadow item extends past the window frame on every side.
const SHADOW_MARGIN: f64 = 16.0;

/// The scene graph: windows, their items, the cursor, overlay content, and
/// the outputs everything is rendered to. The scene renders what it is told
/// to render; which windows exist and where is the window manager's call.
pub struct Scene {
    pub tree: ItemTree,
    windows: BTreeMap<WindowId, Window>,
    /// Bottom-to-top paint order.
    stacking: Vec<WindowId>,
    surface_items: BTreeMap<SurfaceId, ItemId>,
    outputs: BTreeMap<OutputId, Output>,
    cursor_item: Option<ItemId>,
    overlay_item: Option<ItemId>,
    background: Rgba8Premul,
    active_window: Option<WindowId>,
    debug_fallback: bool,
    next_window: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            tree: ItemTree::new(),
            windows: BTreeMap::new(),
            stacking: Vec::new(),
            surface_items: BTreeMap::new(),
            outputs: BTreeMap::new(),
            cursor_item: None,
            overlay_item: None,
            background: Rgba8Premul::BLACK,
            active_window: None,
            debug_fallback: cfg!(debug_assertions),
            next_window: 0,
        }
    }

    pub fn set_background(&mut self, color: Rgba8Premul) {
        self.background = color;
    }

    pub fn background(&self) -> Rgba8Premul {
        self.background
    }

    pub fn set_debug_fallback(&mut self, debug: bool) {
        self.debug_fallback = debug;
    }

    pub fn fallback_color(&self) -> Rgba8Premul {
        crate::core::fallback_color(self.debug_fallback)
    }

    // Outputs and delegates.

    pub fn add_output(&mut self, output: Output) {
        self.tree.register_delegate(output.delegate);
        self.outputs.insert(output.id, output);
    }

    /// Marks an output gone. Its delegate keeps accumulated damage so a
    /// replacement output can resume without a full redraw being lost.
    pub fn remove_output(&mut self, id: OutputId) {
        if let Some(out) = self.outputs.get_mut(&id) {
            out.enabled = false;
        }
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn output_for_delegate(&self, delegate: DelegateId) -> Option<&Output> {
        self.outputs.values().find(|o| o.delegate == delegate)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    // Windows.

    pub fn add_window(&mut self, desc: WindowDesc) -> WindowId {
        self.next_window += 1;
        let id = WindowId(self.next_window);

        let root = self.tree.create_item(ItemKind::Window(id), None);
        self.tree.set_position(root, desc.geometry.origin());
        self.tree
            .set_size(root, Size::new(desc.geometry.width(), desc.geometry.height()));

        let shadow_item = desc.with_shadow.then(|| {
            let shadow = self
                .tree
                .create_item(ItemKind::Shadow { texture: None }, Some(root));
            self.tree.set_z(shadow, -2);
            self.tree
                .set_position(shadow, Point::new(-SHADOW_MARGIN, -SHADOW_MARGIN));
            self.tree.set_size(
                shadow,
                Size::new(
                    desc.geometry.width() + 2.0 * SHADOW_MARGIN,
                    desc.geometry.height() + 2.0 * SHADOW_MARGIN,
                ),
            );
            shadow
        });

        let decoration_item = desc.decorated.then(|| {
            let deco = self
                .tree
                .create_item(ItemKind::Decoration { texture: None }, Some(root));
            self.tree.set_z(deco, -1);
            self.tree
                .set_size(deco, Size::new(desc.geometry.width(), desc.geometry.height()));
            deco
        });

        let surface_item = self
            .tree
            .create_item(ItemKind::Surface(SurfaceState::new(desc.surface)), Some(root));
        self.tree
            .set_size(surface_item, Size::new(desc.geometry.width(), desc.geometry.height()));
        self.surface_items.insert(desc.surface, surface_item);

        let window = Window {
            id,
            surface: desc.surface,
            item: root,
            surface_item,
            decoration_item,
            shadow_item,
            geometry: desc.geometry,
            icon_geometry: None,
            minimized: false,
            deleted: false,
            active: false,
            kind: desc.kind,
            properties: BTreeMap::new(),
            deleted_refs: 0,
        };
        self.windows.insert(id, window);
        self.stacking.push(id);
        id
    }

    /// Marks a window closed. The items survive while any effect holds a
    /// deleted-window reference; [`Scene::reap_deleted`] collects the rest.
    pub fn mark_window_deleted(&mut self, id: WindowId) {
        if let Some(w) = self.windows.get_mut(&id) {
            w.deleted = true;
        }
    }

    pub fn ref_deleted_window(&mut self, id: WindowId) {
        if let Some(w) = self.windows.get_mut(&id) {
            w.deleted_refs += 1;
        }
    }

    pub fn unref_deleted_window(&mut self, id: WindowId) {
        if let Some(w) = self.windows.get_mut(&id) {
            w.deleted_refs = w.deleted_refs.saturating_sub(1);
        }
    }

    /// Destroys deleted windows nothing references anymore. Returns the ids
    /// that were dropped.
    pub fn reap_deleted(&mut self) -> Vec<WindowId> {
        let dead: Vec<WindowId> = self
            .windows
            .values()
            .filter(|w| w.deleted && w.deleted_refs == 0)
            .map(|w| w.id)
            .collect();
        for id in &dead {
            if let Some(w) = self.windows.remove(id) {
                self.surface_items.remove(&w.surface);
                self.tree.remove_item(w.item);
            }
            self.stacking.retain(|s| s != id);
            if self.active_window == Some(*id) {
                self.active_window = None;
            }
        }
        dead
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    pub fn window_by_surface(&self, surface: SurfaceId) -> Option<&Window> {
        self.windows.values().find(|w| w.surface == surface)
    }

    /// Bottom-to-top stacking order, deleted windows included while they
    /// are kept alive for animations.
    pub fn stacking_order(&self) -> Vec<WindowId> {
        self.stacking.clone()
    }

    pub fn raise(&mut self, id: WindowId) {
        if let Some(pos) = self.stacking.iter().position(|w| *w == id) {
            self.stacking.remove(pos);
            self.stacking.push(id);
            if let Some(w) = self.windows.get(&id) {
                let bounds = self.tree.map_to_global(w.item, self.tree.get(w.item).map(|i| i.bounding_rect()).unwrap_or_default());
                self.damage_global_rect(bounds);
            }
        }
    }

    pub fn set_active_window(&mut self, id: Option<WindowId>) {
        if let Some(prev) = self.active_window {
            if let Some(w) = self.windows.get_mut(&prev) {
                w.active = false;
            }
        }
        if let Some(next) = id {
            if let Some(w) = self.windows.get_mut(&next) {
                w.active = true;
            }
        }
        self.active_window = id;
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.active_window
    }

    pub fn set_window_geometry(&mut self, id: WindowId, geometry: Rect) -> Option<Rect> {
        let w = self.windows.get_mut(&id)?;
        let old = w.geometry;
        w.geometry = geometry;
        let (item, surface_item, decoration_item, shadow_item) =
            (w.item, w.surface_item, w.decoration_item, w.shadow_item);
        self.tree.set_position(item, geometry.origin());
        let size = Size::new(geometry.width(), geometry.height());
        self.tree.set_size(item, size);
        self.tree.set_size(surface_item, size);
        if let Some(deco) = decoration_item {
            self.tree.set_size(deco, size);
        }
        if let Some(shadow) = shadow_item {
            self.tree.set_size(
                shadow,
                Size::new(size.width + 2.0 * SHADOW_MARGIN, size.height + 2.0 * SHADOW_MARGIN),
            );
        }
        Some(old)
    }

    pub fn set_minimized(&mut self, id: WindowId, minimized: bool) {
        let Some(w) = self.windows.get_mut(&id) else {
            return;
        };
        if w.minimized == minimized {
            return;
        }
        w.minimized = minimized;
        let item = w.item;
        self.tree.set_visible(item, !minimized);
    }

    pub fn set_icon_geometry(&mut self, id: WindowId, icon: Option<Rect>) {
        if let Some(w) = self.windows.get_mut(&id) {
            w.icon_geometry = icon;
        }
    }

    pub fn set_window_property(&mut self, id: WindowId, atom: crate::core::Atom, value: Option<Vec<u8>>) {
        if let Some(w) = self.windows.get_mut(&id) {
            match value {
                Some(v) => {
                    w.properties.insert(atom, v);
                }
                None => {
                    w.properties.remove(&atom);
                }
            }
        }
    }

    /// Plain-data view of a window for effect hooks.
    pub fn effect_window(&self, id: WindowId) -> Option<EffectWindow> {
        let w = self.windows.get(&id)?;
        let surface = self.tree.get(w.surface_item).and_then(|i| i.surface());
        Some(EffectWindow {
            id: w.id,
            surface: w.surface,
            item: w.item,
            geometry: w.geometry,
            icon_geometry: w.icon_geometry,
            minimized: w.minimized,
            deleted: w.deleted,
            active: w.active,
            kind: w.kind,
            content_type: surface.map(|s| s.content_type).unwrap_or_default(),
            has_valid_texture: surface.map(|s| s.pixmap.is_valid()).unwrap_or(false),
        })
    }

    // Surfaces.

    pub fn surface_item(&self, surface: SurfaceId) -> Option<ItemId> {
        self.surface_items.get(&surface).copied()
    }

    /// Attaches a subsurface below `parent`, positioned surface-locally.
    pub fn add_subsurface(&mut self, parent: SurfaceId, surface: SurfaceId, position: Point, size: Size) -> LucentResult<ItemId> {
        let parent_item = self
            .surface_item(parent)
            .ok_or_else(|| LucentError::validation("unknown parent surface"))?;
        let item = self
            .tree
            .create_item(ItemKind::Surface(SurfaceState::new(surface)), Some(parent_item));
        self.tree.set_position(item, position);
        self.tree.set_size(item, size);
        self.surface_items.insert(surface, item);
        Ok(item)
    }

    /// A new buffer was committed to `surface` with `damage` in
    /// surface-local coordinates.
    pub fn commit_buffer(&mut self, surface: SurfaceId, buffer: ClientBuffer, damage: &Region) -> LucentResult<()> {
        let item = self
            .surface_item(surface)
            .ok_or_else(|| LucentError::validation("commit for unknown surface"))?;
        let (w, h) = buffer.size();
        if let Some(state) = self.tree.get_mut(item).and_then(|i| i.surface_mut()) {
            state.pixmap.attach(buffer);
            state.pending_upload.union_with(damage);
        }
        // A stale pixmap must record damage over the stale extent before the
        // commit completes.
        let full = PixelRect::new(0, 0, w as i32, h as i32);
        let mut repaint = damage.clone();
        if repaint.is_empty() {
            repaint.add(full);
        }
        self.tree.schedule_repaint(item, &repaint);
        Ok(())
    }

    /// The client reclaimed the committed buffer.
    pub fn release_buffer(&mut self, surface: SurfaceId) {
        if let Some(item) = self.surface_item(surface) {
            if let Some(state) = self.tree.get_mut(item).and_then(|i| i.surface_mut()) {
                state.pixmap.mark_stale();
            }
        }
    }

    pub fn set_surface_regions(&mut self, surface: SurfaceId, shape: Region, opaque: Region) {
        if let Some(item) = self.surface_item(surface) {
            if let Some(state) = self.tree.get_mut(item).and_then(|i| i.surface_mut()) {
                state.shape = shape;
                state.opaque = opaque;
            }
            self.tree.invalidate_quads(item);
        }
    }

    pub fn set_content_type(&mut self, surface: SurfaceId, content_type: ContentType) {
        if let Some(item) = self.surface_item(surface) {
            if let Some(state) = self.tree.get_mut(item).and_then(|i| i.surface_mut()) {
                state.content_type = content_type;
            }
        }
    }

    // Cursor and overlay.

    pub fn set_cursor(&mut self, texture: Option<TextureHandle>, hotspot: Point, position: Point, size: Size) {
        let item = *self.cursor_item.get_or_insert_with(|| {
            self.tree
                .create_item(ItemKind::Cursor { texture: None, hotspot: Point::ZERO }, None)
        });
        if let Some(node) = self.tree.get_mut(item) {
            node.kind = ItemKind::Cursor { texture, hotspot };
        }
        self.tree.set_position(item, position - hotspot.to_vec2());
        self.tree.set_size(item, size);
    }

    pub fn cursor_item(&self) -> Option<ItemId> {
        self.cursor_item
    }

    /// Creates (or replaces) the modal overlay item used for on-screen
    /// messages, stacked above every window.
    pub fn set_overlay(&mut self, texture: Option<TextureHandle>, rect: Rect) -> ItemId {
        let item = *self.overlay_item.get_or_insert_with(|| {
            self.tree.create_item(ItemKind::Image { texture: None }, None)
        });
        if let Some(node) = self.tree.get_mut(item) {
            node.kind = ItemKind::Image { texture };
        }
        self.tree.set_position(item, rect.origin());
        self.tree.set_size(item, Size::new(rect.width(), rect.height()));
        item
    }

    pub fn clear_overlay(&mut self) {
        if let Some(item) = self.overlay_item.take() {
            self.tree.remove_item(item);
        }
    }

    pub fn overlay_item(&self) -> Option<ItemId> {
        self.overlay_item
    }

    /// Records damage over a global-coordinate rect for every delegate, and
    /// requests a frame even where no window intersects it (the background
    /// repaints too).
    pub fn damage_global_rect(&mut self, rect: Rect) {
        if rect.is_zero_area() {
            return;
        }
        self.tree.add_global_damage(PixelRect::from_logical(rect));
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ShmBuffer;

    fn scene_with_output() -> (Scene, DelegateId) {
        let mut scene = Scene::new();
        let delegate = DelegateId(1);
        scene.add_output(Output::new(
            OutputId(1),
            "OUT-1",
            Rect::new(0.0, 0.0, 1024.0, 768.0),
            1.0,
            std::time::Duration::from_nanos(16_666_667),
            delegate,
        ));
        (scene, delegate)
    }

    #[test]
    fn window_items_compose_shadow_decoration_surface() {
        let (mut scene, _) = scene_with_output();
        let id = scene.add_window(WindowDesc {
            surface: SurfaceId(7),
            geometry: Rect::new(100.0, 100.0, 500.0, 400.0),
            kind: crate::window::WindowKind::Normal,
            decorated: true,
            with_shadow: true,
        });
        let w = scene.window(id).unwrap();
        let children = scene.tree.get(w.item).unwrap().children().to_vec();
        // Shadow below decoration below contents.
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], w.shadow_item.unwrap());
        assert_eq!(children[1], w.decoration_item.unwrap());
        assert_eq!(children[2], w.surface_item);
    }

    #[test]
    fn commit_schedules_repaint_for_all_delegates() {
        let (mut scene, delegate) = scene_with_output();
        let id = scene.add_window(WindowDesc::new(SurfaceId(3), Rect::new(0.0, 0.0, 64.0, 64.0)));
        let w = scene.window(id).unwrap();
        let surface_item = w.surface_item;

        scene
            .commit_buffer(
                SurfaceId(3),
                ClientBuffer::Shm(ShmBuffer::solid(64, 64, [255, 0, 0, 255])),
                &Region::from_rect(PixelRect::new(0, 0, 64, 64)),
            )
            .unwrap();
        assert!(!scene.tree.repaints(surface_item, delegate).is_empty());
    }

    #[test]
    fn deleted_windows_survive_while_referenced() {
        let (mut scene, _) = scene_with_output();
        let id = scene.add_window(WindowDesc::new(SurfaceId(1), Rect::new(0.0, 0.0, 10.0, 10.0)));
        scene.ref_deleted_window(id);
        scene.mark_window_deleted(id);
        assert!(scene.reap_deleted().is_empty());
        assert!(scene.window(id).is_some());

        scene.unref_deleted_window(id);
        assert_eq!(scene.reap_deleted(), vec![id]);
        assert!(scene.window(id).is_none());
        assert!(scene.stacking_order().is_empty());
    }

    #[test]
    fn minimize_hides_the_item_tree() {
        let (mut scene, _) = scene_with_output();
        let id = scene.add_window(WindowDesc::new(SurfaceId(1), Rect::new(0.0, 0.0, 10.0, 10.0)));
        let item = scene.window(id).unwrap().item;
        assert!(scene.tree.effective_visible(item));
        scene.set_minimized(id, true);
        assert!(!scene.tree.effective_visible(item));
    }

    #[test]
    fn raise_moves_window_to_top() {
        let (mut scene, _) = scene_with_output();
        let a = scene.add_window(WindowDesc::new(SurfaceId(1), Rect::new(0.0, 0.0, 10.0, 10.0)));
        let b = scene.add_window(WindowDesc::new(SurfaceId(2), Rect::new(0.0, 0.0, 10.0, 10.0)));
        assert_eq!(scene.stacking_order(), vec![a, b]);
        scene.raise(a);
        assert_eq!(scene.stacking_order(), vec![b, a]);
    }

    #[test]
    fn subsurfaces_nest_under_their_parent_surface() {
        let (mut scene, _) = scene_with_output();
        scene.add_window(WindowDesc::new(SurfaceId(1), Rect::new(50.0, 50.0, 150.0, 150.0)));
        let sub = scene
            .add_subsurface(SurfaceId(1), SurfaceId(2), Point::new(10.0, 10.0), Size::new(20.0, 20.0))
            .unwrap();
        let global = scene.tree.map_to_global(sub, Rect::new(0.0, 0.0, 20.0, 20.0));
        assert_eq!(global, Rect::new(60.0, 60.0, 80.0, 80.0));
    }
}
