use std::collections::{BTreeMap, BTreeSet};

use kurbo::{Point, Rect, Size, Vec2};

use crate::core::{DelegateId, ItemId, Matrix4, WindowId};
use crate::quad::{QuadKind, WindowQuad, WindowQuadList};
use crate::region::{PixelRect, Region};
use crate::surface::SurfaceState;
use crate::texture::TextureHandle;

/// What a scene node represents. Kind-specific payloads ride along with the
/// shared geometry every node carries.
#[derive(Debug)]
pub enum ItemKind {
    /// Root node of a managed window; composes shadow, decoration and
    /// surface children.
    Window(WindowId),
    Surface(SurfaceState),
    /// Server-side decoration; the texture is supplied externally.
    Decoration { texture: Option<TextureHandle> },
    Shadow { texture: Option<TextureHandle> },
    Cursor { texture: Option<TextureHandle>, hotspot: Point },
    /// Effect-owned overlay content (on-screen frames, thumbnails).
    Image { texture: Option<TextureHandle> },
}

impl ItemKind {
    fn quad_kind(&self) -> QuadKind {
        match self {
            Self::Decoration { .. } => QuadKind::Decoration,
            Self::Shadow { .. } => QuadKind::Shadow,
            _ => QuadKind::Contents,
        }
    }
}

/// One node in the scene graph.
#[derive(Debug)]
pub struct Item {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    /// Sorted by (z, insertion order); kept sorted on every mutation.
    children: Vec<ItemId>,
    position: Point,
    size: Size,
    z: i32,
    opacity: f64,
    transform: Matrix4,
    explicit_visible: bool,
    pub kind: ItemKind,
    repaints: BTreeMap<DelegateId, Region>,
    quad_cache: Option<WindowQuadList>,
    /// Own rect united with mapped child bounds, item-local.
    bounding: Rect,
    seq: u64,
}

impl Item {
    pub fn position(&self) -> Point {
        self.position
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn transform(&self) -> Matrix4 {
        self.transform
    }

    pub fn explicit_visible(&self) -> bool {
        self.explicit_visible
    }

    /// Item-local rectangle covered by the item's own content.
    pub fn rect(&self) -> Rect {
        Rect::from_origin_size(Point::ZERO, self.size)
    }

    pub fn bounding_rect(&self) -> Rect {
        self.bounding
    }

    pub fn children(&self) -> &[ItemId] {
        &self.children
    }

    pub fn surface(&self) -> Option<&SurfaceState> {
        match &self.kind {
            ItemKind::Surface(s) => Some(s),
            _ => None,
        }
    }

    pub fn surface_mut(&mut self) -> Option<&mut SurfaceState> {
        match &mut self.kind {
            ItemKind::Surface(s) => Some(s),
            _ => None,
        }
    }

    /// The texture to sample when painting this item directly.
    pub fn texture(&self) -> Option<TextureHandle> {
        match &self.kind {
            ItemKind::Surface(s) => s.pixmap.texture(),
            ItemKind::Decoration { texture }
            | ItemKind::Shadow { texture }
            | ItemKind::Cursor { texture, .. }
            | ItemKind::Image { texture } => texture.clone(),
            ItemKind::Window(_) => None,
        }
    }
}

/// The scene graph arena. Multiple roots are allowed (windows, the cursor,
/// overlay items); parentage is explicit.
#[derive(Debug, Default)]
pub struct ItemTree {
    items: BTreeMap<ItemId, Item>,
    delegates: BTreeSet<DelegateId>,
    /// Damage recorded in global coordinates for structural changes (moves,
    /// resizes, restacks) whose old extents can no longer be derived from
    /// item state.
    global_damage: BTreeMap<DelegateId, Region>,
    frame_requests: BTreeSet<DelegateId>,
    next_id: u64,
    next_seq: u64,
}

impl ItemTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_delegate(&mut self, delegate: DelegateId) {
        self.delegates.insert(delegate);
    }

    pub fn unregister_delegate(&mut self, delegate: DelegateId) {
        self.delegates.remove(&delegate);
        self.global_damage.remove(&delegate);
        self.frame_requests.remove(&delegate);
        for item in self.items.values_mut() {
            item.repaints.remove(&delegate);
        }
    }

    pub fn delegates(&self) -> impl Iterator<Item = DelegateId> + '_ {
        self.delegates.iter().copied()
    }

    pub fn create_item(&mut self, kind: ItemKind, parent: Option<ItemId>) -> ItemId {
        self.next_id += 1;
        self.next_seq += 1;
        let id = ItemId(self.next_id);
        let item = Item {
            id,
            parent,
            children: Vec::new(),
            position: Point::ZERO,
            size: Size::ZERO,
            z: 0,
            opacity: 1.0,
            transform: Matrix4::IDENTITY,
            explicit_visible: true,
            kind,
            repaints: BTreeMap::new(),
            quad_cache: None,
            bounding: Rect::ZERO,
            seq: self.next_seq,
        };
        self.items.insert(id, item);
        if let Some(p) = parent {
            if let Some(parent_item) = self.items.get_mut(&p) {
                parent_item.children.push(id);
            }
            self.sort_children(p);
            self.update_bounding_from(id);
        }
        id
    }

    /// Removes an item and its whole subtree.
    pub fn remove_item(&mut self, id: ItemId) {
        let Some(item) = self.items.get(&id) else {
            return;
        };
        let children = item.children.clone();
        let parent = item.parent;
        self.damage_globally(id);
        for child in children {
            self.remove_item(child);
        }
        self.items.remove(&id);
        if let Some(p) = parent {
            if let Some(parent_item) = self.items.get_mut(&p) {
                parent_item.children.retain(|c| *c != id);
            }
            self.update_bounding_from(p);
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    fn sort_children(&mut self, parent: ItemId) {
        let Some(item) = self.items.get(&parent) else {
            return;
        };
        let mut keyed: Vec<(i32, u64, ItemId)> = item
            .children
            .iter()
            .filter_map(|c| self.items.get(c).map(|ci| (ci.z, ci.seq, *c)))
            .collect();
        keyed.sort();
        if let Some(item) = self.items.get_mut(&parent) {
            item.children = keyed.into_iter().map(|(_, _, id)| id).collect();
        }
    }

    // Geometry and attribute setters. Structural changes record global
    // damage covering both the old and the new extents.

    pub fn set_position(&mut self, id: ItemId, position: Point) {
        if self.items.get(&id).map(|i| i.position) == Some(position) {
            return;
        }
        self.damage_globally(id);
        if let Some(item) = self.items.get_mut(&id) {
            item.position = position;
        }
        self.damage_globally(id);
        if let Some(parent) = self.items.get(&id).and_then(|i| i.parent) {
            self.update_bounding_from(parent);
        }
    }

    pub fn set_size(&mut self, id: ItemId, size: Size) {
        if self.items.get(&id).map(|i| i.size) == Some(size) {
            return;
        }
        self.damage_globally(id);
        if let Some(item) = self.items.get_mut(&id) {
            item.size = size;
            item.quad_cache = None;
        }
        self.update_bounding_from(id);
        self.damage_globally(id);
    }

    pub fn set_transform(&mut self, id: ItemId, transform: Matrix4) {
        self.damage_globally(id);
        if let Some(item) = self.items.get_mut(&id) {
            item.transform = transform;
        }
        if let Some(parent) = self.items.get(&id).and_then(|i| i.parent) {
            self.update_bounding_from(parent);
        }
        self.damage_globally(id);
    }

    pub fn set_opacity(&mut self, id: ItemId, opacity: f64) {
        if let Some(item) = self.items.get_mut(&id) {
            item.opacity = opacity.clamp(0.0, 1.0);
        }
        self.damage_globally(id);
    }

    pub fn set_visible(&mut self, id: ItemId, visible: bool) {
        if self.items.get(&id).map(|i| i.explicit_visible) == Some(visible) {
            return;
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.explicit_visible = visible;
        }
        self.damage_globally(id);
    }

    pub fn set_z(&mut self, id: ItemId, z: i32) {
        if self.items.get(&id).map(|i| i.z) == Some(z) {
            return;
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.z = z;
        }
        if let Some(parent) = self.items.get(&id).and_then(|i| i.parent) {
            self.sort_children(parent);
        }
        self.damage_globally(id);
    }

    /// Restacks `id` directly below `sibling` among its parent's children.
    pub fn stack_before(&mut self, id: ItemId, sibling: ItemId) {
        let Some(z) = self.items.get(&sibling).map(|s| s.z) else {
            return;
        };
        let Some(seq) = self.items.get(&sibling).map(|s| s.seq) else {
            return;
        };
        if let Some(item) = self.items.get_mut(&id) {
            item.z = z;
            // Order just below the sibling's insertion slot.
            item.seq = seq.saturating_sub(1);
        }
        if let Some(parent) = self.items.get(&id).and_then(|i| i.parent) {
            self.sort_children(parent);
        }
        self.damage_globally(id);
    }

    /// Restacks `id` directly above `sibling` among its parent's children.
    pub fn stack_after(&mut self, id: ItemId, sibling: ItemId) {
        let Some(z) = self.items.get(&sibling).map(|s| s.z) else {
            return;
        };
        let Some(seq) = self.items.get(&sibling).map(|s| s.seq) else {
            return;
        };
        if let Some(item) = self.items.get_mut(&id) {
            item.z = z;
            item.seq = seq.saturating_add(1);
        }
        if let Some(parent) = self.items.get(&id).and_then(|i| i.parent) {
            self.sort_children(parent);
        }
        self.damage_globally(id);
    }

    // Coordinate mapping. Items nest by position only; the 4×4 transform is
    // a paint-time concern and does not shift the logical coordinate system.

    pub fn global_position(&self, id: ItemId) -> Point {
        let mut acc = Vec2::ZERO;
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let Some(item) = self.items.get(&cur) else {
                break;
            };
            acc += item.position.to_vec2();
            cursor = item.parent;
        }
        acc.to_point()
    }

    pub fn map_to_global(&self, id: ItemId, rect: Rect) -> Rect {
        let origin = self.global_position(id);
        rect + origin.to_vec2()
    }

    pub fn map_from_global(&self, id: ItemId, rect: Rect) -> Rect {
        let origin = self.global_position(id);
        rect - origin.to_vec2()
    }

    pub fn effective_visible(&self, id: ItemId) -> bool {
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let Some(item) = self.items.get(&cur) else {
                return false;
            };
            if !item.explicit_visible {
                return false;
            }
            cursor = item.parent;
        }
        true
    }

    fn update_bounding_from(&mut self, start: ItemId) {
        let mut cursor = Some(start);
        while let Some(cur) = cursor {
            let Some(item) = self.items.get(&cur) else {
                return;
            };
            let mut bounds = item.rect();
            for child in &item.children {
                if let Some(ci) = self.items.get(child) {
                    let mapped = ci.transform.map_rect(ci.bounding) + ci.position.to_vec2();
                    bounds = bounds.union(mapped);
                }
            }
            let parent = item.parent;
            let changed = self
                .items
                .get(&cur)
                .map(|i| i.bounding != bounds)
                .unwrap_or(false);
            if let Some(item) = self.items.get_mut(&cur) {
                item.bounding = bounds;
            }
            if !changed && cur != start {
                return;
            }
            cursor = parent;
        }
    }

    // Damage.

    /// Declares `region` (item-local pixels) dirty for every registered
    /// delegate.
    pub fn schedule_repaint(&mut self, id: ItemId, region: &Region) {
        let delegates: Vec<DelegateId> = self.delegates.iter().copied().collect();
        if let Some(item) = self.items.get_mut(&id) {
            for d in delegates {
                item.repaints.entry(d).or_default().union_with(region);
            }
        }
    }

    /// Requests a new frame with no content damage (animation-only).
    pub fn schedule_frame(&mut self) {
        self.frame_requests = self.delegates.clone();
    }

    pub fn take_frame_request(&mut self, delegate: DelegateId) -> bool {
        self.frame_requests.remove(&delegate)
    }

    pub fn repaints(&self, id: ItemId, delegate: DelegateId) -> Region {
        self.items
            .get(&id)
            .and_then(|i| i.repaints.get(&delegate))
            .cloned()
            .unwrap_or_default()
    }

    pub fn reset_repaints(&mut self, id: ItemId, delegate: DelegateId) {
        if let Some(item) = self.items.get_mut(&id) {
            item.repaints.remove(&delegate);
        }
    }

    /// Full-extent damage in global coordinates, recorded for every
    /// delegate. Used for structural changes.
    fn damage_globally(&mut self, id: ItemId) {
        if !self.items.contains_key(&id) {
            return;
        }
        let bounds = self.map_to_global(id, self.items[&id].bounding);
        if bounds.is_zero_area() {
            return;
        }
        let rect = PixelRect::from_logical(bounds);
        for d in self.delegates.iter().copied() {
            self.global_damage.entry(d).or_default().add(rect);
        }
    }

    /// Records damage in global coordinates for every registered delegate,
    /// independent of any item.
    pub fn add_global_damage(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        for d in self.delegates.iter().copied() {
            self.global_damage.entry(d).or_default().add(rect);
        }
    }

    pub fn take_global_damage(&mut self, delegate: DelegateId) -> Region {
        self.global_damage.remove(&delegate).unwrap_or_default()
    }

    pub fn peek_global_damage(&self, delegate: DelegateId) -> Region {
        self.global_damage.get(&delegate).cloned().unwrap_or_default()
    }

    // Shape, opacity and quads.

    /// Union of rectangles covering the item's visible pixels, item-local.
    pub fn shape(&self, id: ItemId) -> Region {
        let Some(item) = self.items.get(&id) else {
            return Region::new();
        };
        match &item.kind {
            ItemKind::Surface(s) if !s.shape.is_empty() => {
                s.shape.intersected(PixelRect::from_logical(item.rect()))
            }
            ItemKind::Window(_) => Region::new(),
            _ => Region::from_logical(item.rect()),
        }
    }

    /// The sub-region guaranteed to cover every pixel with alpha 1,
    /// item-local. Used for occlusion culling.
    pub fn opaque(&self, id: ItemId) -> Region {
        let Some(item) = self.items.get(&id) else {
            return Region::new();
        };
        match &item.kind {
            ItemKind::Surface(s) => s
                .opaque
                .intersected(PixelRect::from_logical(item.rect())),
            _ => Region::new(),
        }
    }

    /// The item tiled into textured quads, built lazily and cached. Effects
    /// subdivide copies; the cache itself is only dropped on size or shape
    /// change.
    pub fn quads(&mut self, id: ItemId) -> WindowQuadList {
        if let Some(cached) = self.items.get(&id).and_then(|i| i.quad_cache.clone()) {
            return cached;
        }
        let built = self.build_quads(id);
        if let Some(item) = self.items.get_mut(&id) {
            item.quad_cache = Some(built.clone());
        }
        built
    }

    pub fn invalidate_quads(&mut self, id: ItemId) {
        if let Some(item) = self.items.get_mut(&id) {
            item.quad_cache = None;
        }
    }

    fn build_quads(&self, id: ItemId) -> WindowQuadList {
        let Some(item) = self.items.get(&id) else {
            return WindowQuadList::new();
        };
        let size = item.size;
        let mut list = WindowQuadList::new();
        if size.width <= 0.0 || size.height <= 0.0 {
            return list;
        }
        let kind = item.kind.quad_kind();
        for rect in self.shape(id).rects() {
            let local = rect.to_logical();
            let uv = Rect::new(
                local.x0 / size.width,
                local.y0 / size.height,
                (local.x1 / size.width).min(1.0),
                (local.y1 / size.height).min(1.0),
            );
            list.push(WindowQuad::from_rect(kind, id, local, uv));
        }
        list
    }

    /// Pre-order traversal of the subtree rooted at `id`, children in
    /// stacking order.
    pub fn subtree(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(item) = self.items.get(&cur) {
                out.push(cur);
                for child in item.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_delegate() -> (ItemTree, DelegateId) {
        let mut tree = ItemTree::new();
        let d = DelegateId(1);
        tree.register_delegate(d);
        (tree, d)
    }

    fn image_item(tree: &mut ItemTree, parent: Option<ItemId>) -> ItemId {
        tree.create_item(ItemKind::Image { texture: None }, parent)
    }

    #[test]
    fn map_round_trips() {
        let (mut tree, _) = tree_with_delegate();
        let root = image_item(&mut tree, None);
        let child = image_item(&mut tree, Some(root));
        tree.set_position(root, Point::new(100.0, 50.0));
        tree.set_position(child, Point::new(7.5, 2.25));

        let r = Rect::new(1.0, 2.0, 3.0, 4.0);
        let global = tree.map_to_global(child, r);
        assert_eq!(global, Rect::new(108.5, 54.25, 110.5, 56.25));
        assert_eq!(tree.map_from_global(child, global), r);
    }

    #[test]
    fn bounding_rect_contains_children() {
        let (mut tree, _) = tree_with_delegate();
        let root = image_item(&mut tree, None);
        tree.set_size(root, Size::new(10.0, 10.0));
        let child = image_item(&mut tree, Some(root));
        tree.set_size(child, Size::new(30.0, 5.0));
        tree.set_position(child, Point::new(20.0, 0.0));

        let bounds = tree.get(root).unwrap().bounding_rect();
        assert!(bounds.contains_rect(Rect::new(20.0, 0.0, 50.0, 5.0)));
        assert!(bounds.contains_rect(Rect::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn bounding_rect_follows_child_transform() {
        let (mut tree, _) = tree_with_delegate();
        let root = image_item(&mut tree, None);
        tree.set_size(root, Size::new(10.0, 10.0));
        let child = image_item(&mut tree, Some(root));
        tree.set_size(child, Size::new(10.0, 10.0));
        tree.set_transform(child, Matrix4::scaling(3.0, 1.0));

        let bounds = tree.get(root).unwrap().bounding_rect();
        assert!(bounds.x1 >= 30.0);
    }

    #[test]
    fn repaints_reset_per_delegate() {
        let (mut tree, d1) = tree_with_delegate();
        let d2 = DelegateId(2);
        tree.register_delegate(d2);
        let item = image_item(&mut tree, None);

        tree.schedule_repaint(item, &Region::from_rect(PixelRect::new(0, 0, 5, 5)));
        assert!(!tree.repaints(item, d1).is_empty());
        assert!(!tree.repaints(item, d2).is_empty());

        tree.reset_repaints(item, d1);
        assert!(tree.repaints(item, d1).is_empty());
        assert!(!tree.repaints(item, d2).is_empty());
    }

    #[test]
    fn schedule_repaint_is_idempotent() {
        let (mut tree, d) = tree_with_delegate();
        let item = image_item(&mut tree, None);
        let r = Region::from_rect(PixelRect::new(3, 3, 8, 8));
        tree.schedule_repaint(item, &r);
        let once = tree.repaints(item, d);
        tree.schedule_repaint(item, &r);
        assert_eq!(tree.repaints(item, d), once);
    }

    #[test]
    fn children_sorted_by_z_then_insertion() {
        let (mut tree, _) = tree_with_delegate();
        let root = image_item(&mut tree, None);
        let a = image_item(&mut tree, Some(root));
        let b = image_item(&mut tree, Some(root));
        let c = image_item(&mut tree, Some(root));
        assert_eq!(tree.get(root).unwrap().children(), &[a, b, c]);

        tree.set_z(b, 10);
        assert_eq!(tree.get(root).unwrap().children(), &[a, c, b]);
        tree.set_z(a, 10);
        // Equal z keeps insertion order.
        assert_eq!(tree.get(root).unwrap().children(), &[c, a, b]);
    }

    #[test]
    fn effective_visibility_is_inherited() {
        let (mut tree, _) = tree_with_delegate();
        let root = image_item(&mut tree, None);
        let child = image_item(&mut tree, Some(root));
        assert!(tree.effective_visible(child));
        tree.set_visible(root, false);
        assert!(!tree.effective_visible(root));
        assert!(!tree.effective_visible(child));
        tree.set_visible(root, true);
        assert!(tree.effective_visible(child));
    }

    #[test]
    fn quads_follow_shape_and_cache_drops_on_resize() {
        let (mut tree, _) = tree_with_delegate();
        let item = image_item(&mut tree, None);
        tree.set_size(item, Size::new(100.0, 100.0));
        let quads = tree.quads(item);
        assert_eq!(quads.len(), 1);
        assert_eq!(quads.quads[0].bounds(), Rect::new(0.0, 0.0, 100.0, 100.0));

        tree.set_size(item, Size::new(50.0, 100.0));
        let quads = tree.quads(item);
        assert_eq!(quads.quads[0].bounds(), Rect::new(0.0, 0.0, 50.0, 100.0));
    }

    #[test]
    fn structural_changes_record_global_damage() {
        let (mut tree, d) = tree_with_delegate();
        let item = image_item(&mut tree, None);
        tree.set_size(item, Size::new(10.0, 10.0));
        tree.take_global_damage(d);

        tree.set_position(item, Point::new(50.0, 0.0));
        let damage = tree.take_global_damage(d);
        // Covers the old extent and the new one.
        assert!(damage.contains_point(5, 5));
        assert!(damage.contains_point(55, 5));
    }
}
