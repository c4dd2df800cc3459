use std::collections::BTreeMap;

use kurbo::Rect;

use crate::core::{Atom, ItemId, SurfaceId, WindowId};
use crate::surface::ContentType;

/// Coarse window role, as reported by the window manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowKind {
    #[default]
    Normal,
    Desktop,
    Dock,
    OnScreenDisplay,
}

/// A managed window: a surface item composed with an externally-textured
/// decoration item and a shadow item.
#[derive(Debug)]
pub struct Window {
    pub id: WindowId,
    pub surface: SurfaceId,
    /// Root item; shadow, decoration and surface are its children.
    pub item: ItemId,
    pub surface_item: ItemId,
    pub decoration_item: Option<ItemId>,
    pub shadow_item: Option<ItemId>,
    /// Frame geometry in global logical coordinates.
    pub geometry: Rect,
    /// Where the window's taskbar icon lives, if announced. Minimize
    /// animations head here.
    pub icon_geometry: Option<Rect>,
    pub minimized: bool,
    /// The client is gone; the window survives while effects still animate
    /// it.
    pub deleted: bool,
    pub active: bool,
    pub kind: WindowKind,
    pub properties: BTreeMap<Atom, Vec<u8>>,
    /// Outstanding effect references keeping a deleted window alive.
    pub deleted_refs: u32,
}

/// Parameters for introducing a window into the scene.
#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub surface: SurfaceId,
    pub geometry: Rect,
    pub kind: WindowKind,
    pub decorated: bool,
    pub with_shadow: bool,
}

impl WindowDesc {
    pub fn new(surface: SurfaceId, geometry: Rect) -> Self {
        Self {
            surface,
            geometry,
            kind: WindowKind::Normal,
            decorated: false,
            with_shadow: false,
        }
    }
}

/// Immutable per-frame view of a window handed to effect hooks. Plain data;
/// holding one across frames is safe but sees no later changes.
#[derive(Clone, Debug)]
pub struct EffectWindow {
    pub id: WindowId,
    pub surface: SurfaceId,
    pub item: ItemId,
    pub geometry: Rect,
    pub icon_geometry: Option<Rect>,
    pub minimized: bool,
    pub deleted: bool,
    pub active: bool,
    pub kind: WindowKind,
    pub content_type: ContentType,
    pub has_valid_texture: bool,
}

impl EffectWindow {
    /// Whether whole-screen recolouring effects should touch this window.
    pub fn is_normal(&self) -> bool {
        matches!(self.kind, WindowKind::Normal) && !self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_windows_qualify_for_recolouring() {
        let w = EffectWindow {
            id: WindowId(1),
            surface: SurfaceId(1),
            item: ItemId(1),
            geometry: Rect::new(0.0, 0.0, 10.0, 10.0),
            icon_geometry: None,
            minimized: false,
            deleted: false,
            active: false,
            kind: WindowKind::Normal,
            content_type: ContentType::Normal,
            has_valid_texture: true,
        };
        assert!(w.is_normal());
        let dock = EffectWindow { kind: WindowKind::Dock, ..w.clone() };
        assert!(!dock.is_normal());
        let deleted = EffectWindow { deleted: true, ..w };
        assert!(!deleted.is_normal());
    }
}
