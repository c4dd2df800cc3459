use kurbo::Point;

use crate::core::{Matrix4, Rgba8Premul};
use crate::quad::WindowQuadList;
use crate::region::Region;
use crate::shader::ShaderId;

bitflags::bitflags! {
    /// Coarse per-frame rendering decisions, accumulated through pre-paint.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PaintMask: u32 {
        /// The whole screen is transformed; damage tracking is off for the
        /// frame.
        const SCREEN_TRANSFORMED              = 1 << 0;
        /// At least one window is painted with a transformation.
        const SCREEN_WITH_TRANSFORMED_WINDOWS = 1 << 1;
        /// Paint the background before windows rather than relying on opaque
        /// coverage.
        const SCREEN_BACKGROUND_FIRST         = 1 << 2;
        /// The window geometry is transformed this frame.
        const WINDOW_TRANSFORMED              = 1 << 3;
        /// The window is painted with translucency.
        const WINDOW_TRANSLUCENT              = 1 << 4;
        /// The window may be painted as fully opaque.
        const WINDOW_OPAQUE                   = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Why a window would normally not be painted. An effect clears bits via
    /// `enable_painting` when an animation still needs the content.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DisableReasons: u32 {
        const MINIMIZED = 1 << 0;
        const DELETED   = 1 << 1;
        const HIDDEN    = 1 << 2;
    }
}

/// Mutable screen state handed down the pre-paint chain.
#[derive(Clone, Debug)]
pub struct ScreenPrePaintData {
    pub mask: PaintMask,
    /// Damage to paint, in delegate coordinates. Effects may widen it.
    pub paint: Region,
}

/// Per-frame, per-screen paint parameters.
#[derive(Clone, Debug)]
pub struct ScreenPaintData {
    pub mask: PaintMask,
    pub projection: Matrix4,
    /// Additional whole-screen transform applied by effects.
    pub screen_transform: Matrix4,
    pub target_width: u32,
    pub target_height: u32,
    pub device_scale: f64,
}

/// Mutable window state handed down the pre-paint chain.
#[derive(Clone, Debug)]
pub struct WindowPrePaintData {
    pub mask: PaintMask,
    /// Region of the window to paint, delegate coordinates.
    pub paint: Region,
    /// Opaque sub-region, usable for occlusion culling below this window.
    pub clip: Region,
    pub quads: WindowQuadList,
    pub disabled: DisableReasons,
}

impl WindowPrePaintData {
    /// Forces painting despite `reason`; used by effects that animate
    /// minimized or closed windows.
    pub fn enable_painting(&mut self, reason: DisableReasons) {
        self.disabled.remove(reason);
    }

    pub fn will_paint(&self) -> bool {
        self.disabled.is_empty()
    }
}

/// The mutable parameter bag each effect may adjust while painting one
/// window. Conventionally an effect tweaks fields and forwards; the terminal
/// handler composes them into the actual draw.
#[derive(Clone, Debug)]
pub struct WindowPaintData {
    pub opacity: f64,
    pub brightness: f64,
    pub saturation: f64,
    pub x_scale: f64,
    pub y_scale: f64,
    pub x_translation: f64,
    pub y_translation: f64,
    pub rotation_radians: f64,
    /// Window-local origin the rotation pivots around.
    pub rotation_origin: Point,
    pub shader: Option<ShaderId>,
    pub quads: WindowQuadList,
    /// Colour used when the surface has no valid texture.
    pub fallback: Rgba8Premul,
}

impl WindowPaintData {
    pub fn new(quads: WindowQuadList, fallback: Rgba8Premul) -> Self {
        Self {
            opacity: 1.0,
            brightness: 1.0,
            saturation: 1.0,
            x_scale: 1.0,
            y_scale: 1.0,
            x_translation: 0.0,
            y_translation: 0.0,
            rotation_radians: 0.0,
            rotation_origin: Point::ZERO,
            shader: None,
            quads,
            fallback,
        }
    }

    pub fn is_scaled(&self) -> bool {
        self.x_scale != 1.0 || self.y_scale != 1.0
    }

    pub fn is_translated(&self) -> bool {
        self.x_translation != 0.0 || self.y_translation != 0.0
    }

    pub fn is_transformed(&self) -> bool {
        self.is_scaled() || self.is_translated() || self.rotation_radians != 0.0
    }

    /// The window-local → global matrix for this paint: the window position
    /// plus translation, then rotation about `rotation_origin`, then scale
    /// about the window's top-left corner.
    pub fn transform(&self, window_position: Point) -> Matrix4 {
        let mut m = Matrix4::translation(
            window_position.x + self.x_translation,
            window_position.y + self.y_translation,
        );
        if self.rotation_radians != 0.0 {
            m *= Matrix4::translation(self.rotation_origin.x, self.rotation_origin.y)
                * Matrix4::rotation_z(self.rotation_radians)
                * Matrix4::translation(-self.rotation_origin.x, -self.rotation_origin.y);
        }
        if self.is_scaled() {
            m *= Matrix4::scaling(self.x_scale, self.y_scale);
        }
        m
    }

    /// Folds another opacity factor in, clamped to `[0, 1]`.
    pub fn multiply_opacity(&mut self, factor: f64) {
        self.opacity = (self.opacity * factor).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ItemId;
    use crate::quad::{QuadKind, WindowQuad};
    use kurbo::Rect;

    fn quads() -> WindowQuadList {
        let mut list = WindowQuadList::new();
        list.push(WindowQuad::from_rect(
            QuadKind::Contents,
            ItemId(1),
            Rect::new(0.0, 0.0, 100.0, 50.0),
            Rect::new(0.0, 0.0, 1.0, 1.0),
        ));
        list
    }

    #[test]
    fn default_paint_data_is_identity() {
        let data = WindowPaintData::new(quads(), Rgba8Premul::TRANSPARENT);
        assert!(!data.is_transformed());
        let m = data.transform(Point::new(10.0, 20.0));
        assert_eq!(m.map_point(Point::new(0.0, 0.0)), Point::new(10.0, 20.0));
    }

    #[test]
    fn scale_is_about_window_origin() {
        let mut data = WindowPaintData::new(quads(), Rgba8Premul::TRANSPARENT);
        data.x_scale = 0.5;
        data.y_scale = 0.5;
        let m = data.transform(Point::new(100.0, 100.0));
        assert_eq!(m.map_point(Point::new(0.0, 0.0)), Point::new(100.0, 100.0));
        assert_eq!(m.map_point(Point::new(100.0, 50.0)), Point::new(150.0, 125.0));
    }

    #[test]
    fn enable_painting_clears_reason() {
        let mut pre = WindowPrePaintData {
            mask: PaintMask::empty(),
            paint: Region::new(),
            clip: Region::new(),
            quads: quads(),
            disabled: DisableReasons::MINIMIZED | DisableReasons::HIDDEN,
        };
        assert!(!pre.will_paint());
        pre.enable_painting(DisableReasons::MINIMIZED);
        assert!(!pre.will_paint());
        pre.enable_painting(DisableReasons::HIDDEN);
        assert!(pre.will_paint());
    }

    #[test]
    fn opacity_multiplication_clamps() {
        let mut data = WindowPaintData::new(quads(), Rgba8Premul::TRANSPARENT);
        data.multiply_opacity(0.5);
        data.multiply_opacity(0.5);
        assert!((data.opacity - 0.25).abs() < 1e-12);
        data.multiply_opacity(100.0);
        assert_eq!(data.opacity, 1.0);
    }
}
