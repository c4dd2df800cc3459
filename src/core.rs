use kurbo::{Point, Rect};

/// Stable identity of a managed window. Survives for as long as any effect
/// still animates the window, even after the client is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct WindowId(pub u64);

/// Identity of a scene node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u64);

/// Identity of a client surface (the buffer-bearing object).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(pub u64);

/// Identity of a physical output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputId(pub u64);

/// A rendering consumer: one per output, plus one per offscreen target in
/// active use. Repaint regions are tracked per delegate and never shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DelegateId(pub u64);

/// A window-attached property name, as announced between effects and
/// external clients.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom(pub String);

impl Atom {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Premultiplied RGBA, 8 bits per channel. The only pixel representation the
/// software path composites in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8Premul {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8Premul {
    pub const TRANSPARENT: Self = Self { r: 0, g: 0, b: 0, a: 0 };
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0, a: 255 };
    /// Painted in place of surfaces whose buffer could not be imported, in
    /// debug builds. Release builds paint transparent instead.
    pub const DEBUG_FALLBACK: Self = Self { r: 255, g: 0, b: 255, a: 255 };

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(px: [u8; 4]) -> Self {
        Self { r: px[0], g: px[1], b: px[2], a: px[3] }
    }
}

/// The fallback colour for unimportable buffers.
pub fn fallback_color(debug: bool) -> Rgba8Premul {
    if debug {
        Rgba8Premul::DEBUG_FALLBACK
    } else {
        Rgba8Premul::TRANSPARENT
    }
}

/// Row-major 4×4 transform over f64, used for item transforms, window paint
/// transforms and projection matrices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix4 {
    pub m: [[f64; 4]; 4],
}

impl Matrix4 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn translation(dx: f64, dy: f64) -> Self {
        let mut out = Self::IDENTITY;
        out.m[0][3] = dx;
        out.m[1][3] = dy;
        out
    }

    pub fn scaling(sx: f64, sy: f64) -> Self {
        let mut out = Self::IDENTITY;
        out.m[0][0] = sx;
        out.m[1][1] = sy;
        out
    }

    pub fn rotation_z(radians: f64) -> Self {
        let (s, c) = radians.sin_cos();
        let mut out = Self::IDENTITY;
        out.m[0][0] = c;
        out.m[0][1] = -s;
        out.m[1][0] = s;
        out.m[1][1] = c;
        out
    }

    /// Orthographic projection from a logical rectangle onto a pixel target
    /// of `target_w` × `target_h` device pixels.
    pub fn ortho(logical: Rect, target_w: f64, target_h: f64) -> Self {
        let sx = target_w / logical.width().max(f64::EPSILON);
        let sy = target_h / logical.height().max(f64::EPSILON);
        Self::scaling(sx, sy) * Self::translation(-logical.x0, -logical.y0)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn map_point(&self, p: Point) -> Point {
        let x = self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][3];
        let y = self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][3];
        let w = self.m[3][0] * p.x + self.m[3][1] * p.y + self.m[3][3];
        if (w - 1.0).abs() > 1e-12 && w.abs() > 1e-12 {
            Point::new(x / w, y / w)
        } else {
            Point::new(x, y)
        }
    }

    /// Maps a rectangle and returns the axis-aligned bounds of the result.
    pub fn map_rect(&self, r: Rect) -> Rect {
        let corners = [
            self.map_point(Point::new(r.x0, r.y0)),
            self.map_point(Point::new(r.x1, r.y0)),
            self.map_point(Point::new(r.x1, r.y1)),
            self.map_point(Point::new(r.x0, r.y1)),
        ];
        let mut x0 = f64::INFINITY;
        let mut y0 = f64::INFINITY;
        let mut x1 = f64::NEG_INFINITY;
        let mut y1 = f64::NEG_INFINITY;
        for c in corners {
            x0 = x0.min(c.x);
            y0 = y0.min(c.y);
            x1 = x1.max(c.x);
            y1 = y1.max(c.y);
        }
        Rect::new(x0, y0, x1, y1)
    }
}

impl std::ops::Mul for Matrix4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = [[0.0f64; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[r][k] * rhs.m[k][c]).sum();
            }
        }
        Self { m: out }
    }
}

impl std::ops::MulAssign for Matrix4 {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_maps_points() {
        let m = Matrix4::translation(10.0, -3.0);
        assert_eq!(m.map_point(Point::new(1.0, 2.0)), Point::new(11.0, -1.0));
    }

    #[test]
    fn scale_then_translate_composes_left_to_right() {
        let m = Matrix4::translation(100.0, 0.0) * Matrix4::scaling(2.0, 2.0);
        assert_eq!(m.map_point(Point::new(3.0, 4.0)), Point::new(106.0, 8.0));
    }

    #[test]
    fn ortho_maps_logical_corners_to_target_corners() {
        let m = Matrix4::ortho(Rect::new(0.0, 0.0, 800.0, 600.0), 1600.0, 1200.0);
        assert_eq!(m.map_point(Point::new(0.0, 0.0)), Point::new(0.0, 0.0));
        assert_eq!(
            m.map_point(Point::new(800.0, 600.0)),
            Point::new(1600.0, 1200.0)
        );
    }

    #[test]
    fn map_rect_of_rotation_grows_bounds() {
        let m = Matrix4::rotation_z(std::f64::consts::FRAC_PI_4);
        let r = m.map_rect(Rect::new(-1.0, -1.0, 1.0, 1.0));
        assert!(r.width() > 2.0);
        assert!(r.height() > 2.0);
    }
}
