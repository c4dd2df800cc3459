use kurbo::{Point, Rect};

use crate::core::ItemId;

/// Which part of a window a quad samples from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuadKind {
    Contents,
    Decoration,
    Shadow,
}

/// One corner of a textured quad. `original` is the undeformed position laid
/// out from the item shape; `position` is what effects move around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadVertex {
    pub original: Point,
    pub position: Point,
    pub u: f64,
    pub v: f64,
}

impl QuadVertex {
    pub fn new(p: Point, u: f64, v: f64) -> Self {
        Self { original: p, position: p, u, v }
    }
}

/// A textured quadrilateral, the atom of renderable geometry. Vertices are
/// ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowQuad {
    pub kind: QuadKind,
    pub item: ItemId,
    pub verts: [QuadVertex; 4],
}

impl WindowQuad {
    /// Builds an axis-aligned quad covering `rect` (window-local), textured
    /// from the normalized sub-rectangle `uv`.
    pub fn from_rect(kind: QuadKind, item: ItemId, rect: Rect, uv: Rect) -> Self {
        Self {
            kind,
            item,
            verts: [
                QuadVertex::new(Point::new(rect.x0, rect.y0), uv.x0, uv.y0),
                QuadVertex::new(Point::new(rect.x1, rect.y0), uv.x1, uv.y0),
                QuadVertex::new(Point::new(rect.x1, rect.y1), uv.x1, uv.y1),
                QuadVertex::new(Point::new(rect.x0, rect.y1), uv.x0, uv.y1),
            ],
        }
    }

    pub fn bounds(&self) -> Rect {
        let mut x0 = f64::INFINITY;
        let mut y0 = f64::INFINITY;
        let mut x1 = f64::NEG_INFINITY;
        let mut y1 = f64::NEG_INFINITY;
        for v in &self.verts {
            x0 = x0.min(v.position.x);
            y0 = y0.min(v.position.y);
            x1 = x1.max(v.position.x);
            y1 = y1.max(v.position.y);
        }
        Rect::new(x0, y0, x1, y1)
    }

    pub fn original_bounds(&self) -> Rect {
        let o = self.verts[0].original;
        let c = self.verts[2].original;
        Rect::new(o.x, o.y, c.x, c.y)
    }

    /// Signed-area magnitude of the current (possibly deformed) quad.
    pub fn area(&self) -> f64 {
        let p: Vec<Point> = self.verts.iter().map(|v| v.position).collect();
        let mut twice = 0.0;
        for i in 0..4 {
            let j = (i + 1) % 4;
            twice += p[i].x * p[j].y - p[j].x * p[i].y;
        }
        (twice / 2.0).abs()
    }

    pub fn is_transformed(&self) -> bool {
        self.verts.iter().any(|v| v.position != v.original)
    }
}

/// A finite, restartable, randomly indexable quad sequence. Effects subdivide
/// and deform copies of it; the per-item cache underneath is never disturbed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowQuadList {
    pub quads: Vec<WindowQuad>,
}

impl WindowQuadList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, quad: WindowQuad) {
        self.quads.push(quad);
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WindowQuad> {
        self.quads.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, WindowQuad> {
        self.quads.iter_mut()
    }

    pub fn bounds(&self) -> Rect {
        let mut out: Option<Rect> = None;
        for q in &self.quads {
            let b = q.bounds();
            out = Some(match out {
                Some(acc) => acc.union(b),
                None => b,
            });
        }
        out.unwrap_or(Rect::ZERO)
    }

    pub fn total_area(&self) -> f64 {
        self.quads.iter().map(WindowQuad::area).sum()
    }

    /// Returns a new list with every quad subdivided into an `n`×`n` grid of
    /// cells (over the quad's original rectangle), texture coordinates
    /// interpolated to match. Covered area is preserved exactly up to
    /// floating-point tolerance.
    pub fn make_grid(&self, n: u32) -> Self {
        let n = n.max(1);
        let mut out = Vec::with_capacity(self.quads.len() * (n * n) as usize);
        for q in &self.quads {
            let rect = q.original_bounds();
            let u0 = q.verts[0].u;
            let v0 = q.verts[0].v;
            let u1 = q.verts[2].u;
            let v1 = q.verts[2].v;
            for gy in 0..n {
                for gx in 0..n {
                    let fx0 = f64::from(gx) / f64::from(n);
                    let fx1 = f64::from(gx + 1) / f64::from(n);
                    let fy0 = f64::from(gy) / f64::from(n);
                    let fy1 = f64::from(gy + 1) / f64::from(n);
                    let cell = Rect::new(
                        rect.x0 + rect.width() * fx0,
                        rect.y0 + rect.height() * fy0,
                        rect.x0 + rect.width() * fx1,
                        rect.y0 + rect.height() * fy1,
                    );
                    let uv = Rect::new(
                        u0 + (u1 - u0) * fx0,
                        v0 + (v1 - v0) * fy0,
                        u0 + (u1 - u0) * fx1,
                        v0 + (v1 - v0) * fy1,
                    );
                    out.push(WindowQuad::from_rect(q.kind, q.item, cell, uv));
                }
            }
        }
        Self { quads: out }
    }

    pub fn filter_kind(&self, kind: QuadKind) -> Self {
        Self {
            quads: self.quads.iter().filter(|q| q.kind == kind).copied().collect(),
        }
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        let mut out = self.clone();
        for q in &mut out.quads {
            for v in &mut q.verts {
                v.original += kurbo::Vec2::new(dx, dy);
                v.position += kurbo::Vec2::new(dx, dy);
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a WindowQuadList {
    type Item = &'a WindowQuad;
    type IntoIter = std::slice::Iter<'a, WindowQuad>;

    fn into_iter(self) -> Self::IntoIter {
        self.quads.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_list(rect: Rect) -> WindowQuadList {
        let mut list = WindowQuadList::new();
        list.push(WindowQuad::from_rect(
            QuadKind::Contents,
            ItemId(1),
            rect,
            Rect::new(0.0, 0.0, 1.0, 1.0),
        ));
        list
    }

    #[test]
    fn quad_area_of_rect() {
        let list = unit_list(Rect::new(0.0, 0.0, 400.0, 300.0));
        assert!((list.total_area() - 120_000.0).abs() < 1e-9);
    }

    #[test]
    fn make_grid_preserves_area_and_count() {
        let list = unit_list(Rect::new(10.0, 20.0, 810.0, 620.0));
        let grid = list.make_grid(30);
        assert_eq!(grid.len(), 900);
        assert!((grid.total_area() - list.total_area()).abs() < 1e-6);
        assert_eq!(grid.bounds(), list.bounds());
    }

    #[test]
    fn make_grid_covers_without_gaps() {
        let list = unit_list(Rect::new(0.0, 0.0, 100.0, 100.0));
        let grid = list.make_grid(7);
        // Neighbouring cells share edges exactly.
        let eps = 1e-9;
        for q in grid.iter() {
            let b = q.bounds();
            assert!(b.x0 >= -eps && b.x1 <= 100.0 + eps);
            assert!(b.y0 >= -eps && b.y1 <= 100.0 + eps);
        }
        assert!((grid.total_area() - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn make_grid_interpolates_texture_coords() {
        let list = unit_list(Rect::new(0.0, 0.0, 100.0, 100.0));
        let grid = list.make_grid(2);
        let last = grid.quads.last().unwrap();
        assert!((last.verts[2].u - 1.0).abs() < 1e-12);
        assert!((last.verts[2].v - 1.0).abs() < 1e-12);
        assert!((last.verts[0].u - 0.5).abs() < 1e-12);
    }

    #[test]
    fn untransformed_until_moved() {
        let list = unit_list(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(!list.quads[0].is_transformed());
        let mut moved = list.clone();
        moved.quads[0].verts[0].position.x += 1.0;
        assert!(moved.quads[0].is_transformed());
    }
}
