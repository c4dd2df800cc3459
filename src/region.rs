use kurbo::Rect;

/// An integer device/logical-pixel rectangle. `width`/`height` are always
/// non-negative after construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest pixel rect fully covering a sub-pixel rectangle.
    pub fn from_logical(r: Rect) -> Self {
        let x0 = r.x0.floor() as i32;
        let y0 = r.y0.floor() as i32;
        let x1 = r.x1.ceil() as i32;
        let y1 = r.y1.ceil() as i32;
        Self::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
    }

    pub fn to_logical(self) -> Rect {
        Rect::new(
            f64::from(self.x),
            f64::from(self.y),
            f64::from(self.x + self.width),
            f64::from(self.y + self.height),
        )
    }

    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(self) -> i32 {
        self.y + self.height
    }

    pub fn area(self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }

    pub fn translated(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grows the rect by `amount` pixels on every side.
    pub fn expanded(self, amount: i32) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            (self.width + 2 * amount).max(0),
            (self.height + 2 * amount).max(0),
        )
    }

    pub fn contains_point(self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains(self, other: Self) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(self, other: Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersection(self, other: Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if r > x && b > y {
            Some(Self::new(x, y, r - x, b - y))
        } else {
            None
        }
    }

    pub fn union(self, other: Self) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Self::new(x, y, r - x, b - y)
    }

    /// The parts of `self` not covered by `cut`, as up to four rects.
    pub fn subtract(self, cut: Self) -> Vec<Self> {
        let Some(inner) = self.intersection(cut) else {
            return if self.is_empty() { Vec::new() } else { vec![self] };
        };
        let mut out = Vec::with_capacity(4);
        if inner.y > self.y {
            out.push(Self::new(self.x, self.y, self.width, inner.y - self.y));
        }
        if inner.bottom() < self.bottom() {
            out.push(Self::new(
                self.x,
                inner.bottom(),
                self.width,
                self.bottom() - inner.bottom(),
            ));
        }
        if inner.x > self.x {
            out.push(Self::new(self.x, inner.y, inner.x - self.x, inner.height));
        }
        if inner.right() < self.right() {
            out.push(Self::new(
                inner.right(),
                inner.y,
                self.right() - inner.right(),
                inner.height,
            ));
        }
        out
    }
}

/// A dirty-region accumulator: a small set of pixel rects.
///
/// Overlapping inserts are merged into their bounding box, so the region can
/// overapproximate the exact pixel set; it never underapproximates. Once the
/// rect count exceeds [`Region::MAX_RECTS`] the whole set collapses into one
/// bounding rect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<PixelRect>,
}

impl Region {
    pub const MAX_RECTS: usize = 16;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: PixelRect) -> Self {
        let mut out = Self::new();
        out.add(rect);
        out
    }

    pub fn from_logical(rect: Rect) -> Self {
        Self::from_rect(PixelRect::from_logical(rect))
    }

    pub fn rects(&self) -> &[PixelRect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Inserts a rect. Adding a rect already covered by the region leaves it
    /// unchanged, which makes repeated identical repaint requests free.
    pub fn add(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        for existing in &mut self.rects {
            if existing.contains(rect) {
                return;
            }
            if rect.contains(*existing) {
                *existing = rect;
                self.renormalize();
                return;
            }
            if existing.intersects(rect) {
                *existing = existing.union(rect);
                self.renormalize();
                return;
            }
        }
        self.rects.push(rect);
        if self.rects.len() > Self::MAX_RECTS {
            self.collapse();
        }
    }

    /// Re-merges after an in-place growth, since the grown rect may now
    /// swallow or touch rects inserted earlier.
    fn renormalize(&mut self) {
        let mut merged = true;
        while merged {
            merged = false;
            'outer: for i in 0..self.rects.len() {
                for j in (i + 1)..self.rects.len() {
                    if self.rects[i].intersects(self.rects[j])
                        || self.rects[i].contains(self.rects[j])
                        || self.rects[j].contains(self.rects[i])
                    {
                        let u = self.rects[i].union(self.rects[j]);
                        self.rects[i] = u;
                        self.rects.swap_remove(j);
                        merged = true;
                        break 'outer;
                    }
                }
            }
        }
    }

    fn collapse(&mut self) {
        let bounds = self.bounding();
        self.rects.clear();
        if !bounds.is_empty() {
            self.rects.push(bounds);
        }
    }

    pub fn union_with(&mut self, other: &Self) {
        for &r in &other.rects {
            self.add(r);
        }
    }

    pub fn bounding(&self) -> PixelRect {
        let mut out = PixelRect::new(0, 0, 0, 0);
        for &r in &self.rects {
            out = out.union(r);
        }
        out
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            rects: self.rects.iter().map(|r| r.translated(dx, dy)).collect(),
        }
    }

    pub fn expanded(&self, amount: i32) -> Self {
        let mut out = Self::new();
        for &r in &self.rects {
            out.add(r.expanded(amount));
        }
        out
    }

    pub fn intersected(&self, clip: PixelRect) -> Self {
        let mut out = Self::new();
        for &r in &self.rects {
            if let Some(i) = r.intersection(clip) {
                out.add(i);
            }
        }
        out
    }

    pub fn subtract_rect(&mut self, cut: PixelRect) {
        if cut.is_empty() {
            return;
        }
        let mut next = Vec::with_capacity(self.rects.len());
        for &r in &self.rects {
            next.extend(r.subtract(cut));
        }
        self.rects = next;
    }

    pub fn subtract_region(&mut self, other: &Self) {
        for &r in &other.rects {
            self.subtract_rect(r);
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    /// Whether `rect` is fully covered, accounting for coverage split across
    /// several stored rects.
    pub fn contains_rect(&self, rect: PixelRect) -> bool {
        if rect.is_empty() {
            return true;
        }
        let mut pending = vec![rect];
        while let Some(piece) = pending.pop() {
            let Some(cover) = self.rects.iter().find(|r| r.intersects(piece)) else {
                return false;
            };
            pending.extend(piece.subtract(*cover));
        }
        true
    }
}

impl From<PixelRect> for Region {
    fn from(rect: PixelRect) -> Self {
        Self::from_rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_logical_rounds_outward() {
        let r = PixelRect::from_logical(Rect::new(0.2, 0.7, 3.1, 4.0));
        assert_eq!(r, PixelRect::new(0, 0, 4, 4));
    }

    #[test]
    fn subtract_center_leaves_four_pieces() {
        let outer = PixelRect::new(0, 0, 10, 10);
        let pieces = outer.subtract(PixelRect::new(3, 3, 4, 4));
        assert_eq!(pieces.len(), 4);
        let area: i64 = pieces.iter().map(|p| p.area()).sum();
        assert_eq!(area, 100 - 16);
    }

    #[test]
    fn adding_same_rect_twice_is_idempotent() {
        let mut a = Region::new();
        a.add(PixelRect::new(5, 5, 20, 20));
        let mut b = a.clone();
        b.add(PixelRect::new(5, 5, 20, 20));
        assert_eq!(a, b);
    }

    #[test]
    fn disjoint_rects_are_kept_separate() {
        let mut region = Region::new();
        region.add(PixelRect::new(0, 0, 10, 10));
        region.add(PixelRect::new(100, 100, 10, 10));
        assert_eq!(region.rects().len(), 2);
        assert!(region.contains_point(5, 5));
        assert!(region.contains_point(105, 105));
        assert!(!region.contains_point(50, 50));
    }

    #[test]
    fn overlapping_rects_merge() {
        let mut region = Region::new();
        region.add(PixelRect::new(0, 0, 10, 10));
        region.add(PixelRect::new(5, 5, 10, 10));
        assert_eq!(region.rects().len(), 1);
        assert!(region.contains_rect(PixelRect::new(0, 0, 15, 15)));
    }

    #[test]
    fn contains_rect_across_adjacent_pieces() {
        let mut region = Region::new();
        region.add(PixelRect::new(0, 0, 10, 20));
        region.add(PixelRect::new(10, 0, 10, 20));
        assert!(region.contains_rect(PixelRect::new(5, 5, 10, 10)));
        assert!(!region.contains_rect(PixelRect::new(15, 5, 10, 10)));
    }

    #[test]
    fn collapses_past_rect_cap() {
        let mut region = Region::new();
        for i in 0..(Region::MAX_RECTS as i32 + 4) {
            region.add(PixelRect::new(i * 20, 0, 10, 10));
        }
        assert_eq!(region.rects().len(), 1);
    }

    #[test]
    fn subtract_region_removes_coverage() {
        let mut region = Region::from_rect(PixelRect::new(0, 0, 100, 100));
        region.subtract_rect(PixelRect::new(0, 0, 100, 50));
        assert!(!region.contains_point(10, 10));
        assert!(region.contains_point(10, 60));
    }
}
