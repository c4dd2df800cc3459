use std::collections::BTreeMap;

use kurbo::{Point, Rect};

use crate::backend::CompositingType;
use crate::core::{Atom, WindowId};
use crate::region::Region;
use crate::scene::Scene;
use crate::window::EffectWindow;

/// Modal informational overlay content, shown above every window until
/// hidden.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnScreenMessage {
    pub text: String,
    pub icon: Option<String>,
}

/// Visual style of an effect frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FrameStyle {
    #[default]
    Styled,
    Unstyled,
}

/// A text/icon frame an effect can place in the scene. Rendering the frame's
/// texture is the embedder's job, like decoration textures.
#[derive(Clone, Debug, Default)]
pub struct EffectFrame {
    pub style: FrameStyle,
    pub text: String,
    pub icon: Option<String>,
    pub geometry: Rect,
}

impl EffectFrame {
    pub fn new(style: FrameStyle) -> Self {
        Self { style, ..Self::default() }
    }
}

/// Callback invoked with the picked position, or `(-1, -1)` on cancel.
pub type PositionCallback = Box<dyn FnOnce(Point)>;

/// The single service object effects talk to. Owned by the compositor and
/// passed into every hook; effects never reach into globals.
///
/// Mutations that would touch the scene (repaints, deleted-window
/// references) are queued here and applied by the compositor between
/// dispatches, which keeps hook signatures free of scene borrows.
pub struct EffectHost {
    repaint_full: bool,
    repaint_region: Region,
    frame_requested: bool,
    message: Option<OnScreenMessage>,
    message_dirty: bool,
    selection: Option<PositionCallback>,
    properties: BTreeMap<Atom, u32>,
    window_refs: Vec<(WindowId, i32)>,
    compositing: CompositingType,
    fullscreen_effect: Option<String>,
}

impl EffectHost {
    pub fn new(compositing: CompositingType) -> Self {
        Self {
            repaint_full: false,
            repaint_region: Region::new(),
            frame_requested: false,
            message: None,
            message_dirty: false,
            selection: None,
            properties: BTreeMap::new(),
            window_refs: Vec::new(),
            compositing,
            fullscreen_effect: None,
        }
    }

    // Repaints. Requests are idempotent; the scheduler drains them at the
    // start of the next tick.

    pub fn add_repaint_full(&mut self) {
        self.repaint_full = true;
    }

    pub fn add_repaint(&mut self, region: &Region) {
        self.repaint_region.union_with(region);
    }

    /// Requests a frame without content damage.
    pub fn schedule_frame(&mut self) {
        self.frame_requested = true;
    }

    pub fn has_pending_repaints(&self) -> bool {
        self.repaint_full || !self.repaint_region.is_empty() || self.frame_requested
    }

    pub(crate) fn take_repaints(&mut self) -> (bool, Region, bool) {
        let full = std::mem::take(&mut self.repaint_full);
        let region = std::mem::take(&mut self.repaint_region);
        let frame = std::mem::take(&mut self.frame_requested);
        (full, region, frame)
    }

    // On-screen messaging.

    pub fn show_on_screen_message(&mut self, text: impl Into<String>, icon: Option<String>) {
        self.message = Some(OnScreenMessage { text: text.into(), icon });
        self.message_dirty = true;
        self.repaint_full = true;
    }

    pub fn hide_on_screen_message(&mut self) {
        if self.message.take().is_some() {
            self.message_dirty = true;
            self.repaint_full = true;
        }
    }

    pub fn on_screen_message(&self) -> Option<&OnScreenMessage> {
        self.message.as_ref()
    }

    pub(crate) fn take_message_dirty(&mut self) -> bool {
        std::mem::take(&mut self.message_dirty)
    }

    // Interactive position selection. The compositor routes the next
    // pointer click here while a selection is pending.

    /// Starts a selection; returns `false` if another one is already
    /// pending.
    pub fn start_interactive_position_selection(&mut self, callback: PositionCallback) -> bool {
        if self.selection.is_some() {
            return false;
        }
        self.selection = Some(callback);
        true
    }

    pub fn selection_pending(&self) -> bool {
        self.selection.is_some()
    }

    pub fn deliver_position(&mut self, position: Point) {
        if let Some(cb) = self.selection.take() {
            cb(position);
        }
    }

    pub fn cancel_position_selection(&mut self) {
        if let Some(cb) = self.selection.take() {
            cb(Point::new(-1.0, -1.0));
        }
    }

    // Property announcements.

    pub fn register_property_type(&mut self, atom: Atom, enable: bool) {
        if enable {
            *self.properties.entry(atom).or_insert(0) += 1;
        } else if let Some(count) = self.properties.get_mut(&atom) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.properties.remove(&atom);
            }
        }
    }

    pub fn property_registered(&self, atom: &Atom) -> bool {
        self.properties.contains_key(atom)
    }

    // Deleted-window references, applied by the compositor after dispatch.

    pub fn ref_deleted_window(&mut self, window: WindowId) {
        self.window_refs.push((window, 1));
    }

    pub fn unref_deleted_window(&mut self, window: WindowId) {
        self.window_refs.push((window, -1));
    }

    pub(crate) fn drain_window_refs(&mut self) -> Vec<(WindowId, i32)> {
        std::mem::take(&mut self.window_refs)
    }

    // Capability queries.

    pub fn compositing_type(&self) -> CompositingType {
        self.compositing
    }

    pub fn animations_supported(&self) -> bool {
        // The painter fallback can animate too; only a missing backend
        // would say no, and then there is no host either.
        true
    }

    pub fn set_active_fullscreen_effect(&mut self, effect: Option<String>) {
        self.fullscreen_effect = effect;
    }

    pub fn has_active_fullscreen_effect(&self) -> bool {
        self.fullscreen_effect.is_some()
    }

    pub fn effect_frame(&self, style: FrameStyle) -> EffectFrame {
        EffectFrame::new(style)
    }
}

/// Scene queries plus host services, handed to lifecycle hooks (which run
/// between frames, when the scene is not being painted).
pub struct HostHandle<'a> {
    pub scene: &'a Scene,
    pub host: &'a mut EffectHost,
}

impl HostHandle<'_> {
    pub fn stacking_order(&self) -> Vec<WindowId> {
        self.scene.stacking_order()
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.scene.active_window()
    }

    pub fn find_window(&self, id: WindowId) -> Option<EffectWindow> {
        self.scene.effect_window(id)
    }

    /// Reads a window-attached property, provided its type has been
    /// registered by some effect.
    pub fn read_property(&self, window: WindowId, atom: &Atom) -> Option<Vec<u8>> {
        if !self.host.property_registered(atom) {
            return None;
        }
        self.scene
            .window(window)
            .and_then(|w| w.properties.get(atom))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn repaint_requests_drain_once() {
        let mut host = EffectHost::new(CompositingType::Software);
        host.add_repaint_full();
        host.add_repaint(&Region::from_rect(crate::region::PixelRect::new(0, 0, 4, 4)));
        assert!(host.has_pending_repaints());
        let (full, region, _) = host.take_repaints();
        assert!(full);
        assert!(!region.is_empty());
        assert!(!host.has_pending_repaints());
    }

    #[test]
    fn selection_delivers_position_once() {
        let mut host = EffectHost::new(CompositingType::Software);
        let got = Rc::new(RefCell::new(None));
        let sink = got.clone();
        assert!(host.start_interactive_position_selection(Box::new(move |p| {
            *sink.borrow_mut() = Some(p);
        })));
        // A second selection is refused while one is pending.
        assert!(!host.start_interactive_position_selection(Box::new(|_| {})));

        host.deliver_position(Point::new(500.0, 500.0));
        assert_eq!(*got.borrow(), Some(Point::new(500.0, 500.0)));
        assert!(!host.selection_pending());
    }

    #[test]
    fn cancelled_selection_reports_minus_one() {
        let mut host = EffectHost::new(CompositingType::Software);
        let got = Rc::new(RefCell::new(None));
        let sink = got.clone();
        host.start_interactive_position_selection(Box::new(move |p| {
            *sink.borrow_mut() = Some(p);
        }));
        host.cancel_position_selection();
        assert_eq!(*got.borrow(), Some(Point::new(-1.0, -1.0)));
    }

    #[test]
    fn property_registration_is_refcounted() {
        let mut host = EffectHost::new(CompositingType::Software);
        let atom = Atom::new("_NET_WM_HIGHLIGHT");
        host.register_property_type(atom.clone(), true);
        host.register_property_type(atom.clone(), true);
        host.register_property_type(atom.clone(), false);
        assert!(host.property_registered(&atom));
        host.register_property_type(atom.clone(), false);
        assert!(!host.property_registered(&atom));
    }

    #[test]
    fn message_show_hide_marks_dirty() {
        let mut host = EffectHost::new(CompositingType::Software);
        host.show_on_screen_message("Select a colour", Some("color-picker".into()));
        assert!(host.take_message_dirty());
        assert!(!host.take_message_dirty());
        assert!(host.on_screen_message().is_some());
        host.hide_on_screen_message();
        assert!(host.take_message_dirty());
        assert!(host.on_screen_message().is_none());
    }
}
