use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use kurbo::Point;

use crate::chain::{PaintScreenCursor, ScreenPrePaintCursor};
use crate::core::Rgba8Premul;
use crate::effect::Effect;
use crate::error::LucentResult;
use crate::host::EffectHost;
use crate::paint::{ScreenPaintData, ScreenPrePaintData};

#[derive(Default)]
struct PickShared {
    /// Position delivered by the interactive selection, `(-1, -1)` on
    /// cancel.
    selected: Option<Point>,
}

/// Reads the colour of a single screen pixel: the user clicks a position,
/// the next frame paints, and the pixel is read back from the render target
/// before present.
pub struct ColorPickerEffect {
    shared: Rc<RefCell<PickShared>>,
    /// Position whose pixel the next painted frame reads.
    pending_read: Option<Point>,
    picked: Option<Rgba8Premul>,
    in_progress: bool,
}

impl ColorPickerEffect {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(PickShared::default())),
            pending_read: None,
            picked: None,
            in_progress: false,
        }
    }

    /// Begins a pick. Returns `false` if another selection is already
    /// running.
    pub fn pick(&mut self, host: &mut EffectHost) -> bool {
        if self.in_progress {
            return false;
        }
        let shared = self.shared.clone();
        if !host.start_interactive_position_selection(Box::new(move |position| {
            shared.borrow_mut().selected = Some(position);
        })) {
            return false;
        }
        self.in_progress = true;
        self.picked = None;
        host.show_on_screen_message(
            "Select a position for which the colour should be picked",
            Some("color-picker".into()),
        );
        true
    }

    /// The most recent pick result, consumed on read.
    pub fn take_picked(&mut self) -> Option<Rgba8Premul> {
        self.picked.take()
    }

    pub fn is_picking(&self) -> bool {
        self.in_progress
    }
}

impl Default for ColorPickerEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for ColorPickerEffect {
    fn name(&self) -> &'static str {
        "colorpicker"
    }

    fn requested_chain_position(&self) -> i32 {
        90
    }

    fn is_active(&self) -> bool {
        self.in_progress || self.pending_read.is_some()
    }

    fn pre_paint_screen(
        &mut self,
        chain: &mut ScreenPrePaintCursor<'_, '_>,
        data: &mut ScreenPrePaintData,
    ) {
        let selected = self.shared.borrow_mut().selected.take();
        if let Some(position) = selected {
            self.in_progress = false;
            chain.host().hide_on_screen_message();
            if position.x >= 0.0 && position.y >= 0.0 {
                self.pending_read = Some(position);
                chain.host().add_repaint_full();
            }
        }
        chain.forward(data);
    }

    fn paint_screen(
        &mut self,
        chain: &mut PaintScreenCursor<'_, '_>,
        data: &mut ScreenPaintData,
    ) -> LucentResult<()> {
        chain.forward(data)?;
        if let Some(position) = self.pending_read.take() {
            let output = chain.output().clone();
            let scale = output.scale;
            let x = ((position.x - output.geometry.x0) * scale).round() as i64;
            // Readback coordinates are bottom-up, like the backing store.
            let y = ((output.geometry.height() - (position.y - output.geometry.y0) - 1.0) * scale)
                .round() as i64;
            if x >= 0 && y >= 0 {
                match chain.read_pixel(x as u32, y as u32) {
                    Ok(color) => self.picked = Some(color),
                    Err(err) => {
                        tracing::warn!(error = %err, "colour pick readback failed");
                    }
                }
            }
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompositingType;

    #[test]
    fn pick_shows_message_and_registers_selection() {
        let mut host = EffectHost::new(CompositingType::Software);
        let mut effect = ColorPickerEffect::new();
        assert!(effect.pick(&mut host));
        assert!(host.selection_pending());
        assert!(host.on_screen_message().is_some());
        // A second pick is refused while the first runs.
        assert!(!effect.pick(&mut host));
    }

    #[test]
    fn cancelled_selection_leaves_no_pending_read() {
        let mut host = EffectHost::new(CompositingType::Software);
        let mut effect = ColorPickerEffect::new();
        effect.pick(&mut host);
        host.cancel_position_selection();
        assert_eq!(effect.shared.borrow().selected, Some(Point::new(-1.0, -1.0)));
    }
}
