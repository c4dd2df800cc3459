use std::time::Duration;

use kurbo::Rect;

use crate::core::{DelegateId, OutputId};

/// A physical output the scene renders to. Geometry is in global logical
/// coordinates; `scale` converts to device pixels.
#[derive(Clone, Debug)]
pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub geometry: Rect,
    pub scale: f64,
    pub refresh: Duration,
    /// Cleared when the output disappears; a frame in flight for a dead
    /// output finishes its paint but never presents.
    pub enabled: bool,
    /// The scene delegate rendering for this output.
    pub delegate: DelegateId,
}

impl Output {
    pub fn new(id: OutputId, name: impl Into<String>, geometry: Rect, scale: f64, refresh: Duration, delegate: DelegateId) -> Self {
        Self {
            id,
            name: name.into(),
            geometry,
            scale,
            refresh,
            enabled: true,
            delegate,
        }
    }

    pub fn device_width(&self) -> u32 {
        (self.geometry.width() * self.scale).round() as u32
    }

    pub fn device_height(&self) -> u32 {
        (self.geometry.height() * self.scale).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_size_applies_scale() {
        let out = Output::new(
            OutputId(1),
            "HDMI-A-1",
            Rect::new(0.0, 0.0, 1280.0, 720.0),
            2.0,
            Duration::from_nanos(16_666_667),
            DelegateId(1),
        );
        assert_eq!(out.device_width(), 2560);
        assert_eq!(out.device_height(), 1440);
    }
}
