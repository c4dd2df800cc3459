//! Built-in effects. Each is self-contained: a serde-deserializable config,
//! the `Effect` implementation, and whatever per-window state the animation
//! needs, keyed by window identity and evicted on `window_deleted`.

pub mod blur;
pub mod colorpicker;
pub mod invert;
pub mod minimize;
pub mod wavy;

pub use blur::{BlurConfig, BlurEffect};
pub use colorpicker::ColorPickerEffect;
pub use invert::InvertEffect;
pub use minimize::{MinimizeConfig, MinimizeEffect};
pub use wavy::{WavyConfig, WavyEffect};
