use std::any::Any;
use std::collections::BTreeSet;

use crate::chain::PaintWindowCursor;
use crate::core::WindowId;
use crate::effect::{Effect, Feature};
use crate::error::LucentResult;
use crate::host::{EffectHost, HostHandle};
use crate::paint::{PaintMask, WindowPaintData};
use crate::region::Region;
use crate::shader::ShaderSource;
use crate::window::EffectWindow;

const INVERT_VERTEX: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

const INVERT_FRAGMENT: &str = r#"
@group(0) @binding(0) var t_content: texture_2d<f32>;
@group(0) @binding(1) var s_content: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let px = textureSample(t_content, s_content, uv);
    // Content is premultiplied; invert within the alpha envelope.
    return vec4<f32>(vec3<f32>(px.a) - px.rgb, px.a);
}
"#;

/// Inverts the colours of every normal window (or a selected set) with a
/// custom fragment shader. On backends without custom shader support the
/// effect marks itself invalid and passes through.
pub struct InvertEffect {
    enabled: bool,
    valid: bool,
    shader_tried: bool,
    shader: Option<crate::shader::ShaderId>,
    /// Per-window toggles, independent of the global switch.
    single_windows: BTreeSet<WindowId>,
}

impl InvertEffect {
    pub fn new() -> Self {
        Self {
            enabled: false,
            valid: true,
            shader_tried: false,
            shader: None,
            single_windows: BTreeSet::new(),
        }
    }

    pub fn toggle(&mut self, host: &mut EffectHost) {
        self.enabled = !self.enabled;
        host.add_repaint_full();
    }

    pub fn toggle_window(&mut self, window: WindowId, host: &mut EffectHost) {
        if !self.single_windows.remove(&window) {
            self.single_windows.insert(window);
        }
        host.add_repaint_full();
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    fn applies_to(&self, window: &EffectWindow) -> bool {
        if self.single_windows.contains(&window.id) {
            return !self.enabled;
        }
        self.enabled && window.is_normal()
    }

    fn ensure_shader(&mut self, chain: &mut PaintWindowCursor<'_, '_>) {
        if self.shader_tried {
            return;
        }
        self.shader_tried = true;
        match chain
            .backend()
            .shader_from_source(&ShaderSource::custom(INVERT_VERTEX, INVERT_FRAGMENT))
        {
            Ok(id) => self.shader = Some(id),
            Err(err) => {
                // Latched: no retry, the paint hooks pass through from now
                // on.
                tracing::warn!(error = %err, "invert shader unavailable");
                self.valid = false;
            }
        }
    }
}

impl Default for InvertEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for InvertEffect {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn requested_chain_position(&self) -> i32 {
        99
    }

    fn is_active(&self) -> bool {
        self.valid && (self.enabled || !self.single_windows.is_empty())
    }

    fn provides(&self) -> &'static [Feature] {
        &[Feature::ScreenInversion]
    }

    fn paint_window(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        window: &EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        if self.valid && self.applies_to(window) {
            self.ensure_shader(chain);
            if let Some(shader) = self.shader {
                data.shader = Some(shader);
            }
        }
        chain.forward(window, mask, region, data)
    }

    fn window_deleted(&mut self, window: WindowId, _api: &mut HostHandle<'_>) {
        self.single_windows.remove(&window);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
