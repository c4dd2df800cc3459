use std::collections::BTreeMap;
use std::time::Duration;

use kurbo::{Point, Rect};

use crate::backend::{create_backend, BackendKind, CompositingType, RenderBackend};
use crate::buffer::ClientBuffer;
use crate::chain::EffectChain;
use crate::core::{Atom, OutputId, SurfaceId, WindowId};
use crate::effect::Effect;
use crate::error::LucentResult;
use crate::host::EffectHost;
use crate::options::Options;
use crate::output::Output;
use crate::region::Region;
use crate::scene::Scene;
use crate::scheduler::{FrameResult, FrameScheduler};
use crate::shader::ShaderManager;
use crate::window::WindowDesc;

/// Ties the scene, the effect chain, the backend and the per-output frame
/// schedulers together behind the event-shaped interface the surrounding
/// window manager drives.
pub struct Compositor {
    pub scene: Scene,
    pub chain: EffectChain,
    pub host: EffectHost,
    backend: Box<dyn RenderBackend>,
    shaders: ShaderManager,
    schedulers: BTreeMap<OutputId, FrameScheduler>,
}

impl Compositor {
    pub fn new(kind: BackendKind) -> LucentResult<Self> {
        Self::with_options(kind, Options::default())
    }

    pub fn with_options(kind: BackendKind, options: Options) -> LucentResult<Self> {
        Ok(Self::with_backend(create_backend(kind)?, options))
    }

    /// Wraps an already-constructed backend (embedder-integrated or
    /// instrumented).
    pub fn with_backend(backend: Box<dyn RenderBackend>, options: Options) -> Self {
        let host = EffectHost::new(backend.compositing_type());
        let mut scene = Scene::new();
        scene.set_background(options.background);
        scene.set_debug_fallback(options.debug_fallback);
        Self {
            scene,
            chain: EffectChain::new(),
            host,
            backend,
            shaders: ShaderManager::new(),
            schedulers: BTreeMap::new(),
        }
    }

    pub fn compositing_type(&self) -> CompositingType {
        self.backend.compositing_type()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    // Outputs.

    pub fn add_output(&mut self, output: Output) {
        self.schedulers
            .insert(output.id, FrameScheduler::new(output.id, output.refresh));
        self.scene.add_output(output);
    }

    /// The output is gone. A frame already past pre-paint finishes painting
    /// but never presents; accumulated damage survives for a replacement.
    pub fn remove_output(&mut self, id: OutputId) {
        self.scene.remove_output(id);
        self.schedulers.remove(&id);
    }

    pub fn scheduler(&self, id: OutputId) -> Option<&FrameScheduler> {
        self.schedulers.get(&id)
    }

    // Effects.

    pub fn add_effect(&mut self, effect: Box<dyn Effect>) {
        self.chain.add(effect);
    }

    pub fn effect_mut<T: Effect>(&mut self) -> Option<&mut T> {
        self.chain.effect_mut::<T>()
    }

    // Window-manager events.

    pub fn window_added(&mut self, desc: WindowDesc) -> WindowId {
        let id = self.scene.add_window(desc);
        if let Some(snapshot) = self.scene.effect_window(id) {
            self.chain
                .window_added(&self.scene, &mut self.host, &snapshot);
        }
        id
    }

    pub fn window_closed(&mut self, id: WindowId) {
        self.scene.mark_window_deleted(id);
        self.chain.window_deleted(&self.scene, &mut self.host, id);
        self.apply_window_refs();
        let dropped = self.scene.reap_deleted();
        if !dropped.is_empty() {
            self.scene.tree.schedule_frame();
        }
    }

    pub fn window_geometry_changed(&mut self, id: WindowId, geometry: Rect) {
        if let Some(old) = self.scene.set_window_geometry(id, geometry) {
            if let Some(snapshot) = self.scene.effect_window(id) {
                self.chain
                    .window_geometry_changed(&self.scene, &mut self.host, &snapshot, old);
            }
        }
    }

    pub fn window_minimized(&mut self, id: WindowId) {
        self.scene.set_minimized(id, true);
        if let Some(snapshot) = self.scene.effect_window(id) {
            self.chain
                .window_minimized(&self.scene, &mut self.host, &snapshot);
        }
    }

    pub fn window_unminimized(&mut self, id: WindowId) {
        self.scene.set_minimized(id, false);
        if let Some(snapshot) = self.scene.effect_window(id) {
            self.chain
                .window_unminimized(&self.scene, &mut self.host, &snapshot);
        }
    }

    pub fn window_activated(&mut self, id: Option<WindowId>) {
        self.scene.set_active_window(id);
        self.chain.window_activated(&self.scene, &mut self.host, id);
    }

    pub fn set_window_property(&mut self, id: WindowId, atom: Atom, value: Option<Vec<u8>>) {
        self.scene.set_window_property(id, atom.clone(), value);
        self.chain
            .property_notify(&self.scene, &mut self.host, Some(id), &atom);
    }

    // Surface content.

    pub fn commit_buffer(
        &mut self,
        surface: SurfaceId,
        buffer: ClientBuffer,
        damage: &Region,
    ) -> LucentResult<()> {
        self.scene.commit_buffer(surface, buffer, damage)
    }

    pub fn release_buffer(&mut self, surface: SurfaceId) {
        self.scene.release_buffer(surface);
    }

    // Input capture for interactive selection.

    /// Routes a pointer press. Returns `true` if the press was consumed by
    /// a pending interactive position selection.
    pub fn pointer_pressed(&mut self, position: Point) -> bool {
        if self.host.selection_pending() {
            self.host.deliver_position(position);
            // The picking effect reads back from the next painted frame.
            self.scene.tree.schedule_frame();
            true
        } else {
            false
        }
    }

    pub fn cancel_position_selection(&mut self) {
        if self.host.selection_pending() {
            self.host.cancel_position_selection();
            self.scene.tree.schedule_frame();
        }
    }

    // Frames.

    /// Drives one vblank tick for `output`.
    pub fn on_vblank(&mut self, output: OutputId, now: Duration) -> FrameResult {
        self.apply_window_refs();
        self.scene.reap_deleted();
        let Some(scheduler) = self.schedulers.get_mut(&output) else {
            return FrameResult::default();
        };
        scheduler.on_vblank(
            now,
            &mut self.scene,
            &mut self.chain,
            self.backend.as_mut(),
            &mut self.shaders,
            &mut self.host,
        )
    }

    fn apply_window_refs(&mut self) {
        for (wid, delta) in self.host.drain_window_refs() {
            if delta > 0 {
                self.scene.ref_deleted_window(wid);
            } else {
                self.scene.unref_deleted_window(wid);
            }
        }
    }
}
