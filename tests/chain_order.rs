//! Chain dispatch contracts: hook ordering, activation gating, feature
//! providers, and the nested-paint depth guard.

mod common;

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use common::{ms, software_compositor, OUTPUT};
use kurbo::Rect;
use lucent::{
    Atom, Effect, Feature, LucentResult, PaintMask, PaintScreenCursor, PaintWindowCursor,
    Region, ScreenPaintData, ScreenPrePaintCursor, ScreenPrePaintData, SurfaceId,
    WindowPaintData,
};

type Log = Rc<RefCell<Vec<String>>>;

struct Probe {
    label: &'static str,
    position: i32,
    active: bool,
    features: &'static [Feature],
    log: Log,
}

impl Probe {
    fn new(label: &'static str, position: i32, log: &Log) -> Self {
        Self {
            label,
            position,
            active: true,
            features: &[],
            log: log.clone(),
        }
    }

    fn push(&self, hook: &str) {
        self.log.borrow_mut().push(format!("{hook}:{}", self.label));
    }
}

impl Effect for Probe {
    fn name(&self) -> &'static str {
        self.label
    }

    fn requested_chain_position(&self) -> i32 {
        self.position
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn provides(&self) -> &'static [Feature] {
        self.features
    }

    fn pre_paint_screen(
        &mut self,
        chain: &mut ScreenPrePaintCursor<'_, '_>,
        data: &mut ScreenPrePaintData,
    ) {
        self.push("pre");
        chain.forward(data);
    }

    fn paint_screen(
        &mut self,
        chain: &mut PaintScreenCursor<'_, '_>,
        data: &mut ScreenPaintData,
    ) -> LucentResult<()> {
        self.push("paint");
        chain.forward(data)
    }

    fn post_paint_screen(&mut self, _host: &mut lucent::EffectHost) {
        self.push("post");
    }

    fn property_notify(
        &mut self,
        _window: Option<lucent::WindowId>,
        _atom: &Atom,
        _api: &mut lucent::HostHandle<'_>,
    ) {
        self.push("prop");
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn events(log: &Log, hook: &str) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|e| e.starts_with(hook))
        .cloned()
        .collect()
}

#[test]
fn chain_runs_in_position_order_and_post_runs_reversed() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut comp = software_compositor();
    // Added out of order; positions decide.
    comp.add_effect(Box::new(Probe::new("b", 10, &log)));
    comp.add_effect(Box::new(Probe::new("c", 20, &log)));
    comp.add_effect(Box::new(Probe::new("a", 0, &log)));

    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    assert!(comp.on_vblank(OUTPUT, ms(16)).presented);

    assert_eq!(events(&log, "pre:"), vec!["pre:a", "pre:b", "pre:c"]);
    assert_eq!(events(&log, "paint:"), vec!["paint:a", "paint:b", "paint:c"]);
    assert_eq!(events(&log, "post:"), vec!["post:c", "post:b", "post:a"]);
}

#[test]
fn equal_positions_keep_insertion_order() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut comp = software_compositor();
    comp.add_effect(Box::new(Probe::new("first", 5, &log)));
    comp.add_effect(Box::new(Probe::new("second", 5, &log)));

    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    comp.on_vblank(OUTPUT, ms(16));

    assert_eq!(events(&log, "pre:"), vec!["pre:first", "pre:second"]);
}

#[test]
fn inactive_effects_skip_paint_but_receive_property_notify() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut comp = software_compositor();
    let mut probe = Probe::new("idle", 0, &log);
    probe.active = false;
    comp.add_effect(Box::new(probe));

    let window =
        common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    comp.on_vblank(OUTPUT, ms(16));
    assert!(events(&log, "pre:").is_empty());
    assert!(events(&log, "paint:").is_empty());

    comp.set_window_property(window, Atom::new("_DEMO"), Some(vec![1]));
    assert_eq!(events(&log, "prop:"), vec!["prop:idle"]);
}

#[test]
fn first_effect_in_chain_order_wins_a_feature() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut comp = software_compositor();
    let mut late = Probe::new("late-invert", 50, &log);
    late.features = &[Feature::ScreenInversion];
    let mut early = Probe::new("early-invert", 1, &log);
    early.features = &[Feature::ScreenInversion];
    comp.add_effect(Box::new(late));
    comp.add_effect(Box::new(early));

    assert_eq!(comp.chain.provider_of(Feature::ScreenInversion), Some("early-invert"));
    assert_eq!(comp.chain.provider_of(Feature::Outline), None);
}

/// Paints its window through the chain again on every paint hook, without
/// bound.
struct RecursiveEffect;

impl Effect for RecursiveEffect {
    fn name(&self) -> &'static str {
        "runaway"
    }

    fn paint_window(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        window: &lucent::EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        chain.paint_other_window(window.id, mask, region)?;
        chain.forward(window, mask, region, data)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn unbounded_window_recursion_aborts_the_frame() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(RecursiveEffect));
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);

    let result = comp.on_vblank(OUTPUT, ms(16));
    assert!(result.painted);
    assert!(result.aborted);
    assert!(!result.presented);

    // The damage survives the aborted frame, so removing the effect lets
    // the next frame succeed.
    comp.chain.remove("runaway");
    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);
}

/// Pushes a render target and "forgets" to pop it.
struct LeakyTargetEffect;

impl Effect for LeakyTargetEffect {
    fn name(&self) -> &'static str {
        "leaky"
    }

    fn paint_window(
        &mut self,
        chain: &mut PaintWindowCursor<'_, '_>,
        window: &lucent::EffectWindow,
        mask: PaintMask,
        region: &Region,
        data: &mut WindowPaintData,
    ) -> LucentResult<()> {
        let target = chain.create_render_target(16, 16)?;
        chain.push_render_target(target.id)?;
        chain.forward(window, mask, region, data)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn unbalanced_target_stack_is_recovered_after_the_frame() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(LeakyTargetEffect));
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);

    // The frame completes; the stack imbalance is drained and the screen
    // rebound, so the next frame is unaffected.
    assert!(comp.on_vblank(OUTPUT, ms(16)).presented);
    comp.host.add_repaint_full();
    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);
}
