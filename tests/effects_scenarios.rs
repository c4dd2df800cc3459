//! End-to-end effect scenarios: blur damage expansion, the wavy-window
//! animation lifecycle, colour picking, the minimize animation, and the
//! invert toggle.

mod common;

use common::{ms, recording_compositor, software_compositor, OUTPUT};
use kurbo::{Point, Rect};
use lucent::effects::{
    BlurConfig, BlurEffect, ColorPickerEffect, InvertEffect, MinimizeConfig, MinimizeEffect,
    WavyConfig, WavyEffect,
};
use lucent::{PixelRect, SurfaceId, WindowId};

#[test]
fn blur_expands_damage_to_its_sampling_footprint() {
    let (mut comp, log, _fail) = recording_compositor();
    comp.add_effect(Box::new(BlurEffect::new(BlurConfig { radius: 10, sigma: 5.0 })));

    common::solid_window(
        &mut comp,
        SurfaceId(1),
        Rect::new(100.0, 100.0, 500.0, 400.0),
        [200, 200, 200, 255],
    );

    assert!(comp.on_vblank(OUTPUT, ms(16)).presented);
    let log = log.borrow();

    // Damage widened by the kernel radius around the 400×300 window.
    let presented = log.presents.last().expect("one present");
    assert!(presented.contains_rect(PixelRect::new(90, 90, 420, 320)));
    assert!(!presented.contains_point(50, 50));

    // The window content itself was painted exactly once.
    let content: Vec<_> = log.draws.iter().filter(|d| d.sampled_texture).collect();
    assert_eq!(content.len(), 1);
    // Two separable blur passes sampled the offscreen targets.
    let blur_passes = log.draws.iter().filter(|d| d.sampled_target).count();
    assert_eq!(blur_passes, 2);
}

#[test]
fn wavy_animation_runs_then_restores_original_quads() {
    let (mut comp, log, _fail) = recording_compositor();
    comp.add_effect(Box::new(WavyEffect::new(WavyConfig::default())));

    let window = common::solid_window(
        &mut comp,
        SurfaceId(1),
        Rect::new(0.0, 0.0, 800.0, 600.0),
        [50, 60, 70, 255],
    );
    assert!(comp.on_vblank(OUTPUT, ms(0)).presented);

    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain
            .effect_mut::<WavyEffect>()
            .expect("wavy loaded")
            .start(window, host);
    }

    // While the timeline runs, every frame deforms a 30×30 grid and
    // requests a follow-up repaint.
    for t in [0u64, 250, 500, 750] {
        log.borrow_mut().reset();
        let result = comp.on_vblank(OUTPUT, ms(t));
        assert!(result.presented, "frame at {t} ms should paint");
        let draws = log.borrow();
        let content = draws
            .draws
            .iter()
            .find(|d| d.sampled_texture)
            .expect("window painted");
        assert_eq!(content.quad_count, 900);
        assert!(content.deformed);
        drop(draws);
        assert!(comp.host.has_pending_repaints(), "follow-up at {t} ms");
    }

    // At the deadline the window snaps back to its original quads.
    log.borrow_mut().reset();
    assert!(comp.on_vblank(OUTPUT, ms(1000)).presented);
    {
        let draws = log.borrow();
        let content = draws
            .draws
            .iter()
            .find(|d| d.sampled_texture)
            .expect("restore frame painted");
        assert_eq!(content.quad_count, 1);
        assert!(!content.deformed);
    }
    assert!(!comp.chain.effect_mut::<WavyEffect>().unwrap().is_animating(window));

    // And no further frames are requested.
    assert!(!comp.on_vblank(OUTPUT, ms(1016)).painted);
}

#[test]
fn colour_picker_reads_the_clicked_pixel() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(ColorPickerEffect::new()));

    common::solid_window(
        &mut comp,
        SurfaceId(1),
        Rect::new(0.0, 0.0, 800.0, 600.0),
        [0xAA, 0xBB, 0xCC, 0xFF],
    );
    assert!(comp.on_vblank(OUTPUT, ms(16)).presented);

    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        assert!(chain.effect_mut::<ColorPickerEffect>().unwrap().pick(host));
    }
    assert!(comp.host.on_screen_message().is_some());

    assert!(comp.pointer_pressed(Point::new(500.0, 500.0)));
    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);

    let picked = comp
        .chain
        .effect_mut::<ColorPickerEffect>()
        .unwrap()
        .take_picked()
        .expect("pick resolved after one frame");
    assert!(i16::from(picked.r).abs_diff(0xAA) <= 1);
    assert!(i16::from(picked.g).abs_diff(0xBB) <= 1);
    assert!(i16::from(picked.b).abs_diff(0xCC) <= 1);
    assert!(comp.host.on_screen_message().is_none());
}

#[test]
fn cancelled_pick_reports_nothing() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(ColorPickerEffect::new()));
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 2, 3, 255]);
    comp.on_vblank(OUTPUT, ms(16));

    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain.effect_mut::<ColorPickerEffect>().unwrap().pick(host);
    }
    comp.cancel_position_selection();
    comp.on_vblank(OUTPUT, ms(33));

    assert!(comp
        .chain
        .effect_mut::<ColorPickerEffect>()
        .unwrap()
        .take_picked()
        .is_none());
    assert!(comp.host.on_screen_message().is_none());
}

#[test]
fn minimize_animation_scales_towards_the_icon() {
    let (mut comp, log, _fail) = recording_compositor();
    comp.add_effect(Box::new(MinimizeEffect::new(MinimizeConfig::default())));

    // 266.67×320 window whose icon lives at (50, 10), 32×32.
    let geometry = Rect::new(100.0, 100.0, 366.666_666_666_666_7, 420.0);
    let window = common::solid_window(&mut comp, SurfaceId(1), geometry, [10, 10, 10, 255]);
    comp.scene.set_icon_geometry(window, Some(Rect::new(50.0, 10.0, 82.0, 42.0)));
    assert!(comp.on_vblank(OUTPUT, ms(0)).presented);

    comp.window_minimized(window);

    // First animated frame sets the timeline baseline.
    log.borrow_mut().reset();
    assert!(comp.on_vblank(OUTPUT, ms(0)).presented);

    // Halfway through, scale and translation are halfway to the icon.
    log.borrow_mut().reset();
    assert!(comp.on_vblank(OUTPUT, ms(150)).presented);
    {
        let draws = log.borrow();
        let content = draws
            .draws
            .iter()
            .find(|d| d.sampled_texture)
            .expect("animated window painted");
        let x_scale = content.mvp.m[0][0];
        let y_scale = content.mvp.m[1][1];
        let x_translate = content.mvp.m[0][3] - geometry.x0;
        assert!((x_scale - 0.56).abs() < 0.01, "x scale was {x_scale}");
        assert!((y_scale - 0.55).abs() < 0.01, "y scale was {y_scale}");
        assert!((x_translate - (50.0 - 100.0) / 2.0).abs() < 0.5, "x translate was {x_translate}");
    }

    // At the end of the duration the window leaves the animated set.
    assert!(comp.on_vblank(OUTPUT, ms(300)).presented);
    assert!(!comp
        .chain
        .effect_mut::<MinimizeEffect>()
        .unwrap()
        .is_animating(window));
}

#[test]
fn invert_binds_its_shader_while_toggled() {
    let (mut comp, log, _fail) = recording_compositor();
    comp.add_effect(Box::new(InvertEffect::new()));

    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 200.0, 200.0), [30, 40, 50, 255]);
    assert!(comp.on_vblank(OUTPUT, ms(16)).presented);

    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain.effect_mut::<InvertEffect>().unwrap().toggle(host);
    }
    assert!(comp.host.has_pending_repaints());

    log.borrow_mut().reset();
    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);
    {
        let draws = log.borrow();
        let content = draws
            .draws
            .iter()
            .find(|d| d.sampled_texture)
            .expect("window painted");
        let shader = content.shader.expect("invert bound a shader");
        assert!(shader.0 >= 10_000, "expected the custom shader, got {shader:?}");
    }

    // Toggling off unbinds on the following frame.
    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain.effect_mut::<InvertEffect>().unwrap().toggle(host);
    }
    log.borrow_mut().reset();
    assert!(comp.on_vblank(OUTPUT, ms(50)).presented);
    let draws = log.borrow();
    let content = draws
        .draws
        .iter()
        .find(|d| d.sampled_texture)
        .expect("window painted");
    assert!(content.shader.map(|s| s.0 < 10_000).unwrap_or(true));
}

#[test]
fn invert_goes_invalid_on_software_and_passes_through() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(InvertEffect::new()));
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 2, 3, 255]);
    comp.on_vblank(OUTPUT, ms(16));

    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain.effect_mut::<InvertEffect>().unwrap().toggle(host);
    }
    // The frame paints; the shader compile fails and latches the effect
    // invalid, windows keep rendering untouched.
    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);
    assert!(!comp.chain.effect_mut::<InvertEffect>().unwrap().valid());
    // Still latched on later frames, with no panic and no rebind attempt.
    comp.host.add_repaint_full();
    assert!(comp.on_vblank(OUTPUT, ms(50)).presented);
    assert!(!comp.chain.effect_mut::<InvertEffect>().unwrap().valid());
}

#[test]
fn deleted_windows_evict_effect_state() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(WavyEffect::new(WavyConfig::default())));
    let window = common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 2, 3, 255]);
    comp.on_vblank(OUTPUT, ms(16));

    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain.effect_mut::<WavyEffect>().unwrap().start(window, host);
    }
    comp.window_closed(window);
    assert!(!comp.chain.effect_mut::<WavyEffect>().unwrap().is_animating(window));
    assert!(comp.scene.window(window).is_none());
}

#[test]
fn animations_are_keyed_per_window() {
    let mut comp = software_compositor();
    comp.add_effect(Box::new(WavyEffect::new(WavyConfig::default())));
    let a = common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    let b: WindowId =
        common::solid_window(&mut comp, SurfaceId(2), Rect::new(100.0, 0.0, 164.0, 64.0), [2, 2, 2, 255]);
    {
        let (chain, host) = (&mut comp.chain, &mut comp.host);
        chain.effect_mut::<WavyEffect>().unwrap().start(a, host);
    }
    let wavy = comp.chain.effect_mut::<WavyEffect>().unwrap();
    assert!(wavy.is_animating(a));
    assert!(!wavy.is_animating(b));
}
