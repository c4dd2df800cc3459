//! Frame lifecycle: damage-driven painting, idle skipping, the
//! frame-callback promise, and frame cancellation paths.

mod common;

use common::{ms, recording_compositor, software_compositor, PresentFailure, DELEGATE, OUTPUT};
use kurbo::Rect;
use lucent::{collect_damage, PixelRect, Region, SurfaceId};

#[test]
fn first_frame_paints_and_presents() {
    let mut comp = software_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 200.0, 100.0), [10, 20, 30, 255]);

    let result = comp.on_vblank(OUTPUT, ms(16));
    assert!(result.painted);
    assert!(result.presented);
    let feedback = result.feedback.expect("presented frames carry feedback");
    assert_eq!(feedback.delegate, DELEGATE);
    assert!(feedback.timestamp >= ms(16));
    assert_eq!(feedback.surfaces, vec![SurfaceId(1)]);
}

#[test]
fn idle_frames_are_skipped_entirely() {
    let mut comp = software_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 2, 3, 255]);

    assert!(comp.on_vblank(OUTPUT, ms(16)).presented);
    // Nothing changed: no damage, no animation, no frame.
    let second = comp.on_vblank(OUTPUT, ms(33));
    assert!(!second.painted);
    assert!(!second.presented);
    assert!(second.feedback.is_none());
}

#[test]
fn every_visible_surface_gets_exactly_one_callback() {
    let mut comp = software_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 100.0, 100.0), [9, 9, 9, 255]);
    common::solid_window(&mut comp, SurfaceId(2), Rect::new(200.0, 0.0, 300.0, 100.0), [8, 8, 8, 255]);

    let feedback = comp.on_vblank(OUTPUT, ms(16)).feedback.unwrap();
    assert_eq!(feedback.surfaces, vec![SurfaceId(1), SurfaceId(2)]);
}

#[test]
fn minimized_windows_send_no_callbacks() {
    let mut comp = software_compositor();
    let a = common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 100.0, 100.0), [9, 9, 9, 255]);
    common::solid_window(&mut comp, SurfaceId(2), Rect::new(200.0, 0.0, 300.0, 100.0), [8, 8, 8, 255]);
    comp.window_minimized(a);

    let feedback = comp.on_vblank(OUTPUT, ms(16)).feedback.unwrap();
    assert_eq!(feedback.surfaces, vec![SurfaceId(2)]);
}

#[test]
fn repeated_identical_damage_paints_once() {
    let mut comp = software_compositor();
    let surface = SurfaceId(1);
    common::solid_window(&mut comp, surface, Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    comp.on_vblank(OUTPUT, ms(16));

    let damage = Region::from_rect(PixelRect::new(0, 0, 32, 32));
    let buffer = lucent::ClientBuffer::Shm(lucent::ShmBuffer::solid(64, 64, [5, 5, 5, 255]));
    comp.commit_buffer(surface, buffer.clone(), &damage).unwrap();
    comp.commit_buffer(surface, buffer, &damage).unwrap();

    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);
    // Both commits were satisfied by the single frame.
    let idle = comp.on_vblank(OUTPUT, ms(50));
    assert!(!idle.painted);
}

#[test]
fn present_timeout_skips_one_frame_and_drops_callbacks() {
    let (mut comp, _log, fail) = recording_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);

    *fail.borrow_mut() = Some(PresentFailure::Timeout);
    let result = comp.on_vblank(OUTPUT, ms(16));
    assert!(result.painted);
    assert!(result.aborted);
    assert!(result.feedback.is_none());

    // The penalty frame is silently dropped, damage still pending after it.
    let skipped = comp.on_vblank(OUTPUT, ms(33));
    assert!(!skipped.painted);
    let recovered = comp.on_vblank(OUTPUT, ms(50));
    assert!(recovered.presented);
    assert_eq!(recovered.feedback.unwrap().surfaces, vec![SurfaceId(1)]);
}

#[test]
fn output_lost_at_present_keeps_damage_and_sends_no_callbacks() {
    let (mut comp, _log, fail) = recording_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);

    *fail.borrow_mut() = Some(PresentFailure::OutputGone);
    let result = comp.on_vblank(OUTPUT, ms(16));
    // Paint (and post-paint) completed; the commit did not.
    assert!(result.painted);
    assert!(result.aborted);
    assert!(!result.presented);
    assert!(result.feedback.is_none());
    assert!(!collect_damage(&comp.scene, DELEGATE).is_empty());

    // A later frame retries with the retained damage.
    let retry = comp.on_vblank(OUTPUT, ms(33));
    assert!(retry.presented);
    assert!(collect_damage(&comp.scene, DELEGATE).is_empty());
}

#[test]
fn disabled_output_stops_producing_frames_but_keeps_damage() {
    let mut comp = software_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    comp.scene.remove_output(OUTPUT);

    let result = comp.on_vblank(OUTPUT, ms(16));
    assert!(!result.presented);
    assert!(!collect_damage(&comp.scene, DELEGATE).is_empty());
}

#[test]
fn host_full_repaints_are_idempotent() {
    let mut comp = software_compositor();
    common::solid_window(&mut comp, SurfaceId(1), Rect::new(0.0, 0.0, 64.0, 64.0), [1, 1, 1, 255]);
    comp.on_vblank(OUTPUT, ms(16));

    comp.host.add_repaint_full();
    comp.host.add_repaint_full();
    assert!(comp.on_vblank(OUTPUT, ms(33)).presented);
    // Drained in one frame.
    assert!(!comp.on_vblank(OUTPUT, ms(50)).painted);
}
