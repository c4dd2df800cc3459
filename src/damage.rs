use crate::core::DelegateId;
use crate::region::{PixelRect, Region};
use crate::scene::Scene;

/// Union of everything dirty for `delegate`, mapped from item-local to
/// global coordinates and clipped to the delegate's output.
///
/// Non-destructive: the per-item regions stay put until
/// [`reset_damage`] runs after the delegate commits, so an aborted frame
/// retries with its damage intact and other delegates are never affected.
pub fn collect_damage(scene: &Scene, delegate: DelegateId) -> Region {
    let Some(output) = scene.output_for_delegate(delegate) else {
        return Region::new();
    };
    let clip = PixelRect::from_logical(output.geometry);

    let mut out = scene.tree.peek_global_damage(delegate).intersected(clip);
    for id in scene.tree.iter_ids().collect::<Vec<_>>() {
        let local = scene.tree.repaints(id, delegate);
        if local.is_empty() {
            continue;
        }
        let origin = scene.tree.global_position(id);
        let mapped = local
            .translated(origin.x.floor() as i32, origin.y.floor() as i32)
            .intersected(clip);
        out.union_with(&mapped);
    }
    out
}

/// Clears consumed damage for `delegate` only. Called once the delegate's
/// frame has actually presented.
pub fn reset_damage(scene: &mut Scene, delegate: DelegateId) {
    let ids: Vec<_> = scene.tree.iter_ids().collect();
    for id in ids {
        scene.tree.reset_repaints(id, delegate);
    }
    scene.tree.take_global_damage(delegate);
}
