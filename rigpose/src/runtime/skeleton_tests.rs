use crate::{
    Attachment, BoneData, Error, RegionAttachment, Skeleton, SkeletonData, Skin, SlotData,
    TransformMode,
};
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-3,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn bone(name: &str, parent: Option<usize>, x: f32, y: f32, rotation: f32) -> BoneData {
    let mut bone = BoneData::new(name, parent);
    bone.x = x;
    bone.y = y;
    bone.rotation = rotation;
    bone
}

fn region(name: &str, width: f32, height: f32) -> Attachment {
    Attachment::Region(RegionAttachment::new(name, width, height))
}

/// Root at (10, 20) with one slot "body" showing a 4x6 region from the default skin, and an
/// "alt" skin whose "body" is 8x8.
fn skinned_data() -> SkeletonData {
    let mut data = SkeletonData::default();
    data.bones.push(bone("root", None, 10.0, 20.0, 0.0));
    let mut slot = SlotData::new("body", 0);
    slot.attachment = Some("body".to_string());
    data.slots.push(slot);

    let mut default_skin = Skin::new("default");
    default_skin.set_attachment(0, "body", region("body", 4.0, 6.0));
    default_skin.set_attachment(0, "hat", region("hat", 2.0, 2.0));
    let mut alt = Skin::new("alt");
    alt.set_attachment(0, "body", region("body-alt", 8.0, 8.0));
    data.skins = vec![default_skin, alt];
    data.default_skin = Some(0);
    data
}

#[test]
fn update_world_transform_root_and_child() {
    let mut data = SkeletonData::default();
    data.bones.push(bone("root", None, 10.0, 20.0, 0.0));
    data.bones.push(bone("child", Some(0), 5.0, 0.0, 90.0));
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.update_world_transform();

    let root = &skeleton.bones[0];
    assert_approx(root.world_x, 10.0);
    assert_approx(root.world_y, 20.0);

    let child = &skeleton.bones[1];
    assert_approx(child.world_x, 15.0);
    assert_approx(child.world_y, 20.0);
    assert_approx(child.a, 0.0);
    assert_approx(child.b, -1.0);
    assert_approx(child.c, 1.0);
    assert_approx(child.d, 0.0);
    assert_approx(child.world_rotation_x(), 90.0);
}

#[test]
fn skeleton_placement_moves_and_flips_the_root() {
    let mut data = SkeletonData::default();
    data.bones.push(bone("root", None, 10.0, 0.0, 0.0));
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.x = 100.0;
    skeleton.y = 50.0;
    skeleton.scale_x = -1.0;
    skeleton.update_world_transform();

    let root = &skeleton.bones[0];
    assert_approx(root.world_x, 90.0);
    assert_approx(root.world_y, 50.0);
    assert_approx(root.a, -1.0);
    assert_approx(root.d, 1.0);
}

#[test]
fn no_scale_child_ignores_parent_scale() {
    let mut data = SkeletonData::default();
    let mut root = bone("root", None, 0.0, 0.0, 0.0);
    root.scale_x = 2.0;
    root.scale_y = 2.0;
    data.bones.push(root);
    let mut child = bone("child", Some(0), 5.0, 0.0, 0.0);
    child.transform_mode = TransformMode::NoScale;
    data.bones.push(child);
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.update_world_transform();

    let child = &skeleton.bones[1];
    // Position still follows the scaled parent.
    assert_approx(child.world_x, 10.0);
    assert_approx(child.world_scale_x(), 1.0);
    assert_approx(child.world_scale_y(), 1.0);
}

#[test]
fn update_applied_transform_recovers_local_values() {
    let mut data = SkeletonData::default();
    data.bones.push(bone("root", None, 0.0, 0.0, 30.0));
    let mut child = bone("child", Some(0), 3.0, 1.0, 45.0);
    child.scale_x = 2.0;
    data.bones.push(child);
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.update_world_transform();

    skeleton.bones[1].ax = 0.0;
    skeleton.bones[1].arotation = 0.0;
    skeleton.bones[1].ascale_x = 1.0;
    skeleton.update_applied_transform(1);

    let child = &skeleton.bones[1];
    assert_approx(child.ax, 3.0);
    assert_approx(child.ay, 1.0);
    assert_approx(child.arotation, 45.0);
    assert_approx(child.ascale_x, 2.0);
    assert_approx(child.ascale_y, 1.0);
    assert_approx(child.ashear_y, 0.0);
}

#[test]
fn world_and_local_conversions_are_inverse() {
    let mut data = SkeletonData::default();
    data.bones.push(bone("root", None, 4.0, -2.0, 60.0));
    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.update_world_transform();

    let root = &skeleton.bones[0];
    let [wx, wy] = root.local_to_world(3.0, 7.0);
    let [lx, ly] = root.world_to_local(wx, wy);
    assert_approx(lx, 3.0);
    assert_approx(ly, 7.0);
    assert_approx(root.local_to_world_rotation(10.0), 10.0);
}

#[test]
fn setup_attachments_come_from_the_default_skin() {
    let skeleton = Skeleton::new(Arc::new(skinned_data()));
    let key = skeleton.slots[0].attachment_key().unwrap();
    assert_eq!(key.skin, 0);
    assert_eq!(skeleton.slots[0].attachment_name(), Some("body"));
}

#[test]
fn set_skin_swaps_attachments_from_the_previous_skin() {
    let mut skeleton = Skeleton::new(Arc::new(skinned_data()));
    skeleton.set_skin_by_name("alt").unwrap();
    assert_eq!(skeleton.skin(), Some(1));
    // First skin set: setup attachments resolve in the new skin.
    assert_eq!(skeleton.slots[0].attachment_key().unwrap().skin, 1);
    assert_eq!(skeleton.slot_attachment(0).unwrap().name(), "body-alt");

    skeleton.set_skin_by_name("default").unwrap();
    assert_eq!(skeleton.slots[0].attachment_key().unwrap().skin, 0);

    assert!(matches!(
        skeleton.set_skin_by_name("missing"),
        Err(Error::UnknownSkin { .. })
    ));
}

#[test]
fn set_attachment_falls_back_to_default_skin_and_rejects_unknown_names() {
    let mut skeleton = Skeleton::new(Arc::new(skinned_data()));
    skeleton.set_skin_by_name("alt").unwrap();

    skeleton.set_attachment("body", Some("hat")).unwrap();
    assert_eq!(skeleton.slots[0].attachment_key().unwrap().skin, 0);

    skeleton.set_attachment("body", None).unwrap();
    assert!(skeleton.slot_attachment(0).is_none());

    assert!(matches!(
        skeleton.set_attachment("body", Some("nope")),
        Err(Error::UnknownAttachment { .. })
    ));
    assert!(matches!(
        skeleton.set_attachment("nope", None),
        Err(Error::UnknownSlot { .. })
    ));
}

#[test]
fn skin_required_bones_are_active_only_with_their_skin() {
    let mut data = skinned_data();
    let mut extra = bone("extra", Some(0), 0.0, 0.0, 0.0);
    extra.skin_required = true;
    data.bones.push(extra);
    data.skins[1].bones.push(1);

    let mut skeleton = Skeleton::new(Arc::new(data));
    assert!(!skeleton.bones[1].active);
    skeleton.set_skin_by_name("alt").unwrap();
    assert!(skeleton.bones[1].active);
    skeleton.set_skin(None).unwrap();
    assert!(!skeleton.bones[1].active);
}

#[test]
fn bounds_cover_region_attachments() {
    let mut skeleton = Skeleton::new(Arc::new(skinned_data()));
    skeleton.update_world_transform();

    let bounds = skeleton.bounds();
    assert_approx(bounds.x, 8.0);
    assert_approx(bounds.y, 17.0);
    assert_approx(bounds.width, 4.0);
    assert_approx(bounds.height, 6.0);

    skeleton.set_attachment("body", None).unwrap();
    let empty = skeleton.bounds();
    assert_eq!((empty.width, empty.height), (0.0, 0.0));
}

#[test]
fn set_to_setup_pose_restores_bones_and_draw_order() {
    let mut skeleton = Skeleton::new(Arc::new(skinned_data()));
    skeleton.bones[0].x = 99.0;
    skeleton.bones[0].rotation = 45.0;
    skeleton.set_attachment("body", None).unwrap();

    skeleton.set_to_setup_pose();
    assert_eq!(skeleton.bones[0].x, 10.0);
    assert_eq!(skeleton.bones[0].rotation, 0.0);
    assert_eq!(skeleton.slots[0].attachment_name(), Some("body"));
    assert_eq!(skeleton.draw_order, vec![0]);
}

/// `[a, b, c, d, x, y]` of a bone's local transform, composed by hand.
fn local_affine(bone: &BoneData) -> [f32; 6] {
    let (sin0, cos0) = (bone.rotation + bone.shear_x).to_radians().sin_cos();
    let (sin1, cos1) = (bone.rotation + 90.0 + bone.shear_y).to_radians().sin_cos();
    [
        cos0 * bone.scale_x,
        cos1 * bone.scale_y,
        sin0 * bone.scale_x,
        sin1 * bone.scale_y,
        bone.x,
        bone.y,
    ]
}

fn compose(parent: [f32; 6], local: [f32; 6]) -> [f32; 6] {
    let [pa, pb, pc, pd, px, py] = parent;
    let [la, lb, lc, ld, lx, ly] = local;
    [
        pa * la + pb * lc,
        pa * lb + pb * ld,
        pc * la + pd * lc,
        pc * lb + pd * ld,
        pa * lx + pb * ly + px,
        pc * lx + pd * ly + py,
    ]
}

#[test]
fn world_transform_matches_multiplying_local_matrices() {
    let mut data = SkeletonData::default();
    let mut root = bone("root", None, 1.0, 2.0, 30.0);
    root.scale_x = 1.5;
    root.scale_y = 0.8;
    data.bones.push(root);
    let mut mid = bone("mid", Some(0), 3.0, -1.0, -45.0);
    mid.shear_x = 10.0;
    mid.shear_y = 5.0;
    data.bones.push(mid);
    let mut tip = bone("tip", Some(1), 2.0, 2.0, 60.0);
    tip.scale_x = 0.5;
    tip.scale_y = 2.0;
    data.bones.push(tip);

    let mut expected: Vec<[f32; 6]> = Vec::new();
    for bone in &data.bones {
        let local = local_affine(bone);
        let world = match bone.parent {
            Some(parent) => compose(expected[parent], local),
            None => local,
        };
        expected.push(world);
    }

    let mut skeleton = Skeleton::new(Arc::new(data));
    skeleton.update_world_transform();
    for (bone, expected) in skeleton.bones.iter().zip(expected) {
        let actual = [bone.a, bone.b, bone.c, bone.d, bone.world_x, bone.world_y];
        for (actual, expected) in actual.into_iter().zip(expected) {
            assert_approx(actual, expected);
        }
    }
}

#[test]
fn applied_transform_reproduces_world_matrix_in_every_mode() {
    let modes = [
        TransformMode::Normal,
        TransformMode::OnlyTranslation,
        TransformMode::NoRotationOrReflection,
        TransformMode::NoScale,
        TransformMode::NoScaleOrReflection,
    ];
    for mode in modes {
        let mut data = SkeletonData::default();
        let mut root = bone("root", None, 4.0, -3.0, 30.0);
        root.scale_x = 2.0;
        root.scale_y = 1.5;
        data.bones.push(root);
        let mut child = bone("child", Some(0), 3.0, 1.0, 20.0);
        child.scale_x = 1.2;
        child.scale_y = 0.8;
        child.shear_x = 10.0;
        child.shear_y = 5.0;
        child.transform_mode = mode;
        data.bones.push(child);

        let mut skeleton = Skeleton::new(Arc::new(data));
        skeleton.update_world_transform();
        let before = {
            let b = &skeleton.bones[1];
            [b.a, b.b, b.c, b.d, b.world_x, b.world_y]
        };

        skeleton.update_applied_transform(1);
        let b = &skeleton.bones[1];
        let applied = [b.ax, b.ay, b.arotation, b.ascale_x, b.ascale_y, b.ashear_x, b.ashear_y];
        let [x, y, rotation, scale_x, scale_y, shear_x, shear_y] = applied;
        skeleton.update_bone_world_transform_with(
            1, x, y, rotation, scale_x, scale_y, shear_x, shear_y,
        );

        let b = &skeleton.bones[1];
        let after = [b.a, b.b, b.c, b.d, b.world_x, b.world_y];
        for (after, before) in after.into_iter().zip(before) {
            assert!(
                (after - before).abs() <= 1.0e-3,
                "{mode:?}: expected {before}, got {after}"
            );
        }
    }
}
