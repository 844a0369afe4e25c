use crate::{Skeleton, SkeletonData};

const TWO_BONES: &str = r#"
{
  "skeleton": { "spine": "4.1.24" },
  "bones": [
    { "name": "root" },
    { "name": "upper", "parent": "root", "length": 10 },
    { "name": "lower", "parent": "upper", "length": 10, "x": 10 },
    { "name": "target", "parent": "root", "x": 15 }
  ],
  "ik": [
    { "name": "arm", "bones": ["upper", "lower"], "target": "target" }
  ]
}
"#;

const ONE_BONE: &str = r#"
{
  "skeleton": { "spine": "4.1.24" },
  "bones": [
    { "name": "root" },
    { "name": "bone", "parent": "root", "length": 10 },
    { "name": "target", "parent": "root", "y": 10 }
  ],
  "ik": [
    { "name": "aim", "bones": ["bone"], "target": "target" }
  ]
}
"#;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-3,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn skeleton(json: &str) -> Skeleton {
    Skeleton::new(SkeletonData::from_json_str(json).unwrap())
}

/// World position of the end of a bone's length.
fn tip(skeleton: &Skeleton, bone: usize) -> [f32; 2] {
    let length = skeleton.data.bones[bone].length;
    skeleton.bones[bone].local_to_world(length, 0.0)
}

#[test]
fn two_bone_ik_bends_elbow_by_direction() {
    let mut skeleton = skeleton(TWO_BONES);
    skeleton.update_world_transform();

    let lower = &skeleton.bones[2];
    assert_approx(lower.world_x, 7.5);
    assert_approx(lower.world_y, -6.614);
    let [x, y] = tip(&skeleton, 2);
    assert_approx(x, 15.0);
    assert_approx(y, 0.0);

    skeleton.ik_constraints[0].bend_direction = -1;
    skeleton.update_world_transform();
    let lower = &skeleton.bones[2];
    assert_approx(lower.world_x, 7.5);
    assert_approx(lower.world_y, 6.614);
}

#[test]
fn two_bone_ik_straightens_toward_unreachable_target() {
    let mut skeleton = skeleton(TWO_BONES);
    skeleton.bones[3].x = 30.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_rotation_x(), 0.0);
    let [x, y] = tip(&skeleton, 2);
    assert_approx(x, 20.0);
    assert_approx(y, 0.0);
}

#[test]
fn two_bone_ik_exact_reach_is_straight() {
    let mut skeleton = skeleton(TWO_BONES);
    skeleton.bones[3].x = 20.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_rotation_x(), 0.0);
    assert_approx(skeleton.bones[2].world_x, 10.0);
    let [x, y] = tip(&skeleton, 2);
    assert_approx(x, 20.0);
    assert_approx(y, 0.0);
}

#[test]
fn two_bone_ik_stretch_scales_parent_to_reach() {
    let mut skeleton = skeleton(TWO_BONES);
    skeleton.bones[3].x = 30.0;
    skeleton.ik_constraints[0].stretch = true;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_scale_x(), 1.5);
    assert_approx(skeleton.bones[2].world_x, 15.0);
    let [x, _] = tip(&skeleton, 2);
    assert_approx(x, 30.0);
}

#[test]
fn one_bone_ik_points_at_target() {
    let mut skeleton = skeleton(ONE_BONE);
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_rotation_x(), 90.0);
    assert_approx(skeleton.bones[1].arotation, 90.0);
    // The local pose is untouched.
    assert_eq!(skeleton.bones[1].rotation, 0.0);
}

#[test]
fn ik_mix_blends_between_pose_and_solution() {
    let mut skeleton = skeleton(ONE_BONE);
    skeleton.ik_constraints[0].mix = 0.5;
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_rotation_x(), 45.0);

    skeleton.ik_constraints[0].mix = 0.0;
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_rotation_x(), 0.0);
}

#[test]
fn one_bone_ik_stretch_and_compress() {
    let mut skeleton = skeleton(ONE_BONE);
    skeleton.bones[2].y = 20.0;
    skeleton.ik_constraints[0].stretch = true;
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_scale_x(), 2.0);
    assert_approx(skeleton.bones[1].world_scale_y(), 1.0);

    skeleton.bones[2].y = 5.0;
    skeleton.update_world_transform();
    // Stretch alone never shortens the bone.
    assert_approx(skeleton.bones[1].world_scale_x(), 1.0);

    skeleton.ik_constraints[0].compress = true;
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_scale_x(), 0.5);
}

#[test]
fn ik_setup_pose_restores_constraint_values() {
    let mut skeleton = skeleton(TWO_BONES);
    skeleton.ik_constraints[0].mix = 0.25;
    skeleton.ik_constraints[0].bend_direction = -1;
    skeleton.set_bones_to_setup_pose();

    assert_eq!(skeleton.ik_constraints[0].mix, 1.0);
    assert_eq!(skeleton.ik_constraints[0].bend_direction, 1);
}
