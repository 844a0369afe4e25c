use crate::{Skeleton, SkeletonData};

const TEMPLATE: &str = r#"
{
  "skeleton": { "spine": "4.1.24" },
  "bones": [
    { "name": "root" },
    { "name": "follower", "parent": "root", "rotation": 10 },
    { "name": "target", "parent": "root", "x": 10, "y": 5, "rotation": 30, "scaleX": 2, "scaleY": 2 }
  ],
  "transform": [
    {
      "name": "follow",
      "bones": ["follower"],
      "target": "target",
      "local": LOCAL,
      "relative": RELATIVE,
      "mixRotate": 1,
      "mixX": 1,
      "mixScaleX": 0,
      "mixShearY": 0
    }
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

fn skeleton(local: bool, relative: bool) -> Skeleton {
    let json = TEMPLATE
        .replace("LOCAL", &local.to_string())
        .replace("RELATIVE", &relative.to_string());
    Skeleton::new(SkeletonData::from_json_str(&json).unwrap())
}

#[test]
fn absolute_world_copies_target_rotation_and_position() {
    let mut skeleton = skeleton(false, false);
    skeleton.update_world_transform();

    let follower = &skeleton.bones[1];
    assert_approx(follower.world_x, 10.0);
    assert_approx(follower.world_y, 5.0);
    assert_approx(follower.world_rotation_x(), 30.0);
    assert_approx(follower.world_scale_x(), 1.0);
    // The applied transform is rebuilt from the constrained world matrix.
    assert_approx(follower.arotation, 30.0);
    assert_approx(follower.ax, 10.0);
}

#[test]
fn absolute_world_offsets_are_in_target_space() {
    let mut skeleton = skeleton(false, false);
    let mut data = (*skeleton.data).clone();
    data.transform_constraints[0].offset_x = 4.0;
    data.transform_constraints[0].offset_rotation = 15.0;
    skeleton = Skeleton::new(std::sync::Arc::new(data));
    skeleton.update_world_transform();

    let follower = &skeleton.bones[1];
    let (sin, cos) = 30f32.to_radians().sin_cos();
    assert_approx(follower.world_x, 10.0 + 8.0 * cos);
    assert_approx(follower.world_y, 5.0 + 8.0 * sin);
    assert_approx(follower.world_rotation_x(), 45.0);
}

#[test]
fn absolute_world_partial_mix() {
    let mut skeleton = skeleton(false, false);
    let constraint = &mut skeleton.transform_constraints[0];
    constraint.mix_rotate = 0.5;
    constraint.mix_x = 0.5;
    constraint.mix_y = 0.0;
    skeleton.update_world_transform();

    let follower = &skeleton.bones[1];
    assert_approx(follower.world_rotation_x(), 20.0);
    assert_approx(follower.world_x, 5.0);
    assert_approx(follower.world_y, 0.0);
}

#[test]
fn absolute_world_scale_matches_target() {
    let mut skeleton = skeleton(false, false);
    skeleton.transform_constraints[0].mix_scale_x = 1.0;
    skeleton.transform_constraints[0].mix_scale_y = 1.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_scale_x(), 2.0);
    assert_approx(skeleton.bones[1].world_scale_y(), 2.0);
}

#[test]
fn relative_world_adds_target_transform() {
    let mut skeleton = skeleton(false, true);
    skeleton.update_world_transform();

    let follower = &skeleton.bones[1];
    assert_approx(follower.world_rotation_x(), 40.0);
    assert_approx(follower.world_x, 10.0);
    assert_approx(follower.world_y, 5.0);
}

#[test]
fn absolute_local_copies_applied_values() {
    let mut skeleton = skeleton(true, false);
    skeleton.update_world_transform();

    let follower = &skeleton.bones[1];
    assert_approx(follower.arotation, 30.0);
    assert_approx(follower.ax, 10.0);
    assert_approx(follower.ay, 5.0);
    assert_approx(follower.ascale_x, 1.0);
}

#[test]
fn relative_local_adds_applied_values() {
    let mut skeleton = skeleton(true, true);
    skeleton.transform_constraints[0].mix_scale_x = 1.0;
    skeleton.update_world_transform();

    let follower = &skeleton.bones[1];
    assert_approx(follower.arotation, 40.0);
    assert_approx(follower.ax, 10.0);
    assert_approx(follower.ascale_x, 2.0);
    assert_approx(follower.ascale_y, 1.0);
}

#[test]
fn zero_mixes_leave_the_pose_alone() {
    let mut skeleton = skeleton(false, false);
    let constraint = &mut skeleton.transform_constraints[0];
    constraint.mix_rotate = 0.0;
    constraint.mix_x = 0.0;
    constraint.mix_y = 0.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_rotation_x(), 10.0);
    assert_approx(skeleton.bones[1].world_x, 0.0);
}
