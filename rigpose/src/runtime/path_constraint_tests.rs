use crate::{Skeleton, SkeletonData};

// A straight vertical path from (0, 0) to (0, 100) with handles on the line, so arc length and
// curve parameter agree.
const TEMPLATE: &str = r#"
{
  "skeleton": { "spine": "4.1.24" },
  "bones": [
    { "name": "root" },
    { "name": "first", "parent": "root", "length": 10 },
    { "name": "second", "parent": "first", "length": 10, "x": 10 }
  ],
  "slots": [
    { "name": "path", "bone": "root", "attachment": "path" }
  ],
  "path": [ CONSTRAINT ],
  "skins": [
    {
      "name": "default",
      "attachments": {
        "path": {
          "path": {
            "type": "path",
            "constantSpeed": CONSTANT_SPEED,
            "vertexCount": 6,
            "lengths": [100],
            "vertices": [0, -10, 0, 0, 0, 33.333333, 0, 66.666667, 0, 100, 0, 110]
          }
        }
      }
    }
  ]
}
"#;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-2,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn skeleton(constraint: &str, constant_speed: bool) -> Skeleton {
    let json = TEMPLATE
        .replace("CONSTRAINT", constraint)
        .replace("CONSTANT_SPEED", &constant_speed.to_string());
    Skeleton::new(SkeletonData::from_json_str(&json).unwrap())
}

const FIXED_TANGENT: &str = r#"{
  "name": "along", "bones": ["first"], "target": "path",
  "positionMode": "fixed", "spacingMode": "length", "rotateMode": "tangent",
  "position": 50, "mixRotate": 1, "mixX": 1
}"#;

#[test]
fn fixed_position_places_bone_on_path_with_tangent_rotation() {
    let mut skeleton = skeleton(FIXED_TANGENT, true);
    skeleton.update_world_transform();

    let bone = &skeleton.bones[1];
    assert_approx(bone.world_x, 0.0);
    assert_approx(bone.world_y, 50.0);
    assert_approx(bone.world_rotation_x(), 90.0);
}

#[test]
fn percent_position_scales_by_path_length() {
    let constraint = r#"{
      "name": "along", "bones": ["first"], "target": "path",
      "position": 0.25, "mixRotate": 1, "mixX": 1
    }"#;
    let mut skeleton = skeleton(constraint, true);
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_y, 25.0);
}

#[test]
fn non_constant_speed_uses_curve_parameter() {
    let mut skeleton = skeleton(FIXED_TANGENT, false);
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_x, 0.0);
    assert_approx(skeleton.bones[1].world_y, 50.0);
}

#[test]
fn position_past_the_end_extends_along_the_last_tangent() {
    let mut skeleton = skeleton(FIXED_TANGENT, true);
    skeleton.path_constraints[0].position = 120.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_x, 0.0);
    assert_approx(skeleton.bones[1].world_y, 120.0);
}

#[test]
fn chain_spaces_bones_by_their_length() {
    let constraint = r#"{
      "name": "along", "bones": ["first", "second"], "target": "path",
      "positionMode": "fixed", "spacingMode": "length", "rotateMode": "chain",
      "position": 30, "mixRotate": 1, "mixX": 1
    }"#;
    let mut skeleton = skeleton(constraint, true);
    skeleton.update_world_transform();

    let first = &skeleton.bones[1];
    assert_approx(first.world_y, 30.0);
    assert_approx(first.world_rotation_x(), 90.0);
    let second = &skeleton.bones[2];
    assert_approx(second.world_x, 0.0);
    assert_approx(second.world_y, 40.0);
    assert_approx(second.world_rotation_x(), 90.0);
}

#[test]
fn partial_translate_mix_moves_part_way() {
    let mut skeleton = skeleton(FIXED_TANGENT, true);
    skeleton.path_constraints[0].mix_x = 0.5;
    skeleton.path_constraints[0].mix_y = 0.5;
    skeleton.path_constraints[0].mix_rotate = 0.0;
    skeleton.update_world_transform();

    assert_approx(skeleton.bones[1].world_y, 25.0);
    assert_approx(skeleton.bones[1].world_rotation_x(), 0.0);
}

#[test]
fn zero_mix_or_missing_path_leaves_bones_alone() {
    let mut skeleton = skeleton(FIXED_TANGENT, true);
    skeleton.set_attachment("path", None).unwrap();
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_y, 0.0);

    skeleton.set_to_setup_pose();
    skeleton.path_constraints[0].mix_rotate = 0.0;
    skeleton.path_constraints[0].mix_x = 0.0;
    skeleton.path_constraints[0].mix_y = 0.0;
    skeleton.update_world_transform();
    assert_approx(skeleton.bones[1].world_y, 0.0);
}
