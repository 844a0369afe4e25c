use super::animation::sequence_frame;
use crate::{Event, MixBlend, MixDirection, SequenceMode, Skeleton, SkeletonData};
use std::sync::Arc;

const RIG_JSON: &str = r#"
{
  "skeleton": { "spine": "4.1.24" },
  "bones": [
    { "name": "root" },
    { "name": "arm", "parent": "root", "rotation": 10, "scaleX": 2, "length": 5 },
    { "name": "target", "parent": "root", "x": 5 }
  ],
  "slots": [
    { "name": "body", "bone": "root", "attachment": "a" },
    { "name": "mesh", "bone": "root", "attachment": "mesh" },
    { "name": "other", "bone": "root" }
  ],
  "ik": [ { "name": "aim", "bones": ["arm"], "target": "target" } ],
  "skins": [
    {
      "name": "default",
      "attachments": {
        "body": {
          "a": { "width": 2, "height": 2 },
          "b": { "width": 4, "height": 4 }
        },
        "mesh": {
          "mesh": {
            "type": "mesh",
            "uvs": [0, 0, 1, 0, 1, 1],
            "triangles": [0, 1, 2],
            "vertices": [0, 0, 10, 0, 10, 10],
            "hull": 3
          }
        }
      }
    }
  ],
  "events": { "hit": {} },
  "animations": {
    "turn": {
      "bones": {
        "arm": {
          "rotate": [ { "value": 0 }, { "time": 1, "value": 90 } ],
          "scale": [ { "x": 1.5, "y": 1 } ]
        }
      }
    },
    "late": {
      "bones": { "arm": { "rotate": [ { "time": 0.5, "value": 40 } ] } }
    },
    "swap": {
      "slots": {
        "body": {
          "attachment": [ { "name": "b" }, { "time": 1, "name": null } ],
          "rgba": [ { "color": "ffffffff" }, { "time": 1, "color": "00000000" } ]
        }
      }
    },
    "bend": {
      "attachments": {
        "default": {
          "mesh": { "mesh": { "deform": [ { "time": 0 }, { "time": 1, "vertices": [2, 2] } ] } }
        }
      }
    },
    "order": {
      "drawOrder": [ { "time": 0, "offsets": [ { "slot": "body", "offset": 2 } ] }, { "time": 1 } ]
    },
    "beats": {
      "bones": { "arm": { "rotate": [ { "time": 1, "value": 0 } ] } },
      "events": [ { "time": 0.2, "name": "hit" }, { "time": 0.8, "name": "hit", "int": 2 } ]
    },
    "relax": {
      "ik": { "aim": [ { "mix": 0.25, "bendPositive": false } ] }
    }
  }
}
"#;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-3,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn skeleton() -> Skeleton {
    Skeleton::new(SkeletonData::from_json_str(RIG_JSON).unwrap())
}

fn apply(skeleton: &mut Skeleton, name: &str, time: f32, alpha: f32, blend: MixBlend) {
    let data = Arc::clone(&skeleton.data);
    let animation = data.find_animation(name).unwrap();
    animation.apply(skeleton, -1.0, time, false, None, alpha, blend, MixDirection::In);
}

#[test]
fn rotate_values_are_relative_to_setup() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "turn", 0.5, 1.0, MixBlend::Setup);
    assert_approx(skeleton.bones[1].rotation, 55.0);

    apply(&mut skeleton, "turn", 0.5, 0.5, MixBlend::Setup);
    assert_approx(skeleton.bones[1].rotation, 32.5);
}

#[test]
fn add_blend_accumulates_on_current_pose() {
    let mut skeleton = skeleton();
    skeleton.bones[1].rotation = 20.0;
    apply(&mut skeleton, "turn", 1.0, 0.5, MixBlend::Add);
    assert_approx(skeleton.bones[1].rotation, 65.0);
}

#[test]
fn before_first_key_depends_on_blend() {
    let mut skeleton = skeleton();
    skeleton.bones[1].rotation = 77.0;
    apply(&mut skeleton, "late", 0.2, 1.0, MixBlend::Replace);
    assert_approx(skeleton.bones[1].rotation, 77.0);

    apply(&mut skeleton, "late", 0.2, 0.5, MixBlend::First);
    assert_approx(skeleton.bones[1].rotation, 43.5);

    apply(&mut skeleton, "late", 0.2, 1.0, MixBlend::Setup);
    assert_approx(skeleton.bones[1].rotation, 10.0);

    apply(&mut skeleton, "late", 0.7, 1.0, MixBlend::Setup);
    assert_approx(skeleton.bones[1].rotation, 50.0);
}

#[test]
fn scale_keys_multiply_setup_scale() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "turn", 0.0, 1.0, MixBlend::Setup);
    assert_approx(skeleton.bones[1].scale_x, 3.0);
    assert_approx(skeleton.bones[1].scale_y, 1.0);
}

#[test]
fn attachment_and_color_timelines_drive_the_slot() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "swap", 0.5, 1.0, MixBlend::Setup);
    assert_eq!(skeleton.slots[0].attachment_name(), Some("b"));
    for channel in skeleton.slots[0].color {
        assert_approx(channel, 0.5);
    }

    apply(&mut skeleton, "swap", 1.0, 1.0, MixBlend::Setup);
    assert_eq!(skeleton.slots[0].attachment_name(), None);
    assert_eq!(skeleton.slots[0].color, [0.0; 4]);
}

#[test]
fn mixing_out_an_attachment_restores_setup() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "swap", 0.5, 1.0, MixBlend::Setup);

    let data = Arc::clone(&skeleton.data);
    let swap = data.find_animation("swap").unwrap();
    swap.apply(&mut skeleton, -1.0, 0.5, false, None, 0.0, MixBlend::Setup, MixDirection::Out);
    assert_eq!(skeleton.slots[0].attachment_name(), Some("a"));
}

#[test]
fn deform_interpolates_absolute_vertices() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "bend", 0.5, 1.0, MixBlend::Setup);
    assert_eq!(skeleton.slots[1].deform.len(), 6);
    let expected = [1.0, 1.0, 10.0, 0.0, 10.0, 10.0];
    for (actual, expected) in skeleton.slots[1].deform.iter().zip(expected) {
        assert_approx(*actual, expected);
    }

    // Clearing the attachment drops the deform.
    skeleton.set_attachment("mesh", None).unwrap();
    assert!(skeleton.slots[1].deform.is_empty());
}

#[test]
fn draw_order_keys_reorder_and_reset() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "order", 0.5, 1.0, MixBlend::Setup);
    assert_eq!(skeleton.draw_order, vec![1, 2, 0]);

    apply(&mut skeleton, "order", 1.0, 1.0, MixBlend::Setup);
    assert_eq!(skeleton.draw_order, vec![0, 1, 2]);
}

#[test]
fn events_fire_within_the_applied_window() {
    let mut skeleton = skeleton();
    let data = Arc::clone(&skeleton.data);
    let beats = data.find_animation("beats").unwrap();

    let mut fired: Vec<Event> = Vec::new();
    beats.apply(&mut skeleton, 0.0, 0.5, false, Some(&mut fired), 1.0, MixBlend::Setup, MixDirection::In);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].time, 0.2);

    fired.clear();
    beats.apply(&mut skeleton, 0.5, 0.9, false, Some(&mut fired), 1.0, MixBlend::Setup, MixDirection::In);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].int_value, 2);
}

#[test]
fn looped_apply_fires_events_across_the_wrap() {
    let mut skeleton = skeleton();
    let data = Arc::clone(&skeleton.data);
    let beats = data.find_animation("beats").unwrap();

    let mut fired = Vec::new();
    beats.apply(&mut skeleton, 0.5, 1.3, true, Some(&mut fired), 1.0, MixBlend::Setup, MixDirection::In);
    let times = fired.iter().map(|e| e.time).collect::<Vec<_>>();
    assert_eq!(times, vec![0.8, 0.2]);
}

#[test]
fn ik_timeline_sets_constraint_values() {
    let mut skeleton = skeleton();
    apply(&mut skeleton, "relax", 0.0, 1.0, MixBlend::Setup);
    assert_approx(skeleton.ik_constraints[0].mix, 0.25);
    assert_eq!(skeleton.ik_constraints[0].bend_direction, -1);
}

#[test]
fn sequence_modes_pick_frames() {
    assert_eq!(sequence_frame(SequenceMode::Hold, 1, 3, 5.0, 0.1), 1);
    assert_eq!(sequence_frame(SequenceMode::Once, 0, 3, 0.45, 0.1), 2);
    assert_eq!(sequence_frame(SequenceMode::Loop, 0, 3, 0.25, 0.1), 2);
    assert_eq!(sequence_frame(SequenceMode::Loop, 0, 3, 0.35, 0.1), 0);
    assert_eq!(sequence_frame(SequenceMode::PingPong, 0, 3, 0.35, 0.1), 1);
    assert_eq!(sequence_frame(SequenceMode::OnceReverse, 0, 3, 0.0, 0.1), 2);
    assert_eq!(sequence_frame(SequenceMode::LoopReverse, 0, 3, 0.15, 0.1), 1);
}
