use crate::json::SkeletonJson;
use crate::{
    Attachment, BlendMode, Error, MeshVertices, PositionMode, SkeletonData, SpacingMode, Timeline,
    TransformMode,
};

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-3,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

const RIG_JSON: &str = r#"
{
  "skeleton": { "hash": "abc", "spine": "4.1.24", "x": -10, "y": -5, "width": 20, "height": 30 },
  "bones": [
    { "name": "root" },
    { "name": "hip", "parent": "root", "x": 10, "y": 20, "rotation": 90, "length": 5 },
    { "name": "knee", "parent": "hip", "x": 5, "transform": "noScale" },
    { "name": "target", "parent": "root", "x": 3, "skin": true }
  ],
  "slots": [
    { "name": "body", "bone": "hip", "attachment": "body", "color": "ff000080" },
    { "name": "leg", "bone": "knee", "attachment": "leg", "dark": "00ff00", "blend": "additive" },
    { "name": "path", "bone": "root", "attachment": "path" }
  ],
  "ik": [
    { "name": "leg-ik", "order": 2, "bones": ["hip", "knee"], "target": "target", "bendPositive": false, "softness": 2 }
  ],
  "transform": [
    { "name": "follow", "order": 1, "bones": ["knee"], "target": "target", "x": 4, "mixRotate": 0.5, "mixX": 0.25 }
  ],
  "path": [
    { "name": "along", "bones": ["knee"], "target": "path", "positionMode": "fixed", "spacingMode": "percent", "position": 7, "spacing": 0.5 }
  ],
  "skins": [
    {
      "name": "default",
      "attachments": {
        "body": {
          "body": { "x": 1, "y": 2, "width": 4, "height": 6, "sequence": { "count": 3, "setup": 1 } }
        },
        "leg": {
          "leg": {
            "type": "mesh",
            "uvs": [0, 0, 1, 0, 1, 1],
            "triangles": [0, 1, 2],
            "vertices": [0, 0, 10, 0, 10, 10],
            "hull": 3
          },
          "leg-weighted": {
            "type": "mesh",
            "uvs": [0, 0, 1, 0, 1, 1],
            "triangles": [0, 1, 2],
            "vertices": [1, 1, 0, 0, 1, 1, 1, 10, 0, 1, 2, 1, 5, 5, 0.5, 2, 0, 0, 0.5]
          }
        },
        "path": {
          "path": { "type": "path", "vertexCount": 6, "lengths": [10, 20], "vertices": [0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5] }
        }
      }
    },
    {
      "name": "alt",
      "bones": ["target"],
      "attachments": {
        "leg": {
          "leg": { "type": "linkedmesh", "parent": "leg", "skin": "default" },
          "leg-own": { "type": "linkedmesh", "parent": "leg", "timelines": false }
        }
      }
    }
  ],
  "events": {
    "step": { "int": 1, "string": "left" },
    "sound": { "audio": "step.ogg", "volume": 0.5 }
  },
  "animations": {
    "walk": {
      "bones": {
        "hip": {
          "rotate": [
            { "value": 0, "curve": [0.25, 0, 0.75, 90] },
            { "time": 1, "value": 90 }
          ],
          "translate": [
            { "x": 1, "curve": "stepped" },
            { "time": 0.5, "y": 2 }
          ]
        }
      },
      "slots": {
        "body": {
          "rgba": [ { "color": "ffffffff" }, { "time": 1, "color": "00000000" } ],
          "attachment": [ { "time": 0.5, "name": null } ]
        }
      },
      "ik": { "leg-ik": [ { "mix": 0.5 }, { "time": 2 } ] },
      "attachments": {
        "default": {
          "leg": { "leg": { "deform": [ { "time": 0 }, { "time": 1, "offset": 2, "vertices": [1, 1] } ] } },
          "body": { "body": { "sequence": [ { "mode": "loop", "delay": 0.1 } ] } }
        }
      },
      "drawOrder": [
        { "time": 0.25, "offsets": [ { "slot": "body", "offset": 2 } ] },
        { "time": 0.75 }
      ],
      "events": [
        { "time": 0.5, "name": "step", "string": "right" },
        { "time": 0.1, "name": "sound", "balance": -1 }
      ]
    }
  }
}
"#;

#[test]
fn loads_setup_data_with_defaults() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();

    assert_eq!(data.hash.as_deref(), Some("abc"));
    assert_eq!(data.version.as_deref(), Some("4.1.24"));
    assert_eq!(data.bones.len(), 4);
    assert_eq!(data.bones[2].parent, Some(1));
    assert_eq!(data.bones[2].transform_mode, TransformMode::NoScale);
    assert_eq!(data.bones[1].scale_x, 1.0);
    assert!(data.bones[3].skin_required);

    let body = &data.slots[0];
    assert_eq!(body.attachment.as_deref(), Some("body"));
    assert_approx(body.color[0], 1.0);
    assert_approx(body.color[3], 128.0 / 255.0);
    let leg = &data.slots[1];
    assert!(leg.has_dark);
    assert_approx(leg.dark_color[1], 1.0);
    assert_eq!(leg.blend, BlendMode::Additive);

    let ik = &data.ik_constraints[0];
    assert_eq!(ik.bones, vec![1, 2]);
    assert_eq!(ik.bend_direction, -1);
    assert_eq!(ik.order, 2);
    assert_eq!(ik.mix, 1.0);

    let follow = &data.transform_constraints[0];
    assert_eq!(follow.mix_rotate, 0.5);
    assert_eq!(follow.mix_x, 0.25);
    assert_eq!(follow.mix_y, 0.25);
    assert_eq!(follow.mix_scale_x, 1.0);

    let along = &data.path_constraints[0];
    assert_eq!(along.target, 2);
    assert_eq!(along.position_mode, PositionMode::Fixed);
    assert_eq!(along.spacing_mode, SpacingMode::Percent);

    assert_eq!(data.default_skin, Some(0));
    assert_eq!(data.skins[1].bones, vec![3]);
}

#[test]
fn scale_applies_to_lengths_and_translations_only() {
    let data = SkeletonData::from_json_str_with_scale(RIG_JSON, 2.0).unwrap();

    assert_eq!(data.bones[1].x, 20.0);
    assert_eq!(data.bones[1].length, 10.0);
    assert_eq!(data.bones[1].rotation, 90.0);
    assert_eq!(data.ik_constraints[0].softness, 4.0);
    assert_eq!(data.transform_constraints[0].offset_x, 8.0);
    // Fixed position scales, percent spacing does not.
    assert_eq!(data.path_constraints[0].position, 14.0);
    assert_eq!(data.path_constraints[0].spacing, 0.5);

    let Some(Attachment::Path(path)) = data.skins[0].attachment(2, "path") else {
        panic!("expected path attachment");
    };
    assert_eq!(path.lengths, vec![20.0, 40.0]);
}

#[test]
fn reads_region_mesh_and_weighted_vertices() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let skin = &data.skins[0];

    let Some(Attachment::Region(region)) = skin.attachment(0, "body") else {
        panic!("expected region attachment");
    };
    assert_eq!(region.path, "body");
    assert_eq!((region.width, region.height), (4.0, 6.0));
    // Bottom-left corner: centre offset by half the size.
    assert_approx(region.offset[0], 1.0 - 2.0);
    assert_approx(region.offset[1], 2.0 - 3.0);
    let sequence = region.sequence.as_ref().unwrap();
    assert_eq!((sequence.count, sequence.start, sequence.setup_index), (3, 1, 1));

    let Some(Attachment::Mesh(mesh)) = skin.attachment(1, "leg") else {
        panic!("expected mesh attachment");
    };
    assert_eq!(mesh.hull_length, 6);
    assert_eq!(mesh.triangles, vec![0, 1, 2]);
    assert!(matches!(&mesh.vertex.vertices, MeshVertices::Unweighted(v) if v.len() == 3));

    let Some(Attachment::Mesh(weighted)) = skin.attachment(1, "leg-weighted") else {
        panic!("expected mesh attachment");
    };
    let MeshVertices::Weighted(vertices) = &weighted.vertex.vertices else {
        panic!("expected weighted vertices");
    };
    assert_eq!(vertices.len(), 3);
    assert_eq!(vertices[2].len(), 2);
    assert_eq!(vertices[2][1].bone, 2);
    assert_eq!(weighted.vertex.vertices.deform_length(), 8);
}

#[test]
fn linked_meshes_copy_parent_geometry_and_share_timelines_when_asked() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let Some(Attachment::Mesh(parent)) = data.skins[0].attachment(1, "leg") else {
        panic!("expected parent mesh");
    };
    let Some(Attachment::Mesh(linked)) = data.skins[1].attachment(1, "leg") else {
        panic!("expected linked mesh");
    };
    let Some(Attachment::Mesh(own)) = data.skins[1].attachment(1, "leg-own") else {
        panic!("expected linked mesh");
    };

    assert_eq!(linked.parent_mesh.as_deref(), Some("leg"));
    assert_eq!(linked.triangles, parent.triangles);
    assert_eq!(linked.vertex.vertices.vertex_count(), 3);
    assert_ne!(linked.vertex.id, parent.vertex.id);
    assert_eq!(linked.vertex.timeline_attachment, parent.vertex.id);
    assert_eq!(own.vertex.timeline_attachment, own.vertex.id);
}

#[test]
fn reads_animation_timelines() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let walk = data.find_animation("walk").unwrap();
    assert_eq!(walk.duration, 2.0);

    let rotate = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::Rotate(t) => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(rotate.bone_index, 1);
    assert_eq!(rotate.curve.curve_value(0.0), 0.0);
    assert_eq!(rotate.curve.curve_value(1.0), 90.0);
    assert_approx(rotate.curve.curve_value(0.5), 45.0);

    let translate = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::Translate(t) => Some(t),
            _ => None,
        })
        .unwrap();
    // Stepped: holds the first key, whose missing y defaults to 0.
    assert_eq!(translate.curve.curve_values::<2>(0.4), [1.0, 0.0]);
    assert_eq!(translate.curve.curve_values::<2>(0.5), [0.0, 2.0]);

    let ik = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::IkConstraint(t) => Some(t),
            _ => None,
        })
        .unwrap();
    // mix, softness, bend, compress, stretch.
    assert_eq!(&ik.curve.frames()[..6], &[0.0, 0.5, 0.0, 1.0, 0.0, 0.0]);
    assert_eq!(ik.curve.frames()[7], 1.0);

    let attachment = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::Attachment(t) => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(attachment.attachment_names, vec![None]);

    assert!(walk.timelines.iter().any(|t| matches!(t, Timeline::Rgba(_))));
    assert!(walk.timelines.iter().any(|t| matches!(t, Timeline::Sequence(_))));
}

#[test]
fn deform_frames_store_absolute_positions_for_unweighted_meshes() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let walk = data.find_animation("walk").unwrap();
    let deform = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::Deform(t) => Some(t),
            _ => None,
        })
        .unwrap();
    let Some(Attachment::Mesh(mesh)) = data.skins[0].attachment(1, "leg") else {
        panic!("expected mesh");
    };

    assert_eq!(deform.attachment, mesh.vertex.id);
    assert_eq!(deform.vertices[0], vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0]);
    assert_eq!(deform.vertices[1], vec![0.0, 0.0, 11.0, 1.0, 10.0, 10.0]);
}

#[test]
fn draw_order_keys_map_positions_to_setup_slots() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let walk = data.find_animation("walk").unwrap();
    let draw_order = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::DrawOrder(t) => Some(t),
            _ => None,
        })
        .unwrap();

    assert_eq!(draw_order.frames, vec![0.25, 0.75]);
    assert_eq!(draw_order.draw_orders[0], Some(vec![1, 2, 0]));
    assert_eq!(draw_order.draw_orders[1], None);
}

#[test]
fn events_use_data_defaults_and_key_overrides() {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let sound = &data.events[data.find_event("sound").unwrap()];
    assert_eq!(sound.audio_path, "step.ogg");
    assert_eq!(sound.volume, 0.5);

    let walk = data.find_animation("walk").unwrap();
    let events = walk
        .timelines
        .iter()
        .find_map(|t| match t {
            Timeline::Event(t) => Some(t),
            _ => None,
        })
        .unwrap();

    assert_eq!(events.frames, vec![0.1, 0.5]);
    assert_eq!(events.events[0].name, "sound");
    assert_eq!(events.events[0].balance, -1.0);
    assert_eq!(events.events[0].volume, 0.5);
    assert_eq!(events.events[1].name, "step");
    assert_eq!(events.events[1].int_value, 1);
    assert_eq!(events.events[1].string, "right");
}

#[test]
fn one_loader_never_reuses_attachment_ids() {
    let mut loader = SkeletonJson::new();
    let first = loader.read_skeleton_data(RIG_JSON).unwrap();
    let second = loader.read_skeleton_data(RIG_JSON).unwrap();

    let id = |data: &SkeletonData| match data.skins[0].attachment(1, "leg") {
        Some(Attachment::Mesh(mesh)) => mesh.vertex.id,
        _ => panic!("expected mesh"),
    };
    assert_ne!(id(first.as_ref()), id(second.as_ref()));
}

#[test]
fn rejects_unknown_parent_bone() {
    let json = r#"{ "bones": [ { "name": "a", "parent": "missing" } ] }"#;
    let err = SkeletonData::from_json_str(json).unwrap_err();
    assert!(matches!(err, Error::JsonUnknownBoneParent { .. }), "{err}");
}

#[test]
fn rejects_invalid_colors_and_versions() {
    let bad_color = r#"{
      "bones": [ { "name": "root" } ],
      "slots": [ { "name": "s", "bone": "root", "color": "zz0000ff" } ]
    }"#;
    let err = SkeletonData::from_json_str(bad_color).unwrap_err();
    assert!(matches!(err, Error::JsonInvalidColor { .. }), "{err}");

    let old = r#"{ "skeleton": { "spine": "3.8.99" }, "bones": [ { "name": "root" } ] }"#;
    let err = SkeletonData::from_json_str(old).unwrap_err();
    assert!(matches!(err, Error::JsonVersion { .. }), "{err}");
}

#[test]
fn rejects_bezier_with_too_few_numbers() {
    let json = r#"{
      "bones": [ { "name": "root" } ],
      "animations": {
        "a": { "bones": { "root": { "translate": [
          { "x": 0, "curve": [0.25, 0, 0.75, 1] },
          { "time": 1, "x": 1 }
        ] } } }
      }
    }"#;
    let err = SkeletonData::from_json_str(json).unwrap_err();
    assert!(matches!(err, Error::JsonInvalidCurve { .. }), "{err}");
}

#[test]
fn rejects_unknown_references_in_animations() {
    let json = r#"{
      "bones": [ { "name": "root" } ],
      "animations": { "a": { "bones": { "ghost": { "rotate": [ { "value": 1 } ] } } } }
    }"#;
    let err = SkeletonData::from_json_str(json).unwrap_err();
    assert!(
        matches!(err, Error::JsonUnknownReference { kind: "bone", .. }),
        "{err}"
    );
}
