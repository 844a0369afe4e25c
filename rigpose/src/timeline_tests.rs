use crate::timeline::search;
use crate::{
    Animation, BONE1_ENTRIES, BONE2_ENTRIES, BoneTimeline, CurveTimeline, Sequence, Timeline,
};

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-3,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn two_key_curve(v0: f32, v1: f32, bezier_count: usize) -> CurveTimeline {
    let mut curve = CurveTimeline::new(2, bezier_count, BONE1_ENTRIES);
    curve.set_frame(0, 0.0, &[v0]);
    curve.set_frame(1, 1.0, &[v1]);
    curve
}

#[test]
fn search_returns_last_frame_at_or_before_time() {
    let frames = [0.0, 1.0, 2.0];
    assert_eq!(search(&frames, -1.0, 1), 0);
    assert_eq!(search(&frames, 0.0, 1), 0);
    assert_eq!(search(&frames, 1.5, 1), 1);
    assert_eq!(search(&frames, 2.0, 1), 2);
    assert_eq!(search(&frames, 9.0, 1), 2);

    let strided = [0.0, 10.0, 1.0, 20.0];
    assert_eq!(search(&strided, 0.5, 2), 0);
    assert_eq!(search(&strided, 1.5, 2), 2);
}

#[test]
fn linear_curve_interpolates_between_keys() {
    let curve = two_key_curve(0.0, 10.0, 0);
    assert_approx(curve.curve_value(0.0), 0.0);
    assert_approx(curve.curve_value(0.25), 2.5);
    assert_approx(curve.curve_value(1.0), 10.0);
    assert_approx(curve.curve_value(3.0), 10.0);
}

#[test]
fn stepped_curve_holds_previous_key() {
    let mut curve = two_key_curve(0.0, 10.0, 0);
    curve.set_stepped(0);
    assert_approx(curve.curve_value(0.99), 0.0);
    assert_approx(curve.curve_value(1.0), 10.0);
}

#[test]
fn bezier_curve_hits_keys_exactly_and_is_symmetric() {
    let mut curve = two_key_curve(0.0, 10.0, 1);
    curve.set_bezier(0, 0, 0, 0.0, 0.0, 0.25, 0.0, 0.75, 10.0, 1.0, 10.0);

    assert_eq!(curve.curve_value(0.0), 0.0);
    assert_eq!(curve.curve_value(1.0), 10.0);
    assert_approx(curve.curve_value(0.5), 5.0);
    // Ease in: slower than linear early on.
    assert!(curve.curve_value(0.2) < 2.0);
}

#[test]
fn bezier_tables_for_second_value_follow_the_first() {
    let mut curve = CurveTimeline::new(2, 2, BONE2_ENTRIES);
    curve.set_frame(0, 0.0, &[0.0, 0.0]);
    curve.set_frame(1, 1.0, &[10.0, 100.0]);
    curve.set_bezier(0, 0, 0, 0.0, 0.0, 0.25, 0.0, 0.75, 10.0, 1.0, 10.0);
    curve.set_bezier(1, 0, 1, 0.0, 0.0, 1.0 / 3.0, 100.0 / 3.0, 2.0 / 3.0, 200.0 / 3.0, 1.0, 100.0);

    let [x, y] = curve.curve_values::<2>(0.5);
    assert_approx(x, 5.0);
    // Control points on the straight line keep the second value linear.
    assert_approx(y, 50.0);
}

#[test]
fn curve_percent_spans_zero_to_one() {
    let mut curve = CurveTimeline::new(2, 0, 1);
    curve.set_frame(0, 0.0, &[]);
    curve.set_frame(1, 2.0, &[]);
    assert_approx(curve.curve_percent(0.0, 0), 0.0);
    assert_approx(curve.curve_percent(1.0, 0), 0.5);
    curve.set_stepped(0);
    assert_approx(curve.curve_percent(1.0, 0), 0.0);
}

#[test]
fn shrink_drops_unused_bezier_storage() {
    let mut curve = CurveTimeline::new(3, 4, BONE1_ENTRIES);
    let full = curve.curves().len();
    curve.shrink(1);
    assert!(curve.curves().len() < full);
    assert_eq!(curve.curves().len(), 3 + crate::BEZIER_SIZE);
}

#[test]
fn animation_tracks_property_ids_of_its_timelines() {
    let translate = Timeline::Translate(BoneTimeline {
        bone_index: 2,
        curve: two_key_curve(0.0, 1.0, 0),
    });
    let translate_x = Timeline::TranslateX(BoneTimeline {
        bone_index: 2,
        curve: two_key_curve(0.0, 1.0, 0),
    });
    let rotate_other_bone = Timeline::Rotate(BoneTimeline {
        bone_index: 3,
        curve: two_key_curve(0.0, 1.0, 0),
    });

    let animation = Animation::new("walk", vec![translate], 1.0);
    assert!(animation.has_timeline(&translate_x.property_ids()));
    assert!(!animation.has_timeline(&rotate_other_bone.property_ids()));
    assert_eq!(animation.timelines[0].duration(), 1.0);
}

#[test]
fn sequence_resolves_setup_index_and_formats_paths() {
    let sequence = Sequence {
        id: 0,
        count: 4,
        start: 1,
        digits: 2,
        setup_index: 2,
    };
    assert_eq!(sequence.resolve_index(-1), 2);
    assert_eq!(sequence.resolve_index(1), 1);
    assert_eq!(sequence.resolve_index(9), 3);
    assert_eq!(sequence.path("run", 2), "run03");
}
