use crate::{
    AnimationState, AnimationStateData, AnimationStateEvent, AnimationStateListener, Error,
    Skeleton, SkeletonData, TrackEntryListener, TrackEntrySnapshot,
};
use std::cell::RefCell;
use std::rc::Rc;

const RIG_JSON: &str = r#"
{
  "skeleton": { "spine": "4.1.24" },
  "bones": [
    { "name": "root" },
    { "name": "arm", "parent": "root", "rotation": 10 },
    { "name": "hand", "parent": "root" }
  ],
  "events": { "step": {} },
  "animations": {
    "idle": {
      "bones": { "arm": { "rotate": [ { "value": 0 }, { "time": 1, "value": 0 } ] } },
      "events": [ { "time": 0.5, "name": "step" } ]
    },
    "wave": {
      "bones": { "arm": { "rotate": [ { "value": 90 }, { "time": 1, "value": 90 } ] } }
    },
    "wave2": {
      "bones": { "arm": { "rotate": [ { "value": 45 }, { "time": 1, "value": 45 } ] } }
    },
    "reach": {
      "bones": { "hand": { "translate": [ { "x": 0 }, { "time": 1, "x": 10 } ] } }
    }
  }
}
"#;

type Log = Rc<RefCell<Vec<String>>>;

/// Writes "<animation> <event>" lines, optionally prefixed.
struct Recorder {
    prefix: &'static str,
    log: Log,
}

impl Recorder {
    fn record(&self, entry: &TrackEntrySnapshot, event: &AnimationStateEvent) {
        let label = match event {
            AnimationStateEvent::Start => "start".to_string(),
            AnimationStateEvent::Interrupt => "interrupt".to_string(),
            AnimationStateEvent::End => "end".to_string(),
            AnimationStateEvent::Dispose => "dispose".to_string(),
            AnimationStateEvent::Complete => "complete".to_string(),
            AnimationStateEvent::Event(event) => format!("event {}", event.name),
        };
        self.log
            .borrow_mut()
            .push(format!("{}{} {}", self.prefix, entry.animation_name, label));
    }
}

impl AnimationStateListener for Recorder {
    fn on_event(
        &mut self,
        _state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) {
        self.record(entry, event);
    }
}

impl TrackEntryListener for Recorder {
    fn on_event(
        &mut self,
        _state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) {
        self.record(entry, event);
    }
}

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-3,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn setup() -> (AnimationState, Skeleton, Log) {
    let data = SkeletonData::from_json_str(RIG_JSON).unwrap();
    let skeleton = Skeleton::new(data.clone());
    let mut state = AnimationState::new(AnimationStateData::new(data));
    let log = Log::default();
    state.set_listener(Recorder {
        prefix: "",
        log: log.clone(),
    });
    (state, skeleton, log)
}

fn step(state: &mut AnimationState, skeleton: &mut Skeleton, delta: f32) {
    state.update(delta);
    state.apply(skeleton);
}

fn lines(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

#[test]
fn apply_poses_the_skeleton_from_the_current_entry() {
    let (mut state, mut skeleton, log) = setup();
    assert!(!state.apply(&mut skeleton));

    state.set_animation_by_name(0, "wave", true).unwrap();
    assert_eq!(lines(&log), ["wave start"]);

    state.update(0.25);
    assert!(state.apply(&mut skeleton));
    assert_approx(skeleton.bones[1].rotation, 100.0);
}

#[test]
fn looping_entry_fires_events_and_one_complete_per_loop() {
    let (mut state, mut skeleton, log) = setup();
    state.set_animation_by_name(0, "idle", true).unwrap();

    step(&mut state, &mut skeleton, 0.6);
    step(&mut state, &mut skeleton, 0.6);
    step(&mut state, &mut skeleton, 0.6);

    assert_eq!(
        lines(&log),
        [
            "idle start",
            "idle event step",
            "idle complete",
            "idle event step"
        ]
    );
}

#[test]
fn replacing_an_entry_that_never_applied_disposes_it_without_mixing() {
    let (mut state, _skeleton, log) = setup();
    state.data_mut().default_mix = 0.5;
    let idle = state.set_animation_by_name(0, "idle", false).unwrap();
    let reach = state.set_animation_by_name(0, "reach", false).unwrap();

    assert_eq!(
        lines(&log),
        [
            "idle start",
            "idle interrupt",
            "idle end",
            "idle dispose",
            "reach start"
        ]
    );
    assert!(!idle.is_valid(&state));
    // Setters on a stale handle are ignored.
    idle.set_alpha(&mut state, 0.5);

    let entry = state.track_entry(reach).unwrap();
    assert!(entry.mixing_from().is_none());
    assert_eq!(entry.mix_duration, 0.0);
}

#[test]
fn mixed_out_entry_ends_once_the_mix_completes() {
    let (mut state, mut skeleton, log) = setup();
    state
        .data_mut()
        .set_mix_by_name("idle", "reach", 0.5)
        .unwrap();
    let idle = state.set_animation_by_name(0, "idle", false).unwrap();
    step(&mut state, &mut skeleton, 0.1);

    let reach = state.set_animation_by_name(0, "reach", false).unwrap();
    let entry = state.track_entry(reach).unwrap();
    assert_eq!(entry.mix_duration, 0.5);
    assert_eq!(entry.mixing_from(), Some(idle));

    step(&mut state, &mut skeleton, 0.2);
    step(&mut state, &mut skeleton, 0.4);
    assert!(idle.is_valid(&state));

    state.update(0.1);
    assert!(!idle.is_valid(&state));
    assert!(state.track_entry(reach).unwrap().mixing_from().is_none());
    assert_eq!(
        lines(&log),
        [
            "idle start",
            "idle interrupt",
            "reach start",
            "idle end",
            "idle dispose"
        ]
    );
}

#[test]
fn queued_entry_starts_when_the_previous_one_completes() {
    let (mut state, mut skeleton, log) = setup();
    state.set_animation_by_name(0, "idle", false).unwrap();
    let reach = state.add_animation_by_name(0, "reach", false, 0.0).unwrap();
    assert_approx(state.track_entry(reach).unwrap().delay, 1.0);

    step(&mut state, &mut skeleton, 0.5);
    step(&mut state, &mut skeleton, 0.6);
    assert_ne!(state.current(0), Some(reach));

    state.update(0.1);
    assert_eq!(state.current(0), Some(reach));
    // Time past the delay carries into the promoted entry.
    assert_approx(state.track_entry(reach).unwrap().track_time, 0.2);
    assert_eq!(
        lines(&log),
        [
            "idle start",
            "idle event step",
            "idle complete",
            "idle interrupt",
            "reach start"
        ]
    );

    state.update(0.1);
    assert_eq!(&lines(&log)[5..], ["idle end", "idle dispose"]);
}

#[test]
fn queued_entries_link_back_to_the_entry_before_them() {
    let (mut state, mut skeleton, _log) = setup();
    let idle = state.set_animation_by_name(0, "idle", false).unwrap();
    let reach = state.add_animation_by_name(0, "reach", false, 0.0).unwrap();
    let wave = state.add_animation_by_name(0, "wave", false, 0.0).unwrap();

    assert!(state.track_entry(idle).unwrap().previous().is_none());
    assert_eq!(state.track_entry(reach).unwrap().previous(), Some(idle));
    assert_eq!(state.track_entry(wave).unwrap().previous(), Some(reach));
    assert_eq!(state.track_entry(idle).unwrap().next(), Some(reach));

    step(&mut state, &mut skeleton, 0.5);
    step(&mut state, &mut skeleton, 0.6);
    state.update(0.1);
    assert_eq!(state.current(0), Some(reach));
    assert!(state.track_entry(reach).unwrap().previous().is_none());
    assert_eq!(state.track_entry(wave).unwrap().previous(), Some(reach));
}

#[test]
fn add_animation_on_an_empty_track_starts_immediately() {
    let (mut state, _skeleton, log) = setup();
    let idle = state.add_animation_by_name(1, "idle", true, 0.0).unwrap();

    assert_eq!(state.current(1), Some(idle));
    assert_eq!(state.tracks().len(), 2);
    assert!(state.current(0).is_none());
    assert_eq!(lines(&log), ["idle start"]);
}

#[test]
fn empty_animation_mixes_back_to_setup_and_clears_the_track() {
    let (mut state, mut skeleton, log) = setup();
    state.set_animation_by_name(0, "wave", false).unwrap();
    step(&mut state, &mut skeleton, 0.0);
    assert_approx(skeleton.bones[1].rotation, 100.0);

    state.set_empty_animation(0, 0.5).unwrap();
    step(&mut state, &mut skeleton, 0.25);
    assert_approx(skeleton.bones[1].rotation, 55.0);

    step(&mut state, &mut skeleton, 0.3);
    assert_approx(skeleton.bones[1].rotation, 10.0);

    state.update(0.1);
    assert!(lines(&log).contains(&"wave end".to_string()));
    assert!(state.current(0).is_some());

    state.update(0.1);
    assert!(state.current(0).is_none());
}

#[test]
fn track_end_ends_a_looping_entry() {
    let (mut state, mut skeleton, log) = setup();
    let idle = state.set_animation_by_name(0, "idle", true).unwrap();
    idle.set_track_end(&mut state, 0.5);

    step(&mut state, &mut skeleton, 0.3);
    step(&mut state, &mut skeleton, 0.3);
    assert!(state.current(0).is_some());

    state.update(0.1);
    assert!(state.current(0).is_none());
    assert!(!idle.is_valid(&state));
    assert_eq!(&lines(&log)[2..], ["idle end", "idle dispose"]);
}

#[test]
fn entry_listener_hears_its_own_events_before_the_state_listener() {
    let (mut state, mut skeleton, log) = setup();
    state.set_animation_by_name(0, "idle", false).unwrap();
    let reach = state.add_animation_by_name(0, "reach", false, 0.0).unwrap();
    reach.set_listener(
        &mut state,
        Recorder {
            prefix: "entry: ",
            log: log.clone(),
        },
    );

    step(&mut state, &mut skeleton, 0.5);
    step(&mut state, &mut skeleton, 0.6);
    state.update(0.1);

    let log = lines(&log);
    let entry_lines: Vec<_> = log.iter().filter(|line| line.starts_with("entry: ")).collect();
    assert_eq!(entry_lines, ["entry: reach start"]);
    assert_eq!(&log[log.len() - 2..], ["entry: reach start", "reach start"]);
}

#[test]
fn time_scale_speeds_up_updates() {
    let (mut state, _skeleton, _log) = setup();
    let idle = state.set_animation_by_name(0, "idle", true).unwrap();
    state.set_time_scale(2.0);
    idle.set_time_scale(&mut state, 0.5);
    state.update(0.25);
    assert_approx(state.track_entry(idle).unwrap().track_time, 0.25);
}

#[test]
fn invalid_names_and_mix_durations_are_rejected() {
    let (mut state, _skeleton, _log) = setup();
    assert!(matches!(
        state.set_animation_by_name(0, "missing", false),
        Err(Error::UnknownAnimation { .. })
    ));
    assert!(matches!(
        state.data_mut().set_mix_by_name("idle", "missing", 0.2),
        Err(Error::UnknownAnimation { .. })
    ));
    assert!(matches!(
        state.data_mut().set_mix_by_name("idle", "wave", -1.0),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        state.set_empty_animation(0, -0.5),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        state.add_empty_animation(0, f32::NAN, 0.0),
        Err(Error::InvalidValue { .. })
    ));
    assert!(state.current(0).is_none());
}

#[test]
fn clear_tracks_ends_every_entry() {
    let (mut state, mut skeleton, log) = setup();
    state.set_animation_by_name(0, "idle", true).unwrap();
    state.set_animation_by_name(1, "reach", true).unwrap();
    step(&mut state, &mut skeleton, 0.1);

    state.clear_tracks();
    assert!(state.tracks().is_empty());
    assert_eq!(
        &lines(&log)[2..],
        ["idle end", "idle dispose", "reach end", "reach dispose"]
    );
}

#[test]
fn interrupted_mix_fades_the_oldest_entry_with_the_newest_mix() {
    let (mut state, mut skeleton, _log) = setup();
    state
        .data_mut()
        .set_mix_by_name("wave", "wave2", 1.0)
        .unwrap();
    state
        .data_mut()
        .set_mix_by_name("wave2", "reach", 1.0)
        .unwrap();

    let wave = state.set_animation_by_name(0, "wave", false).unwrap();
    step(&mut state, &mut skeleton, 0.1);
    let wave2 = state.set_animation_by_name(0, "wave2", false).unwrap();
    step(&mut state, &mut skeleton, 0.1);
    let reach = state.set_animation_by_name(0, "reach", false).unwrap();
    assert_eq!(state.track_entry(reach).unwrap().mixing_from(), Some(wave2));
    assert_eq!(state.track_entry(wave2).unwrap().mixing_from(), Some(wave));

    // "wave" keeps the arm while "wave2" mixes in, but "reach" does not key the arm, so "wave"
    // fades out with the reach mix: halfway through it holds half of its 90 degrees.
    step(&mut state, &mut skeleton, 0.5);
    assert_approx(skeleton.bones[1].rotation, 55.0);
}

#[test]
fn hold_previous_keeps_the_previous_pose_during_the_mix() {
    fn rotation_halfway(hold_previous: bool) -> f32 {
        let (mut state, mut skeleton, _log) = setup();
        state
            .data_mut()
            .set_mix_by_name("wave", "reach", 1.0)
            .unwrap();
        state.set_animation_by_name(0, "wave", false).unwrap();
        step(&mut state, &mut skeleton, 0.1);

        let reach = state.set_animation_by_name(0, "reach", false).unwrap();
        reach.set_hold_previous(&mut state, hold_previous);
        step(&mut state, &mut skeleton, 0.5);
        skeleton.bones[1].rotation
    }

    assert_approx(rotation_halfway(true), 100.0);
    assert_approx(rotation_halfway(false), 55.0);
}
