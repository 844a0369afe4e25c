use crate::runtime::animation::{apply_attachment_tracked, apply_rotate_mixed, ATTACHMENT_SETUP};
use crate::runtime::{MixBlend, MixDirection, Skeleton};
use crate::{Animation, Error, Event, SkeletonData, Timeline};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimelineMode {
    /// Another entry earlier in apply order already keys the property.
    Subsequent,
    /// First to key the property; mixes out from the setup pose.
    First,
    /// Held at full alpha because the entry mixing in keys the property too.
    HoldSubsequent,
    HoldFirst,
    /// Held until the named later entry has mixed in.
    HoldMix,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct EntryId {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
struct EntrySlot {
    generation: u32,
    entry: Option<TrackEntry>,
}

/// Mix durations between pairs of animations, looked up by animation name.
#[derive(Clone, Debug)]
pub struct AnimationStateData {
    pub skeleton_data: Arc<SkeletonData>,
    /// Used for any pair without an explicit mix.
    pub default_mix: f32,
    mixes: HashMap<(String, String), f32>,
}

impl AnimationStateData {
    pub fn new(skeleton_data: Arc<SkeletonData>) -> Self {
        Self {
            skeleton_data,
            default_mix: 0.0,
            mixes: HashMap::new(),
        }
    }

    pub fn set_mix(&mut self, from: &Animation, to: &Animation, duration: f32) {
        self.mixes
            .insert((from.name.clone(), to.name.clone()), duration);
    }

    pub fn set_mix_by_name(&mut self, from: &str, to: &str, duration: f32) -> Result<(), Error> {
        if duration.is_nan() || duration < 0.0 {
            return Err(Error::InvalidValue {
                message: "mix duration must be finite and >= 0".to_string(),
            });
        }
        for name in [from, to] {
            if self.skeleton_data.find_animation(name).is_none() {
                return Err(Error::UnknownAnimation {
                    name: name.to_string(),
                });
            }
        }
        self.mixes.insert((from.to_string(), to.to_string()), duration);
        Ok(())
    }

    /// The mix duration from `from` to `to`, or `default_mix` if none was set.
    pub fn mix(&self, from: &Animation, to: &Animation) -> f32 {
        self.mixes
            .get(&(from.name.clone(), to.name.clone()))
            .copied()
            .unwrap_or(self.default_mix)
    }
}

/// One animation queued or playing on a track.
pub struct TrackEntry {
    animation: Arc<Animation>,
    track_index: usize,
    previous: Option<EntryId>,
    next: Option<EntryId>,
    mixing_from: Option<EntryId>,
    mixing_to: Option<EntryId>,

    pub looped: bool,
    pub hold_previous: bool,
    pub reverse: bool,
    pub shortest_rotation: bool,

    pub delay: f32,
    pub track_time: f32,
    pub track_end: f32,
    pub time_scale: f32,
    pub animation_start: f32,
    pub animation_end: f32,
    animation_last: f32,
    next_animation_last: f32,
    track_last: f32,
    next_track_last: f32,

    pub alpha: f32,
    pub mix_time: f32,
    pub mix_duration: f32,
    interrupt_alpha: f32,
    total_alpha: f32,
    pub mix_blend: MixBlend,

    pub event_threshold: f32,
    pub alpha_attachment_threshold: f32,
    pub mix_attachment_threshold: f32,
    pub mix_draw_order_threshold: f32,

    listener: Option<Box<dyn TrackEntryListener>>,

    timeline_mode: Vec<TimelineMode>,
    timeline_hold_mix: Vec<Option<EntryId>>,
    timelines_rotation: Vec<f32>,
}

impl std::fmt::Debug for TrackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackEntry")
            .field("animation", &self.animation.name)
            .field("track_index", &self.track_index)
            .field("previous", &self.previous)
            .field("next", &self.next)
            .field("looped", &self.looped)
            .field("delay", &self.delay)
            .field("track_time", &self.track_time)
            .field("track_end", &self.track_end)
            .field("animation_start", &self.animation_start)
            .field("animation_end", &self.animation_end)
            .field("mix_time", &self.mix_time)
            .field("mix_duration", &self.mix_duration)
            .field("mixing_from", &self.mixing_from)
            .field("mixing_to", &self.mixing_to)
            .finish()
    }
}

impl TrackEntry {
    fn new(track_index: usize, animation: Arc<Animation>, looped: bool, mix_duration: f32) -> Self {
        let animation_end = animation.duration;
        Self {
            animation,
            track_index,
            previous: None,
            next: None,
            mixing_from: None,
            mixing_to: None,
            looped,
            hold_previous: false,
            reverse: false,
            shortest_rotation: false,
            delay: 0.0,
            track_time: 0.0,
            track_end: f32::MAX,
            time_scale: 1.0,
            animation_start: 0.0,
            animation_end,
            animation_last: -1.0,
            next_animation_last: -1.0,
            track_last: -1.0,
            next_track_last: -1.0,
            alpha: 1.0,
            mix_time: 0.0,
            mix_duration,
            interrupt_alpha: 1.0,
            total_alpha: 0.0,
            mix_blend: MixBlend::Replace,
            event_threshold: 0.0,
            alpha_attachment_threshold: 0.0,
            mix_attachment_threshold: 0.0,
            mix_draw_order_threshold: 0.0,
            listener: None,
            timeline_mode: Vec::new(),
            timeline_hold_mix: Vec::new(),
            timelines_rotation: Vec::new(),
        }
    }

    pub fn animation(&self) -> &Arc<Animation> {
        &self.animation
    }

    pub fn track_index(&self) -> usize {
        self.track_index
    }

    /// Animation time applied last frame, or `-1` before the first apply.
    pub fn animation_last(&self) -> f32 {
        self.animation_last
    }

    /// The entry queued before this one; cleared once this entry becomes current.
    pub fn previous(&self) -> Option<TrackEntryHandle> {
        self.previous.map(|id| TrackEntryHandle { id })
    }

    pub fn next(&self) -> Option<TrackEntryHandle> {
        self.next.map(|id| TrackEntryHandle { id })
    }

    /// The entry this one is mixing out, if a mix is in progress.
    pub fn mixing_from(&self) -> Option<TrackEntryHandle> {
        self.mixing_from.map(|id| TrackEntryHandle { id })
    }

    pub fn mixing_to(&self) -> Option<TrackEntryHandle> {
        self.mixing_to.map(|id| TrackEntryHandle { id })
    }

    /// Track time mapped into `[animation_start, animation_end]`, wrapping when looped.
    pub fn animation_time(&self) -> f32 {
        if self.looped {
            let duration = self.animation_end - self.animation_start;
            if duration == 0.0 {
                return self.animation_start;
            }
            return self.track_time % duration + self.animation_start;
        }
        (self.track_time + self.animation_start).min(self.animation_end)
    }

    /// Track time at which the current loop (or the whole animation) completes.
    pub fn track_complete(&self) -> f32 {
        let duration = self.animation_end - self.animation_start;
        if duration != 0.0 {
            if self.looped {
                return duration * (1.0 + (self.track_time / duration).trunc());
            }
            if self.track_time < duration {
                return duration;
            }
        }
        self.track_time
    }

    /// True once at least one full pass of the animation has played.
    pub fn is_complete(&self) -> bool {
        self.track_time >= self.animation_end - self.animation_start
    }
}

/// A stable reference to a track entry. Handles to disposed entries are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackEntryHandle {
    id: EntryId,
}

macro_rules! handle_setters {
    ($($setter:ident => $field:ident: $ty:ty),* $(,)?) => {
        impl TrackEntryHandle {
            $(
                pub fn $setter(&self, state: &mut AnimationState, value: $ty) {
                    self.with_entry_mut(state, |entry| entry.$field = value);
                }
            )*
        }
    };
}

handle_setters! {
    set_loop => looped: bool,
    set_hold_previous => hold_previous: bool,
    set_reverse => reverse: bool,
    set_shortest_rotation => shortest_rotation: bool,
    set_delay => delay: f32,
    set_track_time => track_time: f32,
    set_track_end => track_end: f32,
    set_time_scale => time_scale: f32,
    set_animation_start => animation_start: f32,
    set_animation_end => animation_end: f32,
    set_alpha => alpha: f32,
    set_mix_time => mix_time: f32,
    set_mix_duration => mix_duration: f32,
    set_mix_blend => mix_blend: MixBlend,
    set_event_threshold => event_threshold: f32,
    set_alpha_attachment_threshold => alpha_attachment_threshold: f32,
    set_mix_attachment_threshold => mix_attachment_threshold: f32,
    set_mix_draw_order_threshold => mix_draw_order_threshold: f32,
}

impl TrackEntryHandle {
    fn with_entry_mut(&self, state: &mut AnimationState, f: impl FnOnce(&mut TrackEntry)) {
        if let Some(entry) = state.entry_mut(self.id) {
            f(entry);
        }
    }

    pub fn is_valid(&self, state: &AnimationState) -> bool {
        state.entry(self.id).is_some()
    }

    pub fn set_listener<L: TrackEntryListener + 'static>(
        &self,
        state: &mut AnimationState,
        listener: L,
    ) {
        self.with_entry_mut(state, |entry| entry.listener = Some(Box::new(listener)));
    }

    pub fn clear_listener(&self, state: &mut AnimationState) {
        self.with_entry_mut(state, |entry| entry.listener = None);
    }

    pub fn set_animation_last(&self, state: &mut AnimationState, animation_last: f32) {
        self.with_entry_mut(state, |entry| {
            entry.animation_last = animation_last;
            entry.next_animation_last = animation_last;
        });
    }

    /// Forgets the rotation directions chosen while mixing, so the next mix picks the shortest
    /// way again.
    pub fn reset_rotation_directions(&self, state: &mut AnimationState) {
        self.with_entry_mut(state, |entry| entry.timelines_rotation.clear());
    }
}

/// Entry state captured when an event is delivered, since the entry may be gone by the time a
/// listener inspects it.
#[derive(Clone, Debug)]
pub struct TrackEntrySnapshot {
    pub handle: TrackEntryHandle,
    pub track_index: usize,
    pub animation_name: String,
    pub looped: bool,
    pub track_time: f32,
    pub animation_time: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnimationStateEvent {
    Start,
    Interrupt,
    End,
    Dispose,
    Complete,
    Event(Event),
}

pub trait TrackEntryListener {
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    );
}

/// Receives the events of every entry, after the entry's own listener.
pub trait AnimationStateListener {
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    );
}

#[derive(Clone, Debug)]
struct QueuedEvent {
    entry: EntryId,
    snapshot: TrackEntrySnapshot,
    event: AnimationStateEvent,
}

/// Plays animations on numbered tracks, queues follow-up animations and crossfades between them.
/// Higher tracks are applied over lower ones.
pub struct AnimationState {
    data: AnimationStateData,
    tracks: Vec<Option<EntryId>>,
    entries: Vec<EntrySlot>,
    free_list: Vec<usize>,
    event_queue: VecDeque<QueuedEvent>,
    listener: Option<Box<dyn AnimationStateListener>>,
    draining_events: bool,
    drain_disabled: bool,
    animations_changed: bool,
    property_ids: HashSet<u64>,
    unkeyed_state: i32,
    time_scale: f32,
    empty_animation: Arc<Animation>,
    fired: Vec<Event>,
}

impl AnimationState {
    pub fn new(data: AnimationStateData) -> Self {
        Self {
            data,
            tracks: Vec::new(),
            entries: Vec::new(),
            free_list: Vec::new(),
            event_queue: VecDeque::new(),
            listener: None,
            draining_events: false,
            drain_disabled: false,
            animations_changed: false,
            property_ids: HashSet::new(),
            unkeyed_state: 0,
            time_scale: 1.0,
            empty_animation: Arc::new(Animation::empty()),
            fired: Vec::new(),
        }
    }

    pub fn set_listener<L: AnimationStateListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    pub fn data(&self) -> &AnimationStateData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut AnimationStateData {
        &mut self.data
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Multiplier applied to every `update` delta.
    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.time_scale = time_scale;
    }

    /// Current entry per track; cleared tracks are `None`.
    pub fn tracks(&self) -> Vec<Option<TrackEntryHandle>> {
        self.tracks
            .iter()
            .map(|id| id.map(|id| TrackEntryHandle { id }))
            .collect()
    }

    pub fn current(&self, track_index: usize) -> Option<TrackEntryHandle> {
        let id = (*self.tracks.get(track_index)?)?;
        Some(TrackEntryHandle { id })
    }

    pub fn track_entry(&self, handle: TrackEntryHandle) -> Option<&TrackEntry> {
        self.entry(handle.id)
    }

    pub fn with_track_entry<F: FnOnce(&TrackEntry) -> R, R>(
        &self,
        track_index: usize,
        f: F,
    ) -> Option<R> {
        let handle = self.current(track_index)?;
        self.track_entry(handle).map(f)
    }

    fn entry(&self, id: EntryId) -> Option<&TrackEntry> {
        let slot = self.entries.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut TrackEntry> {
        let slot = self.entries.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn alloc_entry(&mut self, entry: TrackEntry) -> EntryId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.entries[index];
            slot.entry = Some(entry);
            return EntryId {
                index,
                generation: slot.generation,
            };
        }
        self.entries.push(EntrySlot {
            generation: 0,
            entry: Some(entry),
        });
        EntryId {
            index: self.entries.len() - 1,
            generation: 0,
        }
    }

    fn free_entry(&mut self, id: EntryId) {
        let Some(slot) = self.entries.get_mut(id.index) else {
            return;
        };
        if slot.generation != id.generation || slot.entry.is_none() {
            return;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
    }

    fn new_entry(
        &mut self,
        track_index: usize,
        animation: Arc<Animation>,
        looped: bool,
        last: Option<EntryId>,
    ) -> EntryId {
        let mix_duration = last
            .and_then(|id| self.entry(id))
            .map_or(0.0, |last| self.data.mix(&last.animation, &animation));
        self.alloc_entry(TrackEntry::new(track_index, animation, looped, mix_duration))
    }

    fn expand_to_index(&mut self, track_index: usize) -> Option<EntryId> {
        if track_index >= self.tracks.len() {
            self.tracks.resize(track_index + 1, None);
            return None;
        }
        self.tracks[track_index]
    }

    fn find_animation(&self, name: &str) -> Result<Arc<Animation>, Error> {
        self.data
            .skeleton_data
            .find_animation(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAnimation {
                name: name.to_string(),
            })
    }

    /// Replaces whatever plays on the track. The previous entry, if it was ever applied, is
    /// mixed out over the configured mix duration; queued entries are disposed.
    pub fn set_animation(
        &mut self,
        track_index: usize,
        animation: &Arc<Animation>,
        looped: bool,
    ) -> TrackEntryHandle {
        let mut interrupt = true;
        let mut current = self.expand_to_index(track_index);
        if let Some(current_id) = current {
            let never_applied = self
                .entry(current_id)
                .is_some_and(|entry| entry.next_track_last == -1.0);
            if never_applied {
                // Nothing to mix out from; drop it and mix from what it was mixing from.
                let from = self.entry(current_id).and_then(|entry| entry.mixing_from);
                self.tracks[track_index] = from;
                self.queue_event(current_id, AnimationStateEvent::Interrupt);
                self.queue_end(current_id);
                self.clear_next(current_id);
                current = from;
                interrupt = false;
            } else {
                self.clear_next(current_id);
            }
        }
        let id = self.new_entry(track_index, Arc::clone(animation), looped, current);
        self.set_current(track_index, id, interrupt);
        self.drain();
        TrackEntryHandle { id }
    }

    pub fn set_animation_by_name(
        &mut self,
        track_index: usize,
        animation_name: &str,
        looped: bool,
    ) -> Result<TrackEntryHandle, Error> {
        let animation = self.find_animation(animation_name)?;
        Ok(self.set_animation(track_index, &animation, looped))
    }

    /// Queues an animation after the last entry on the track. A `delay <= 0` is relative to the
    /// end of the previous entry minus the mix duration.
    pub fn add_animation(
        &mut self,
        track_index: usize,
        animation: &Arc<Animation>,
        looped: bool,
        mut delay: f32,
    ) -> TrackEntryHandle {
        let mut last = self.expand_to_index(track_index);
        if let Some(mut id) = last {
            while let Some(next) = self.entry(id).and_then(|entry| entry.next) {
                id = next;
            }
            last = Some(id);
        }
        let id = self.new_entry(track_index, Arc::clone(animation), looped, last);
        match last {
            None => {
                self.set_current(track_index, id, true);
                self.drain();
            }
            Some(last_id) => {
                let track_complete = self.entry(last_id).map_or(0.0, TrackEntry::track_complete);
                if let Some(last) = self.entry_mut(last_id) {
                    last.next = Some(id);
                }
                if let Some(entry) = self.entry_mut(id) {
                    entry.previous = Some(last_id);
                }
                if delay <= 0.0 {
                    let mix_duration = self.entry(id).map_or(0.0, |entry| entry.mix_duration);
                    delay += track_complete - mix_duration;
                }
            }
        }
        if let Some(entry) = self.entry_mut(id) {
            entry.delay = delay;
        }
        TrackEntryHandle { id }
    }

    pub fn add_animation_by_name(
        &mut self,
        track_index: usize,
        animation_name: &str,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        let animation = self.find_animation(animation_name)?;
        Ok(self.add_animation(track_index, &animation, looped, delay))
    }

    /// Mixes the track out to the setup pose over `mix_duration`.
    pub fn set_empty_animation(
        &mut self,
        track_index: usize,
        mix_duration: f32,
    ) -> Result<TrackEntryHandle, Error> {
        check_mix_duration(mix_duration)?;
        let empty = Arc::clone(&self.empty_animation);
        let handle = self.set_animation(track_index, &empty, false);
        handle.with_entry_mut(self, |entry| {
            entry.mix_duration = mix_duration;
            entry.track_end = mix_duration;
        });
        Ok(handle)
    }

    pub fn add_empty_animation(
        &mut self,
        track_index: usize,
        mix_duration: f32,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        check_mix_duration(mix_duration)?;
        let empty = Arc::clone(&self.empty_animation);
        let handle = self.add_animation(track_index, &empty, false, delay);
        handle.with_entry_mut(self, |entry| {
            if delay <= 0.0 {
                entry.delay += entry.mix_duration - mix_duration;
            }
            entry.mix_duration = mix_duration;
            entry.track_end = mix_duration;
        });
        Ok(handle)
    }

    pub fn set_empty_animations(&mut self, mix_duration: f32) -> Result<(), Error> {
        check_mix_duration(mix_duration)?;
        let drain_disabled = std::mem::replace(&mut self.drain_disabled, true);
        for track_index in 0..self.tracks.len() {
            if self.tracks[track_index].is_some() {
                self.set_empty_animation(track_index, mix_duration)?;
            }
        }
        self.drain_disabled = drain_disabled;
        self.drain();
        Ok(())
    }

    /// Ends the track's current entry and everything it was mixing from, without mixing.
    pub fn clear_track(&mut self, track_index: usize) {
        let Some(Some(current)) = self.tracks.get(track_index).copied() else {
            return;
        };
        self.queue_end(current);
        self.clear_next(current);
        let mut id = current;
        while let Some(from) = self.entry(id).and_then(|entry| entry.mixing_from) {
            self.queue_end(from);
            if let Some(entry) = self.entry_mut(id) {
                entry.mixing_from = None;
                entry.mixing_to = None;
            }
            id = from;
        }
        self.tracks[track_index] = None;
        self.drain();
    }

    pub fn clear_tracks(&mut self) {
        let drain_disabled = std::mem::replace(&mut self.drain_disabled, true);
        for track_index in 0..self.tracks.len() {
            self.clear_track(track_index);
        }
        self.tracks.clear();
        self.drain_disabled = drain_disabled;
        self.drain();
    }

    fn set_current(&mut self, track_index: usize, current: EntryId, interrupt: bool) {
        let from = self.expand_to_index(track_index);
        self.tracks[track_index] = Some(current);
        if let Some(entry) = self.entry_mut(current) {
            entry.previous = None;
        }
        if let Some(from_id) = from {
            if interrupt {
                self.queue_event(from_id, AnimationStateEvent::Interrupt);
            }
            let mut interrupted = 1.0;
            if let Some(from) = self.entry_mut(from_id) {
                from.mixing_to = Some(current);
                from.timelines_rotation.clear();
                // Keep the interrupted mix percentage.
                if from.mixing_from.is_some() && from.mix_duration > 0.0 {
                    interrupted = (from.mix_time / from.mix_duration).min(1.0);
                }
            }
            if let Some(entry) = self.entry_mut(current) {
                entry.mixing_from = Some(from_id);
                entry.mix_time = 0.0;
                entry.interrupt_alpha *= interrupted;
            }
        }
        self.queue_event(current, AnimationStateEvent::Start);
    }

    /// Disposes every entry queued after `id`.
    fn clear_next(&mut self, id: EntryId) {
        let mut next = self.entry_mut(id).and_then(|entry| entry.next.take());
        while let Some(next_id) = next {
            self.queue_event(next_id, AnimationStateEvent::Dispose);
            next = self.entry(next_id).and_then(|entry| entry.next);
        }
    }

    /// Advances track times and promotes queued entries whose delay has elapsed.
    pub fn update(&mut self, delta: f32) {
        let delta = delta * self.time_scale;
        for track_index in 0..self.tracks.len() {
            let Some(current_id) = self.tracks[track_index] else {
                continue;
            };
            let Some(current) = self.entry_mut(current_id) else {
                self.tracks[track_index] = None;
                continue;
            };
            current.animation_last = current.next_animation_last;
            current.track_last = current.next_track_last;

            let mut current_delta = delta * current.time_scale;
            if current.delay > 0.0 {
                current.delay -= current_delta;
                if current.delay > 0.0 {
                    continue;
                }
                current_delta = -current.delay;
                current.delay = 0.0;
            }

            let (next, track_last, track_end, time_scale, mixing_from) = (
                current.next,
                current.track_last,
                current.track_end,
                current.time_scale,
                current.mixing_from,
            );
            if let Some(next_id) = next {
                let next_delay = self.entry(next_id).map_or(0.0, |entry| entry.delay);
                let next_time = track_last - next_delay;
                if next_time >= 0.0 {
                    // Carry leftover time into the promoted entry.
                    if let Some(next) = self.entry_mut(next_id) {
                        next.delay = 0.0;
                        if time_scale != 0.0 {
                            next.track_time += (next_time / time_scale + delta) * next.time_scale;
                        }
                    }
                    if let Some(current) = self.entry_mut(current_id) {
                        current.track_time += current_delta;
                        current.next = None;
                    }
                    log::trace!("track {track_index}: promoting queued entry");
                    self.set_current(track_index, next_id, true);
                    let mut id = next_id;
                    while let Some(from) = self.entry(id).and_then(|entry| entry.mixing_from) {
                        if let Some(entry) = self.entry_mut(id) {
                            entry.mix_time += delta;
                        }
                        id = from;
                    }
                    continue;
                }
            } else if track_last >= track_end && mixing_from.is_none() {
                self.tracks[track_index] = None;
                self.queue_end(current_id);
                self.clear_next(current_id);
                continue;
            }

            if mixing_from.is_some() && self.update_mixing_from(current_id, delta) {
                // Every entry mixing out has finished.
                let mut from = self
                    .entry_mut(current_id)
                    .and_then(|entry| entry.mixing_from.take());
                if let Some(from) = from.and_then(|id| self.entry_mut(id)) {
                    from.mixing_to = None;
                }
                while let Some(id) = from {
                    self.queue_end(id);
                    from = self.entry(id).and_then(|entry| entry.mixing_from);
                }
            }
            if let Some(current) = self.entry_mut(current_id) {
                current.track_time += current_delta;
            }
        }
        self.drain();
    }

    /// Returns true once `to` and everything it mixes from are done mixing.
    fn update_mixing_from(&mut self, to_id: EntryId, delta: f32) -> bool {
        let Some(from_id) = self.entry(to_id).and_then(|entry| entry.mixing_from) else {
            return true;
        };
        let finished = self.update_mixing_from(from_id, delta);
        let Some(from) = self.entry_mut(from_id) else {
            return finished;
        };
        from.animation_last = from.next_animation_last;
        from.track_last = from.next_track_last;
        let (from_from, from_total_alpha, from_interrupt_alpha) =
            (from.mixing_from, from.total_alpha, from.interrupt_alpha);

        let Some(to) = self.entry_mut(to_id) else {
            return finished;
        };
        // mix_time > 0 guarantees the mixing-out entry was applied at least once.
        if to.mix_time > 0.0 && to.mix_time >= to.mix_duration {
            if from_total_alpha == 0.0 || to.mix_duration == 0.0 {
                to.mixing_from = from_from;
                to.interrupt_alpha = from_interrupt_alpha;
                if let Some(from_from) = from_from.and_then(|id| self.entry_mut(id)) {
                    from_from.mixing_to = Some(to_id);
                }
                self.queue_end(from_id);
            }
            return finished;
        }
        to.mix_time += delta;
        if let Some(from) = self.entry_mut(from_id) {
            from.track_time += delta * from.time_scale;
        }
        false
    }

    /// Poses the skeleton from every track. Returns true if any entry was applied.
    pub fn apply(&mut self, skeleton: &mut Skeleton) -> bool {
        if self.animations_changed {
            self.compute_timeline_modes();
        }
        let mut applied = false;
        let mut fired = std::mem::take(&mut self.fired);
        for track_index in 0..self.tracks.len() {
            let Some(current_id) = self.tracks[track_index] else {
                continue;
            };
            let Some(current) = self.entry(current_id) else {
                continue;
            };
            if current.delay > 0.0 {
                continue;
            }
            applied = true;
            // Track 0 is not layered, so it never shows earlier poses before its first key.
            let blend = if track_index == 0 {
                MixBlend::First
            } else {
                current.mix_blend
            };
            let mut alpha = current.alpha;
            let mixing = current.mixing_from.is_some();
            let ended = current.track_time >= current.track_end && current.next.is_none();
            if mixing {
                alpha *= self.apply_mixing_from(current_id, skeleton, blend, &mut fired);
            } else if ended {
                alpha = 0.0;
            }

            let unkeyed_state = self.unkeyed_state;
            let Some(current) = self.entry_mut(current_id) else {
                continue;
            };
            let mut attachments = alpha >= current.alpha_attachment_threshold;
            let animation = Arc::clone(&current.animation);
            let animation_last = current.animation_last;
            let animation_time = current.animation_time();
            let apply_time = if current.reverse {
                animation.duration - animation_time
            } else {
                animation_time
            };
            let mut events = (!current.reverse).then_some(&mut fired);

            if (track_index == 0 && alpha == 1.0) || blend == MixBlend::Add {
                if track_index == 0 {
                    attachments = true;
                }
                for timeline in &animation.timelines {
                    match timeline {
                        Timeline::Attachment(t) => apply_attachment_tracked(
                            t,
                            skeleton,
                            apply_time,
                            blend,
                            attachments,
                            unkeyed_state,
                        ),
                        _ => timeline.apply(
                            skeleton,
                            animation_last,
                            apply_time,
                            events.as_deref_mut(),
                            alpha,
                            blend,
                            MixDirection::In,
                        ),
                    }
                }
            } else {
                let timeline_count = animation.timelines.len();
                let modes = current.timeline_mode.clone();
                let shortest_rotation = current.shortest_rotation;
                let mut rotations = std::mem::take(&mut current.timelines_rotation);
                let first_frame = !shortest_rotation && rotations.len() != timeline_count * 2;
                if first_frame {
                    rotations.resize(timeline_count * 2, 0.0);
                }
                for (i, timeline) in animation.timelines.iter().enumerate() {
                    let timeline_blend = if modes.get(i) == Some(&TimelineMode::Subsequent) {
                        blend
                    } else {
                        MixBlend::Setup
                    };
                    match timeline {
                        Timeline::Rotate(t) if !shortest_rotation => apply_rotate_mixed(
                            t,
                            skeleton,
                            apply_time,
                            alpha,
                            timeline_blend,
                            &mut rotations,
                            i * 2,
                            first_frame,
                        ),
                        Timeline::Attachment(t) => apply_attachment_tracked(
                            t,
                            skeleton,
                            apply_time,
                            blend,
                            attachments,
                            unkeyed_state,
                        ),
                        _ => timeline.apply(
                            skeleton,
                            animation_last,
                            apply_time,
                            events.as_deref_mut(),
                            alpha,
                            timeline_blend,
                            MixDirection::In,
                        ),
                    }
                }
                if let Some(current) = self.entry_mut(current_id) {
                    current.timelines_rotation = rotations;
                }
            }

            self.queue_events(current_id, animation_time, &fired);
            fired.clear();
            if let Some(current) = self.entry_mut(current_id) {
                current.next_animation_last = animation_time;
                current.next_track_last = current.track_time;
            }
        }
        self.fired = fired;

        // Slots whose attachment was touched only by entries mixing out (or before their first
        // key) go back to the setup attachment.
        let setup_state = self.unkeyed_state + ATTACHMENT_SETUP;
        for slot_index in 0..skeleton.slots.len() {
            if skeleton.slots[slot_index].attachment_state != setup_state {
                continue;
            }
            let name = skeleton.data.slots[slot_index].attachment.clone();
            let key = name
                .as_deref()
                .and_then(|name| skeleton.attachment_key(slot_index, name));
            skeleton.set_slot_attachment(slot_index, key);
        }
        self.unkeyed_state += 2;
        self.drain();
        applied
    }

    /// Applies the entries `to` is mixing from and returns the mix percentage of `to`.
    fn apply_mixing_from(
        &mut self,
        to_id: EntryId,
        skeleton: &mut Skeleton,
        mut blend: MixBlend,
        fired: &mut Vec<Event>,
    ) -> f32 {
        let Some(to) = self.entry(to_id) else {
            return 1.0;
        };
        let (to_mix_time, to_mix_duration, to_interrupt_alpha) =
            (to.mix_time, to.mix_duration, to.interrupt_alpha);
        let Some(from_id) = to.mixing_from else {
            return 1.0;
        };
        if self
            .entry(from_id)
            .is_some_and(|from| from.mixing_from.is_some())
        {
            self.apply_mixing_from(from_id, skeleton, blend, fired);
        }

        let mix = if to_mix_duration == 0.0 {
            // Single frame mix to undo the mixing-out entry's changes.
            if blend == MixBlend::First {
                blend = MixBlend::Setup;
            }
            1.0
        } else {
            (to_mix_time / to_mix_duration).min(1.0)
        };

        let unkeyed_state = self.unkeyed_state;
        let Some(from) = self.entry_mut(from_id) else {
            return mix;
        };
        if to_mix_duration != 0.0 && blend != MixBlend::First {
            blend = from.mix_blend;
        }
        let attachments = mix < from.mix_attachment_threshold;
        let draw_order = mix < from.mix_draw_order_threshold;
        let alpha_hold = from.alpha * to_interrupt_alpha;
        let alpha_mix = alpha_hold * (1.0 - mix);
        let alpha_attachment_threshold = from.alpha_attachment_threshold;
        let animation = Arc::clone(&from.animation);
        let animation_last = from.animation_last;
        let animation_time = from.animation_time();
        let apply_time = if from.reverse {
            animation.duration - animation_time
        } else {
            animation_time
        };
        let fire_events = !from.reverse && mix < from.event_threshold;
        let mut events = fire_events.then_some(&mut *fired);

        if blend == MixBlend::Add {
            for timeline in &animation.timelines {
                timeline.apply(
                    skeleton,
                    animation_last,
                    apply_time,
                    events.as_deref_mut(),
                    alpha_mix,
                    blend,
                    MixDirection::Out,
                );
            }
        } else {
            let timeline_count = animation.timelines.len();
            let modes = from.timeline_mode.clone();
            let hold_mix = from.timeline_hold_mix.clone();
            let shortest_rotation = from.shortest_rotation;
            let mut rotations = std::mem::take(&mut from.timelines_rotation);
            let first_frame = !shortest_rotation && rotations.len() != timeline_count * 2;
            if first_frame {
                rotations.resize(timeline_count * 2, 0.0);
            }

            let mut total_alpha = 0.0;
            for (i, timeline) in animation.timelines.iter().enumerate() {
                let (timeline_blend, alpha) =
                    match modes.get(i).copied().unwrap_or(TimelineMode::First) {
                        TimelineMode::Subsequent => {
                            if !draw_order && matches!(timeline, Timeline::DrawOrder(_)) {
                                continue;
                            }
                            (blend, alpha_mix)
                        }
                        TimelineMode::First => (MixBlend::Setup, alpha_mix),
                        TimelineMode::HoldSubsequent => (blend, alpha_hold),
                        TimelineMode::HoldFirst => (MixBlend::Setup, alpha_hold),
                        TimelineMode::HoldMix => {
                            let remaining = hold_mix
                                .get(i)
                                .copied()
                                .flatten()
                                .and_then(|id| self.entry(id))
                                .map_or(0.0, |hold| {
                                    if hold.mix_duration > 0.0 {
                                        (1.0 - hold.mix_time / hold.mix_duration).max(0.0)
                                    } else {
                                        0.0
                                    }
                                });
                            (MixBlend::Setup, alpha_hold * remaining)
                        }
                    };
                total_alpha += alpha;
                match timeline {
                    Timeline::Rotate(t) if !shortest_rotation => apply_rotate_mixed(
                        t,
                        skeleton,
                        apply_time,
                        alpha,
                        timeline_blend,
                        &mut rotations,
                        i * 2,
                        first_frame,
                    ),
                    Timeline::Attachment(t) => apply_attachment_tracked(
                        t,
                        skeleton,
                        apply_time,
                        timeline_blend,
                        attachments && alpha >= alpha_attachment_threshold,
                        unkeyed_state,
                    ),
                    _ => {
                        let direction = if draw_order
                            && matches!(timeline, Timeline::DrawOrder(_))
                            && timeline_blend == MixBlend::Setup
                        {
                            MixDirection::In
                        } else {
                            MixDirection::Out
                        };
                        timeline.apply(
                            skeleton,
                            animation_last,
                            apply_time,
                            events.as_deref_mut(),
                            alpha,
                            timeline_blend,
                            direction,
                        );
                    }
                }
            }
            if let Some(from) = self.entry_mut(from_id) {
                from.total_alpha = total_alpha;
                from.timelines_rotation = rotations;
            }
        }

        if to_mix_duration > 0.0 {
            self.queue_events(from_id, animation_time, fired);
        }
        fired.clear();
        if let Some(from) = self.entry_mut(from_id) {
            from.next_animation_last = animation_time;
            from.next_track_last = from.track_time;
        }
        mix
    }

    /// Queues the fired events and the complete event for an entry. Events past the end of the
    /// animation window come before complete, the wrapped ones after it.
    fn queue_events(&mut self, entry_id: EntryId, animation_time: f32, fired: &[Event]) {
        let Some(entry) = self.entry(entry_id) else {
            return;
        };
        let (start, end) = (entry.animation_start, entry.animation_end);
        let duration = end - start;
        let track_last_wrapped = entry.track_last % duration;
        let complete = if entry.looped {
            duration == 0.0 || track_last_wrapped > entry.track_time % duration
        } else {
            animation_time >= end && entry.animation_last < end
        };

        let split = fired
            .iter()
            .position(|event| event.time < track_last_wrapped)
            .unwrap_or(fired.len());
        for event in fired[..split].iter().filter(|event| event.time <= end) {
            self.queue_event(entry_id, AnimationStateEvent::Event(event.clone()));
        }
        if complete {
            self.queue_event(entry_id, AnimationStateEvent::Complete);
        }
        for event in fired[split..].iter().filter(|event| event.time >= start) {
            self.queue_event(entry_id, AnimationStateEvent::Event(event.clone()));
        }
    }

    /// Recomputes how each entry's timelines mix, walking entries in apply order.
    fn compute_timeline_modes(&mut self) {
        self.animations_changed = false;
        self.property_ids.clear();
        for track_index in 0..self.tracks.len() {
            let Some(mut id) = self.tracks[track_index] else {
                continue;
            };
            while let Some(from) = self.entry(id).and_then(|entry| entry.mixing_from) {
                id = from;
            }
            let mut next = Some(id);
            while let Some(id) = next {
                let Some(entry) = self.entry(id) else {
                    break;
                };
                next = entry.mixing_to;
                if entry.mixing_to.is_none() || entry.mix_blend != MixBlend::Add {
                    self.compute_hold(id);
                }
            }
        }
    }

    fn add_property_ids(&mut self, ids: &[u64]) -> bool {
        let mut added = false;
        for &id in ids {
            added |= self.property_ids.insert(id);
        }
        added
    }

    fn compute_hold(&mut self, entry_id: EntryId) {
        let Some(entry) = self.entry(entry_id) else {
            return;
        };
        let animation = Arc::clone(&entry.animation);
        let to_id = entry.mixing_to;
        let count = animation.timelines.len();
        let mut modes = vec![TimelineMode::First; count];
        let mut hold_mix = vec![None; count];

        let hold_previous = to_id
            .and_then(|id| self.entry(id))
            .is_some_and(|to| to.hold_previous);
        if hold_previous {
            for (i, timeline) in animation.timelines.iter().enumerate() {
                modes[i] = if self.add_property_ids(&timeline.property_ids()) {
                    TimelineMode::HoldFirst
                } else {
                    TimelineMode::HoldSubsequent
                };
            }
        } else {
            'timelines: for (i, timeline) in animation.timelines.iter().enumerate() {
                let ids = timeline.property_ids();
                if !self.add_property_ids(&ids) {
                    modes[i] = TimelineMode::Subsequent;
                    continue;
                }
                let Some(to) = to_id.and_then(|id| self.entry(id)) else {
                    continue;
                };
                if matches!(
                    timeline,
                    Timeline::Attachment(_) | Timeline::DrawOrder(_) | Timeline::Event(_)
                ) || !to.animation.has_timeline(&ids)
                {
                    continue;
                }
                let mut next = to.mixing_to;
                while let Some(next_id) = next {
                    let Some(next_entry) = self.entry(next_id) else {
                        break;
                    };
                    if next_entry.animation.has_timeline(&ids) {
                        next = next_entry.mixing_to;
                        continue;
                    }
                    if next_entry.mix_duration > 0.0 {
                        modes[i] = TimelineMode::HoldMix;
                        hold_mix[i] = Some(next_id);
                        continue 'timelines;
                    }
                    break;
                }
                modes[i] = TimelineMode::HoldFirst;
            }
        }

        if let Some(entry) = self.entry_mut(entry_id) {
            entry.timeline_mode = modes;
            entry.timeline_hold_mix = hold_mix;
        }
    }

    fn snapshot(&self, id: EntryId) -> Option<TrackEntrySnapshot> {
        let entry = self.entry(id)?;
        Some(TrackEntrySnapshot {
            handle: TrackEntryHandle { id },
            track_index: entry.track_index,
            animation_name: entry.animation.name.clone(),
            looped: entry.looped,
            track_time: entry.track_time,
            animation_time: entry.animation_time(),
        })
    }

    fn queue_event(&mut self, id: EntryId, event: AnimationStateEvent) {
        let Some(snapshot) = self.snapshot(id) else {
            return;
        };
        if matches!(event, AnimationStateEvent::Start) {
            self.animations_changed = true;
        }
        self.event_queue.push_back(QueuedEvent {
            entry: id,
            snapshot,
            event,
        });
    }

    /// End is always followed by Dispose.
    fn queue_end(&mut self, id: EntryId) {
        self.animations_changed = true;
        self.queue_event(id, AnimationStateEvent::End);
        self.queue_event(id, AnimationStateEvent::Dispose);
    }

    fn drain(&mut self) {
        if self.draining_events || self.drain_disabled {
            return;
        }
        self.draining_events = true;
        while let Some(queued) = self.event_queue.pop_front() {
            let QueuedEvent {
                entry: id,
                snapshot,
                event,
            } = queued;

            let entry_listener = self.entry_mut(id).and_then(|entry| entry.listener.take());
            if let Some(mut listener) = entry_listener {
                listener.on_event(self, &snapshot, &event);
                if let Some(entry) = self.entry_mut(id) {
                    entry.listener.get_or_insert(listener);
                }
            }
            if let Some(mut listener) = self.listener.take() {
                listener.on_event(self, &snapshot, &event);
                if self.listener.is_none() {
                    self.listener = Some(listener);
                }
            }

            if matches!(event, AnimationStateEvent::Dispose) {
                log::trace!(
                    "track {}: disposing {:?}",
                    snapshot.track_index,
                    snapshot.animation_name
                );
                self.free_entry(id);
            }
        }
        self.draining_events = false;
    }
}

fn check_mix_duration(mix_duration: f32) -> Result<(), Error> {
    if !mix_duration.is_finite() || mix_duration < 0.0 {
        return Err(Error::InvalidValue {
            message: "mix duration must be finite and >= 0".to_string(),
        });
    }
    Ok(())
}
