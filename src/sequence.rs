//! Sample-accurate event scheduling
//!
//! The engine applies events at the start of the next rendered frame, so a
//! host that wants events to land on exact sample positions must split its
//! renders at event boundaries. This scheduler does that: give it the event
//! list up front, then feed it output buffers of any size.
//!
//! Used by offline rendering and the test harness; plugin hosts usually
//! implement the same slicing against their own event queues.

use crate::engine::Engine;
use crate::midi::{self, MidiMessage};

/// One scheduled message at an absolute frame position
#[derive(Debug, Clone, Copy)]
pub struct TimedEvent {
    pub frame: u64,
    pub message: MidiMessage,
}

/// Streams a sorted event list into an engine across `process` calls
pub struct EventScheduler {
    events: Vec<TimedEvent>,
    next: usize,
    cursor: u64,
}

impl EventScheduler {
    pub fn new(mut events: Vec<TimedEvent>) -> Self {
        events.sort_by_key(|e| e.frame);
        Self {
            events,
            next: 0,
            cursor: 0,
        }
    }

    /// Absolute frame position of the next frame to render
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// All events dispatched (rendering may still have tails to play out)
    pub fn finished(&self) -> bool {
        self.next >= self.events.len()
    }

    /// Render the next `min(out_l.len(), out_r.len())` frames, dispatching
    /// events exactly at their scheduled positions.
    pub fn process(&mut self, engine: &mut Engine, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());
        let mut done = 0usize;

        while done < frames {
            while self.next < self.events.len() && self.events[self.next].frame <= self.cursor {
                midi::apply(engine, &self.events[self.next].message);
                self.next += 1;
            }

            let until_end = frames - done;
            let run = match self.events.get(self.next) {
                Some(ev) => ((ev.frame - self.cursor) as usize).min(until_end),
                None => until_end,
            };

            engine.process(&mut out_l[done..done + run], &mut out_r[done..done + run]);
            done += run;
            self.cursor += run as u64;
        }
    }
}
