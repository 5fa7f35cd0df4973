//! agbsynth — a recreation of the GBA m4a sound engine
//!
//! MIDI events and a voicegroup in, stereo float audio out, with the
//! hardware driver's integer DSP in between: up to 12 software-mixed
//! DirectSound channels, the four CGB channels, ADSR envelopes, the
//! modulation LFO, and the 4-tap reverb.
//!
//! The [`engine::Engine`] is a plain single-threaded value; hosts call its
//! event methods and `process` from one thread. [`sequence::EventScheduler`]
//! slices renders for sample-accurate event placement, [`midi`] decodes raw
//! bytes, and [`persist`] carries settings across plugin sessions.

pub mod engine;
pub mod midi;
pub mod persist;
pub mod sequence;

pub use engine::voice::{Adsr, Voice, VoiceKind, Voicegroup, WaveData};
pub use engine::Engine;
pub use midi::MidiMessage;
pub use persist::PluginState;
pub use sequence::{EventScheduler, TimedEvent};
