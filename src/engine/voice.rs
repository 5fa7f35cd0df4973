//! Voicegroup data model
//!
//! Engine-side structures for everything a GBA project's voicegroup carries:
//! - WaveData: signed 8-bit PCM with the header's fixed-point rate and loop
//! - Adsr: the four envelope bytes
//! - Voice / VoiceKind: one instrument slot, decoded from the type byte into
//!   a tagged variant at the loader boundary
//! - Voicegroup: the 128-slot program table handed to the engine
//!
//! The engine borrows all of this read-only; channels keep the wave they are
//! playing alive through shared ownership, so a voicegroup swap can never
//! invalidate a sounding note.

use std::sync::Arc;

/// Sample data for one DirectSound wave
///
/// `samples` holds `size + 1` entries: the trailing guard byte repeats the
/// last sample so the mixer can read one past the end while interpolating.
pub struct WaveData {
    /// Fixed-point playback rate: `sampleRate * 1024` sounds at middle C
    pub freq: u32,
    /// Loop enabled (status bit 14 in the source header)
    pub looped: bool,
    /// First sample of the loop region
    pub loop_start: u32,
    /// Number of real samples (excluding the guard byte)
    pub size: u32,
    /// Signed 8-bit PCM, `size + 1` entries
    pub samples: Vec<i8>,
}

impl WaveData {
    /// Build wave data from raw samples, appending the interpolation guard.
    ///
    /// A `loop_start` of `Some(n)` marks samples `n..size` as the loop body.
    pub fn new(freq: u32, loop_start: Option<u32>, mut samples: Vec<i8>) -> Self {
        let size = samples.len() as u32;
        let guard = samples.last().copied().unwrap_or(0);
        samples.push(guard);
        Self {
            freq,
            looped: loop_start.is_some(),
            loop_start: loop_start.unwrap_or(0),
            size,
            samples,
        }
    }

    /// Loop length in samples (0 when not looping)
    #[inline]
    pub fn loop_len(&self) -> u32 {
        if self.looped {
            self.size - self.loop_start
        } else {
            0
        }
    }
}

/// The four envelope bytes of a voice entry
///
/// PCM voices read these on the 0..255 multiplicative scale; CGB voices on
/// the hardware 0..15 scale (attack/decay/release as frames per step,
/// sustain as a level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adsr {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

impl Adsr {
    pub const fn new(attack: u8, decay: u8, sustain: u8, release: u8) -> Self {
        Self { attack, decay, sustain, release }
    }

    /// Instant full level, held until note-off, fast release.
    /// Used as the fixed envelope for cry voices.
    pub const fn full() -> Self {
        Self::new(0xFF, 0xFF, 0xFF, 0xFF)
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Self::full()
    }
}

/// What a voice entry actually plays, decoded from the on-wire type byte
#[derive(Clone)]
pub enum VoiceKind {
    /// Sample playback, resampled by MIDI key unless `fixed_pitch`
    /// (the +0x08 no-resample flag)
    DirectSound { wave: Arc<WaveData>, fixed_pitch: bool },
    /// CGB square channel 1 (has the sweep register)
    Square1 { duty: u8 },
    /// CGB square channel 2
    Square2 { duty: u8 },
    /// CGB programmable wave: 32 4-bit samples packed two per byte
    Wave { pattern: Arc<[u8; 16]> },
    /// CGB noise; `seven_bit` selects the short LFSR
    Noise { seven_bit: bool },
    /// Fixed-envelope PCM used for cries; `reverse` plays back-to-front
    Cry { wave: Arc<WaveData>, reverse: bool },
    /// Key-range multisample: `table[key]` indexes into `voices`
    Keysplit { voices: Arc<Vec<Voice>>, table: Arc<[u8; 128]> },
    /// Drumkit: `voices[key]`, played at the sub-voice's own key
    KeysplitAll { voices: Arc<Vec<Voice>> },
    /// Empty program slot; note-ons are dropped
    None,
}

/// One instrument definition from a voicegroup
#[derive(Clone)]
pub struct Voice {
    /// Natural pitch (for drumkit entries, the fixed playback key)
    pub key: u8,
    /// Gate time in ticks; 0 plays until note-off
    pub length: u8,
    /// Pan byte for drum entries (0x80 flag + position) or the square-1
    /// sweep register
    pub pan_sweep: u8,
    pub adsr: Adsr,
    pub kind: VoiceKind,
}

impl Voice {
    /// An unset program slot
    pub fn empty() -> Self {
        Self {
            key: 60,
            length: 0,
            pan_sweep: 0,
            adsr: Adsr::full(),
            kind: VoiceKind::None,
        }
    }

    pub fn direct_sound(key: u8, adsr: Adsr, wave: Arc<WaveData>) -> Self {
        Self { key, length: 0, pan_sweep: 0, adsr, kind: VoiceKind::DirectSound { wave, fixed_pitch: false } }
    }

    pub fn direct_sound_no_resample(key: u8, adsr: Adsr, wave: Arc<WaveData>) -> Self {
        Self { key, length: 0, pan_sweep: 0, adsr, kind: VoiceKind::DirectSound { wave, fixed_pitch: true } }
    }

    pub fn square1(key: u8, adsr: Adsr, duty: u8, sweep: u8) -> Self {
        Self { key, length: 0, pan_sweep: sweep, adsr, kind: VoiceKind::Square1 { duty: duty & 3 } }
    }

    pub fn square2(key: u8, adsr: Adsr, duty: u8) -> Self {
        Self { key, length: 0, pan_sweep: 0, adsr, kind: VoiceKind::Square2 { duty: duty & 3 } }
    }

    pub fn programmable_wave(key: u8, adsr: Adsr, pattern: [u8; 16]) -> Self {
        Self { key, length: 0, pan_sweep: 0, adsr, kind: VoiceKind::Wave { pattern: Arc::new(pattern) } }
    }

    pub fn noise(key: u8, adsr: Adsr, seven_bit: bool) -> Self {
        Self { key, length: 0, pan_sweep: 0, adsr, kind: VoiceKind::Noise { seven_bit } }
    }

    pub fn cry(key: u8, wave: Arc<WaveData>, reverse: bool) -> Self {
        Self { key, length: 0, pan_sweep: 0, adsr: Adsr::full(), kind: VoiceKind::Cry { wave, reverse } }
    }

    pub fn keysplit(voices: Arc<Vec<Voice>>, table: Arc<[u8; 128]>) -> Self {
        Self { key: 60, length: 0, pan_sweep: 0, adsr: Adsr::full(), kind: VoiceKind::Keysplit { voices, table } }
    }

    pub fn keysplit_all(voices: Arc<Vec<Voice>>) -> Self {
        Self { key: 60, length: 0, pan_sweep: 0, adsr: Adsr::full(), kind: VoiceKind::KeysplitAll { voices } }
    }

    /// Whether this entry is itself a keysplit layer (nesting is forbidden)
    pub fn is_keysplit(&self) -> bool {
        matches!(self.kind, VoiceKind::Keysplit { .. } | VoiceKind::KeysplitAll { .. })
    }
}

/// A 128-slot program table
///
/// Built once by the loader, installed into the engine via `set_voicegroup`,
/// and shared read-only from then on.
pub struct Voicegroup {
    voices: Vec<Voice>,
}

impl Voicegroup {
    /// Build a voicegroup, padding or truncating to exactly 128 entries
    pub fn new(mut voices: Vec<Voice>) -> Self {
        voices.resize_with(128, Voice::empty);
        Self { voices }
    }

    /// Look up a program slot
    #[inline]
    pub fn voice(&self, program: u8) -> &Voice {
        &self.voices[(program & 0x7F) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_byte_repeats_last_sample() {
        let wav = WaveData::new(32768 * 1024, None, vec![1, 2, 3]);
        assert_eq!(wav.size, 3);
        assert_eq!(wav.samples.len(), 4);
        assert_eq!(wav.samples[3], 3);
    }

    #[test]
    fn test_loop_len() {
        let wav = WaveData::new(32768 * 1024, Some(100), vec![0; 300]);
        assert!(wav.looped);
        assert_eq!(wav.loop_len(), 200);
    }

    #[test]
    fn test_voicegroup_pads_to_128() {
        let vg = Voicegroup::new(vec![Voice::square2(60, Adsr::full(), 2)]);
        assert!(matches!(vg.voice(0).kind, VoiceKind::Square2 { .. }));
        assert!(matches!(vg.voice(127).kind, VoiceKind::None));
    }
}
