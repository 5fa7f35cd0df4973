//! DirectSound (PCM) channel
//!
//! Each PCM channel handles the complete per-voice pipeline:
//! 1. Linear interpolation — signed 8-bit samples at a Q23 fractional position
//! 2. ADSR envelope — multiplicative on the 0..255 scale, ticked at ~60 Hz
//! 3. Volume — velocity/pan-scaled stereo levels folded with the envelope
//!
//! The envelope lives in a single status byte exactly like the hardware
//! engine keeps it, with the two-bit phase field counting down
//! attack → decay → sustain → release and separate flags for the start/stop
//! edges, looping, and the pseudo-echo tail.

use std::sync::Arc;

use super::voice::{Adsr, WaveData};

/// Note-on edge; cleared by the first envelope step
pub const STATUS_START: u8 = 0x80;
/// Note-off edge; moves the envelope into release
pub const STATUS_STOP: u8 = 0x40;
/// Wave loops instead of ending
pub const STATUS_LOOP: u8 = 0x10;
/// Pseudo-echo tail in progress
pub const STATUS_IEC: u8 = 0x04;
pub const ENV_MASK: u8 = 0x03;
pub const ENV_ATTACK: u8 = 3;
pub const ENV_DECAY: u8 = 2;
pub const ENV_SUSTAIN: u8 = 1;
pub const ENV_RELEASE: u8 = 0;
/// Any of these bits set means the channel is sounding
pub const STATUS_ACTIVE: u8 = STATUS_START | STATUS_STOP | STATUS_IEC | ENV_MASK;

/// Everything `note_on` resolved for a fresh PCM note
pub struct PcmNote {
    pub wave: Arc<WaveData>,
    pub fixed_pitch: bool,
    pub reverse: bool,
    pub adsr: Adsr,
    pub midi_key: u8,
    pub play_key: u8,
    pub velocity: u8,
    pub priority: u8,
    pub rhythm_pan: i8,
    pub gate: u8,
    pub echo_volume: u8,
    pub echo_length: u8,
    pub track: u8,
    /// Q23 samples-per-output-frame word
    pub frequency: u32,
}

pub struct PcmChannel {
    pub status: u8,
    /// No-resample flag copied from the voice type
    pub fixed_pitch: bool,
    /// Cry-reverse playback (end towards start)
    pub reverse: bool,
    pub adsr: Adsr,
    /// Current envelope volume 0..255
    pub env: u8,
    /// Stereo note volumes (velocity + pan + track levels)
    pub left_volume: u8,
    pub right_volume: u8,
    /// Envelope folded into the stereo volumes, refreshed every step
    pub env_vol_l: u8,
    pub env_vol_r: u8,
    pub echo_volume: u8,
    pub echo_length: u8,
    pub midi_key: u8,
    pub play_key: u8,
    pub velocity: u8,
    pub priority: u8,
    pub rhythm_pan: i8,
    /// Remaining ticks until auto note-off; 0 = no gate
    pub gate: u8,
    pub wave: Option<Arc<WaveData>>,
    /// Current sample index into the wave
    pub pos: u32,
    /// Source samples left before end-of-wave / loop wrap
    pub count: i32,
    /// Q23 fractional position below `pos`
    pub fine_pos: u32,
    /// Q23 samples advanced per output frame
    pub frequency: u32,
    /// Cached loop length (size - loopStart), 0 when not looping
    pub loop_len: u32,
    /// Owning track index
    pub track: u8,
}

impl PcmChannel {
    pub fn new() -> Self {
        Self {
            status: 0,
            fixed_pitch: false,
            reverse: false,
            adsr: Adsr::full(),
            env: 0,
            left_volume: 0,
            right_volume: 0,
            env_vol_l: 0,
            env_vol_r: 0,
            echo_volume: 0,
            echo_length: 0,
            midi_key: 0,
            play_key: 0,
            velocity: 0,
            priority: 0,
            rhythm_pan: 0,
            gate: 0,
            wave: None,
            pos: 0,
            count: 0,
            fine_pos: 0,
            frequency: 0,
            loop_len: 0,
            track: 0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status & STATUS_ACTIVE != 0
    }

    /// In release or pseudo-echo, eligible for soft stealing
    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.status & (STATUS_STOP | STATUS_IEC) != 0
    }

    #[inline]
    pub fn kill(&mut self) {
        self.status = 0;
    }

    /// Full reset, used by all-sound-off
    pub fn zero(&mut self) {
        *self = Self::new();
    }

    /// Begin a note. The caller passes the track's current stereo levels;
    /// the envelope start step runs immediately so the attack is audible
    /// before the first engine tick.
    pub fn key_on(&mut self, note: PcmNote, vol_ml: u8, vol_mr: u8, master_volume: u8) {
        // Reverse playback walks from the end; loop points only make sense
        // going forward.
        let loop_bit = if note.wave.looped && !note.reverse { STATUS_LOOP } else { 0 };
        self.status = STATUS_START | loop_bit;
        self.fixed_pitch = note.fixed_pitch;
        self.reverse = note.reverse;
        self.adsr = note.adsr;
        self.env = 0;
        self.echo_volume = note.echo_volume;
        self.echo_length = note.echo_length;
        self.midi_key = note.midi_key;
        self.play_key = note.play_key;
        self.velocity = note.velocity;
        self.priority = note.priority;
        self.rhythm_pan = note.rhythm_pan;
        self.gate = note.gate;
        self.count = note.wave.size as i32;
        self.pos = if note.reverse { note.wave.size.saturating_sub(1) } else { 0 };
        self.fine_pos = 0;
        self.frequency = note.frequency;
        self.loop_len = note.wave.loop_len();
        self.track = note.track;
        self.wave = Some(note.wave);

        self.set_stereo_volume(vol_ml, vol_mr, master_volume);
        self.env_tick(master_volume);
    }

    /// Recompute the note's stereo volumes from the track levels and fold in
    /// the current envelope. Called at note-on and whenever CC7/CC10/tremolo
    /// move the track.
    pub fn set_stereo_volume(&mut self, vol_ml: u8, vol_mr: u8, master_volume: u8) {
        let (l, r) = super::track::channel_volumes(self.velocity, self.rhythm_pan, vol_ml, vol_mr);
        self.left_volume = l;
        self.right_volume = r;
        self.update_env_volumes(master_volume);
    }

    fn update_env_volumes(&mut self, master_volume: u8) {
        let vol = ((master_volume as u32 + 1) * self.env as u32) >> 4;
        self.env_vol_r = ((self.right_volume as u32 * vol) >> 8) as u8;
        self.env_vol_l = ((self.left_volume as u32 * vol) >> 8) as u8;
    }

    /// One ~60 Hz envelope step
    pub fn env_tick(&mut self, master_volume: u8) {
        let status = self.status;

        if status & STATUS_START != 0 {
            if status & STATUS_STOP != 0 {
                // Killed before it ever sounded
                self.kill();
                return;
            }
            // Bump by the attack once right away so the note is not silent
            // until the first tick lands.
            self.status = (status & STATUS_LOOP) | ENV_ATTACK;
            let env = self.adsr.attack as u32;
            if env >= 0xFF {
                self.env = 0xFF;
                self.status = (self.status & !ENV_MASK) | ENV_DECAY;
            } else {
                self.env = env as u8;
            }
        } else if status & STATUS_IEC != 0 {
            self.echo_length = self.echo_length.saturating_sub(1);
            if self.echo_length == 0 {
                self.kill();
                return;
            }
        } else if status & STATUS_STOP != 0 {
            self.status &= !ENV_MASK; // ENV_RELEASE
            self.env = ((self.env as u32 * self.adsr.release as u32) >> 8) as u8;
            if self.env <= self.echo_volume {
                if self.echo_volume == 0 {
                    self.kill();
                    return;
                }
                self.env = self.echo_volume;
                self.status |= STATUS_IEC;
            }
        } else {
            match status & ENV_MASK {
                ENV_ATTACK => {
                    let env = self.env as u32 + self.adsr.attack as u32;
                    if env >= 0xFF {
                        self.env = 0xFF;
                        self.status = (status & !ENV_MASK) | ENV_DECAY;
                    } else {
                        self.env = env as u8;
                    }
                }
                ENV_DECAY => {
                    self.env = ((self.env as u32 * self.adsr.decay as u32) >> 8) as u8;
                    if self.env <= self.adsr.sustain {
                        if self.adsr.sustain == 0 {
                            // Straight into the pseudo-echo tail
                            if self.echo_volume == 0 {
                                self.kill();
                                return;
                            }
                            self.env = self.echo_volume;
                            self.status = (status & !ENV_MASK) | STATUS_IEC;
                        } else {
                            self.env = self.adsr.sustain;
                            self.status = (status & !ENV_MASK) | ENV_SUSTAIN;
                        }
                    }
                }
                _ => {} // sustain holds, release is reached via STOP
            }
        }

        self.update_env_volumes(master_volume);
    }

    /// Mix one output frame into the stereo accumulators and advance the
    /// fractional position.
    pub fn render(&mut self, mix_l: &mut i32, mix_r: &mut i32) {
        if !self.is_active() || self.count <= 0 {
            return;
        }
        let Some(wave) = &self.wave else { return };

        let pos = self.pos as usize;
        let sample = if self.fixed_pitch {
            wave.samples[pos] as i32
        } else {
            let s0 = wave.samples[pos] as i32;
            let s1 = if self.reverse {
                wave.samples[pos.saturating_sub(1)] as i32
            } else {
                wave.samples[pos + 1] as i32
            };
            s0 + (((s1 - s0) as i64 * self.fine_pos as i64) >> 23) as i32
        };

        *mix_r += (sample * self.env_vol_r as i32) >> 8;
        *mix_l += (sample * self.env_vol_l as i32) >> 8;

        self.fine_pos = self.fine_pos.wrapping_add(self.frequency);
        let advance = self.fine_pos >> 23;
        self.fine_pos &= 0x7F_FFFF;
        self.count -= advance as i32;

        if self.count <= 0 {
            if self.status & STATUS_LOOP != 0 && self.loop_len > 0 {
                while self.count <= 0 {
                    self.count += self.loop_len as i32;
                }
                self.pos = wave.loop_start + self.loop_len - self.count as u32;
            } else {
                self.kill();
            }
        } else if self.reverse {
            self.pos -= advance;
        } else {
            self.pos += advance;
        }
    }
}

impl Default for PcmChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wave(size: u32, loop_start: Option<u32>) -> Arc<WaveData> {
        let samples: Vec<i8> = (0..size).map(|i| (i % 100) as i8).collect();
        Arc::new(WaveData::new(13379 * 1024, loop_start, samples))
    }

    fn test_note(wave: Arc<WaveData>, adsr: Adsr) -> PcmNote {
        PcmNote {
            wave,
            fixed_pitch: true,
            reverse: false,
            adsr,
            midi_key: 60,
            play_key: 60,
            velocity: 127,
            priority: 0,
            rhythm_pan: 0,
            gate: 0,
            echo_volume: 0,
            echo_length: 0,
            track: 0,
            frequency: 0x80_0000, // one source sample per frame
        }
    }

    #[test]
    fn test_key_on_primes_attack() {
        let mut ch = PcmChannel::new();
        ch.key_on(test_note(test_wave(100, None), Adsr::new(80, 200, 128, 200)), 126, 127, 15);
        assert_eq!(ch.status & ENV_MASK, ENV_ATTACK);
        assert_eq!(ch.env, 80);
        assert!(ch.env_vol_l > 0 && ch.env_vol_r > 0);
    }

    #[test]
    fn test_instant_attack_jumps_to_decay() {
        let mut ch = PcmChannel::new();
        ch.key_on(test_note(test_wave(100, None), Adsr::new(0xFF, 200, 128, 200)), 126, 127, 15);
        assert_eq!(ch.status & ENV_MASK, ENV_DECAY);
        assert_eq!(ch.env, 0xFF);
    }

    #[test]
    fn test_decay_lands_on_sustain() {
        let mut ch = PcmChannel::new();
        ch.key_on(test_note(test_wave(100, None), Adsr::new(0xFF, 128, 100, 200)), 126, 127, 15);
        for _ in 0..20 {
            ch.env_tick(15);
        }
        assert_eq!(ch.status & ENV_MASK, ENV_SUSTAIN);
        assert_eq!(ch.env, 100);
    }

    #[test]
    fn test_release_without_echo_kills() {
        let mut ch = PcmChannel::new();
        ch.key_on(test_note(test_wave(100, None), Adsr::new(0xFF, 0xFF, 0xFF, 100)), 126, 127, 15);
        ch.status |= STATUS_STOP;
        for _ in 0..50 {
            ch.env_tick(15);
            if !ch.is_active() {
                break;
            }
        }
        assert!(!ch.is_active());
    }

    #[test]
    fn test_release_clamps_into_pseudo_echo() {
        let mut ch = PcmChannel::new();
        let mut note = test_note(test_wave(100, None), Adsr::new(0xFF, 0xFF, 0xFF, 100));
        note.echo_volume = 40;
        note.echo_length = 3;
        ch.key_on(note, 126, 127, 15);
        ch.status |= STATUS_STOP;
        for _ in 0..50 {
            ch.env_tick(15);
            if ch.status & STATUS_IEC != 0 {
                break;
            }
        }
        assert_eq!(ch.env, 40);
        // Tail runs for echo_length ticks, then dies
        ch.env_tick(15);
        ch.env_tick(15);
        assert!(ch.is_active());
        ch.env_tick(15);
        assert!(!ch.is_active());
    }

    #[test]
    fn test_loop_wraps_to_loop_start() {
        let mut ch = PcmChannel::new();
        ch.key_on(test_note(test_wave(200, Some(100)), Adsr::full()), 126, 127, 15);
        let (mut l, mut r) = (0, 0);
        // 200 frames at one sample per frame reaches the end exactly
        for _ in 0..200 {
            ch.render(&mut l, &mut r);
        }
        assert!(ch.is_active());
        assert_eq!(ch.pos, 100);
        assert_eq!(ch.count, 100);
    }

    #[test]
    fn test_non_looping_wave_dies_at_end() {
        let mut ch = PcmChannel::new();
        ch.key_on(test_note(test_wave(50, None), Adsr::full()), 126, 127, 15);
        let (mut l, mut r) = (0, 0);
        for _ in 0..60 {
            ch.render(&mut l, &mut r);
        }
        assert!(!ch.is_active());
    }

    #[test]
    fn test_reverse_playback_walks_backwards() {
        let mut ch = PcmChannel::new();
        let mut note = test_note(test_wave(50, None), Adsr::full());
        note.reverse = true;
        ch.key_on(note, 126, 127, 15);
        assert_eq!(ch.pos, 49);
        let (mut l, mut r) = (0, 0);
        ch.render(&mut l, &mut r);
        assert_eq!(ch.pos, 48);
        for _ in 0..60 {
            ch.render(&mut l, &mut r);
        }
        assert!(!ch.is_active());
    }

    #[test]
    fn test_fractional_position_stays_in_q23() {
        let mut ch = PcmChannel::new();
        let mut note = test_note(test_wave(1000, Some(0)), Adsr::full());
        note.fixed_pitch = false;
        note.frequency = 0xC0_0000; // 1.5 samples per frame
        ch.key_on(note, 126, 127, 15);
        let (mut l, mut r) = (0, 0);
        for _ in 0..5000 {
            ch.render(&mut l, &mut r);
            assert!(ch.fine_pos < 0x80_0000);
        }
        assert!(ch.is_active());
    }
}
