//! m4a engine core
//!
//! A software recreation of the GBA sound driver's synthesis pipeline.
//! Provides 16 tracks feeding up to 12 software-mixed PCM channels and the
//! four CGB channels, with the hardware engine's envelopes, modulation LFO,
//! tempo accumulator, and reverb.
//!
//! The main entry point is `Engine::process()`, which renders stereo float
//! frames at the host rate while running the 59.7275 Hz VBlank tick
//! internally. Events (`note_on`, `cc`, ...) apply at the start of the next
//! rendered frame; hosts slice their renders at event boundaries for
//! sample-accurate placement.

pub mod cgb;
pub mod pcm;
pub mod reverb;
pub mod tables;
pub mod track;
pub mod voice;


use std::sync::Arc;

use cgb::{CgbChannel, CgbNote};
use pcm::{PcmChannel, PcmNote, STATUS_STOP};
use reverb::Reverb;
use tables::{
    midi_key_to_cgb_freq, midi_key_to_freq, MAX_PCM_CHANNELS, MAX_TRACKS, NUM_CGB_CHANNELS,
    PCM_DIV_FREQ, PCM_DMA_RATE, TEMPO_PERIOD, TICK_RATE,
};
use track::{Track, MOD_VIBRATO};
use voice::{Voice, VoiceKind, Voicegroup, WaveData};

/// Compute a PCM channel's Q23 frequency word for a resampled voice.
///
/// `midiKeyToFreq * divFreq` lands at Q26 source-samples per GBA output
/// sample (a native-rate wave at middle C hits exactly 0x4000000); the
/// mixer's fractional position is Q23, and `scale` maps GBA output samples
/// onto host frames.
fn pcm_frequency_word(wav_freq: u32, key: i32, fine: u8, scale: f64) -> u32 {
    let q26 = midi_key_to_freq(wav_freq, key, fine) as u64 * PCM_DIV_FREQ as u64;
    ((q26 >> 3) as f64 * scale) as u32
}

/// The m4a sound engine
///
/// A plain value: no global state, no locks, no internal threads. Every
/// method must be called from a single thread (typically the host's audio
/// thread); a GUI changing settings marshals through the host.
pub struct Engine {
    sample_rate: f32,
    samples_per_tick: f32,
    tick_acc: f32,
    /// GBA output samples per host frame (13379 / sampleRate)
    scale: f64,
    tracks: [Track; MAX_TRACKS],
    pcm: [PcmChannel; MAX_PCM_CHANNELS],
    cgb: [CgbChannel; NUM_CGB_CHANNELS],
    reverb: Reverb,
    voicegroup: Option<Arc<Voicegroup>>,
    /// PCM mixer master volume 0..15
    master_volume: u8,
    /// Song-level volume 0..127, folded into every track volume
    song_master_volume: u8,
    /// How many PCM channels allocation may use (1..12)
    max_pcm_channels: u8,
    /// 15-frame cycle driving the CGB envelope double-step
    c15: u8,
    analog_filter: bool,
    filter_l: f32,
    filter_r: f32,
    /// Effective tempo; 150 drains the accumulator once per tick
    tempo_i: u16,
    tempo_c: u32,
    /// Tempo multiplier in 1/256 units (256 = identity)
    tempo_u: u16,
}

impl Engine {
    /// Build an engine for a host sample rate. The reverb delay line is the
    /// only allocation; failure there is the only way construction fails.
    pub fn new(sample_rate: f32) -> Result<Self, String> {
        if !sample_rate.is_finite() || sample_rate < 1.0 {
            return Err(format!("Invalid sample rate: {}", sample_rate));
        }
        let reverb = Reverb::new(sample_rate)?;
        Ok(Self {
            sample_rate,
            samples_per_tick: sample_rate / TICK_RATE,
            tick_acc: 0.0,
            scale: PCM_DMA_RATE as f64 / sample_rate as f64,
            tracks: std::array::from_fn(|_| Track::new()),
            pcm: std::array::from_fn(|_| PcmChannel::new()),
            cgb: std::array::from_fn(|i| CgbChannel::new(i as u8 + 1)),
            reverb,
            voicegroup: None,
            master_volume: 15,
            song_master_volume: 127,
            max_pcm_channels: 5,
            c15: 14,
            analog_filter: false,
            filter_l: 0.0,
            filter_r: 0.0,
            tempo_i: TEMPO_PERIOD,
            tempo_c: 0,
            tempo_u: 256,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    // =========================================================================
    // Voicegroup
    // =========================================================================

    /// Install a voicegroup. Sounding notes keep the waves they hold; new
    /// program changes resolve against the new group immediately.
    pub fn set_voicegroup(&mut self, group: Arc<Voicegroup>) {
        self.voicegroup = Some(group);
    }

    pub fn clear_voicegroup(&mut self) {
        self.voicegroup = None;
    }

    /// Re-resolve every track's current voice from the installed voicegroup
    /// by its remembered program number.
    pub fn refresh_voices(&mut self) {
        for tr in &mut self.tracks {
            tr.voice = self
                .voicegroup
                .as_ref()
                .map(|vg| vg.voice(tr.program).clone());
        }
    }

    // =========================================================================
    // Global settings
    // =========================================================================

    /// PCM mixer master volume, 0..15
    pub fn set_master_volume(&mut self, volume: u8) {
        self.master_volume = volume.min(15);
    }

    /// Song-level volume 0..127; rescales every track
    pub fn set_song_volume(&mut self, volume: u8) {
        self.song_master_volume = volume.min(127);
        for ti in 0..MAX_TRACKS {
            let tr = &mut self.tracks[ti];
            tr.volume = (tr.raw_volume as u32 * self.song_master_volume as u32 / 127) as u8;
            tr.vol_pit_set();
            self.push_track_volumes(ti);
        }
    }

    pub fn set_reverb_amount(&mut self, amount: u8) {
        self.reverb.set_amount(amount);
    }

    pub fn set_analog_filter(&mut self, enabled: bool) {
        self.analog_filter = enabled;
        if !enabled {
            self.filter_l = 0.0;
            self.filter_r = 0.0;
        }
    }

    /// Cap the PCM channel pool, 1..12
    pub fn set_max_pcm_channels(&mut self, count: u8) {
        self.max_pcm_channels = count.clamp(1, MAX_PCM_CHANNELS as u8);
    }

    pub fn set_tempo_bpm(&mut self, bpm: f64) {
        self.tempo_i = bpm.max(1.0).round().min(65535.0) as u16;
    }

    /// Note priority used when channels must be stolen
    pub fn set_track_priority(&mut self, track: u8, priority: u8) {
        if let Some(tr) = self.tracks.get_mut(track as usize) {
            tr.priority = priority;
        }
    }

    /// Pseudo-echo tail applied to notes started on this track
    pub fn set_track_pseudo_echo(&mut self, track: u8, volume: u8, length: u8) {
        if let Some(tr) = self.tracks.get_mut(track as usize) {
            tr.echo_volume = volume;
            tr.echo_length = length;
        }
    }

    /// Zero all channels and clear the reverb tail and filter state
    pub fn reset(&mut self) {
        self.all_sound_off();
        self.reverb.reset();
        self.filter_l = 0.0;
        self.filter_r = 0.0;
        self.tick_acc = 0.0;
        self.tempo_c = 0;
        self.c15 = 14;
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    /// Select a program: copies the voicegroup entry into the track
    pub fn program_change(&mut self, track: u8, program: u8) {
        if track as usize >= MAX_TRACKS || program >= 128 {
            return;
        }
        let tr = &mut self.tracks[track as usize];
        tr.program = program;
        tr.voice = self
            .voicegroup
            .as_ref()
            .map(|vg| vg.voice(program).clone());
    }

    /// Start a note. Resolves keysplit layers, allocates a channel, and
    /// primes its envelope so the attack is audible immediately.
    pub fn note_on(&mut self, track: u8, key: u8, velocity: u8) {
        if track as usize >= MAX_TRACKS || key >= 128 || velocity == 0 {
            return;
        }
        let ti = track as usize;
        let Some(voice) = self.tracks[ti].voice.clone() else {
            return;
        };

        let mut play_key = key;
        let mut rhythm_pan = 0i8;
        let resolved = match &voice.kind {
            VoiceKind::KeysplitAll { voices } => {
                let Some(sub) = voices.get(key as usize) else {
                    return;
                };
                if sub.is_keysplit() || matches!(sub.kind, VoiceKind::None) {
                    return;
                }
                play_key = sub.key;
                if sub.pan_sweep & 0x80 != 0 {
                    rhythm_pan = ((sub.pan_sweep as i32 - 0xC0) * 2) as i8;
                }
                sub.clone()
            }
            VoiceKind::Keysplit { voices, table } => {
                let Some(sub) = voices.get(table[key as usize] as usize) else {
                    return;
                };
                if sub.is_keysplit() || matches!(sub.kind, VoiceKind::None) {
                    return;
                }
                sub.clone()
            }
            VoiceKind::None => return,
            _ => voice.clone(),
        };

        self.tracks[ti].vol_pit_set();
        self.tracks[ti].lfo_note_start();

        match &resolved.kind {
            VoiceKind::DirectSound { wave, fixed_pitch } => {
                let (wave, fixed) = (Arc::clone(wave), *fixed_pitch);
                self.start_pcm(ti, &resolved, wave, fixed, false, key, play_key, velocity, rhythm_pan);
            }
            VoiceKind::Cry { wave, reverse } => {
                let (wave, reverse) = (Arc::clone(wave), *reverse);
                self.start_pcm(ti, &resolved, wave, false, reverse, key, play_key, velocity, rhythm_pan);
            }
            VoiceKind::Square1 { .. }
            | VoiceKind::Square2 { .. }
            | VoiceKind::Wave { .. }
            | VoiceKind::Noise { .. } => {
                self.start_cgb(ti, &resolved, key, play_key, velocity);
            }
            VoiceKind::Keysplit { .. } | VoiceKind::KeysplitAll { .. } | VoiceKind::None => {}
        }
    }

    /// Move every channel sounding (track, key) into release
    pub fn note_off(&mut self, track: u8, key: u8) {
        if track as usize >= MAX_TRACKS || key >= 128 {
            return;
        }
        for ch in &mut self.pcm {
            if ch.is_active() && ch.track == track && ch.midi_key == key && ch.status & STATUS_STOP == 0 {
                ch.status |= STATUS_STOP;
            }
        }
        for ch in &mut self.cgb {
            if ch.is_active() && ch.track == track && ch.midi_key == key && ch.status & STATUS_STOP == 0 {
                ch.status |= STATUS_STOP;
            }
        }
    }

    /// Apply a MIDI controller
    pub fn cc(&mut self, track: u8, controller: u8, value: u8) {
        if track as usize >= MAX_TRACKS || value > 127 {
            return;
        }
        let ti = track as usize;
        match controller {
            0x01 => {
                let tr = &mut self.tracks[ti];
                tr.mod_depth = value;
                if value == 0 {
                    tr.lfo_speed_c = 0;
                    if tr.mod_m != 0 {
                        tr.mod_m = 0;
                        tr.vol_pit_set();
                        self.push_track_volumes(ti);
                        self.push_track_pitch(ti);
                    }
                }
            }
            0x07 => {
                let tr = &mut self.tracks[ti];
                tr.raw_volume = value;
                tr.volume = (value as u32 * self.song_master_volume as u32 / 127) as u8;
                tr.vol_pit_set();
                self.push_track_volumes(ti);
            }
            0x0A => {
                let tr = &mut self.tracks[ti];
                tr.pan = (value as i16 - 64) as i8;
                tr.vol_pit_set();
                self.push_track_volumes(ti);
            }
            // Legacy MEMACC/label controllers, accepted silently
            0x0C..=0x11 => {}
            0x14 => {
                let tr = &mut self.tracks[ti];
                tr.bend_range = value;
                tr.vol_pit_set();
                self.push_track_pitch(ti);
            }
            0x15 => self.tracks[ti].lfo_speed = value,
            0x16 => self.tracks[ti].mod_type = value.min(2),
            0x18 => self.tracks[ti].tune = (value as i16 - 64) as i8,
            0x1A => self.tracks[ti].lfo_delay = value,
            0x78 => self.all_sound_off(),
            0x7B => self.all_notes_off(track),
            _ => {}
        }
    }

    /// Apply a 14-bit signed pitch bend (-8192..8191)
    pub fn pitch_bend(&mut self, track: u8, bend: i16) {
        if track as usize >= MAX_TRACKS {
            return;
        }
        let ti = track as usize;
        self.tracks[ti].bend = (bend.clamp(-8192, 8191) >> 7) as i8;
        self.tracks[ti].vol_pit_set();
        self.push_track_pitch(ti);
    }

    /// Release every note on one track
    pub fn all_notes_off(&mut self, track: u8) {
        if track as usize >= MAX_TRACKS {
            return;
        }
        for ch in &mut self.pcm {
            if ch.is_active() && ch.track == track {
                ch.status |= STATUS_STOP;
            }
        }
        for ch in &mut self.cgb {
            if ch.is_active() && ch.track == track {
                ch.status |= STATUS_STOP;
            }
        }
    }

    /// Hard-stop everything
    pub fn all_sound_off(&mut self) {
        for ch in &mut self.pcm {
            ch.zero();
        }
        for ch in &mut self.cgb {
            ch.zero();
        }
    }

    // =========================================================================
    // Channel allocation and note start
    // =========================================================================

    /// Find a PCM channel for a new note of the given priority. Free
    /// channels win; then releasing channels (lowest priority, ties to the
    /// highest track); then the weakest active channel, but only if the new
    /// note's priority is at least the victim's.
    fn alloc_pcm(&self, priority: u8) -> Option<usize> {
        let max = self.max_pcm_channels as usize;
        let mut released: Option<usize> = None;
        let mut active: Option<usize> = None;

        for i in 0..max {
            let ch = &self.pcm[i];
            if !ch.is_active() {
                return Some(i);
            }
            let slot = if ch.is_stopping() { &mut released } else { &mut active };
            *slot = match *slot {
                None => Some(i),
                Some(j) => {
                    let other = &self.pcm[j];
                    let weaker = ch.priority < other.priority
                        || (ch.priority == other.priority && ch.track >= other.track);
                    Some(if weaker { i } else { j })
                }
            };
        }

        if released.is_some() {
            return released;
        }
        match active {
            Some(i) if priority >= self.pcm[i].priority => Some(i),
            _ => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn start_pcm(
        &mut self,
        ti: usize,
        voice: &Voice,
        wave: Arc<WaveData>,
        fixed_pitch: bool,
        reverse: bool,
        midi_key: u8,
        play_key: u8,
        velocity: u8,
        rhythm_pan: i8,
    ) {
        if wave.size == 0 {
            return;
        }
        let priority = self.tracks[ti].priority;
        let Some(ci) = self.alloc_pcm(priority) else {
            return;
        };

        let tr = &self.tracks[ti];
        let frequency = if fixed_pitch {
            (0x80_0000u32 as f64 * self.scale) as u32
        } else {
            let key = play_key as i32 + tr.key_m as i32;
            pcm_frequency_word(wave.freq, key, tr.pit_m, self.scale)
        };

        let note = PcmNote {
            wave,
            fixed_pitch,
            reverse,
            adsr: voice.adsr,
            midi_key,
            play_key,
            velocity,
            priority,
            rhythm_pan,
            gate: voice.length,
            echo_volume: tr.echo_volume,
            echo_length: tr.echo_length,
            track: ti as u8,
            frequency,
        };
        let (vol_ml, vol_mr) = (tr.vol_ml, tr.vol_mr);
        self.pcm[ci].key_on(note, vol_ml, vol_mr, self.master_volume);
    }

    fn start_cgb(&mut self, ti: usize, voice: &Voice, midi_key: u8, play_key: u8, velocity: u8) {
        let (ty, duty, pattern, seven_bit) = match &voice.kind {
            VoiceKind::Square1 { duty } => (1u8, *duty, [0u8; 16], false),
            VoiceKind::Square2 { duty } => (2, *duty, [0u8; 16], false),
            VoiceKind::Wave { pattern } => (3, 0, **pattern, false),
            VoiceKind::Noise { seven_bit } => (4, 0, [0u8; 16], *seven_bit),
            _ => return,
        };
        let ci = (ty - 1) as usize;
        let priority = self.tracks[ti].priority;

        let ch = &self.cgb[ci];
        if ch.is_active() {
            let steal = priority > ch.priority
                || (priority == ch.priority && ti as u8 <= ch.track);
            if !steal {
                return;
            }
        }

        let tr = &self.tracks[ti];
        let key = play_key as i32 + tr.key_m as i32;
        let mut frequency = midi_key_to_cgb_freq(ty, key, tr.pit_m);
        if ty == 4 && seven_bit {
            frequency |= 8;
        }

        // A sweep with an empty time nibble would freeze square 1 on
        // hardware; the driver substitutes the neutral register.
        let mut sweep = voice.pan_sweep;
        if ty == 1 && sweep & 0x70 == 0 {
            sweep = 0x08;
        }

        let note = CgbNote {
            adsr: voice.adsr,
            midi_key,
            play_key,
            velocity,
            priority,
            gate: voice.length,
            echo_volume: tr.echo_volume,
            echo_length: tr.echo_length,
            track: ti as u8,
            frequency,
            duty,
            sweep,
            pattern,
            seven_bit,
        };
        let (vol_ml, vol_mr) = (tr.vol_ml, tr.vol_mr);
        let sample_rate = self.sample_rate;
        self.cgb[ci].key_on(note, vol_ml, vol_mr, sample_rate);
    }

    // =========================================================================
    // Derived-state propagation
    // =========================================================================

    /// Push the track's current stereo levels into its sounding channels
    fn push_track_volumes(&mut self, ti: usize) {
        let (vol_ml, vol_mr) = (self.tracks[ti].vol_ml, self.tracks[ti].vol_mr);
        let master = self.master_volume;
        for ch in &mut self.pcm {
            if ch.is_active() && ch.track as usize == ti {
                ch.set_stereo_volume(vol_ml, vol_mr, master);
            }
        }
        for ch in &mut self.cgb {
            if ch.is_active() && ch.track as usize == ti {
                ch.set_stereo_volume(vol_ml, vol_mr);
            }
        }
    }

    /// Recompute frequency words for the track's sounding channels from the
    /// current keyM/pitM (bend, vibrato, bend-range changes)
    fn push_track_pitch(&mut self, ti: usize) {
        let (key_m, pit_m) = (self.tracks[ti].key_m, self.tracks[ti].pit_m);
        let scale = self.scale;
        let sample_rate = self.sample_rate;

        for ch in &mut self.pcm {
            if !ch.is_active() || ch.track as usize != ti || ch.fixed_pitch {
                continue;
            }
            if let Some(wave) = &ch.wave {
                let key = ch.play_key as i32 + key_m as i32;
                ch.frequency = pcm_frequency_word(wave.freq, key, pit_m, scale);
            }
        }
        for ch in &mut self.cgb {
            if !ch.is_active() || ch.track as usize != ti {
                continue;
            }
            let key = ch.play_key as i32 + key_m as i32;
            let mut reg = midi_key_to_cgb_freq(ch.ty, key, pit_m);
            if ch.ty == 4 && ch.seven_bit {
                reg |= 8;
            }
            ch.set_frequency(reg, sample_rate);
        }
    }

    // =========================================================================
    // Tick and render
    // =========================================================================

    /// One VBlank-equivalent tick: gates, envelopes, tempo, LFO
    fn tick(&mut self) {
        self.c15 = if self.c15 == 0 { 14 } else { self.c15 - 1 };
        let master = self.master_volume;

        for ch in &mut self.pcm {
            if !ch.is_active() {
                continue;
            }
            if ch.gate > 0 {
                ch.gate -= 1;
                if ch.gate == 0 {
                    ch.status |= STATUS_STOP;
                }
            }
            ch.env_tick(master);
        }

        let c15 = self.c15;
        for ch in &mut self.cgb {
            if !ch.is_active() {
                continue;
            }
            if ch.gate > 0 {
                ch.gate -= 1;
                if ch.gate == 0 {
                    ch.status |= STATUS_STOP;
                }
            }
            ch.env_tick(c15);
        }

        self.tempo_c += (self.tempo_i as u32 * self.tempo_u as u32) >> 8;
        while self.tempo_c >= TEMPO_PERIOD as u32 {
            self.tempo_c -= TEMPO_PERIOD as u32;
            for ti in 0..MAX_TRACKS {
                if self.tracks[ti].lfo_tick() {
                    if self.tracks[ti].mod_type == MOD_VIBRATO {
                        self.push_track_pitch(ti);
                    } else {
                        self.push_track_volumes(ti);
                    }
                }
            }
        }
    }

    /// Render stereo frames. Always fills `min(out_l.len(), out_r.len())`
    /// frames; never fails.
    ///
    /// Pipeline per frame:
    /// 1. Advance the tick accumulator, running the engine tick on overflow
    /// 2. Mix active PCM channels into an i32 stereo pair
    /// 3. Reverb tap over the PCM mix
    /// 4. Mix CGB channels (dry, after the reverb)
    /// 5. Scale to float; optional one-pole analog filter
    pub fn process(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());
        for i in 0..frames {
            self.tick_acc += 1.0;
            if self.tick_acc >= self.samples_per_tick {
                self.tick_acc -= self.samples_per_tick;
                self.tick();
            }

            let mut mix_l = 0i32;
            let mut mix_r = 0i32;
            for ch in &mut self.pcm {
                ch.render(&mut mix_l, &mut mix_r);
            }
            self.reverb.process(&mut mix_l, &mut mix_r);
            for ch in &mut self.cgb {
                ch.render(&mut mix_l, &mut mix_r);
            }

            let mut l = mix_l as f32 / 256.0;
            let mut r = mix_r as f32 / 256.0;
            if self.analog_filter {
                self.filter_l = self.filter_l * 0.6 + l * 0.4;
                self.filter_r = self.filter_r * 0.6 + r * 0.4;
                l = self.filter_l;
                r = self.filter_r;
            }
            out_l[i] = l;
            out_r[i] = r;
        }
    }
}
