//! Standalone preview host
//!
//! Plays the engine live: opens the default audio output via cpal, connects
//! the first MIDI keyboard via midir, and routes decoded messages straight
//! into a shared [`Engine`] loaded with a small built-in demonstration
//! voicegroup (squares, wave, noise, and a looped PCM tone).
//!
//! Settings load from `agbsynth.ron` in the working directory when present.

use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use serde::{Deserialize, Serialize};

use agbsynth::engine::Engine;
use agbsynth::midi::{self, MidiMessage};
use agbsynth::{Adsr, Voice, Voicegroup, WaveData};

const SETTINGS_FILE: &str = "agbsynth.ron";

/// Lock a mutex, recovering gracefully from poisoning.
///
/// The engine sits between the MIDI callback and the audio callback; if one
/// of them panics while holding the lock we keep the other side running on
/// the recovered state instead of taking the whole process down.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        eprintln!("agbsynth: engine mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Preview settings, mirroring the knobs a plugin host persists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    reverb: u8,
    master_volume: u8,
    song_master_volume: u8,
    analog_filter: bool,
    max_pcm_channels: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reverb: 0,
            master_volume: 15,
            song_master_volume: 127,
            analog_filter: true,
            max_pcm_channels: 5,
        }
    }
}

fn load_settings() -> Settings {
    match fs::read_to_string(SETTINGS_FILE) {
        Ok(contents) => match ron::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("agbsynth: ignoring malformed {}: {}", SETTINGS_FILE, e);
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// A few playable instruments so the preview makes sound out of the box:
/// programs 0..3 are the four CGB channels, 4 is a looped PCM sine.
fn demo_voicegroup() -> Voicegroup {
    let cycle: Vec<i8> = (0..32)
        .map(|i| {
            let t = i as f64 / 32.0 * std::f64::consts::TAU;
            (t.sin() * 100.0) as i8
        })
        .collect();
    // One 32-sample cycle looped forever; freq = 261.63 Hz * 32 * 1024
    // makes it sound at middle C when played at its natural key.
    let sine = Arc::new(WaveData::new(8_573_350, Some(0), cycle));

    let held = Adsr::new(0, 0, 15, 1);
    Voicegroup::new(vec![
        Voice::square1(60, held, 2, 0),
        Voice::square2(60, held, 1),
        Voice::programmable_wave(
            60,
            held,
            [
                0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
                0xFE, 0xDC, 0xBA, 0x98, 0x76, 0x54, 0x32, 0x10,
            ],
        ),
        Voice::noise(60, Adsr::new(0, 2, 8, 2), false),
        Voice::direct_sound(60, Adsr::new(200, 240, 180, 220), sine),
    ])
}

fn build_audio_stream(
    engine: Arc<Mutex<Engine>>,
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::Stream, String> {
    let config = StreamConfig {
        channels: 2,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut left = vec![0.0f32; 2048];
    let mut right = vec![0.0f32; 2048];

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / 2;
                if left.len() < frames {
                    left.resize(frames, 0.0);
                    right.resize(frames, 0.0);
                }
                {
                    let mut engine = lock_or_recover(&engine);
                    engine.process(&mut left[..frames], &mut right[..frames]);
                }
                for i in 0..frames {
                    data[i * 2] = left[i];
                    data[i * 2 + 1] = right[i];
                }
            },
            |err| eprintln!("agbsynth: audio stream error: {}", err),
            None,
        )
        .map_err(|e| format!("Failed to build audio stream: {}", e))?;

    stream
        .play()
        .map_err(|e| format!("Failed to start audio stream: {}", e))?;
    Ok(stream)
}

/// Connect the first MIDI input port, if any, and forward messages to the
/// engine. Returns the connection handle to keep it alive.
fn connect_midi(engine: Arc<Mutex<Engine>>) -> Option<midir::MidiInputConnection<()>> {
    let midi_in = match midir::MidiInput::new("agbsynth") {
        Ok(m) => m,
        Err(e) => {
            eprintln!("agbsynth: MIDI unavailable: {}", e);
            return None;
        }
    };

    let ports = midi_in.ports();
    let port = match ports.first() {
        Some(p) => p,
        None => {
            eprintln!("agbsynth: no MIDI input ports found");
            return None;
        }
    };
    let port_name = midi_in.port_name(port).unwrap_or_else(|_| "unknown".into());

    match midi_in.connect(
        port,
        "agbsynth-in",
        move |_timestamp, bytes, _| {
            if let Some(message) = MidiMessage::parse(bytes) {
                let mut engine = lock_or_recover(&engine);
                midi::apply(&mut engine, &message);
            }
        },
        (),
    ) {
        Ok(conn) => {
            eprintln!("agbsynth: listening on MIDI port '{}'", port_name);
            Some(conn)
        }
        Err(e) => {
            eprintln!("agbsynth: failed to connect MIDI port: {}", e);
            None
        }
    }
}

fn run() -> Result<(), String> {
    let settings = load_settings();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("No audio output device available")?;
    let sample_rate = device
        .default_output_config()
        .map_err(|e| format!("No output config: {}", e))?
        .sample_rate()
        .0;

    let mut engine = Engine::new(sample_rate as f32)?;
    engine.set_voicegroup(Arc::new(demo_voicegroup()));
    for channel in 0..16u8 {
        engine.program_change(channel, channel.min(4));
    }
    engine.set_reverb_amount(settings.reverb);
    engine.set_master_volume(settings.master_volume);
    engine.set_song_volume(settings.song_master_volume);
    engine.set_analog_filter(settings.analog_filter);
    engine.set_max_pcm_channels(settings.max_pcm_channels);

    let engine = Arc::new(Mutex::new(engine));
    let _stream = build_audio_stream(Arc::clone(&engine), &device, sample_rate)?;
    let _midi = connect_midi(Arc::clone(&engine));

    eprintln!(
        "agbsynth: running at {} Hz (programs 0-3 = CGB channels, 4 = PCM); Ctrl-C to quit",
        sample_rate
    );
    loop {
        std::thread::park();
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("agbsynth: {}", e);
        std::process::exit(1);
    }
}
