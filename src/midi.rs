//! MIDI message decode and engine dispatch
//!
//! Hosts deliver raw MIDI bytes (from a device callback, a parsed file, or a
//! plugin event queue); the engine wants typed events. This module is the
//! glue between the two.

use crate::engine::Engine;

/// The MIDI messages the engine responds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note on: velocity is always non-zero (zero decodes as NoteOff)
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// Signed 14-bit bend, -8192..8191, 0 = center
    PitchBend { channel: u8, bend: i16 },
}

impl MidiMessage {
    /// Decode one complete channel message from raw bytes.
    ///
    /// Returns None for truncated input, system messages, and the channel
    /// messages the engine has no use for (aftertouch).
    pub fn parse(bytes: &[u8]) -> Option<MidiMessage> {
        let status = *bytes.first()?;
        if status < 0x80 {
            return None;
        }
        let channel = status & 0x0F;

        match status >> 4 {
            0x8 => Some(MidiMessage::NoteOff {
                channel,
                key: *bytes.get(1)? & 0x7F,
            }),
            0x9 => {
                let key = *bytes.get(1)? & 0x7F;
                let velocity = *bytes.get(2)? & 0x7F;
                if velocity == 0 {
                    // Running-status note-off convention
                    Some(MidiMessage::NoteOff { channel, key })
                } else {
                    Some(MidiMessage::NoteOn { channel, key, velocity })
                }
            }
            0xB => Some(MidiMessage::ControlChange {
                channel,
                controller: *bytes.get(1)? & 0x7F,
                value: *bytes.get(2)? & 0x7F,
            }),
            0xC => Some(MidiMessage::ProgramChange {
                channel,
                program: *bytes.get(1)? & 0x7F,
            }),
            0xE => {
                let lsb = (*bytes.get(1)? & 0x7F) as i16;
                let msb = (*bytes.get(2)? & 0x7F) as i16;
                Some(MidiMessage::PitchBend {
                    channel,
                    bend: ((msb << 7) | lsb) - 8192,
                })
            }
            _ => None,
        }
    }
}

/// Route a decoded message onto the engine's event surface
pub fn apply(engine: &mut Engine, message: &MidiMessage) {
    match *message {
        MidiMessage::NoteOn { channel, key, velocity } => engine.note_on(channel, key, velocity),
        MidiMessage::NoteOff { channel, key } => engine.note_off(channel, key),
        MidiMessage::ControlChange { channel, controller, value } => {
            engine.cc(channel, controller, value)
        }
        MidiMessage::ProgramChange { channel, program } => engine.program_change(channel, program),
        MidiMessage::PitchBend { channel, bend } => engine.pitch_bend(channel, bend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on_off() {
        assert_eq!(
            MidiMessage::parse(&[0x93, 60, 100]),
            Some(MidiMessage::NoteOn { channel: 3, key: 60, velocity: 100 })
        );
        assert_eq!(
            MidiMessage::parse(&[0x83, 60, 0]),
            Some(MidiMessage::NoteOff { channel: 3, key: 60 })
        );
    }

    #[test]
    fn test_velocity_zero_is_note_off() {
        assert_eq!(
            MidiMessage::parse(&[0x90, 60, 0]),
            Some(MidiMessage::NoteOff { channel: 0, key: 60 })
        );
    }

    #[test]
    fn test_parse_pitch_bend_center() {
        // 8192 split into LSB/MSB is the center position
        assert_eq!(
            MidiMessage::parse(&[0xE0, 0x00, 0x40]),
            Some(MidiMessage::PitchBend { channel: 0, bend: 0 })
        );
        assert_eq!(
            MidiMessage::parse(&[0xE0, 0x7F, 0x7F]),
            Some(MidiMessage::PitchBend { channel: 0, bend: 8191 })
        );
        assert_eq!(
            MidiMessage::parse(&[0xE0, 0x00, 0x00]),
            Some(MidiMessage::PitchBend { channel: 0, bend: -8192 })
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0x45, 1, 2]), None); // data byte first
        assert_eq!(MidiMessage::parse(&[0x90, 60]), None); // truncated
        assert_eq!(MidiMessage::parse(&[0xF8]), None); // system realtime
        assert_eq!(MidiMessage::parse(&[0xA0, 60, 10]), None); // aftertouch
    }
}
