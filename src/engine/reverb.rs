//! GBA-style reverb
//!
//! The hardware engine's "reverb" is a feedback delay: the mixed PCM output
//! of each frame is written into a circular 8-bit stereo buffer, and two
//! taps (the oldest frame and one frame-size later) are summed mono, scaled
//! by the amount, and folded back into both sides. CGB channels are mixed
//! after this stage and stay dry.
//!
//! Buffer length tracks the host rate so the delay keeps its hardware
//! duration: 1584 samples at the GBA's 13379 Hz output.

use super::tables::PCM_DMA_RATE;

/// Delay length of the hardware buffer at its native rate
const NATIVE_DELAY_SAMPLES: f64 = 1584.0;

pub struct Reverb {
    /// Circular stereo buffer of signed 8-bit samples
    buffer: Vec<[i8; 2]>,
    /// One seventh of the buffer, the second tap's offset
    frame_size: usize,
    /// Write/read head
    pos: usize,
    /// Feedback amount 0..127; 0 bypasses the whole stage
    amount: u8,
}

impl Reverb {
    /// Allocate the delay buffer for a host sample rate. The only heap
    /// allocation the engine owns; failure here fails engine construction.
    pub fn new(sample_rate: f32) -> Result<Self, String> {
        let len = ((NATIVE_DELAY_SAMPLES * sample_rate as f64 / PCM_DMA_RATE as f64).round()
            as usize)
            .max(1);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|e| format!("Failed to allocate reverb buffer: {}", e))?;
        buffer.resize(len, [0i8; 2]);
        Ok(Self {
            buffer,
            frame_size: (len / 7).max(1),
            pos: 0,
            amount: 0,
        })
    }

    pub fn set_amount(&mut self, amount: u8) {
        self.amount = amount.min(127);
    }

    pub fn amount(&self) -> u8 {
        self.amount
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Zero the delay line and rewind the head
    pub fn reset(&mut self) {
        self.buffer.fill([0i8; 2]);
        self.pos = 0;
    }

    /// Process one stereo frame in place.
    ///
    /// Reads the two taps, adds the mono wet sum to both sides, then writes
    /// the clamped result back over the oldest frame. Skipped entirely at
    /// amount 0 so the buffer holds whatever it last captured.
    pub fn process(&mut self, mix_l: &mut i32, mix_r: &mut i32) {
        if self.amount == 0 {
            return;
        }

        let len = self.buffer.len();
        let other = (self.pos + self.frame_size) % len;
        let a = self.buffer[self.pos];
        let b = self.buffer[other];
        let sum = a[0] as i32 + a[1] as i32 + b[0] as i32 + b[1] as i32;
        let wet = (sum * self.amount as i32) >> 9;

        *mix_l += wet;
        *mix_r += wet;

        self.buffer[self.pos] = [
            (*mix_l).clamp(-128, 127) as i8,
            (*mix_r).clamp(-128, 127) as i8,
        ];
        self.pos = (self.pos + 1) % len;
    }
}
