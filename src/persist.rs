//! Persisted plugin state
//!
//! Plugin hosts hand back an opaque byte blob on reload; the format here is
//! deliberately byte-granular and versionless so old blobs keep loading:
//! two length-prefixed strings (project root and voicegroup name) followed
//! by single-byte settings, with newer trailing fields defaulting when a
//! blob predates them.

/// Engine settings and project identity carried across host sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginState {
    /// Root directory of the GBA project the voicegroup was mined from
    pub project_root: String,
    /// Name of the selected voicegroup within the project
    pub voicegroup_name: String,
    /// Reverb amount 0..127
    pub reverb: u8,
    /// PCM master volume 0..15
    pub master_volume: u8,
    /// Song master volume 0..127
    pub song_master_volume: u8,
    pub analog_filter: bool,
    pub max_pcm_channels: u8,
}

impl Default for PluginState {
    fn default() -> Self {
        Self {
            project_root: String::new(),
            voicegroup_name: String::new(),
            reverb: 0,
            master_volume: 15,
            song_master_volume: 127,
            analog_filter: true,
            max_pcm_channels: 5,
        }
    }
}

impl PluginState {
    /// Serialize to the wire layout:
    /// `u32 rootLen; root; u32 nameLen; name; reverb; master; songMaster;
    /// analogFilter; maxPcmChannels` (lengths little-endian)
    pub fn to_bytes(&self) -> Vec<u8> {
        let root = self.project_root.as_bytes();
        let name = self.voicegroup_name.as_bytes();
        let mut out = Vec::with_capacity(root.len() + name.len() + 13);
        out.extend_from_slice(&(root.len() as u32).to_le_bytes());
        out.extend_from_slice(root);
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name);
        out.push(self.reverb);
        out.push(self.master_volume);
        out.push(self.song_master_volume);
        out.push(self.analog_filter as u8);
        out.push(self.max_pcm_channels);
        out
    }

    /// Deserialize, accepting blobs from before the analog-filter and
    /// channel-cap fields existed (they default on / 5).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let mut reader = Reader { bytes, at: 0 };
        let project_root = reader.string()?;
        let voicegroup_name = reader.string()?;
        let reverb = reader.byte().ok_or("Missing reverb byte")?;
        let master_volume = reader.byte().ok_or("Missing master volume byte")?;
        let song_master_volume = reader.byte().ok_or("Missing song master volume byte")?;
        let analog_filter = reader.byte().map(|b| b != 0).unwrap_or(true);
        let max_pcm_channels = reader.byte().unwrap_or(5);
        Ok(Self {
            project_root,
            voicegroup_name,
            reverb,
            master_volume,
            song_master_volume,
            analog_filter,
            max_pcm_channels,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn byte(&mut self) -> Option<u8> {
        let b = self.bytes.get(self.at).copied();
        if b.is_some() {
            self.at += 1;
        }
        b
    }

    fn string(&mut self) -> Result<String, String> {
        let end = self.at.checked_add(4).filter(|&e| e <= self.bytes.len());
        let Some(end) = end else {
            return Err("Truncated length prefix".into());
        };
        let len = u32::from_le_bytes(self.bytes[self.at..end].try_into().unwrap()) as usize;
        self.at = end;
        let data_end = self.at.checked_add(len).filter(|&e| e <= self.bytes.len());
        let Some(data_end) = data_end else {
            return Err("Truncated string data".into());
        };
        let s = String::from_utf8_lossy(&self.bytes[self.at..data_end]).into_owned();
        self.at = data_end;
        Ok(s)
    }
}
