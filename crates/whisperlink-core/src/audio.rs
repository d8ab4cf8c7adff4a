//! Minimal RIFF/WAVE probe for staged audio payloads
//!
//! Validation needs exactly three facts about a payload: that it decodes at
//! all, its sample rate, and its duration. A header walk over the RIFF
//! chunks answers all three without pulling in a codec; anything beyond
//! that (resampling, channel mixing) is the transcription engine's problem.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{LinkError, LinkResult};

/// Container metadata decoded from a WAV payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bits per sample per channel
    pub bits_per_sample: u16,
    /// Byte length of the data chunk
    pub data_len: u64,
}

impl WavInfo {
    /// Decoded duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        let byte_rate =
            self.sample_rate as u64 * self.channels as u64 * (self.bits_per_sample as u64 / 8);
        if byte_rate == 0 {
            return 0;
        }
        (self.data_len * 1000 / byte_rate) as i64
    }
}

fn invalid(why: &str) -> LinkError {
    LinkError::InvalidAudio(why.to_string())
}

/// Walk the RIFF chunks and extract the fmt and data facts
///
/// Fails with an invalid-audio error for anything that is not a PCM WAV
/// container; callers treat that as a validation reject, since a payload
/// with no decodable duration cannot pass the duration check.
pub fn probe_wav(data: &[u8]) -> LinkResult<WavInfo> {
    let mut cursor = Cursor::new(data);
    let mut tag = [0u8; 4];

    cursor
        .read_exact(&mut tag)
        .map_err(|_| invalid("truncated header"))?;
    if &tag != b"RIFF" {
        return Err(invalid("not a RIFF container"));
    }
    let _riff_len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| invalid("truncated header"))?;
    cursor
        .read_exact(&mut tag)
        .map_err(|_| invalid("truncated header"))?;
    if &tag != b"WAVE" {
        return Err(invalid("not a WAVE stream"));
    }

    let mut fmt: Option<(u32, u16, u16)> = None;
    let mut data_len: Option<u64> = None;

    while cursor.read_exact(&mut tag).is_ok() {
        let chunk_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| invalid("truncated chunk header"))? as u64;
        match &tag {
            b"fmt " => {
                if chunk_len < 16 {
                    return Err(invalid("fmt chunk too short"));
                }
                let _format = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| invalid("truncated fmt chunk"))?;
                let channels = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| invalid("truncated fmt chunk"))?;
                let sample_rate = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| invalid("truncated fmt chunk"))?;
                let _byte_rate = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| invalid("truncated fmt chunk"))?;
                let _block_align = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| invalid("truncated fmt chunk"))?;
                let bits_per_sample = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| invalid("truncated fmt chunk"))?;
                fmt = Some((sample_rate, channels, bits_per_sample));
                skip(&mut cursor, chunk_len - 16);
            }
            b"data" => {
                data_len = Some(chunk_len);
                break;
            }
            _ => {
                skip(&mut cursor, chunk_len);
            }
        }
        // RIFF chunks are word aligned
        if chunk_len % 2 == 1 {
            skip(&mut cursor, 1);
        }
    }

    let (sample_rate, channels, bits_per_sample) = fmt.ok_or_else(|| invalid("missing fmt chunk"))?;
    let data_len = data_len.ok_or_else(|| invalid("missing data chunk"))?;
    if sample_rate == 0 || channels == 0 || bits_per_sample == 0 {
        return Err(invalid("degenerate fmt chunk"));
    }

    Ok(WavInfo {
        sample_rate,
        channels,
        bits_per_sample,
        data_len,
    })
}

fn skip(cursor: &mut Cursor<&[u8]>, bytes: u64) {
    cursor.set_position(cursor.position() + bytes);
}

/// Build a minimal PCM WAV container around raw sample bytes
///
/// Used by the demo and tests to fabricate payloads; real senders ship
/// actual recordings.
pub fn encode_pcm_wav(sample_rate: u32, channels: u16, bits_per_sample: u16, pcm: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(44 + pcm.len());
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + pcm.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    out.extend_from_slice(pcm);
    out
}
