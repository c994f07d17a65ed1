//! Audio resampling and sample processing

use super::types::AudioChunk;
use super::CHUNK_SAMPLES;
use rubato::{Resampler, SincFixedIn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Process incoming audio samples: convert to mono, optionally resample,
/// buffer, and send fixed-cadence chunks
pub(crate) fn process_samples(
    data: &[i16],
    channels: usize,
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    sender: &mpsc::Sender<AudioChunk>,
    resampler: &Option<Arc<Mutex<SincFixedIn<f32>>>>,
) {
    // Convert to mono by averaging channels
    let mono_samples: Vec<i16> = if channels > 1 {
        data.chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        data.to_vec()
    };

    if let Some(resampler_arc) = resampler {
        process_with_resampler(
            &mono_samples,
            input_buffer,
            input_chunk_size,
            output_buffer,
            sender,
            resampler_arc,
        );
    } else {
        // No resampling needed - direct buffering
        if let Ok(mut output_buf) = output_buffer.lock() {
            output_buf.extend(&mono_samples);
        }
        send_chunks(output_buffer, sender);
    }
}

/// Process samples with resampling
fn process_with_resampler(
    mono_samples: &[i16],
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    sender: &mpsc::Sender<AudioChunk>,
    resampler_arc: &Arc<Mutex<SincFixedIn<f32>>>,
) {
    if let Ok(mut input_buf) = input_buffer.lock() {
        input_buf.extend(mono_samples);

        // Process complete blocks through the resampler
        while input_buf.len() >= input_chunk_size {
            let input_chunk: Vec<i16> = input_buf.drain(..input_chunk_size).collect();

            let input_f32: Vec<f32> = input_chunk.iter().map(|&s| s as f32 / 32768.0).collect();

            if let Ok(mut resampler) = resampler_arc.lock() {
                match resampler.process(&[input_f32], None) {
                    Ok(resampled) => {
                        let output_i16: Vec<i16> = resampled[0]
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                            .collect();

                        if let Ok(mut output_buf) = output_buffer.lock() {
                            output_buf.extend(&output_i16);
                        }
                    }
                    Err(e) => {
                        error!("Resampling error: {}", e);
                    }
                }
            }
        }
    }

    send_chunks(output_buffer, sender);
}

/// Send complete chunks from the output buffer as PCM16-LE bytes
fn send_chunks(output_buffer: &Arc<Mutex<Vec<i16>>>, sender: &mpsc::Sender<AudioChunk>) {
    if let Ok(mut output_buf) = output_buffer.lock() {
        while output_buf.len() >= CHUNK_SAMPLES {
            let samples: Vec<i16> = output_buf.drain(..CHUNK_SAMPLES).collect();
            let chunk = match encode_chunk(&samples) {
                Some(chunk) => chunk,
                None => continue,
            };
            // Use try_send to avoid blocking the audio callback
            match sender.try_send(chunk) {
                Ok(_) => {}
                Err(e) => {
                    warn!("Audio buffer overflow - chunk dropped: {}", e);
                    return;
                }
            }
        }
    }
}

/// Encode samples as a PCM16-LE byte chunk, dropping empty payloads
pub(crate) fn encode_chunk(samples: &[i16]) -> Option<AudioChunk> {
    if samples.is_empty() {
        return None;
    }
    let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
    Some(AudioChunk { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_chunk_little_endian() {
        let chunk = encode_chunk(&[0x0102, -2]).unwrap();
        assert_eq!(chunk.bytes, vec![0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_encode_chunk_drops_empty() {
        assert!(encode_chunk(&[]).is_none());
    }

    #[test]
    fn test_chunk_cadence_covers_one_second() {
        // 1000 ms of 16 kHz mono PCM16
        assert_eq!(CHUNK_SAMPLES, crate::audio::TARGET_SAMPLE_RATE as usize);
        let samples = vec![0i16; CHUNK_SAMPLES];
        let chunk = encode_chunk(&samples).unwrap();
        assert_eq!(chunk.bytes.len(), CHUNK_SAMPLES * 2);
    }
}
