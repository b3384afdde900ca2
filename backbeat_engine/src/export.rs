//! Audio bounce: standard 16-bit PCM WAV output.

use std::path::Path;

use backbeat_shared::project::Project;
use backbeat_shared::steps::StepPattern;
use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;

use crate::assets::SamplePool;
use crate::render::render_offline;

/// Writes interleaved stereo f32 audio as canonical 16-bit PCM. Samples
/// are clamped to [-1, 1] before quantization, so hot mixes hard-clip
/// instead of wrapping.
pub fn write_wav(path: &Path, data: &[f32], sample_rate: u32) -> Result<(), anyhow::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let scale = (1 << 15) as f32 - 1.0;
    for &sample in data {
        let quantized = (sample.clamp(-1.0, 1.0) * scale).round() as i16;
        writer.write_sample(quantized)?;
    }

    writer.finalize()?;
    info!("[Export] Wrote {} frames to {}", data.len() / 2, path.display());
    Ok(())
}

/// Offline render straight to disk.
pub fn render_to_wav(
    project: &Project,
    step_patterns: &[StepPattern],
    pool: &SamplePool,
    duration_seconds: f64,
    sample_rate: u32,
    path: &Path,
) -> Result<(), anyhow::Error> {
    let data = render_offline(project, step_patterns, pool, duration_seconds, sample_rate);
    write_wav(path, &data, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_is_16_bit_stereo_pcm() {
        let path = std::env::temp_dir().join("backbeat_export_format_test.wav");
        let data = vec![0.0f32, 0.0, 0.5, -0.5, 1.0, -1.0];
        write_wav(&path, &data, 44100).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, SampleFormat::Int);

        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[2], 16384);
        assert_eq!(samples[4], 32767);
        assert_eq!(samples[5], -32767);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let path = std::env::temp_dir().join("backbeat_export_clamp_test.wav");
        write_wav(&path, &[2.5, -7.0], 48000).unwrap();
        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![32767, -32767]);
        std::fs::remove_file(&path).ok();
    }
}
