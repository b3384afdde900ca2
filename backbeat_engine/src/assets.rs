use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use log::info;
use uuid::Uuid;

/// A decoded sample, mono, normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub data: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn duration_seconds(&self) -> f64 {
        self.data.len() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Decoded samples by id. Snapshots cross to the audio thread through an
/// `ArcSwap` (load, clone, modify, store); buffers are behind `Arc` so a
/// snapshot clone never copies audio data.
#[derive(Debug, Clone, Default)]
pub struct SamplePool {
    samples: HashMap<Uuid, Arc<SampleBuffer>>,
}

impl SamplePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an externally decoded buffer, e.g. one produced by an
    /// async loader. Replaces any previous buffer under the same id.
    pub fn insert_decoded(&mut self, id: Uuid, data: Vec<f32>, sample_rate: u32) {
        self.samples.insert(id, Arc::new(SampleBuffer { data, sample_rate }));
    }

    /// Decodes a WAV file into the pool. Integer formats are normalized by
    /// their bit depth, multi-channel audio is averaged down to mono.
    pub fn load_wav_file(&mut self, id: Uuid, path: &str) -> Result<(), anyhow::Error> {
        let mut reader =
            hound::WavReader::open(path).with_context(|| format!("opening sample {path}"))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let data: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        if data.is_empty() {
            return Err(anyhow!("sample {path} contains no audio"));
        }
        info!(
            "[Assets] Loaded {} ({} frames @ {} Hz)",
            path,
            data.len(),
            spec.sample_rate
        );
        self.samples.insert(id, Arc::new(SampleBuffer { data, sample_rate: spec.sample_rate }));
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&Arc<SampleBuffer>> {
        self.samples.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.samples.contains_key(&id)
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        self.samples.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
