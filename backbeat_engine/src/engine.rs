use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::anyhow;
use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{info, warn};
use uuid::Uuid;

use crate::assets::SamplePool;
use crate::backend::{AudioBackend, LoopRegion, RackSetup};
use crate::commands::BackendCommand;
use crate::schedule::Schedule;
use crate::synth::Rack;

/// Host-side knobs for stream negotiation. The device keeps the last word
/// on the actual format.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Requested callback size in frames; None lets the device choose.
    pub buffer_size: Option<u32>,
}

/// Audio-thread state behind the stream callback: the schedule, dispatch
/// cursor, loop region and rack. One `process` call drains pending
/// commands and renders one stereo block; the callback only interleaves
/// the result into the device layout.
struct CallbackState {
    command_rx: Receiver<BackendCommand>,
    pool: Arc<ArcSwap<SamplePool>>,
    play_flag: Arc<AtomicBool>,
    position: Arc<AtomicU64>,
    sample_rate: f64,
    rack: Rack,
    schedule: Schedule,
    cursor: usize,
    loop_region: Option<LoopRegion>,
    scratch: Vec<f32>,
}

impl CallbackState {
    fn new(
        sample_rate: u32,
        command_rx: Receiver<BackendCommand>,
        pool: Arc<ArcSwap<SamplePool>>,
        play_flag: Arc<AtomicBool>,
        position: Arc<AtomicU64>,
    ) -> Self {
        Self {
            command_rx,
            pool,
            play_flag,
            position,
            sample_rate: sample_rate as f64,
            rack: Rack::new(sample_rate as f32),
            schedule: Schedule::default(),
            cursor: 0,
            loop_region: None,
            scratch: vec![0.0; 8192 * 2],
        }
    }

    /// Renders `frames` frames and publishes the advanced clock. Returns
    /// the rendered interleaved stereo block.
    fn process(&mut self, frames: usize) -> &[f32] {
        let pool_guard = self.pool.load();
        let pool: &SamplePool = &pool_guard;

        // Check for commands
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                BackendCommand::Start => self.play_flag.store(true, Ordering::Relaxed),
                BackendCommand::Pause => {
                    self.play_flag.store(false, Ordering::Relaxed);
                    // Position stays put; ringing voices fade.
                    self.rack.release_all();
                }
                BackendCommand::Stop => {
                    self.play_flag.store(false, Ordering::Relaxed);
                    self.position.store(0, Ordering::Relaxed);
                    self.schedule = Schedule::default();
                    self.cursor = 0;
                    self.rack.release_all();
                }
                BackendCommand::Seek(seconds) => {
                    let frame = (seconds.max(0.0) * self.sample_rate) as u64;
                    self.position.store(frame, Ordering::Relaxed);
                    self.cursor = self.schedule.first_index_at(seconds.max(0.0));
                    self.rack.release_all();
                }
                BackendCommand::SetLoop(region) => self.loop_region = region,
                BackendCommand::ReplaceSchedule(next) => {
                    self.schedule = next;
                    let now = self.position.load(Ordering::Relaxed) as f64 / self.sample_rate;
                    // Past events never re-fire.
                    self.cursor = self.schedule.first_index_at(now);
                }
                BackendCommand::ClearSchedule => {
                    self.schedule = Schedule::default();
                    self.cursor = 0;
                }
                BackendCommand::SyncRack(setup) => self.rack.sync(&setup, pool),
                BackendCommand::SetMasterGain(gain) => self.rack.set_master_gain(gain),
                BackendCommand::SetStripMix { strip, volume, pan, muted } => {
                    self.rack.set_strip_mix(strip, volume, pan, muted);
                }
                BackendCommand::QueryActiveVoices(response_tx) => {
                    let _ = response_tx.send(self.rack.active_voices());
                }
            }
        }

        if self.scratch.len() < frames * 2 {
            self.scratch.resize(frames * 2, 0.0);
        }
        self.scratch[..frames * 2].fill(0.0);

        if self.play_flag.load(Ordering::Relaxed) {
            let mut pos = self.position.load(Ordering::Relaxed);
            let mut rendered = 0usize;
            while rendered < frames {
                let remaining = frames - rendered;
                // Split the block at the loop end so the wrap lands on an
                // exact frame.
                let mut wrap_after = false;
                let segment = match self.loop_region {
                    Some(region) => {
                        let start_frame = (region.start_seconds * self.sample_rate) as u64;
                        // Sub-frame regions still advance.
                        let end_frame = ((region.end_seconds * self.sample_rate) as u64)
                            .max(start_frame + 1);
                        if pos >= end_frame {
                            pos = start_frame;
                            self.cursor = self.schedule.first_index_at(region.start_seconds);
                            self.rack.release_all();
                            continue;
                        }
                        let to_end = (end_frame - pos) as usize;
                        if to_end <= remaining {
                            wrap_after = true;
                            to_end
                        } else {
                            remaining
                        }
                    }
                    None => remaining,
                };

                let t_end = (pos + segment as u64) as f64 / self.sample_rate;
                while self.cursor < self.schedule.events.len()
                    && self.schedule.events[self.cursor].time_seconds < t_end
                {
                    let event = &self.schedule.events[self.cursor];
                    let event_frame = (event.time_seconds * self.sample_rate) as u64;
                    let offset = (event_frame.saturating_sub(pos) as usize).min(segment - 1);
                    self.rack.dispatch(event, offset, pool);
                    self.cursor += 1;
                }

                self.rack.process_block(segment);
                self.rack
                    .mix_into(&mut self.scratch[rendered * 2..rendered * 2 + segment * 2]);

                pos += segment as u64;
                rendered += segment;
                if wrap_after {
                    // Voices never cross the wrap.
                    self.rack.release_all();
                }
            }
            self.position.store(pos, Ordering::Relaxed);
        } else {
            // Keep rendering so pause/stop tails fade instead of clicking.
            self.rack.process_block(frames);
            self.rack.mix_into(&mut self.scratch[..frames * 2]);
        }

        &self.scratch[..frames * 2]
    }
}

/// The realtime cpal backend. All control flows through a command channel
/// drained inside the audio callback; position and the play flag cross
/// back out as atomics, sample data crosses in as `ArcSwap` snapshots.
pub struct RealtimeBackend {
    tx: Sender<BackendCommand>,
    _stream: cpal::Stream,
    sample_rate: u32,
    playing: Arc<AtomicBool>,
    position_frames: Arc<AtomicU64>,
    pool: Arc<ArcSwap<SamplePool>>,
}

impl RealtimeBackend {
    /// Opens the default output device. Fails when no device is present or
    /// the format is unusable; the host may retry after the user fixes
    /// their audio setup.
    pub fn new(config: EngineConfig) -> Result<Self, anyhow::Error> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(anyhow!("No output device available"))?;
        let device_config = device.default_output_config()?;

        let sample_rate = device_config.sample_rate();
        let channels = device_config.channels() as usize;
        let sample_format = device_config.sample_format();

        if let cpal::SupportedBufferSize::Range { min, max } = device_config.buffer_size() {
            info!("[AudioEngine] Device Buffer Range: {}-{}", min, max);
        }

        let mut stream_config: cpal::StreamConfig = device_config.into();
        if let Some(frames) = config.buffer_size {
            stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
        }
        info!("[AudioEngine] Using Config: {:?}", stream_config);

        let (tx, command_rx): (Sender<BackendCommand>, Receiver<BackendCommand>) = unbounded();

        // Shared Atomic State
        let play_flag = Arc::new(AtomicBool::new(false));
        let pos_counter = Arc::new(AtomicU64::new(0));
        let playing = play_flag.clone();
        let position_frames = pos_counter.clone();

        let pool = Arc::new(ArcSwap::from_pointee(SamplePool::new()));

        let mut state =
            CallbackState::new(sample_rate, command_rx, pool.clone(), play_flag, pos_counter);

        let err_fn = |err: cpal::StreamError| {
            let s = err.to_string();
            // Suppress common buffer under/overrun messages to avoid console spam
            if !s.contains("underrun") && !s.contains("overrun") {
                warn!("[AudioEngine] Stream error: {}", s);
            }
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    let block = state.process(frames);

                    // Interleave into however many channels the device has.
                    for frame in 0..frames {
                        let l = block[frame * 2];
                        let r = block[frame * 2 + 1];
                        let out = &mut data[frame * channels..(frame + 1) * channels];
                        for (ch, sample) in out.iter_mut().enumerate() {
                            *sample = match ch {
                                0 => l,
                                1 => r,
                                _ => 0.0,
                            };
                        }
                    }
                },
                err_fn,
                None,
            )?,
            other => return Err(anyhow!("Unsupported sample format: {other}")),
        };

        stream.play()?;
        info!("[AudioEngine] Stream started at {} Hz", sample_rate);

        Ok(Self {
            tx,
            _stream: stream,
            sample_rate,
            playing,
            position_frames,
            pool,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Snapshot handle for sample loading; see [`install_sample`].
    ///
    /// [`install_sample`]: RealtimeBackend::install_sample
    pub fn pool(&self) -> Arc<ArcSwap<SamplePool>> {
        self.pool.clone()
    }

    /// Publishes a decoded buffer to the audio thread: load the current
    /// snapshot, clone, insert, store.
    pub fn install_sample(&self, id: Uuid, data: Vec<f32>, sample_rate: u32) {
        let mut next = SamplePool::clone(&self.pool.load());
        next.insert_decoded(id, data, sample_rate);
        self.pool.store(Arc::new(next));
    }

    /// Round-trips the audio thread for its live voice count.
    pub fn active_voices(&self) -> Result<usize, anyhow::Error> {
        let (response_tx, response_rx) = unbounded();
        self.tx.send(BackendCommand::QueryActiveVoices(response_tx))?;
        Ok(response_rx.recv_timeout(std::time::Duration::from_secs(2))?)
    }

    fn send(&self, command: BackendCommand) {
        if self.tx.send(command).is_err() {
            warn!("[AudioEngine] Command channel closed; stream is gone");
        }
    }
}

impl AudioBackend for RealtimeBackend {
    fn now(&self) -> f64 {
        self.position_frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn is_running(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    fn start(&mut self) {
        self.send(BackendCommand::Start);
    }

    fn pause(&mut self) {
        self.send(BackendCommand::Pause);
    }

    fn stop(&mut self) {
        self.send(BackendCommand::Stop);
    }

    fn seek(&mut self, seconds: f64) {
        // The callback owns the counter, but a seek must be visible to
        // `now()` before the next block runs.
        self.position_frames
            .store((seconds.max(0.0) * self.sample_rate as f64) as u64, Ordering::Relaxed);
        self.send(BackendCommand::Seek(seconds));
    }

    fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.send(BackendCommand::SetLoop(region));
    }

    fn submit(&mut self, schedule: Schedule) {
        self.send(BackendCommand::ReplaceSchedule(schedule));
    }

    fn clear(&mut self) {
        self.send(BackendCommand::ClearSchedule);
    }

    fn sync_rack(&mut self, setup: RackSetup) {
        self.send(BackendCommand::SyncRack(setup));
    }

    fn set_master_gain(&mut self, gain: f32) {
        self.send(BackendCommand::SetMasterGain(gain));
    }

    fn set_strip_mix(&mut self, strip: Uuid, volume: f32, pan: f32, muted: bool) {
        self.send(BackendCommand::SetStripMix { strip, volume, pan, muted });
    }
}
