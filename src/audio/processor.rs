use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::sample_buffer::SharedSampleBuffer;
use crate::error::{EngineError, Result};

/// Live input tap: the default input device, down-mixed to mono and
/// appended straight into the shared sample buffer.
///
/// While a capture is alive the analysis worker stops producing synthetic
/// samples. Dropping the capture hands the buffer back to the synthetic
/// producer.
pub struct CaptureProcessor {
    #[allow(dead_code)]
    stream: Stream,
    sample_rate: u32,
    attached: Arc<AtomicBool>,
}

impl CaptureProcessor {
    pub fn start(buffer: SharedSampleBuffer, attached: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(EngineError::NoInputDevice)?;

        let config = device
            .default_input_config()
            .map_err(|e| EngineError::Capture(format!("failed to get default input config: {e}")))?;

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        info!("Audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let stream = Self::create_input_stream(&device, &config.into(), buffer)?;
        stream
            .play()
            .map_err(|e| EngineError::Capture(e.to_string()))?;

        attached.store(true, Ordering::Release);

        Ok(Self {
            stream,
            sample_rate,
            attached,
        })
    }

    fn create_input_stream(
        device: &Device,
        config: &StreamConfig,
        buffer: SharedSampleBuffer,
    ) -> Result<Stream> {
        let channels = config.channels as usize;

        info!(
            "Creating input stream with {} channels at {} Hz",
            channels, config.sample_rate.0
        );

        let stream = device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    buffer.append(&downmix(data, channels));
                },
                |err| {
                    warn!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::Capture(e.to_string()))?;

        Ok(stream)
    }

    /// Device rate; the detector assumes the engine's configured rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CaptureProcessor {
    fn drop(&mut self) {
        self.attached.store(false, Ordering::Release);
        info!("Audio capture detached");
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
