//! Microphone capture through the default cpal host.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Host, SampleFormat, SampleRate, Stream, StreamConfig};

use super::{refuse_reopen, CaptureHandle, CaptureRequest, InputDevice};
use crate::{PracticeError, Result};

/// Default system input device. The stream is built on open and dropped on
/// close, which releases the device back to the OS.
pub struct CpalInput {
    host: Host,
    stream: Option<Stream>,
}

impl CpalInput {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            stream: None,
        }
    }

    /// Names of the input devices the host can see.
    pub fn available_devices(&self) -> Vec<String> {
        self.host
            .input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }
}

impl Default for CpalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDevice for CpalInput {
    fn open(&mut self, request: &CaptureRequest, sink: CaptureHandle) -> Result<()> {
        refuse_reopen(self.is_open(), "microphone")?;

        let device = self.host.default_input_device().ok_or_else(|| {
            PracticeError::DeviceUnavailable("no default input device".to_string())
        })?;

        let preferred = device
            .supported_input_configs()
            .ok()
            .and_then(|mut configs| {
                configs.find(|range| {
                    range.sample_format() == SampleFormat::F32
                        && range.min_sample_rate().0 <= request.sample_rate
                        && range.max_sample_rate().0 >= request.sample_rate
                })
            })
            .map(|range| range.with_sample_rate(SampleRate(request.sample_rate)));

        let config = match preferred {
            Some(config) => config,
            None => device.default_input_config().map_err(|e| {
                PracticeError::DeviceUnavailable(format!("failed to get input config: {e}"))
            })?,
        };

        let channels = usize::from(config.channels());
        let sample_rate = config.sample_rate().0;
        let stream_config: StreamConfig = config.into();
        sink.configure(sample_rate)?;
        let fault_sink = sink.clone();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Err(err) = sink.push_interleaved(data, channels) {
                        tracing::warn!(%err, "dropping captured audio");
                    }
                },
                move |err| {
                    tracing::error!(%err, "audio input error");
                    if let Err(report) = fault_sink.report_fault(err.to_string()) {
                        tracing::warn!(%report, "could not report input failure");
                    }
                },
                None,
            )
            .map_err(map_build_error)?;

        stream.play().map_err(|e| {
            PracticeError::DeviceDenied(format!("failed to start input stream: {e}"))
        })?;

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "microphone opened"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "pausing input stream before release failed");
            }
            drop(stream);
            tracing::info!("microphone released");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn map_build_error(err: BuildStreamError) -> PracticeError {
    match err {
        BuildStreamError::DeviceNotAvailable
        | BuildStreamError::StreamConfigNotSupported
        | BuildStreamError::InvalidArgument => {
            PracticeError::DeviceUnavailable(format!("failed to build input stream: {err}"))
        }
        other => PracticeError::DeviceDenied(format!("failed to build input stream: {other}")),
    }
}
