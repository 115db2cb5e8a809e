//! Audio sinks: where synthesized speech ends up.
//!
//! `play` resolves once the clip has finished (or was stopped), which is what
//! lets the sequencer know when a persona has actually stopped talking.

use crate::error::VoiceResult;
use async_trait::async_trait;

/// Output device abstraction. `stop` must make any pending `play` resolve promptly.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play encoded audio (MP3/WAV) and resolve when playback ends.
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()>;

    /// Stop playback immediately and clear anything queued.
    fn stop(&self);
}

/// Sink that discards audio. Headless runs and `--mute`.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _audio: Vec<u8>) -> VoiceResult<()> {
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(feature = "speaker")]
mod speaker {
    use super::AudioSink;
    use crate::error::{VoiceError, VoiceResult};
    use async_trait::async_trait;
    use rodio::{OutputStream, Sink, Source};
    use std::io::Cursor;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tracing::info;

    /// Plays through the default output device.
    ///
    /// `OutputStream` is not `Send`, so it lives on a dedicated thread for the
    /// lifetime of the sink; only the `Sink` handle crosses threads.
    pub struct RodioSink {
        sink: Arc<Sink>,
        _shutdown: mpsc::Sender<()>,
    }

    impl RodioSink {
        pub fn new() -> VoiceResult<Self> {
            let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<Arc<Sink>>>();
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            thread::Builder::new()
                .name("rehearsal-audio-out".to_string())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                            return;
                        }
                    };
                    match Sink::try_new(&handle) {
                        Ok(sink) => {
                            let _ = ready_tx.send(Ok(Arc::new(sink)));
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                            return;
                        }
                    }
                    // Keep the stream alive until the sink is dropped.
                    let _ = shutdown_rx.recv();
                })?;

            let sink = ready_rx
                .recv()
                .map_err(|e| VoiceError::Playback(format!("Audio thread exited: {}", e)))??;
            info!("🔊 RodioSink: default output device ready");
            Ok(Self {
                sink,
                _shutdown: shutdown_tx,
            })
        }
    }

    #[async_trait]
    impl AudioSink for RodioSink {
        async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
            if audio.is_empty() {
                return Ok(());
            }
            let source = rodio::Decoder::new(Cursor::new(audio))
                .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
            self.sink.append(source.convert_samples::<f32>());
            while !self.sink.empty() {
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
            Ok(())
        }

        fn stop(&self) {
            self.sink.stop();
            info!("RodioSink: stopped (superseded or new input)");
        }
    }
}

#[cfg(feature = "speaker")]
pub use speaker::RodioSink;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_finishes_immediately() {
        let sink = NullSink;
        tokio_test::assert_ok!(sink.play(vec![1, 2, 3]).await);
        sink.stop();
    }
}
