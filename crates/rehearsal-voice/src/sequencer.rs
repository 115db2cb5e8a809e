//! Voice Sequencer - at most one persona line is audible at a time.
//!
//! `enqueue` force-stops whatever is playing before starting the next line,
//! and every playback task releases the sequencer back to `Idle` when it ends,
//! whether it finished, failed or was cancelled. A generation counter keeps a
//! superseded task from flipping a newer playback to `Idle`.

use crate::sink::AudioSink;
use crate::tts::TtsBackend;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Playback state as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Speaking,
}

/// One line to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechJob {
    pub text: String,
    /// Provider voice id (e.g. "nova", "onyx").
    pub voice: String,
    /// Who is speaking; only used for logs.
    pub label: String,
}

impl SpeechJob {
    pub fn new(text: impl Into<String>, voice: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            label: label.into(),
        }
    }
}

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    current: Option<InFlight>,
}

/// Serialized, cancellable playback over a TTS backend and an audio sink.
///
/// Must be used from inside a tokio runtime; `enqueue` spawns the playback task.
#[derive(Clone)]
pub struct VoiceSequencer {
    tts: Arc<dyn TtsBackend>,
    sink: Arc<dyn AudioSink>,
    slot: Arc<Mutex<Slot>>,
    state: Arc<watch::Sender<SequencerState>>,
}

impl VoiceSequencer {
    pub fn new(tts: Arc<dyn TtsBackend>, sink: Arc<dyn AudioSink>) -> Self {
        let (state, _) = watch::channel(SequencerState::Idle);
        Self {
            tts,
            sink,
            slot: Arc::new(Mutex::new(Slot::default())),
            state: Arc::new(state),
        }
    }

    /// Current playback state.
    pub fn state(&self) -> SequencerState {
        *self.state.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == SequencerState::Speaking
    }

    /// Start speaking `job`, cutting off anything still playing. Returns the playback generation.
    pub fn enqueue(&self, job: SpeechJob) -> u64 {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.current.take() {
            debug!("Superseding playback #{}", previous.generation);
            self.halt(previous);
        }
        slot.generation += 1;
        let generation = slot.generation;
        let cancel = CancellationToken::new();

        self.state.send_replace(SequencerState::Speaking);
        info!("🗣️ {} speaking (#{}, voice {})", job.label, generation, job.voice);

        let task = tokio::spawn(run_playback(
            Arc::clone(&self.tts),
            Arc::clone(&self.sink),
            job,
            cancel.clone(),
            ReleaseGuard {
                slot: Arc::clone(&self.slot),
                state: Arc::clone(&self.state),
                generation,
            },
        ));
        slot.current = Some(InFlight {
            generation,
            cancel,
            task,
        });
        generation
    }

    /// Stop the in-flight playback, if any. Cancellation is not an error.
    pub fn stop(&self) {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.current.take() {
            debug!("Stopping playback #{}", previous.generation);
            self.halt(previous);
        }
        self.state.send_replace(SequencerState::Idle);
    }

    /// Resolve once nothing is playing.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == SequencerState::Idle).await;
    }

    fn halt(&self, previous: InFlight) {
        previous.cancel.cancel();
        self.sink.stop();
        previous.task.abort();
    }
}

async fn run_playback(
    tts: Arc<dyn TtsBackend>,
    sink: Arc<dyn AudioSink>,
    job: SpeechJob,
    cancel: CancellationToken,
    _release: ReleaseGuard,
) {
    let playback = async {
        let audio = tts.synthesize(&job.text, &job.voice).await?;
        if audio.is_empty() {
            return Ok(());
        }
        sink.play(audio).await
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("{} playback cancelled", job.label);
        }
        result = playback => {
            if let Err(e) = result {
                warn!("🔇 {} playback skipped: {}", job.label, e);
            }
        }
    }
}

/// Returns the sequencer to `Idle` when the playback task ends for any reason,
/// including abort. Only the current generation may do so.
struct ReleaseGuard {
    slot: Arc<Mutex<Slot>>,
    state: Arc<watch::Sender<SequencerState>>,
    generation: u64,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.generation != self.generation {
            return;
        }
        slot.current = None;
        self.state.send_replace(SequencerState::Idle);
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
