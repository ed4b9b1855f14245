//! Daemon - the main agent service
//!
//! Wires the listener, event queue, dispatcher, speech sink, agenda timers
//! and background updaters together and runs them until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agenda::{self, ActionPlanner, CalendarWatcher, DesireBoard, JsonCalendar};
use crate::assistant::{Assistant, TurnInput};
use crate::background::BackgroundUpdaters;
use crate::config::SpeechOutput;
use crate::context::SharedContext;
use crate::db::{self, DbPool, MemoryRepo};
use crate::dispatcher::Dispatcher;
use crate::events::PriorityEventQueue;
use crate::feedback::{Feedback, TracingFeedback};
use crate::llm::{ChatCompletionsGenerator, TextGenerator};
use crate::memory::MemoryFormer;
use crate::mood::{LexiconMoodEstimator, MoodState};
use crate::speech::OrderedSpeechSink;
use crate::voice::{
    CloudSynthesizer, CloudTranscriber, CommandSynthesizer, CpalMicrophone, ListenerExit,
    ListenerHandle, PhraseKeywordModel, SpeechSynthesizer, UtteranceRecorder, VoiceParams,
    WakeWordSpotter, spawn_listener,
};
use crate::{Config, Error, Result};

/// Sample rate of the wake word spotter and the recorder
const SPEECH_SAMPLE_RATE: u32 = 16000;

/// Spotter frame length (32ms at 16kHz)
const SPOTTER_FRAME: usize = 512;

/// Wake phrase bursts shorter than this are not worth verifying
const WAKE_MIN_AUDIO_MS: u64 = 200;

/// How long in-flight speech may continue after shutdown is requested
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a turn needs, shared by `run` and `ask`
struct Runtime {
    assistant: Arc<Assistant>,
    sink_worker: JoinHandle<()>,
    calendar: Arc<CalendarWatcher>,
}

/// The Vesper daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
}

impl Daemon {
    /// Create a daemon and open its database
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.db_path();
        let db = db::init(&db_path)?;

        tracing::info!(path = %db_path.display(), "database initialized");

        Ok(Self { config, db })
    }

    fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            voice: self.config.voice.tts_voice.clone(),
            speed: self.config.voice.tts_speed,
        }
    }

    fn build_generator(&self) -> Result<Arc<dyn TextGenerator>> {
        let llm = &self.config.llm;
        let api_key = self
            .config
            .api_keys
            .llm()
            .ok_or_else(|| Error::Config("no LLM API key configured".to_string()))?;

        let generator = ChatCompletionsGenerator::new(
            &llm.base_url,
            api_key,
            llm.model.clone(),
            llm.max_tokens,
            llm.timeout,
        )?;

        tracing::info!(url = %llm.base_url, model = %llm.model, "LLM client initialized");
        Ok(Arc::new(generator))
    }

    fn build_runtime(&self) -> Result<Runtime> {
        let generator = self.build_generator()?;
        let synth = build_synthesizer(&self.config)?;
        let (sink, sink_worker) = OrderedSpeechSink::spawn(synth, self.config.voice.tts_timeout);

        let mood = Arc::new(MoodState::default());
        let context = SharedContext::new(
            self.config.llm.system_prompt.clone(),
            self.config.llm.max_history,
            Arc::clone(&mood),
        );

        let memory_repo = MemoryRepo::new(self.db.clone());
        let former = self.config.memory.enabled.then(|| {
            Arc::new(MemoryFormer::new(
                Arc::clone(&generator),
                memory_repo.clone(),
            ))
        });
        let background = BackgroundUpdaters::new(
            mood,
            Arc::new(LexiconMoodEstimator::default()),
            former,
            self.config.memory.min_interval,
        );

        let desires = Arc::new(DesireBoard::new());
        for desire in &self.config.agenda.desires {
            desires.add(desire.description.clone(), desire.intensity);
        }
        let planner = Arc::new(ActionPlanner::new());
        let calendar = Arc::new(CalendarWatcher::new(
            Box::new(JsonCalendar::new(self.config.agenda.calendar_path.clone())),
            chrono::Duration::from_std(self.config.agenda.calendar_lead)
                .map_err(|e| Error::Config(format!("invalid calendar lead: {e}")))?,
        ));

        let mut assistant = Assistant::new(generator, sink, self.voice_params(), context, background)
            .with_agenda(desires, planner, Some(Arc::clone(&calendar)));
        if self.config.memory.enabled {
            assistant = assistant.with_memories(memory_repo, self.config.memory.max_in_prompt);
        }

        Ok(Runtime {
            assistant: Arc::new(assistant),
            sink_worker,
            calendar,
        })
    }

    fn start_listener(
        &self,
        queue: &Arc<PriorityEventQueue>,
        feedback: &Arc<dyn Feedback>,
    ) -> Result<ListenerHandle> {
        let voice = &self.config.voice;
        let stt_key = || {
            self.config.api_keys.stt(voice.stt_provider).ok_or_else(|| {
                Error::Config(format!(
                    "no API key configured for {:?} transcription",
                    voice.stt_provider
                ))
            })
        };

        let verifier = CloudTranscriber::new(
            voice.stt_provider,
            stt_key()?,
            voice.stt_model.clone(),
            SPEECH_SAMPLE_RATE,
            WAKE_MIN_AUDIO_MS,
            voice.stt_timeout,
        )?;
        let spotter = WakeWordSpotter::new(Box::new(PhraseKeywordModel::new(
            voice.wake_words.clone(),
            Box::new(verifier),
            SPOTTER_FRAME,
            SPEECH_SAMPLE_RATE,
            voice.wake_energy_threshold,
        )));

        let transcriber = CloudTranscriber::new(
            voice.stt_provider,
            stt_key()?,
            voice.stt_model.clone(),
            SPEECH_SAMPLE_RATE,
            voice.recording.min_speech.as_millis().try_into().unwrap_or(u64::MAX),
            voice.stt_timeout,
        )?;
        let recorder = UtteranceRecorder::new(Box::new(transcriber), voice.recording);

        tracing::info!(wake_words = ?voice.wake_words, stt = ?voice.stt_provider, "starting listener");
        spawn_listener(
            CpalMicrophone::open,
            spotter,
            recorder,
            Arc::clone(queue),
            Arc::clone(feedback),
        )
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be assembled
    #[allow(clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        let runtime = self.build_runtime()?;
        let queue = Arc::new(PriorityEventQueue::new(self.config.queue_capacity));
        let feedback: Arc<dyn Feedback> = Arc::new(TracingFeedback);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let assistant = Arc::clone(&runtime.assistant);
        let mut tasks = vec![tokio::spawn(
            Dispatcher::new(Arc::clone(&queue), assistant, Arc::clone(&feedback))
                .run(shutdown_rx.clone()),
        )];

        let agenda_config = &self.config.agenda;
        tasks.push(tokio::spawn(agenda::run_calendar_timer(
            Arc::clone(&runtime.calendar),
            Arc::clone(&queue),
            agenda_config.calendar_poll,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(agenda::run_planner_timer(
            Arc::clone(runtime.assistant.planner()),
            Arc::clone(&queue),
            agenda_config.planner_poll,
            shutdown_rx.clone(),
        )));
        if let Some(interval) = agenda_config.initiative_interval {
            tasks.push(tokio::spawn(agenda::run_initiative_timer(
                Arc::clone(runtime.assistant.desires()),
                Arc::clone(&queue),
                interval,
                agenda_config.initiative_jitter,
                shutdown_rx.clone(),
            )));
        } else {
            tracing::info!("initiative disabled");
        }

        let listener = if self.config.voice.enabled {
            match self.start_listener(&queue, &feedback) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "voice input unavailable");
                    None
                }
            }
        } else {
            tracing::info!("voice input disabled");
            None
        };

        tracing::info!(
            capacity = self.config.queue_capacity,
            voice = listener.is_some(),
            "daemon running"
        );

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");

        if let Some(handle) = listener {
            handle.stop();
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(ListenerExit::DeviceFailed(e))) => {
                    tracing::warn!(error = %e, "listener had failed");
                }
                Ok(Ok(ListenerExit::Shutdown)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "listener did not stop cleanly"),
                Err(e) => tracing::warn!(error = %e, "listener join failed"),
            }
        }

        // Receivers see the change even if the value is dropped right after
        let _ = shutdown_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "task ended abnormally");
            }
        }

        drop(runtime.assistant);
        drain_speech(runtime.sink_worker).await;

        tracing::info!(pending = queue.len(), "daemon stopped");
        Ok(())
    }

    /// Run a single typed turn, speak the reply and return it
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be assembled or the reply fails
    pub async fn ask(&self, text: &str) -> Result<String> {
        let runtime = self.build_runtime()?;
        let reply = runtime
            .assistant
            .run_turn(TurnInput::User(text.to_string()))
            .await?;

        drop(runtime.assistant);
        drain_speech(runtime.sink_worker).await;
        Ok(reply)
    }
}

/// Build the configured speech synthesizer
///
/// # Errors
///
/// Returns error if the provider key or local program is missing
pub fn build_synthesizer(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    let voice = &config.voice;
    match &voice.output {
        SpeechOutput::Cloud(provider) => {
            let api_key = config.api_keys.tts(*provider).ok_or_else(|| {
                Error::Config(format!("no API key configured for {provider:?} TTS"))
            })?;
            tracing::info!(provider = ?provider, model = %voice.tts_model, "cloud TTS enabled");
            Ok(Arc::new(CloudSynthesizer::new(
                *provider,
                api_key,
                voice.tts_model.clone(),
            )?))
        }
        SpeechOutput::Command { program, args } => {
            let synth = CommandSynthesizer::new(program, args.clone())?;
            tracing::info!(program = %program, "local TTS enabled");
            Ok(Arc::new(synth))
        }
    }
}

/// Wait for queued speech to finish once every sink handle is gone
async fn drain_speech(worker: JoinHandle<()>) {
    match tokio::time::timeout(DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "speech worker ended abnormally"),
        Err(_) => tracing::warn!("speech still queued at shutdown, abandoning"),
    }
}
