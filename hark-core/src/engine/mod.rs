//! `LocalListener` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! LocalListener::new()      → decoder configured, stream opened
//!     ├─► listen*()         → Utterances borrowing the listener (caller thread)
//!     ├─► listen*_async()   → background thread, utterances on the bus
//!     ├─► stop()            → running=false, bounded join of background threads
//!     └─► shutdown()        → stop, then close stream, release decoder and device
//! ```
//!
//! Every `listen*` call opens a new session and preempts the one that is
//! active, whichever thread it runs on. A synchronous session only observes
//! preemption when its iterator is advanced, so an [`Utterances`] that is
//! held but never driven keeps the resources until it is dropped.
//!
//! ## Threading
//!
//! Background sessions run on plain OS threads (see [`tasks`]). At most one
//! task of each [`TaskKind`] runs at a time; starting a second one while the
//! first is running, or detached but not yet exited, is
//! `ListenerError::AlreadyRunning`. A task stopped while it waits for the
//! resources exits without opening its session.

pub mod segmenter;
pub mod session;
pub mod tasks;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::AudioBackend;
use crate::bus::cue::ListeningCue;
use crate::bus::EventBus;
use crate::config::ListenerConfig;
use crate::decoder::{DecoderFactory, DecoderSession};
use crate::error::{ListenerError, Result};
use crate::grammar::{digit_grammar, GrammarSpec};

pub use segmenter::LoopState;
pub use session::{ListenMode, Utterances};
pub use tasks::{TaskKind, TaskOutcome};

use session::{Dictionary, Resources, Shared};
use tasks::BackgroundTask;

/// The listener handle.
///
/// `LocalListener` is `Send + Sync`; all fields use interior mutability.
/// Dropping it performs [`LocalListener::shutdown`].
pub struct LocalListener {
    shared: Arc<Shared>,
    tasks: Mutex<HashMap<TaskKind, BackgroundTask>>,
    shut_down: AtomicBool,
}

impl LocalListener {
    /// Configure the decoder from `config` and open the audio stream.
    ///
    /// # Errors
    /// - `ListenerError::Config` if the factory rejects the model paths.
    /// - Whatever `backend.open` returns for the stream.
    pub fn new(
        config: ListenerConfig,
        factory: Arc<dyn DecoderFactory>,
        mut backend: Box<dyn AudioBackend>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self> {
        let format = config.stream_format();
        let mut decoder = DecoderSession::new(factory, config.lang.clone(), format.frame_samples);
        decoder.reset(
            Some(config.acoustic_model.as_path()),
            Some(config.language_model.as_path()),
            Some(config.dictionary.as_path()),
        )?;
        let stream = backend.open(format)?;
        info!(lang = %config.lang, "local listener ready");

        let resources = Resources {
            decoder,
            stream: Some(stream),
            backend: Some(backend),
            format,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                resources: Mutex::new(resources),
                active: Mutex::new(None),
                closing: AtomicBool::new(false),
                bus,
                cue: Mutex::new(None),
                config,
                last_utterance: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            tasks: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Player for the "listening started" sound, used when
    /// `confirm_listening` is set.
    pub fn set_cue(&self, cue: Arc<dyn ListeningCue>) {
        *self.shared.cue.lock() = Some(cue);
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.shared.config
    }

    // ── Synchronous sessions ─────────────────────────────────────────────────

    /// Continuous session with the default dictionary.
    pub fn listen(&self) -> Result<Utterances<'_>> {
        self.open(ListenMode::Continuous, Dictionary::Default)
    }

    /// Next utterance with the default dictionary, or `None` if the stream
    /// ended or the session was stopped first.
    pub fn listen_once(&self) -> Result<Option<String>> {
        self.open(ListenMode::SingleShot, Dictionary::Default)?
            .next()
            .transpose()
    }

    /// Continuous session restricted to `grammar`.
    ///
    /// The grammar is compiled to a temporary dictionary that is deleted when
    /// the session ends. The default dictionary is restored by the next
    /// default session.
    ///
    /// # Errors
    /// `ListenerError::Io` if the dictionary file cannot be written.
    pub fn listen_specialized(&self, grammar: &GrammarSpec) -> Result<Utterances<'_>> {
        self.open(ListenMode::Continuous, Dictionary::Grammar(grammar.clone()))
    }

    pub fn listen_once_specialized(&self, grammar: &GrammarSpec) -> Result<Option<String>> {
        self.open(ListenMode::SingleShot, Dictionary::Grammar(grammar.clone()))?
            .next()
            .transpose()
    }

    /// Continuous session with a dictionary file already on disk.
    pub fn listen_with_dictionary(&self, dictionary: &Path) -> Result<Utterances<'_>> {
        self.open(
            ListenMode::Continuous,
            Dictionary::File(dictionary.to_path_buf()),
        )
    }

    pub fn listen_once_with_dictionary(&self, dictionary: &Path) -> Result<Option<String>> {
        self.open(
            ListenMode::SingleShot,
            Dictionary::File(dictionary.to_path_buf()),
        )?
        .next()
        .transpose()
    }

    /// Continuous session restricted to numbers.
    ///
    /// Uses `dictionary` if it exists, else the configured numbers dictionary
    /// if it exists, else the built-in digit grammar for the language.
    ///
    /// # Errors
    /// `ListenerError::UnsupportedLanguage` when the fallback is needed and
    /// no digit grammar exists for the language.
    pub fn listen_numbers(&self, dictionary: Option<&Path>) -> Result<Utterances<'_>> {
        let source = self.numbers_dictionary(dictionary)?;
        self.open(ListenMode::Continuous, source)
    }

    pub fn listen_numbers_once(&self, dictionary: Option<&Path>) -> Result<Option<String>> {
        let source = self.numbers_dictionary(dictionary)?;
        self.open(ListenMode::SingleShot, source)?.next().transpose()
    }

    fn numbers_dictionary(&self, dictionary: Option<&Path>) -> Result<Dictionary> {
        let candidates = dictionary
            .into_iter()
            .chain(self.shared.config.numbers_dictionary.as_deref());
        for path in candidates {
            if path.exists() {
                debug!(path = %path.display(), "using numbers dictionary");
                return Ok(Dictionary::File(path.to_path_buf()));
            }
            debug!(path = %path.display(), "numbers dictionary not found");
        }
        let grammar = digit_grammar(&self.shared.config.lang)?;
        debug!(lang = %self.shared.config.lang, "using built-in digit grammar");
        Ok(Dictionary::Grammar(grammar))
    }

    fn open(&self, mode: ListenMode, dictionary: Dictionary) -> Result<Utterances<'_>> {
        self.ensure_open()?;
        // Nothing else can reach this flag before the session is active.
        Utterances::open(
            &self.shared,
            mode,
            dictionary,
            Arc::new(AtomicBool::new(true)),
        )?
        .ok_or(ListenerError::InvalidState("session stopped before it opened"))
    }

    // ── Background sessions ──────────────────────────────────────────────────

    /// Continuous session on a background thread. Each utterance is
    /// published as `recognizer_loop:utterance` and pushed to
    /// [`subscribe_utterances`](Self::subscribe_utterances) receivers.
    pub fn listen_async(&self) -> Result<()> {
        self.spawn(TaskKind::Continuous)
    }

    /// Single-shot session on a background thread.
    pub fn listen_once_async(&self) -> Result<()> {
        self.spawn(TaskKind::SingleShot)
    }

    fn spawn(&self, kind: TaskKind) -> Result<()> {
        self.ensure_open()?;
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(&kind) {
            if !task.poll().is_finished() {
                return Err(ListenerError::AlreadyRunning);
            }
        }

        let cancel = Arc::new(AtomicBool::new(true));
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&cancel);
        let mode = match kind {
            TaskKind::Continuous => ListenMode::Continuous,
            TaskKind::SingleShot => ListenMode::SingleShot,
        };
        let task = BackgroundTask::spawn(kind, cancel, move || {
            let Some(session) = Utterances::open(&shared, mode, Dictionary::Default, running)?
            else {
                return Ok(());
            };
            for utterance in session {
                shared.publish_utterance(&utterance?);
            }
            Ok(())
        })?;
        tasks.insert(kind, task);
        Ok(())
    }

    /// Receiver of every utterance produced by background sessions.
    pub fn subscribe_utterances(&self) -> Receiver<String> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Outcome of the most recent background task of `kind`.
    pub fn task_outcome(&self, kind: TaskKind) -> Option<TaskOutcome> {
        self.tasks.lock().get_mut(&kind).map(BackgroundTask::poll)
    }

    // ── Control ──────────────────────────────────────────────────────────────

    /// Whether a session currently holds the decoder and stream.
    pub fn is_listening(&self) -> bool {
        self.shared
            .active
            .lock()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Most recent utterance of the current or last session.
    pub fn last_utterance(&self) -> Option<String> {
        self.shared.last_utterance.lock().clone()
    }

    /// Ask the active session to end and join background threads, waiting
    /// at most `join_timeout` per thread. Returns whether anything was
    /// running.
    pub fn stop(&self) -> bool {
        let mut stopped = self.shared.signal_active();
        let timeout = self.shared.config.join_timeout();

        let mut tasks = self.tasks.lock();
        for (kind, task) in tasks.iter_mut() {
            if task.poll().is_finished() {
                continue;
            }
            task.cancel();
            let outcome = task.join_timeout(timeout);
            debug!(kind = kind.label(), ?outcome, "listening task stopped");
            stopped = true;
        }
        if stopped {
            info!("listening stopped");
        }
        stopped
    }

    /// Stop everything and release the stream, decoder and device.
    ///
    /// Idempotent. If a session still holds the resources after
    /// `join_timeout`, that session releases them when it ends. Afterwards
    /// every `listen*` call fails with `ListenerError::ShutDown`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down local listener");
        self.shared.closing.store(true, Ordering::SeqCst);
        self.stop();

        match self
            .shared
            .resources
            .try_lock_for(self.shared.config.join_timeout())
        {
            Some(mut resources) => resources.release_all(),
            None => warn!("resources still held by a session; release deferred to it"),
        }
        self.shared.subscribers.lock().clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_closing() {
            Err(ListenerError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}
