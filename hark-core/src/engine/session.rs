//! One listening session: exclusive use of the decoder and audio stream for
//! the lifetime of an [`Utterances`] iterator.
//!
//! ## Ownership
//!
//! The decoder, stream and device live behind one mutex. A session holds the
//! guard for as long as it exists, so two sessions can never interleave
//! frames. Opening a session first clears the running flag of whichever
//! session holds the guard, then waits for that session to drop it.
//!
//! ## Notifications
//!
//! Once the decoder and stream are ready the session publishes
//! `sleep`, `local_listener.start`, `record_begin` (in that order). When it
//! drops, whatever the reason, it publishes `record_end`,
//! `local_listener.end`, `wake_up`. A session that failed before streaming
//! publishes neither set.

use std::iter::FusedIterator;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, info_span, warn, Span};

use super::segmenter::{LoopState, Segmenter};
use crate::audio::{AudioBackend, AudioSource, StreamFormat};
use crate::bus::cue::ListeningCue;
use crate::bus::{self, EventBus, Message};
use crate::config::ListenerConfig;
use crate::decoder::DecoderSession;
use crate::error::{ListenerError, Result};
use crate::grammar::{compile, CompiledGrammar, GrammarSpec};

/// How often a waiting session re-signals the holder to stop.
const PREEMPT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Continuous,
    SingleShot,
}

impl ListenMode {
    fn label(self) -> &'static str {
        match self {
            ListenMode::Continuous => "continuous",
            ListenMode::SingleShot => "single-shot",
        }
    }
}

/// Which dictionary the session's decoder is built with.
#[derive(Debug, Clone)]
pub(crate) enum Dictionary {
    /// The configured default.
    Default,
    /// A dictionary file already on disk.
    File(PathBuf),
    /// Compiled to a temporary file that lives as long as the session.
    Grammar(GrammarSpec),
}

impl Dictionary {
    fn label(&self) -> &'static str {
        match self {
            Dictionary::Default => "default",
            Dictionary::File(_) => "file",
            Dictionary::Grammar(_) => "grammar",
        }
    }
}

/// Decoder, stream and device. Always accessed under `Shared::resources`.
pub(crate) struct Resources {
    pub decoder: DecoderSession,
    pub stream: Option<Box<dyn AudioSource>>,
    /// `None` once the device has been terminated.
    pub backend: Option<Box<dyn AudioBackend>>,
    pub format: StreamFormat,
}

impl Resources {
    /// Open the stream if it is not open yet.
    pub fn ensure_stream(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let backend = self.backend.as_mut().ok_or(ListenerError::ShutDown)?;
            self.stream = Some(backend.open(self.format)?);
            debug!(
                sample_rate = self.format.sample_rate,
                frame_samples = self.format.frame_samples,
                "audio stream opened"
            );
        }
        Ok(())
    }

    /// Close the stream, release the decoder, terminate the device.
    pub fn release_all(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                debug!("stopping stream on release failed: {e}");
            }
            stream.close();
        }
        self.decoder.release();
        if let Some(mut backend) = self.backend.take() {
            backend.terminate();
            debug!("audio device terminated");
        }
    }
}

/// State shared by the listener handle and its background threads.
pub(crate) struct Shared {
    pub resources: Mutex<Resources>,
    /// Running flag of the session that currently holds `resources`.
    pub active: Mutex<Option<Arc<AtomicBool>>>,
    /// Set by shutdown; no new session may open once it is.
    pub closing: AtomicBool,
    pub bus: Arc<dyn EventBus>,
    pub cue: Mutex<Option<Arc<dyn ListeningCue>>>,
    pub config: ListenerConfig,
    pub last_utterance: Mutex<Option<String>>,
    pub subscribers: Mutex<Vec<Sender<String>>>,
}

impl Shared {
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Ask the active session, if any, to stop. Returns whether one existed.
    pub fn signal_active(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(flag) => {
                flag.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Publish one async utterance on the bus and to push subscribers.
    pub fn publish_utterance(&self, text: &str) {
        self.bus.emit(Message::utterance(text, &self.config.lang));
        self.subscribers
            .lock()
            .retain(|tx| tx.send(text.to_string()).is_ok());
    }

    fn emit(&self, msg_type: &str) {
        self.bus.emit(Message::new(msg_type));
    }
}

/// Iterator over the utterances of one listening session.
///
/// Yields trimmed, non-empty utterances until the session is stopped, the
/// stream ends, an error occurs (yielded once, then `None`), or, in single-shot
/// mode, after the first utterance. Dropping it tears the session down.
pub struct Utterances<'a> {
    shared: &'a Shared,
    guard: MutexGuard<'a, Resources>,
    running: Arc<AtomicBool>,
    mode: ListenMode,
    segmenter: Segmenter,
    /// Keeps a compiled grammar file alive until the decoder is released.
    grammar: Option<CompiledGrammar>,
    notified: bool,
    finished: bool,
    emitted: usize,
    span: Span,
}

impl<'a> Utterances<'a> {
    /// Preempt any active session, take the resources and start streaming.
    ///
    /// `running` becomes the session's stop flag. If it is cleared while
    /// waiting for the resources, this returns `Ok(None)` without touching
    /// the decoder or publishing anything.
    pub(crate) fn open(
        shared: &'a Shared,
        mode: ListenMode,
        dictionary: Dictionary,
        running: Arc<AtomicBool>,
    ) -> Result<Option<Self>> {
        let span = info_span!("listening", mode = mode.label(), dictionary = dictionary.label());
        let entered = span.enter();

        let guard = loop {
            if shared.is_closing() {
                return Err(ListenerError::ShutDown);
            }
            if !running.load(Ordering::SeqCst) {
                debug!("stopped while waiting for the resources");
                return Ok(None);
            }
            if shared.signal_active() {
                debug!("preempting the active listening session");
            }
            if let Some(guard) = shared.resources.try_lock_for(PREEMPT_POLL) {
                break guard;
            }
        };
        if shared.is_closing() || guard.backend.is_none() {
            return Err(ListenerError::ShutDown);
        }
        if !running.load(Ordering::SeqCst) {
            debug!("stopped while waiting for the resources");
            return Ok(None);
        }
        *shared.active.lock() = Some(Arc::clone(&running));
        *shared.last_utterance.lock() = None;

        drop(entered);
        let mut session = Self {
            shared,
            guard,
            running,
            mode,
            segmenter: Segmenter::new(),
            grammar: None,
            notified: false,
            finished: false,
            emitted: 0,
            span,
        };
        // Any error from here drops `session`, which undoes the partial setup.
        session.prepare(dictionary)?;
        Ok(Some(session))
    }

    fn prepare(&mut self, dictionary: Dictionary) -> Result<()> {
        let _enter = self.span.clone().entered();

        match dictionary {
            Dictionary::Default => self.guard.decoder.reset(None, None, None)?,
            Dictionary::File(path) => self.guard.decoder.reset_with_dictionary(&path)?,
            Dictionary::Grammar(grammar) => {
                let compiled = compile(&grammar)?;
                self.guard.decoder.reset_with_dictionary(compiled.path())?;
                self.grammar = Some(compiled);
            }
        }
        self.guard.ensure_stream()?;

        self.notify_begin();

        if let Some(stream) = self.guard.stream.as_mut() {
            stream.start()?;
        }
        self.segmenter.open(&mut self.guard.decoder)?;
        info!("listening");
        Ok(())
    }

    fn notify_begin(&mut self) {
        let config = &self.shared.config;
        if config.confirm_listening {
            let cue = self.shared.cue.lock().clone();
            match (cue, config.start_listening_sound.as_deref()) {
                (Some(cue), Some(sound)) => {
                    if let Err(e) = cue.play(sound) {
                        warn!(sound = %sound.display(), "listening cue failed: {e}");
                    }
                }
                (None, _) => debug!("confirmation requested but no cue player set"),
                (_, None) => debug!("confirmation requested but no cue sound configured"),
            }
        }
        self.shared.emit(bus::SLEEP);
        self.shared.emit(bus::LOCAL_LISTENER_START);
        self.shared.emit(bus::RECORD_BEGIN);
        self.notified = true;
    }

    /// Whether the session would keep reading frames.
    pub fn is_running(&self) -> bool {
        !self.finished && self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LoopState {
        self.segmenter.state()
    }

    pub fn mode(&self) -> ListenMode {
        self.mode
    }

    /// Stop flag of this session; storing `false` ends it after the
    /// current frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn step(&mut self) -> Result<Option<String>> {
        let frame_samples = self.guard.format.frame_samples;
        while self.running.load(Ordering::SeqCst) {
            let frame = match self.guard.stream.as_mut() {
                Some(stream) => stream.read(frame_samples)?,
                None => None,
            };
            let Some(frame) = frame else {
                debug!("audio stream ended");
                return Ok(None);
            };

            if let Some(text) = self.segmenter.push_frame(&mut self.guard.decoder, &frame)? {
                self.emitted += 1;
                *self.shared.last_utterance.lock() = Some(text.clone());
                info!(utterance = %text, "utterance recognised");
                if self.mode == ListenMode::SingleShot {
                    self.running.store(false, Ordering::SeqCst);
                }
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    fn teardown(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Err(e) = self.segmenter.close(&mut self.guard.decoder) {
            warn!("closing utterance failed: {e}");
        }
        if self.shared.is_closing() {
            self.guard.release_all();
            info!("released resources left by shutdown");
        } else {
            if let Some(stream) = self.guard.stream.as_mut() {
                if let Err(e) = stream.stop() {
                    warn!("stopping audio stream failed: {e}");
                }
            }
            self.guard.decoder.release();
        }
        if let Some(grammar) = self.grammar.take() {
            debug!(path = %grammar.path().display(), "removing compiled grammar");
        }

        {
            let mut active = self.shared.active.lock();
            if active
                .as_ref()
                .is_some_and(|flag| Arc::ptr_eq(flag, &self.running))
            {
                *active = None;
            }
        }

        if self.notified {
            self.shared.emit(bus::RECORD_END);
            self.shared.emit(bus::LOCAL_LISTENER_END);
            self.shared.emit(bus::WAKE_UP);
        }
        info!(utterances = self.emitted, "listening session closed");
    }
}

impl Iterator for Utterances<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let _enter = self.span.clone().entered();
        match self.step() {
            Ok(Some(text)) => Some(Ok(text)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                warn!("listening loop failed: {e}");
                self.finished = true;
                self.running.store(false, Ordering::SeqCst);
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for Utterances<'_> {}

impl Drop for Utterances<'_> {
    fn drop(&mut self) {
        let _enter = self.span.clone().entered();
        self.teardown();
    }
}
