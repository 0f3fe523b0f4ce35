//! Voice recognition sessions
//!
//! Recognizers available to us only run short sessions: listen until the
//! utterance ends, report results, exit. [`RecognitionSource`] wraps such an
//! engine behind idempotent `start()`/`stop()` and reports session events to
//! a [`RecognitionListener`]. Keeping the microphone open continuously is
//! the caller's job: call `start()` again when a session stops or the device
//! reports activity.

pub mod subprocess;

pub use subprocess::SubprocessEngine;

use crate::error::RecognitionError;
use crate::filter::SpeechListener;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inclusive bounds for raw signal levels reported by an engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRange {
    pub min: f32,
    pub max: f32,
}

impl LevelRange {
    pub fn new(min: f32, max: f32) -> Result<Self, RecognitionError> {
        if min.is_nan() || max.is_nan() || min >= max {
            return Err(RecognitionError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Clamp a raw level into range. NaN maps to `min`.
    pub fn clamp(&self, level: f32) -> f32 {
        if level.is_nan() {
            return self.min;
        }
        level.clamp(self.min, self.max)
    }
}

impl Default for LevelRange {
    /// Range reported by Android-style RMS dB meters
    fn default() -> Self {
        Self {
            min: -2.12,
            max: 10.0,
        }
    }
}

/// Receives recognition session events.
///
/// Callbacks of one source arrive in order from the session task (lifecycle
/// events may also fire on the task calling `start`/`stop`). They must
/// return quickly.
pub trait RecognitionListener: SpeechListener {
    /// A listening session began
    fn on_start(&self);

    /// The session ended, by end of utterance, error or `stop()`
    fn on_stop(&self);

    /// Signal level, already clamped to the source's [`LevelRange`]
    fn on_sound_changed(&self, level: f32);
}

/// Reports what happens during one session back to the source
pub struct SessionEvents {
    shared: Arc<Shared>,
    session: u64,
}

impl SessionEvents {
    /// Report a raw signal level
    pub fn level(&self, level: f32) {
        let level = self.shared.range.clamp(level);
        self.shared.deliver(self.session, |listener| listener.on_sound_changed(level));
    }

    /// Report the recognized hypotheses, best first
    pub fn results(&self, candidates: Vec<String>) {
        tracing::debug!("Recognized {} candidate(s): {:?}", candidates.len(), candidates);
        self.shared
            .deliver(self.session, |listener| listener.on_speech_recognized(&candidates));
    }

    /// Check whether this session is still the active one
    pub fn is_active(&self) -> bool {
        self.shared.is_live(self.session)
    }
}

/// Trait for recognizer backends that run one short session at a time
#[async_trait::async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Listen for one utterance, reporting levels and results through
    /// `events`. Returns when the session is over. The future may be
    /// dropped at any await point when the session is stopped.
    async fn listen(&self, events: &SessionEvents) -> Result<(), RecognitionError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

struct Session {
    listening: bool,
    id: u64,
}

struct Shared {
    session: Mutex<Session>,
    /// Held while committing a transition and firing its callback
    delivery: Mutex<()>,
    listener: Arc<dyn RecognitionListener>,
    range: LevelRange,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn is_live(&self, id: u64) -> bool {
        let session = lock(&self.session);
        session.listening && session.id == id
    }

    fn deliver(&self, id: u64, callback: impl FnOnce(&dyn RecognitionListener)) {
        let _delivery = lock(&self.delivery);
        if self.is_live(id) {
            callback(self.listener.as_ref());
        }
    }

    /// End session `id`, firing `on_stop` if it was still running
    fn finish(&self, id: u64) -> bool {
        let _delivery = lock(&self.delivery);
        {
            let mut session = lock(&self.session);
            if !session.listening || session.id != id {
                return false;
            }
            session.listening = false;
        }
        self.listener.on_stop();
        true
    }
}

/// Restartable listening on top of a one-shot engine
pub struct RecognitionSource {
    engine: Arc<dyn RecognitionEngine>,
    shared: Arc<Shared>,
    task: Mutex<Option<(u64, JoinHandle<()>)>>,
}

impl RecognitionSource {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        listener: Arc<dyn RecognitionListener>,
        range: LevelRange,
    ) -> Self {
        Self {
            engine,
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    listening: false,
                    id: 0,
                }),
                delivery: Mutex::new(()),
                listener,
                range,
            }),
            task: Mutex::new(None),
        }
    }

    /// Check if a session is running
    pub fn is_listening(&self) -> bool {
        lock(&self.shared.session).listening
    }

    /// Level bounds applied to `on_sound_changed`
    pub fn range(&self) -> LevelRange {
        self.shared.range
    }

    /// Begin a session. No-op while one is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        // The handle is stored before the delivery lock is released, so a
        // stop() that commits right after always finds the task to abort
        let _delivery = lock(&self.shared.delivery);
        let id = {
            let mut session = lock(&self.shared.session);
            if session.listening {
                tracing::trace!("Recognition already running");
                return;
            }
            session.listening = true;
            session.id += 1;
            session.id
        };
        tracing::debug!("Recognition session {} started ({})", id, self.engine.name());
        self.shared.listener.on_start();

        let engine = self.engine.clone();
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let events = SessionEvents {
                shared: shared.clone(),
                session: id,
            };
            if !events.is_active() {
                return;
            }
            if let Err(e) = engine.listen(&events).await {
                tracing::warn!("Recognition session {} failed: {}", id, e);
            }
            if shared.finish(id) {
                tracing::debug!("Recognition session {} ended", id);
            }
        });

        // A previous session's task has already committed its stop
        lock(&self.task).replace((id, task));
    }

    /// End the running session. No-op when stopped.
    ///
    /// Fires `on_stop` for the session being ended; no callback for it
    /// fires after this returns.
    pub async fn stop(&self) {
        let id = lock(&self.shared.session).id;
        if !self.shared.finish(id) {
            return;
        }
        tracing::debug!("Recognition session {} stopped", id);

        let task = {
            let mut slot = lock(&self.task);
            match slot.take() {
                Some((owner, task)) if owner == id => Some(task),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for RecognitionSource {
    fn drop(&mut self) {
        if let Some((_, task)) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// Recognition callbacks as values
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Started,
    Stopped,
    SoundChanged(f32),
    SpeechRecognized(Vec<String>),
}

/// Listener that forwards every callback into a channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<RecognitionEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiver its events arrive on
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RecognitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: RecognitionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Recognition event receiver dropped");
        }
    }
}

impl SpeechListener for ChannelListener {
    fn on_speech_recognized(&self, candidates: &[String]) {
        self.forward(RecognitionEvent::SpeechRecognized(candidates.to_vec()));
    }
}

impl RecognitionListener for ChannelListener {
    fn on_start(&self) {
        self.forward(RecognitionEvent::Started);
    }

    fn on_stop(&self) {
        self.forward(RecognitionEvent::Stopped);
    }

    fn on_sound_changed(&self, level: f32) {
        self.forward(RecognitionEvent::SoundChanged(level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Plays back fixed levels and results, then ends the session
    struct ScriptedEngine {
        levels: Vec<f32>,
        results: Option<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RecognitionEngine for ScriptedEngine {
        async fn listen(&self, events: &SessionEvents) -> Result<(), RecognitionError> {
            for level in &self.levels {
                events.level(*level);
            }
            if let Some(results) = &self.results {
                events.results(results.clone());
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Reports a level, then listens until released
    struct HangingEngine {
        release: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl RecognitionEngine for HangingEngine {
        async fn listen(&self, events: &SessionEvents) -> Result<(), RecognitionError> {
            events.level(1.0);
            self.release.notified().await;
            events.results(vec!["too late".to_string()]);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    struct FailingEngine;

    #[async_trait::async_trait]
    impl RecognitionEngine for FailingEngine {
        async fn listen(&self, _events: &SessionEvents) -> Result<(), RecognitionError> {
            Err(RecognitionError::SessionFailed("microphone busy".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RecognitionEvent>) -> RecognitionEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for recognition event")
            .expect("event channel closed")
    }

    fn source(
        engine: impl RecognitionEngine + 'static,
    ) -> (RecognitionSource, mpsc::UnboundedReceiver<RecognitionEvent>) {
        let (listener, rx) = ChannelListener::new();
        (
            RecognitionSource::new(Arc::new(engine), listener, LevelRange::default()),
            rx,
        )
    }

    #[test]
    fn test_level_range_rejects_inverted_bounds() {
        assert!(LevelRange::new(10.0, -2.0).is_err());
        assert!(LevelRange::new(1.0, 1.0).is_err());
        assert!(LevelRange::new(f32::NAN, 1.0).is_err());
        assert!(LevelRange::new(-2.12, 10.0).is_ok());
    }

    #[test]
    fn test_level_range_clamps() {
        let range = LevelRange::default();
        assert_eq!(range.clamp(-50.0), -2.12);
        assert_eq!(range.clamp(42.0), 10.0);
        assert_eq!(range.clamp(3.5), 3.5);
        assert_eq!(range.clamp(f32::NAN), -2.12);
    }

    #[tokio::test]
    async fn test_session_event_order() {
        let (source, mut rx) = source(ScriptedEngine {
            levels: vec![-10.0, 4.0, 99.0],
            results: Some(vec!["computer lights on".to_string(), "computer light son".to_string()]),
        });

        source.start();

        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Started);
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::SoundChanged(-2.12));
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::SoundChanged(4.0));
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::SoundChanged(10.0));
        assert_eq!(
            next_event(&mut rx).await,
            RecognitionEvent::SpeechRecognized(vec![
                "computer lights on".to_string(),
                "computer light son".to_string()
            ])
        );
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Stopped);
        assert!(!source.is_listening());
    }

    #[tokio::test]
    async fn test_empty_results_delivered() {
        let (source, mut rx) = source(ScriptedEngine {
            levels: vec![],
            results: Some(vec![]),
        });
        source.start();

        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Started);
        assert_eq!(
            next_event(&mut rx).await,
            RecognitionEvent::SpeechRecognized(vec![])
        );
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let release = Arc::new(Notify::new());
        let (source, mut rx) = source(HangingEngine {
            release: release.clone(),
        });

        source.start();
        source.start();
        assert!(source.is_listening());

        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Started);
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::SoundChanged(1.0));

        release.notify_one();
        assert_eq!(
            next_event(&mut rx).await,
            RecognitionEvent::SpeechRecognized(vec!["too late".to_string()])
        );
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_silences_session() {
        let release = Arc::new(Notify::new());
        let (source, mut rx) = source(HangingEngine {
            release: release.clone(),
        });

        source.start();
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Started);
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::SoundChanged(1.0));

        source.stop().await;
        assert!(!source.is_listening());
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Stopped);

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let (source, mut rx) = source(FailingEngine);
        source.stop().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_engine_error_ends_session() {
        let (source, mut rx) = source(FailingEngine);
        source.start();

        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Started);
        assert_eq!(next_event(&mut rx).await, RecognitionEvent::Stopped);
        assert!(!source.is_listening());
    }

    #[tokio::test]
    async fn test_restart_after_session_ends() {
        let (source, mut rx) = source(ScriptedEngine {
            levels: vec![],
            results: None,
        });

        for _ in 0..2 {
            source.start();
            assert_eq!(next_event(&mut rx).await, RecognitionEvent::Started);
            assert_eq!(next_event(&mut rx).await, RecognitionEvent::Stopped);
        }
    }

    /// Counts engine sessions that are currently running
    struct TrackedEngine {
        running: Arc<AtomicUsize>,
    }

    struct RunningGuard(Arc<AtomicUsize>);

    impl Drop for RunningGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl RecognitionEngine for TrackedEngine {
        async fn listen(&self, _events: &SessionEvents) -> Result<(), RecognitionError> {
            self.running.fetch_add(1, Ordering::SeqCst);
            let _guard = RunningGuard(self.running.clone());
            std::future::pending::<()>().await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "tracked"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_racing_start_leaves_no_engine_running() {
        let running = Arc::new(AtomicUsize::new(0));
        let (listener, _events) = ChannelListener::new();
        let source = Arc::new(RecognitionSource::new(
            Arc::new(TrackedEngine {
                running: running.clone(),
            }),
            listener,
            LevelRange::default(),
        ));

        for round in 0..200 {
            let starter = tokio::task::spawn_blocking({
                let source = source.clone();
                move || source.start()
            });
            source.stop().await;
            starter.await.unwrap();
            source.stop().await;

            assert!(!source.is_listening());
            assert_eq!(running.load(Ordering::SeqCst), 0, "round {}", round);
        }
    }
}
