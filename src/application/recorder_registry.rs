// Recorder registry - Use cases for starting, stopping and listing recorders
use super::measurement::MeasurementFactory;
use super::readings_queue::ReadingsSink;
use super::recorder::{CooldownSettings, Recorder, RecorderError, RecorderStatus};
use super::recorder_pool::RecorderPool;
use crate::domain::reading::{Browser, RecordingMethod};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How many stopped recorders are remembered for `list_all`.
const STOPPED_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSummary {
    pub identifier: String,
    pub method: RecordingMethod,
    pub status: RecorderStatus,
}

impl RecorderSummary {
    fn of(recorder: &Recorder) -> Self {
        Self {
            identifier: recorder.identifier().to_string(),
            method: recorder.method(),
            status: recorder.status(),
        }
    }
}

struct Tracked {
    started: u64,
    recorder: Arc<Recorder>,
}

#[derive(Default)]
struct Recorders {
    next_start: u64,
    by_id: HashMap<String, Tracked>,
}

impl Recorders {
    fn insert(&mut self, identifier: String, recorder: Arc<Recorder>) {
        self.next_start += 1;
        let started = self.next_start;
        self.by_id.insert(identifier, Tracked { started, recorder });
    }

    /// Forgets the oldest stopped recorders beyond `keep`. Running ones are never touched.
    fn prune_stopped(&mut self, keep: usize) {
        let mut stopped: Vec<(u64, String)> = self
            .by_id
            .iter()
            .filter(|(_, tracked)| tracked.recorder.status().is_stopped())
            .map(|(id, tracked)| (tracked.started, id.clone()))
            .collect();
        if stopped.len() <= keep {
            return;
        }
        stopped.sort_unstable();
        let excess = stopped.len() - keep;
        for (_, id) in stopped.into_iter().take(excess) {
            self.by_id.remove(&id);
        }
    }

    fn all(&self) -> impl Iterator<Item = &Arc<Recorder>> {
        self.by_id.values().map(|tracked| &tracked.recorder)
    }
}

pub struct RecorderRegistry {
    pool: RecorderPool,
    factory: Arc<dyn MeasurementFactory>,
    sink: ReadingsSink,
    cooldown: CooldownSettings,
    stopped_history: usize,
    recorders: Mutex<Recorders>,
}

impl RecorderRegistry {
    pub fn new(
        pool: RecorderPool,
        factory: Arc<dyn MeasurementFactory>,
        sink: ReadingsSink,
        cooldown: CooldownSettings,
    ) -> Self {
        Self {
            pool,
            factory,
            sink,
            cooldown,
            stopped_history: STOPPED_HISTORY,
            recorders: Mutex::new(Recorders::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Pool slots held, including by recorders still finishing after a stop.
    pub fn slots_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Validates the request and starts a new recorder. Every rejection happens
    /// before a task is spawned, so a failed start leaves nothing behind.
    pub fn start(
        &self,
        identifier: &str,
        method: RecordingMethod,
        browser: Option<Browser>,
    ) -> Result<RecorderSummary, RecorderError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RecorderError::EmptyIdentifier);
        }

        let mut recorders = self.lock();
        if recorders
            .by_id
            .get(identifier)
            .is_some_and(|existing| !existing.recorder.status().is_stopped())
        {
            return Err(RecorderError::DuplicateIdentifier(identifier.to_string()));
        }
        if self.pool.available() == 0 {
            return Err(RecorderError::AtCapacity {
                max: self.pool.capacity(),
            });
        }

        let measurer = self
            .factory
            .create(method, browser)
            .map_err(|e| RecorderError::Resource(e.to_string()))?;
        let recorder = Recorder::new(identifier, measurer, self.sink.clone(), self.cooldown);
        recorder.start(&self.pool)?;

        let summary = RecorderSummary::of(&recorder);
        recorders.insert(identifier.to_string(), recorder);
        recorders.prune_stopped(self.stopped_history);
        Ok(summary)
    }

    /// Requests a stop. The recorder keeps running until its current
    /// measurement reaches a checkpoint.
    pub fn stop(&self, identifier: &str) -> Result<RecorderSummary, RecorderError> {
        let recorder = self
            .lock()
            .by_id
            .get(identifier.trim())
            .map(|tracked| &tracked.recorder)
            .filter(|r| r.is_running())
            .cloned()
            .ok_or_else(|| RecorderError::NotFound(identifier.to_string()))?;
        recorder.request_stop();
        Ok(RecorderSummary::of(&recorder))
    }

    pub fn list_running(&self) -> Vec<RecorderSummary> {
        let mut running: Vec<_> = self
            .lock()
            .all()
            .filter(|r| r.is_running())
            .map(|r| RecorderSummary::of(r))
            .collect();
        running.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        running
    }

    /// Running recorders plus the most recently started stopped ones, with the
    /// reason they stopped.
    pub fn list_all(&self) -> Vec<RecorderSummary> {
        let mut all: Vec<_> = self.lock().all().map(|r| RecorderSummary::of(r)).collect();
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        all
    }

    /// Stops every recorder and waits up to `timeout` for each to finish.
    pub async fn stop_all(&self, timeout: Duration) -> Vec<RecorderSummary> {
        let recorders: Vec<Arc<Recorder>> = self.lock().all().cloned().collect();
        for recorder in &recorders {
            recorder.request_stop();
        }
        futures::future::join_all(recorders.iter().map(|recorder| async move {
            if recorder.wait_stopped(timeout).await.is_none() {
                tracing::warn!(recorder = %recorder.identifier(), "recorder did not stop in time");
            }
            RecorderSummary::of(recorder)
        }))
        .await
    }

    fn lock(&self) -> MutexGuard<'_, Recorders> {
        self.recorders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::readings_queue::{
        LiveTap, OverflowPolicy, ReadingsConsumer, readings_queue,
    };
    use crate::application::testing::ScriptedFactory;

    fn registry(max: usize, factory: ScriptedFactory) -> (RecorderRegistry, ReadingsConsumer) {
        let (results, consumer) = readings_queue("results", 256, OverflowPolicy::Block);
        let cooldown = CooldownSettings {
            duration: Duration::from_millis(50),
            poll: Duration::from_millis(5),
        };
        let registry = RecorderRegistry::new(
            RecorderPool::new(max),
            Arc::new(factory),
            ReadingsSink::new(results, LiveTap::default()),
            cooldown,
        );
        (registry, consumer)
    }

    #[tokio::test]
    async fn test_duplicate_identifier_is_rejected() {
        let (registry, _rx) = registry(4, ScriptedFactory::default());
        registry.start("home", RecordingMethod::SpeedtestCli, None).unwrap();
        assert_eq!(
            registry.start(" home ", RecordingMethod::BtWebsite, Some(Browser::Edge)),
            Err(RecorderError::DuplicateIdentifier("home".to_string()))
        );
        assert_eq!(registry.list_running().len(), 1);
        registry.stop_all(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_cap_rejects_excess_without_disturbing_running() {
        let (registry, _rx) = registry(2, ScriptedFactory::default());
        registry.start("a", RecordingMethod::SpeedtestCli, None).unwrap();
        registry.start("b", RecordingMethod::BtWebsite, None).unwrap();

        assert_eq!(
            registry.start("c", RecordingMethod::WhichWebsite, None),
            Err(RecorderError::AtCapacity { max: 2 })
        );
        assert_eq!(
            registry.start("d", RecordingMethod::SpeedtestCli, None),
            Err(RecorderError::AtCapacity { max: 2 })
        );

        let running: Vec<_> = registry
            .list_running()
            .into_iter()
            .map(|s| (s.identifier, s.status))
            .collect();
        assert_eq!(
            running,
            vec![
                ("a".to_string(), RecorderStatus::Running),
                ("b".to_string(), RecorderStatus::Running),
            ]
        );
        registry.stop_all(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_stopped_identifier_can_be_reused() {
        let (registry, _rx) = registry(1, ScriptedFactory::default());
        registry.start("home", RecordingMethod::SpeedtestCli, None).unwrap();
        registry.stop("home").unwrap();
        let stopped = registry.stop_all(Duration::from_secs(2)).await;
        assert!(stopped.iter().all(|s| s.status.is_stopped()));

        assert!(registry.list_running().is_empty());
        assert!(registry.start("home", RecordingMethod::SpeedtestCli, None).is_ok());
        registry.stop_all(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_old_stopped_recorders_are_forgotten() {
        let (mut registry, _rx) = registry(1, ScriptedFactory::default());
        registry.stopped_history = 1;

        for id in ["first", "second", "third"] {
            registry.start(id, RecordingMethod::SpeedtestCli, None).unwrap();
            registry.stop_all(Duration::from_secs(2)).await;
        }
        let ids: Vec<String> = registry.list_all().into_iter().map(|s| s.identifier).collect();
        assert_eq!(ids, vec!["second".to_string(), "third".to_string()]);

        registry.start("fourth", RecordingMethod::SpeedtestCli, None).unwrap();
        let all = registry.list_all();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|s| s.identifier == "fourth" && s.status == RecorderStatus::Running));
        assert!(all.iter().any(|s| s.identifier == "third"));
        registry.stop_all(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_stop_unknown_recorder() {
        let (registry, _rx) = registry(1, ScriptedFactory::default());
        assert_eq!(
            registry.stop("ghost"),
            Err(RecorderError::NotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_factory_failure_creates_nothing() {
        let (registry, _rx) = registry(1, ScriptedFactory { fail_create: true });
        assert!(matches!(
            registry.start("web", RecordingMethod::BtWebsite, Some(Browser::Chrome)),
            Err(RecorderError::Resource(_))
        ));
        assert!(registry.list_all().is_empty());
        assert_eq!(registry.capacity(), 1);
    }

    #[tokio::test]
    async fn test_recorders_publish_to_shared_queue() {
        let (registry, mut rx) = registry(2, ScriptedFactory::default());
        registry.start("cli", RecordingMethod::SpeedtestCli, None).unwrap();
        registry.start("bt", RecordingMethod::BtWebsite, None).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        registry.stop_all(Duration::from_secs(2)).await;

        let methods: std::collections::HashSet<_> = rx.drain().iter().map(|r| r.method()).collect();
        assert!(methods.contains(&RecordingMethod::SpeedtestCli));
        assert!(methods.contains(&RecordingMethod::BtWebsite));
    }
}
