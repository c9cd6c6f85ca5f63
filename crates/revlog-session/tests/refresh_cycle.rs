use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use revlog_core::{ProducerError, SessionConfig, SessionConsumer, Snapshot, SnapshotStore};
use revlog_session::{Admission, RecordProducer, RefreshOutcome, SessionController};
use tokio_test::assert_ok;

#[derive(Debug, Clone)]
enum Seen {
    Snapshot(Snapshot<u32>),
    Failure(ProducerError),
    Finalized,
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Seen>>>);

impl Recorder {
    fn events(&self) -> Vec<Seen> {
        self.0.lock().unwrap().clone()
    }

    fn snapshots(&self) -> Vec<Snapshot<u32>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Seen::Snapshot(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SessionConsumer<u32> for Recorder {
    async fn on_snapshot(&mut self, snapshot: Snapshot<u32>) {
        tokio::task::yield_now().await;
        self.0.lock().unwrap().push(Seen::Snapshot(snapshot));
    }

    async fn on_finalized(&mut self) {
        self.0.lock().unwrap().push(Seen::Finalized);
    }

    async fn on_failure(&mut self, error: ProducerError) {
        self.0.lock().unwrap().push(Seen::Failure(error));
    }
}

fn setup(config: &SessionConfig) -> (Arc<SessionController<u32>>, Recorder) {
    let recorder = Recorder::default();
    let (controller, _task) = SessionController::new(config, recorder.clone()).unwrap();
    (Arc::new(controller), recorder)
}

/// Every snapshot extends the previous one: same prefix, never shorter.
fn assert_monotonic(snapshots: &[Snapshot<u32>]) {
    for pair in snapshots.windows(2) {
        let (older, newer) = (&pair[0], &pair[1]);
        assert!(older.version() < newer.version());
        assert!(
            newer.records().starts_with(older.records()),
            "snapshot {:?} does not extend {:?}",
            newer.records(),
            older.records()
        );
    }
}

struct ScriptedProducer {
    initial: Option<Vec<u32>>,
    records: Vec<u32>,
    failure: Option<&'static str>,
}

#[async_trait]
impl RecordProducer<u32> for ScriptedProducer {
    async fn produce(&self, sink: &SessionController<u32>) -> Result<(), ProducerError> {
        if let Some(initial) = &self.initial {
            sink.report_initial(initial.clone())
                .await
                .map_err(|e| ProducerError::new(e.to_string()))?;
        }
        for record in &self.records {
            sink.accept_record(*record)
                .await
                .map_err(|e| ProducerError::new(e.to_string()))?;
        }
        match self.failure {
            Some(message) => Err(ProducerError::new(message)),
            None => Ok(()),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_arrive_as_monotonic_snapshots() {
    let (controller, recorder) = setup(&SessionConfig::default());
    assert_ok!(controller.before_refresh().await);

    let mut tasks = Vec::new();
    for i in 0..100 {
        let controller = Arc::clone(&controller);
        tasks.push(tokio::spawn(async move { controller.accept_record(i).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Admission::Accepted);
    }
    assert_ok!(controller.finished().await);

    let events = recorder.events();
    assert!(matches!(events.last(), Some(Seen::Finalized)));

    let snapshots = recorder.snapshots();
    assert!(!snapshots.is_empty());
    assert_monotonic(&snapshots);

    let mut last = snapshots.last().unwrap().to_vec();
    last.sort_unstable();
    assert_eq!(last, (0..100).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn cap_keeps_most_recently_admitted_records() {
    let config = SessionConfig::default().with_max_records(10);
    let (controller, recorder) = setup(&config);
    assert_ok!(controller.before_refresh().await);

    let initial: Vec<u32> = (100..104).collect();
    assert_ok!(controller.report_initial(initial.clone()).await);

    let mut admitted = initial;
    for i in 0..30 {
        if controller.accept_record(i).await.unwrap() == Admission::Accepted {
            admitted.push(i);
        }
    }
    assert_eq!(admitted.len(), 14);
    assert_ok!(controller.finished().await);

    let snapshots = recorder.snapshots();
    for snapshot in &snapshots {
        assert!(snapshot.len() <= 10);
        // Retained records are always a contiguous run of the admission order.
        let start = admitted
            .iter()
            .position(|r| Some(r) == snapshot.first())
            .unwrap();
        assert_eq!(snapshot.records(), &admitted[start..start + snapshot.len()]);
    }
    assert_eq!(snapshots.last().unwrap().to_vec(), (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn threshold_flush_does_not_wait_for_timer() {
    let (controller, recorder) = setup(&SessionConfig::default());
    assert_ok!(controller.before_refresh().await);

    for i in 0..5 {
        assert_ok!(controller.accept_record(i).await);
    }
    let snapshot = controller.current_snapshot().await.unwrap();
    assert_eq!(snapshot.records(), &[0, 1, 2, 3, 4]);

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_ok!(controller.finished().await);

    let snapshots = recorder.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].records(), &[0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_small_batch_once() {
    let (controller, recorder) = setup(&SessionConfig::default());
    assert_ok!(controller.before_refresh().await);

    for i in 0..3 {
        assert_ok!(controller.accept_record(i).await);
    }
    assert!(controller.current_snapshot().await.is_none());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        controller.current_snapshot().await.unwrap().records(),
        &[0, 1, 2]
    );

    assert_ok!(controller.finished().await);
    let snapshots = recorder.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].records(), &[0, 1, 2]);
}

#[tokio::test]
async fn finalized_only_after_every_record_is_published() {
    let config = SessionConfig::default().with_batch_size_threshold(4);
    let (controller, recorder) = setup(&config);
    assert_ok!(controller.before_refresh().await);
    assert_ok!(controller.report_initial(vec![1000]).await);

    for i in 0..11 {
        assert_ok!(controller.accept_record(i).await);
    }
    assert_ok!(controller.finished().await);

    let events = recorder.events();
    let Some((Seen::Finalized, rest)) = events.split_last() else {
        panic!("last event is not Finalized: {events:?}");
    };
    let Some(Seen::Snapshot(last)) = rest.last() else {
        panic!("no snapshot before Finalized: {events:?}");
    };
    let mut expected = vec![1000];
    expected.extend(0..11);
    assert_eq!(last.to_vec(), expected);

    // The initial view is the first thing the consumer sees.
    let Some(Seen::Snapshot(first)) = events.first() else {
        panic!("first event is not a snapshot: {events:?}");
    };
    assert_eq!(first.records(), &[1000]);
    assert_monotonic(&recorder.snapshots());
}

#[tokio::test]
async fn finishing_an_empty_cycle_publishes_nothing() {
    let (controller, recorder) = setup(&SessionConfig::default());

    assert_ok!(controller.finished().await);
    assert_ok!(controller.before_refresh().await);
    assert_ok!(controller.finished().await);

    assert!(controller.current_snapshot().await.is_none());
    tokio::task::yield_now().await;
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn failed_producer_keeps_partial_results() {
    let (controller, recorder) = setup(&SessionConfig::default());
    let producer = ScriptedProducer {
        initial: Some(vec![7]),
        records: vec![8, 9],
        failure: Some("repository unreachable"),
    };

    let outcome = controller.refresh(&producer).await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Failed(ProducerError::new("repository unreachable"))
    );

    let events = recorder.events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Seen::Failure(err) if err.message == "repository unreachable"))
    );
    assert!(matches!(events.last(), Some(Seen::Finalized)));
    assert_eq!(recorder.snapshots().last().unwrap().records(), &[7, 8, 9]);
}

#[tokio::test]
async fn failure_is_delivered_after_pending_records() {
    let (controller, recorder) = setup(&SessionConfig::default());
    let producer = ScriptedProducer {
        initial: None,
        records: vec![0, 1, 2],
        failure: Some("boom"),
    };

    let outcome = controller.refresh(&producer).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Failed(ProducerError::new("boom")));

    let events = recorder.events();
    assert_eq!(events.len(), 3, "unexpected events: {events:?}");
    assert!(matches!(&events[0], Seen::Snapshot(s) if s.records() == [0, 1, 2]));
    assert!(matches!(&events[1], Seen::Failure(err) if err.message == "boom"));
    assert!(matches!(events[2], Seen::Finalized));
}

#[tokio::test]
async fn store_keeps_failure_of_latest_cycle() {
    let store = Arc::new(SnapshotStore::<u32>::new());
    let (controller, _task) =
        SessionController::new(&SessionConfig::default(), Arc::clone(&store)).unwrap();

    let healthy = ScriptedProducer {
        initial: Some(vec![1]),
        records: vec![2],
        failure: None,
    };
    assert_eq!(
        controller.refresh(&healthy).await.unwrap(),
        RefreshOutcome::Completed
    );
    assert!(store.last_failure().is_none());

    let failing = ScriptedProducer {
        initial: None,
        records: vec![3, 4, 5],
        failure: Some("boom"),
    };
    assert_eq!(
        controller.refresh(&failing).await.unwrap(),
        RefreshOutcome::Failed(ProducerError::new("boom"))
    );

    let latest = store.latest().unwrap();
    assert_eq!(latest.cycle(), 2);
    assert_eq!(latest.records(), &[3, 4, 5]);
    assert_eq!(store.last_failure(), Some(ProducerError::new("boom")));
    assert!(store.is_finalized());
}

#[tokio::test]
async fn background_refreshes_run_back_to_back() {
    let (controller, recorder) = setup(&SessionConfig::default());
    let producer: Arc<dyn RecordProducer<u32>> = Arc::new(ScriptedProducer {
        initial: None,
        records: (0..12).collect(),
        failure: None,
    });

    for _ in 0..2 {
        let outcome = controller
            .spawn_refresh(Arc::clone(&producer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed);
    }

    let snapshots = recorder.snapshots();
    let (first_cycle, second_cycle): (Vec<_>, Vec<_>) =
        snapshots.into_iter().partition(|s| s.cycle() == 1);
    assert_monotonic(&first_cycle);
    assert_monotonic(&second_cycle);
    assert_eq!(second_cycle.last().unwrap().len(), 12);

    let finalized = recorder
        .events()
        .iter()
        .filter(|e| matches!(e, Seen::Finalized))
        .count();
    assert_eq!(finalized, 2);
}
