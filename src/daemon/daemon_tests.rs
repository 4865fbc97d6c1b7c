use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot, Semaphore};

/// Resync that reports each start and blocks until released.
struct GatedResync {
    calls: AtomicUsize,
    started: mpsc::UnboundedSender<usize>,
    release: Semaphore,
}

#[async_trait]
impl Resync for GatedResync {
    async fn resync(&self) -> Result<(), PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.started.send(call);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
        Ok(())
    }
}

fn gated() -> (Arc<GatedResync>, mpsc::UnboundedReceiver<usize>) {
    let (started, started_rx) = mpsc::unbounded_channel();
    let resync = Arc::new(GatedResync {
        calls: AtomicUsize::new(0),
        started,
        release: Semaphore::new(0),
    });
    (resync, started_rx)
}

/// Events fed through a channel; reports how often it has been polled.
struct ChannelSource {
    events: mpsc::UnboundedReceiver<BusEvent>,
    polls: mpsc::UnboundedSender<usize>,
    count: usize,
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Result<Option<BusEvent>, DaemonError> {
        self.count += 1;
        let _ = self.polls.send(self.count);
        Ok(self.events.recv().await)
    }
}

fn channel_source() -> (
    ChannelSource,
    mpsc::UnboundedSender<BusEvent>,
    mpsc::UnboundedReceiver<usize>,
) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (polls, polls_rx) = mpsc::unbounded_channel();
    (
        ChannelSource {
            events,
            polls,
            count: 0,
        },
        events_tx,
        polls_rx,
    )
}

fn filter() -> EventFilter {
    EventFilter::new(
        r"group\.member\.sponsor",
        r"user\.update",
        ["packagers"],
        ["ssh_key", "password", "human_name"],
    )
    .unwrap()
}

fn key_change() -> BusEvent {
    BusEvent {
        topic: "fas.user.update".to_string(),
        msg: json!({"user": "alice", "fields": ["ssh_key"]}),
    }
}

async fn wait_for_poll(polls: &mut mpsc::UnboundedReceiver<usize>, n: usize) {
    while let Some(count) = polls.recv().await {
        if count >= n {
            return;
        }
    }
    panic!("source closed before poll {n}");
}

#[tokio::test]
async fn test_triggers_during_resync_coalesce_into_one() {
    let (resync, mut started) = gated();
    let (source, events, mut polls) = channel_source();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let daemon = Daemon::new(resync.clone(), filter(), Duration::from_secs(5));

    let handle = tokio::spawn(async move {
        daemon
            .run(source, async {
                let _ = stop_rx.await;
            })
            .await
    });

    events.send(key_change()).unwrap();
    assert_eq!(started.recv().await, Some(1));

    for _ in 0..3 {
        events.send(key_change()).unwrap();
    }
    // Poll 5 means the fourth event has been handled.
    wait_for_poll(&mut polls, 5).await;

    resync.release.add_permits(1);
    assert_eq!(started.recv().await, Some(2));
    resync.release.add_permits(1);

    stop.send(()).unwrap();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.events, 4);
    assert_eq!(stats.triggers, 4);
    assert_eq!(stats.resyncs, 2);
    assert_eq!(resync.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_irrelevant_events_do_not_resync() {
    let (resync, _started) = gated();
    let (source, events, mut polls) = channel_source();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let daemon = Daemon::new(resync.clone(), filter(), Duration::from_secs(1));

    let handle = tokio::spawn(async move {
        daemon
            .run(source, async {
                let _ = stop_rx.await;
            })
            .await
    });

    events
        .send(BusEvent {
            topic: "fas.group.member.sponsor".to_string(),
            msg: json!({"group": "sysadmin"}),
        })
        .unwrap();
    events
        .send(BusEvent {
            topic: "fas.user.update".to_string(),
            msg: json!({"fields": ["timezone"]}),
        })
        .unwrap();
    wait_for_poll(&mut polls, 3).await;
    stop.send(()).unwrap();

    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.events, 2);
    assert_eq!(stats.triggers, 0);
    assert_eq!(resync.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stream_end_is_error_and_state_reaches_stopped() {
    let (resync, _started) = gated();
    let (source, events, _polls) = channel_source();
    let daemon = Daemon::new(resync, filter(), Duration::from_millis(100));
    let state = daemon.subscribe();
    assert_eq!(*state.borrow(), DaemonState::Idle);
    drop(events);

    let result = daemon.run(source, std::future::pending()).await;

    assert!(matches!(result, Err(DaemonError::StreamEnded)));
    assert_eq!(*state.borrow(), DaemonState::Stopped);
}

#[tokio::test]
async fn test_shutdown_abandons_resync_after_grace_period() {
    let (resync, mut started) = gated();
    let (source, events, _polls) = channel_source();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let daemon = Daemon::new(resync.clone(), filter(), Duration::from_millis(50));

    let handle = tokio::spawn(async move {
        daemon
            .run(source, async {
                let _ = stop_rx.await;
            })
            .await
    });

    events.send(key_change()).unwrap();
    assert_eq!(started.recv().await, Some(1));
    // The resync never gets released.
    stop.send(()).unwrap();

    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.triggers, 1);
    assert_eq!(stats.resyncs, 0);
}

#[tokio::test]
async fn test_line_source_drives_listener() {
    let (resync, mut started) = gated();
    resync.release.add_permits(10);
    let input = b"{\"topic\": \"fas.group.member.sponsor\", \"msg\": {\"group\": \"packagers\"}}\n".to_vec();
    let daemon = Daemon::new(resync.clone(), filter(), Duration::from_secs(5));

    let result = daemon
        .run(LineEventSource::new(&input[..]), std::future::pending())
        .await;

    assert!(matches!(result, Err(DaemonError::StreamEnded)));
    // The worker may or may not have started before the stream ended.
    let _ = started.try_recv();
    assert!(resync.calls.load(Ordering::SeqCst) <= 1);
}
