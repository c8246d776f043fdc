mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{MockTransport, Recorder, context, create_png_bytes, finish, test_config};
use texture_loader::{LoadOutcome, LoadPhase, LoaderContext};

fn url(i: usize) -> String {
    format!("https://cdn.example.com/queue/{}.png", i)
}

#[tokio::test]
async fn queued_loads_run_one_at_a_time_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut transport = MockTransport::new().with_delay(Duration::from_millis(15));
    for i in 1..=3 {
        transport = transport.respond(&url(i), Ok(create_png_bytes(8, 8)));
    }
    let transport = Arc::new(transport);

    let mut config = test_config(&dir);
    config.cache.enabled = false;
    let ctx = LoaderContext::builder(config)
        .transport(transport.clone())
        .build()
        .expect("failed to build loader context");

    let order = Arc::new(Mutex::new(Vec::new()));
    let loaders: Vec<_> = (1..=3)
        .map(|i| {
            let order = Arc::clone(&order);
            ctx.load(url(i))
                .on_complete(move |_| order.lock().expect("order lock").push(i))
        })
        .collect();

    for loader in &loaders {
        loader.start(true);
    }
    assert_eq!(loaders[0].phase(), LoadPhase::Loading);
    assert_eq!(loaders[1].phase(), LoadPhase::Queued);
    assert_eq!(loaders[2].phase(), LoadPhase::Queued);
    assert_eq!(ctx.queue_len(), 2);

    for loader in &loaders {
        assert!(matches!(finish(loader).await, LoadOutcome::Completed(_)));
    }

    assert_eq!(*order.lock().expect("order lock"), vec![1, 2, 3]);
    assert_eq!(transport.max_active(), 1);
    assert_eq!(ctx.queue_len(), 0);
}

#[tokio::test]
async fn canceled_queued_loader_never_starts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(MockTransport::new().hanging());
    let ctx = context(&dir, transport.clone());

    let head = ctx.load(url(1));
    head.start(true);

    let recorder = Arc::new(Recorder::default());
    let waiting = recorder.attach(ctx.load(url(2)));
    waiting.start(true);
    assert_eq!(waiting.phase(), LoadPhase::Queued);

    waiting.cancel();
    assert!(matches!(finish(&waiting).await, LoadOutcome::Canceled));
    assert_eq!(ctx.queue_len(), 0);

    head.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(recorder.starts(), 0);
    assert!(recorder.progress().is_empty());
    assert_eq!(recorder.completes(), 0);
    assert_eq!(recorder.cancels(), 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn failure_advances_queue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(MockTransport::new().respond(&url(2), Ok(create_png_bytes(8, 8))));
    let ctx = context(&dir, transport.clone());

    let failing = ctx.load(url(1));
    let next = ctx.load(url(2));
    failing.start(true);
    next.start(true);

    assert!(matches!(finish(&failing).await, LoadOutcome::Failed(_)));
    assert!(matches!(finish(&next).await, LoadOutcome::Completed(_)));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn canceling_running_head_starts_next() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(
        MockTransport::new()
            .with_delay(Duration::from_millis(10))
            .respond(&url(2), Ok(create_png_bytes(8, 8))),
    );
    let ctx = context(&dir, transport.clone());

    let head = ctx.load(url(1));
    let next = ctx.load(url(2));
    head.start(true);
    next.start(true);
    assert_eq!(next.phase(), LoadPhase::Queued);

    head.cancel();
    assert_eq!(next.phase(), LoadPhase::Loading);
    assert!(matches!(finish(&next).await, LoadOutcome::Completed(_)));
}

#[tokio::test]
async fn start_all_enqueues_every_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut transport = MockTransport::new();
    for i in 1..=3 {
        transport = transport.respond(&url(i), Ok(create_png_bytes(8, 8)));
    }
    let transport = Arc::new(transport);
    let ctx = context(&dir, transport.clone());

    let loaders: Vec<_> = (1..=3).map(|i| ctx.load(url(i))).collect();
    ctx.start_all(true);

    for loader in &loaders {
        assert!(matches!(finish(loader).await, LoadOutcome::Completed(_)));
    }
    assert_eq!(transport.max_active(), 1);
    assert_eq!(transport.calls(), 3);
}
