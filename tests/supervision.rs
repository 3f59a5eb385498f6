use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use chanvisor::{
    ChildSpec, ChildState, EventKind, RestartStrategy, RuntimeConfig, RuntimeContext, SharedState,
    Supervisor, SupervisorConfig, SupervisorError, TaskError, TaskFn,
};

/// Child that runs until cancelled or until its kill switch fires.
fn killable(name: &'static str, kill: Arc<Notify>) -> ChildSpec {
    ChildSpec::new(TaskFn::with_args(
        name,
        kill,
        |kill: Arc<Notify>, ctx: CancellationToken| async move {
            tokio::select! {
                _ = ctx.cancelled() => Ok(()),
                _ = kill.notified() => Err(TaskError::fail("killed")),
            }
        },
    ))
}

async fn until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[derive(Default)]
struct Counted {
    inits: AtomicUsize,
    cleanups: AtomicUsize,
}

#[async_trait]
impl SharedState for Counted {
    async fn init(&self) -> Result<(), TaskError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn one_for_one_restarts_only_the_failed_child() {
    let sup = Supervisor::builder("o4o", SupervisorConfig::default()).build();
    let kills: Vec<Arc<Notify>> = (0..3).map(|_| Arc::new(Notify::new())).collect();
    for (name, kill) in ["a", "b", "c"].into_iter().zip(&kills) {
        sup.register(killable(name, kill.clone())).unwrap();
    }
    sup.start().await.unwrap();

    let before = sup.children();
    kills[1].notify_one();
    until(|| sup.children()[1].restarts == 1).await;
    let after = sup.children();

    assert_eq!(after[0].handle, before[0].handle);
    assert_eq!(after[2].handle, before[2].handle);
    assert_ne!(after[1].handle, before[1].handle);
    assert_eq!(after[1].state, ChildState::Running);
    assert_eq!(after[0].restarts + after[2].restarts, 0);

    sup.stop().await.unwrap();
    assert!(sup.children().iter().all(|c| c.state == ChildState::Stopped));
}

#[tokio::test]
async fn one_for_all_restarts_every_child_in_start_order_without_touching_shared_state() {
    let ctx = RuntimeContext::builder(RuntimeConfig::default()).build();
    let mut events = ctx.bus().subscribe();
    let shared = Arc::new(Counted::default());
    let cfg = SupervisorConfig {
        strategy: RestartStrategy::OneForAll,
        ..SupervisorConfig::default()
    };
    let sup = Supervisor::builder("o4a", cfg)
        .with_bus(ctx.bus().clone())
        .with_shared_state(shared.clone())
        .build();

    let kills: Vec<Arc<Notify>> = (0..3).map(|_| Arc::new(Notify::new())).collect();
    for (name, kill) in ["first", "second", "third"].into_iter().zip(&kills) {
        sup.register(killable(name, kill.clone())).unwrap();
    }
    sup.start().await.unwrap();
    let before = sup.children();

    kills[2].notify_one();
    until(|| sup.children().iter().all(|c| c.restarts == 1)).await;
    let after = sup.children();
    for (b, a) in before.iter().zip(&after) {
        assert_ne!(a.handle, b.handle);
        assert_eq!(a.state, ChildState::Running);
    }
    assert_eq!(shared.inits.load(Ordering::SeqCst), 1);
    assert_eq!(shared.cleanups.load(Ordering::SeqCst), 0);

    sup.stop().await.unwrap();
    assert_eq!(shared.inits.load(Ordering::SeqCst), 1);
    assert_eq!(shared.cleanups.load(Ordering::SeqCst), 1);

    let mut restarted = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::ChildRestarted {
            restarted.push(ev.child.unwrap().to_string());
        }
    }
    assert_eq!(restarted, ["first", "second", "third"]);
}

#[tokio::test]
async fn rest_for_one_restarts_the_failed_child_and_those_started_after_it() {
    let ctx = RuntimeContext::builder(RuntimeConfig::default()).build();
    let mut events = ctx.bus().subscribe();
    let cfg = SupervisorConfig {
        strategy: RestartStrategy::RestForOne,
        ..SupervisorConfig::default()
    };
    let sup = Supervisor::builder("r4o", cfg)
        .with_bus(ctx.bus().clone())
        .build();

    let kills: Vec<Arc<Notify>> = (0..3).map(|_| Arc::new(Notify::new())).collect();
    for (name, kill) in ["a", "b", "c"].into_iter().zip(&kills) {
        sup.register(killable(name, kill.clone())).unwrap();
    }
    sup.start().await.unwrap();
    while events.try_recv().is_ok() {}
    let before = sup.children();

    kills[1].notify_one();
    until(|| sup.children()[1].restarts == 1 && sup.children()[2].restarts == 1).await;
    let after = sup.children();

    assert_eq!(after[0].handle, before[0].handle);
    assert_eq!(after[0].restarts, 0);
    assert_ne!(after[1].handle, before[1].handle);
    assert_ne!(after[2].handle, before[2].handle);
    assert!(after.iter().all(|c| c.state == ChildState::Running));

    let mut seen = Vec::new();
    while let Ok(ev) = events.try_recv() {
        let child = ev.child.as_deref().unwrap_or_default().to_string();
        match ev.kind {
            EventKind::ChildExited => seen.push(format!("exited:{child}")),
            EventKind::ChildRestarted => seen.push(format!("restarted:{child}")),
            _ => {}
        }
    }
    assert_eq!(
        seen,
        ["exited:b", "exited:c", "restarted:b", "restarted:c"],
        "c is stopped before b comes back, and b restarts before c"
    );

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn fourth_failure_in_window_escalates_and_stops_the_tree() {
    let cfg = SupervisorConfig {
        max_restarts: 3,
        window: Duration::from_secs(60),
        ..SupervisorConfig::default()
    };
    let sup = Supervisor::builder("intensity", cfg).build();
    let runs = Arc::new(AtomicUsize::new(0));
    sup.register(ChildSpec::new(TaskFn::with_args(
        "crasher",
        runs.clone(),
        |runs: Arc<AtomicUsize>, _ctx: CancellationToken| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::fail("crash"))
        },
    )))
    .unwrap();
    let bystander = Arc::new(Notify::new());
    sup.register(killable("bystander", bystander)).unwrap();

    sup.start().await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(10), sup.wait())
        .await
        .expect("tree stops on its own");

    assert!(matches!(
        outcome,
        Err(SupervisorError::RestartIntensityExceeded {
            restarts: 4,
            max_restarts: 3,
            ..
        })
    ));
    assert_eq!(runs.load(Ordering::SeqCst), 4);
    let children = sup.children();
    assert_eq!(children[0].state, ChildState::PermanentlyFailed);
    assert_eq!(children[1].state, ChildState::Stopped);
    assert!(!sup.is_running());
}

#[tokio::test]
async fn nested_supervisor_runs_as_a_child() {
    let inner = Supervisor::builder("inner", SupervisorConfig::default()).build();
    let kill = Arc::new(Notify::new());
    inner.register(killable("leaf", kill)).unwrap();

    let outer = Supervisor::builder("outer", SupervisorConfig::default()).build();
    outer.register(ChildSpec::new(inner.clone().into_task())).unwrap();
    outer.start().await.unwrap();

    until(|| inner.is_running()).await;
    outer.stop().await.unwrap();
    assert!(!inner.is_running());
}
