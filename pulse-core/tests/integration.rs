//! Integration Tests for the Pulse Runtime
//!
//! These tests drive cells, nodes, the scheduler, the offload pool and the
//! windowed list together through the public API.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use pulse_core::{
    Diagnostic, NodeId, PulseError, RenderBackend, Runtime, RuntimeConfig, SchedulerState,
    TemplateId, Tier, WatchDecision, WindowedList, WorkStatus, WriteOutcome,
};

const FRAME: Duration = Duration::from_millis(16);

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for worker");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn log() -> Rc<RefCell<Vec<&'static str>>> {
    Rc::new(RefCell::new(Vec::new()))
}

/// Test that writing an equal value schedules nothing.
#[test]
fn idempotent_write_schedules_nothing() {
    let rt = Runtime::new();
    let title = rt.create_cell(String::from("inbox"));
    let node = rt.create_node(Tier::Visible, move |rt| title.get(rt).map(drop));
    rt.tick(FRAME);

    assert_eq!(title.set(&rt, "inbox".into()).unwrap(), WriteOutcome::Unchanged);
    assert_eq!(rt.scheduler_state(), SchedulerState::Idle);
    assert!(rt.pending_nodes().is_empty());

    let report = rt.tick(FRAME);
    assert_eq!(report.frame, None);
    assert_eq!(rt.node_evaluations(node), Some(1));
}

/// Test that a node stops depending on cells it no longer reads.
#[test]
fn stale_dependencies_are_pruned() {
    let rt = Runtime::new();
    let use_b = rt.create_cell(false);
    let a = rt.create_cell(1);
    let b = rt.create_cell(2);

    let node = rt.create_node(Tier::Visible, move |rt| {
        let _ = if use_b.get(rt)? { b.get(rt)? } else { a.get(rt)? };
        Ok(())
    });
    rt.tick(FRAME);
    assert_eq!(rt.dependencies(node), vec![use_b.id(), a.id()]);

    use_b.set(&rt, true).unwrap();
    rt.tick(FRAME);
    assert_eq!(rt.dependencies(node), vec![use_b.id(), b.id()]);

    // The old branch no longer schedules the node
    assert_eq!(a.set(&rt, 10).unwrap(), WriteOutcome::Changed { marked: 0 });
    assert_eq!(b.set(&rt, 20).unwrap(), WriteOutcome::Changed { marked: 1 });

    let diagnostics = rt.take_diagnostics();
    assert!(diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::StaleEdge(warning) if warning.node == node && warning.dropped == vec![a.id()]
    )));
}

/// Test that many writes before a tick collapse into one evaluation.
#[test]
fn writes_coalesce_into_one_evaluation() {
    let rt = Runtime::new();
    let count = rt.create_cell(0);
    let node = rt.create_node(Tier::Visible, move |rt| count.get(rt).map(drop));
    rt.tick(FRAME);

    for i in 1..=100 {
        count.set(&rt, i).unwrap();
    }
    assert_eq!(rt.pending_nodes(), vec![node]);

    let report = rt.tick(FRAME);
    assert_eq!(report.evaluated, 1);
    assert_eq!(rt.node_evaluations(node), Some(2));
}

/// Test that visible nodes flush before off-screen and background ones.
#[test]
fn flush_follows_priority_tiers() {
    let rt = Runtime::new();
    let source = rt.create_cell(0);
    let order = log();

    for (tier, label) in [
        (Tier::Background, "background"),
        (Tier::OffScreen, "offscreen"),
        (Tier::Visible, "visible"),
    ] {
        let order = Rc::clone(&order);
        rt.create_node(tier, move |rt| {
            source.get(rt)?;
            order.borrow_mut().push(label);
            Ok(())
        });
    }

    rt.tick(FRAME);
    assert_eq!(*order.borrow(), vec!["visible", "offscreen", "background"]);

    order.borrow_mut().clear();
    source.set(&rt, 1).unwrap();
    rt.tick(FRAME);
    assert_eq!(*order.borrow(), vec!["visible", "offscreen", "background"]);
}

/// Test that an exhausted budget rolls remaining nodes into later ticks.
#[test]
fn exhausted_budget_rolls_over() {
    let rt = Runtime::new();
    let nodes: Vec<NodeId> = (0..3)
        .map(|_| rt.create_node(Tier::Visible, |_| Ok(())))
        .collect();

    let first = rt.tick(Duration::ZERO);
    assert_eq!(first.evaluated, 1);
    assert_eq!(first.rolled_over, 2);
    assert!(first.budget_exhausted);
    assert_eq!(first.state, SchedulerState::Batching);
    assert_eq!(rt.pending_nodes(), nodes[1..].to_vec());

    let second = rt.tick(Duration::ZERO);
    assert_eq!(second.evaluated, 1);
    assert_eq!(second.rolled_over, 1);

    let third = rt.tick(Duration::ZERO);
    assert_eq!(third.evaluated, 1);
    assert_eq!(third.rolled_over, 0);
    assert!(!third.budget_exhausted);
    assert_eq!(third.state, SchedulerState::Idle);
}

/// Test that offloaded work never blocks ticks and lands as a write.
#[test]
fn offloaded_work_lands_as_a_write() {
    let rt = Runtime::new();
    let result = rt.create_cell(0u64);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&seen);
    rt.create_node(Tier::Visible, move |rt| {
        sink.borrow_mut().push(result.get(rt)?);
        Ok(())
    });
    rt.tick(FRAME);

    let (release, gate) = mpsc::channel::<()>();
    let handle = rt
        .submit(
            Tier::Background,
            20u64,
            move |n| {
                gate.recv().ok();
                (1..=n).product::<u64>() % 1_000_007
            },
            result,
        )
        .unwrap();

    // The worker is parked on the gate; the runtime thread keeps ticking
    let started = Instant::now();
    let report = rt.tick(FRAME);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.completions, 0);
    assert_eq!(result.peek(&rt).unwrap(), 0);

    release.send(()).unwrap();
    let mut report = rt.tick(FRAME);
    let deadline = Instant::now() + Duration::from_secs(5);
    while report.completions == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
        report = rt.tick(FRAME);
    }

    let expected = (1..=20u64).product::<u64>() % 1_000_007;
    assert_eq!(report.completions, 1);
    assert_eq!(report.evaluated, 1);
    assert_eq!(result.peek(&rt).unwrap(), expected);
    assert_eq!(*seen.borrow(), vec![0, expected]);
    assert_eq!(handle.status(), WorkStatus::Delivered);
}

/// Test that cancelling running work suppresses its write.
#[test]
fn cancelled_work_never_writes() {
    let rt = Runtime::new();
    let target = rt.create_cell(String::from("idle"));

    let (release, gate) = mpsc::channel::<()>();
    let handle = rt
        .submit(
            Tier::Visible,
            (),
            move |()| {
                gate.recv().ok();
                String::from("computed")
            },
            target,
        )
        .unwrap();

    wait_until(|| handle.status() == WorkStatus::Running);
    assert!(handle.cancel());
    release.send(()).unwrap();
    wait_until(|| handle.status().is_finished());

    let report = rt.tick(FRAME);
    assert_eq!(report.completions, 0);
    assert_eq!(handle.status(), WorkStatus::Cancelled);
    assert_eq!(target.peek(&rt).unwrap(), "idle");
}

/// Test that re-entering a node's own evaluation fails and keeps its edges.
#[test]
fn reentrant_track_is_refused() {
    let rt = Runtime::new();
    let a = rt.create_cell(1);
    let reenter = rt.create_cell(false);
    let b = rt.create_cell(2);

    let node = rt.create_node(Tier::Visible, move |rt| {
        a.get(rt)?;
        if reenter.get(rt)? {
            let me = rt
                .current_node()
                .ok_or_else(|| PulseError::evaluation("not tracking"))?;
            rt.track(me, |rt| b.get(rt).map(drop))?;
        }
        Ok(())
    });
    rt.tick(FRAME);
    let edges = rt.dependencies(node);

    reenter.set(&rt, true).unwrap();
    let report = rt.tick(FRAME);

    assert_eq!(report.failed, 1);
    assert_eq!(report.errors, vec![PulseError::CyclicEvaluation { node }]);
    assert_eq!(rt.dependencies(node), edges);
    assert!(!rt.dependents(b.id()).contains(&node));
}

/// Test that a self-sustaining node is suspended and can be reset.
#[test]
fn render_loop_suspends_node() {
    let config = RuntimeConfig::from_json(r#"{ "scheduler": { "loop_threshold": 3 } }"#).unwrap();
    let rt = Runtime::with_config(config).unwrap();
    let counter = rt.create_cell(0u32);
    let node = rt.create_node(Tier::Visible, move |rt| {
        let value = counter.get(rt)?;
        counter.set(rt, value + 1)?;
        Ok(())
    });
    rt.tick(FRAME);

    counter.set(&rt, 100).unwrap();
    let mut errors = Vec::new();
    for _ in 0..10 {
        errors.extend(rt.tick(FRAME).errors);
    }

    assert_eq!(errors, vec![PulseError::RenderLoop { node, batches: 4 }]);
    assert!(rt.is_suspended(node));
    assert_eq!(rt.scheduler_state(), SchedulerState::Idle);
    assert_eq!(counter.set(&rt, 0).unwrap(), WriteOutcome::Changed { marked: 0 });

    rt.reset_node(node).unwrap();
    assert!(!rt.is_suspended(node));
    assert_eq!(rt.pending_nodes(), vec![node]);
}

/// Test that a chain of distinct nodes longer than the loop threshold
/// propagates to its end.
#[test]
fn long_chain_is_not_a_render_loop() {
    let config = RuntimeConfig::from_json(r#"{ "scheduler": { "loop_threshold": 3 } }"#).unwrap();
    let rt = Runtime::with_config(config).unwrap();
    let cells: Vec<_> = (0..7).map(|_| rt.create_cell(0u32)).collect();
    let nodes: Vec<_> = cells
        .windows(2)
        .map(|pair| {
            let (from, to) = (pair[0], pair[1]);
            rt.create_node(Tier::Visible, move |rt| {
                to.set(rt, from.get(rt)?)?;
                Ok(())
            })
        })
        .collect();
    rt.tick(FRAME);

    cells[0].set(&rt, 1).unwrap();
    let mut errors = Vec::new();
    for _ in 0..10 {
        errors.extend(rt.tick(FRAME).errors);
    }

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(cells[6].peek(&rt).unwrap(), 1);
    assert!(nodes.iter().all(|node| !rt.is_suspended(*node)));
}

/// Test that a watcher can veto propagation without losing the value.
#[test]
fn watcher_can_suppress_propagation() {
    let rt = Runtime::new();
    let temperature = rt.create_cell(20i32);
    rt.create_node(Tier::Visible, move |rt| temperature.get(rt).map(drop));
    rt.tick(FRAME);

    rt.watch(temperature, |_old: &i32, new: &i32| {
        if *new < -273 {
            WatchDecision::Suppress
        } else {
            WatchDecision::Propagate
        }
    })
    .unwrap();

    assert_eq!(temperature.set(&rt, -300).unwrap(), WriteOutcome::Suppressed);
    assert_eq!(temperature.peek(&rt).unwrap(), -300);
    assert!(rt.pending_nodes().is_empty());

    assert_eq!(
        temperature.set(&rt, 25).unwrap(),
        WriteOutcome::Changed { marked: 1 }
    );
}

/// Test that a shared cell outlives one of its sharing scopes.
#[test]
fn shared_cell_lives_in_common_scope() {
    let rt = Runtime::new();
    let parent = rt.create_scope();
    let left = rt.create_child_scope(parent).unwrap();
    let right = rt.create_child_scope(parent).unwrap();

    let shared = rt.create_shared_cell(left, right, 0).unwrap();
    assert_eq!(rt.nearest_common_scope(left, right), Some(parent));
    assert_eq!(rt.cell_scope(shared), Some(parent));

    rt.create_node_in(left, Tier::Visible, move |rt| shared.get(rt).map(drop))
        .unwrap();
    let reader = rt
        .create_node_in(right, Tier::Visible, move |rt| shared.get(rt).map(drop))
        .unwrap();
    rt.tick(FRAME);

    rt.dispose_scope(left).unwrap();
    assert_eq!(shared.set(&rt, 1).unwrap(), WriteOutcome::Changed { marked: 1 });
    assert_eq!(rt.pending_nodes(), vec![reader]);

    rt.dispose_scope(parent).unwrap();
    assert_eq!(shared.get(&rt), Err(PulseError::UnknownCell(shared.id())));
}

/// Test that loaders on other threads can write through a remote writer.
#[test]
fn remote_writer_delivers_on_next_tick() {
    let rt = Runtime::new();
    let status = rt.create_cell("loading");
    let writer = rt.remote_writer(status);

    std::thread::spawn(move || {
        assert!(writer.write("ready"));
    })
    .join()
    .unwrap();

    assert_eq!(status.peek(&rt).unwrap(), "loading");
    let report = rt.tick(FRAME);
    assert_eq!(report.completions, 1);
    assert_eq!(status.peek(&rt).unwrap(), "ready");
}

/// Test that completions can be awaited instead of polled.
#[tokio::test]
async fn completion_can_be_awaited() {
    let rt = Runtime::new();
    let total = rt.create_cell(0usize);

    rt.submit(Tier::Visible, vec![1usize, 2, 3, 4], |v| v.iter().sum(), total)
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), rt.next_completion())
        .await
        .expect("completion in time");
    assert_eq!(outcome, Some(Ok(WriteOutcome::Changed { marked: 0 })));
    assert_eq!(total.peek(&rt).unwrap(), 10);
}

/// Test that abandoning a wait for completions does not lose later ones.
#[tokio::test]
async fn abandoned_wait_keeps_completions_flowing() {
    let rt = Runtime::new();
    let total = rt.create_cell(0usize);
    let label = rt.create_cell(0u32);

    let idle = tokio::time::timeout(Duration::from_millis(20), rt.next_completion()).await;
    assert!(idle.is_err());

    let handle = rt
        .submit(Tier::Visible, vec![1usize, 2, 3, 4], |v| v.iter().sum(), total)
        .unwrap();
    assert!(rt.remote_writer(label).write(7));

    for _ in 0..2 {
        let outcome = tokio::time::timeout(Duration::from_secs(5), rt.next_completion())
            .await
            .expect("completion in time");
        assert!(matches!(outcome, Some(Ok(_))));
    }
    assert_eq!(total.peek(&rt).unwrap(), 10);
    assert_eq!(label.peek(&rt).unwrap(), 7);
    assert_eq!(handle.status(), WorkStatus::Delivered);
}

#[derive(Default)]
struct CountingBackend {
    materialized: usize,
    rebound: usize,
    rendered: usize,
}

impl RenderBackend<String> for CountingBackend {
    type Handle = TemplateId;

    fn materialize(&mut self, _node: NodeId, template: TemplateId) -> TemplateId {
        self.materialized += 1;
        template
    }

    fn rebind(&mut self, handle: &mut TemplateId, _node: NodeId) {
        self.rebound += 1;
        let _ = handle;
    }

    fn render(&mut self, _handle: &mut TemplateId, _index: usize, _item: &String) {
        self.rendered += 1;
    }

    fn dispose(&mut self, _handle: TemplateId) {}
}

/// Test the thousand-row scroll scenario end to end.
#[test]
fn windowed_list_scroll_scenario() {
    let rt = Runtime::new();
    let items: Vec<String> = (0..1000).map(|i| format!("row {i}")).collect();
    let mut list = WindowedList::new(&rt, CountingBackend::default(), items)
        .with_overscan(5)
        .with_templates(|index, _| TemplateId((index % 2) as u32));

    let delta = list.set_visible(0..20).unwrap();
    assert_eq!(delta.materialized, 25);
    assert_eq!(rt.node_count(), 25);
    rt.tick(FRAME);
    assert_eq!(list.backend().rendered, 25);

    let first_rows: Vec<NodeId> = (0..25).filter_map(|i| list.row_node(i)).collect();
    let delta = list.set_visible(500..520).unwrap();

    assert_eq!(delta.torn_down, 25);
    assert_eq!(delta.rebound, 25);
    assert_eq!(list.backend().materialized, 25 + delta.materialized);
    assert_eq!(list.mounted_range(), 495..525);
    assert!(first_rows.iter().all(|node| rt.node_version(*node).is_none()));

    let report = rt.tick(Duration::from_secs(5));
    assert_eq!(report.evaluated, 30);
    assert_eq!(list.backend().rendered, 55);
}
