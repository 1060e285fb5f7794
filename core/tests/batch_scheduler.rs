mod common;

use std::collections::HashMap;

use common::*;
use genbatch_core::batch::{views, BatchEvent, BatchScheduler, TaskId, TaskStatus};
use genbatch_core::config::BatchConfig;
use genbatch_core::notify::Notifier;
use genbatch_core::schema::{PromptVariable, VarType};
use genbatch_core::session::CompletionPayload;
use pretty_assertions::assert_eq;
use serde_json::json;

fn scheduler(concurrency: usize) -> BatchScheduler {
    let config = BatchConfig {
        concurrency,
        ..BatchConfig::default()
    };
    BatchScheduler::new(&config, Notifier::new(16))
}

fn running_ids(scheduler: &BatchScheduler) -> Vec<TaskId> {
    views::running(&scheduler.tasks()).iter().map(|t| t.id).collect()
}

#[derive(Clone, Copy, Debug)]
enum Order {
    Fifo,
    Lifo,
}

/// Complete tasks one at a time in the given order, checking the window
/// after every step. Returns how many completions it took.
fn run_to_end(scheduler: &BatchScheduler, order: Order) -> usize {
    let window = scheduler.window();
    let mut steps = 0;
    loop {
        let running = running_ids(scheduler);
        assert!(
            running.len() <= window,
            "{} running with window {window}",
            running.len()
        );
        let next = match order {
            Order::Fifo => running.first(),
            Order::Lifo => running.last(),
        };
        let Some(&task_id) = next else { break };
        scheduler.handle_completed(CompletionPayload::from("ok"), task_id, task_id % 3 != 0);
        steps += 1;
    }
    steps
}

#[test]
fn test_running_never_exceeds_window_and_all_tasks_finish() {
    for total in 1..=23usize {
        for window in 1..=6usize {
            for order in [Order::Fifo, Order::Lifo] {
                let scheduler = scheduler(window);
                let started = scheduler
                    .try_start_batch_run(&question_grid(total), &question_schema())
                    .unwrap();
                assert_eq!(started.len(), total.min(window), "total={total} window={window}");

                let steps = run_to_end(&scheduler, order);

                let tasks = scheduler.tasks();
                assert_eq!(steps, total, "total={total} window={window} order={order:?}");
                assert!(
                    tasks.iter().all(|t| t.status.is_terminal()),
                    "total={total} window={window} order={order:?}"
                );
                assert!(scheduler.all_tasks_run());
                assert_eq!(
                    views::failed(&tasks).len(),
                    (1..=total as TaskId).filter(|id| id % 3 == 0).count()
                );
            }
        }
    }
}

fn promoted_ids(events: &mut tokio::sync::broadcast::Receiver<BatchEvent>) -> Vec<TaskId> {
    let mut promoted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::TaskPromoted { task_id } = event {
            promoted.push(task_id);
        }
    }
    promoted
}

#[test]
fn test_retry_while_tasks_pending_keeps_window() {
    let scheduler = scheduler(2);
    let mut events = scheduler.subscribe();
    scheduler
        .try_start_batch_run(&question_grid(8), &question_schema())
        .unwrap();

    scheduler.handle_completed(CompletionPayload::from(""), 1, false);
    assert_eq!(scheduler.handle_completed(CompletionPayload::from(""), 2, false), vec![3, 4]);
    scheduler.handle_completed(CompletionPayload::from(""), 3, false);
    assert_eq!(scheduler.handle_completed(CompletionPayload::from(""), 4, false), vec![5, 6]);

    assert!(scheduler.begin_retry_all().is_empty());
    assert_eq!(running_ids(&scheduler), vec![5, 6]);
    assert_eq!(scheduler.queued_retries(), vec![1, 2, 3, 4]);

    // Queued tasks are still failed, so their completions are ignored.
    assert!(scheduler
        .handle_completed(CompletionPayload::from("x"), 1, true)
        .is_empty());
    assert!(scheduler
        .handle_completed(CompletionPayload::from("x"), 2, true)
        .is_empty());
    assert_eq!(running_ids(&scheduler), vec![5, 6]);

    let mut order = Vec::new();
    loop {
        let running = running_ids(&scheduler);
        assert!(running.len() <= 2, "window exceeded: {running:?}");
        let Some(&task_id) = running.first() else { break };
        order.extend(scheduler.handle_completed(CompletionPayload::from("ok"), task_id, true));
    }

    assert_eq!(order, vec![7, 8, 1, 2, 3, 4]);
    assert_eq!(promoted_ids(&mut events), vec![3, 4, 5, 6, 7, 8]);
    assert!(scheduler.queued_retries().is_empty());
    assert!(scheduler
        .tasks()
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
}

#[test]
fn test_mid_batch_retries_never_exceed_window() {
    for total in 1..=15usize {
        for window in 1..=5usize {
            let scheduler = scheduler(window);
            let mut events = scheduler.subscribe();
            scheduler
                .try_start_batch_run(&question_grid(total), &question_schema())
                .unwrap();

            let mut attempts: HashMap<TaskId, usize> = HashMap::new();
            let mut retried_mid_batch = false;
            let mut steps = 0;
            loop {
                let running = running_ids(&scheduler);
                assert!(
                    running.len() <= window,
                    "{} running with window {window}, total {total}",
                    running.len()
                );
                if !retried_mid_batch && steps >= total / 2 {
                    retried_mid_batch = true;
                    scheduler.begin_retry_all();
                    continue;
                }
                let Some(&task_id) = running.first() else {
                    if views::failed(&scheduler.tasks()).is_empty() {
                        break;
                    }
                    assert!(!scheduler.begin_retry_all().is_empty());
                    continue;
                };
                let attempt = attempts.entry(task_id).or_default();
                *attempt += 1;
                let success = task_id % 3 != 0 || *attempt > 1;
                scheduler.handle_completed(CompletionPayload::from("ok"), task_id, success);
                steps += 1;
            }

            let promoted = promoted_ids(&mut events);
            let expected: Vec<TaskId> = (window.min(total) as TaskId + 1..=total as TaskId).collect();
            assert_eq!(promoted, expected, "total={total} window={window}");
            assert!(scheduler
                .tasks()
                .iter()
                .all(|t| t.status == TaskStatus::Completed));
        }
    }
}

#[test]
fn test_promotions_follow_task_order() {
    let scheduler = scheduler(3);
    scheduler
        .try_start_batch_run(&question_grid(8), &question_schema())
        .unwrap();
    let mut events = scheduler.subscribe();

    // Finishing out of order still admits the lowest pending ids.
    assert!(scheduler
        .handle_completed(CompletionPayload::from("c"), 3, true)
        .is_empty());
    assert!(scheduler
        .handle_completed(CompletionPayload::from("a"), 1, true)
        .is_empty());
    assert_eq!(
        scheduler.handle_completed(CompletionPayload::from("b"), 2, true),
        vec![4, 5, 6]
    );
    assert_eq!(running_ids(&scheduler), vec![4, 5, 6]);

    let mut promoted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::TaskPromoted { task_id } = event {
            promoted.push(task_id);
        }
    }
    assert_eq!(promoted, vec![4, 5, 6]);
}

#[test]
fn test_spreadsheet_round_trip() {
    let schema = vec![
        PromptVariable::new("name", "Name", VarType::String).required(),
        PromptVariable::new("age", "Age", VarType::String).max_length(10),
    ];
    let grid: Vec<Vec<String>> = [["Name", "Age"], ["Alice", "30"], ["Bob", ""]]
        .iter()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect();
    let scheduler = scheduler(5);

    assert!(scheduler.start_batch_run(&grid, &schema));
    let tasks = scheduler.tasks();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Running));
    assert_eq!(tasks[0].params.inputs["name"], Some(json!("Alice")));
    assert_eq!(tasks[0].params.inputs["age"], Some(json!("30")));
    assert_eq!(tasks[1].params.inputs["name"], Some(json!("Bob")));
    assert_eq!(tasks[1].params.inputs["age"], Some(json!("")));

    scheduler.handle_completed(CompletionPayload::from("hi"), 1, true);
    scheduler.handle_completed(CompletionPayload::from(""), 2, false);

    assert!(scheduler.all_tasks_run());
    let tasks = scheduler.tasks();
    assert_eq!(views::succeeded(&tasks).len(), 1);
    assert_eq!(views::failed(&tasks).len(), 1);

    let rows = serde_json::to_value(scheduler.export_rows()).unwrap();
    assert_eq!(
        rows,
        json!([
            {"Name": "Alice", "Age": "30", "Result": "hi"},
            {"Name": "Bob", "Age": "", "Result": ""}
        ])
    );
}

#[test]
fn test_new_batch_allowed_once_previous_settles() {
    let scheduler = scheduler(2);
    assert!(scheduler.start_batch_run(&question_grid(2), &question_schema()));
    let first_run = scheduler.run_id();
    assert!(!scheduler.start_batch_run(&question_grid(3), &question_schema()));

    run_to_end(&scheduler, Order::Fifo);

    assert!(scheduler.start_batch_run(&question_grid(3), &question_schema()));
    assert_ne!(scheduler.run_id(), first_run);
    assert_eq!(scheduler.tasks().len(), 3);
    assert_eq!(scheduler.result(1), None);
}
