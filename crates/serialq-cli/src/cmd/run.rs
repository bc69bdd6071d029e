use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serialq_core::{Action, Priority, Queue, QueueConfig, QueueStats, ShutdownPolicy};

use crate::output::{print_json, print_table};
use crate::plan::{JobAction, Plan, RunLog};

#[derive(Debug, Serialize)]
struct JobReport {
    label: String,
    priority: Priority,
    status: &'static str,
    /// 1-based position in execution order; `None` if the job never ran.
    position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    queue: String,
    debug: bool,
    order: Vec<String>,
    jobs: Vec<JobReport>,
    stats: QueueStats,
}

/// Submit every job in the plan while dispatch is held, then drain the queue.
/// Holding dispatch makes the priority order of the whole plan observable.
pub fn run(plan_path: &Path, mut config: QueueConfig, debug: bool, json: bool) -> anyhow::Result<()> {
    let plan = Plan::load(plan_path)?;
    config.debug |= debug;
    config.start_paused = true;

    let queue = Queue::with_config(config).context("failed to start queue")?;
    let log = RunLog::default();

    let mut submitted = Vec::with_capacity(plan.jobs.len());
    for (index, spec) in plan.jobs.into_iter().enumerate() {
        let action = Action::new(JobAction::new(index, spec.clone(), Arc::clone(&log)));
        queue
            .add_with_priority(&action, spec.priority)
            .with_context(|| format!("failed to submit job '{}'", spec.label))?;
        if spec.kill {
            action.kill();
        }
        submitted.push((spec, action));
    }
    tracing::info!(queue = %queue.name(), jobs = submitted.len(), "plan submitted");

    queue.resume();
    queue.shutdown_with(ShutdownPolicy::Drain);

    let ran = log.lock().clone();
    let order: Vec<String> = ran.iter().map(|&i| submitted[i].0.label.clone()).collect();
    let jobs: Vec<JobReport> = submitted
        .iter()
        .enumerate()
        .map(|(index, (spec, action))| {
            let position = ran.iter().position(|&i| i == index).map(|p| p + 1);
            let (status, detail) = if action.is_killed() {
                ("killed", None)
            } else if let Some(failure) = action.failure_message() {
                let status = if action.take_failure().is_some_and(|f| f.is_fault()) {
                    "panicked"
                } else {
                    "failed"
                };
                (status, Some(failure))
            } else if let Some(ms) = action.take_result() {
                ("ok", Some(format!("{ms}ms")))
            } else {
                ("handled", None)
            };
            JobReport {
                label: spec.label.clone(),
                priority: spec.priority,
                status,
                position,
                detail,
            }
        })
        .collect();

    let report = RunReport {
        queue: queue.name().to_string(),
        debug: queue.is_debug(),
        order,
        jobs,
        stats: queue.stats(),
    };

    if json {
        print_json(&report)?;
        return Ok(());
    }

    let mut rows: Vec<Vec<String>> = report
        .jobs
        .iter()
        .map(|j| {
            vec![
                j.position.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                j.label.clone(),
                j.priority.to_string(),
                j.status.to_string(),
                j.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    rows.sort_by_key(|r| r[0].parse::<usize>().unwrap_or(usize::MAX));
    print_table(&["#", "JOB", "PRIORITY", "STATUS", "DETAIL"], rows);
    println!();
    println!("Execution order: {}", report.order.join(" -> "));
    let s = report.stats;
    println!(
        "submitted={} executed={} failed={} handled={} skipped={}",
        s.submitted, s.executed, s.failed, s.handled, s.skipped
    );
    Ok(())
}
