// tests/property_invariants.rs

use std::collections::HashMap;

use proptest::prelude::*;

use borgjobs::engine::{QueueEntry, QueueManager};
use borgjobs::job::{Job, JobStatus, Task, TaskDefinition, TaskKind, TaskStatus};
use borgjobs::output::{OutputManager, StreamKind};
use borgjobs::types::Priority;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Enqueue(Priority),
    /// Release the n-th running job (modulo the running count).
    Release(usize),
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => priority().prop_map(Op::Enqueue),
        2 => any::<usize>().prop_map(Op::Release),
    ]
}

fn check_task(continue_on_error: Option<bool>) -> Task {
    let mut def = TaskDefinition::new(TaskKind::Check);
    if let Some(keep_going) = continue_on_error {
        def = def.continue_on_error(keep_going);
    }
    Task::from_definition(0, &def)
}

const JOB_STATUSES: [JobStatus; 7] = [
    JobStatus::Pending,
    JobStatus::Queued,
    JobStatus::Running,
    JobStatus::Completed,
    JobStatus::PartialSuccess,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

const TASK_STATUSES: [TaskStatus; 5] = [
    TaskStatus::Pending,
    TaskStatus::Running,
    TaskStatus::Succeeded,
    TaskStatus::Failed,
    TaskStatus::Skipped,
];

proptest! {
    #[test]
    fn queue_never_exceeds_limit_and_admits_by_priority(
        limit in 1usize..4,
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        // Threshold out of reach: pure priority + FIFO ordering.
        let queue = QueueManager::new(limit, u32::MAX);
        queue.open();

        let mut priorities: HashMap<Uuid, Priority> = HashMap::new();
        let mut waiting: Vec<Uuid> = Vec::new();
        let mut running: Vec<Uuid> = Vec::new();

        for op in ops {
            let admitted = match op {
                Op::Enqueue(p) => {
                    let id = Uuid::new_v4();
                    priorities.insert(id, p);
                    waiting.push(id);
                    queue.enqueue(QueueEntry::new(id, p))
                }
                Op::Release(n) if !running.is_empty() => {
                    let id = running.remove(n % running.len());
                    queue.release(id)
                }
                Op::Release(_) => Vec::new(),
            };

            for id in admitted {
                let best = waiting.iter().map(|w| priorities[w]).max();
                prop_assert_eq!(Some(priorities[&id]), best);
                // FIFO among equals: nothing of the same priority was waiting
                // longer.
                let pos = waiting.iter().position(|w| *w == id);
                prop_assert!(pos.is_some());
                let pos = pos.unwrap_or_default();
                prop_assert!(waiting[..pos].iter().all(|w| priorities[w] < priorities[&id]));
                waiting.remove(pos);
                running.push(id);
            }

            let stats = queue.stats();
            prop_assert!(stats.running <= limit);
            prop_assert_eq!(stats.running, running.len());
            prop_assert_eq!(stats.queued, waiting.len());
            // Work-conserving: a free slot never sits next to a waiting job.
            prop_assert!(waiting.is_empty() || stats.running == limit);
        }
    }

    #[test]
    fn starved_jobs_are_admitted_within_the_threshold(
        threshold in 1u32..5,
        highs in 1usize..12,
    ) {
        let queue = QueueManager::new(1, threshold);
        queue.open();

        let blocker = Uuid::new_v4();
        queue.enqueue(QueueEntry::new(blocker, Priority::Normal));
        let low = Uuid::new_v4();
        queue.enqueue(QueueEntry::new(low, Priority::Low));
        for _ in 0..highs {
            queue.enqueue(QueueEntry::new(Uuid::new_v4(), Priority::Critical));
        }

        let mut current = blocker;
        let mut overtaken = 0u32;
        loop {
            let admitted = queue.release(current);
            prop_assert_eq!(admitted.len(), 1);
            current = admitted[0];
            if current == low {
                break;
            }
            overtaken += 1;
        }
        prop_assert!(overtaken <= threshold);
        prop_assert_eq!(overtaken, threshold.min(highs as u32));
    }

    #[test]
    fn output_sequences_are_gapless_and_text_is_preserved(
        chunks in proptest::collection::vec(
            proptest::collection::vec(prop_oneof![Just(b'\n'), Just(b'a'), Just(b'z')], 0..40),
            1..30,
        ),
    ) {
        let output = OutputManager::new(100_000);
        let job = Uuid::new_v4();
        output.register(job);

        let mut all = Vec::new();
        for chunk in &chunks {
            output.push_chunk(job, 0, StreamKind::Stdout, chunk);
            all.extend_from_slice(chunk);
        }
        output.finish_job(job);

        let snapshot = output.snapshot(job).expect("registered");
        let seqs: Vec<u64> = snapshot.lines.iter().map(|l| l.sequence).collect();
        let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
        prop_assert_eq!(seqs, expected);

        let text = String::from_utf8(all).expect("ascii input");
        let mut want: Vec<&str> = text.split('\n').collect();
        if want.last() == Some(&"") {
            want.pop();
        }
        let got: Vec<&str> = snapshot.lines.iter().map(|l| l.text.as_str()).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn terminal_statuses_never_move(from in 0usize..7, to in 0usize..7) {
        let (from, to) = (JOB_STATUSES[from], JOB_STATUSES[to]);
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
        prop_assert!(!from.can_transition_to(from));
    }

    #[test]
    fn task_statuses_only_move_forward(from in 0usize..5, to in 0usize..5) {
        let (from, to) = (TASK_STATUSES[from], TASK_STATUSES[to]);
        if from.can_transition_to(to) {
            prop_assert!(!to.can_transition_to(from));
        }
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    #[test]
    fn explicit_override_always_decides_abort(
        keep_going in any::<bool>(),
        default_continue in any::<bool>(),
        critical in any::<bool>(),
    ) {
        let task = check_task(Some(keep_going));
        prop_assert_eq!(Job::aborts_on_failure(&task, default_continue, critical), !keep_going);
    }

    #[test]
    fn critical_tasks_abort_unless_told_otherwise(default_continue in any::<bool>()) {
        let task = check_task(None);
        prop_assert!(Job::aborts_on_failure(&task, default_continue, true));
        prop_assert_eq!(Job::aborts_on_failure(&task, default_continue, false), !default_continue);
    }
}
