// tests/output_streaming.rs

use std::sync::Arc;

use futures::StreamExt;

use borgjobs::output::{MAX_PARTIAL_LINE, OutputManager, OutputSink, StreamKind, TailItem};
use borgjobs_test_utils::with_timeout;
use uuid::Uuid;

fn manager(retention: usize) -> (Arc<OutputManager>, Uuid) {
    let output = Arc::new(OutputManager::new(retention));
    let job = Uuid::new_v4();
    output.register(job);
    (output, job)
}

fn texts(output: &OutputManager, job: Uuid) -> Vec<String> {
    output
        .snapshot(job)
        .map(|s| s.lines.into_iter().map(|l| l.text).collect())
        .unwrap_or_default()
}

#[test]
fn lines_are_reassembled_across_chunks() {
    let (output, job) = manager(100);

    assert!(output.push_chunk(job, 0, StreamKind::Stdout, b"hel").is_empty());
    let first = output.push_chunk(job, 0, StreamKind::Stdout, b"lo\nwor");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].text, "hello");
    assert_eq!(first[0].sequence, 1);

    let second = output.push_chunk(job, 0, StreamKind::Stdout, b"ld\n\n");
    let got: Vec<_> = second.iter().map(|l| (l.sequence, l.text.as_str())).collect();
    assert_eq!(got, vec![(2, "world"), (3, "")]);
}

#[test]
fn crlf_endings_are_stripped() {
    let (output, job) = manager(100);
    output.push_chunk(job, 0, StreamKind::Stderr, b"Warning: something\r\nnext\r\n");
    assert_eq!(texts(&output, job), vec!["Warning: something", "next"]);
}

#[test]
fn invalid_utf8_is_replaced_not_rejected() {
    let (output, job) = manager(100);
    output.push_chunk(job, 0, StreamKind::Stdout, b"caf\xe9\n");
    assert_eq!(texts(&output, job), vec!["caf\u{fffd}"]);
}

#[test]
fn partial_lines_are_kept_per_stream_and_flushed_on_finalize() {
    let (output, job) = manager(100);

    output.push_chunk(job, 0, StreamKind::Stdout, b"out-part");
    output.push_chunk(job, 0, StreamKind::Stderr, b"err-part");
    output.push_chunk(job, 0, StreamKind::Stdout, b"-rest");
    assert!(texts(&output, job).is_empty());

    let flushed = output.finalize_task(job, 0);
    let got: Vec<_> = flushed.iter().map(|l| (l.stream, l.text.as_str())).collect();
    assert_eq!(
        got,
        vec![
            (StreamKind::Stdout, "out-part-rest"),
            (StreamKind::Stderr, "err-part"),
        ]
    );
    assert!(output.finalize_task(job, 0).is_empty());
}

#[test]
fn oversized_partial_line_is_split() {
    let (output, job) = manager(100);

    let chunk = vec![b'x'; MAX_PARTIAL_LINE + 10];
    let emitted = output.push_chunk(job, 0, StreamKind::Stdout, &chunk);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].text.len(), MAX_PARTIAL_LINE);

    let rest = output.finalize_task(job, 0);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].text.len(), 10);
}

#[test]
fn sequences_are_gapless_across_tasks_and_streams() {
    let (output, job) = manager(100);

    output.push_chunk(job, 0, StreamKind::Stdout, b"a\n");
    output.push_chunk(job, 0, StreamKind::Stderr, b"b\n");
    output.push_line(job, 1, StreamKind::Stdout, "note");
    output.push_chunk(job, 1, StreamKind::Stdout, b"c\nd\n");

    let snapshot = output.snapshot(job).expect("registered");
    let seqs: Vec<u64> = snapshot.lines.iter().map(|l| l.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert_eq!(snapshot.next_sequence, 6);
    assert_eq!(output.task_lines(job, 1).len(), 3);
}

#[test]
fn ring_keeps_only_the_newest_lines() {
    let (output, job) = manager(3);
    for i in 1..=5 {
        output.push_chunk(job, 0, StreamKind::Stdout, format!("line {i}\n").as_bytes());
    }

    let snapshot = output.snapshot(job).expect("registered");
    let seqs: Vec<u64> = snapshot.lines.iter().map(|l| l.sequence).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
    assert_eq!(snapshot.dropped, 2);

    let tail: Vec<String> = output.tail(job, 2).into_iter().map(|l| l.text).collect();
    assert_eq!(tail, vec!["line 4", "line 5"]);
}

#[test]
fn unknown_jobs_are_ignored() {
    let output = OutputManager::new(10);
    let job = Uuid::new_v4();
    assert!(output.push_chunk(job, 0, StreamKind::Stdout, b"x\n").is_empty());
    assert!(output.push_line(job, 0, StreamKind::Stdout, "x").is_none());
    assert!(output.snapshot(job).is_none());
    assert!(!output.is_registered(job));
}

#[tokio::test]
async fn slow_tail_is_told_how_many_lines_it_missed() {
    let (output, job) = manager(3);
    let mut tail = output.subscribe(job).expect("registered");

    for i in 1..=5 {
        output.push_chunk(job, 0, StreamKind::Stdout, format!("{i}\n").as_bytes());
    }
    output.finish_job(job);

    let mut items = Vec::new();
    while let Some(item) = with_timeout(tail.next()).await {
        items.push(item);
    }

    assert_eq!(items.len(), 4);
    assert_eq!(items[0], TailItem::Missed(2));
    let seqs: Vec<u64> = items[1..]
        .iter()
        .map(|item| match item {
            TailItem::Line(line) => line.sequence,
            TailItem::Missed(n) => panic!("unexpected second Missed({n})"),
        })
        .collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[tokio::test]
async fn snapshot_plus_tail_is_gapless_under_concurrent_writes() {
    let (output, job) = manager(1000);
    output.push_chunk(job, 0, StreamKind::Stdout, b"before-1\nbefore-2\n");

    let (snapshot, tail) = output.subscribe_with_snapshot(job).expect("registered");

    let producer = {
        let output = Arc::clone(&output);
        tokio::spawn(async move {
            for i in 0..200 {
                output.push_chunk(job, 0, StreamKind::Stdout, format!("live-{i}\n").as_bytes());
                if i % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            output.finish_job(job);
        })
    };

    let collected: Vec<TailItem> = with_timeout(tail.into_stream().collect()).await;
    producer.await.expect("producer panicked");

    let mut seqs: Vec<u64> = snapshot.lines.iter().map(|l| l.sequence).collect();
    for item in collected {
        match item {
            TailItem::Line(line) => seqs.push(line.sequence),
            TailItem::Missed(n) => panic!("retention is large enough, but missed {n}"),
        }
    }
    let expected: Vec<u64> = (1..=202).collect();
    assert_eq!(seqs, expected);
}

#[tokio::test]
async fn tail_ends_when_the_job_is_cleared() {
    let (output, job) = manager(10);
    let mut tail = output.subscribe(job).expect("registered");

    let waiter = tokio::spawn(async move { tail.next().await });
    tokio::task::yield_now().await;
    output.clear(job);

    let item = with_timeout(waiter).await.expect("tail task panicked");
    assert!(item.is_none());
}

#[test]
fn task_sink_flushes_its_partial_line_on_finish() {
    let (output, job) = manager(10);
    let sink = OutputSink::for_task(job, 2, Arc::clone(&output), None);

    sink.push_chunk(StreamKind::Stdout, b"Archive fingerprint: abc");
    assert!(output.task_lines(job, 2).is_empty());

    sink.finish();
    let lines = output.task_lines(job, 2);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text, "Archive fingerprint: abc");
    assert_eq!(lines[0].task_index, 2);
}
