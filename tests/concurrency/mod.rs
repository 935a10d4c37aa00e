use std::{collections::HashSet, time::Duration};

use assert_matches::assert_matches;
use interruptible_batch::{BatchError, Executor, Mode, OutputSink, Status, WorkResult};
use tokio::time::Instant;

use crate::types::{jobs, Job, ScriptedWork};

/// Given a pool of 4 workers
/// When we run 8 elements
/// Then there should be exactly one result per element, in input order
#[tokio::test]
async fn eight_elements_on_four_workers() {
    tokio::time::pause();

    let work = ScriptedWork::default();
    let executor = Executor::builder()
        .name("eight_elements_on_four_workers")
        .work(work.clone())
        .mode(Mode::Concurrent)
        .pool_size(4)
        .output(OutputSink::discard())
        .build();

    let jobs: Vec<_> = jobs(8)
        .into_iter()
        .map(|j| j.with_delay(Duration::from_millis(50)))
        .collect();

    let start = Instant::now();
    let results = executor.run(jobs).await.unwrap();

    assert_eq!(results.len(), 8);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index(), i);
        assert_eq!(result.status(), Status::Ok);
        assert_eq!(result.payload(), Some(&format!("job-{i} processed")));
    }

    let distinct: HashSet<_> = work.calls.all().into_iter().map(|c| c.index).collect();
    assert_eq!(distinct.len(), 8, "each element should be processed once");
    assert_eq!(work.calls.all().len(), 8);

    for call in work.calls.all() {
        assert_eq!(call.gate_masked, None, "concurrent work units get no gate");
        assert_eq!(call.count, 8);
    }

    // Two rounds of four.
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(150),
        "took {elapsed:?}"
    );
}

#[tokio::test]
async fn chunked_submission() {
    tokio::time::pause();

    let executor = Executor::builder()
        .name("chunked_submission")
        .work(ScriptedWork::default())
        .mode(Mode::Concurrent)
        .pool_size(2)
        .chunk_size(3)
        .output(OutputSink::discard())
        .build();

    let jobs: Vec<_> = jobs(7)
        .into_iter()
        .map(|j| j.with_delay(Duration::from_millis(10)))
        .collect();

    let start = Instant::now();
    let results = executor.run(jobs).await.unwrap();

    let indices: Vec<_> = results.iter().map(WorkResult::index).collect();
    assert_eq!(indices, (0..7).collect::<Vec<_>>());

    // Chunks of [3, 3, 1] on two workers: 3 + 1 elements on one of them.
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(40) && elapsed < Duration::from_millis(50),
        "took {elapsed:?}"
    );
}

/// Given a concurrent batch
/// When one work unit fails
/// Then the others should still run to completion before the failure is returned
#[tokio::test]
async fn failure_does_not_cancel_siblings() {
    tokio::time::pause();

    let work = ScriptedWork::default();
    let executor = Executor::builder()
        .name("failure_does_not_cancel_siblings")
        .work(work.clone())
        .mode(Mode::Concurrent)
        .pool_size(3)
        .output(OutputSink::discard())
        .build();

    let jobs = vec![
        Job::ok("a"),
        Job::failing("b").with_delay(Duration::from_millis(10)),
        Job::ok("c").with_delay(Duration::from_millis(50)),
        Job::failing("d").with_delay(Duration::from_millis(5)),
    ];

    let result = executor.run(jobs).await;

    assert_matches!(
        result,
        Err(BatchError::WorkFailed { index: 1, ref error }) if error == "b failed"
    );
    assert_eq!(work.calls.all().len(), 4, "every element should have been processed");
}

#[tokio::test]
async fn panic_is_reported() {
    let executor = Executor::builder()
        .name("panic_is_reported")
        .work(ScriptedWork::default())
        .mode(Mode::Concurrent)
        .pool_size(2)
        .output(OutputSink::discard())
        .build();

    let result = executor
        .run(vec![Job::ok("a"), Job::panicking("b"), Job::ok("c")])
        .await;

    assert_matches!(result, Err(BatchError::Panic));
}

/// Given a wait timeout shorter than the work
/// When we run a concurrent batch
/// Then it should fail with a timeout rather than waiting forever
#[tokio::test]
async fn wait_timeout_is_fatal() {
    tokio::time::pause();

    let executor = Executor::builder()
        .name("wait_timeout_is_fatal")
        .work(ScriptedWork::default())
        .mode(Mode::Concurrent)
        .wait_timeout(Duration::from_secs(1))
        .output(OutputSink::discard())
        .build();

    let start = Instant::now();
    let result = executor
        .run(vec![Job::ok("slow").with_delay(Duration::from_secs(60))])
        .await;

    assert_matches!(result, Err(BatchError::WaitTimeout(d)) if d == Duration::from_secs(1));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn huge_wait_timeout_means_no_bound() {
    let executor = Executor::builder()
        .name("huge_wait_timeout_means_no_bound")
        .work(ScriptedWork::default())
        .mode(Mode::Concurrent)
        .wait_timeout(Duration::MAX)
        .output(OutputSink::discard())
        .build();

    let results = executor.run(jobs(2)).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status() == Status::Ok));
}
