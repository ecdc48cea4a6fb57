use crate::queue::{Backoff, Outcome, Queue};
use mesh_controller_core::{Id, Request, Tenancy, Type};
use pretty_assertions::assert_eq;
use prometheus_client::metrics::gauge::Gauge;
use rstest::rstest;
use std::time::Duration;
use tokio::time;

fn req(name: &str) -> Request {
    Request::new(Id::new(Type::ProxyStateTemplate, Tenancy::default(), name))
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn queue() -> (Queue, Gauge) {
    let depth = Gauge::default();
    let queue = Queue::new(
        Backoff {
            min: ms(1),
            max: ms(4),
        },
        depth.clone(),
    );
    (queue, depth)
}

#[rstest]
#[case::first_failure(None, ms(5))]
#[case::doubles(Some(ms(5)), ms(10))]
#[case::capped(Some(ms(4000)), ms(5000))]
#[case::at_least_min(Some(ms(1)), ms(5))]
fn backoff_doubles_within_bounds(#[case] prev: Option<Duration>, #[case] expected: Duration) {
    assert_eq!(Backoff::default().next(prev), expected);
}

#[tokio::test(flavor = "current_thread")]
async fn pending_requests_are_deduplicated() {
    let (queue, depth) = queue();
    queue.add(req("a"));
    queue.add(req("b"));
    queue.add(req("a"));
    assert_eq!(queue.len(), 2);
    assert_eq!(depth.get(), 2);

    assert_eq!(queue.next().await, Some(req("a")));
    assert_eq!(queue.next().await, Some(req("b")));
    assert!(queue.is_empty());
    assert_eq!(depth.get(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn requests_added_in_flight_run_again_after_completion() {
    let (queue, _) = queue();
    queue.add(req("a"));
    let a = queue.next().await.expect("request must be queued");

    // Not handed to a second worker while in flight.
    queue.add(req("a"));
    assert!(queue.is_empty());

    queue.done(&a, Outcome::Success);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.next().await, Some(req("a")));
}

#[tokio::test(flavor = "current_thread")]
async fn failures_are_retried_with_growing_backoff() {
    let (queue, _) = queue();
    queue.add(req("a"));

    let a = queue.next().await.expect("request must be queued");
    queue.done(&a, Outcome::Error);
    assert_eq!(queue.backoff_of(&a), Some(ms(1)));
    assert!(queue.is_empty(), "retries wait for the backoff");

    let a = time::timeout(Duration::from_secs(5), queue.next())
        .await
        .expect("request must be retried")
        .expect("queue must be open");
    queue.done(&a, Outcome::Timeout);
    assert_eq!(queue.backoff_of(&a), Some(ms(2)));

    let a = time::timeout(Duration::from_secs(5), queue.next())
        .await
        .expect("request must be retried")
        .expect("queue must be open");
    queue.done(&a, Outcome::Success);
    assert_eq!(queue.backoff_of(&a), None);
}

#[tokio::test(flavor = "current_thread")]
async fn close_releases_waiting_workers() {
    let (queue, _) = queue();
    let waiter = tokio::spawn({
        let queue = queue.clone();
        async move { queue.next().await }
    });
    tokio::task::yield_now().await;

    queue.close();
    assert_eq!(waiter.await.expect("worker must not panic"), None);

    queue.add(req("a"));
    assert!(queue.is_empty(), "closed queues accept no work");
}
