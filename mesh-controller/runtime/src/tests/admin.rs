use crate::{admin::Admin, metrics::ControllerMetrics};
use hyper::{Body, Method, Request, StatusCode};
use prometheus_client::registry::Registry;
use tokio::sync::watch;

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("request must be valid")
}

async fn body(rsp: hyper::Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(rsp.into_body())
        .await
        .expect("body must be readable");
    String::from_utf8(bytes.to_vec()).expect("body must be utf-8")
}

#[tokio::test(flavor = "current_thread")]
async fn ready_follows_the_manager() {
    let (ready_tx, ready_rx) = watch::channel(false);
    let admin = Admin::new(ready_rx, Registry::default());

    let rsp = admin.handle(&get("/ready"));
    assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(rsp).await, "not ready\n");

    ready_tx.send(true).expect("admin must hold a receiver");
    let rsp = admin.handle(&get("/ready"));
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(body(rsp).await, "ready\n");

    // Liveness does not depend on readiness.
    ready_tx.send(false).expect("admin must hold a receiver");
    assert_eq!(admin.handle(&get("/live")).status(), StatusCode::OK);
}

#[tokio::test(flavor = "current_thread")]
async fn metrics_are_exported() {
    let (_ready_tx, ready_rx) = watch::channel(true);
    let mut registry = Registry::default();
    ControllerMetrics::register(registry.sub_registry_with_prefix("controller"));
    let admin = Admin::new(ready_rx, registry);

    let rsp = admin.handle(&get("/metrics"));
    assert_eq!(rsp.status(), StatusCode::OK);
    assert!(rsp.headers()[hyper::header::CONTENT_TYPE]
        .to_str()
        .expect("content type must be ascii")
        .starts_with("application/openmetrics-text"));
    let text = body(rsp).await;
    assert!(text.contains("controller_queue_depth 0"), "{text}");
    assert!(text.contains("# TYPE controller_reconciles counter"), "{text}");
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_requests_are_rejected() {
    let (_ready_tx, ready_rx) = watch::channel(true);
    let admin = Admin::new(ready_rx, Registry::default());

    assert_eq!(admin.handle(&get("/nope")).status(), StatusCode::NOT_FOUND);

    let post = Request::builder()
        .method(Method::POST)
        .uri("/ready")
        .body(Body::empty())
        .expect("request must be valid");
    assert_eq!(admin.handle(&post).status(), StatusCode::METHOD_NOT_ALLOWED);
}
