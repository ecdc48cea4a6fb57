use futures::{future, FutureExt};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use prometheus_client::{encoding::text, registry::Registry};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{oneshot, watch};
use tracing::{info, instrument, warn};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared state behind the admin endpoints.
#[derive(Clone, Debug)]
pub struct Admin {
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
}

// === impl Admin ===

impl Admin {
    pub fn new(ready: watch::Receiver<bool>, registry: Registry) -> Self {
        Self {
            ready,
            registry: Arc::new(registry),
        }
    }

    /// Serves `/live`, `/ready` and `/metrics` until `drain` is signaled.
    #[instrument(skip(self, drain))]
    pub async fn serve(self, addr: SocketAddr, drain: drain::Watch) -> Result<(), hyper::Error> {
        let server = hyper::server::Server::try_bind(&addr)?.serve(
            hyper::service::make_service_fn(move |_conn| {
                let admin = self.clone();
                future::ok::<_, hyper::Error>(hyper::service::service_fn(
                    move |req: Request<Body>| future::ok::<_, hyper::Error>(admin.handle(&req)),
                ))
            }),
        );
        let addr = server.local_addr();
        info!(%addr, "HTTP admin server listening");

        let (close_tx, close_rx) = oneshot::channel::<()>();
        let srv = server.with_graceful_shutdown(close_rx.map(|_| {}));
        tokio::pin!(srv);
        tokio::select! {
            res = (&mut srv) => res,
            handle = drain.signaled() => {
                let _ = close_tx.send(());
                handle.release_after(srv).await
            }
        }
    }

    pub fn handle(&self, req: &Request<Body>) -> Response<Body> {
        if !matches!(*req.method(), Method::GET | Method::HEAD) {
            return status(StatusCode::METHOD_NOT_ALLOWED);
        }

        match req.uri().path() {
            "/live" => text(StatusCode::OK, "live\n"),
            "/ready" => {
                if *self.ready.borrow() {
                    text(StatusCode::OK, "ready\n")
                } else {
                    text(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n")
                }
            }
            "/metrics" => self.metrics(),
            _ => status(StatusCode::NOT_FOUND),
        }
    }

    fn metrics(&self) -> Response<Body> {
        let mut buf = String::new();
        if let Err(error) = text::encode(&mut buf, &self.registry) {
            warn!(%error, "failed to encode metrics");
            return status(StatusCode::INTERNAL_SERVER_ERROR);
        }
        let mut rsp = Response::new(Body::from(buf));
        rsp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(OPENMETRICS_CONTENT_TYPE),
        );
        rsp
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = code;
    rsp
}

fn text(code: StatusCode, body: &'static str) -> Response<Body> {
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = code;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain"),
    );
    rsp
}
