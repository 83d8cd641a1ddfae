//! In-process HTTP upstream used by the proxy and probe tests.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type ResponseFuture = Pin<Box<dyn Future<Output = Response<Full<Bytes>>> + Send>>;
type Responder = Arc<dyn Fn(Request<Bytes>) -> ResponseFuture + Send + Sync>;

pub struct TestUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Start an upstream on an ephemeral port that answers every request with
/// `respond`, counting requests as they arrive.
pub async fn spawn_upstream<F, Fut>(respond: F) -> TestUpstream
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let responder: Responder =
        Arc::new(move |req: Request<Bytes>| -> ResponseFuture { Box::pin(respond(req)) });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = &mut shutdown_rx => break,
            };
            let Ok((stream, _)) = accepted else { break };
            let responder = Arc::clone(&responder);
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let responder = Arc::clone(&responder);
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        Ok::<_, Infallible>(
                            (responder.as_ref())(Request::from_parts(parts, body)).await,
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    TestUpstream {
        addr,
        hits,
        shutdown: Some(shutdown_tx),
    }
}

/// Echo upstream: replies `201` with the request body and reports what it
/// received in `x-seen-*` headers.
pub async fn spawn_echo_upstream() -> TestUpstream {
    spawn_upstream(|req: Request<Bytes>| async move {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let saw_accept_encoding = req.headers().contains_key("accept-encoding");
        let custom: Vec<String> = req
            .headers()
            .get_all("x-custom")
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();

        Response::builder()
            .status(201)
            .header("x-seen-method", req.method().as_str())
            .header("x-seen-path", path)
            .header(
                "x-seen-accept-encoding",
                if saw_accept_encoding { "yes" } else { "no" },
            )
            .header("x-seen-custom", custom.join("|"))
            .header("etag", "\"v1\"")
            .header("set-cookie", "a=1")
            .header("set-cookie", "b=2")
            .body(Full::new(req.into_body()))
            .unwrap()
    })
    .await
}

/// Address on which nothing is listening.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
