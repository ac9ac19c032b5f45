//! Fake Plexamp player over HTTP
//!
//! Serves the remote-control command endpoints and a notification stream
//! fed by [`FakePlayerServer::publish`]. `/raw/notifications` replays fixed
//! byte chunks to exercise frame reassembly.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use url::Url;

pub const NOTIFICATIONS_PATH: &str = "/eventsource/notifications";
pub const RAW_NOTIFICATIONS_PATH: &str = "/raw/notifications";
pub const MISSING_NOTIFICATIONS_PATH: &str = "/missing/notifications";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
    pub client_identifier: Option<String>,
}

impl RecordedRequest {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let query = self.query.as_deref().unwrap_or("");
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }
}

#[derive(Clone)]
struct ServerState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    events: broadcast::Sender<(String, String)>,
    failing: Arc<AtomicBool>,
    raw_chunks: Arc<Vec<&'static str>>,
}

pub struct FakePlayerServer {
    pub base: Url,
    state: ServerState,
}

impl FakePlayerServer {
    pub async fn start(raw_chunks: Vec<&'static str>) -> Self {
        let (events, _) = broadcast::channel(16);
        let state = ServerState {
            requests: Arc::new(Mutex::new(Vec::new())),
            events,
            failing: Arc::new(AtomicBool::new(false)),
            raw_chunks: Arc::new(raw_chunks),
        };

        let app = Router::new()
            .route("/player", get(command))
            .route("/player/playback/playMedia", get(command))
            .route("/player/playback/pause", get(command))
            .route("/player/playback/play", get(command))
            .route(NOTIFICATIONS_PATH, get(notifications))
            .route(RAW_NOTIFICATIONS_PATH, get(raw_notifications))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: Url::parse(&format!("http://{}", addr)).unwrap(),
            state,
        }
    }

    pub fn endpoint(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn subscribers(&self) -> usize {
        self.state.events.receiver_count()
    }

    /// Publish one event to every open notification stream
    pub fn publish(&self, event: &str, data: &str) {
        let _ = self.state.events.send((event.to_string(), data.to_string()));
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        for _ in 0..400 {
            if self.subscribers() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} subscriber(s), have {}", count, self.subscribers());
    }

    pub async fn wait_for_requests(&self, count: usize) -> Vec<RecordedRequest> {
        for _ in 0..400 {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} request(s), have {}", count, self.requests().len());
    }
}

async fn command(State(state): State<ServerState>, uri: Uri, headers: HeaderMap) -> StatusCode {
    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        client_identifier: headers
            .get("X-Plex-Client-Identifier")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    if state.failing.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn notifications(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    let stream = async_stream::stream! {
        while let Ok((name, data)) = rx.recv().await {
            yield Ok(Event::default().event(name).data(data));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn raw_notifications(State(state): State<ServerState>) -> Response {
    let chunks = state.raw_chunks.clone();
    let stream = async_stream::stream! {
        for chunk in chunks.iter() {
            yield Ok::<_, Infallible>(chunk.to_string());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Hold the stream open until the client goes away
        std::future::pending::<()>().await;
    };
    (
        [("content-type", "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}
