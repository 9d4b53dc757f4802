//! Server-sent progress stream.
//!
//! Each datum is one `data: <json>\n\n` frame. The stream closes after a
//! terminal event, when the job record disappears, or after 30 s without
//! an event; subscribers re-subscribe rather than hold a stuck stream.
//! Client disconnects drop the stream without touching the job.

use std::time::Duration;

use actix_web::web::Bytes;
use actix_web::{web, HttpResponse};
use futures_util::stream::unfold;
use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use sheet_protocol::ProgressEvent;

use crate::broker::JobSnapshot;
use crate::error::ApiError;
use crate::state::AppState;

/// Subscriber waits are bounded; terminal delivery never depends on this
/// because completion always emits an event.
const SUBSCRIBER_WAIT: Duration = Duration::from_secs(30);

#[actix_web::get("/progress/{job_id}")]
pub async fn progress_stream(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let (snapshot, receiver) = state.broker.subscribe(&job_id).ok_or(ApiError::NotFound)?;

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(sse_stream(snapshot, receiver)))
}

struct StreamState {
    receiver: broadcast::Receiver<ProgressEvent>,
    /// Terminal event replayed immediately when the subscriber attaches
    /// after the job already finished.
    pending: Option<ProgressEvent>,
    done: bool,
}

fn sse_stream(
    snapshot: JobSnapshot,
    receiver: broadcast::Receiver<ProgressEvent>,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    let pending = if snapshot.stage.is_terminal() {
        snapshot.last_progress
    } else {
        None
    };

    unfold(
        StreamState {
            receiver,
            pending,
            done: false,
        },
        |mut st| async move {
            if st.done {
                return None;
            }

            if let Some(event) = st.pending.take() {
                st.done = event.stage.is_terminal();
                return Some((Ok(sse_frame(&event)), st));
            }

            loop {
                match tokio::time::timeout(SUBSCRIBER_WAIT, st.receiver.recv()).await {
                    Ok(Ok(event)) => {
                        st.done = event.stage.is_terminal();
                        return Some((Ok(sse_frame(&event)), st));
                    }
                    // Lagged subscribers skip ahead; every event carries
                    // full state so nothing observable is lost.
                    Ok(Err(RecvError::Lagged(skipped))) => {
                        log::debug!("progress subscriber lagged {skipped} events");
                        continue;
                    }
                    Ok(Err(RecvError::Closed)) => return None,
                    Err(_timeout) => return None,
                }
            }
        },
    )
}

fn sse_frame(event: &ProgressEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(e) => {
            log::error!("failed to serialize progress event: {e}");
            Bytes::from_static(b": serialization error\n\n")
        }
    }
}
