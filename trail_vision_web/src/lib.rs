// THEORY:
// The web UI is a thin shell around one processing function: upload a video,
// wait for the annotated copy, download it. The router never touches OpenCV
// itself. It is handed a `ProcessFn` with the same shape as
// `trail_vision::track_video` (input path in, output path or nothing out), so
// the standalone binary can wire in the real pipeline while tests wire in a
// fake one.
//
// Processing is blocking and CPU-bound, so every request runs it on tokio's
// blocking pool and the async workers keep serving `/healthz` meanwhile.
//
// Each request gets its own directory under the upload dir. The video and an
// optional tracks file are streamed into it chunk by chunk, the tracks file
// under the sibling name the replay tracker looks for, and the whole directory
// is removed once the response is built.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use log::{error, info, warn};
use tokio::io::AsyncWriteExt;
use trail_vision::core_modules::output_naming::sibling_tracks_path;

pub const BIND_ENV_VAR: &str = "TV_BIND";
pub const UPLOAD_DIR_ENV_VAR: &str = "TV_UPLOAD_DIR";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7860";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
pub const FAILURE_MESSAGE: &str = "Video processing failed.";

/// Turns an input video into an annotated one. `None` means no output.
pub type ProcessFn = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Where uploads (and, with default naming, their outputs) are stored.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            upload_dir: std::env::temp_dir().join("trail_vision_uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `TV_BIND` and `TV_UPLOAD_DIR`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(bind) = std::env::var(BIND_ENV_VAR) {
            if !bind.is_empty() {
                cfg.bind_addr = bind;
            }
        }
        if let Some(dir) = std::env::var_os(UPLOAD_DIR_ENV_VAR) {
            if !dir.is_empty() {
                cfg.upload_dir = PathBuf::from(dir);
            }
        }
        cfg
    }
}

#[derive(Clone)]
struct AppState {
    process: ProcessFn,
    upload_dir: PathBuf,
    uploads: Arc<AtomicU64>,
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head><title>Object Tracking with Trails</title></head>
  <body>
    <main>
      <h2>Object Tracking with Trails</h2>
      <p>Upload a video to see objects tracked with their movement trails.
        Attach the tracker's MOT-format output unless the server runs a detector.</p>
      <form id="upload" action="/track" method="post" enctype="multipart/form-data">
        <label>Video <input type="file" name="video" accept="video/*" required></label>
        <label>Tracks <input type="file" name="tracks" accept=".txt,.csv"></label>
        <button type="submit">Track</button>
      </form>
      <p id="status" style="font-family:monospace; font-size:12px; color:#777"></p>
      <video id="result" controls style="max-width:100%; display:none"></video>
    </main>
    <script>
      document.getElementById('upload').onsubmit = async (ev) => {
        ev.preventDefault();
        const status = document.getElementById('status');
        const video = document.getElementById('result');
        status.textContent = 'processing...';
        const resp = await fetch('/track', { method: 'POST', body: new FormData(ev.target) });
        if (!resp.ok) { status.textContent = await resp.text(); return; }
        video.src = URL.createObjectURL(await resp.blob());
        video.style.display = 'block';
        status.textContent = 'done';
      };
    </script>
  </body>
</html>
"#;

/// Builds the HTTP routes around `process`.
pub fn router(process: ProcessFn, cfg: &ServerConfig) -> Router {
    let state = AppState {
        process,
        upload_dir: cfg.upload_dir.clone(),
        uploads: Arc::new(AtomicU64::new(0)),
    };
    Router::new()
        .route("/", get(index))
        .route("/track", axum::routing::post(track))
        .route("/healthz", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

fn text_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

/// Keeps only the final component of a client-supplied file name.
fn sanitize_file_name(name: Option<&str>) -> String {
    name.and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.mp4")
        .to_string()
}

/// Tracks upload waiting for the video's name.
const PENDING_TRACKS: &str = ".pending.tracks";

enum StoreError {
    Upload(MultipartError),
    Io(std::io::Error),
}

/// Streams one multipart field into `path` and returns its size.
async fn store_field(mut field: Field<'_>, path: &Path) -> Result<u64, StoreError> {
    let mut file = tokio::fs::File::create(path).await.map_err(StoreError::Io)?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(StoreError::Upload)? {
        file.write_all(&chunk).await.map_err(StoreError::Io)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(StoreError::Io)?;
    Ok(written)
}

/// Removes the request directory, then answers with `message`.
async fn fail(dir: &Path, status: StatusCode, message: impl Into<String>) -> Response {
    remove_dir_quietly(dir).await;
    text_response(status, message)
}

async fn track(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let id = state.uploads.fetch_add(1, Ordering::Relaxed);
    let request_dir = state
        .upload_dir
        .join(format!("{}_{id}", std::process::id()));
    if let Err(e) = tokio::fs::create_dir_all(&request_dir).await {
        error!("cannot create {}: {e}", request_dir.display());
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, FAILURE_MESSAGE);
    }

    // Stage 1: Stream the upload to disk
    let mut video = None;
    let mut tracks = false;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return fail(&request_dir, StatusCode::BAD_REQUEST, e.body_text()).await,
        };
        let target = match field.name() {
            Some("video") if video.is_none() => {
                request_dir.join(sanitize_file_name(field.file_name()))
            }
            Some("tracks") if !tracks => request_dir.join(PENDING_TRACKS),
            _ => continue,
        };
        let size = match store_field(field, &target).await {
            Ok(size) => size,
            Err(StoreError::Upload(e)) => {
                return fail(&request_dir, StatusCode::BAD_REQUEST, e.body_text()).await;
            }
            Err(StoreError::Io(e)) => {
                error!("cannot store upload {}: {e}", target.display());
                return fail(&request_dir, StatusCode::INTERNAL_SERVER_ERROR, FAILURE_MESSAGE)
                    .await;
            }
        };
        info!("received {} ({size} bytes)", target.display());
        if target.ends_with(PENDING_TRACKS) {
            // An empty file input still sends the field.
            tracks = size > 0;
        } else {
            video = Some(target);
        }
    }
    let Some(input) = video else {
        return fail(&request_dir, StatusCode::BAD_REQUEST, "missing `video` field").await;
    };
    if tracks {
        let destination = sibling_tracks_path(&input);
        if let Err(e) = tokio::fs::rename(request_dir.join(PENDING_TRACKS), &destination).await {
            error!("cannot store tracks {}: {e}", destination.display());
            return fail(&request_dir, StatusCode::INTERNAL_SERVER_ERROR, FAILURE_MESSAGE).await;
        }
    }

    // Stage 2: Run the pipeline off the async workers
    let process = state.process.clone();
    let job_input = input.clone();
    let output = match tokio::task::spawn_blocking(move || process(&job_input)).await {
        Ok(output) => output,
        Err(e) => {
            error!("processing task for {} failed: {e}", input.display());
            return fail(&request_dir, StatusCode::INTERNAL_SERVER_ERROR, FAILURE_MESSAGE).await;
        }
    };

    // Stage 3: Return the annotated video
    let Some(output) = output else {
        return fail(&request_dir, StatusCode::UNPROCESSABLE_ENTITY, FAILURE_MESSAGE).await;
    };
    let body = tokio::fs::read(&output).await;
    if !output.starts_with(&request_dir) {
        remove_quietly(&output).await;
    }
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!("cannot read output {}: {e}", output.display());
            return fail(&request_dir, StatusCode::INTERNAL_SERVER_ERROR, FAILURE_MESSAGE).await;
        }
    };
    remove_dir_quietly(&request_dir).await;

    let download_name = output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tracked.mp4")
        .to_string();
    (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
        ],
        body,
    )
        .into_response()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("could not remove {}: {e}", path.display());
    }
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!("could not remove {}: {e}", path.display());
    }
}

/// Binds `cfg.bind_addr` and serves the UI on a background task.
pub async fn start_server(
    cfg: ServerConfig,
    process: ProcessFn,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = router(process, &cfg);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("trail vision UI listening on http://{addr}");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server stopped: {e}");
        }
    });
    Ok((addr, server))
}
