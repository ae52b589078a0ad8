//! Review server - HTTP surface over the review stage

pub mod http;

use anyhow::{Context, Result};
use axum::{
    response::Html,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::SummaryOptions;
use crate::store::ArticleStore;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<ArticleStore>,
    pub summary_options: SummaryOptions,
}

/// Build the router; separate from [`start`] so handlers can be driven in tests
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_page))
        .route("/api/batches", get(http::list_batches_handler))
        .route("/api/batches/{date}/progress", get(http::progress_handler))
        .route("/api/batches/{date}/next", get(http::next_handler))
        .route("/api/batches/{date}/pending", get(http::pending_handler))
        .route("/api/batches/{date}/reviews", post(http::review_handler))
        .route("/api/batches/{date}/summary", get(http::summary_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the review server
pub async fn start(host: &str, port: u16, state: ServerState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Review server listening on http://{}", addr);
    println!("Review server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Review server stopped")?;
    Ok(())
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r##"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>News Select Review</title>
<style>
body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }
#article { border: 1px solid #ccc; padding: 1rem; margin-bottom: 1rem; }
textarea { width: 100%; height: 5rem; }
.muted { color: #666; }
</style>
</head>
<body>
<h1>Review</h1>
<p>Batch <input id="date" type="date"> <button onclick="loadNext()">Load</button> <span id="progress" class="muted"></span></p>
<div id="article" class="muted">Pick a batch.</div>
<form id="form" onsubmit="submitReview(event)" hidden>
  <label>Your score (1-10) <input id="score" type="number" min="1" max="10"></label>
  <textarea id="rationale" placeholder="Why?"></textarea>
  <button type="submit">Submit</button>
  <button type="button" onclick="accept()">Agree with evaluator</button>
</form>
<script>
let current = null;
document.getElementById('date').valueAsDate = new Date();
const day = () => document.getElementById('date').value;
const esc = (s) => String(s ?? '').replace(/[&<>"]/g, (c) => ({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;'}[c]));

async function loadNext() {
  const p = await fetch(`/api/batches/${day()}/progress`);
  if (p.ok) {
    const prog = await p.json();
    document.getElementById('progress').textContent = `${prog.reviewed} reviewed, ${prog.pending} pending, ${prog.unscored} unscored`;
  }
  const r = await fetch(`/api/batches/${day()}/next`);
  const box = document.getElementById('article');
  const form = document.getElementById('form');
  if (r.status === 204) { current = null; box.textContent = 'Nothing left to review.'; form.hidden = true; return; }
  if (!r.ok) { box.textContent = (await r.json()).message; form.hidden = true; return; }
  current = await r.json();
  const ev = current.evaluation;
  box.innerHTML = `<h2>${esc(current.title)}</h2>
    <p class="muted">${esc(current.location_name)} ${current.link ? `<a href="${esc(current.link)}" target="_blank">source</a>` : ''}</p>
    <p><b>Evaluator score:</b> ${ev.score}</p><p>${esc(ev.rationale)}</p>`;
  form.hidden = false;
}

async function send(body) {
  const r = await fetch(`/api/batches/${day()}/reviews`, {
    method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify(body)
  });
  if (!r.ok) { alert((await r.json()).message); return; }
  document.getElementById('score').value = '';
  document.getElementById('rationale').value = '';
  loadNext();
}

function submitReview(e) {
  e.preventDefault();
  send({id: current.id, score: Number(document.getElementById('score').value), rationale: document.getElementById('rationale').value});
}

function accept() { send({id: current.id, accept: true}); }
</script>
</body>
</html>
"##;
