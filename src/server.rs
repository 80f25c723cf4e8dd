//! Static development server.
//!
//! Serves files from an ordered list of roots: a request is answered from the
//! first root containing the file. With live reload enabled, every HTML page
//! gets the reload client injected on the way out.

use std::net::{SocketAddr, TcpListener};
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Binds `port` on localhost and serves `roots` from a background thread.
///
/// Returns the bound port together with the server thread. When
/// `live_port` is set, HTML pages connect back to the live reload server on
/// that port.
pub fn start(
    roots: Vec<Utf8PathBuf>,
    port: u16,
    live_port: Option<u16>,
) -> std::io::Result<(u16, thread::JoinHandle<anyhow::Result<()>>)> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
    listener.set_nonblocking(true)?;
    let port = listener.local_addr()?.port();

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    let thread = thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(listener, roots, live_port))
    });

    Ok((port, thread))
}

async fn serve(
    listener: TcpListener,
    roots: Vec<Utf8PathBuf>,
    live_port: Option<u16>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let mut router = router(&roots);
    if let Some(live_port) = live_port {
        router = router.layer(axum::middleware::map_response_with_state(
            live_port,
            inject_live_script,
        ));
    }

    axum::serve(listener, router).await?;

    Ok(())
}

/// Chains one file service per root, each falling back to the next.
fn router(roots: &[Utf8PathBuf]) -> Router {
    let mut router = Router::new();
    for root in roots.iter().rev() {
        router = Router::new().fallback_service(ServeDir::new(root).fallback(router));
    }
    router
}

async fn inject_live_script(State(port): State<u16>, response: Response) -> Response {
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !is_html || response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let html = crate::reload::inject_script(&String::from_utf8_lossy(&bytes), port);
    parts.headers.remove(CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}
