use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};

use crate::chart::ChartHandle;

#[derive(Clone)]
struct WebState {
    charts: ChartHandle,
    refresh_secs: u64,
}

/// `/` serves a page that reloads itself every `refresh_secs`; `/plot.png`
/// serves the most recently published chart.
pub fn router(charts: ChartHandle, refresh_secs: u64) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/plot.png", get(plot))
        .with_state(WebState {
            charts,
            refresh_secs: refresh_secs.max(1),
        })
}

pub async fn serve(bind_addr: &str, router: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http bind address '{bind_addr}': {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "chart server listening");
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}

async fn index(State(state): State<WebState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"{}\">\n\
         <title>Solar Panel Production and Consumption</title>\n</head>\n\
         <body>\n<img src=\"/plot.png\" alt=\"Solar production and consumption chart\">\n</body>\n</html>\n",
        state.refresh_secs
    ))
}

async fn plot(State(state): State<WebState>) -> Response {
    match state.charts.latest() {
        Some(chart) => {
            metrics::counter!("chart_requests_total", "status" => "ok").increment(1);
            (
                [
                    (header::CONTENT_TYPE, "image/png"),
                    (header::CACHE_CONTROL, "no-store"),
                ],
                chart.png.clone(),
            )
                .into_response()
        }
        None => {
            metrics::counter!("chart_requests_total", "status" => "not_ready").increment(1);
            (StatusCode::SERVICE_UNAVAILABLE, "chart not ready").into_response()
        }
    }
}
