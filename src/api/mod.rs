//! HTTP control surface for the crawl services

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{ExtractionResult, ParserStatus, UrlUpdaterStatus};
use crate::services::{AlreadyRunning, Crawler, UrlRefresher};
use crate::traits::{DriverFactory, SitemapFetcher};

const MAX_PAGE_SIZE: usize = 100;

pub struct AppState<F: DriverFactory, S> {
    pub crawler: Crawler<F>,
    pub refresher: UrlRefresher<S>,
}

impl<F: DriverFactory, S> Clone for AppState<F, S> {
    fn clone(&self) -> Self {
        Self {
            crawler: self.crawler.clone(),
            refresher: self.refresher.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
}

fn conflict(e: AlreadyRunning) -> ApiError {
    error(
        StatusCode::CONFLICT,
        format!("{e}; use force=true to restart it"),
    )
}

fn message(text: impl Into<String>) -> Json<Message> {
    Json(Message {
        message: text.into(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ParseParams {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProductsParams {
    pub category: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

pub fn router<F, S>(state: AppState<F, S>) -> Router
where
    F: DriverFactory,
    S: SitemapFetcher + 'static,
{
    Router::new()
        .route("/", get(root))
        .route("/status/parser", get(parser_status::<F, S>))
        .route("/status/url-updater", get(url_updater_status::<F, S>))
        .route("/parse/:category", post(start_parsing::<F, S>))
        .route("/update-urls", post(start_url_update::<F, S>))
        .route("/products", get(products::<F, S>))
        .route("/products/:code", get(product::<F, S>))
        .route("/stop/parser", post(stop_parser::<F, S>))
        .route("/stop/url-updater", post(stop_url_updater::<F, S>))
        .with_state(state)
}

async fn root() -> Json<Message> {
    message("Product crawler API")
}

async fn parser_status<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
) -> Json<ParserStatus> {
    Json(state.crawler.status().await)
}

async fn url_updater_status<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
) -> Json<UrlUpdaterStatus> {
    Json(state.refresher.status().await)
}

async fn start_parsing<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
    Path(category): Path<String>,
    Query(params): Query<ParseParams>,
) -> Result<Json<Message>, ApiError> {
    state
        .crawler
        .start(&category, params.limit, params.force)
        .await
        .map_err(conflict)?;

    let limit = if params.limit > 0 {
        params.limit.to_string()
    } else {
        "none".to_string()
    };
    Ok(message(format!(
        "Crawl of category {category} started (limit: {limit})"
    )))
}

async fn start_url_update<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
    Query(params): Query<ForceParams>,
) -> Result<Json<Message>, ApiError> {
    state
        .refresher
        .start(params.force)
        .await
        .map_err(conflict)?;
    Ok(message("URL refresh started"))
}

async fn products<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
    Query(params): Query<ProductsParams>,
) -> Result<Json<Vec<ExtractionResult>>, ApiError> {
    let limit = params.limit.unwrap_or(10);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }

    let page = state
        .crawler
        .products(params.category.as_deref(), limit, params.offset)
        .await;
    Ok(Json(page))
}

async fn product<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
    Path(code): Path<String>,
) -> Result<Json<ExtractionResult>, ApiError> {
    state
        .crawler
        .product(&code)
        .await
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "Product not found"))
}

async fn stop_parser<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
) -> Json<Message> {
    if state.crawler.stop().await {
        message("Crawl stopped")
    } else {
        info!("Stop requested but no crawl is running");
        message("Crawl is not running")
    }
}

async fn stop_url_updater<F: DriverFactory, S: SitemapFetcher + 'static>(
    State(state): State<AppState<F, S>>,
) -> Json<Message> {
    if state.refresher.stop().await {
        message("URL refresh stopped")
    } else {
        message("URL refresh is not running")
    }
}
