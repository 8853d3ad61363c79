//! Feed accessor routes.
//!
//! Serves normalized government data; an empty result is a 404 so callers
//! can tell "no data" from "some data".

use axum::{extract::State, routing::get, Json, Router};
use georef_core::{Locality, Street};

use crate::error::{ApiError, ApiResult};
use crate::feed::GovernmentFeed;
use crate::middleware::RequestContext;

/// GET /geolocation - Every locality in the feed
pub async fn geolocation(
    State(feed): State<GovernmentFeed>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<Locality>>> {
    let localities = feed.localities(&ctx.cancel).await?;
    if localities.is_empty() {
        return Err(ApiError::not_found("No geolocation data available"));
    }
    Ok(Json(localities))
}

/// GET /streets - Every street in the feed
pub async fn streets(
    State(feed): State<GovernmentFeed>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<Street>>> {
    let streets = feed.streets(&ctx.cancel).await?;
    if streets.is_empty() {
        return Err(ApiError::not_found("No street data available"));
    }
    Ok(Json(streets))
}

pub fn create_router(feed: GovernmentFeed) -> Router {
    Router::new()
        .route("/geolocation", get(geolocation))
        .route("/streets", get(streets))
        .with_state(feed)
}
