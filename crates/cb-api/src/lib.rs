//! # cb-api
//!
//! The HTTP routing layer for the board.

pub mod error;
pub mod handlers;
pub mod middleware;

use std::path::Path;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use handlers::AppState;

/// JSON API routes, without static files.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(handlers::list_posts).post(handlers::create_post))
        .route("/api/posts/{id}", get(handlers::get_post))
        .route("/api/posts/{id}/respond", post(handlers::respond))
        .route("/api/manage/{token}", get(handlers::manage_view))
        .route("/api/manage/{token}/update", post(handlers::update_post))
        .route("/api/manage/{token}/renew", post(handlers::renew_post))
        .route("/api/manage/{token}/deactivate", post(handlers::deactivate_post))
        .route("/api/manage/{token}/delete", post(handlers::delete_post))
        .route("/api/manage/{token}/reply", post(handlers::reply))
        .route("/api/admin/delete", post(handlers::admin_delete))
}

/// The full application. With `public_dir`, the page routes serve their
/// HTML files and anything else falls back to a static file or `index.html`.
pub fn router(state: AppState, public_dir: Option<&Path>) -> Router {
    let app = match public_dir {
        Some(dir) => {
            let page = |name: &str| ServeFile::new(dir.join(name));
            api_routes()
                .route_service("/post", page("post.html"))
                .route_service("/respond/{id}", page("respond.html"))
                .route_service("/manage/{token}", page("manage.html"))
                .fallback_service(ServeDir::new(dir).fallback(page("index.html")))
        }
        None => api_routes().fallback(handlers::not_found),
    };

    app.layer(middleware::cors_policy())
        .layer(middleware::trace_layer())
        .with_state(state)
}
