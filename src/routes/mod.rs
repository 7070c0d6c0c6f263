use actix_session::Session;
use actix_web::{
    http::{Method, StatusCode},
    web, HttpResponse,
};
use serde::Serialize;
use tera::Context;

use crate::{
    errors::render_error_page,
    flash,
    structs::{PpeCategory, User},
};

pub mod auth;
pub mod dashboard;
pub mod inventory;
pub mod onboard;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(auth::index_handler)
        .service(auth::register_handler)
        .service(auth::register_form_handler)
        .service(auth::login_handler)
        .service(auth::login_form_handler)
        .service(auth::logout_handler)
        .service(auth::password_reset_handler)
        .service(auth::password_reset_form_handler)
        .service(auth::password_reset_done_handler)
        .service(auth::password_reset_complete_handler)
        .service(auth::password_reset_confirm_handler)
        .service(auth::password_reset_confirm_form_handler)
        .service(onboard::home_handler)
        .service(onboard::onboard_handler)
        .service(onboard::connect_handler)
        .service(onboard::connect_form_handler)
        .service(onboard::new_provider_handler)
        .service(onboard::new_provider_form_handler)
        .service(onboard::new_parent_handler)
        .service(onboard::new_parent_form_handler)
        .service(inventory::inventory_list_handler)
        .service(inventory::track_handler)
        .service(inventory::track_form_handler)
        .service(dashboard::dashboard_handler)
        .service(dashboard::dashboard_data_handler)
        .service(dashboard::download_handler);
}

/// Navigation entry for one equipment category.
#[derive(Serialize)]
struct CategoryLink {
    slug: &'static str,
    value: &'static str,
    label: &'static str,
}

/// Context every page starts from: pending flash messages, the signed-in
/// user and the category navigation.
pub(crate) fn page_context(session: &Session, title: &str, user: Option<&User>) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("messages", &flash::take(session));
    context.insert("current_user", &user);
    context.insert(
        "categories",
        &PpeCategory::ALL
            .iter()
            .map(|c| CategoryLink {
                slug: c.slug(),
                value: c.as_str(),
                label: c.label(),
            })
            .collect::<Vec<_>>(),
    );
    context.insert("version", env!("CARGO_PKG_VERSION"));
    context
}

pub async fn default_handler(req_method: Method) -> HttpResponse {
    match req_method {
        Method::GET | Method::HEAD => render_error_page(
            StatusCode::NOT_FOUND,
            "The page you were looking for does not exist.",
        ),
        _ => HttpResponse::MethodNotAllowed().finish(),
    }
}
