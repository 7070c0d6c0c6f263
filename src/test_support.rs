//! Shared fixtures for database and HTTP tests.

use std::{
    str::FromStr,
    sync::{Arc, Mutex},
};

use actix_web::dev::ServiceResponse;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{
    db::{self, NewUser},
    mailer::{Mailer, OutgoingMail},
    structs::User,
    AppState,
};

pub const TEST_PASSWORD: &str = "c0rrect-horse-battery!";

/// Builds the application the way `main` does, with a fixed session key.
macro_rules! test_app {
    ($state:expr) => {
        actix_web::App::new()
            .wrap(actix_identity::IdentityMiddleware::default())
            .wrap(
                actix_session::SessionMiddleware::builder(
                    actix_session::storage::CookieSessionStore::default(),
                    actix_web::cookie::Key::from(&[0u8; 64]),
                )
                .cookie_secure(false)
                .build(),
            )
            .app_data(actix_web::web::Data::new($state.clone()))
            .configure(crate::routes::configure)
            .default_service(actix_web::web::to(crate::routes::default_handler))
    };
}

/// Logs `username` in through `/login` and returns the session cookie.
macro_rules! login {
    ($app:expr, $username:expr) => {{
        let username: &str = $username;
        let req = actix_web::test::TestRequest::post()
            .uri("/login")
            .set_form([
                ("username", username),
                ("password", crate::test_support::TEST_PASSWORD),
            ])
            .to_request();
        let resp = actix_web::test::call_service(&$app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SEE_OTHER, "login failed");
        resp.response()
            .cookies()
            .find(|c| c.name() == "id")
            .expect("session cookie")
            .into_owned()
    }};
}

/// A migrated in-memory database and a capturing mailer.
pub async fn test_state() -> AppState {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    // One connection that never recycles, or the in-memory database is lost.
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!().run(&db_pool).await.unwrap();

    AppState {
        db_pool,
        mailer: Mailer::Memory(Arc::new(Mutex::new(Vec::new()))),
        site_url: "http://testserver".to_string(),
    }
}

pub async fn create_test_user(state: &AppState, username: &str) -> User {
    db::create_user(
        state,
        NewUser {
            username: username.to_string(),
            email: format!("{}@example.org", username),
            first_name: String::new(),
            last_name: String::new(),
            password: TEST_PASSWORD.to_string(),
            timezone: "UTC".to_string(),
        },
    )
    .await
    .unwrap()
}

pub fn location<B>(resp: &ServiceResponse<B>) -> String {
    resp.headers()
        .get(actix_web::http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn sent_mail(state: &AppState) -> Vec<OutgoingMail> {
    match &state.mailer {
        Mailer::Memory(outbox) => outbox.lock().unwrap().clone(),
        _ => Vec::new(),
    }
}
