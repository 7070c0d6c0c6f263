#[macro_use]
extern crate lazy_static;

#[cfg(test)]
#[macro_use]
mod test_support;

mod config;
mod dashboard;
mod db;
mod errors;
mod export;
mod flash;
mod forms;
mod guards;
mod mailer;
mod routes;
mod structs;
mod utils;

use std::str::FromStr;

use actix_files::Files;
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    cookie::Key,
    middleware,
    web::{self, Data},
    App, HttpServer,
};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};
use tera::Tera;

use config::Config;
use errors::AppError;
use mailer::Mailer;

#[derive(Clone)]
pub struct AppState {
    db_pool: SqlitePool,
    mailer: Mailer,
    /// Base for absolute links in outgoing mail.
    site_url: String,
}

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

async fn connect_database(database_url: &str) -> Result<SqlitePool, AppError> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts).await?;
    sqlx::migrate!().run(&db_pool).await?;
    info!("Database migrated successfully");
    Ok(db_pool)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| {
        log::error!("FATAL: invalid configuration: {}", e);
        e
    })?;

    let db_pool = connect_database(&config.database_url).await.map_err(|e| {
        log::error!("FATAL: could not open {}: {}", config.database_url, e);
        e
    })?;
    let state = AppState {
        db_pool,
        mailer: Mailer::from_config(&config)?,
        site_url: config.site_url.clone(),
    };

    let session_key = Key::from(&config.session_key);
    let secure_cookies = config.secure_cookies;
    let (host, port) = config.server_addr();
    info!("Starting HTTP server on http://{}:{}/", host, port);

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_secure(secure_cookies)
                    .build(),
            )
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .app_data(Data::new(state.clone()))
            .service(Files::new("/static", "static"))
            .configure(routes::configure)
            .default_service(web::to(routes::default_handler))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
