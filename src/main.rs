use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use clap::Parser;
use opsdesk_backend::config::Config;
use opsdesk_backend::helper::push_helpers::HttpPushSender;
use opsdesk_backend::setup::db_setup;
use opsdesk_backend::{routes, AppState};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "opsdesk_server", author, version, about = "Starts the OpsDesk API server.")]
struct Cli {
    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

fn build_cors(allowed_origins: &str) -> Cors {
    let cors = if allowed_origins.trim() == "*" {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    fs::create_dir_all(&config.database_path).expect("Failed to create database directory");
    fs::create_dir_all(config.uploads_dir()).expect("Failed to create uploads directory");

    let pool = db_setup::create_pool(&config.database_file())
        .expect("FATAL: Failed to open the SQLite database. Run 'setup_cli --env-file <path> db setup' first.");

    let push_sender = HttpPushSender::new(config.push_dispatch_timeout())
        .expect("FATAL: Failed to build the push HTTP client.");
    let app_state = web::Data::new(AppState { push_sender: Arc::new(push_sender) });
    let pool_data = web::Data::new(pool);
    let config_data = web::Data::new(config.clone());

    let server_address = format!("{}:{}", config.web.host, config.web.port);
    log::info!("Server starting at http://{}", server_address);

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&config.allowed_origins))
            .wrap(Logger::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY")),
            )
            .app_data(config_data.clone())
            .app_data(pool_data.clone())
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(actix_files::Files::new("/media", &config.media_path))
    })
    .bind(server_address)?
    .run()
    .await
}
