use actix_web::{web, App, HttpServer};
use clap::Parser;

use sheet_server::config::ServerConfig;
use sheet_server::state::AppState;
use sheet_server::{routes, sweep};

#[derive(Parser)]
#[command(name = "sheet-server", about = "PDF sheet composition service", version)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig::from_env()?;
    log::info!(
        "storage dir {}, idempotency {}, sync threshold {} MB (enforced: {})",
        config.storage_directory.display(),
        config.idempotency_active,
        config.large_file_threshold_mb,
        config.enforce_progress_for_large
    );

    let state = web::Data::new(AppState::new(config));
    state.store.ensure_dir().await?;
    sweep::spawn_sweeper(state.clone().into_inner());

    log::info!("listening on {}:{}", args.host, args.port);
    HttpServer::new({
        let state = state.clone();
        move || {
            App::new().app_data(state.clone()).service(
                web::scope("/api/pdf")
                    .service(routes::process::process_with_progress)
                    .service(routes::process::process_sync)
                    .service(routes::progress::progress_stream)
                    .service(routes::status::job_status)
                    .service(routes::download::download)
                    .service(routes::health::health),
            )
        }
    })
    .bind((args.host.as_str(), args.port))?
    .run()
    .await?;

    Ok(())
}
