//! Charon billing server
//!
//! Real-time charging core: rating engine, account debiter and action
//! scheduler behind a JSON RPC surface.

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use charon_api::{routes, Responder};
use charon_core::AppConfig;
use charon_engine::{ActionExecutor, Context};
use charon_scheduler::{ReloadReason, Scheduler};
use charon_store::{LogMailer, MemAccountingStore, MemCdrStore, MemTariffStore};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "charon_billing={},charon_api={},charon_engine={},charon_rating={},charon_scheduler={},actix_web=info",
            log_level, log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Charon Billing v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    let bind_addr = config.server_addr();
    let rpc_deadline = config.rpc_deadline();

    // injected stores; persistent drivers plug in here
    let tariff = Arc::new(MemTariffStore::new());
    let accounting = Arc::new(MemAccountingStore::new());
    let cdrs = Arc::new(MemCdrStore::new());
    let mailer = Arc::new(LogMailer);

    let ctx = Context::new(config, tariff, accounting, cdrs, mailer);
    let executor = ActionExecutor::new(ctx.clone());

    let (scheduler, scheduler_handle) = Scheduler::new(ctx.clone(), executor.clone());
    scheduler_handle.reload(ReloadReason::Startup);
    tokio::spawn(scheduler.run());

    let responder = Responder::new(ctx.clone(), executor, scheduler_handle);

    let workers: usize = env::var("CHARON_SERVER_WORKERS")
        .ok()
        .and_then(|w| w.parse().ok())
        .unwrap_or_else(num_cpus::get);

    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(responder.clone()))
            .app_data(web::Data::new(rpc_deadline))
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(middleware::NormalizePath::trim())
            .configure(routes::configure)
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await?;
    Ok(())
}
