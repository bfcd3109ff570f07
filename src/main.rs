use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use anyhow::{Context, Result};
use log::info;

use coinrate::config::Config;
use coinrate::exchange::CoinApi;
use coinrate::http::{self, AppState};
use coinrate::orchestrator::Orchestrator;
use coinrate::refresher::Refresher;
use coinrate::shutdown::Shutdown;
use coinrate::store::PostgresStore;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    config.validate()?;

    let store = PostgresStore::connect(&config.database_url, config.database_table.clone())
        .await
        .context("Can't connect to the database")?;
    store
        .initialize()
        .await
        .context("Can't initialize the rates table")?;

    let exchange = CoinApi::new(
        config.coin_api_url.clone(),
        config.coin_api_token.clone(),
        config.upstream_timeout,
    )?;

    let (trigger, shutdown) = Shutdown::channel();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(store),
        Arc::new(exchange),
        shutdown.clone(),
    ));

    let refresher = Refresher::new(
        orchestrator.clone(),
        config.coin.clone(),
        config.fiat.clone(),
        config.refresh_interval,
    )
    .spawn(shutdown);

    let state = web::Data::new(AppState::new(
        orchestrator,
        config.coin.clone(),
        config.fiat.clone(),
        config.request_deadline,
    ));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(http::routes)
    })
    .disable_signals()
    .bind(config.bind_address())?
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            trigger.fire();
            server_handle.stop(true).await;
        }
    });

    info!("Listening on {}:{}", config.host, config.port);
    server.await?;
    refresher.await?;

    Ok(())
}
