//! # KLUTCH Binary
//!
//! The entry point that assembles the marketplace based on compile-time features.
//!
//! Usage:
//!   klutch                     serve the HTTP API
//!   klutch issue-token <uuid>  print a bearer token for a user id

use std::sync::Arc;

use actix_files::Files;
use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context};
use kl_api::handlers::AppState;
use kl_api::{configure_routes, middleware};
use kl_config::{LogFormat, LogSettings, Settings};
use kl_core::models::Coordinates;
use kl_core::traits::{AuthProvider, Geocoder};
use kl_core::{EventBus, Marketplace, MarketplaceOptions, Ports};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[cfg(not(all(
    feature = "db-sqlite",
    feature = "storage-local",
    feature = "auth-simple",
    feature = "geo-mapbox"
)))]
compile_error!("klutch needs the db-sqlite, storage-local, auth-simple and geo-mapbox features");

// Feature-gated imports
#[cfg(feature = "db-sqlite")]
use kl_db_sqlite::SqliteStore;

#[cfg(feature = "storage-local")]
use kl_storage_local::LocalMediaStore;

#[cfg(feature = "auth-simple")]
use kl_auth_simple::SimpleAuthProvider;

#[cfg(feature = "geo-mapbox")]
use kl_geo_mapbox::{FixedPositionSource, MapboxGeocoder, OfflineGeocoder};

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // `init` also routes the `log` facade (actix's access log) into tracing.
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Logs every domain event until the bus closes.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    actix_web::rt::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    info!(event = event.name(), posting_id = %event.posting_id(), %payload, "domain event");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let Settings { server, database, media, geo, auth, log } =
        Settings::load().context("loading configuration")?;
    init_tracing(&log);

    let auth: Arc<dyn AuthProvider> =
        Arc::new(SimpleAuthProvider::new(auth.secret).context("initialising bearer token auth")?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {}
        [cmd, user] if cmd == "issue-token" => {
            let user_id = Uuid::parse_str(user).with_context(|| format!("{user:?} is not a UUID"))?;
            println!("{}", auth.issue_token(user_id));
            return Ok(());
        }
        _ => bail!("usage: klutch [issue-token <uuid>]"),
    }

    // 1. Persistence
    let store = Arc::new(
        SqliteStore::connect(&database.url, database.max_connections)
            .await
            .with_context(|| format!("opening database {}", database.url))?,
    );

    // 2. Media storage
    std::fs::create_dir_all(&media.root)
        .with_context(|| format!("creating media directory {}", media.root.display()))?;
    let media_store = Arc::new(LocalMediaStore::new(media.root.clone(), media.url_prefix.clone()));

    // 3. Geolocation
    let geocode_timeout = geo.timeout();
    let position = FixedPositionSource::new(
        geo.fixed_position()
            .map(|(latitude, longitude)| Coordinates { latitude, longitude }),
    );
    let geocoder: Arc<dyn Geocoder> = match geo.mapbox_token {
        Some(token) => Arc::new(MapboxGeocoder::new(geo.mapbox_base_url, token, geocode_timeout)?),
        None => {
            warn!("geo.mapbox_token is not set, addresses will not be resolved");
            Arc::new(OfflineGeocoder)
        }
    };

    let marketplace = Marketplace::new(
        Ports {
            postings: store.clone(),
            bids: store.clone(),
            tags: store.clone(),
            media: store,
            store: media_store,
            position: Arc::new(position),
            geocoder,
        },
        MarketplaceOptions {
            max_upload_bytes: media.max_upload_bytes,
            geocode_timeout,
            ..Default::default()
        },
    );
    spawn_event_logger(marketplace.events());

    let state = web::Data::new(AppState { marketplace, auth });
    let cors_origins = server.cors_origins.clone();
    let (media_prefix, media_root) = (media.url_prefix, media.root);

    info!(host = %server.host, port = server.port, "KLUTCH starting");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::cors_policy(&cors_origins))
            .wrap(middleware::standard_middleware())
            .configure(configure_routes)
            .service(Files::new(&media_prefix, media_root.clone()))
    })
    .bind(server.bind_addr())
    .with_context(|| format!("binding {}:{}", server.host, server.port))?
    .run()
    .await?;

    Ok(())
}
