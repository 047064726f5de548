// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::RecyclingMethod;
use diesel_async::pooled_connection::bb8::Pool;
use std::env;

/// This type alias is the pool, which can be quried for connections.
/// It is typically wrapped in Arc to allow thread safe cloning to the same pool
pub type CatenaryPostgresPool =
    bb8::Pool<AsyncDieselConnectionManager<diesel_async::AsyncPgConnection>>;

/// Reconciliation runs hold one connection for the whole transaction, so the
/// pool stays small.
pub async fn make_async_pool() -> Result<CatenaryPostgresPool, Box<dyn std::error::Error + Sync + Send>>
{
    let mut custom_conf = ManagerConfig::default();

    custom_conf.recycling_method = RecyclingMethod::Fast;

    let config: AsyncDieselConnectionManager<diesel_async::AsyncPgConnection> =
        AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new_with_config(
            database_url_for_env()?,
            custom_conf,
        );
    let pool = Pool::builder().max_size(4).min_idle(Some(1)).build(config).await?;

    Ok(pool)
}

fn database_url_for_env() -> Result<String, env::VarError> {
    env::var("DATABASE_URL")
}
