use std::convert::Infallible;

use deadpool::managed::{Object, PoolError};

use crate::store::firestore::MarketDatabaseManager;

#[derive(Clone)]
pub struct ServerState {
    pool: deadpool::managed::Pool<MarketDatabaseManager>,
}

impl ServerState {
    pub async fn new() -> Self {
        let pool =
            deadpool::managed::Pool::<MarketDatabaseManager>::builder(MarketDatabaseManager::default())
                .build()
                .unwrap();

        ServerState { pool }
    }

    pub async fn db(&self) -> Result<Object<MarketDatabaseManager>, PoolError<Infallible>> {
        self.pool.get().await
    }
}
