//! Configuration for the taranis CLI

use core_config::{Environment, FromEnv};
use domain_vectordb::{EngineConfig, MongoStoreConfig, VectorDbConfig};
use eyre::{Result, WrapErr};

const APP_NAME: &str = "taranis-cli";

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub store: MongoStoreConfig,
    pub engine: EngineConfig,
    pub vectordb: VectorDbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut store =
            MongoStoreConfig::from_env().wrap_err("Invalid document store configuration")?;
        if store.app_name.is_none() {
            store = store.with_app_name(APP_NAME);
        }

        Ok(Self {
            environment: Environment::from_env(),
            store,
            engine: EngineConfig::from_env().wrap_err("Invalid index engine configuration")?,
            vectordb: VectorDbConfig::from_env().wrap_err("Invalid pipeline configuration")?,
        })
    }
}
