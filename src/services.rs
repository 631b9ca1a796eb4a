//! Wiring from [`Config`] to the runtime components shared by the CLI and
//! the HTTP server.

use std::sync::Arc;

use anyhow::{Context, Result};
use dataset_search_core::pipeline::QueryPipeline;
use dataset_search_core::session::ResultsSessions;
use dataset_search_core::store::{memory::InMemorySessionStore, SessionStore};

use crate::cache::FileCache;
use crate::catalogue::HttpCatalogue;
use crate::config::Config;
use crate::db;
use crate::file_host::{HttpFileHost, LoginCredentials};
use crate::generator::create_generator;
use crate::metadata::MetadataStore;
use crate::retriever::HttpRetriever;
use crate::sqlite_store::SqliteSessionStore;
use crate::sync::SyncEngine;

/// Open the session store selected by `[sessions].backend`.
pub async fn open_session_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    match config.sessions.backend.as_str() {
        "memory" => Ok(Arc::new(InMemorySessionStore::new())),
        "sqlite" => {
            let path = config.data.sessions_db();
            let pool = db::connect(&path)
                .await
                .with_context(|| format!("Failed to open session database: {}", path.display()))?;
            db::run_migrations(&pool).await?;
            Ok(Arc::new(SqliteSessionStore::new(pool)))
        }
        other => anyhow::bail!("Unknown sessions backend: {}", other),
    }
}

pub async fn build_pipeline(config: &Config) -> Result<QueryPipeline> {
    let store = open_session_store(config).await?;
    let sessions = ResultsSessions::new(store, config.sessions.retention());
    let retriever = HttpRetriever::new(&config.retrieval, MetadataStore::new(&config.data.dir))?;
    let generator = create_generator(&config.generator)?;

    Ok(QueryPipeline::new(
        Arc::new(retriever),
        generator,
        sessions,
        config.retrieval.query_defaults()?,
    ))
}

pub fn build_sync_engine(config: &Config) -> Result<SyncEngine> {
    let source = HttpCatalogue::new(&config.catalogue)?;
    let host = HttpFileHost::new(&config.catalogue.login_url, config.catalogue.timeout_secs)?;
    let credentials = LoginCredentials::from_env();
    if credentials.is_none() {
        tracing::warn!("CATALOGUE_USERNAME/CATALOGUE_PASSWORD not set, file downloads will fail");
    }

    Ok(SyncEngine::new(
        Arc::new(source),
        Arc::new(host),
        credentials,
        MetadataStore::new(&config.data.dir),
        FileCache::new(config.data.cache_dir()),
    ))
}
