// Wiring: builds the shared runtime (store, cache, provider cascade, file
// storage) from `Config`, the way the teacher's `AppState::new` assembles its
// collaborators (Design Notes §9 — constructor-injected, not singletons).
use crate::cache::CacheStore;
use crate::config::Config;
use crate::file_storage::{self, FileStorage};
use crate::orchestrator::ProviderSlot;
use crate::providers::{LastResortProvider, PrimaryProvider, SecondaryProvider, TertiaryProvider};
use crate::storage::{self, Store};
use anyhow::Result;
use std::sync::Arc;

pub struct App {
    pub store: Arc<dyn Store>,
    pub cache: Arc<CacheStore>,
    pub providers: Vec<ProviderSlot>,
    pub file_storage: Arc<dyn FileStorage>,
}

impl App {
    pub fn build(config: &Config) -> Result<Self> {
        let store = storage::build_store(&config.storage)?;
        store.ensure_initialized()?;
        let cache = Arc::new(CacheStore::new(store.clone()));
        let file_storage = file_storage::build_file_storage(&config.file_storage);
        let providers = build_providers(config);
        Ok(Self { store, cache, providers, file_storage })
    }
}

fn build_providers(config: &Config) -> Vec<ProviderSlot> {
    let http = reqwest::Client::new();
    let p = &config.providers;
    let max_chars = config.parser.prompt_injection_max_chars;

    vec![
        ProviderSlot {
            provider: Arc::new(PrimaryProvider::new(
                http.clone(),
                p.primary.api_keys.clone(),
                p.primary.base_url.clone(),
                p.primary.model.clone(),
                max_chars,
            )),
            max_retries: p.primary.max_retries,
            max_batch_size: p.primary.batch_size,
        },
        ProviderSlot {
            provider: Arc::new(SecondaryProvider::new(
                http.clone(),
                p.secondary.api_keys.clone(),
                p.secondary.base_url.clone(),
                p.secondary.model.clone(),
                max_chars,
            )),
            max_retries: p.secondary.max_retries,
            max_batch_size: p.secondary.batch_size,
        },
        ProviderSlot {
            provider: Arc::new(TertiaryProvider::new(
                http.clone(),
                p.tertiary.api_keys.clone(),
                p.tertiary.base_url.clone(),
                p.tertiary.model.clone(),
                max_chars,
            )),
            max_retries: p.tertiary.max_retries,
            max_batch_size: p.tertiary.batch_size,
        },
        ProviderSlot {
            provider: Arc::new(LastResortProvider::new(
                http,
                p.last_resort.api_keys.clone(),
                p.last_resort.base_url.clone(),
                p.last_resort.model.clone(),
                max_chars,
            )),
            max_retries: p.last_resort.max_retries,
            max_batch_size: p.last_resort.batch_size,
        },
    ]
}
