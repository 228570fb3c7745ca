use std::sync::Arc;

use anyhow::{Context, Result};
use quicklist_core::remote::QueryIds;
use quicklist_core::{
    CookieCredentials, CoreConfig, Engine, GraphqlRemote, InMemoryRemote, RemoteService,
    SettingsStore, Visibility,
};

use super::config::CliConfig;

/// Signed-in cookie for the sample graph.
const OFFLINE_COOKIE: &str = "ct0=offline; twid=u%3D1";

/// Everything one CLI invocation works with.
pub struct App {
    pub config: CoreConfig,
    pub settings: SettingsStore,
    pub engine: Engine,
    pub credentials: Arc<CookieCredentials>,
    pub offline: bool,
}

impl App {
    pub fn from_config(cli: &CliConfig) -> Result<Self> {
        let config = cli.core_config();
        let settings = SettingsStore::open(&config.data_dir).with_context(|| {
            format!("Failed to open settings in {}", config.data_dir.display())
        })?;

        let credentials = Arc::new(CookieCredentials::from_header(if cli.offline {
            OFFLINE_COOKIE.to_string()
        } else {
            cli.cookie_header().unwrap_or_default()
        }));

        let remote: Arc<dyn RemoteService> = if cli.offline {
            tracing::info!("offline mode, using the sample graph");
            Arc::new(sample_graph())
        } else {
            let query_ids = QueryIds {
                delete_list: cli.delete_list_query_id.clone(),
                ..QueryIds::default()
            };
            Arc::new(
                GraphqlRemote::new(cli.host())
                    .with_cookies(credentials.clone())
                    .with_query_ids(query_ids),
            )
        };

        let engine = Engine::open(&config, &settings, remote, credentials.clone())
            .context("Failed to open membership cache")?;

        Ok(Self {
            config,
            settings,
            engine,
            credentials,
            offline: cli.offline,
        })
    }
}

/// A small fixed graph for trying the tool without an account.
fn sample_graph() -> InMemoryRemote {
    let remote = InMemoryRemote::new();
    remote.add_user("ferris", "1001");
    remote.add_user("rustlang", "1002");
    remote.add_user("tokio_rs", "1003");

    remote.add_list("5001", "Rustaceans", Visibility::Private);
    remote.add_list("5002", "Async", Visibility::Private);
    remote.add_list("5003", "Announcements", Visibility::Public);
    remote.add_list("5004", "Read later", Visibility::Private);

    remote.seed_member("5001", "1001");
    remote.seed_member("5002", "1003");
    remote
}
