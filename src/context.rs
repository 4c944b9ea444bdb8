use std::path::Path;

use crate::api::{self, ApiClient};
use crate::auth::Session;
use crate::config::{ConfigStore, Endpoints};
use crate::output::OutputFormat;
use crate::update::{Updater, ARCHIVE_TEMPLATE, BINARY_TEMPLATE};

/// Everything a command handler needs, built once per process.
pub struct Context {
    pub session: Session,
    pub updater: Updater,
    pub format: OutputFormat,
    pub skip_update_check: bool,
}

impl Context {
    /// Wire the shared HTTP client into the transport and the updater.
    ///
    /// With `require_config` unset, an unreadable config file is replaced by
    /// a detached store instead of failing.
    pub fn build(
        config_path: &Path,
        endpoints: &Endpoints,
        format: OutputFormat,
        require_config: bool,
    ) -> anyhow::Result<Self> {
        let store = match ConfigStore::load(config_path) {
            Ok(store) => store,
            Err(e) if !require_config => {
                tracing::warn!(error = %e, "ignoring unreadable config");
                ConfigStore::detached(config_path)
            }
            Err(e) => return Err(e.into()),
        };
        let client = api::http_client()?;

        let template = if endpoints.release_archive {
            ARCHIVE_TEMPLATE
        } else {
            BINARY_TEMPLATE
        };
        let updater = Updater::new(
            client.clone(),
            &endpoints.release_url,
            env!("CARGO_PKG_VERSION"),
        )
        .with_binary_template(template);

        Ok(Context {
            session: Session::new(ApiClient::new(client, &endpoints.api_url), store),
            updater,
            format,
            skip_update_check: endpoints.skip_update_check,
        })
    }
}
