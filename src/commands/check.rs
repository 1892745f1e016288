use crate::commands::{nlu_for, open_store, Out};
use crate::store::Store;
use crate::{Config, Mode, Result};
use anyhow::bail;
use serde::Serialize;
use tracing::{info, warn};

/// Whether each collaborator answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub store: bool,
    pub nlu: bool,
}

/// Validates the configuration and checks that the ledger and the NLU service can be reached.
pub async fn check(config: Config, mode: Mode) -> Result<Out<Health>> {
    config.validate(mode)?;

    let store = open_store(&config).await?;
    let store_ok = match store.health().await {
        Ok(()) => true,
        Err(e) => {
            warn!("The ledger is not healthy: {e}");
            false
        }
    };
    store.close().await;

    let nlu = nlu_for(&config, mode)?;
    let nlu_ok = match tokio::time::timeout(config.nlu_timeout(), nlu.health()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("The {} NLU is not healthy: {e}", nlu.name());
            false
        }
        Err(_) => {
            warn!("The {} NLU did not answer in time", nlu.name());
            false
        }
    };

    let health = Health {
        store: store_ok,
        nlu: nlu_ok,
    };
    if !(store_ok && nlu_ok) {
        bail!("Collaborator check failed: {health:?}");
    }
    info!("Ledger at {}", config.sqlite_path().display());
    Ok(Out::new("All collaborators are reachable", health))
}
