//! Startup: open the database, build the engine, restore bookkeeping and
//! create any configured scopes that do not exist yet.

use std::sync::Arc;

use bossfight_core::persistence::Store;
use bossfight_core::{Clock, Engine, Scope};
use tracing::info;

use crate::config::{ScopeSeed, ServiceConfig};
use crate::error::Result;

/// Open the configured store and build a restored engine on top of it.
///
/// # Errors
///
/// Fails on invalid configuration or if the database cannot be opened.
pub fn bootstrap(config: &ServiceConfig, clock: Arc<dyn Clock>) -> Result<(Arc<Engine>, Store)> {
    config.validate()?;
    let mut store = Store::open(&config.service.database_path, &config.engine.persistence)?;
    let engine = Engine::new(config.engine.clone(), clock)?;
    engine.restore(&store)?;
    let created = seed_scopes(&mut store, &engine, &config.service.scopes)?;
    info!(
        db = %store.db_path().display(),
        created = created.len(),
        active = engine.registry.active().len(),
        "Service bootstrapped"
    );
    Ok((Arc::new(engine), store))
}

/// Create each seed whose guild has no active scope of the same kind.
///
/// # Errors
///
/// Returns the storage error that stopped scope creation.
pub fn seed_scopes(store: &mut Store, engine: &Engine, seeds: &[ScopeSeed]) -> Result<Vec<Scope>> {
    let mut created = Vec::new();
    for seed in seeds {
        let exists = store
            .active_scopes()?
            .iter()
            .any(|s| s.guild == seed.guild && s.kind == seed.kind);
        if exists {
            continue;
        }
        let hp_max = seed.resolved_hp(engine.config.pool.hp_per_thousand_users);
        let scope = store.create_scope(seed.guild, seed.kind, &seed.name, hp_max, engine.clock.now())?;
        engine.activate(&scope);
        info!(scope = %scope.id, guild = %scope.guild, name = %scope.name, hp_max, "Scope created");
        created.push(scope);
    }
    Ok(created)
}
