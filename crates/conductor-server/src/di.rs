//! Dependency injection module using Shaku.
//!
//! The durable side of the process: database pool, job store and the
//! submission service. Redis-backed components are built directly because
//! their pool is shared between the lock store and the work queue.

use conductor_jobs::{JobService, JobServiceImpl};
use conductor_repository::{
    DatabasePool, DatabasePoolInterface, DatabasePoolParameters, JobStore, MySqlJobStore,
};
use shaku::{module, HasComponent};
use std::sync::Arc;

module! {
    pub ConductorModule {
        components = [
            DatabasePool,
            MySqlJobStore,
            JobServiceImpl,
        ],
        providers = [],
    }
}

/// Builds the module around an already connected pool.
pub fn build_module(pool: &DatabasePool) -> Arc<ConductorModule> {
    let module = ConductorModule::builder()
        .with_component_parameters::<DatabasePool>(DatabasePoolParameters {
            pool: pool.inner().clone(),
        })
        .build();

    Arc::new(module)
}

/// Resolves the shared components from the module.
pub trait StoreResolver {
    fn database_pool(&self) -> Arc<dyn DatabasePoolInterface>;

    fn job_store(&self) -> Arc<dyn JobStore>;

    fn job_service(&self) -> Arc<dyn JobService>;
}

impl StoreResolver for ConductorModule {
    fn database_pool(&self) -> Arc<dyn DatabasePoolInterface> {
        self.resolve()
    }

    fn job_store(&self) -> Arc<dyn JobStore> {
        self.resolve()
    }

    fn job_service(&self) -> Arc<dyn JobService> {
        self.resolve()
    }
}
