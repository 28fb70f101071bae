use crate::cleaner::{CleanerHook, ConditionsCleaner};
use crate::config::CondConfig;
use crate::container::{CondContainer, ContainerId, ContainerParts};
use crate::mixed::MixedCondCont;
use crate::registry::ClassRegistry;
use crate::single::SingleCondCont;
use crate::typed::CondCont;
use cond_error::{CondError, Result};
use cond_rcu::{RcuDomain, Updater};
use cond_types::ClassId;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Factory and catalogue of the containers of one process.
///
/// Every container shares the store's updater, array capacity and cleaner.
pub struct ConditionsStore {
    registry: Arc<ClassRegistry>,
    updater: Arc<dyn Updater>,
    config: CondConfig,
    cleaner: Option<Arc<dyn CleanerHook>>,
    containers: RwLock<BTreeMap<ContainerId, Arc<dyn CondContainer>>>,
}

impl fmt::Debug for ConditionsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionsStore")
            .field("config", &self.config)
            .field("containers", &self.containers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ConditionsStore {
    /// Store using `updater` for every container, without a cleaner.
    pub fn new(registry: Arc<ClassRegistry>, updater: Arc<dyn Updater>, config: CondConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            updater,
            config,
            cleaner: None,
            containers: RwLock::new(BTreeMap::new()),
        })
    }

    /// Store backed by an [`RcuDomain`] sized from `config`, with a
    /// [`ConditionsCleaner`] attached. Returns the cleaner so the event loop
    /// can drive it.
    pub fn with_rcu(registry: Arc<ClassRegistry>, config: CondConfig) -> Result<(Self, Arc<ConditionsCleaner>)> {
        config.validate()?;
        let updater: Arc<dyn Updater> =
            Arc::new(RcuDomain::with_backlog_warn(config.slots, config.backlog_warn));
        let cleaner = Arc::new(ConditionsCleaner::new(config.cleaner.clone(), Arc::clone(&updater)));
        let hook = Arc::clone(&cleaner) as Arc<dyn CleanerHook>;
        let store = Self::new(registry, updater, config)?.with_cleaner(hook);
        Ok((store, cleaner))
    }

    /// Hook notified by every container created afterwards.
    #[must_use]
    pub fn with_cleaner(mut self, cleaner: Arc<dyn CleanerHook>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    /// Container for `(class, key)`, created on first request as single or
    /// mixed according to the class declaration.
    pub fn create(&self, class: ClassId, key: &str) -> Result<Arc<dyn CondContainer>> {
        let info = self.registry.info(class)?;
        let id = ContainerId::new(class, key);
        let mut containers = self.containers.write();
        if let Some(existing) = containers.get(&id) {
            return Ok(Arc::clone(existing));
        }

        let parts = ContainerParts {
            registry: Arc::clone(&self.registry),
            updater: Arc::clone(&self.updater),
            capacity: self.config.capacity,
            cleaner: self.cleaner.clone(),
        };
        let container: Arc<dyn CondContainer> = if info.mixed {
            MixedCondCont::create(id.clone(), parts)
        } else {
            SingleCondCont::create(id.clone(), parts)
        };
        info!(
            target: "cond::condcont",
            container = %id,
            class_name = info.name,
            mixed = info.mixed,
            "condcont_created"
        );
        containers.insert(id, Arc::clone(&container));
        Ok(container)
    }

    /// Create (or fetch) the container of `T`'s own class under `key`.
    pub fn create_typed<T: Any + Send + Sync>(&self, key: &str) -> Result<CondCont<T>> {
        let class = self.registry.class_of::<T>()?;
        CondCont::new(self.create(class, key)?, &self.registry)
    }

    /// View an existing container as `T`, which must be its class or a base.
    pub fn view<T: Any + Send + Sync>(&self, class: ClassId, key: &str) -> Result<CondCont<T>> {
        let container = self
            .get(class, key)
            .ok_or_else(|| CondError::UnknownClass(format!("no container {}", ContainerId::new(class, key))))?;
        CondCont::new(container, &self.registry)
    }

    #[must_use]
    pub fn get(&self, class: ClassId, key: &str) -> Option<Arc<dyn CondContainer>> {
        self.containers.read().get(&ContainerId::new(class, key)).cloned()
    }

    /// All containers, ordered by identity.
    #[must_use]
    pub fn containers(&self) -> Vec<Arc<dyn CondContainer>> {
        self.containers.read().values().cloned().collect()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn updater(&self) -> &Arc<dyn Updater> {
        &self.updater
    }

    #[must_use]
    pub fn config(&self) -> &CondConfig {
        &self.config
    }
}
