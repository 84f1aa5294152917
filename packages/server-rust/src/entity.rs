//! Explicit registry of entity definitions and their repositories.
//!
//! Entities are registered by name at startup. A [`Repository`] binds an
//! entity definition to a [`BlockingClient`], creating the backing table on
//! first use and validating content before every save.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tabula_core::{Content, Filters, IndexSpec};
use tracing::{debug, info};

use crate::bridge::BlockingClient;
use crate::operation::OperationError;

/// Content check run before a save. `Err` carries the rejection reason.
pub type Validator = Arc<dyn Fn(&Content) -> Result<(), String> + Send + Sync>;

/// Definition of one entity: its table, indexes and optional validator.
#[derive(Clone)]
pub struct EntityDef {
    name: String,
    table: String,
    indexes: IndexSpec,
    validator: Option<Validator>,
}

impl EntityDef {
    /// An entity stored in a table of the same name with no indexes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            indexes: IndexSpec::new(),
            validator: None,
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Declares an index on `field`.
    #[must_use]
    pub fn index(mut self, field: impl Into<String>, unique: bool) -> Self {
        self.indexes.insert(field.into(), unique);
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Content) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn indexes(&self) -> &IndexSpec {
        &self.indexes
    }

    fn validate(&self, content: &Content) -> Result<(), OperationError> {
        match &self.validator {
            Some(validator) => validator(content).map_err(|reason| OperationError::Validation {
                entity: self.name.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("indexes", &self.indexes)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Name-keyed entity definitions.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    by_name: DashMap<String, Arc<EntityDef>>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `def`. Returns `false` and keeps the existing definition
    /// if the name is taken.
    pub fn register(&self, def: EntityDef) -> bool {
        let name = def.name.clone();
        match self.by_name.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(entity = %def.name, table = %def.table, "entity registered");
                slot.insert(Arc::new(def));
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns a repository for entity `name` driven by `client`.
    #[must_use]
    pub fn repository(&self, name: &str, client: BlockingClient) -> Option<Repository> {
        self.get(name).map(|def| Repository::new(def, client))
    }
}

/// Typed access to one entity's table.
#[derive(Debug)]
pub struct Repository {
    def: Arc<EntityDef>,
    client: BlockingClient,
    initialized: AtomicBool,
}

impl Repository {
    #[must_use]
    pub fn new(def: Arc<EntityDef>, client: BlockingClient) -> Self {
        Self {
            def,
            client,
            initialized: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn entity(&self) -> &EntityDef {
        &self.def
    }

    /// Creates the backing table unless a previous call already did.
    fn ensure_table(&self) -> Result<(), OperationError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.client
            .create_table(&self.def.table, self.def.indexes.clone())?;
        if !self.initialized.swap(true, Ordering::AcqRel) {
            debug!(entity = %self.def.name, table = %self.def.table, "entity table ready");
        }
        Ok(())
    }

    /// Runs `call` against the backing table, creating it first if needed.
    ///
    /// If the table was dropped since it was created, it is created again
    /// and `call` retried once.
    fn with_table<T>(
        &self,
        mut call: impl FnMut() -> Result<T, OperationError>,
    ) -> Result<T, OperationError> {
        self.ensure_table()?;
        match call() {
            Err(OperationError::TableNotFound { .. }) => {
                debug!(entity = %self.def.name, table = %self.def.table, "entity table gone, recreating");
                self.initialized.store(false, Ordering::Release);
                self.ensure_table()?;
                call()
            }
            outcome => outcome,
        }
    }

    /// Validates and saves `content`, returning the stored content.
    ///
    /// # Errors
    ///
    /// [`OperationError::Validation`] if the validator rejects the content,
    /// otherwise any error of [`BlockingClient::save`].
    pub fn save(&self, content: Content) -> Result<Content, OperationError> {
        self.def.validate(&content)?;
        self.with_table(|| self.client.save(&self.def.table, content.clone()))
    }

    /// Returns the entity's records matching any of `filters`.
    ///
    /// # Errors
    ///
    /// See [`BlockingClient::get`].
    pub fn get(&self, filters: Filters) -> Result<Vec<Content>, OperationError> {
        self.with_table(|| self.client.get(&self.def.table, filters.clone()))
    }

    /// Deletes the record `id`.
    ///
    /// # Errors
    ///
    /// See [`BlockingClient::delete`].
    pub fn remove(&self, id: &str) -> Result<(), OperationError> {
        self.with_table(|| self.client.delete(&self.def.table, id))
    }
}

#[cfg(test)]
mod tests {
    use tabula_core::{content, Value, ID_FIELD};

    use super::*;
    use crate::config::ServerConfig;
    use crate::server::TabulaServer;

    fn car() -> EntityDef {
        EntityDef::new("car")
            .table("cars")
            .index("reg_no", true)
            .index("colour", false)
            .validator(|content| match content.get("reg_no") {
                Some(Value::String(reg)) if !reg.is_empty() => Ok(()),
                _ => Err("reg_no is required".to_string()),
            })
    }

    #[test]
    fn register_keeps_first_definition() {
        let registry = EntityRegistry::new();
        assert!(registry.register(car()));
        assert!(!registry.register(EntityDef::new("car")));
        assert_eq!(registry.get("car").unwrap().table_name(), "cars");
        assert_eq!(registry.names(), vec!["car".to_string()]);
        assert!(registry.get("boat").is_none());
    }

    #[test]
    fn repository_creates_table_and_validates() {
        let server = TabulaServer::start(ServerConfig::default()).unwrap();
        let registry = EntityRegistry::new();
        registry.register(car());
        let cars = registry.repository("car", server.client()).unwrap();

        let err = cars.save(content! { "colour" => "red" }).unwrap_err();
        assert_eq!(
            err,
            OperationError::Validation {
                entity: "car".to_string(),
                reason: "reg_no is required".to_string(),
            }
        );
        // Rejected content never reaches the store.
        assert_eq!(server.table_count(), 0);

        let saved = cars
            .save(content! { "reg_no" => "KA-01", "colour" => "red" })
            .unwrap();
        assert_eq!(server.table_count(), 1);
        assert!(matches!(
            cars.save(content! { "reg_no" => "KA-01" }),
            Err(OperationError::DuplicateEntity { .. })
        ));

        let mut filters = Filters::new();
        filters.insert("colour".to_string(), Value::from("red"));
        assert_eq!(cars.get(filters).unwrap().len(), 1);

        let id = saved[ID_FIELD].as_str().unwrap();
        cars.remove(id).unwrap();
        assert!(cars.get(Filters::new()).unwrap().is_empty());
        server.shutdown();
    }

    #[test]
    fn repository_recreates_a_dropped_table() {
        let server = TabulaServer::start(ServerConfig::default()).unwrap();
        let registry = EntityRegistry::new();
        registry.register(car());
        let cars = registry.repository("car", server.client()).unwrap();

        cars.save(content! { "reg_no" => "KA-01" }).unwrap();
        server.client().drop_table("cars").unwrap();

        assert!(cars.get(Filters::new()).unwrap().is_empty());
        cars.save(content! { "reg_no" => "KA-01" }).unwrap();
        assert!(matches!(
            cars.save(content! { "reg_no" => "KA-01" }),
            Err(OperationError::DuplicateEntity { .. })
        ));
        server.shutdown();
    }

    #[test]
    fn repository_for_unknown_entity_is_none() {
        let server = TabulaServer::start(ServerConfig::default()).unwrap();
        let registry = EntityRegistry::new();
        assert!(registry.repository("ghost", server.client()).is_none());
        server.shutdown();
    }
}
