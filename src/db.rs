//! The collection manager.
//!
//! A [`Db`] owns the data root plus the two persistent registries,
//! the free-space map and the schema registry, and dispatches parsed
//! actions against them. One mutex guards the registries; it is taken
//! once per action, which matches the single-writer model: block-file
//! rewrites dominate the cost of an action, so finer locking would
//! buy nothing.

use std::fs;

use log::{debug, info};
use parking_lot::Mutex;

use crate::action::{AMBIENT_IDS, Action, ActionResult, Filter, OrderDir, Target};
use crate::collection;
use crate::config::Config;
use crate::errors::{CeresError, Result};
use crate::freelist::FreeList;
use crate::query;
use crate::record::Record;
use crate::schema::{CollectionSchema, SchemaRegistry};

struct State {
    freelist: FreeList,
    schema: SchemaRegistry,
}

/// A ceres instance rooted at one data directory.
pub struct Db {
    config: Config,
    state: Mutex<State>,
}

// Database and collection names become directory names; the dot is
// reserved as the identifier separator.
fn check_name(kind: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.contains(['.', '/', '\\'])
        && name != "-";
    if ok {
        Ok(())
    } else {
        Err(CeresError::Parse(format!("invalid {kind} name '{name}'")))
    }
}

impl Db {
    /// Opens the data root named by the config, creating it on first
    /// use, and loads the persisted registries.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| CeresError::at_path(&config.data_dir, e))?;

        let freelist = FreeList::load(&config)?;
        let schema = SchemaRegistry::load(&config)?;
        info!("opened data root {}", config.data_dir.display());

        Ok(Self {
            config,
            state: Mutex::new(State { freelist, schema }),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// ProcessAction dispatches one parsed action. `ambient_ids` is
    /// the id list a preceding GET produced; PATCH and DELETE can
    /// target it through the `"-"` sentinel.
    pub fn process_action(
        &self,
        action: Action,
        ambient_ids: &[String],
    ) -> Result<ActionResult> {
        debug!("processing {} action", action.kind());
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match action {
            Action::DbAdd { database } => {
                self.create_database_locked(&database)?;
                Ok(ActionResult::None)
            }
            Action::DbDel { database } => {
                self.delete_database_locked(state, &database)?;
                Ok(ActionResult::None)
            }
            Action::ColAdd { target, schema } => {
                self.create_collection_locked(state, &target, schema)?;
                Ok(ActionResult::None)
            }
            Action::ColDel { target } => {
                self.delete_collection_locked(state, &target)?;
                Ok(ActionResult::None)
            }
            Action::Post { target, data } => {
                let ids = collection::write(
                    &self.config,
                    &mut state.freelist,
                    &state.schema,
                    &target.database,
                    &target.collection,
                    &data,
                )?;
                Ok(ActionResult::Ids(ids))
            }
            Action::Get {
                target,
                filter,
                fields,
                order,
                order_dir,
                limit,
            } => {
                let records = self.get_locked(
                    state,
                    &target,
                    filter.as_ref(),
                    &fields,
                    order.as_deref(),
                    order_dir,
                    limit,
                )?;
                Ok(ActionResult::Records(records))
            }
            Action::Put { target, data } => {
                collection::overwrite(
                    &self.config,
                    &state.schema,
                    &target.database,
                    &target.collection,
                    &data,
                )?;
                Ok(ActionResult::None)
            }
            Action::Patch { target, ids, patch } => {
                let ids = resolve_ids(ids, ambient_ids);
                collection::patch(
                    &self.config,
                    &state.schema,
                    &target.database,
                    &target.collection,
                    &ids,
                    &patch,
                )?;
                Ok(ActionResult::None)
            }
            Action::Delete { target, ids } => {
                let ids = resolve_ids(ids, ambient_ids);
                collection::delete(
                    &self.config,
                    &mut state.freelist,
                    &target.database,
                    &target.collection,
                    &ids,
                )?;
                Ok(ActionResult::None)
            }
        }
    }

    /// CreateDatabase makes room for collections under `name`.
    pub fn create_database(&self, name: &str) -> Result<()> {
        let _state = self.state.lock();
        self.create_database_locked(name)
    }

    /// DeleteDatabase removes a database and every collection in it.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.delete_database_locked(state, name)
    }

    /// CreateCollection opens a collection with its declared fields.
    pub fn create_collection(
        &self,
        database: &str,
        collection: &str,
        schema: CollectionSchema,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.create_collection_locked(state, &Target::new(database, collection), schema)
    }

    /// DeleteCollection removes a collection, its block files, and
    /// its registry entries.
    pub fn delete_collection(&self, database: &str, collection: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.delete_collection_locked(state, &Target::new(database, collection))
    }

    /// Read fetches records by id, in on-disk order.
    pub fn read(&self, database: &str, collection: &str, ids: &[String]) -> Result<Vec<Record>> {
        let _state = self.state.lock();
        collection::read(&self.config, database, collection, ids)
    }

    /// Write inserts records and returns their assigned ids.
    pub fn write(
        &self,
        database: &str,
        collection: &str,
        records: &[Record],
    ) -> Result<Vec<String>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        collection::write(
            &self.config,
            &mut state.freelist,
            &state.schema,
            database,
            collection,
            records,
        )
    }

    /// Patch shallow-merges one patch object over each targeted
    /// record.
    pub fn patch(
        &self,
        database: &str,
        collection: &str,
        ids: &[String],
        patch: &Record,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        collection::patch(&self.config, &state.schema, database, collection, ids, patch)
    }

    /// OverWrite replaces records that carry their own `.id`.
    pub fn overwrite(
        &self,
        database: &str,
        collection: &str,
        records: &[Record],
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        collection::overwrite(&self.config, &state.schema, database, collection, records)
    }

    /// Delete removes records by id and frees their slots.
    pub fn delete(&self, database: &str, collection: &str, ids: &[String]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        collection::delete(&self.config, &mut state.freelist, database, collection, ids)
    }

    /// ProcessFilter evaluates a filter tree to a sorted id set
    /// without touching storage.
    pub fn process_filter(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<String>> {
        let guard = self.state.lock();
        let state = &*guard;
        query::process_filter(&self.config, &state.schema, database, collection, filter)
    }

    fn create_database_locked(&self, name: &str) -> Result<()> {
        check_name("database", name)?;
        let dir = self.config.database_dir(name);
        fs::create_dir(&dir).map_err(|e| CeresError::at_path(&dir, e))?;
        info!("created database {name}");
        Ok(())
    }

    fn delete_database_locked(&self, state: &mut State, name: &str) -> Result<()> {
        check_name("database", name)?;
        let dir = self.config.database_dir(name);
        fs::remove_dir_all(&dir).map_err(|e| CeresError::at_path(&dir, e))?;
        state.freelist.drop_database(name);
        state.schema.drop_database(name);
        state.freelist.persist(&self.config)?;
        state.schema.persist(&self.config)?;
        info!("deleted database {name}");
        Ok(())
    }

    fn create_collection_locked(
        &self,
        state: &mut State,
        target: &Target,
        schema: CollectionSchema,
    ) -> Result<()> {
        check_name("database", &target.database)?;
        check_name("collection", &target.collection)?;
        let db_dir = self.config.database_dir(&target.database);
        if !db_dir.is_dir() {
            return Err(CeresError::Path(db_dir));
        }
        let dir = self
            .config
            .collection_dir(&target.database, &target.collection);
        fs::create_dir(&dir).map_err(|e| CeresError::at_path(&dir, e))?;
        state
            .schema
            .define(&target.database, &target.collection, schema);
        state.schema.persist(&self.config)?;
        info!("created collection {}.{}", target.database, target.collection);
        Ok(())
    }

    fn delete_collection_locked(&self, state: &mut State, target: &Target) -> Result<()> {
        check_name("database", &target.database)?;
        check_name("collection", &target.collection)?;
        let dir = self
            .config
            .collection_dir(&target.database, &target.collection);
        fs::remove_dir_all(&dir).map_err(|e| CeresError::at_path(&dir, e))?;
        state
            .freelist
            .drop_collection(&target.database, &target.collection);
        state
            .schema
            .drop_collection(&target.database, &target.collection);
        state.freelist.persist(&self.config)?;
        state.schema.persist(&self.config)?;
        info!("deleted collection {}.{}", target.database, target.collection);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn get_locked(
        &self,
        state: &State,
        target: &Target,
        filter: Option<&Filter>,
        fields: &[String],
        order: Option<&str>,
        order_dir: OrderDir,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let (database, collection) = (&target.database, &target.collection);
        let ids = match filter {
            Some(filter) => {
                query::process_filter(&self.config, &state.schema, database, collection, filter)?
            }
            None => query::occupied_ids(&self.config, database, collection)?,
        };

        let mut records = collection::read(&self.config, database, collection, &ids)?;
        if let Some(field) = order {
            records = match order_dir {
                OrderDir::Asc => query::do_order_asc(records, field),
                OrderDir::Dsc => query::do_order_dsc(records, field),
            };
        }
        let mut records = query::project(records, fields);
        if limit > 0 && records.len() > limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

// The `["-"]` sentinel stands for the ambient id list.
fn resolve_ids(ids: Vec<String>, ambient: &[String]) -> Vec<String> {
    if ids.len() == 1 && ids[0] == AMBIENT_IDS {
        ambient.to_vec()
    } else {
        ids
    }
}
