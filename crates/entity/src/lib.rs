use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use drivers::{Prepared, SharedCursor};
use record::{normalize, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read entity state from {path}")]
    Read {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to write entity state to {path}")]
    Write {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error("entity state in {path} is not valid")]
    Decode {
        path: String,
        #[source]
        err: serde_json::Error,
    },
    #[error(transparent)]
    Cursor(#[from] drivers::Error),
}

/// The resolution state of one secondary identifier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryId {
    Unresolved,
    Resolved(Value),
    Error(String),
}

impl SecondaryId {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, SecondaryId::Unresolved)
    }
}

/// Aggregate status, derived from the secondary ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Resolved,
    Error,
    Skipped,
}

/// One imported entity: a primary id that never changes, and the secondary
/// ids being resolved against internal systems, each moving independently
/// through unresolved, resolved, or error.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Entity {
    primary: String,
    secondary: BTreeMap<String, SecondaryId>,
    skipped: bool,
    #[serde(default)]
    notes: Vec<String>,
}

impl Entity {
    fn new<S: AsRef<str>>(primary: impl Into<String>, secondaries: &[S]) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondaries
                .iter()
                .map(|name| (name.as_ref().to_string(), SecondaryId::Unresolved))
                .collect(),
            skipped: false,
            notes: Vec::new(),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn secondary(&self, name: &str) -> Option<&SecondaryId> {
        self.secondary.get(name)
    }

    pub fn secondaries(&self) -> impl Iterator<Item = (&str, &SecondaryId)> {
        self.secondary.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn status(&self) -> Status {
        if self.skipped {
            return Status::Skipped;
        }
        let mut pending = false;
        for state in self.secondary.values() {
            match state {
                SecondaryId::Error(_) => return Status::Error,
                SecondaryId::Unresolved => pending = true,
                SecondaryId::Resolved(_) => {}
            }
        }
        if pending {
            Status::Pending
        } else {
            Status::Resolved
        }
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Mark the entity skipped; its secondaries stop resolving.
    pub fn skip(&mut self, note: impl Into<String>) {
        self.skipped = true;
        self.notes.push(note.into());
    }

    fn resolve(&mut self, name: &str, value: Value) {
        if let Some(state) = self.secondary.get_mut(name) {
            *state = SecondaryId::Resolved(value);
        }
    }

    fn fail(&mut self, name: &str, message: &str) {
        if let Some(state) = self.secondary.get_mut(name) {
            if state.is_unresolved() {
                *state = SecondaryId::Error(message.to_string());
            }
        }
    }
}

/// A resolver: a prepared reference query which fills some of an entity's
/// secondary ids. It binds `:primary_id`, any already-resolved secondary by
/// name, and the normalized fields of the source row.
pub struct Resolver {
    name: String,
    targets: Vec<String>,
    cursor: SharedCursor,
    prepared: Prepared,
}

impl Resolver {
    pub fn new(
        name: impl Into<String>,
        targets: Vec<String>,
        cursor: SharedCursor,
        prepared: Prepared,
    ) -> Self {
        Self {
            name: name.into(),
            targets,
            cursor,
            prepared,
        }
    }
}

/// EntityManager drives a multi-stage, resumable import: entities are created
/// on first encounter of a primary id, resolvers run for still-unresolved
/// secondary ids, and the whole map round-trips to disk so a long-running
/// import can resume after interruption. Single-threaded and idempotent on
/// identical inputs.
pub struct EntityManager {
    secondaries: Vec<String>,
    entities: HashMap<String, Entity>,
    resolvers: Vec<Resolver>,
}

impl EntityManager {
    pub fn new<I, S>(secondaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secondaries: secondaries.into_iter().map(Into::into).collect(),
            entities: HashMap::new(),
            resolvers: Vec::new(),
        }
    }

    pub fn add_resolver(&mut self, resolver: Resolver) {
        self.resolvers.push(resolver);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, primary: &str) -> Option<&Entity> {
        self.entities.get(primary)
    }

    pub fn entity_mut(&mut self, primary: &str) -> Option<&mut Entity> {
        self.entities.get_mut(primary)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Fetch or create the entity for `primary`, then run every resolver
    /// which still has unresolved targets. A resolver's database error marks
    /// its targets errored and the run continues.
    pub fn process_row(&mut self, primary: &str, source_row: &record::Record) -> &Entity {
        let entity = self
            .entities
            .entry(primary.to_string())
            .or_insert_with(|| Entity::new(primary, &self.secondaries));

        if entity.skipped {
            return entity;
        }

        for resolver in &self.resolvers {
            let unresolved: Vec<&String> = resolver
                .targets
                .iter()
                .filter(|t| {
                    entity
                        .secondary
                        .get(t.as_str())
                        .map_or(false, SecondaryId::is_unresolved)
                })
                .collect();
            if unresolved.is_empty() {
                continue;
            }

            let mut params: HashMap<String, Value> = source_row
                .keys_normalized()
                .iter()
                .cloned()
                .zip(source_row.iter().cloned())
                .collect();
            for (name, state) in &entity.secondary {
                if let SecondaryId::Resolved(value) = state {
                    params.insert(normalize(name), value.clone());
                }
            }
            params.insert("primary_id".to_string(), Value::Text(entity.primary.clone()));

            let fetched = {
                let mut cursor = resolver.cursor.borrow_mut();
                cursor
                    .execute_prepared(&resolver.prepared, &params)
                    .and_then(|c| c.fetchone())
            };

            match fetched {
                Ok(Some(row)) => {
                    for target in &resolver.targets {
                        match row.get(target) {
                            Some(value) if !value.is_null() => {
                                entity.resolve(target, value.clone());
                            }
                            _ => {}
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(
                        resolver = %resolver.name,
                        primary = %entity.primary,
                        "resolver matched no row"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        resolver = %resolver.name,
                        primary = %entity.primary,
                        %err,
                        "resolver failed"
                    );
                    let message = format!("resolver {}: {err}", resolver.name);
                    for target in &resolver.targets {
                        entity.fail(target, &message);
                    }
                    entity.add_note(message);
                }
            }
        }

        entity
    }

    /// Serialize the full entity map so the import can resume later.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let json =
            serde_json::to_vec_pretty(&self.entities).map_err(|err| Error::Decode {
                path: path.display().to_string(),
                err,
            })?;
        std::fs::write(path, json).map_err(|err| Error::Write {
            path: path.display().to_string(),
            err,
        })
    }

    /// Restore the entity map written by [`EntityManager::save`], replacing
    /// any in-memory entities.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| Error::Read {
            path: path.display().to_string(),
            err,
        })?;
        self.entities = serde_json::from_slice(&bytes).map_err(|err| Error::Decode {
            path: path.display().to_string(),
            err,
        })?;
        Ok(())
    }
}
