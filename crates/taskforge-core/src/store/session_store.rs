//! Generic session persistence shared by the Planning / Planner / Leader /
//! Exploration session families: `ensureDir`, `save`, `load`, `exists`,
//! `list`. Validation is applied on load — a malformed file surfaces as
//! `ValidationError`, never a partially-constructed session.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::store::json_file_store::JsonFileStore;

/// Implemented by every session record so the store can stamp
/// `updated_at` on every `save` without each caller doing it by hand.
pub trait Timestamped {
    fn id(&self) -> String;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
}

macro_rules! impl_timestamped {
    ($ty:ty, $id_field:ident) => {
        impl Timestamped for $ty {
            fn id(&self) -> String {
                self.$id_field.to_string()
            }
            fn set_updated_at(&mut self, at: DateTime<Utc>) {
                self.updated_at = at;
            }
        }
    };
}

impl_timestamped!(crate::domain::PlanningSession, session_id);
impl_timestamped!(crate::domain::PlannerSession, session_id);
impl_timestamped!(crate::domain::LeaderSession, session_id);
impl_timestamped!(crate::domain::ExplorationSession, session_id);

pub struct SessionStore<T> {
    inner: JsonFileStore<T>,
}

impl<T> SessionStore<T>
where
    T: Serialize + DeserializeOwned + Timestamped,
{
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            inner: JsonFileStore::new(dir)?,
        })
    }

    pub fn exists(&self, id: &str) -> bool {
        self.inner.exists(id)
    }

    pub fn save(&self, mut session: T) -> Result<T> {
        session.set_updated_at(Utc::now());
        self.inner.write(&session.id(), &session)?;
        Ok(session)
    }

    pub fn load(&self, id: &str) -> Result<T> {
        self.inner.read(id)
    }

    pub fn list(&self) -> Result<Vec<T>> {
        self.inner
            .list_ids()?
            .into_iter()
            .map(|id| self.inner.read(&id))
            .collect()
    }
}
