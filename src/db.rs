/*!
 * Typed access to the document store
 *
 * A [`Database`] wraps one pool lease for the duration of a single logical
 * operation and translates between documents and the shapes in `docs`.
 */

use crate::docs::{
    model_entity_prefix, Controller, Credential, EntityDoc, EntityInfo, Model, ModelIndex,
};
use corral_core_interface::{CredentialPath, EntityPath};
use corral_core_resilience::Lease;
use corral_store::{encode, Collection, Result, StoreError, StoreSession};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Attempts made by [`Database::modify`] before giving up on a conflict.
const MODIFY_ATTEMPTS: usize = 3;

/// A decoded document and the version it was read at.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub version: u64,
    pub doc: T,
}

pub(crate) struct Database<S> {
    session: Lease<S>,
}

impl<S: StoreSession> Database<S> {
    pub fn new(session: Lease<S>) -> Self {
        Self { session }
    }

    async fn get<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<Stored<T>> {
        let doc = self.session.get(collection, id).await?;
        Ok(Stored {
            version: doc.version,
            doc: doc.decode()?,
        })
    }

    async fn insert<T: Serialize>(&self, collection: Collection, id: &str, value: &T) -> Result<u64> {
        let body = encode(id, value)?;
        Ok(self.session.insert(collection, id, body).await?.version)
    }

    async fn replace<T: Serialize>(
        &self,
        collection: Collection,
        id: &str,
        version: u64,
        value: &T,
    ) -> Result<u64> {
        let body = encode(id, value)?;
        Ok(self.session.update(collection, id, version, body).await?.version)
    }

    async fn scan<T: DeserializeOwned>(&self, collection: Collection, prefix: &str) -> Result<Vec<Stored<T>>> {
        self.session
            .scan(collection, prefix)
            .await?
            .into_iter()
            .map(|doc| {
                Ok(Stored {
                    version: doc.version,
                    doc: doc.decode()?,
                })
            })
            .collect()
    }

    /// Re-reads and rewrites a document until the write lands or attempts run out.
    ///
    /// `f` returns false to leave the document untouched.
    async fn modify<T, F>(&self, collection: Collection, id: &str, mut f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut stored = self.get::<T>(collection, id).await?;
            if !f(&mut stored.doc) {
                return Ok(None);
            }
            match self.replace(collection, id, stored.version, &stored.doc).await {
                Ok(_) => return Ok(Some(stored.doc)),
                Err(StoreError::Conflict { .. }) if attempt < MODIFY_ATTEMPTS => {
                    debug!(%collection, id, attempt, "Retrying conflicting write");
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Controllers

    pub async fn controller(&self, path: &EntityPath) -> Result<Stored<Controller>> {
        self.get(Collection::Controllers, &path.to_string()).await
    }

    pub async fn controllers(&self) -> Result<Vec<Stored<Controller>>> {
        self.scan(Collection::Controllers, "").await
    }

    pub async fn insert_controller(&self, controller: &Controller) -> Result<u64> {
        self.insert(Collection::Controllers, &controller.path.to_string(), controller)
            .await
    }

    pub async fn update_controller(&self, stored: &Stored<Controller>) -> Result<u64> {
        self.replace(
            Collection::Controllers,
            &stored.doc.path.to_string(),
            stored.version,
            &stored.doc,
        )
        .await
    }

    pub async fn modify_controller<F>(&self, path: &EntityPath, f: F) -> Result<Option<Controller>>
    where
        F: FnMut(&mut Controller) -> bool,
    {
        self.modify(Collection::Controllers, &path.to_string(), f).await
    }

    // Models

    pub async fn model(&self, path: &EntityPath) -> Result<Stored<Model>> {
        self.get(Collection::Models, &path.to_string()).await
    }

    pub async fn models(&self) -> Result<Vec<Stored<Model>>> {
        self.scan(Collection::Models, "").await
    }

    /// Point lookup through the UUID index. A stale index entry reads as
    /// no model.
    pub async fn model_by_uuid(&self, uuid: &str) -> Result<Option<Stored<Model>>> {
        let index = match self.get::<ModelIndex>(Collection::ModelUuids, uuid).await {
            Ok(index) => index.doc,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        match self.model(&index.path).await {
            Ok(model) if model.doc.uuid == uuid => Ok(Some(model)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn models_using_credential(&self, path: &CredentialPath) -> Result<Vec<Model>> {
        Ok(self
            .models()
            .await?
            .into_iter()
            .map(|m| m.doc)
            .filter(|m| m.credential.as_ref() == Some(path))
            .collect())
    }

    /// Records a model and its UUID index entry. The index is written
    /// first and withdrawn if the model cannot be.
    pub async fn insert_model(&self, model: &Model) -> Result<u64> {
        let index = ModelIndex {
            path: model.path.clone(),
            controller: model.controller.clone(),
        };
        self.insert(Collection::ModelUuids, &model.uuid, &index).await?;
        match self.insert(Collection::Models, &model.path.to_string(), model).await {
            Ok(version) => Ok(version),
            Err(e) => {
                if let Err(cleanup) = self.session.remove(Collection::ModelUuids, &model.uuid).await {
                    debug!(uuid = %model.uuid, error = %cleanup, "Left stale model index entry");
                }
                Err(e)
            }
        }
    }

    pub async fn update_model(&self, stored: &Stored<Model>) -> Result<u64> {
        self.replace(
            Collection::Models,
            &stored.doc.path.to_string(),
            stored.version,
            &stored.doc,
        )
        .await
    }

    pub async fn remove_model(&self, model: &Model) -> Result<()> {
        self.session
            .remove(Collection::Models, &model.path.to_string())
            .await?;
        match self.session.remove(Collection::ModelUuids, &model.uuid).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    // Credentials

    pub async fn credential(&self, path: &CredentialPath) -> Result<Stored<Credential>> {
        self.get(Collection::Credentials, &path.to_string()).await
    }

    pub async fn insert_credential(&self, credential: &Credential) -> Result<u64> {
        self.insert(Collection::Credentials, &credential.path.to_string(), credential)
            .await
    }

    pub async fn update_credential(&self, stored: &Stored<Credential>) -> Result<u64> {
        self.replace(
            Collection::Credentials,
            &stored.doc.path.to_string(),
            stored.version,
            &stored.doc,
        )
        .await
    }

    pub async fn modify_credential<F>(&self, path: &CredentialPath, f: F) -> Result<Option<Credential>>
    where
        F: FnMut(&mut Credential) -> bool,
    {
        self.modify(Collection::Credentials, &path.to_string(), f).await
    }

    // Machines and applications

    pub async fn entity<I: EntityInfo>(&self, id: &str) -> Result<Stored<EntityDoc<I>>> {
        self.get(I::COLLECTION, id).await
    }

    pub async fn entities<I: EntityInfo>(
        &self,
        controller: &EntityPath,
        model_uuid: &str,
    ) -> Result<Vec<EntityDoc<I>>> {
        let prefix = model_entity_prefix(controller, model_uuid);
        Ok(self
            .scan::<EntityDoc<I>>(I::COLLECTION, &prefix)
            .await?
            .into_iter()
            .map(|s| s.doc)
            .collect())
    }

    pub async fn insert_entity<I: EntityInfo>(&self, doc: &EntityDoc<I>) -> Result<u64> {
        self.insert(I::COLLECTION, &doc.id, doc).await
    }

    pub async fn update_entity<I: EntityInfo>(&self, stored: &Stored<EntityDoc<I>>) -> Result<u64> {
        self.replace(I::COLLECTION, &stored.doc.id, stored.version, &stored.doc)
            .await
    }

    pub async fn remove_entity<I: EntityInfo>(&self, id: &str) -> Result<()> {
        self.session.remove(I::COLLECTION, id).await
    }

    /// Removes every entity of type `I` belonging to one model.
    pub async fn remove_model_entities<I: EntityInfo>(
        &self,
        controller: &EntityPath,
        model_uuid: &str,
    ) -> Result<usize> {
        let docs = self.entities::<I>(controller, model_uuid).await?;
        let mut removed = 0;
        for doc in &docs {
            match self.remove_entity::<I>(&doc.id).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}
