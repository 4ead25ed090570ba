//! Idempotent object upsert
//!
//! The management protocol has no native upsert. [`ensure`] looks objects
//! up by natural key and then creates, updates or recreates them.
//!
//! # Degraded Path
//!
//! Some firmware acknowledges a remove and keeps listing the object. When
//! that happens the object is overwritten in place instead of failing, and
//! the result carries `degraded = true`.

use tracing::{debug, warn};

use crate::device::records::{
    AddressBinding, DevicePool, DeviceProfile, HotspotUser, Managed, PppSecret, SimpleQueue,
};
use crate::device::{DeviceSession, Resource};
use crate::traits::{DeviceObject, Fields};
use crate::{Error, Result};

/// How an existing object with different fields is brought in line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `set` in place; remove and recreate if the device rejects it
    InPlace,
    /// Always remove and recreate
    Recreate,
}

/// What [`ensure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
    Recreated,
}

/// Result of an upsert
#[derive(Debug, Clone)]
pub struct Upserted {
    /// The object as it should now exist on the device
    pub object: DeviceObject,
    pub action: UpsertAction,
    /// A remove was acknowledged but had no effect
    pub degraded: bool,
}

/// Desired object, keyed by one natural-key field
///
/// Not `Debug`: `fields` may hold credentials.
#[derive(Clone)]
pub struct UpsertSpec<'a> {
    pub path: &'a str,
    pub key_field: &'a str,
    pub key: &'a str,
    pub fields: Fields,
    pub strategy: Strategy,
    /// Write even when the device already holds identical fields
    pub force: bool,
}

impl<'a> UpsertSpec<'a> {
    /// Spec for a typed record
    pub fn for_record<R: Managed>(record: &'a R) -> Self {
        Self {
            path: R::PATH,
            key_field: R::KEY_FIELD,
            key: record.key(),
            fields: record.to_fields(),
            strategy: Strategy::InPlace,
            force: false,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Ensure the object described by `spec` exists with its fields
pub async fn ensure(session: &DeviceSession, spec: UpsertSpec<'_>) -> Result<Upserted> {
    let resource = session.resource(spec.path);
    let mut matches = resource.find(spec.key_field, spec.key).await?;

    if matches.is_empty() {
        let id = resource.add(&spec.fields).await?;
        return Ok(Upserted {
            object: DeviceObject::new(id, spec.fields),
            action: UpsertAction::Created,
            degraded: false,
        });
    }

    let existing = matches.remove(0);
    for duplicate in matches {
        match resource.remove(&duplicate.id).await {
            Ok(()) => debug!(path = spec.path, key = spec.key, id = %duplicate.id, "Removed duplicate object"),
            Err(e) => warn!(
                path = spec.path,
                key = spec.key,
                id = %duplicate.id,
                "Could not remove duplicate object: {}",
                e
            ),
        }
    }

    if !spec.force && existing.contains_all(&spec.fields) {
        return Ok(Upserted {
            object: existing,
            action: UpsertAction::Unchanged,
            degraded: false,
        });
    }

    match spec.strategy {
        Strategy::InPlace => match resource.update(&existing.id, &spec.fields).await {
            Ok(()) => Ok(Upserted {
                object: merged(existing, spec.fields),
                action: UpsertAction::Updated,
                degraded: false,
            }),
            Err(Error::Protocol(reason)) => {
                warn!(
                    path = spec.path,
                    key = spec.key,
                    "In-place update rejected ({}), recreating",
                    reason
                );
                recreate(&resource, &spec, existing).await
            }
            Err(e) => Err(e),
        },
        Strategy::Recreate => recreate(&resource, &spec, existing).await,
    }
}

async fn recreate(resource: &Resource<'_>, spec: &UpsertSpec<'_>, existing: DeviceObject) -> Result<Upserted> {
    resource.remove(&existing.id).await?;

    let lingering = resource.find(spec.key_field, spec.key).await?;
    if let Some(stuck) = lingering.into_iter().next() {
        warn!(
            path = spec.path,
            key = spec.key,
            id = %stuck.id,
            "Object still listed after remove; overwriting in place"
        );
        resource.update(&stuck.id, &spec.fields).await?;
        return Ok(Upserted {
            object: merged(stuck, spec.fields.clone()),
            action: UpsertAction::Updated,
            degraded: true,
        });
    }

    let id = resource.add(&spec.fields).await?;
    Ok(Upserted {
        object: DeviceObject::new(id, spec.fields.clone()),
        action: UpsertAction::Recreated,
        degraded: false,
    })
}

fn merged(mut object: DeviceObject, fields: Fields) -> DeviceObject {
    object.fields.extend(fields);
    object
}

/// What [`remove_by_key`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    Removed,
    /// Nothing carried the key
    Absent,
    /// Remove was acknowledged but the object stayed; it now holds the placeholder
    Neutralized,
}

/// Remove every object carrying `key`
///
/// Objects that survive an acknowledged remove are overwritten with
/// `placeholder`, typically `disabled=yes` plus a marker comment.
pub async fn remove_by_key(
    session: &DeviceSession,
    path: &str,
    key_field: &str,
    key: &str,
    placeholder: &Fields,
) -> Result<Removal> {
    let resource = session.resource(path);
    let found = resource.find(key_field, key).await?;
    if found.is_empty() {
        return Ok(Removal::Absent);
    }

    for object in &found {
        resource.remove(&object.id).await?;
    }

    let lingering = resource.find(key_field, key).await?;
    if lingering.is_empty() {
        return Ok(Removal::Removed);
    }
    for object in &lingering {
        warn!(path, key, id = %object.id, "Object still listed after remove; neutralizing");
        resource.update(&object.id, placeholder).await?;
    }
    Ok(Removal::Neutralized)
}

/// Placeholder written over objects that refuse to disappear
pub fn disabled_placeholder(note: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("disabled".to_string(), "yes".to_string());
    fields.insert("comment".to_string(), note.to_string());
    fields
}

pub async fn upsert_address_binding(session: &DeviceSession, binding: &AddressBinding) -> Result<Upserted> {
    ensure(session, UpsertSpec::for_record(binding)).await
}

pub async fn upsert_ppp_secret(session: &DeviceSession, secret: &PppSecret) -> Result<Upserted> {
    ensure(session, UpsertSpec::for_record(secret)).await
}

pub async fn upsert_hotspot_user(session: &DeviceSession, user: &HotspotUser) -> Result<Upserted> {
    ensure(session, UpsertSpec::for_record(user)).await
}

pub async fn upsert_queue(session: &DeviceSession, queue: &SimpleQueue) -> Result<Upserted> {
    ensure(session, UpsertSpec::for_record(queue)).await
}

/// A rejected `ranges` change (addresses still leased) ends in remove and recreate
pub async fn upsert_pool(session: &DeviceSession, pool: &DevicePool) -> Result<Upserted> {
    ensure(session, UpsertSpec::for_record(pool)).await
}

pub async fn upsert_profile(session: &DeviceSession, profile: &DeviceProfile) -> Result<Upserted> {
    ensure(session, UpsertSpec::for_record(profile)).await
}
