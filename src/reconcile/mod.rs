//! Reconciliation of the local identity graph against the identity service.
//!
//! The remote graph is fetched first, outside of any transaction. Each owned
//! identity is then applied in its own transaction, in this order: the owned
//! identity row, contact inserts and updates, groups v2, groups v1, contact
//! removals. Owned identities no longer reported are deleted last, which
//! cascades through everything they own.
//!
//! Every write is conditional on drift, so a second pass against an unchanged
//! snapshot writes nothing.

mod contacts;
mod groups;
mod groups_v2;
mod listener;

use std::collections::BTreeSet;
use std::ops::AddAssign;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identity::{IdentityService, RemoteOwnedIdentity, RemoteOwnerSnapshot, RemoteSnapshot};
use crate::store::{Store, identities};
use crate::types::{IdentityBytes, OwnedIdentity};

pub use listener::run_listener;

/// Writes applied by a reconciliation pass, by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppliedChanges {
    pub owned_identities_inserted: usize,
    pub owned_identities_updated: usize,
    pub owned_identities_deleted: usize,
    pub contacts_inserted: usize,
    pub contacts_updated: usize,
    pub contacts_deleted: usize,
    pub groups_inserted: usize,
    pub groups_updated: usize,
    pub groups_deleted: usize,
    pub members_added: usize,
    pub members_removed: usize,
    pub members_updated: usize,
    pub pending_members_changed: usize,
    pub members_names_refreshed: usize,
    pub discussions_created: usize,
    pub discussions_revived: usize,
    pub discussions_locked: usize,
    pub discussions_updated: usize,
    pub system_messages: usize,
}

impl AppliedChanges {
    #[must_use]
    pub fn total(&self) -> usize {
        self.owned_identities_inserted
            + self.owned_identities_updated
            + self.owned_identities_deleted
            + self.contacts_inserted
            + self.contacts_updated
            + self.contacts_deleted
            + self.groups_inserted
            + self.groups_updated
            + self.groups_deleted
            + self.members_added
            + self.members_removed
            + self.members_updated
            + self.pending_members_changed
            + self.members_names_refreshed
            + self.discussions_created
            + self.discussions_revived
            + self.discussions_locked
            + self.discussions_updated
            + self.system_messages
    }
}

impl AddAssign for AppliedChanges {
    fn add_assign(&mut self, other: Self) {
        self.owned_identities_inserted += other.owned_identities_inserted;
        self.owned_identities_updated += other.owned_identities_updated;
        self.owned_identities_deleted += other.owned_identities_deleted;
        self.contacts_inserted += other.contacts_inserted;
        self.contacts_updated += other.contacts_updated;
        self.contacts_deleted += other.contacts_deleted;
        self.groups_inserted += other.groups_inserted;
        self.groups_updated += other.groups_updated;
        self.groups_deleted += other.groups_deleted;
        self.members_added += other.members_added;
        self.members_removed += other.members_removed;
        self.members_updated += other.members_updated;
        self.pending_members_changed += other.pending_members_changed;
        self.members_names_refreshed += other.members_names_refreshed;
        self.discussions_created += other.discussions_created;
        self.discussions_revived += other.discussions_revived;
        self.discussions_locked += other.discussions_locked;
        self.discussions_updated += other.discussions_updated;
        self.system_messages += other.system_messages;
    }
}

/// An owned identity whose sub-pass failed and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub owner: IdentityBytes,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub applied: AppliedChanges,
    pub failures: Vec<EntityFailure>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ReconciliationEngine {
    store: Arc<Store>,
    service: Arc<dyn IdentityService>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<Store>, service: Arc<dyn IdentityService>) -> Self {
        Self { store, service }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Fetches the whole remote graph and reconciles every owned identity.
    /// A failing service call aborts the pass before anything is written.
    pub fn reconcile_all(&self) -> Result<ReconcileReport> {
        let snapshot = RemoteSnapshot::fetch(self.service.as_ref())?;
        self.reconcile(&snapshot)
    }

    /// Reconciles a single owned identity, deleting it locally when the
    /// service no longer reports it.
    pub fn reconcile_owner(&self, owner: &IdentityBytes) -> Result<ReconcileReport> {
        let owned = self
            .service
            .list_owned_identities()?
            .into_iter()
            .find(|o| &o.identity == owner);

        let mut report = ReconcileReport::default();
        match owned {
            Some(owned) => {
                let remote = RemoteOwnerSnapshot::fetch(self.service.as_ref(), owned)?;
                self.apply_owner(&remote, &mut report);
            }
            None => self.delete_owner(owner, &mut report),
        }
        Ok(report)
    }

    /// Applies `snapshot` to the store. Never fails as a whole: a failing
    /// owned identity is rolled back and recorded in the report.
    pub fn reconcile(&self, snapshot: &RemoteSnapshot) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for remote in &snapshot.owners {
            self.apply_owner(remote, &mut report);
        }

        let remote_owners: BTreeSet<IdentityBytes> = snapshot
            .owners
            .iter()
            .map(|o| o.owned.identity.clone())
            .collect();
        let local_owners = self.store.with_conn(identities::list)?;
        for local in local_owners {
            if !remote_owners.contains(&local.bytes_owned_identity) {
                self.delete_owner(&local.bytes_owned_identity, &mut report);
            }
        }

        info!(
            changes = report.applied.total(),
            failures = report.failures.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    fn apply_owner(&self, remote: &RemoteOwnerSnapshot, report: &mut ReconcileReport) {
        let owner = &remote.owned.identity;
        match self.store.transaction(|conn| apply_owner(conn, remote)) {
            Ok(changes) => {
                debug!(owner = %owner, changes = changes.total(), "Owned identity reconciled");
                report.applied += changes;
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "Owned identity reconciliation failed");
                report.failures.push(EntityFailure {
                    owner: owner.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn delete_owner(&self, owner: &IdentityBytes, report: &mut ReconcileReport) {
        match self.store.transaction(|conn| identities::delete(conn, owner)) {
            Ok(true) => {
                info!(owner = %owner, "Owned identity removed");
                report.applied.owned_identities_deleted += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(owner = %owner, error = %e, "Owned identity removal failed");
                report.failures.push(EntityFailure {
                    owner: owner.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// One owned identity's sub-pass, run inside its transaction.
fn apply_owner(conn: &Connection, remote: &RemoteOwnerSnapshot) -> Result<AppliedChanges> {
    let mut changes = AppliedChanges::default();
    let owner = &remote.owned.identity;

    upsert_owned_identity(conn, &remote.owned, &mut changes)?;
    contacts::reconcile_contacts(conn, owner, &remote.contacts, &mut changes)?;

    // Group members must be contacts of the owner.
    let known: BTreeSet<IdentityBytes> =
        remote.contacts.iter().map(|c| c.identity.clone()).collect();

    groups_v2::reconcile_groups_v2(conn, owner, &remote.groups_v2, &known, &mut changes)?;
    groups::reconcile_groups_v1(conn, owner, &remote.groups_v1, &known, &mut changes)?;
    contacts::prune_contacts(conn, owner, &known, &mut changes)?;

    Ok(changes)
}

fn upsert_owned_identity(
    conn: &Connection,
    remote: &RemoteOwnedIdentity,
    changes: &mut AppliedChanges,
) -> Result<()> {
    let wanted = OwnedIdentity {
        bytes_owned_identity: remote.identity.clone(),
        display_name: remote.display_name.clone(),
        photo_url: remote.photo_url.clone(),
        active: remote.active,
        keycloak_managed: remote.keycloak_managed,
        capabilities: remote.capabilities,
        api_key_status: remote.api_key_status,
    };

    match identities::get(conn, &remote.identity)? {
        None => {
            identities::insert(conn, &wanted)?;
            changes.owned_identities_inserted += 1;
        }
        Some(local) if local != wanted => {
            identities::update(conn, &wanted)?;
            changes.owned_identities_updated += 1;
        }
        Some(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{JsonSnapshotFile, JsonSnapshotService, RemoteContact};
    use crate::types::Capabilities;

    fn snapshot() -> RemoteSnapshot {
        let contact = RemoteContact {
            identity: IdentityBytes(vec![2]),
            display_name: "Bob".to_string(),
            photo_url: None,
            one_to_one: true,
            device_count: 1,
            established_channel_count: 1,
            trust_level: 1,
            active: true,
            keycloak_managed: false,
            capabilities: Capabilities::default(),
        };
        RemoteSnapshot {
            owners: vec![RemoteOwnerSnapshot {
                owned: RemoteOwnedIdentity {
                    identity: IdentityBytes(vec![1]),
                    display_name: "Me".to_string(),
                    photo_url: None,
                    active: true,
                    keycloak_managed: false,
                    capabilities: Capabilities::default(),
                    api_key_status: 0,
                },
                contacts: vec![contact],
                groups_v1: Vec::new(),
                groups_v2: Vec::new(),
            }],
        }
    }

    fn engine() -> ReconciliationEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let service = Arc::new(JsonSnapshotService::from_file(JsonSnapshotFile::default()));
        ReconciliationEngine::new(store, service)
    }

    #[test]
    fn test_second_pass_writes_nothing() {
        let engine = engine();
        let first = engine.reconcile(&snapshot()).unwrap();
        assert!(first.is_clean());
        assert_eq!(first.applied.owned_identities_inserted, 1);
        assert_eq!(first.applied.contacts_inserted, 1);
        assert_eq!(first.applied.discussions_created, 1);

        let second = engine.reconcile(&snapshot()).unwrap();
        assert_eq!(second.applied.total(), 0);
    }

    #[test]
    fn test_empty_snapshot_removes_owned_identities() {
        let engine = engine();
        engine.reconcile(&snapshot()).unwrap();

        let report = engine.reconcile(&RemoteSnapshot::default()).unwrap();
        assert_eq!(report.applied.owned_identities_deleted, 1);

        let stats = engine.store().stats().unwrap();
        assert_eq!(stats.contacts, 0);
        assert_eq!(stats.discussions, 0);
    }

    #[test]
    fn test_applied_changes_add() {
        let mut total = AppliedChanges::default();
        total += AppliedChanges {
            contacts_inserted: 2,
            system_messages: 1,
            ..AppliedChanges::default()
        };
        total += AppliedChanges {
            contacts_inserted: 1,
            ..AppliedChanges::default()
        };
        assert_eq!(total.contacts_inserted, 3);
        assert_eq!(total.total(), 4);
    }
}
