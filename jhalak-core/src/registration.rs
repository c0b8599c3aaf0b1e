use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

use jhalak_storage::{
    to_document, DocumentStore, FieldChange, Filter, StorageError, StoreTransaction,
};

use crate::catalog::{EventCatalog, EventType};
use crate::model::{
    collections, IndividualRegistration, RegistrationDoc, TeamDoc, TeamMember, TeamRegistration,
    UserProfile, GLOBAL_CHEST_COUNTER,
};
use crate::util::random_id;

/// Owns registration records, the per-user event index, and chest-number
/// allocation.
///
/// Chest numbers are globally unique and assigned to a profile exactly once.
/// The global counter and the lock collection are written only by the
/// allocation transaction here; no other code path may touch them.
pub struct RegistrationLedger<S> {
    store: Arc<S>,
    catalog: Arc<EventCatalog>,
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0} is not in the event catalog")]
    UnknownEvent(String),
    #[error("{0} is not a group event")]
    NotATeamEvent(String),
    #[error("No profile exists for user {0}")]
    UnknownUser(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What a successful team registration produced.
#[derive(Debug, Clone)]
pub struct TeamSummary {
    pub team_id: String,
    pub team_chest_no: String,
    pub member_chest_nos: BTreeMap<String, String>,
}

/// Builds the deterministic registration document id for a user and event.
pub fn registration_id(event_title: &str, uid: &str) -> String {
    let title = event_title.split_whitespace().collect::<Vec<_>>().join("_");

    format!("{title}_{uid}")
}

fn now_value() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

impl<S> RegistrationLedger<S>
where
    S: DocumentStore,
{
    /// Matches the store's transaction retry budget for contended counters
    const MAX_COMMIT_ATTEMPTS: usize = 16;

    pub fn new(store: &Arc<S>, catalog: &Arc<EventCatalog>) -> Self {
        Self {
            store: store.clone(),
            catalog: catalog.clone(),
        }
    }

    /// Registers a user for an individual event, allocating a chest number if
    /// the profile has none yet. Returns the chest number.
    ///
    /// The allocation, the registration document and the event-index merge
    /// commit in one transaction, retried on conflict.
    pub async fn register_individual(
        &self,
        uid: &str,
        event_title: &str,
    ) -> Result<String, RegistrationError> {
        self.catalog
            .find(event_title)
            .ok_or_else(|| RegistrationError::UnknownEvent(event_title.to_string()))?;

        let mut attempts = 0;

        loop {
            attempts += 1;

            let mut tx = self.store.begin().await?;
            let assigned = self.allocate_chest_numbers(&mut tx, &[uid]).await?;
            let chest_no = assigned[uid].clone();

            let registration = RegistrationDoc::Individual(IndividualRegistration {
                user_id: uid.to_string(),
                chest_no: chest_no.clone(),
                event_title: event_title.to_string(),
                registered_at: Some(Utc::now()),
                participated: false,
                participated_at: None,
            });

            tx.set(
                collections::EVENT_REGISTRATIONS,
                &registration_id(event_title, uid),
                to_document(&registration)?,
            );
            tx.patch(
                collections::REGISTRATIONS,
                uid,
                vec![
                    FieldChange::set("userId", uid),
                    FieldChange::array_union("events", event_title),
                    FieldChange::set("lastUpdated", now_value()),
                ],
            );

            match tx.commit().await {
                Ok(()) => return Ok(chest_no),
                Err(StorageError::Conflict { .. }) if attempts < Self::MAX_COMMIT_ATTEMPTS => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Registers a team for a group event.
    ///
    /// Every member (leader included) gets a personal chest number, the team
    /// gets a chest number minted from the event's own counter, and the team
    /// document, the team registration and every member's event index are
    /// written in the same transaction.
    pub async fn register_team(
        &self,
        leader_uid: &str,
        member_uids: &[String],
        team_name: &str,
        event_title: &str,
    ) -> Result<TeamSummary, RegistrationError> {
        let event = self
            .catalog
            .find(event_title)
            .ok_or_else(|| RegistrationError::UnknownEvent(event_title.to_string()))?;

        if event.event_type != EventType::Group {
            return Err(RegistrationError::NotATeamEvent(event_title.to_string()));
        }

        let short_code = event.short_code.clone();

        // The member set always includes the leader, exactly once
        let mut member_ids = vec![leader_uid.to_string()];
        for uid in member_uids {
            if !member_ids.contains(uid) {
                member_ids.push(uid.clone());
            }
        }

        let team_id = random_id(20);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let mut tx = self.store.begin().await?;

            let mut roster = Vec::new();
            for uid in &member_ids {
                let profile = self.profile_in(&mut tx, uid).await?;
                roster.push((uid.clone(), profile.name));
            }

            let uid_refs: Vec<&str> = member_ids.iter().map(String::as_str).collect();
            let assigned = self.allocate_chest_numbers(&mut tx, &uid_refs).await?;

            let counter = tx.get(collections::COUNTERS, event_title).await?;
            let seq = counter
                .as_ref()
                .and_then(|doc| doc.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;
            let team_chest_no = format!("{short_code}-{seq:02}");

            tx.set_merge(
                collections::COUNTERS,
                event_title,
                to_document(&json!({ "count": seq }))?,
            );

            let members: Vec<TeamMember> = roster
                .iter()
                .map(|(uid, name)| TeamMember {
                    uid: uid.clone(),
                    name: name.clone(),
                    chest_no: assigned[uid].clone(),
                })
                .collect();

            let team = TeamDoc {
                team_id: team_id.clone(),
                team_name: team_name.to_string(),
                leader_id: leader_uid.to_string(),
                event_title: event_title.to_string(),
                member_ids: member_ids.clone(),
                members,
            };

            let registration = RegistrationDoc::Team(TeamRegistration {
                leader_id: leader_uid.to_string(),
                team_id: team_id.clone(),
                team_name: team_name.to_string(),
                team_chest_no: team_chest_no.clone(),
                leader_chest_no: Some(assigned[leader_uid].clone()),
                event_title: event_title.to_string(),
                member_ids: member_ids.clone(),
                member_chest_nos: assigned.clone(),
                registered_at: Some(Utc::now()),
                participated: false,
                participated_at: None,
            });

            tx.set(collections::TEAMS, &team_id, to_document(&team)?);
            tx.set(
                collections::EVENT_REGISTRATIONS,
                &registration_id(event_title, leader_uid),
                to_document(&registration)?,
            );

            for uid in &member_ids {
                tx.patch(
                    collections::REGISTRATIONS,
                    uid,
                    vec![
                        FieldChange::set("userId", uid.as_str()),
                        FieldChange::array_union("teamEvents", event_title),
                        FieldChange::set("lastUpdated", now_value()),
                    ],
                );
            }

            match tx.commit().await {
                Ok(()) => {
                    return Ok(TeamSummary {
                        team_id,
                        team_chest_no,
                        member_chest_nos: assigned,
                    })
                }
                Err(StorageError::Conflict { .. }) if attempts < Self::MAX_COMMIT_ATTEMPTS => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Assigns a chest number to every listed user inside the transaction.
    ///
    /// Profiles that already carry a number reuse it without touching the
    /// counter. For the rest, the candidate loop advances the global counter
    /// past every number held by a profile or claimed in the lock collection,
    /// then writes the counter, the profile and the lock record together.
    async fn allocate_chest_numbers(
        &self,
        tx: &mut S::Transaction,
        uids: &[&str],
    ) -> Result<BTreeMap<String, String>, RegistrationError> {
        let mut assigned = BTreeMap::new();
        let mut unnumbered = Vec::new();

        for uid in uids {
            let profile = self.profile_in(tx, uid).await?;

            match profile.chest_no {
                Some(chest_no) => {
                    assigned.insert(uid.to_string(), chest_no);
                }
                None => unnumbered.push(uid.to_string()),
            }
        }

        if unnumbered.is_empty() {
            return Ok(assigned);
        }

        let counter = tx.get(collections::COUNTERS, GLOBAL_CHEST_COUNTER).await?;
        let mut count = counter
            .as_ref()
            .and_then(|doc| doc.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        for uid in unnumbered {
            let chest_no = loop {
                count += 1;
                let candidate = format!("{:03}", 100 + count);

                let held_by_profile = !tx
                    .query(
                        collections::USERS,
                        &[Filter::eq("chestNo", candidate.as_str())],
                    )
                    .await?
                    .is_empty();
                let locked = tx
                    .get(collections::TAKEN_CHEST_NUMBERS, &candidate)
                    .await?
                    .is_some();

                if !held_by_profile && !locked {
                    break candidate;
                }
            };

            tx.patch(
                collections::USERS,
                &uid,
                vec![FieldChange::set("chestNo", chest_no.as_str())],
            );
            tx.set(
                collections::TAKEN_CHEST_NUMBERS,
                &chest_no,
                to_document(&json!({ "uid": uid, "createdAt": Utc::now() }))?,
            );

            assigned.insert(uid, chest_no);
        }

        tx.set_merge(
            collections::COUNTERS,
            GLOBAL_CHEST_COUNTER,
            to_document(&json!({ "count": count }))?,
        );

        Ok(assigned)
    }

    async fn profile_in(
        &self,
        tx: &mut S::Transaction,
        uid: &str,
    ) -> Result<UserProfile, RegistrationError> {
        let doc = tx
            .get(collections::USERS, uid)
            .await?
            .ok_or_else(|| RegistrationError::UnknownUser(uid.to_string()))?;

        Ok(jhalak_storage::from_document(doc)?)
    }
}

impl<S> Clone for RegistrationLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: self.catalog.clone(),
        }
    }
}
