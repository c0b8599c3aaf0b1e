use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

use jhalak_storage::{
    from_document, to_document, Document, DocumentStore, FieldChange, Filter, StorageError,
    WriteBatch,
};

use crate::catalog::{CategoryType, EventCatalog, EventType};
use crate::model::{
    collections, AdminUserView, DetailedMember, DetailedRegistration, EventIndex, EventStat,
    RegistrationDoc, RegistrationKind, RegistrationRecord, TeamDoc, UserProfile,
    GLOBAL_CHEST_COUNTER,
};
use crate::registration::{RegistrationError, RegistrationLedger};

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Registration capacity rules, evaluated over a user's existing events plus
/// the candidate event.
const MAX_OFF_STAGE: usize = 4;
const MAX_ON_STAGE_INDIVIDUAL: usize = 3;
const MAX_ON_STAGE_GROUP: usize = 2;

/// Composes the ledger and the stored collections into the admin-facing
/// actions: adding and removing participants, resetting events, attendance
/// marking, and the overview reads.
pub struct AdminService<S> {
    store: Arc<S>,
    catalog: Arc<EventCatalog>,
    ledger: RegistrationLedger<S>,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} is not a valid email address")]
    InvalidEmail(String),
    #[error("User not found with this email")]
    UserNotFound,
    #[error("User is already registered for this event")]
    AlreadyRegistered,
    #[error("Event definition not found for {0}")]
    UnknownEvent(String),
    #[error("Limit reached: max {MAX_OFF_STAGE} Off-Stage events")]
    OffStageLimit,
    #[error("Limit reached: max {MAX_ON_STAGE_INDIVIDUAL} individual On-Stage events")]
    OnStageIndividualLimit,
    #[error("Limit reached: max {MAX_ON_STAGE_GROUP} group events")]
    OnStageGroupLimit,
    #[error("Schedule conflict: already has {event} on {date}")]
    ScheduleConflict { event: String, date: String },
    #[error("Registration not found")]
    RegistrationNotFound,
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl<S> AdminService<S>
where
    S: DocumentStore,
{
    pub fn new(store: &Arc<S>, catalog: &Arc<EventCatalog>) -> Self {
        Self {
            store: store.clone(),
            catalog: catalog.clone(),
            ledger: RegistrationLedger::new(store, catalog),
        }
    }

    /// Registers the user with this email for an individual event, after
    /// checking the duplicate, capacity and schedule rules.
    ///
    /// Validation is read-only and happens before any write. Returns the
    /// user's chest number.
    pub async fn add_user_to_event(
        &self,
        event_title: &str,
        user_email: &str,
    ) -> Result<String, AdminError> {
        if !EMAIL_REGEX.is_match(user_email) {
            return Err(AdminError::InvalidEmail(user_email.to_string()));
        }

        let mut matches = self
            .store
            .query(collections::USERS, &[Filter::eq("email", user_email)])
            .await?;

        if matches.is_empty() {
            return Err(AdminError::UserNotFound);
        }

        let (uid, _) = matches.remove(0);
        let index = self.event_index(&uid).await?;

        if index.contains(event_title) {
            return Err(AdminError::AlreadyRegistered);
        }

        if self.catalog.find(event_title).is_none() {
            return Err(AdminError::UnknownEvent(event_title.to_string()));
        }

        self.check_limits(&index, event_title)?;

        let chest_no = self.ledger.register_individual(&uid, event_title).await?;

        Ok(chest_no)
    }

    /// Evaluates the capacity and schedule rules over the union of existing
    /// events and the candidate.
    fn check_limits(&self, index: &EventIndex, candidate: &str) -> Result<(), AdminError> {
        let mut off_stage = 0usize;
        let mut on_stage_individual = 0usize;
        let mut on_stage_group = 0usize;
        let mut dates: Vec<(String, Vec<String>)> = Vec::new();

        let titles = index.all_titles().chain(std::iter::once(candidate));

        for title in titles {
            // Titles no longer in the catalog don't count against any rule
            let Some(event) = self.catalog.find(title) else {
                continue;
            };

            match event.category_type {
                CategoryType::OffStage => off_stage += 1,
                CategoryType::OnStage | CategoryType::Flagship => match event.event_type {
                    EventType::Individual => on_stage_individual += 1,
                    EventType::Group => on_stage_group += 1,
                },
            }

            if let Some(date) = &event.date {
                match dates.iter_mut().find(|(d, _)| d == date) {
                    Some((_, events)) => events.push(title.to_string()),
                    None => dates.push((date.clone(), vec![title.to_string()])),
                }
            }
        }

        if off_stage > MAX_OFF_STAGE {
            return Err(AdminError::OffStageLimit);
        }
        if on_stage_individual > MAX_ON_STAGE_INDIVIDUAL {
            return Err(AdminError::OnStageIndividualLimit);
        }
        if on_stage_group > MAX_ON_STAGE_GROUP {
            return Err(AdminError::OnStageGroupLimit);
        }

        for (date, events) in dates {
            if events.len() > 1 {
                return Err(AdminError::ScheduleConflict {
                    event: events[0].clone(),
                    date,
                });
            }
        }

        Ok(())
    }

    /// Removes a participant from an event.
    ///
    /// For a team registration, removing the leader disbands the whole team;
    /// removing a member updates the team document and the team registration
    /// together, keeping their member sets equal.
    pub async fn remove_user_from_event(
        &self,
        event_title: &str,
        registration_id: &str,
        uid: &str,
        kind: RegistrationKind,
    ) -> Result<(), AdminError> {
        match kind {
            RegistrationKind::Individual => {
                let mut batch = WriteBatch::new();
                batch
                    .delete(collections::EVENT_REGISTRATIONS, registration_id)
                    .patch(
                        collections::REGISTRATIONS,
                        uid,
                        vec![FieldChange::array_remove("events", event_title)],
                    );

                self.store.commit(batch).await?;
                Ok(())
            }
            RegistrationKind::Team => {
                let doc = self
                    .store
                    .get(collections::EVENT_REGISTRATIONS, registration_id)
                    .await?
                    .ok_or(AdminError::RegistrationNotFound)?;

                let RegistrationDoc::Team(registration) = from_document(doc)? else {
                    return Err(AdminError::RegistrationNotFound);
                };

                if registration.leader_id == uid {
                    self.disband_team(event_title, registration_id, &registration.team_id, &registration.member_ids)
                        .await
                } else {
                    self.remove_team_member(event_title, registration_id, &registration.team_id, uid)
                        .await
                }
            }
        }
    }

    /// Leader removed: delete the registration and team documents and clear
    /// the event from every member's index, in one batch.
    async fn disband_team(
        &self,
        event_title: &str,
        registration_id: &str,
        team_id: &str,
        member_ids: &[String],
    ) -> Result<(), AdminError> {
        let mut batch = WriteBatch::new();
        batch
            .delete(collections::EVENT_REGISTRATIONS, registration_id)
            .delete(collections::TEAMS, team_id);

        for member in member_ids {
            batch.patch(
                collections::REGISTRATIONS,
                member,
                vec![FieldChange::array_remove("teamEvents", event_title)],
            );
        }

        self.store.commit(batch).await?;
        Ok(())
    }

    async fn remove_team_member(
        &self,
        event_title: &str,
        registration_id: &str,
        team_id: &str,
        uid: &str,
    ) -> Result<(), AdminError> {
        let mut batch = WriteBatch::new();
        batch.patch(
            collections::EVENT_REGISTRATIONS,
            registration_id,
            vec![FieldChange::array_remove("memberIds", uid)],
        );

        // The roster on the team document mirrors memberIds and shrinks with it
        if let Some(doc) = self.store.get(collections::TEAMS, team_id).await? {
            let mut team: TeamDoc = from_document(doc)?;
            team.members.retain(|member| member.uid != uid);

            batch.patch(
                collections::TEAMS,
                team_id,
                vec![
                    FieldChange::array_remove("memberIds", uid),
                    FieldChange::set(
                        "members",
                        serde_json::to_value(&team.members)
                            .map_err(|e| StorageError::Internal(Box::new(e)))?,
                    ),
                ],
            );
        }

        batch.patch(
            collections::REGISTRATIONS,
            uid,
            vec![FieldChange::array_remove("teamEvents", event_title)],
        );

        self.store.commit(batch).await?;
        Ok(())
    }

    /// Destructive bulk reset of one event: deletes every registration and
    /// referenced team, clears the event from every affected index, and
    /// zeroes the event's counter. Not reversible.
    pub async fn reset_event(&self, event_title: &str) -> Result<usize, AdminError> {
        let rows = self
            .store
            .query(
                collections::EVENT_REGISTRATIONS,
                &[Filter::eq("eventTitle", event_title)],
            )
            .await?;

        let mut batch = WriteBatch::new();

        for (id, doc) in &rows {
            batch.delete(collections::EVENT_REGISTRATIONS, id);

            let registration: RegistrationDoc = match from_document(doc.clone()) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!("resetting malformed registration {id} without index cleanup: {e}");
                    continue;
                }
            };

            match registration {
                RegistrationDoc::Individual(reg) => {
                    batch.patch(
                        collections::REGISTRATIONS,
                        &reg.user_id,
                        vec![FieldChange::array_remove("events", event_title)],
                    );
                }
                RegistrationDoc::Team(reg) => {
                    batch.delete(collections::TEAMS, &reg.team_id);

                    for member in &reg.member_ids {
                        batch.patch(
                            collections::REGISTRATIONS,
                            member,
                            vec![FieldChange::array_remove("teamEvents", event_title)],
                        );
                    }
                }
            }
        }

        batch.set_merge(
            collections::COUNTERS,
            event_title,
            to_document(&json!({ "count": 0 }))?,
        );

        self.store.commit(batch).await?;
        Ok(rows.len())
    }

    /// Writes the participation flag and timestamp on one registration
    pub async fn mark_participation(
        &self,
        registration_id: &str,
        participated: bool,
    ) -> Result<(), AdminError> {
        self.store
            .set_merge(
                collections::EVENT_REGISTRATIONS,
                registration_id,
                participation_doc(participated),
            )
            .await?;

        Ok(())
    }

    /// Same as [`Self::mark_participation`] for many registrations, in one batch
    pub async fn bulk_mark_participation(
        &self,
        registration_ids: &[String],
        participated: bool,
    ) -> Result<usize, AdminError> {
        if registration_ids.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();

        for id in registration_ids {
            batch.set_merge(
                collections::EVENT_REGISTRATIONS,
                id,
                participation_doc(participated),
            );
        }

        self.store.commit(batch).await?;
        Ok(registration_ids.len())
    }

    /// Flips whether an event still accepts registrations, returning the new
    /// closed state
    pub async fn toggle_event_registration(
        &self,
        event_title: &str,
        currently_closed: bool,
    ) -> Result<bool, AdminError> {
        self.store
            .set_merge(
                collections::EVENT_SETTINGS,
                event_title,
                to_document(&json!({ "isClosed": !currently_closed }))?,
            )
            .await?;

        Ok(!currently_closed)
    }

    pub async fn update_user_role(&self, uid: &str, role: &str) -> Result<(), AdminError> {
        self.store
            .set_merge(
                collections::USERS,
                uid,
                to_document(&json!({ "role": role }))?,
            )
            .await?;

        Ok(())
    }

    /// Every user joined with their registration counts, chest numbers and
    /// event titles. Degrades to empty on read failure.
    pub async fn fetch_all_users_with_data(&self) -> Vec<AdminUserView> {
        let users = match self.store.scan(collections::USERS).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading user overview to empty: {e}");
                return Vec::new();
            }
        };
        let registrations = match self.store.scan(collections::EVENT_REGISTRATIONS).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading user overview to empty: {e}");
                return Vec::new();
            }
        };

        #[derive(Default)]
        struct Entry {
            count: usize,
            chests: BTreeSet<String>,
            events: BTreeSet<String>,
        }

        let mut per_user: HashMap<String, Entry> = HashMap::new();

        for (id, doc) in registrations {
            let registration: RegistrationDoc = match from_document(doc) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!("skipping malformed registration {id}: {e}");
                    continue;
                }
            };

            match registration {
                RegistrationDoc::Individual(reg) => {
                    let entry = per_user.entry(reg.user_id).or_default();
                    entry.count += 1;
                    if !reg.chest_no.is_empty() {
                        entry.chests.insert(reg.chest_no);
                    }
                    entry.events.insert(reg.event_title);
                }
                RegistrationDoc::Team(reg) => {
                    for member in &reg.member_ids {
                        let entry = per_user.entry(member.clone()).or_default();
                        entry.count += 1;
                        if !reg.team_chest_no.is_empty() {
                            entry.chests.insert(reg.team_chest_no.clone());
                        }
                        entry.events.insert(reg.event_title.clone());
                    }
                }
            }
        }

        users
            .into_iter()
            .filter_map(|(uid, doc)| {
                let mut profile: UserProfile = from_document(doc)
                    .map_err(|e| warn!("skipping malformed profile {uid}: {e}"))
                    .ok()?;
                profile.uid = uid.clone();

                let entry = per_user.remove(&uid).unwrap_or_default();

                Some(AdminUserView {
                    profile,
                    registration_count: entry.count,
                    chest_numbers: entry.chests.into_iter().collect(),
                    events: entry.events.into_iter().collect(),
                })
            })
            .collect()
    }

    /// Registration statistics for every catalog event. Degrades to empty on
    /// read failure.
    pub async fn fetch_event_stats(&self) -> Vec<EventStat> {
        let registrations = match self.store.scan(collections::EVENT_REGISTRATIONS).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading event stats to empty: {e}");
                return Vec::new();
            }
        };
        let settings = match self.store.scan(collections::EVENT_SETTINGS).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading event stats to empty: {e}");
                return Vec::new();
            }
        };

        let closed: BTreeMap<String, bool> = settings
            .into_iter()
            .map(|(title, doc)| {
                let is_closed = doc
                    .get("isClosed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                (title, is_closed)
            })
            .collect();

        let mut stats: Vec<EventStat> = self
            .catalog
            .iter()
            .map(|(category, event)| EventStat {
                title: event.title.clone(),
                short_code: event.short_code.clone(),
                event_type: event.event_type,
                category: category.to_string(),
                entry_count: 0,
                participant_count: 0,
                registrations: Vec::new(),
                is_registration_closed: closed.get(&event.title).copied().unwrap_or(false),
            })
            .collect();

        for (id, doc) in registrations {
            let registration: RegistrationDoc = match from_document(doc) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!("skipping malformed registration {id}: {e}");
                    continue;
                }
            };

            let Some(stat) = stats
                .iter_mut()
                .find(|stat| stat.title == registration.event_title())
            else {
                continue;
            };

            stat.entry_count += 1;
            stat.participant_count += registration.participant_count();
            stat.registrations.push(RegistrationRecord { id, registration });
        }

        stats
    }

    /// The registrations of one event joined with live user profiles, for the
    /// detail view and spreadsheet export. Degrades to empty on read failure.
    pub async fn fetch_detailed_event_registrations(
        &self,
        event_title: &str,
    ) -> Vec<DetailedRegistration> {
        let rows = match self
            .store
            .query(
                collections::EVENT_REGISTRATIONS,
                &[Filter::eq("eventTitle", event_title)],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading detailed registrations to empty: {e}");
                return Vec::new();
            }
        };
        let users = match self.store.scan(collections::USERS).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading detailed registrations to empty: {e}");
                return Vec::new();
            }
        };

        let profiles: HashMap<String, UserProfile> = users
            .into_iter()
            .filter_map(|(uid, doc)| {
                let mut profile: UserProfile = from_document(doc).ok()?;
                profile.uid = uid.clone();
                Some((uid, profile))
            })
            .collect();

        let mut detailed = Vec::new();

        for (id, doc) in rows {
            let registration: RegistrationDoc = match from_document(doc) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!("skipping malformed registration {id}: {e}");
                    continue;
                }
            };

            match registration {
                RegistrationDoc::Individual(reg) => {
                    let Some(user) = profiles.get(&reg.user_id) else {
                        continue;
                    };

                    detailed.push(DetailedRegistration {
                        id,
                        kind: RegistrationKind::Individual,
                        chest_no: reg.chest_no,
                        uid: user.uid.clone(),
                        name: user.name.clone(),
                        email: user.email.clone(),
                        mobile: user.mobile.clone(),
                        college_id: user.college_id.clone(),
                        department: user.department.clone(),
                        semester: user.semester.clone(),
                        house: user.house.clone(),
                        team_name: None,
                        team_chest_no: None,
                        leader_chest_no: None,
                        members: Vec::new(),
                        registered_at: reg.registered_at,
                        participated: reg.participated,
                        participated_at: reg.participated_at,
                    });
                }
                RegistrationDoc::Team(reg) => {
                    let Some(leader) = profiles.get(&reg.leader_id) else {
                        continue;
                    };

                    let members: Vec<DetailedMember> = reg
                        .member_ids
                        .iter()
                        .filter(|uid| **uid != reg.leader_id)
                        .filter_map(|uid| {
                            let user = profiles.get(uid)?;

                            Some(DetailedMember {
                                uid: user.uid.clone(),
                                name: user.name.clone(),
                                chest_no: reg
                                    .member_chest_nos
                                    .get(uid)
                                    .cloned()
                                    .unwrap_or_default(),
                                email: user.email.clone(),
                                mobile: user.mobile.clone(),
                                college_id: user.college_id.clone(),
                                department: user.department.clone(),
                                semester: user.semester.clone(),
                                house: user.house.clone(),
                            })
                        })
                        .collect();

                    detailed.push(DetailedRegistration {
                        id,
                        kind: RegistrationKind::Team,
                        chest_no: reg.team_chest_no.clone(),
                        uid: leader.uid.clone(),
                        name: leader.name.clone(),
                        email: leader.email.clone(),
                        mobile: leader.mobile.clone(),
                        college_id: leader.college_id.clone(),
                        department: leader.department.clone(),
                        semester: leader.semester.clone(),
                        house: leader.house.clone(),
                        team_name: Some(reg.team_name),
                        team_chest_no: Some(reg.team_chest_no),
                        leader_chest_no: reg.leader_chest_no,
                        members,
                        registered_at: reg.registered_at,
                        participated: reg.participated,
                        participated_at: reg.participated_at,
                    });
                }
            }
        }

        detailed
    }

    /// Cascading wipe of one user: profile, event index, individual
    /// registrations, and any team they lead. Teams they merely belong to are
    /// cleaned up in a second batch.
    pub async fn delete_user(&self, uid: &str) -> Result<(), AdminError> {
        let mut batch = WriteBatch::new();
        batch
            .delete(collections::USERS, uid)
            .delete(collections::REGISTRATIONS, uid);

        for (id, _) in self
            .store
            .query(collections::EVENT_REGISTRATIONS, &[Filter::eq("userId", uid)])
            .await?
        {
            batch.delete(collections::EVENT_REGISTRATIONS, &id);
        }

        for (id, _) in self
            .store
            .query(collections::TEAMS, &[Filter::eq("leaderId", uid)])
            .await?
        {
            batch.delete(collections::TEAMS, &id);
        }

        for (id, _) in self
            .store
            .query(
                collections::EVENT_REGISTRATIONS,
                &[Filter::eq("leaderId", uid)],
            )
            .await?
        {
            batch.delete(collections::EVENT_REGISTRATIONS, &id);
        }

        self.store.commit(batch).await?;

        // Memberships in teams led by someone else
        let mut cleanup = WriteBatch::new();

        for (id, doc) in self
            .store
            .query(
                collections::TEAMS,
                &[Filter::array_contains("memberIds", uid)],
            )
            .await?
        {
            let mut team: TeamDoc = from_document(doc)?;
            if team.leader_id == uid {
                continue;
            }

            team.members.retain(|member| member.uid != uid);
            cleanup.patch(
                collections::TEAMS,
                &id,
                vec![
                    FieldChange::array_remove("memberIds", uid),
                    FieldChange::set(
                        "members",
                        serde_json::to_value(&team.members)
                            .map_err(|e| StorageError::Internal(Box::new(e)))?,
                    ),
                ],
            );
        }

        for (id, doc) in self
            .store
            .query(
                collections::EVENT_REGISTRATIONS,
                &[Filter::array_contains("memberIds", uid)],
            )
            .await?
        {
            let leader_id = doc.get("leaderId").and_then(Value::as_str);
            if leader_id == Some(uid) {
                continue;
            }

            cleanup.patch(
                collections::EVENT_REGISTRATIONS,
                &id,
                vec![FieldChange::array_remove("memberIds", uid)],
            );
        }

        if !cleanup.is_empty() {
            self.store.commit(cleanup).await?;
        }

        Ok(())
    }

    /// The explicit admin wipe: clears every participant-related collection
    /// and zeroes the global chest counter. Returns the number of documents
    /// deleted.
    pub async fn wipe_all_data(&self) -> Result<usize, AdminError> {
        let mut deleted = 0;

        for collection in [
            collections::USERS,
            collections::REGISTRATIONS,
            collections::EVENT_REGISTRATIONS,
            collections::TEAMS,
            collections::TAKEN_CHEST_NUMBERS,
        ] {
            let rows = self.store.scan(collection).await?;
            if rows.is_empty() {
                continue;
            }

            let mut batch = WriteBatch::new();
            for (id, _) in &rows {
                batch.delete(collection, id);
            }

            deleted += rows.len();
            self.store.commit(batch).await?;
        }

        self.store
            .set_merge(
                collections::COUNTERS,
                GLOBAL_CHEST_COUNTER,
                to_document(&json!({ "count": 0 }))?,
            )
            .await?;

        Ok(deleted)
    }

    /// Repair helper: removes one event title from a user's index and deletes
    /// any stale individual registration for the pair.
    pub async fn clean_user_registration(
        &self,
        uid: &str,
        event_title: &str,
    ) -> Result<(), AdminError> {
        self.store
            .patch(
                collections::REGISTRATIONS,
                uid,
                vec![
                    FieldChange::array_remove("events", event_title),
                    FieldChange::array_remove("teamEvents", event_title),
                ],
            )
            .await?;

        let stale = self
            .store
            .query(
                collections::EVENT_REGISTRATIONS,
                &[
                    Filter::eq("userId", uid),
                    Filter::eq("eventTitle", event_title),
                ],
            )
            .await?;

        if !stale.is_empty() {
            let mut batch = WriteBatch::new();
            for (id, _) in &stale {
                batch.delete(collections::EVENT_REGISTRATIONS, id);
            }
            self.store.commit(batch).await?;
        }

        Ok(())
    }

    async fn event_index(&self, uid: &str) -> Result<EventIndex, AdminError> {
        let doc = self.store.get(collections::REGISTRATIONS, uid).await?;

        match doc {
            Some(doc) => Ok(from_document(doc)?),
            None => Ok(EventIndex::default()),
        }
    }
}

impl<S> Clone for AdminService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: self.catalog.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

fn participation_doc(participated: bool) -> Document {
    let mut doc = Document::new();
    doc.insert("participated".to_string(), json!(participated));
    doc.insert(
        "participatedAt".to_string(),
        if participated {
            json!(Utc::now())
        } else {
            Value::Null
        },
    );

    doc
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registration::registration_id;
    use jhalak_storage::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        admin: AdminService<MemoryStore>,
        ledger: RegistrationLedger<MemoryStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(EventCatalog::jhalak());

        Harness {
            admin: AdminService::new(&store, &catalog),
            ledger: RegistrationLedger::new(&store, &catalog),
            store,
        }
    }

    async fn seed_user(store: &MemoryStore, uid: &str, name: &str) {
        let profile = UserProfile {
            uid: uid.to_string(),
            name: name.to_string(),
            email: format!("{uid}@college.edu"),
            house: "Blue House".to_string(),
            ..Default::default()
        };

        store
            .set(collections::USERS, uid, to_document(&profile).unwrap())
            .await
            .unwrap();
    }

    async fn index_of(store: &MemoryStore, uid: &str) -> EventIndex {
        store
            .get(collections::REGISTRATIONS, uid)
            .await
            .unwrap()
            .map(|doc| from_document(doc).unwrap())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_add_user_to_event() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        let chest_no = h
            .admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        assert_eq!(chest_no, "101");

        let index = index_of(&h.store, "u1").await;
        assert!(index.contains("Quiz"));

        let reg = h
            .store
            .get(collections::EVENT_REGISTRATIONS, &registration_id("Quiz", "u1"))
            .await
            .unwrap();
        assert!(reg.is_some());
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_and_malformed_emails() {
        let h = harness();

        let missing = h.admin.add_user_to_event("Quiz", "nobody@college.edu").await;
        assert!(matches!(missing, Err(AdminError::UserNotFound)));

        let malformed = h.admin.add_user_to_event("Quiz", "not an email").await;
        assert!(matches!(malformed, Err(AdminError::InvalidEmail(_))));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_registration() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        let again = h.admin.add_user_to_event("Quiz", "u1@college.edu").await;

        assert!(matches!(again, Err(AdminError::AlreadyRegistered)));
    }

    #[tokio::test]
    async fn test_off_stage_limit_is_enforced() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        for event in ["Essay Writing", "Poetry Writing", "Pencil Drawing", "Photography"] {
            h.admin
                .add_user_to_event(event, "u1@college.edu")
                .await
                .unwrap();
        }

        let fifth = h.admin.add_user_to_event("Quiz", "u1@college.edu").await;
        let err = fifth.unwrap_err();

        assert!(matches!(err, AdminError::OffStageLimit));
        assert!(err.to_string().contains("Off-Stage"));

        // The failed attempt wrote nothing
        let index = index_of(&h.store, "u1").await;
        assert!(!index.contains("Quiz"));
    }

    #[tokio::test]
    async fn test_on_stage_individual_limit_is_enforced() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        for event in ["Solo Song", "Monoact", "Mimicry"] {
            h.admin
                .add_user_to_event(event, "u1@college.edu")
                .await
                .unwrap();
        }

        let fourth = h.admin.add_user_to_event("Elocution", "u1@college.edu").await;
        assert!(matches!(fourth, Err(AdminError::OnStageIndividualLimit)));
    }

    #[tokio::test]
    async fn test_group_limit_counts_team_events() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        // Existing group commitments live in the team side of the index
        h.store
            .patch(
                collections::REGISTRATIONS,
                "u1",
                vec![
                    FieldChange::array_union("teamEvents", "Group Song"),
                    FieldChange::array_union("teamEvents", "Group Dance"),
                ],
            )
            .await
            .unwrap();

        let third = h.admin.add_user_to_event("Skit", "u1@college.edu").await;
        assert!(matches!(third, Err(AdminError::OnStageGroupLimit)));
    }

    #[tokio::test]
    async fn test_schedule_conflict_names_the_existing_event() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        // Solo Song and Solo Dance share 2026-02-10
        h.admin
            .add_user_to_event("Solo Song", "u1@college.edu")
            .await
            .unwrap();
        let conflict = h.admin.add_user_to_event("Solo Dance", "u1@college.edu").await;

        match conflict.unwrap_err() {
            AdminError::ScheduleConflict { event, date } => {
                assert_eq!(event, "Solo Song");
                assert_eq!(date, "2026-02-10");
            }
            other => panic!("expected a schedule conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_individual_registration() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();

        let reg_id = registration_id("Quiz", "u1");
        h.admin
            .remove_user_from_event("Quiz", &reg_id, "u1", RegistrationKind::Individual)
            .await
            .unwrap();

        assert!(h
            .store
            .get(collections::EVENT_REGISTRATIONS, &reg_id)
            .await
            .unwrap()
            .is_none());
        assert!(!index_of(&h.store, "u1").await.contains("Quiz"));
    }

    #[tokio::test]
    async fn test_removing_the_leader_disbands_the_team() {
        let h = harness();
        for uid in ["lead", "m1", "m2"] {
            seed_user(&h.store, uid, uid).await;
        }

        let summary = h
            .ledger
            .register_team("lead", &["m1".to_string(), "m2".to_string()], "Agni", "Skit")
            .await
            .unwrap();

        let reg_id = registration_id("Skit", "lead");
        h.admin
            .remove_user_from_event("Skit", &reg_id, "lead", RegistrationKind::Team)
            .await
            .unwrap();

        assert!(h
            .store
            .get(collections::EVENT_REGISTRATIONS, &reg_id)
            .await
            .unwrap()
            .is_none());
        assert!(h
            .store
            .get(collections::TEAMS, &summary.team_id)
            .await
            .unwrap()
            .is_none());

        for uid in ["lead", "m1", "m2"] {
            assert!(
                !index_of(&h.store, uid).await.contains("Skit"),
                "{uid} still has the event indexed"
            );
        }
    }

    #[tokio::test]
    async fn test_removing_a_member_keeps_both_documents_set_equal() {
        let h = harness();
        for uid in ["lead", "m1", "m2"] {
            seed_user(&h.store, uid, uid).await;
        }

        let summary = h
            .ledger
            .register_team("lead", &["m1".to_string(), "m2".to_string()], "Agni", "Skit")
            .await
            .unwrap();

        let reg_id = registration_id("Skit", "lead");
        h.admin
            .remove_user_from_event("Skit", &reg_id, "m1", RegistrationKind::Team)
            .await
            .unwrap();

        let team = h
            .store
            .get(collections::TEAMS, &summary.team_id)
            .await
            .unwrap()
            .unwrap();
        let reg = h
            .store
            .get(collections::EVENT_REGISTRATIONS, &reg_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(team.get("memberIds"), reg.get("memberIds"));
        assert_eq!(team.get("memberIds"), Some(&json!(["lead", "m2"])));

        let roster: Vec<String> = team
            .get("members")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|m| m.get("uid").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(roster, vec!["lead", "m2"]);

        assert!(!index_of(&h.store, "m1").await.contains("Skit"));
        assert!(index_of(&h.store, "m2").await.contains("Skit"));
    }

    #[tokio::test]
    async fn test_reset_event_clears_registrations_teams_and_counter() {
        let h = harness();
        for uid in ["u1", "u2", "lead", "m1"] {
            seed_user(&h.store, uid, uid).await;
        }

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        h.admin
            .add_user_to_event("Quiz", "u2@college.edu")
            .await
            .unwrap();
        let summary = h
            .ledger
            .register_team("lead", &["m1".to_string()], "Agni", "Group Dance")
            .await
            .unwrap();

        let removed = h.admin.reset_event("Group Dance").await.unwrap();
        assert_eq!(removed, 1);

        assert!(h
            .store
            .get(collections::TEAMS, &summary.team_id)
            .await
            .unwrap()
            .is_none());
        assert!(!index_of(&h.store, "lead").await.contains("Group Dance"));
        assert!(!index_of(&h.store, "m1").await.contains("Group Dance"));

        let counter = h
            .store
            .get(collections::COUNTERS, "Group Dance")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.get("count"), Some(&json!(0)));

        // The other event is untouched
        assert!(index_of(&h.store, "u1").await.contains("Quiz"));
    }

    #[tokio::test]
    async fn test_participation_marking() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;
        seed_user(&h.store, "u2", "Binu").await;

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        h.admin
            .add_user_to_event("Quiz", "u2@college.edu")
            .await
            .unwrap();

        let ids = vec![registration_id("Quiz", "u1"), registration_id("Quiz", "u2")];
        let marked = h.admin.bulk_mark_participation(&ids, true).await.unwrap();
        assert_eq!(marked, 2);

        for id in &ids {
            let doc = h
                .store
                .get(collections::EVENT_REGISTRATIONS, id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(doc.get("participated"), Some(&json!(true)));
            assert!(doc.get("participatedAt").unwrap().is_string());
        }

        // Unmarking clears the timestamp
        h.admin.mark_participation(&ids[0], false).await.unwrap();
        let doc = h
            .store
            .get(collections::EVENT_REGISTRATIONS, &ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("participated"), Some(&json!(false)));
        assert!(doc.get("participatedAt").unwrap().is_null());

        assert_eq!(h.admin.bulk_mark_participation(&[], true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_event_stats_count_entries_and_participants() {
        let h = harness();
        for uid in ["u1", "lead", "m1", "m2"] {
            seed_user(&h.store, uid, uid).await;
        }

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        h.ledger
            .register_team(
                "lead",
                &["m1".to_string(), "m2".to_string()],
                "Agni",
                "Group Dance",
            )
            .await
            .unwrap();
        h.admin
            .toggle_event_registration("Quiz", false)
            .await
            .unwrap();

        let stats = h.admin.fetch_event_stats().await;

        let quiz = stats.iter().find(|s| s.title == "Quiz").unwrap();
        assert_eq!(quiz.entry_count, 1);
        assert_eq!(quiz.participant_count, 1);
        assert!(quiz.is_registration_closed);

        let dance = stats.iter().find(|s| s.title == "Group Dance").unwrap();
        assert_eq!(dance.entry_count, 1);
        assert_eq!(dance.participant_count, 3);
        assert!(!dance.is_registration_closed);

        // Catalog events with no registrations still appear
        let mehendi = stats.iter().find(|s| s.title == "Mehendi").unwrap();
        assert_eq!(mehendi.entry_count, 0);
    }

    #[tokio::test]
    async fn test_user_overview_spans_both_registration_shapes() {
        let h = harness();
        for uid in ["u1", "m1"] {
            seed_user(&h.store, uid, uid).await;
        }

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        h.ledger
            .register_team("u1", &["m1".to_string()], "Agni", "Skit")
            .await
            .unwrap();

        let views = h.admin.fetch_all_users_with_data().await;

        let u1 = views.iter().find(|v| v.profile.uid == "u1").unwrap();
        assert_eq!(u1.registration_count, 2);
        assert!(u1.events.contains(&"Quiz".to_string()));
        assert!(u1.events.contains(&"Skit".to_string()));

        let m1 = views.iter().find(|v| v.profile.uid == "m1").unwrap();
        assert_eq!(m1.registration_count, 1);
        assert_eq!(m1.events, vec!["Skit".to_string()]);
    }

    #[tokio::test]
    async fn test_detailed_registrations_join_profiles() {
        let h = harness();
        for uid in ["lead", "m1"] {
            seed_user(&h.store, uid, uid).await;
        }

        h.ledger
            .register_team("lead", &["m1".to_string()], "Agni", "Group Dance")
            .await
            .unwrap();

        let detailed = h
            .admin
            .fetch_detailed_event_registrations("Group Dance")
            .await;

        assert_eq!(detailed.len(), 1);
        let entry = &detailed[0];
        assert_eq!(entry.kind, RegistrationKind::Team);
        assert_eq!(entry.uid, "lead");
        assert_eq!(entry.team_name.as_deref(), Some("Agni"));
        assert_eq!(entry.chest_no, "GDN-01");

        // Members exclude the leader and carry their chest numbers
        assert_eq!(entry.members.len(), 1);
        assert_eq!(entry.members[0].uid, "m1");
        assert!(!entry.members[0].chest_no.is_empty());
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let h = harness();
        for uid in ["u1", "lead"] {
            seed_user(&h.store, uid, uid).await;
        }

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        let summary = h
            .ledger
            .register_team("lead", &["u1".to_string()], "Agni", "Skit")
            .await
            .unwrap();

        h.admin.delete_user("u1").await.unwrap();

        assert!(h.store.get(collections::USERS, "u1").await.unwrap().is_none());
        assert!(h
            .store
            .get(collections::REGISTRATIONS, "u1")
            .await
            .unwrap()
            .is_none());
        assert!(h
            .store
            .get(
                collections::EVENT_REGISTRATIONS,
                &registration_id("Quiz", "u1")
            )
            .await
            .unwrap()
            .is_none());

        // The team they belonged to no longer lists them
        let team = h
            .store
            .get(collections::TEAMS, &summary.team_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(team.get("memberIds"), Some(&json!(["lead"])));
    }

    #[tokio::test]
    async fn test_wipe_all_data() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();

        let deleted = h.admin.wipe_all_data().await.unwrap();
        assert!(deleted > 0);

        assert!(h.store.scan(collections::USERS).await.unwrap().is_empty());
        assert!(h
            .store
            .scan(collections::EVENT_REGISTRATIONS)
            .await
            .unwrap()
            .is_empty());
        assert!(h
            .store
            .scan(collections::TAKEN_CHEST_NUMBERS)
            .await
            .unwrap()
            .is_empty());

        let counter = h
            .store
            .get(collections::COUNTERS, GLOBAL_CHEST_COUNTER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.get("count"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_clean_user_registration_removes_stale_records() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        h.admin
            .add_user_to_event("Quiz", "u1@college.edu")
            .await
            .unwrap();
        h.admin.clean_user_registration("u1", "Quiz").await.unwrap();

        assert!(!index_of(&h.store, "u1").await.contains("Quiz"));
        assert!(h
            .store
            .get(
                collections::EVENT_REGISTRATIONS,
                &registration_id("Quiz", "u1")
            )
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_user_role() {
        let h = harness();
        seed_user(&h.store, "u1", "Asha").await;

        h.admin.update_user_role("u1", "moderator").await.unwrap();

        let doc = h.store.get(collections::USERS, "u1").await.unwrap().unwrap();
        assert_eq!(doc.get("role"), Some(&json!("moderator")));
        // The rest of the profile is untouched
        assert_eq!(doc.get("name"), Some(&json!("Asha")));
    }
}
