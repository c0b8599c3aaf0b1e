use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::try_join;
use log::warn;
use thiserror::Error;

use jhalak_storage::{from_document, to_document, DocumentStore, StorageError};

use crate::model::{
    collections, EventResult, NegativeMarking, Place, ResultEntry, UserProfile,
};
use crate::util::random_id;

/// Owns event results and the negative-marking ledger.
///
/// Write operations return typed errors for the caller to surface. Read paths
/// feeding the public leaderboard degrade to empty collections, reporting the
/// swallowed error through the log.
pub struct ResultsService<S> {
    store: Arc<S>,
}

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Result needs an event title")]
    MissingEventTitle,
    /// Chest numbers are the merge key of the scoreboard, so every entry must carry one
    #[error("The {0} place entry is missing a chest number")]
    MissingChestNo(Place),
    #[error("Negative marks must be zero or below, got {0}")]
    PositiveMarks(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl<S> ResultsService<S>
where
    S: DocumentStore,
{
    pub fn new(store: &Arc<S>) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Saves (upserts) the result for one event, stamping `updatedAt`
    pub async fn save_event_result(&self, result: EventResult) -> Result<(), ResultsError> {
        if result.event_title.is_empty() {
            return Err(ResultsError::MissingEventTitle);
        }

        for place in Place::ALL {
            if let Some(entry) = result.entry(place) {
                if entry.chest_no.is_empty() {
                    return Err(ResultsError::MissingChestNo(place));
                }
            }
        }

        let mut stamped = result;
        stamped.updated_at = Some(Utc::now());

        let doc = to_document(&stamped)?;
        self.store
            .set_merge(collections::EVENT_RESULTS, &stamped.event_title, doc)
            .await?;

        Ok(())
    }

    /// Fetches all results, enriching each entry's department and semester
    /// from the matching user profile by chest number.
    ///
    /// Returns an empty list when either read fails: this powers the public
    /// leaderboard, where showing nothing beats crashing the page.
    pub async fn fetch_all_results(&self) -> Vec<EventResult> {
        let scans = try_join!(
            self.store.scan(collections::EVENT_RESULTS),
            self.store.scan(collections::USERS),
        );

        let (result_rows, user_rows) = match scans {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading results view to empty: {e}");
                return Vec::new();
            }
        };

        let mut chest_index: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();

        for (_, doc) in user_rows {
            let Ok(user) = from_document::<UserProfile>(doc) else {
                continue;
            };

            if let Some(chest_no) = user.chest_no {
                let department = Some(user.department).filter(|d| !d.is_empty());
                let semester = Some(user.semester).filter(|s| !s.is_empty());
                chest_index.insert(chest_no, (department, semester));
            }
        }

        let enrich = |entry: &mut Option<ResultEntry>| {
            let Some(entry) = entry.as_mut() else {
                return;
            };

            if let Some((department, semester)) = chest_index.get(&entry.chest_no) {
                // Best-effort: never blank out a stored value
                if department.is_some() {
                    entry.department = department.clone();
                }
                if semester.is_some() {
                    entry.semester = semester.clone();
                }
            }
        };

        let mut results = Vec::new();

        for (key, doc) in result_rows {
            let mut result: EventResult = match from_document(doc) {
                Ok(result) => result,
                Err(e) => {
                    warn!("skipping malformed result document {key}: {e}");
                    continue;
                }
            };

            enrich(&mut result.first);
            enrich(&mut result.second);
            enrich(&mut result.third);
            results.push(result);
        }

        results
    }

    /// Fetches a single event's result, unenriched
    pub async fn fetch_event_result(&self, event_title: &str) -> Option<EventResult> {
        let doc = match self.store.get(collections::EVENT_RESULTS, event_title).await {
            Ok(doc) => doc?,
            Err(e) => {
                warn!("degrading result view for {event_title} to empty: {e}");
                return None;
            }
        };

        from_document(doc)
            .map_err(|e| warn!("malformed result document {event_title}: {e}"))
            .ok()
    }

    pub async fn delete_event_result(&self, event_title: &str) -> Result<(), ResultsError> {
        self.store
            .delete(collections::EVENT_RESULTS, event_title)
            .await?;

        Ok(())
    }

    /// Appends a marking to the penalty ledger, returning its generated id
    pub async fn add_negative_marking(
        &self,
        marking: NegativeMarking,
    ) -> Result<String, ResultsError> {
        if marking.marks > 0 {
            return Err(ResultsError::PositiveMarks(marking.marks));
        }

        let id = random_id(20);

        let mut stamped = marking;
        stamped.id = None;
        stamped.created_at = Some(Utc::now());

        let doc = to_document(&stamped)?;
        self.store
            .set(collections::NEGATIVE_MARKINGS, &id, doc)
            .await?;

        Ok(id)
    }

    pub async fn fetch_negative_markings(&self) -> Vec<NegativeMarking> {
        let rows = match self.store.scan(collections::NEGATIVE_MARKINGS).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("degrading markings view to empty: {e}");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|(id, doc)| {
                let mut marking: NegativeMarking = from_document(doc)
                    .map_err(|e| warn!("skipping malformed marking {id}: {e}"))
                    .ok()?;

                marking.id = Some(id);
                Some(marking)
            })
            .collect()
    }

    pub async fn delete_negative_marking(&self, id: &str) -> Result<(), ResultsError> {
        self.store.delete(collections::NEGATIVE_MARKINGS, id).await?;

        Ok(())
    }
}

impl<S> Clone for ResultsService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::EventType;
    use jhalak_storage::MemoryStore;

    fn service() -> ResultsService<MemoryStore> {
        ResultsService::new(&Arc::new(MemoryStore::new()))
    }

    fn entry(chest_no: &str, name: &str, house: &str) -> ResultEntry {
        ResultEntry {
            chest_no: chest_no.to_string(),
            name: name.to_string(),
            house: house.to_string(),
            team_name: None,
            department: None,
            semester: None,
        }
    }

    fn result(title: &str, first: Option<ResultEntry>) -> EventResult {
        EventResult {
            event_title: title.to_string(),
            event_type: EventType::Individual,
            first,
            second: None,
            third: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch_round_trip() {
        let results = service();

        results
            .save_event_result(result("Solo Song", Some(entry("101", "Asha", "Red House"))))
            .await
            .unwrap();

        let fetched = results.fetch_all_results().await;
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].event_title, "Solo Song");

        let first = fetched[0].first.as_ref().unwrap();
        assert_eq!(first.chest_no, "101");
        assert_eq!(first.name, "Asha");
        assert_eq!(first.house, "Red House");
        assert!(fetched[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_save_merges_into_existing_result() {
        let results = service();

        results
            .save_event_result(result("Solo Song", Some(entry("101", "Asha", "Red House"))))
            .await
            .unwrap();

        let mut second = result("Solo Song", Some(entry("101", "Asha", "Red House")));
        second.second = Some(entry("102", "Binu", "Blue House"));
        results.save_event_result(second).await.unwrap();

        let fetched = results.fetch_event_result("Solo Song").await.unwrap();
        assert!(fetched.first.is_some());
        assert!(fetched.second.is_some());
    }

    #[tokio::test]
    async fn test_save_rejects_entry_without_chest_no() {
        let results = service();

        let outcome = results
            .save_event_result(result("Solo Song", Some(entry("", "Asha", "Red House"))))
            .await;

        assert!(matches!(
            outcome,
            Err(ResultsError::MissingChestNo(Place::First))
        ));

        // Nothing was written
        assert!(results.fetch_event_result("Solo Song").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_enriches_from_user_profiles() {
        let store = Arc::new(MemoryStore::new());
        let results = ResultsService::new(&store);

        let user = UserProfile {
            uid: "u1".to_string(),
            name: "Asha".to_string(),
            department: "Physics".to_string(),
            semester: "S4".to_string(),
            chest_no: Some("101".to_string()),
            ..Default::default()
        };
        store
            .set(collections::USERS, "u1", to_document(&user).unwrap())
            .await
            .unwrap();

        results
            .save_event_result(result("Quiz", Some(entry("101", "Asha", "Red House"))))
            .await
            .unwrap();

        // A winner with no live profile keeps stored values
        results
            .save_event_result(result("Mehendi", Some(entry("999", "Guest", "Blue House"))))
            .await
            .unwrap();

        let fetched = results.fetch_all_results().await;
        let quiz = fetched.iter().find(|r| r.event_title == "Quiz").unwrap();
        let first = quiz.first.as_ref().unwrap();
        assert_eq!(first.department.as_deref(), Some("Physics"));
        assert_eq!(first.semester.as_deref(), Some("S4"));

        let mehendi = fetched.iter().find(|r| r.event_title == "Mehendi").unwrap();
        assert!(mehendi.first.as_ref().unwrap().department.is_none());
    }

    #[tokio::test]
    async fn test_delete_event_result() {
        let results = service();

        results
            .save_event_result(result("Quiz", Some(entry("101", "Asha", "Red House"))))
            .await
            .unwrap();
        results.delete_event_result("Quiz").await.unwrap();

        assert!(results.fetch_event_result("Quiz").await.is_none());
        assert!(results.fetch_all_results().await.is_empty());
    }

    #[tokio::test]
    async fn test_negative_marking_lifecycle() {
        let results = service();

        let id = results
            .add_negative_marking(NegativeMarking {
                id: None,
                house: "Red House".to_string(),
                offense: "Late reporting for the event".to_string(),
                marks: -2,
                event_title: Some("Quiz".to_string()),
                note: None,
                created_at: None,
            })
            .await
            .unwrap();

        let markings = results.fetch_negative_markings().await;
        assert_eq!(markings.len(), 1);
        assert_eq!(markings[0].id.as_deref(), Some(id.as_str()));
        assert_eq!(markings[0].marks, -2);
        assert!(markings[0].created_at.is_some());

        results.delete_negative_marking(&id).await.unwrap();
        assert!(results.fetch_negative_markings().await.is_empty());
    }

    #[tokio::test]
    async fn test_positive_marks_are_rejected() {
        let results = service();

        let outcome = results
            .add_negative_marking(NegativeMarking {
                id: None,
                house: "Red House".to_string(),
                offense: "Abusive Themes".to_string(),
                marks: 10,
                event_title: None,
                note: None,
                created_at: None,
            })
            .await;

        assert!(matches!(outcome, Err(ResultsError::PositiveMarks(10))));
    }
}
