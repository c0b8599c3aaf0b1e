use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::EventType;

/// Collection names used by the stored schema.
pub mod collections {
    pub const USERS: &str = "users";
    /// Per-user event index, keyed by uid
    pub const REGISTRATIONS: &str = "registrations";
    pub const EVENT_REGISTRATIONS: &str = "event_registrations";
    pub const TEAMS: &str = "teams";
    pub const EVENT_RESULTS: &str = "event_results";
    pub const NEGATIVE_MARKINGS: &str = "negative_markings";
    pub const COUNTERS: &str = "counters";
    /// Lock records for chest numbers claimed by in-flight or past allocations
    pub const TAKEN_CHEST_NUMBERS: &str = "taken_chest_numbers";
    pub const EVENT_SETTINGS: &str = "event_settings";
}

/// The counter document minting personal chest numbers.
pub const GLOBAL_CHEST_COUNTER: &str = "user_chest_numbers";

/// A participant profile, created on signup.
///
/// `chest_no` is absent until the first event registration assigns one, and
/// is never changed afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub college_id: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub semester: String,
    #[serde(default)]
    pub house: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chest_no: Option<String>,
    #[serde(default)]
    pub role: String,
}

/// One of the four canonical houses all scores aggregate into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum House {
    #[serde(rename = "Red House")]
    Red,
    #[serde(rename = "Blue House")]
    Blue,
    #[serde(rename = "Green House")]
    Green,
    #[serde(rename = "Yellow House")]
    Yellow,
}

impl House {
    pub const ALL: [House; 4] = [House::Red, House::Blue, House::Green, House::Yellow];

    /// Fuzzy-matches a stored house string to a canonical house.
    ///
    /// House strings come from free-text profile fields, so matching is by
    /// case-insensitive containment of the color name. Anything else is
    /// dropped from aggregation by the callers.
    pub fn parse(raw: &str) -> Option<House> {
        let lower = raw.to_lowercase();

        if lower.contains("red") {
            Some(House::Red)
        } else if lower.contains("blue") {
            Some(House::Blue)
        } else if lower.contains("green") {
            Some(House::Green)
        } else if lower.contains("yellow") {
            Some(House::Yellow)
        } else {
            None
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            House::Red => "Red House",
            House::Blue => "Blue House",
            House::Green => "Green House",
            House::Yellow => "Yellow House",
        }
    }
}

impl fmt::Display for House {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A registration document, one per event per individual or team.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistrationDoc {
    Individual(IndividualRegistration),
    Team(TeamRegistration),
}

impl RegistrationDoc {
    pub fn event_title(&self) -> &str {
        match self {
            RegistrationDoc::Individual(reg) => &reg.event_title,
            RegistrationDoc::Team(reg) => &reg.event_title,
        }
    }

    pub fn kind(&self) -> RegistrationKind {
        match self {
            RegistrationDoc::Individual(_) => RegistrationKind::Individual,
            RegistrationDoc::Team(_) => RegistrationKind::Team,
        }
    }

    /// The number of people the registration covers
    pub fn participant_count(&self) -> usize {
        match self {
            RegistrationDoc::Individual(_) => 1,
            RegistrationDoc::Team(reg) => reg.member_ids.len(),
        }
    }
}

/// Discriminates the two registration shapes at the API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationKind {
    Individual,
    Team,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualRegistration {
    pub user_id: String,
    #[serde(default)]
    pub chest_no: String,
    pub event_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participated_at: Option<DateTime<Utc>>,
}

/// Invariant: `member_ids` is non-empty and always includes `leader_id`, and
/// stays set-equal with the matching team document's `member_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRegistration {
    pub leader_id: String,
    pub team_id: String,
    pub team_name: String,
    #[serde(default)]
    pub team_chest_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_chest_no: Option<String>,
    pub event_title: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    /// Member uid mapped to the personal chest number at registration time
    #[serde(default)]
    pub member_chest_nos: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participated_at: Option<DateTime<Utc>>,
}

/// The team record mirroring a team registration's membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDoc {
    pub team_id: String,
    pub team_name: String,
    pub leader_id: String,
    pub event_title: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chest_no: String,
}

/// The per-user event index: flat lists of registered event titles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIndex {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub team_events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EventIndex {
    pub fn contains(&self, event_title: &str) -> bool {
        self.events.iter().any(|e| e == event_title)
            || self.team_events.iter().any(|e| e == event_title)
    }

    pub fn all_titles(&self) -> impl Iterator<Item = &str> {
        self.events
            .iter()
            .chain(self.team_events.iter())
            .map(String::as_str)
    }
}

/// A result entry slot: first, second or third.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Place {
    First,
    Second,
    Third,
}

impl Place {
    pub const ALL: [Place; 3] = [Place::First, Place::Second, Place::Third];
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Place::First => "first",
            Place::Second => "second",
            Place::Third => "third",
        };

        f.write_str(name)
    }
}

/// The result document for one event, keyed by event title.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResult {
    pub event_title: String,
    /// Results saved before the type split are scored as individual events
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<ResultEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<ResultEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third: Option<ResultEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EventResult {
    pub fn entry(&self, place: Place) -> Option<&ResultEntry> {
        match place {
            Place::First => self.first.as_ref(),
            Place::Second => self.second.as_ref(),
            Place::Third => self.third.as_ref(),
        }
    }

    pub fn entry_mut(&mut self, place: Place) -> Option<&mut ResultEntry> {
        match place {
            Place::First => self.first.as_mut(),
            Place::Second => self.second.as_mut(),
            Place::Third => self.third.as_mut(),
        }
    }
}

/// A snapshot of a winner at result-entry time.
///
/// The chest number is the only key; it is not validated against the
/// registration ledger, so manually entered winners are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub chest_no: String,
    pub name: String,
    #[serde(default)]
    pub house: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// Enriched at read time from the matching user profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
}

/// An append-only penalty ledger entry. `marks` is stored negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegativeMarking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub house: String,
    pub offense: String,
    pub marks: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A registration document together with its id.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub id: String,
    pub registration: RegistrationDoc,
}

/// Per-user overview for the admin user table.
#[derive(Debug, Clone)]
pub struct AdminUserView {
    pub profile: UserProfile,
    pub registration_count: usize,
    pub chest_numbers: Vec<String>,
    pub events: Vec<String>,
}

/// Per-event registration statistics, seeded from the catalog.
#[derive(Debug, Clone)]
pub struct EventStat {
    pub title: String,
    pub short_code: String,
    pub event_type: EventType,
    pub category: String,
    pub entry_count: usize,
    pub participant_count: usize,
    pub registrations: Vec<RegistrationRecord>,
    pub is_registration_closed: bool,
}

/// A registration joined with live user profiles, for the detailed event view
/// and spreadsheet export.
#[derive(Debug, Clone)]
pub struct DetailedRegistration {
    pub id: String,
    pub kind: RegistrationKind,
    pub chest_no: String,
    pub uid: String,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub college_id: String,
    pub department: String,
    pub semester: String,
    pub house: String,
    pub team_name: Option<String>,
    pub team_chest_no: Option<String>,
    pub leader_chest_no: Option<String>,
    pub members: Vec<DetailedMember>,
    pub registered_at: Option<DateTime<Utc>>,
    pub participated: bool,
    pub participated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DetailedMember {
    pub uid: String,
    pub name: String,
    pub chest_no: String,
    pub email: String,
    pub mobile: String,
    pub college_id: String,
    pub department: String,
    pub semester: String,
    pub house: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_house_parse_is_fuzzy() {
        assert_eq!(House::parse("Red House"), Some(House::Red));
        assert_eq!(House::parse("red"), Some(House::Red));
        assert_eq!(House::parse("BLUE team"), Some(House::Blue));
        assert_eq!(House::parse("greenhouse"), Some(House::Green));
        assert_eq!(House::parse("Yellow"), Some(House::Yellow));
        assert_eq!(House::parse("Violet House"), None);
        assert_eq!(House::parse(""), None);
    }

    #[test]
    fn test_registration_doc_tagging() {
        let reg = RegistrationDoc::Individual(IndividualRegistration {
            user_id: "u1".to_string(),
            chest_no: "101".to_string(),
            event_title: "Quiz".to_string(),
            registered_at: None,
            participated: false,
            participated_at: None,
        });

        let value = serde_json::to_value(&reg).unwrap();
        assert_eq!(value.get("type"), Some(&serde_json::json!("individual")));
        assert_eq!(value.get("userId"), Some(&serde_json::json!("u1")));

        let parsed: RegistrationDoc = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.kind(), RegistrationKind::Individual);
        assert_eq!(parsed.event_title(), "Quiz");
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let entry = ResultEntry {
            chest_no: "101".to_string(),
            name: "Asha".to_string(),
            house: "Red House".to_string(),
            team_name: None,
            department: None,
            semester: None,
        };

        let value = serde_json::to_value(&entry).unwrap();
        let map = value.as_object().unwrap();
        assert!(!map.contains_key("teamName"));
        assert!(!map.contains_key("department"));
    }
}
