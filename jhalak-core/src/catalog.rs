use serde::{Deserialize, Serialize};

/// Whether an event is contested by individuals or teams.
///
/// Selects the point table used when scoring the event's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Individual,
    Group,
}

/// The registration-limit bucket an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    OffStage,
    OnStage,
    Flagship,
}

/// A single event definition from the festival programme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub title: String,
    pub short_code: String,
    pub event_type: EventType,
    pub category_type: CategoryType,
    /// Scheduled date as `YYYY-MM-DD`, absent for events judged offline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A display grouping of events, as shown on the registration page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCategory {
    pub title: String,
    pub items: Vec<EventDefinition>,
}

/// The static festival programme.
///
/// Read-only: the core validates registrations against it and mints team
/// chest numbers from its short codes, but never mutates it.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    categories: Vec<EventCategory>,
}

impl EventCatalog {
    pub fn new(categories: Vec<EventCategory>) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &[EventCategory] {
        &self.categories
    }

    /// Every event across all categories, paired with its category title
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventDefinition)> {
        self.categories
            .iter()
            .flat_map(|cat| cat.items.iter().map(move |item| (cat.title.as_str(), item)))
    }

    pub fn find(&self, title: &str) -> Option<&EventDefinition> {
        self.iter()
            .map(|(_, item)| item)
            .find(|item| item.title == title)
    }

    /// The Jhalak programme the application ships with.
    pub fn jhalak() -> Self {
        fn event(
            title: &str,
            short_code: &str,
            event_type: EventType,
            category_type: CategoryType,
            date: Option<&str>,
        ) -> EventDefinition {
            EventDefinition {
                title: title.to_string(),
                short_code: short_code.to_string(),
                event_type,
                category_type,
                date: date.map(str::to_string),
            }
        }

        use CategoryType::{Flagship, OffStage, OnStage};
        use EventType::{Group, Individual};

        Self::new(vec![
            EventCategory {
                title: "Off-Stage".to_string(),
                items: vec![
                    event("Essay Writing", "ESS", Individual, OffStage, None),
                    event("Poetry Writing", "POE", Individual, OffStage, None),
                    event("Pencil Drawing", "PEN", Individual, OffStage, None),
                    event("Photography", "PHO", Individual, OffStage, None),
                    event("Quiz", "QUZ", Individual, OffStage, None),
                    event("Mehendi", "MEH", Individual, OffStage, None),
                ],
            },
            EventCategory {
                title: "On-Stage (Individual)".to_string(),
                items: vec![
                    event("Solo Song", "SSG", Individual, OnStage, Some("2026-02-10")),
                    event("Solo Dance", "SDN", Individual, OnStage, Some("2026-02-10")),
                    event("Monoact", "MNA", Individual, OnStage, Some("2026-02-11")),
                    event("Elocution", "ELO", Individual, OnStage, Some("2026-02-11")),
                    event("Mimicry", "MIM", Individual, OnStage, Some("2026-02-12")),
                ],
            },
            EventCategory {
                title: "On-Stage (Group)".to_string(),
                items: vec![
                    event("Group Song", "GSG", Group, OnStage, Some("2026-02-12")),
                    event("Group Dance", "GDN", Group, OnStage, Some("2026-02-13")),
                    event("Skit", "SKT", Group, OnStage, Some("2026-02-13")),
                ],
            },
            EventCategory {
                title: "Flagship".to_string(),
                items: vec![
                    event("Fashion Show", "FSH", Group, Flagship, Some("2026-02-14")),
                    event("Battle of Bands", "BOB", Group, Flagship, Some("2026-02-14")),
                ],
            },
        ])
    }
}
