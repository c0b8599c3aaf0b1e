use std::collections::HashMap;

use crate::catalog::EventType;
use crate::model::{EventResult, House, NegativeMarking, Place, ResultEntry};

/// Points awarded per place for one event type.
#[derive(Debug, Clone, Copy)]
pub struct PointTable {
    pub first: i64,
    pub second: i64,
    pub third: i64,
}

impl PointTable {
    pub fn points(&self, place: Place) -> i64 {
        match place {
            Place::First => self.first,
            Place::Second => self.second,
            Place::Third => self.third,
        }
    }
}

pub const INDIVIDUAL_POINTS: PointTable = PointTable {
    first: 5,
    second: 3,
    third: 1,
};

pub const GROUP_POINTS: PointTable = PointTable {
    first: 10,
    second: 6,
    third: 2,
};

pub fn point_table(event_type: EventType) -> PointTable {
    match event_type {
        EventType::Individual => INDIVIDUAL_POINTS,
        EventType::Group => GROUP_POINTS,
    }
}

/// The preset offenses an admin can pick when adding a negative marking.
pub const NEGATIVE_OFFENSES: [(&str, i64); 5] = [
    ("Abusive Themes", -10),
    ("Variation in Screened items", -10),
    ("In-Disciplinary Actions", -5),
    ("Not reporting for the event", -3),
    ("Late reporting for the event", -2),
];

/// One house's aggregate on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseScore {
    pub house: House,
    pub positive: i64,
    pub negative: i64,
    pub total: i64,
    pub first_places: u32,
    pub second_places: u32,
    pub third_places: u32,
}

impl HouseScore {
    fn new(house: House) -> Self {
        Self {
            house,
            positive: 0,
            negative: 0,
            total: 0,
            first_places: 0,
            second_places: 0,
            third_places: 0,
        }
    }
}

/// The house leaderboard, sorted descending by total.
///
/// `dropped_entries` counts result entries and markings whose house string
/// failed to resolve to a canonical house and therefore contributed nothing.
#[derive(Debug, Clone)]
pub struct HouseStandings {
    pub houses: Vec<HouseScore>,
    pub dropped_entries: usize,
}

/// Rolls results and markings up into the four-house leaderboard.
///
/// Summation is order-independent, and totals may go negative: there is no
/// flooring at zero.
pub fn compute_house_scores(
    results: &[EventResult],
    markings: &[NegativeMarking],
) -> HouseStandings {
    let mut houses: Vec<HouseScore> = House::ALL.into_iter().map(HouseScore::new).collect();
    let mut dropped = 0usize;

    for result in results {
        let table = point_table(result.event_type);

        for place in Place::ALL {
            let Some(entry) = result.entry(place) else {
                continue;
            };

            let Some(house) = House::parse(&entry.house) else {
                dropped += 1;
                continue;
            };

            let score = score_for(&mut houses, house);
            score.positive += table.points(place);

            match place {
                Place::First => score.first_places += 1,
                Place::Second => score.second_places += 1,
                Place::Third => score.third_places += 1,
            }
        }
    }

    for marking in markings {
        let Some(house) = House::parse(&marking.house) else {
            dropped += 1;
            continue;
        };

        // Marks are stored negative already
        score_for(&mut houses, house).negative += marking.marks;
    }

    for score in &mut houses {
        score.total = score.positive + score.negative;
    }

    houses.sort_by(|a, b| b.total.cmp(&a.total));

    HouseStandings {
        houses,
        dropped_entries: dropped,
    }
}

fn score_for(houses: &mut [HouseScore], house: House) -> &mut HouseScore {
    houses
        .iter_mut()
        .find(|score| score.house == house)
        .expect("every canonical house has an accumulator")
}

/// One row of the individual scoreboard.
#[derive(Debug, Clone)]
pub struct IndividualScore {
    pub name: String,
    pub chest_no: String,
    pub house: String,
    pub team_name: Option<String>,
    pub department: Option<String>,
    pub semester: Option<String>,
    pub total_points: i64,
    pub wins: Vec<Win>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Win {
    pub event_title: String,
    pub place: Place,
    pub pts: i64,
}

/// Accumulates points per participant across all results, sorted descending
/// by total points.
///
/// Participants are keyed by chest number, falling back to the entry's name
/// when the chest number is blank on a legacy document.
pub fn compute_individual_scores(results: &[EventResult]) -> Vec<IndividualScore> {
    let mut scores: Vec<IndividualScore> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut upsert = |entry: &ResultEntry, place: Place, pts: i64, event_title: &str| {
        let key = if entry.chest_no.is_empty() {
            entry.name.clone()
        } else {
            entry.chest_no.clone()
        };

        let at = *index.entry(key).or_insert_with(|| {
            scores.push(IndividualScore {
                name: entry.name.clone(),
                chest_no: entry.chest_no.clone(),
                house: House::parse(&entry.house)
                    .map(|h| h.title().to_string())
                    .unwrap_or_else(|| entry.house.clone()),
                team_name: entry.team_name.clone(),
                department: entry.department.clone(),
                semester: entry.semester.clone(),
                total_points: 0,
                wins: Vec::new(),
            });

            scores.len() - 1
        });

        scores[at].total_points += pts;
        scores[at].wins.push(Win {
            event_title: event_title.to_string(),
            place,
            pts,
        });
    };

    for result in results {
        let table = point_table(result.event_type);

        for place in Place::ALL {
            if let Some(entry) = result.entry(place) {
                upsert(entry, place, table.points(place), &result.event_title);
            }
        }
    }

    scores.sort_by(|a, b| b.total_points.cmp(&a.total_points));
    scores
}

/// A win retained for the house drill-down view.
#[derive(Debug, Clone)]
pub struct HouseEventWin {
    pub event_title: String,
    pub event_type: EventType,
    pub place: Place,
    pub pts: i64,
    pub winner: ResultEntry,
}

/// One house's drill-down: every win and penalty with subtotals.
#[derive(Debug, Clone)]
pub struct HouseDetail {
    pub house: House,
    pub wins: Vec<HouseEventWin>,
    pub negative_markings: Vec<NegativeMarking>,
    pub positive_total: i64,
    pub negative_total: i64,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct HouseDetails {
    pub houses: Vec<HouseDetail>,
    pub dropped_entries: usize,
}

/// Same traversal as [`compute_house_scores`], retaining the full win and
/// marking lists per house.
pub fn compute_house_details(
    results: &[EventResult],
    markings: &[NegativeMarking],
) -> HouseDetails {
    let mut houses: Vec<HouseDetail> = House::ALL
        .into_iter()
        .map(|house| HouseDetail {
            house,
            wins: Vec::new(),
            negative_markings: Vec::new(),
            positive_total: 0,
            negative_total: 0,
            total: 0,
        })
        .collect();

    let mut dropped = 0usize;

    for result in results {
        let table = point_table(result.event_type);

        for place in Place::ALL {
            let Some(entry) = result.entry(place) else {
                continue;
            };

            let Some(house) = House::parse(&entry.house) else {
                dropped += 1;
                continue;
            };

            let detail = houses
                .iter_mut()
                .find(|d| d.house == house)
                .expect("every canonical house has a detail bucket");

            let pts = table.points(place);
            detail.wins.push(HouseEventWin {
                event_title: result.event_title.clone(),
                event_type: result.event_type,
                place,
                pts,
                winner: entry.clone(),
            });
            detail.positive_total += pts;
        }
    }

    for marking in markings {
        let Some(house) = House::parse(&marking.house) else {
            dropped += 1;
            continue;
        };

        let detail = houses
            .iter_mut()
            .find(|d| d.house == house)
            .expect("every canonical house has a detail bucket");

        detail.negative_markings.push(marking.clone());
        detail.negative_total += marking.marks;
    }

    for detail in &mut houses {
        detail.total = detail.positive_total + detail.negative_total;
    }

    houses.sort_by(|a, b| b.total.cmp(&a.total));

    HouseDetails {
        houses,
        dropped_entries: dropped,
    }
}
