mod admin;
mod catalog;
mod logging;
mod model;
mod registration;
mod results;
mod scoring;
mod util;

use std::sync::Arc;

pub use admin::*;
pub use catalog::*;
pub use logging::*;
pub use model::*;
pub use registration::*;
pub use results::*;
pub use scoring::*;

use jhalak_storage::DocumentStore;

/// The jhalak festival system, facilitating registrations, results, and the
/// house leaderboard over any document store.
pub struct Jhalak<S> {
    store: Arc<S>,
    catalog: Arc<EventCatalog>,

    pub registrations: RegistrationLedger<S>,
    pub results: ResultsService<S>,
    pub admin: AdminService<S>,
}

impl<S> Jhalak<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, catalog: EventCatalog) -> Self {
        let store = Arc::new(store);
        let catalog = Arc::new(catalog);

        Self {
            registrations: RegistrationLedger::new(&store, &catalog),
            results: ResultsService::new(&store),
            admin: AdminService::new(&store, &catalog),
            store,
            catalog,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// Computes the current house leaderboard from stored results and the
    /// penalty ledger.
    pub async fn house_standings(&self) -> HouseStandings {
        let results = self.results.fetch_all_results().await;
        let markings = self.results.fetch_negative_markings().await;

        compute_house_scores(&results, &markings)
    }

    /// Computes the per-house event win breakdown.
    pub async fn house_details(&self) -> HouseDetails {
        let results = self.results.fetch_all_results().await;
        let markings = self.results.fetch_negative_markings().await;

        compute_house_details(&results, &markings)
    }

    /// Computes the individual scoreboard across all event results.
    pub async fn individual_scores(&self) -> Vec<IndividualScore> {
        let results = self.results.fetch_all_results().await;

        compute_individual_scores(&results)
    }
}

impl<S> Clone for Jhalak<S>
where
    S: DocumentStore,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: self.catalog.clone(),
            registrations: self.registrations.clone(),
            results: self.results.clone(),
            admin: self.admin.clone(),
        }
    }
}
