//! Orchestration of one batch run
//!
//! Cities are processed strictly one after another: fetch, normalize, load.
//! What happens after a failed city is decided by the [`FailurePolicy`].

use crate::config::{AppConfig, FailurePolicy, load_cities};
use crate::loader::Loader;
use crate::normalize::normalize;
use crate::warehouse::{MemoryWarehouse, PostgresWarehouse, Warehouse};
use crate::weather::{WeatherSource, WeatherstackClient};
use crate::{LoadError, Result};
use std::fmt;
use tracing::{error, info, info_span, warn, Instrument};

/// Per-city processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Normalize,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Load => "load",
        };
        f.write_str(name)
    }
}

/// Result of processing one city
#[derive(Debug)]
pub enum CityOutcome {
    Loaded { city: String, columns: usize },
    Failed { city: String, stage: Stage, error: LoadError },
}

impl CityOutcome {
    #[must_use]
    pub fn city(&self) -> &str {
        match self {
            CityOutcome::Loaded { city, .. } | CityOutcome::Failed { city, .. } => city,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self, CityOutcome::Loaded { .. })
    }
}

/// Summary of a batch run
#[derive(Debug, Default)]
pub struct RunReport {
    /// One entry per attempted city, in processing order
    pub outcomes: Vec<CityOutcome>,
    pub rows_appended: u64,
    /// Cities never attempted because the run stopped early
    pub skipped: Vec<String>,
}

impl RunReport {
    /// True when every configured city was loaded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.outcomes.iter().all(CityOutcome::is_loaded)
    }

    #[must_use]
    pub fn aborted(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CityOutcome> {
        self.outcomes.iter().filter(|o| !o.is_loaded())
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_loaded()).count()
    }
}

/// Drives fetch, normalize and load for every city
#[derive(Debug)]
pub struct Pipeline<S, W> {
    source: S,
    loader: Loader<W>,
    policy: FailurePolicy,
}

impl<S: WeatherSource, W: Warehouse> Pipeline<S, W> {
    pub fn new(source: S, loader: Loader<W>, policy: FailurePolicy) -> Self {
        Self {
            source,
            loader,
            policy,
        }
    }

    /// Run the batch over `cities` in order.
    ///
    /// Only the initial schema ensure can make this return `Err`; per-city
    /// failures end up in the report.
    pub async fn run(&mut self, cities: &[String]) -> Result<RunReport> {
        self.loader.prepare().await?;

        let mut report = RunReport::default();
        for (index, city) in cities.iter().enumerate() {
            let span = info_span!("city", city = %city);
            match self.process_city(city).instrument(span).await {
                Ok((columns, written)) => {
                    report.rows_appended += written;
                    report.outcomes.push(CityOutcome::Loaded {
                        city: city.clone(),
                        columns,
                    });
                }
                Err((stage, error)) => {
                    error!(
                        city = %city,
                        %stage,
                        kind = error.kind(),
                        "Error occurred: {error}"
                    );
                    report.outcomes.push(CityOutcome::Failed {
                        city: city.clone(),
                        stage,
                        error,
                    });

                    if self.policy == FailurePolicy::Abort {
                        report.skipped = cities[index + 1..].to_vec();
                        if !report.skipped.is_empty() {
                            warn!(
                                remaining = report.skipped.len(),
                                "Aborting run, remaining cities are skipped"
                            );
                        }
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Returns the column count of the row and the number of rows written
    async fn process_city(
        &mut self,
        city: &str,
    ) -> std::result::Result<(usize, u64), (Stage, LoadError)> {
        info!("Fetching weather data for {city}");
        let raw = self
            .source
            .fetch_current(city)
            .await
            .map_err(|e| (Stage::Fetch, e))?;

        info!("Normalizing");
        let row = normalize(&raw).map_err(|e| (Stage::Normalize, e))?;
        let columns = row.len();

        info!("Inserting into {}", self.loader.target());
        let written = self
            .loader
            .load(std::slice::from_ref(&row))
            .await
            .map_err(|e| (Stage::Load, e))?;

        Ok((columns, written))
    }

    pub fn loader(&self) -> &Loader<W> {
        &self.loader
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Execute a full run from resolved configuration.
///
/// The city list is read before any network activity. With `dry_run` the
/// rows go to an in-memory warehouse instead of the real one.
pub async fn run(config: &AppConfig, dry_run: bool) -> Result<RunReport> {
    let cities = load_cities(&config.cities_path)?;
    info!(
        count = cities.len(),
        path = %config.cities_path.display(),
        "Loaded city list"
    );

    let source = WeatherstackClient::new(&config.weather, &config.credentials.api_key)?;
    let destination = &config.credentials.warehouse;

    if dry_run {
        info!("Dry run, rows are kept in memory");
        let loader = Loader::new(
            MemoryWarehouse::new(),
            destination.schema.as_str(),
            destination.table.as_str(),
        );
        return Pipeline::new(source, loader, config.failure_policy)
            .run(&cities)
            .await;
    }

    let warehouse = PostgresWarehouse::connect(destination).await?;
    let loader = Loader::new(
        warehouse,
        destination.schema.as_str(),
        destination.table.as_str(),
    );
    Pipeline::new(source, loader, config.failure_policy)
        .run(&cities)
        .await
}
