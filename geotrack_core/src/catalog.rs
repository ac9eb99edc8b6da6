//! Entity Catalog - the static per-run population of trackers.
//!
//! Loaded once at startup from a population source. The load generator
//! addresses entities by index; operator commands address them by id.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use geotrack_env::EntityId;
use tracing::{info, warn};

use crate::condition::Condition;
use crate::error::ConfigurationError;
use crate::event::{ConditionEvent, SiteInfo};

/// Column order of the population CSV.
pub const POPULATION_HEADERS: [&str; 7] = ["id", "type", "status", "region", "longitude", "latitude", "attacked"];

/// Immutable description of one tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub node_type: String,
    pub region: String,
    pub longitude: f64,
    pub latitude: f64,
    pub condition: Condition,

    /// Start the run under attack
    pub attack_eligible: bool,
}

impl EntityDescriptor {
    /// Builds the Init event announcing this tracker.
    pub fn init_event(&self) -> ConditionEvent {
        ConditionEvent::init(
            self.id.clone(),
            self.condition,
            SiteInfo {
                node_type: self.node_type.clone(),
                region: self.region.clone(),
                latitude: self.latitude,
                longitude: self.longitude,
            },
        )
    }

    /// Parses one CSV row in `POPULATION_HEADERS` order.
    pub fn parse_row(line_no: usize, line: &str) -> Result<Self, ConfigurationError> {
        let malformed = |reason: String| ConfigurationError::MalformedRow { line: line_no, reason };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != POPULATION_HEADERS.len() {
            return Err(malformed(format!(
                "expected {} fields, found {}",
                POPULATION_HEADERS.len(),
                fields.len()
            )));
        }
        if fields[0].is_empty() {
            return Err(malformed("empty id".to_string()));
        }

        let condition = Condition::from_status_color(fields[2])
            .ok_or_else(|| malformed(format!("unknown status '{}'", fields[2])))?;
        let longitude = fields[4]
            .parse::<f64>()
            .map_err(|e| malformed(format!("longitude '{}': {}", fields[4], e)))?;
        let latitude = fields[5]
            .parse::<f64>()
            .map_err(|e| malformed(format!("latitude '{}': {}", fields[5], e)))?;
        let attack_eligible = fields[6]
            .to_lowercase()
            .parse::<bool>()
            .map_err(|e| malformed(format!("attacked '{}': {}", fields[6], e)))?;

        Ok(Self {
            id: EntityId::new(fields[0]),
            node_type: fields[1].to_string(),
            region: fields[3].to_string(),
            longitude,
            latitude,
            condition,
            attack_eligible,
        })
    }
}

/// The loaded population, addressable by index and by id.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    entities: Vec<EntityDescriptor>,
    index: HashMap<EntityId, usize>,
}

impl EntityCatalog {
    /// Builds a catalog, dropping descriptors whose id was already seen.
    pub fn new(descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            if catalog.index.contains_key(&descriptor.id) {
                warn!("Duplicate tracker id {} ignored", descriptor.id);
                continue;
            }
            catalog.index.insert(descriptor.id.clone(), catalog.entities.len());
            catalog.entities.push(descriptor);
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the descriptor at `idx`.
    pub fn get(&self, idx: usize) -> Option<&EntityDescriptor> {
        self.entities.get(idx)
    }

    /// Looks up an entity index by id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter()
    }
}

/// Outcome of reading a population source.
#[derive(Debug)]
pub struct PopulationReport {
    pub catalog: EntityCatalog,

    /// Number of trackers asked for
    pub requested: usize,

    /// Rows that were reported and skipped
    pub rejected: Vec<ConfigurationError>,
}

impl PopulationReport {
    /// True when fewer trackers were loaded than requested.
    pub fn is_short(&self) -> bool {
        self.catalog.len() < self.requested
    }
}

/// Reads the ordered tracker population from a CSV source.
#[derive(Debug, Clone)]
pub struct PopulationLoader {
    requested: usize,
    priority_ids: Vec<String>,
}

impl PopulationLoader {
    /// Creates a loader that takes up to `requested` trackers.
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            priority_ids: Vec::new(),
        }
    }

    /// Ids that must make it into a small population.
    ///
    /// When `requested` does not exceed the number of priority ids, only
    /// rows whose id is in this list are admitted.
    pub fn with_priority_ids(mut self, ids: &[&str]) -> Self {
        self.priority_ids = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Loads the population from a file path.
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<PopulationReport, ConfigurationError> {
        let file = File::open(path.as_ref())?;
        self.load(BufReader::new(file))
    }

    /// Loads the population from any buffered reader; the first line is a header.
    ///
    /// Malformed rows are reported and skipped. A short source is not an
    /// error: the run proceeds with what was found.
    pub fn load<R: BufRead>(&self, reader: R) -> Result<PopulationReport, ConfigurationError> {
        info!("Attempting to read in and create {} trackers", self.requested);

        let only_priority = !self.priority_ids.is_empty() && self.requested <= self.priority_ids.len();
        let mut descriptors = Vec::new();
        let mut seen = HashSet::new();
        let mut rejected = Vec::new();

        for (line_idx, line) in reader.lines().enumerate().skip(1) {
            if descriptors.len() >= self.requested {
                break;
            }
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match EntityDescriptor::parse_row(line_idx + 1, &line) {
                Ok(descriptor) => {
                    if only_priority && !self.priority_ids.iter().any(|id| id == descriptor.id.as_str()) {
                        continue;
                    }
                    if !seen.insert(descriptor.id.clone()) {
                        warn!("Duplicate tracker id {} on line {} ignored", descriptor.id, line_idx + 1);
                        continue;
                    }
                    descriptors.push(descriptor);
                }
                Err(e) => {
                    warn!("{}", e);
                    rejected.push(e);
                }
            }
        }

        let catalog = EntityCatalog::new(descriptors);
        if catalog.is_empty() {
            return Err(ConfigurationError::EmptyPopulation);
        }

        let report = PopulationReport {
            catalog,
            requested: self.requested,
            rejected,
        };
        if report.is_short() {
            warn!(
                "Expected {} trackers but found {}; using {} trackers",
                report.requested,
                report.catalog.len(),
                report.catalog.len()
            );
        }
        info!("Created {} trackers", report.catalog.len());
        Ok(report)
    }
}
