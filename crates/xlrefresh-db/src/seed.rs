//! Seed lists for first-time registry population.
//!
//! A seed list names the initial files to register, in processing order,
//! and optionally the master file that receives the post-pass:
//!
//! ```yaml
//! master_file: 'C:\Data\master.xlsm'
//! paths:
//!   - 'C:\Data\site-a.xlsx'
//!   - 'C:\Data\master.xlsm'
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use xlrefresh_core::{Error, PathRepository, Result, SeedReport};

/// Initial registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedList {
    /// Master file designator.
    #[serde(default)]
    pub master_file: Option<String>,
    /// Paths to register, in order.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl SeedList {
    /// Parse a seed list from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid seed list: {}", e)))
    }

    /// Load a seed list from a YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read seed list {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }
}

/// Register every path of `seed`, counting duplicates instead of failing.
pub async fn populate(repo: &dyn PathRepository, seed: &SeedList) -> Result<SeedReport> {
    repo.ensure_schema().await?;
    info!(
        subsystem = "db",
        component = "seed",
        file_count = seed.paths.len(),
        "Populating registry from seed list"
    );

    let mut report = SeedReport::default();
    for path in &seed.paths {
        match repo.add(path).await {
            Ok(_) => report.added += 1,
            Err(Error::DuplicatePath(_)) => {
                debug!(file_path = %path, "Seed path already registered");
                report.already_present += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        added = report.added,
        already_present = report.already_present,
        "Seed population complete"
    );
    Ok(report)
}
