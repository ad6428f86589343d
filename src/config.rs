use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for the coordination core.
///
/// Every tunable used by a component lives here; components receive their
/// sub-config at construction so tests can run isolated instances.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolymergeConfig {
    /// Git subprocess settings
    pub git: GitConfig,
    /// Branch lifecycle settings
    pub branches: BranchConfig,
    /// Semantic analysis settings
    pub analysis: AnalysisConfig,
    /// Semantic merge settings
    pub merge: MergeConfig,
    /// Conflict prediction settings
    pub prediction: PredictionConfig,
    /// Conflict prevention settings
    pub prevention: PreventionConfig,
    /// Collaboration engine settings
    pub collaboration: CollaborationConfig,
    /// Agent pool settings
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Hard deadline for every git subprocess invocation
    pub timeout_secs: u64,
    /// Remote used for fetch/push operations
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BranchConfig {
    /// Prefix for agent feature branches
    pub prefix: String,
    /// Tool data directory (metadata + state files), relative to the repo
    pub data_dir: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            prefix: "feat/agents".to_string(),
            data_dir: ".polymerge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Maximum cached semantic contexts
    pub cache_capacity: u64,
    /// Treat return-type drift as a signature conflict
    pub check_type_hints: bool,
    /// Also report conflicts on private symbols
    pub check_private_members: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            check_type_hints: true,
            check_private_members: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Concurrency bound for batch merges
    pub max_concurrent: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { max_concurrent: 5 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Minimum likelihood for a prediction to survive
    pub min_confidence: f64,
    /// Cap on predictions per run
    pub max_predictions: usize,
    /// Look-ahead window in days
    pub window_days: i64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            max_predictions: 50,
            window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreventionConfig {
    /// Minimum prediction likelihood that triggers prevention
    pub prediction_threshold: f64,
    /// Maximum measures applied per session
    pub max_measures: usize,
    /// Default look-ahead horizon in hours
    pub horizon_hours: i64,
    /// Stagger between coordinated agents, in hours
    pub coordination_delay_hours: i64,
    /// Likelihood above which an early merge is attempted
    pub early_merge_threshold: f64,
    /// Maximum estimated effort (hours) for an acceptable measure
    pub effort_threshold_hours: u32,
    /// Background monitor poll interval in seconds
    pub monitor_interval_secs: u64,
}

impl Default for PreventionConfig {
    fn default() -> Self {
        Self {
            prediction_threshold: 0.6,
            max_measures: 10,
            horizon_hours: 24,
            coordination_delay_hours: 2,
            early_merge_threshold: 0.8,
            effort_threshold_hours: 8,
            monitor_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollaborationConfig {
    /// Per-agent queue bound; oldest messages are trimmed beyond this
    pub max_queue_size: usize,
    /// Knowledge items untouched for this long become purge candidates
    pub knowledge_retention_days: i64,
    /// Background purge interval in seconds
    pub purge_interval_secs: u64,
    /// Sessions idle longer than this are force-ended, in hours
    pub session_timeout_hours: i64,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            knowledge_retention_days: 30,
            purge_interval_secs: 5,
            session_timeout_hours: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent agents
    pub max_agents: usize,
    /// Directory for pool state, relative to the repo
    pub work_dir: String,
    /// Dispatcher poll interval in seconds
    pub dispatch_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_agents: 3,
            work_dir: ".polymerge/agents".to_string(),
            dispatch_interval_secs: 1,
        }
    }
}

impl PolymergeConfig {
    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. `polymerge.toml` in the working directory
    /// 3. Environment variables prefixed with `POLYMERGE_`
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("polymerge.toml").exists() {
            builder = builder.add_source(File::with_name("polymerge"));
        }

        builder = builder.add_source(
            Environment::with_prefix("POLYMERGE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut loaded: PolymergeConfig = config.try_deserialize().unwrap_or_default();

        // Clamp obviously broken values rather than failing startup.
        if loaded.git.timeout_secs == 0 {
            loaded.git.timeout_secs = GitConfig::default().timeout_secs;
        }
        if loaded.merge.max_concurrent == 0 {
            loaded.merge.max_concurrent = MergeConfig::default().max_concurrent;
        }

        Ok(loaded)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load a `.env` file if present.
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
