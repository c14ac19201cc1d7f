use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use oj_pipeline::{HandlerConfig, PipelineConfig};

/// Worker configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// host:port of the dispatcher.
    pub server: String,
    pub auth_token: String,
    /// Path to the sandbox executable.
    pub nsjail_path: PathBuf,
    #[serde(default = "default_nsjail_cfg")]
    pub nsjail_cfg_path: PathBuf,
    /// Root directory for testdata.
    pub testdata_path: PathBuf,
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_nsjail_cfg() -> PathBuf {
    PathBuf::from("nsjail-configs/nsjail.cfg")
}

/// Optional overrides for the pipeline's directories and byte caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_build_output_limit")]
    pub build_output_limit: u64,
    #[serde(default = "default_build_mem_limit")]
    pub build_mem_limit: u64,
    #[serde(default = "default_run_output_limit")]
    pub run_output_limit: u64,
    #[serde(default = "default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,
}

fn default_build_dir() -> PathBuf {
    PipelineConfig::default().build_dir
}

fn default_scratch_dir() -> PathBuf {
    PipelineConfig::default().scratch_dir
}

fn default_build_output_limit() -> u64 {
    PipelineConfig::default().build_output_limit
}

fn default_build_mem_limit() -> u64 {
    PipelineConfig::default().build_mem_limit
}

fn default_run_output_limit() -> u64 {
    PipelineConfig::default().run_output_limit
}

fn default_compile_timeout_secs() -> u64 {
    PipelineConfig::default().compile_timeout.as_secs()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
            scratch_dir: default_scratch_dir(),
            build_output_limit: default_build_output_limit(),
            build_mem_limit: default_build_mem_limit(),
            run_output_limit: default_run_output_limit(),
            compile_timeout_secs: default_compile_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: WorkerConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Assemble the submission handler's configuration.
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            testdata_root: self.testdata_path.clone(),
            pipeline: PipelineConfig {
                nsjail_path: self.nsjail_path.clone(),
                nsjail_cfg_path: self.nsjail_cfg_path.clone(),
                build_dir: self.limits.build_dir.clone(),
                scratch_dir: self.limits.scratch_dir.clone(),
                compile_timeout: Duration::from_secs(self.limits.compile_timeout_secs),
                build_output_limit: self.limits.build_output_limit,
                build_mem_limit: self.limits.build_mem_limit,
                run_output_limit: self.limits.run_output_limit,
                ..PipelineConfig::default()
            },
        }
    }
}
