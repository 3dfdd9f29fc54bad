use crate::config::{AnalysisConfig, RunConfig, TransactionMatrix};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{debug, info};
use std::fs::File;
use std::path::Path;

/// File name of the configuration snapshot inside a run directory
pub const RUN_CONFIG_FILE: &str = "config.yaml";

/// Load and validate a run configuration from a YAML file
pub fn load_run_config(config_path: &Path) -> Result<RunConfig> {
    debug!("Loading run configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open run configuration '{}'", config_path.display()))?;

    let config: RunConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse run configuration '{}'", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

/// Write a run configuration snapshot into `run_dir`
pub fn save_run_config(config: &RunConfig, run_dir: &Path) -> Result<()> {
    let path = run_dir.join(RUN_CONFIG_FILE);
    let yaml = serde_yaml::to_string(config).wrap_err("Failed to serialize run configuration")?;
    std::fs::write(&path, yaml)
        .wrap_err_with(|| format!("Failed to write run configuration '{}'", path.display()))?;
    info!("Saved run configuration snapshot to {:?}", path);
    Ok(())
}

/// Load analysis settings, falling back to defaults when no file is given
pub fn load_analysis_config(config_path: Option<&Path>) -> Result<AnalysisConfig> {
    let config = match config_path {
        Some(path) => {
            info!("Loading analysis configuration from: {:?}", path);
            let file = File::open(path)
                .wrap_err_with(|| format!("Failed to open analysis configuration '{}'", path.display()))?;
            serde_yaml::from_reader(file)
                .wrap_err_with(|| format!("Failed to parse analysis configuration '{}'", path.display()))?
        }
        None => AnalysisConfig::default(),
    };

    config.validate()?;

    Ok(config)
}

/// Load a bare transaction matrix (YAML list of rows)
pub fn load_matrix(path: &Path) -> Result<TransactionMatrix> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read transaction matrix '{}'", path.display()))?;
    let matrix: TransactionMatrix = serde_yaml::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse transaction matrix '{}'", path.display()))?;
    matrix.validate(matrix.size())?;
    Ok(matrix)
}
