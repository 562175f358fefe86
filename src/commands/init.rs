use anyhow::{bail, Result};
use hybrid_retrieval::config::{BackendConfig, Config, DistanceMetric};
use std::path::PathBuf;

pub fn init_config(path: PathBuf, distance: DistanceMetric) -> Result<()> {
    let config_path = path.join("hybrid-retrieval.toml");
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    // offline defaults so the CLI works without an embedding server
    let mut config = Config::default();
    config.embedding.backend = BackendConfig::Hash {
        dimensions: 384,
        model: "xxh3-hash".to_string(),
    };
    config.vector.distance = distance;

    let toml_content = format!("# Hybrid retrieval configuration\n\n{}", config.to_toml()?);
    std::fs::create_dir_all(&path)?;
    std::fs::write(&config_path, toml_content)?;
    println!("Created configuration file: {}", config_path.display());

    Ok(())
}
