use crate::cli::Cli;
use std::path::PathBuf;

/// Inputs of one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub identity_config: PathBuf,
    pub image: PathBuf,
    pub generate_bmap: bool,
    /// Parent of the per-run work directory; `None` uses the system temp dir.
    pub work_root: Option<PathBuf>,
}

impl ProvisionConfig {
    pub fn new(identity_config: impl Into<PathBuf>, image: impl Into<PathBuf>) -> Self {
        Self {
            identity_config: identity_config.into(),
            image: image.into(),
            generate_bmap: false,
            work_root: None,
        }
    }

    pub fn with_bmap(mut self, generate_bmap: bool) -> Self {
        self.generate_bmap = generate_bmap;
        self
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(work_root.into());
        self
    }
}

impl From<Cli> for ProvisionConfig {
    fn from(cli: Cli) -> Self {
        Self {
            identity_config: cli.config,
            image: cli.image,
            generate_bmap: cli.generate_bmap,
            work_root: cli.work_dir,
        }
    }
}
