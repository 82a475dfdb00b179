use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "wic-provision",
    version,
    about = "Inject an identity config.toml into a .wic image and apply it on first boot"
)]
pub struct Cli {
    /// Path to the identity config.toml
    #[arg(short = 'c', long = "config", value_name = "CONFIG")]
    pub config: PathBuf,

    /// Path to the .wic image file (plain or xz-compressed)
    #[arg(short = 'w', long = "wic", value_name = "IMAGE")]
    pub image: PathBuf,

    /// Generate a .bmap file next to the image
    #[arg(short = 'b', long = "generate-bmap-file")]
    pub generate_bmap: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Parent directory for the per-run mount directory (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,
}
