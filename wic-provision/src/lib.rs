//! Inject an identity `config.toml` into a `.wic` device image and arm it for first boot.

pub mod backend;
pub mod bmap;
pub mod cli;
pub mod compression;
pub mod config;
pub mod errors;
pub mod group;
pub mod hostname;
pub mod inject;
pub mod logging;
pub mod paths;
pub mod session;
pub mod validation;

use anyhow::Context;
use backend::ProvisioningBackend;
use clap::Parser;
use compression::WorkingImage;
use config::ProvisionConfig;
use provision_hal::{LinuxHal, SystemHal};
use session::{ImageSession, PartitionRole};
use std::fs;
use std::path::Path;
use std::process::ExitCode;

pub fn run() -> ExitCode {
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors exit 1, --help/--version exit 0.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    logging::init(cli.verbose);

    let config = ProvisionConfig::from(cli);
    match provision(&LinuxHal::new(), &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(errors::exit_code(&err))
        }
    }
}

/// Full provisioning run against `hal`.
pub fn provision<H: SystemHal + ?Sized>(hal: &H, config: &ProvisionConfig) -> anyhow::Result<()> {
    validation::validate_input_file("identity config", &config.identity_config)?;
    validation::validate_input_file("image", &config.image)?;

    let identity = fs::read(&config.identity_config)
        .with_context(|| format!("read {}", config.identity_config.display()))?;
    let hostname = hostname::hostname_from_config(&String::from_utf8_lossy(&identity));
    if let Some(name) = &hostname {
        hostname::validate_hostname(name)?;
    }

    let working = WorkingImage::prepare(&config.image)?;
    provision_image(hal, config, working.path(), hostname.as_deref())?;

    if config.generate_bmap {
        let output = bmap::bmap_path(&config.image);
        bmap::generate_bmap(hal, working.path(), &output)
            .with_context(|| format!("generate {}", output.display()))?;
    }

    working.finish()?;
    log::info!("{} provisioned", config.image.display());
    Ok(())
}

fn provision_image<H: SystemHal + ?Sized>(
    hal: &H,
    config: &ProvisionConfig,
    image: &Path,
    hostname: Option<&str>,
) -> anyhow::Result<()> {
    let session = ImageSession::open(hal, image, config.work_root.as_deref())?;
    let etc = session.path(PartitionRole::Etc);
    let root = session.path(PartitionRole::RootA);

    // Everything that can refuse the image runs before the first write.
    let backend = ProvisioningBackend::detect(&root)?;
    log::info!("provisioning backend: {}", backend);
    let gid = group::lookup_gid(&root, paths::AZIOT_GROUP)?;
    let mut destinations = vec![
        (&etc, etc.join(paths::IDENTITY_CONFIG_DEST)),
        (&root, root.join(paths::FIRST_BOOT_SCRIPT)),
    ];
    if hostname.is_some() {
        destinations.push((&etc, etc.join(paths::HOSTNAME_DEST)));
        destinations.push((&etc, etc.join(paths::HOSTS_DEST)));
    }
    for (base, dest) in &destinations {
        validation::reject_symlinks_below(base, dest)?;
    }

    inject::inject_identity_config(hal, &config.identity_config, &etc, gid)?;
    backend.arm_first_boot(&root)?;
    if let Some(name) = hostname {
        hostname::configure_hostname(name, &etc, &root)?;
    }

    session.close();
    Ok(())
}
