use crate::console::TerminalOperator;
use platform_backup::version::{DiscoveryClient, VersionSource};
use platform_backup::{BackupOrchestrator, BackupOutcome, Config, Platform, RestoreOrchestrator};
use std::path::Path;

pub async fn backup(config: &Config, config_dir: &Path, endpoint: &str) -> anyhow::Result<()> {
    let platform = Platform::local(config, endpoint);

    match BackupOrchestrator::new(config, &platform, &TerminalOperator).run(config_dir).await? {
        BackupOutcome::Completed(archive) => {
            println!("Backup complete.\n\nBackup archive: {}", archive.display());
        }
        BackupOutcome::Cancelled => println!("- Backup cancelled."),
    }
    Ok(())
}

pub async fn restore(config: &Config, config_dir: &Path, endpoint: &str, archive: &Path) -> anyhow::Result<()> {
    let platform = Platform::local(config, endpoint);

    println!("Starting restore from {}...\n", archive.display());
    let summary = RestoreOrchestrator::new(config, &platform, &TerminalOperator)
        .run(config_dir, archive)
        .await?;

    println!(
        "Restore complete. Search snapshot {} from platform v{} is being restored in the background.",
        summary.snapshot, summary.version.version
    );
    Ok(())
}

pub async fn version(endpoint: &str) -> anyhow::Result<()> {
    println!("\nplatformadm: v{}", env!("CARGO_PKG_VERSION"));
    let live = DiscoveryClient::new(endpoint).live_version().await?;
    println!("Platform server: v{} (build {})\n", live.version, live.build);
    Ok(())
}
