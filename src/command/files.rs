//! Mixed reality capture download

use super::CommandError;
use crate::gateway::DeviceGateway;
use crate::session::SessionHandle;
use headset_shared::status;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// What a download batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Destination folder; None when nothing was downloaded
    pub folder: Option<PathBuf>,
    pub downloaded: Vec<String>,
    pub failed: Vec<String>,
    pub deleted: Vec<String>,
}

/// Folder name for a device: its tag, else its address
pub fn device_folder_name(tag: Option<&str>, address: &str) -> String {
    let name = match tag {
        Some(tag) if !tag.trim().is_empty() => tag.trim(),
        _ => address,
    };
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Download every capture on the device into `<root>/<tag or address>`
///
/// Each file succeeds or fails on its own; a remote file is only deleted
/// after its own download succeeded. A failure to list the captures or to
/// create the folder is reported once for the whole batch.
pub async fn download_recordings(
    gateway: &dyn DeviceGateway,
    session: &SessionHandle,
    root: &Path,
    delete_after_download: bool,
) -> DownloadReport {
    let mut report = DownloadReport::default();

    if let Err(e) = download_batch(gateway, session, root, delete_after_download, &mut report).await
    {
        warn!("[DOWNLOAD {}] Batch failed: {:#}", session.address(), e);
        session
            .set_status(status::failure("download", Some("mixed reality files"), &e))
            .await;
    }

    report
}

async fn download_batch(
    gateway: &dyn DeviceGateway,
    session: &SessionHandle,
    root: &Path,
    delete_after_download: bool,
    report: &mut DownloadReport,
) -> anyhow::Result<()> {
    let files = gateway.mixed_reality_files().await?;
    if files.is_empty() {
        info!("[DOWNLOAD {}] No captures on device", session.address());
        return Ok(());
    }

    let tag = session.tag().await;
    let folder = root.join(device_folder_name(tag.as_deref(), session.address()));
    tokio::fs::create_dir_all(&folder)
        .await
        .map_err(|source| CommandError::DownloadFolder {
            path: folder.clone(),
            source,
        })?;
    report.folder = Some(folder.clone());

    for file in files {
        let name = file.file_name;
        match fetch_one(gateway, &folder, &name).await {
            Ok(path) => {
                info!(
                    "[DOWNLOAD {}] {} ({} bytes) -> {}",
                    session.address(),
                    name,
                    file.size_bytes,
                    path.display()
                );
                session.set_status(status::downloaded(&name)).await;
                report.downloaded.push(name.clone());
            }
            Err(e) => {
                warn!("[DOWNLOAD {}] {} failed: {:#}", session.address(), name, e);
                session
                    .set_status(status::failure("download", Some(name.as_str()), &e))
                    .await;
                report.failed.push(name);
                continue;
            }
        }

        if delete_after_download {
            match gateway.delete_mixed_reality_file(&name).await {
                Ok(()) => report.deleted.push(name),
                Err(e) => {
                    warn!("[DOWNLOAD {}] Delete of {} failed: {:#}", session.address(), name, e);
                    session
                        .set_status(status::failure("delete", Some(name.as_str()), &e))
                        .await;
                }
            }
        }
    }

    Ok(())
}

/// True when `file_name` names a file directly inside the download folder
fn is_plain_file_name(file_name: &str) -> bool {
    let mut components = Path::new(file_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Fetch one capture and write it, replacing any existing file of that name
async fn fetch_one(
    gateway: &dyn DeviceGateway,
    folder: &Path,
    file_name: &str,
) -> anyhow::Result<PathBuf> {
    if !is_plain_file_name(file_name) {
        return Err(CommandError::UnsafeFileName(file_name.to_string()).into());
    }
    let contents = gateway.mixed_reality_file(file_name).await?;
    let path = folder.join(file_name);
    tokio::fs::write(&path, &contents)
        .await
        .map_err(|source| CommandError::WriteFile {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}
