use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Host requirements not met: {0}")]
    Preflight(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Makes sure a process can keep its on-disk state under `path`: the
/// directory exists (it is created if missing) and accepts writes.
pub fn check_data_dir(path: &Path) -> Result<(), SystemError> {
    use std::fs;

    fs::create_dir_all(path).map_err(|e| {
        SystemError::Preflight(format!("Cannot create data directory {}: {}", path.display(), e))
    })?;

    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        return Err(SystemError::Preflight(format!(
            "Data path {} is not a directory",
            path.display()
        )));
    }
    if metadata.permissions().readonly() {
        return Err(SystemError::Preflight(format!(
            "Data directory {} is read-only",
            path.display()
        )));
    }

    let marker = path.join(format!(".preflight-{}", std::process::id()));
    fs::write(&marker, b"ok")
        .and_then(|_| fs::remove_file(&marker))
        .map_err(|e| {
            SystemError::Preflight(format!(
                "Data directory {} is not writable: {}",
                path.display(),
                e
            ))
        })?;

    tracing::info!("Data directory check passed: {} is writable", path.display());
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where there is one.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("store").join("1");

        check_data_dir(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 0);
    }

    #[test]
    fn rejects_a_file_as_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blob");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(check_data_dir(&file), Err(SystemError::Preflight(_))));
    }
}
