use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::error::Result;

pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    let max_len = 300usize;
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut cut = max_len;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

/// Sibling path used while writing, renamed over the target on success.
pub fn tmp_path_for(output_path: &Path, fallback_name: &str) -> PathBuf {
    let file_name = output_path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or(fallback_name);
    output_path.with_file_name(format!("{file_name}.tmp"))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn install_ctrlc_handler(shutdown_requested: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let was_set = shutdown_requested.swap(true, Ordering::SeqCst);
            if !was_set {
                tracing::warn!(
                    "Received Ctrl-C. Stopping the job poll; records already submitted stay on the platform."
                );
            }
        }
    });
}
