//! Unix domain socket preparation.

use std::io;
use std::path::Path;

/// Make `path` bindable.
///
/// Creates the parent directory when it is missing, otherwise removes a
/// socket file left behind by a previous run.
pub fn prepare_unix_socket(path: &Path) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());

    match parent {
        Some(dir) if !dir.exists() => {
            std::fs::create_dir_all(dir)?;
            tracing::debug!(dir = %dir.display(), "Created unix socket directory");
        }
        _ => match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale unix socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        },
    }

    Ok(())
}
