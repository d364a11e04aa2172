//! Publishing the sorted run at the destination path.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::run::Run;
use crate::sort::SortError;

/// Moves the last run to `destination`, replacing any existing file.
///
/// The destination is replaced atomically: readers see either the previous file or the complete
/// sorted output. A missing run (empty input) produces an empty file. The run is renamed when
/// possible; when the rename fails (e.g. the work directory is on another file system) it is
/// copied to a temporary file next to the destination which is then renamed over it.
pub fn finalize(last_run: Option<Run>, destination: &Path) -> Result<(), SortError> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(SortError::io(parent))?;

    let run = match last_run {
        Some(run) => run,
        None => {
            log::debug!("no runs to publish, creating empty {}", destination.display());
            let empty = NamedTempFile::new_in(parent).map_err(SortError::io(parent))?;
            empty
                .persist(destination)
                .map_err(|err| SortError::io(destination)(err.error))?;
            return Ok(());
        }
    };

    match fs::rename(run.path(), destination) {
        Ok(()) => {
            log::debug!("{} moved to {}", run.path().display(), destination.display());
            return Ok(());
        }
        Err(err) => log::debug!(
            "{} not renamed to {} ({}), copying",
            run.path().display(),
            destination.display(),
            err
        ),
    }

    let mut copy = NamedTempFile::new_in(parent).map_err(SortError::io(parent))?;
    let mut source = fs::File::open(run.path()).map_err(SortError::io(run.path()))?;
    io::copy(&mut source, copy.as_file_mut()).map_err(SortError::io(destination))?;
    copy.as_file().sync_all().map_err(SortError::io(destination))?;
    copy.persist(destination)
        .map_err(|err| SortError::io(destination)(err.error))?;

    return Ok(());
}
