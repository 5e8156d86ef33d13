use std::fs::{self, File};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use tracing::info;

use crate::error::HarvestError;
use crate::fetcher::replace_with;

const GZ_SUFFIX: &str = ".gz";

/// Decompresses every `*.gz` file directly inside `dir` next to the archive.
/// Returns the written paths in name order.
pub fn gunzip_dir(
    dir: &Utf8Path,
    remove_archives: bool,
) -> Result<Vec<Utf8PathBuf>, HarvestError> {
    let mut archives = Vec::new();
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let file_type = entry
            .file_type()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if !file_type.is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if path.as_str().ends_with(GZ_SUFFIX) {
            archives.push(path);
        }
    }
    archives.sort();

    let mut written = Vec::with_capacity(archives.len());
    for archive in archives {
        let target = gunzip_file(&archive)?;
        if remove_archives {
            fs::remove_file(archive.as_std_path())
                .map_err(|err| HarvestError::Filesystem(format!("remove {archive}: {err}")))?;
        }
        written.push(target);
    }
    Ok(written)
}

/// Decodes every gzip member of `archive` into the same path without `.gz`.
/// The target only appears once the whole archive decoded.
pub fn gunzip_file(archive: &Utf8Path) -> Result<Utf8PathBuf, HarvestError> {
    let target = Utf8PathBuf::from(
        archive
            .as_str()
            .strip_suffix(GZ_SUFFIX)
            .ok_or_else(|| HarvestError::Extract(format!("{archive} is not a .gz file")))?,
    );
    let input = File::open(archive.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("open {archive}: {err}")))?;
    let mut decoder = MultiGzDecoder::new(input);
    replace_with(&target, |output| {
        io::copy(&mut decoder, output)
            .map(|_| ())
            .map_err(|err| HarvestError::Extract(format!("{archive}: {err}")))
    })?;
    info!("extracted {archive} -> {target}");
    Ok(target)
}
