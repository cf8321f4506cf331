//! Local cache of the static schedule archive.
//!
//! Reference loading needs `routes.txt`, `stops.txt` and `shapes.txt` on
//! disk. If any of them is missing the archive is downloaded and extracted
//! into the cache directory; otherwise the cached paths are returned as is.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fetch::{HttpClient, fetch_bytes};

pub const DEFAULT_STATIC_FEED_URL: &str =
    "http://web.mta.info/developers/data/nyct/subway/google_transit.zip";
pub const DEFAULT_STATIC_CACHE_DIR: &str = "/tmp/mta";

const ARCHIVE_NAME: &str = "static.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFeedPaths {
    pub routes: PathBuf,
    pub stops: PathBuf,
    pub shapes: PathBuf,
}

impl StaticFeedPaths {
    fn in_dir(dir: &Path) -> Self {
        Self {
            routes: dir.join("routes.txt"),
            stops: dir.join("stops.txt"),
            shapes: dir.join("shapes.txt"),
        }
    }

    fn all_present(&self) -> bool {
        [&self.routes, &self.stops, &self.shapes]
            .iter()
            .all(|path| path.exists())
    }
}

pub struct StaticFeed<C> {
    client: C,
    url: String,
    cache_dir: PathBuf,
}

impl<C: HttpClient> StaticFeed<C> {
    pub fn new(client: C, url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            url: url.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Returns the three reference file paths, downloading first if needed.
    #[tracing::instrument(skip(self), fields(cache_dir = %self.cache_dir.display()))]
    pub async fn paths(&self) -> Result<StaticFeedPaths> {
        let paths = StaticFeedPaths::in_dir(&self.cache_dir);
        if paths.all_present() {
            debug!("Static feed files cached");
            return Ok(paths);
        }

        self.download().await?;
        Ok(paths)
    }

    async fn download(&self) -> Result<()> {
        info!(url = %self.url, "Static feed files missing, downloading");
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let bytes = fetch_bytes(&self.client, &self.url).await?;
        let archive = self.cache_dir.join(ARCHIVE_NAME);
        tokio::fs::write(&archive, &bytes).await?;
        debug!(bytes = bytes.len(), "Static archive saved");

        let dest = self.cache_dir.clone();
        let extracted = tokio::task::spawn_blocking(move || unzip(&archive, &dest)).await??;
        info!(files = extracted.len(), "Static archive extracted");
        Ok(())
    }
}

/// Extracts every entry of `src` under `dest` and returns the written file
/// paths. Entries whose names would escape `dest` are skipped.
pub fn unzip(src: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(File::open(src)?)?;
    let mut extracted = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&path)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted.push(path);
    }

    Ok(extracted)
}
