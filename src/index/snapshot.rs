use crate::error::{QuernError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Cursor;
use std::path::Path;
use tar::{Archive, Builder};
use tracing::info;

/// Pack a tenant directory (segments, `meta.json`, settings sidecars) into
/// a gzipped tarball.
///
/// Callers must quiesce the tenant's write queue first so the archive
/// captures a committed, consistent view.
pub fn export_to_bytes(tenant_dir: &Path) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    {
        let mut builder = Builder::new(&mut encoder);
        builder.append_dir_all(".", tenant_dir)?;
        builder.finish()?;
    }
    let bytes = encoder.finish()?;
    info!(path = %tenant_dir.display(), bytes = bytes.len(), "tenant exported");
    Ok(bytes)
}

/// Unpack a snapshot tarball into `tenant_dir`.
///
/// An existing non-empty target fails with `ImportConflict` unless
/// `overwrite` is set, in which case the target is replaced wholesale.
pub fn import_from_bytes(tenant_dir: &Path, data: &[u8], overwrite: bool) -> Result<()> {
    if tenant_dir.exists() && tenant_dir.read_dir()?.next().is_some() {
        if !overwrite {
            return Err(QuernError::ImportConflict(
                tenant_dir.display().to_string(),
            ));
        }
        std::fs::remove_dir_all(tenant_dir)?;
    }
    std::fs::create_dir_all(tenant_dir)?;
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
    archive.unpack(tenant_dir)?;
    info!(path = %tenant_dir.display(), "tenant imported");
    Ok(())
}
