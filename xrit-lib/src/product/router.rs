use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info};

use super::{product_id, scanner, FileRouter, ProductHeader, ProductKind};

/// [FileRouter] that files finished products into a directory tree by product kind.
///
/// Products are named by their header filename. When a product with the same name was
/// already filed, `--dup-<timestamp>` is inserted before the extension.
#[derive(Debug, Clone)]
pub struct DirectoryRouter {
    output: PathBuf,
    skip: HashSet<ProductKind>,
}

impl DirectoryRouter {
    pub fn new<P: AsRef<Path>>(output: P) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            skip: HashSet::default(),
        }
    }

    /// Delete products of `kind` instead of filing them.
    #[must_use]
    pub fn with_skip(mut self, kind: ProductKind) -> Self {
        self.skip.insert(kind);
        self
    }

    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Folder, relative to the output directory, a product is filed in.
    #[must_use]
    pub fn folder(header: &ProductHeader) -> PathBuf {
        use product_id::*;
        use scanner::*;

        let images = Path::new("Images");
        match header.kind() {
            ProductKind::Image => match (header.product_id(), header.subproduct_id()) {
                (Some(GOES16_ABI | GOES17_ABI), _) => images.join("FM1"),
                (Some(HIMAWARI8_ABI), _) => images.join("Full Disk"),
                (Some(GOES13_ABI | GOES15_ABI), Some(sub)) => images.join(match sub {
                    INFRARED_FULL_DISK | VISIBLE_FULL_DISK | WATER_VAPOUR_FULL_DISK => "Full Disk",
                    INFRARED_NORTHERN | VISIBLE_NORTHERN | WATER_VAPOUR_NORTHERN => {
                        "Northern Hemisphere"
                    }
                    INFRARED_SOUTHERN | VISIBLE_SOUTHERN | WATER_VAPOUR_SOUTHERN => {
                        "Southern Hemisphere"
                    }
                    INFRARED_UNITED_STATES | VISIBLE_UNITED_STATES | WATER_VAPOUR_UNITED_STATES => {
                        "United States"
                    }
                    INFRARED_AREA_OF_INTEREST
                    | VISIBLE_AREA_OF_INTEREST
                    | WATER_VAPOUR_AREA_OF_INTEREST => "Area of Interest",
                    _ => "Unknown",
                }),
                _ => images.join("Unknown"),
            },
            ProductKind::Text => PathBuf::from("Text"),
            ProductKind::Dcs => PathBuf::from("DCS"),
            ProductKind::Emwin => PathBuf::from("EMWIN"),
            ProductKind::WeatherData => PathBuf::from("Weather Data"),
            ProductKind::OtherSatellite => PathBuf::from("Other Satellites"),
            ProductKind::Unknown => PathBuf::from("Unknown"),
        }
    }

    /// Full destination path for a product, not accounting for duplicates.
    #[must_use]
    pub fn destination(&self, path: &Path, header: &ProductHeader) -> PathBuf {
        let name = header.filename().unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unnamed.lrit".to_string())
        });
        self.output.join(Self::folder(header)).join(name)
    }
}

/// Insert `--dup-<stamp>` before the extension of `path`.
#[must_use]
pub fn dup_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}--dup-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}--dup-{stamp}"),
    };
    path.with_file_name(name)
}

fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(src, dest)?;
    fs::remove_file(src)
}

impl FileRouter for DirectoryRouter {
    fn handle_file(&self, path: &Path, header: &ProductHeader) {
        let kind = header.kind();
        if self.skip.contains(&kind) {
            debug!(path = ?path, kind = ?kind, "skipping product");
            if let Err(err) = fs::remove_file(path) {
                error!(path = ?path, "failed to delete skipped product: {err}");
            }
            return;
        }

        let mut dest = self.destination(path, header);
        if let Some(dir) = dest.parent() {
            if let Err(err) = fs::create_dir_all(dir) {
                error!(dir = ?dir, "failed to create product folder: {err}");
                return;
            }
        }
        if dest.exists() {
            dest = dup_path(&dest, &Utc::now().format("%Y%m%d%H%M%S%6f").to_string());
        }

        match move_file(path, &dest) {
            Ok(()) => info!(
                product = %header.product_name(),
                subproduct = %header.subproduct_name(),
                dest = ?dest,
                "new product"
            ),
            Err(err) => error!(src = ?path, dest = ?dest, "failed to move product: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{NoaaSpecific, PrimaryRecord, Compression};

    fn header(product: Option<(u16, u16)>, annotation: Option<&str>) -> ProductHeader {
        ProductHeader {
            primary: PrimaryRecord {
                file_type: 0,
                header_length: 16,
                data_length: 0,
            },
            image_structure: None,
            navigation: None,
            image_data_function: None,
            annotation: annotation.map(str::to_string),
            timestamp: None,
            ancillary: None,
            key: None,
            segment: None,
            noaa: product.map(|(product_id, subproduct_id)| NoaaSpecific {
                signature: "NOAA".to_string(),
                product_id,
                subproduct_id,
                parameter: 0,
                compression: Compression::None,
            }),
            header_structured: None,
            rice: None,
            dcs_filename: None,
            unknown: Vec::default(),
        }
    }

    #[test]
    fn folders() {
        assert_eq!(
            DirectoryRouter::folder(&header(Some((16, 2)), None)),
            Path::new("Images/FM1")
        );
        assert_eq!(
            DirectoryRouter::folder(&header(Some((13, 22)), None)),
            Path::new("Images/Northern Hemisphere")
        );
        assert_eq!(
            DirectoryRouter::folder(&header(Some((8, 0)), None)),
            Path::new("DCS")
        );
        assert_eq!(
            DirectoryRouter::folder(&header(Some((99, 0)), None)),
            Path::new("Unknown")
        );
    }

    #[test]
    fn dup_names() {
        assert_eq!(
            dup_path(Path::new("/out/Text/a.txt"), "123"),
            Path::new("/out/Text/a--dup-123.txt")
        );
        assert_eq!(
            dup_path(Path::new("/out/Text/a"), "123"),
            Path::new("/out/Text/a--dup-123")
        );
    }

    #[test]
    fn moves_and_dedups() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let router = DirectoryRouter::new(&out);
        let hdr = header(Some((1, 0)), Some("bulletin.txt"));

        for content in ["one", "two"] {
            let src = tmp.path().join("product.tmp");
            fs::write(&src, content).unwrap();
            router.handle_file(&src, &hdr);
            assert!(!src.exists());
        }

        let filed: Vec<PathBuf> = fs::read_dir(out.join("Text"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(filed.len(), 2);
        assert_eq!(
            fs::read_to_string(out.join("Text/bulletin.txt")).unwrap(),
            "one"
        );
    }

    #[test]
    fn skipped_kinds_are_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let router = DirectoryRouter::new(tmp.path().join("out")).with_skip(ProductKind::Dcs);
        let src = tmp.path().join("product.tmp");
        fs::write(&src, "x").unwrap();

        router.handle_file(&src, &header(Some((8, 0)), Some("a.dcs")));

        assert!(!src.exists());
        assert!(!tmp.path().join("out").exists());
    }
}
