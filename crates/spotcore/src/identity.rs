//! Registry id / map id derivation from input filenames.
//!
//! Survey software names its outputs `<registry><marker><map>[suffix].<ext>`,
//! e.g. `SITE01_A1B2_dem.tif`. When the marker is present both ids are read
//! straight from the name. Otherwise the registry id is a cleaned version of
//! the filename and the map id is generated and registered with the
//! [`DuplicateTracker`] so no two files of the same kind share an output folder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::config::{NamingConfig, PrefixedCollision};
use crate::record::{FileKind, Identity};
use crate::tracker::DuplicateTracker;

/// Used when cleaning a filename leaves nothing behind.
pub const PLACEHOLDER_REGISTRY_ID: &str = "unnamed";

/// Source of fresh map ids for un-prefixed files.
pub trait MapIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Eight upper-case hex digits from a random v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidMapIds;

impl MapIdGenerator for UuidMapIds {
    fn generate(&self) -> String {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        simple[..8].to_ascii_uppercase()
    }
}

/// Strip the last extension from a filename.
pub fn strip_extension(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// Reduce a filename to a token safe for folder and layer names.
///
/// ASCII letters, digits, `-` and `_` are kept; anything else becomes `_`.
/// Runs of `_` collapse and leading/trailing separators are trimmed. An empty
/// result becomes [`PLACEHOLDER_REGISTRY_ID`].
pub fn clean_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-');
    if trimmed.is_empty() {
        PLACEHOLDER_REGISTRY_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct IdentityResolver {
    naming: NamingConfig,
    storage_dir: PathBuf,
    generator: Arc<dyn MapIdGenerator>,
}

impl IdentityResolver {
    pub fn new(naming: NamingConfig, storage_dir: PathBuf) -> Self {
        Self {
            naming,
            storage_dir,
            generator: Arc::new(UuidMapIds),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn MapIdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Derive the identity of `file_name`, registering generated or versioned
    /// ids with `tracker` before returning.
    pub fn resolve(&self, file_name: &str, kind: FileKind, tracker: &DuplicateTracker) -> Identity {
        let marker = self.naming.prefix_marker.as_str();
        let stem = strip_extension(file_name);

        let (registry_id, map_id, generated) = match self.split_marked(stem, kind) {
            Some((registry, map)) => {
                let map = match self.naming.prefixed_collision {
                    PrefixedCollision::Overwrite => map,
                    PrefixedCollision::Version => tracker.register_prefixed(kind, &registry, &map),
                };
                (registry, map, false)
            }
            None => {
                let base = match kind {
                    FileKind::Dem => self.before_dem_suffix(stem),
                    FileKind::Rgb | FileKind::Mesh3D => stem,
                };
                let registry = clean_filename(base);
                let map = tracker.register(kind, &self.generator.generate());
                (registry, map, true)
            }
        };

        let output_name = format!("{registry_id}{marker}{map_id}");
        let output_filename = match kind {
            FileKind::Dem => format!("{output_name}{}", self.naming.dem_suffix),
            FileKind::Rgb | FileKind::Mesh3D => output_name.clone(),
        };

        debug!(
            "{file_name}: registryId={registry_id} mapId={map_id}{}",
            if generated { " (generated)" } else { "" }
        );

        Identity {
            registry_id,
            map_id,
            output_folder: self.storage_dir.join(&output_name),
            output_name,
            output_filename,
            generated,
        }
    }

    /// Split `stem` at the first marker. `None` when the marker is absent or
    /// leaves no map id behind. The registry part is kept as written, even
    /// when empty.
    fn split_marked(&self, stem: &str, kind: FileKind) -> Option<(String, String)> {
        let (registry, rest) = stem.split_once(self.naming.prefix_marker.as_str())?;

        let map = match kind {
            FileKind::Dem if !self.naming.dem_suffix.is_empty() => {
                rest.strip_suffix(self.naming.dem_suffix.as_str()).unwrap_or(rest)
            }
            _ => rest,
        };

        if map.is_empty() {
            return None;
        }

        Some((registry.to_string(), map.to_string()))
    }

    fn before_dem_suffix<'a>(&self, stem: &'a str) -> &'a str {
        let suffix = self.naming.dem_suffix.as_str();
        if suffix.is_empty() {
            return stem;
        }
        stem.split(suffix).next().unwrap_or(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str);

    impl MapIdGenerator for Fixed {
        fn generate(&self) -> String {
            self.0.to_string()
        }
    }

    struct Sequence(AtomicUsize);

    impl MapIdGenerator for Sequence {
        fn generate(&self) -> String {
            format!("GEN{}", self.0.fetch_add(1, Ordering::Relaxed))
        }
    }

    fn resolver(marker: &str) -> IdentityResolver {
        let naming = NamingConfig {
            prefix_marker: marker.to_string(),
            ..NamingConfig::default()
        };
        IdentityResolver::new(naming, PathBuf::from("/out/storage"))
            .with_generator(Arc::new(Sequence(AtomicUsize::new(1))))
    }

    #[test]
    fn prefixed_dem() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_").resolve("SITE01_A1B2.tif", FileKind::Dem, &tracker);

        assert_eq!(id.registry_id, "SITE01");
        assert_eq!(id.map_id, "A1B2");
        assert_eq!(id.output_folder, PathBuf::from("/out/storage/SITE01_A1B2"));
        assert_eq!(id.output_filename, "SITE01_A1B2_dem");
        assert!(!id.generated);
        assert!(tracker.assigned(FileKind::Dem).is_empty());
    }

    #[test]
    fn prefixed_dem_strips_suffix() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_").resolve("SITE01_A1B2_dem.tif", FileKind::Dem, &tracker);
        assert_eq!(id.map_id, "A1B2");
        assert_eq!(id.output_filename, "SITE01_A1B2_dem");
    }

    #[test]
    fn prefixed_names_reconstruct_the_stem() {
        let tracker = DuplicateTracker::new();
        let r = resolver("_MAP_");
        let cases = [
            ("north_MAP_0001.tif", FileKind::Rgb),
            ("north_MAP_0001_dem.tif", FileKind::Dem),
            ("a_b_MAP_c_d.tiff", FileKind::Rgb),
            ("x_MAP_y_MAP_z.tif", FileKind::Dem),
            ("scan_MAP_v2.obj", FileKind::Mesh3D),
        ];

        for (file, kind) in cases {
            let id = r.resolve(file, kind, &tracker);
            let suffix = if kind == FileKind::Dem && file.contains("_dem.") { "_dem" } else { "" };
            let rebuilt = format!("{}_MAP_{}{}", id.registry_id, id.map_id, suffix);
            assert_eq!(rebuilt, strip_extension(file), "{file}");
        }
    }

    #[test]
    fn unprefixed_rgb_is_cleaned_and_generated() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_MAP_").resolve("Orto Mayo.tif", FileKind::Rgb, &tracker);

        assert_eq!(id.registry_id, "Orto_Mayo");
        assert_eq!(id.map_id, "GEN1");
        assert!(id.generated);
        assert_eq!(tracker.assigned(FileKind::Rgb), vec!["GEN1"]);
    }

    #[test]
    fn unprefixed_rgb_and_mesh_keep_the_whole_name() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_MAP_").resolve("ortho_final.tif", FileKind::Rgb, &tracker);
        assert_eq!(id.registry_id, "ortho_final");
        assert!(id.generated);
        assert_eq!(tracker.assigned(FileKind::Rgb), vec!["GEN1"]);

        let mesh = resolver("_MAP_").resolve("bridge_scan.obj", FileKind::Mesh3D, &tracker);
        assert_eq!(mesh.registry_id, "bridge_scan");
    }

    #[test]
    fn empty_registry_part_is_kept() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_").resolve("_A1.tif", FileKind::Rgb, &tracker);

        assert_eq!(id.registry_id, "");
        assert_eq!(id.map_id, "A1");
        assert_eq!(id.output_name, "_A1");
        assert!(!id.generated);
    }

    #[test]
    fn unprefixed_dem_drops_suffix_before_cleaning() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_MAP_").resolve("scan_dem.tif", FileKind::Dem, &tracker);
        assert_eq!(id.registry_id, "scan");
    }

    #[test]
    fn same_registry_gets_distinct_generated_ids() {
        let tracker = DuplicateTracker::new();
        let naming = NamingConfig {
            prefix_marker: "_MAP_".into(),
            ..NamingConfig::default()
        };
        let r = IdentityResolver::new(naming, PathBuf::from("/s")).with_generator(Arc::new(Fixed("SAME")));

        let a = r.resolve("scan.tif", FileKind::Dem, &tracker);
        let b = r.resolve("scan_dem.tif", FileKind::Dem, &tracker);

        assert_eq!(a.registry_id, "scan");
        assert_eq!(b.registry_id, "scan");
        assert_ne!(a.map_id, b.map_id);
        assert_ne!(a.output_folder, b.output_folder);
    }

    #[test]
    fn versioned_prefixed_collisions() {
        let tracker = DuplicateTracker::new();
        let naming = NamingConfig {
            prefixed_collision: PrefixedCollision::Version,
            ..NamingConfig::default()
        };
        let r = IdentityResolver::new(naming, PathBuf::from("/s"));

        let a = r.resolve("SITE01_A1.tif", FileKind::Rgb, &tracker);
        let b = r.resolve("SITE01_A1.tiff", FileKind::Rgb, &tracker);
        assert_eq!(a.map_id, "A1");
        assert_eq!(b.map_id, "A1-v2");
    }

    #[test]
    fn overwrite_policy_shares_folder() {
        let tracker = DuplicateTracker::new();
        let r = resolver("_");
        let a = r.resolve("SITE01_A1.tif", FileKind::Rgb, &tracker);
        let b = r.resolve("SITE01_A1.tiff", FileKind::Rgb, &tracker);
        assert_eq!(a.output_folder, b.output_folder);
    }

    #[test]
    fn empty_map_part_falls_back_to_generation() {
        let tracker = DuplicateTracker::new();
        let id = resolver("_").resolve("SITE01_.tif", FileKind::Rgb, &tracker);
        assert!(id.generated);
        assert_eq!(id.registry_id, "SITE01");
    }

    #[test]
    fn clean_filename_examples() {
        assert_eq!(clean_filename("ortho_final"), "ortho_final");
        assert_eq!(clean_filename("Orto Mayo 2024 (v2)"), "Orto_Mayo_2024_v2");
        assert_eq!(clean_filename("..."), PLACEHOLDER_REGISTRY_ID);
        assert_eq!(clean_filename(""), PLACEHOLDER_REGISTRY_ID);
        assert_eq!(clean_filename("año"), "a_o");
    }

    #[test]
    fn uuid_ids_are_short_hex() {
        let id = UuidMapIds.generate();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
