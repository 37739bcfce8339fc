//! Derivation of storage layout and compression from a file name.

use std::path::{Path, PathBuf};

/// Where a volume lives on disk: one combined file or a header/data pair,
/// optionally gzip-compressed. Derived once from a user-supplied path and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLocation {
    /// Whether the file(s) are gzip-compressed.
    pub is_gzip: bool,
    /// Whether header and voxel data live in two files.
    pub is_separate_storage: bool,
    /// The file holding the header.
    pub header_path: PathBuf,
    /// The file holding the voxel data; equals `header_path` for combined
    /// storage.
    pub data_path: PathBuf,
}

fn has_suffix(name: &str, suffix: &str) -> bool {
    let name = name.as_bytes();
    let suffix = suffix.as_bytes();
    name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Replace the three extension letters starting at byte `at`, copying the
/// case of each original letter.
fn substitute(name: &str, at: usize, replacement: &str) -> String {
    let mut bytes = name.as_bytes().to_vec();
    for (i, r) in replacement.bytes().enumerate() {
        bytes[at + i] = if bytes[at + i].is_ascii_uppercase() {
            r.to_ascii_uppercase()
        } else {
            r
        };
    }
    String::from_utf8(bytes).expect("ASCII-for-ASCII substitution")
}

/// Resolve the storage layout and compression of `path` from its suffix.
///
/// Matching is case-insensitive: a trailing ".gz" sets compression, and a
/// (de-suffixed) name ending in ".hdr" or ".img" selects separate storage,
/// with the counterpart path derived by case-preserving substitution of
/// the extension letters. Anything else resolves to a combined,
/// uncompressed single file, so the resolver is total.
pub fn resolve<P: AsRef<Path>>(path: P) -> VolumeLocation {
    let full = path.as_ref().to_string_lossy().into_owned();

    let is_gzip = has_suffix(&full, ".gz");
    let stem_len = if is_gzip { full.len() - 3 } else { full.len() };
    let stem = &full[..stem_len];

    if has_suffix(stem, ".hdr") {
        let data = substitute(&full, stem_len - 3, "img");
        VolumeLocation {
            is_gzip,
            is_separate_storage: true,
            header_path: PathBuf::from(full),
            data_path: PathBuf::from(data),
        }
    } else if has_suffix(stem, ".img") {
        let header = substitute(&full, stem_len - 3, "hdr");
        VolumeLocation {
            is_gzip,
            is_separate_storage: true,
            header_path: PathBuf::from(header),
            data_path: PathBuf::from(full),
        }
    } else {
        VolumeLocation {
            is_gzip,
            is_separate_storage: false,
            header_path: PathBuf::from(full.clone()),
            data_path: PathBuf::from(full),
        }
    }
}
