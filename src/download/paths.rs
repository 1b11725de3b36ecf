use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Folder an item dated `provenance` belongs in: `root/YYYY/YYYY-MM-DD`.
pub fn folder_for(root: &Path, provenance: &DateTime<Utc>) -> PathBuf {
    root.join(provenance.format("%Y").to_string())
        .join(provenance.format("%Y-%m-%d").to_string())
}

/// Clean a filename by removing characters that are invalid on common
/// filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}

/// Whether `filename` still names a file in its folder once cleaned. An
/// empty result or one made only of dots would resolve to the folder itself
/// or a parent.
pub fn is_usable_filename(filename: &str) -> bool {
    let cleaned = clean_filename(filename);
    !cleaned.is_empty() && !cleaned.chars().all(|c| c == '.')
}

/// Disambiguated name for a file whose primary name is taken by different
/// content: the provenance time of day goes before the extension.
///
/// `"img.jpg"` at 12:30:00 becomes `"img_12-30-00.jpg"`. A name without an
/// extension (including dotfiles like `".profile"`) gets the suffix at the
/// end.
pub fn alternate_filename(filename: &str, provenance: &DateTime<Utc>) -> String {
    let time = provenance.format("%H-%M-%S");
    match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => {
            let (stem, ext) = filename.split_at(dot_pos);
            format!("{stem}_{time}{ext}")
        }
        _ => format!("{filename}_{time}"),
    }
}
