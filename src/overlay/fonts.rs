use std::path::{Path, PathBuf};

use crate::overlay::settings::FontStyle;

const FONT_EXTENSIONS: [&str; 2] = ["ttf", "otf"];

/// Map a configured font face to a font file in `fonts_dir`.
///
/// Absolute paths and faces without a matching file are returned unchanged so
/// the renderer can fall back to a system font.
pub fn resolve_font_face(face: &str, style: FontStyle, fonts_dir: &Path) -> String {
    if face.is_empty() || Path::new(face).is_absolute() {
        return face.to_string();
    }
    match find_font_file(face, style, fonts_dir) {
        Some(path) => path.to_string_lossy().into_owned(),
        None => face.to_string(),
    }
}

/// Family name to request from the renderer. Font file paths map to the part
/// of the file name before the style suffix (`Roboto-Bold.ttf` -> `Roboto`).
pub fn family_name(face: &str) -> String {
    let path = Path::new(face);
    if !path.is_absolute() && !has_font_extension(path) {
        return face.to_string();
    }
    path.file_stem()
        .map(|stem| stem.to_string_lossy())
        .and_then(|stem| stem.split('-').next().map(str::to_string))
        .filter(|family| !family.is_empty())
        .unwrap_or_else(|| face.to_string())
}

pub fn find_font_file(family: &str, style: FontStyle, fonts_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(fonts_dir).ok()?;
    let family = family.to_lowercase();

    let mut candidates: Vec<(PathBuf, String)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_font_extension(path))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_string_lossy().to_lowercase();
            stem.starts_with(&family).then_some((path, stem))
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    // read_dir order is platform dependent.
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some(suffix) = style.file_suffix() {
        let suffix = suffix.to_lowercase();
        if let Some((path, _)) = candidates.iter().find(|(_, stem)| stem.contains(&suffix)) {
            return Some(path.clone());
        }
    }
    if let Some((path, _)) = candidates.iter().find(|(_, stem)| stem.contains("regular")) {
        return Some(path.clone());
    }
    candidates.into_iter().next().map(|(path, _)| path)
}

fn has_font_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            FONT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
