use crate::error::WatermarkError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FONT_DIR_ENV: &str = "TILEMARK_FONT_DIR";
const MAX_SEARCH_DEPTH: usize = 4;

// Common sans faces across Linux distributions, macOS and Windows, in
// preference order.
const SANS_CANDIDATES: &[&str] = &[
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "NotoSans-Regular.ttf",
    "Arial.ttf",
    "arial.ttf",
    "segoeui.ttf",
    "Helvetica.ttc",
    "FreeSans.ttf",
    "Roboto-Regular.ttf",
    "Ubuntu-R.ttf",
    "Cantarell-Regular.otf",
];

/// Parsed-once font program shared by every stamp a `Watermarker` renders.
#[derive(Debug, Clone)]
pub struct FontSource {
    name: String,
    data: Arc<Vec<u8>>,
}

impl FontSource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WatermarkError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| {
            WatermarkError::FontLoad(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_bytes(data, &path.display().to_string())
    }

    pub fn from_bytes(data: Vec<u8>, source: &str) -> Result<Self, WatermarkError> {
        let face = ttf_parser::Face::parse(&data, 0).map_err(|err| {
            WatermarkError::FontLoad(format!("invalid font data for {source}: {err}"))
        })?;
        let name = face_family_name(&face).unwrap_or_else(|| source.to_string());
        Ok(Self {
            name,
            data: Arc::new(data),
        })
    }

    /// Locates the first usable sans face under the system font directories.
    pub fn system_default() -> Result<Self, WatermarkError> {
        let dirs = system_font_dirs();
        for candidate in SANS_CANDIDATES {
            for dir in &dirs {
                let Some(path) = find_file(dir, candidate, MAX_SEARCH_DEPTH) else {
                    continue;
                };
                match Self::from_file(&path) {
                    Ok(font) => {
                        log::debug!("resolved system font {} at {}", font.name, path.display());
                        return Ok(font);
                    }
                    Err(err) => log::debug!("skipping {}: {err}", path.display()),
                }
            }
        }
        Err(WatermarkError::FontLoad(format!(
            "no usable system font found; pass a font file or set {FONT_DIR_ENV}"
        )))
    }

    pub fn resolve(path: Option<&Path>) -> Result<Self, WatermarkError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::system_default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}

fn face_family_name(face: &ttf_parser::Face<'_>) -> Option<String> {
    use ttf_parser::name::name_id;

    let mut family = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        if name.trim().is_empty() {
            continue;
        }
        match entry.name_id {
            name_id::FULL_NAME => return Some(name),
            name_id::FAMILY if family.is_none() => family = Some(name),
            _ => {}
        }
    }
    family
}

fn find_file(dir: &Path, file_name: &str, depth: usize) -> Option<PathBuf> {
    let direct = dir.join(file_name);
    if direct.is_file() {
        return Some(direct);
    }
    if depth == 0 {
        return None;
    }
    let entries = fs::read_dir(dir).ok()?;
    let mut subdirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    subdirs
        .iter()
        .find_map(|sub| find_file(sub, file_name, depth - 1))
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(extra) = std::env::var(FONT_DIR_ENV) {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}
