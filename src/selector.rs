//! Opaque resource selectors and the folder lookup that turns them into paths.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

/// A user-facing choice from one of the model menus. `"none"` is the sentinel
/// for "nothing selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Selector {
    #[default]
    None,
    Named(String),
}

impl Selector {
    pub const SENTINEL: &'static str = "none";

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Named(name) => Some(name.as_str()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl FromStr for Selector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s == Self::SENTINEL {
            Self::None
        } else {
            Self::Named(s.to_string())
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFolder {
    Checkpoints,
    Loras,
    ClipVision,
    Vae,
    PhotoMaker,
    /// Saved character weight directories, nested under the photomaker folder.
    CharacterWeights,
}

impl ModelFolder {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Checkpoints => "checkpoints",
            Self::Loras => "loras",
            Self::ClipVision => "clip_vision",
            Self::Vae => "vae",
            Self::PhotoMaker => "photomaker",
            Self::CharacterWeights => "photomaker/pt",
        }
    }
}

/// External collaborator resolving a selector name inside a model folder.
///
/// For [`ModelFolder::CharacterWeights`] an implementation only returns the
/// directory when it holds at least one entry.
pub trait PathResolver {
    fn full_path(&self, folder: ModelFolder, name: &str) -> Option<PathBuf>;
}

impl<T: PathResolver + ?Sized> PathResolver for &T {
    fn full_path(&self, folder: ModelFolder, name: &str) -> Option<PathBuf> {
        (**self).full_path(folder, name)
    }
}

/// A fixed lookup table, no filesystem access.
#[derive(Debug, Clone, Default)]
pub struct StaticPaths {
    entries: HashMap<(ModelFolder, String), PathBuf>,
}

impl StaticPaths {
    pub fn with(mut self, folder: ModelFolder, name: &str, path: impl Into<PathBuf>) -> Self {
        self.entries.insert((folder, name.to_string()), path.into());
        self
    }
}

impl PathResolver for StaticPaths {
    fn full_path(&self, folder: ModelFolder, name: &str) -> Option<PathBuf> {
        self.entries.get(&(folder, name.to_string())).cloned()
    }
}

/// Filesystem-backed folders laid out like the host application's model
/// directory, with extra search roots per folder.
#[derive(Debug, Clone)]
pub struct FolderPaths {
    models_dir: PathBuf,
    extra: HashMap<ModelFolder, Vec<PathBuf>>,
}

impl FolderPaths {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            extra: HashMap::new(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn folder_dir(&self, folder: ModelFolder) -> PathBuf {
        self.models_dir.join(folder.dir_name())
    }

    /// Registers an additional search root. `first` puts it ahead of the default.
    pub fn add_model_folder_path(&mut self, folder: ModelFolder, path: impl Into<PathBuf>, first: bool) {
        let roots = self.extra.entry(folder).or_default();
        if first {
            roots.insert(0, path.into());
        } else {
            roots.push(path.into());
        }
    }

    fn roots(&self, folder: ModelFolder) -> Vec<PathBuf> {
        let mut roots = vec![self.folder_dir(folder)];
        if let Some(extra) = self.extra.get(&folder) {
            roots.extend(extra.iter().cloned());
        }
        roots
    }
}

impl PathResolver for FolderPaths {
    fn full_path(&self, folder: ModelFolder, name: &str) -> Option<PathBuf> {
        let relative = normalize_separators(name);
        self.roots(folder)
            .into_iter()
            .map(|root| root.join(&relative))
            .find(|candidate| match folder {
                ModelFolder::CharacterWeights => is_non_empty_dir(candidate),
                _ => candidate.is_file(),
            })
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn normalize_separators(name: &str) -> PathBuf {
    name.split(['/', '\\']).filter(|part| !part.is_empty()).collect()
}

/// Strips any folder prefix from a LoRA menu entry, for either separator.
pub fn lora_basename(name: &str) -> String {
    let name = name.rsplit('/').next().unwrap_or(name);
    name.rsplit('\\').next().unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_and_blank_are_none() {
        assert_eq!(Selector::from("none"), Selector::None);
        assert_eq!(Selector::from("  "), Selector::None);
        assert_eq!(
            Selector::from("clip.safetensors"),
            Selector::Named("clip.safetensors".to_string())
        );
        assert!("none".parse::<Selector>().unwrap().is_none());
    }

    #[test]
    fn lora_basename_strips_both_separators() {
        assert_eq!(lora_basename("a/b/c.safetensors"), "c.safetensors");
        assert_eq!(lora_basename("a\\b\\c.safetensors"), "c.safetensors");
        assert_eq!(lora_basename("a/b\\c.safetensors"), "c.safetensors");
        assert_eq!(lora_basename("c.safetensors"), "c.safetensors");
    }

    #[test]
    fn separators_are_normalized() {
        assert_eq!(
            normalize_separators("sdxl\\styles/ink.safetensors"),
            ["sdxl", "styles", "ink.safetensors"].iter().collect::<PathBuf>()
        );
    }

    #[test]
    fn extra_roots_are_ordered() {
        let mut paths = FolderPaths::new("/models");
        paths.add_model_folder_path(ModelFolder::Loras, "/late", false);
        paths.add_model_folder_path(ModelFolder::Loras, "/early", true);
        assert_eq!(
            paths.roots(ModelFolder::Loras),
            vec![
                PathBuf::from("/models/loras"),
                PathBuf::from("/early"),
                PathBuf::from("/late")
            ]
        );
    }
}
