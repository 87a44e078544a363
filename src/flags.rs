//! Capability resolution.
//!
//! A [`CapabilityRequest`] carries the raw configuration of one generation
//! invocation: a mode string (or structured [`ModeOptions`]), a repository
//! identifier and a handful of opaque selectors. [`Resolver::resolve`] turns
//! it into an immutable [`CapabilityFlags`] bundle that the route planner and
//! the checkpoint store consume.
//!
//! Resolution never fails. Selectors that cannot be resolved leave their path
//! unset, and callers validate the bundle against the preconditions of the
//! route they are about to build (see [`crate::route`]).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;
use tracing::debug;

use crate::selector::{lora_basename, ModelFolder, PathResolver, Selector};
use crate::CapError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationMode {
    #[default]
    Fp16,
    Fp8,
    Nf4,
}

impl QuantizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fp16 => "fp16",
            Self::Fp8 => "fp8",
            Self::Nf4 => "nf4",
        }
    }
}

/// Where the face-analysis ONNX sessions run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnnxProvider {
    Cpu,
    #[default]
    Gpu,
}

impl OnnxProvider {
    pub fn execution_providers(&self) -> &'static [&'static str] {
        match self {
            Self::Cpu => &["CPUExecutionProvider"],
            Self::Gpu => &["CUDAExecutionProvider", "CPUExecutionProvider"],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FluxVariant {
    #[default]
    Dev,
    Schnell,
}

impl FluxVariant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dev => "flux-dev",
            Self::Schnell => "flux-schnell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoMakerVersion {
    V1,
    V2,
}

impl FromStr for PhotoMakerVersion {
    type Err = CapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(CapError::Owned(format!("unknown photomaker mode {other:?}"))),
        }
    }
}

/// Model families recognised from a repository identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Kolors,
    Flux,
    Sd35,
}

impl ModelFamily {
    /// First match wins: Kolors, then Flux, then the "3.5" version marker.
    pub fn detect(repo_identifier: &str) -> Option<Self> {
        let repo = repo_identifier.to_lowercase();
        if repo.contains("kolors") {
            Some(Self::Kolors)
        } else if repo.contains("flux") {
            Some(Self::Flux)
        } else if repo.contains("3.5") {
            Some(Self::Sd35)
        } else {
            None
        }
    }
}

/// The independent switches that the legacy mode string encodes.
///
/// Callers can build this directly instead of going through [`ModeOptions::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ModeOptions {
    pub auraface: bool,
    pub nf4: bool,
    pub save_model: bool,
    pub face: bool,
    pub flux_variant: FluxVariant,
    pub pulid: bool,
    pub fp8: bool,
    pub story_maker: bool,
    pub dual_only: bool,
    pub onnx_provider: OnnxProvider,
    pub low_vram: bool,
    pub tag: bool,
    pub consistory: bool,
    pub cache: bool,
    pub inject: bool,
    pub use_quantize: bool,
    pub infinite_id: bool,
}

impl Default for ModeOptions {
    fn default() -> Self {
        Self {
            auraface: false,
            nf4: false,
            save_model: false,
            face: false,
            flux_variant: FluxVariant::Dev,
            pulid: false,
            fp8: false,
            story_maker: false,
            dual_only: false,
            onnx_provider: OnnxProvider::Gpu,
            low_vram: false,
            tag: false,
            consistory: false,
            cache: false,
            inject: false,
            use_quantize: true,
            infinite_id: false,
        }
    }
}

impl ModeOptions {
    /// Parses a free-text mode string. Every trigger is an independent,
    /// case-insensitive substring test, so "auraface" also sets `face`.
    pub fn parse(mode_text: &str) -> Self {
        let text = mode_text.trim().to_lowercase();
        if text.is_empty() {
            return Self::default();
        }
        let has = |needle: &str| text.contains(needle);
        Self {
            auraface: has("auraface"),
            nf4: has("nf4"),
            save_model: has("save"),
            face: has("face"),
            flux_variant: if has("schnell") {
                FluxVariant::Schnell
            } else {
                FluxVariant::Dev
            },
            pulid: has("pulid"),
            fp8: has("fp8"),
            story_maker: has("maker"),
            dual_only: has("dual"),
            onnx_provider: if has("cpu") {
                OnnxProvider::Cpu
            } else {
                OnnxProvider::Gpu
            },
            low_vram: has("low"),
            tag: has("tag"),
            consistory: has("consi"),
            cache: has("cache"),
            inject: has("inject"),
            use_quantize: !has("noquan"),
            infinite_id: has("infinite"),
        }
    }

    /// fp8 beats nf4 unless PuLID is on, where the nf4 request is forced.
    pub fn quantization(&self) -> QuantizationMode {
        if self.pulid && self.nf4 {
            QuantizationMode::Nf4
        } else if self.fp8 {
            QuantizationMode::Fp8
        } else if self.nf4 {
            QuantizationMode::Nf4
        } else {
            QuantizationMode::Fp16
        }
    }
}

impl FromStr for ModeOptions {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSource {
    Text(String),
    Options(ModeOptions),
}

impl ModeSource {
    pub fn options(&self) -> ModeOptions {
        match self {
            Self::Text(text) => ModeOptions::parse(text),
            Self::Options(options) => *options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub mode: ModeSource,
    pub repo_identifier: String,
    pub photomake_mode: PhotoMakerVersion,
    pub clip_vision: Selector,
    pub character_weights: Selector,
    pub checkpoint: Selector,
    pub lora: Selector,
}

impl CapabilityRequest {
    pub fn new(mode_text: impl Into<String>, repo_identifier: impl Into<String>) -> Self {
        Self::with_mode(ModeSource::Text(mode_text.into()), repo_identifier)
    }

    pub fn with_options(options: ModeOptions, repo_identifier: impl Into<String>) -> Self {
        Self::with_mode(ModeSource::Options(options), repo_identifier)
    }

    fn with_mode(mode: ModeSource, repo_identifier: impl Into<String>) -> Self {
        Self {
            mode,
            repo_identifier: repo_identifier.into(),
            photomake_mode: PhotoMakerVersion::V2,
            clip_vision: Selector::None,
            character_weights: Selector::None,
            checkpoint: Selector::None,
            lora: Selector::None,
        }
    }

    pub fn photomake_mode(mut self, version: PhotoMakerVersion) -> Self {
        self.photomake_mode = version;
        self
    }

    pub fn clip_vision(mut self, selector: impl Into<Selector>) -> Self {
        self.clip_vision = selector.into();
        self
    }

    pub fn character_weights(mut self, selector: impl Into<Selector>) -> Self {
        self.character_weights = selector.into();
        self
    }

    pub fn checkpoint(mut self, selector: impl Into<Selector>) -> Self {
        self.checkpoint = selector.into();
        self
    }

    pub fn lora(mut self, selector: impl Into<Selector>) -> Self {
        self.lora = selector.into();
        self
    }
}

/// The resolved, read-only capability bundle of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityFlags {
    use_auraface: bool,
    use_nf4: bool,
    save_model: bool,
    use_face_conditioning: bool,
    flux_variant: FluxVariant,
    pulid_enabled: bool,
    quantization_mode: QuantizationMode,
    use_story_maker: bool,
    dual_only: bool,
    onnx_provider: OnnxProvider,
    low_vram: bool,
    tag_mode: bool,
    sd35_mode: bool,
    consistory_mode: bool,
    cache_enabled: bool,
    inject_enabled: bool,
    use_quantize: bool,
    use_infinite_id: bool,
    use_kolor: bool,
    use_flux: bool,
    photomake_mode: Option<PhotoMakerVersion>,
    clip_vision_path: Option<PathBuf>,
    character_files: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    lora_name: Option<String>,
    lora_path: Option<PathBuf>,
}

impl CapabilityFlags {
    pub fn use_auraface(&self) -> bool {
        self.use_auraface
    }

    pub fn use_nf4(&self) -> bool {
        self.use_nf4
    }

    pub fn save_model(&self) -> bool {
        self.save_model
    }

    pub fn use_face_conditioning(&self) -> bool {
        self.use_face_conditioning
    }

    pub fn flux_variant(&self) -> FluxVariant {
        self.flux_variant
    }

    pub fn pulid_enabled(&self) -> bool {
        self.pulid_enabled
    }

    pub fn quantization_mode(&self) -> QuantizationMode {
        self.quantization_mode
    }

    pub fn use_story_maker(&self) -> bool {
        self.use_story_maker
    }

    pub fn dual_only(&self) -> bool {
        self.dual_only
    }

    pub fn onnx_provider(&self) -> OnnxProvider {
        self.onnx_provider
    }

    pub fn low_vram(&self) -> bool {
        self.low_vram
    }

    pub fn tag_mode(&self) -> bool {
        self.tag_mode
    }

    pub fn sd35_mode(&self) -> bool {
        self.sd35_mode
    }

    pub fn consistory_mode(&self) -> bool {
        self.consistory_mode
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn inject_enabled(&self) -> bool {
        self.inject_enabled
    }

    pub fn use_quantize(&self) -> bool {
        self.use_quantize
    }

    pub fn use_infinite_id(&self) -> bool {
        self.use_infinite_id
    }

    pub fn use_kolor(&self) -> bool {
        self.use_kolor
    }

    pub fn use_flux(&self) -> bool {
        self.use_flux
    }

    /// `None` means no PhotoMaker adapter is involved.
    pub fn photomake_mode(&self) -> Option<PhotoMakerVersion> {
        self.photomake_mode
    }

    pub fn clip_vision_path(&self) -> Option<&Path> {
        self.clip_vision_path.as_deref()
    }

    pub fn character_files(&self) -> Option<&Path> {
        self.character_files.as_deref()
    }

    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.checkpoint_path.as_deref()
    }

    pub fn lora_name(&self) -> Option<&str> {
        self.lora_name.as_deref()
    }

    pub fn lora_path(&self) -> Option<&Path> {
        self.lora_path.as_deref()
    }

    /// True when none of the alternative model families took over, i.e. the
    /// SDXL story-diffusion path is in charge.
    pub fn uses_story_diffusion(&self) -> bool {
        !(self.use_kolor || self.use_flux || self.sd35_mode)
    }
}

/// Resolves requests against a path collaborator.
#[derive(Debug, Clone, Default)]
pub struct Resolver<R> {
    paths: R,
}

impl<R: PathResolver> Resolver<R> {
    pub fn new(paths: R) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &R {
        &self.paths
    }

    pub fn resolve(&self, request: &CapabilityRequest) -> CapabilityFlags {
        let mode = request.mode.options();

        let clip_vision_path = self.lookup(ModelFolder::ClipVision, &request.clip_vision);
        let character_files = self.lookup(ModelFolder::CharacterWeights, &request.character_weights);
        let checkpoint_path = self.lookup(ModelFolder::Checkpoints, &request.checkpoint);
        let lora_path = self.lookup(ModelFolder::Loras, &request.lora);
        let lora_name = request.lora.name().map(lora_basename);

        let mut photomake_mode = Some(request.photomake_mode);
        let (mut use_kolor, mut use_flux, mut sd35_mode) = (false, false, false);
        match ModelFamily::detect(&request.repo_identifier) {
            Some(ModelFamily::Kolors) => {
                use_kolor = true;
                photomake_mode = None;
            }
            Some(ModelFamily::Flux) => {
                use_flux = true;
                photomake_mode = None;
            }
            Some(ModelFamily::Sd35) => sd35_mode = true,
            None => {}
        }

        if mode.pulid {
            use_flux = true;
            photomake_mode = None;
        }

        let flags = CapabilityFlags {
            use_auraface: mode.auraface,
            use_nf4: mode.nf4,
            save_model: mode.save_model,
            use_face_conditioning: mode.face,
            flux_variant: mode.flux_variant,
            pulid_enabled: mode.pulid,
            quantization_mode: mode.quantization(),
            use_story_maker: mode.story_maker,
            dual_only: mode.dual_only,
            onnx_provider: mode.onnx_provider,
            low_vram: mode.low_vram,
            tag_mode: mode.tag,
            sd35_mode,
            consistory_mode: mode.consistory,
            cache_enabled: mode.cache,
            inject_enabled: mode.inject,
            use_quantize: mode.use_quantize,
            use_infinite_id: mode.infinite_id,
            use_kolor,
            use_flux,
            photomake_mode,
            clip_vision_path,
            character_files,
            checkpoint_path,
            lora_name,
            lora_path,
        };
        debug!(?flags, "resolved capabilities");
        flags
    }

    fn lookup(&self, folder: ModelFolder, selector: &Selector) -> Option<PathBuf> {
        let name = selector.name()?;
        let path = self.paths.full_path(folder, name);
        if path.is_none() {
            debug!(folder = folder.dir_name(), name, "selector did not resolve");
        }
        path
    }
}
