use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::flags::{CapabilityFlags, FluxVariant, PhotoMakerVersion, QuantizationMode};
use crate::route::ModelType;
use crate::CapError;

/// Flux transformer configurations the PuLID generator can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FluxSpec {
    FluxDev,
    FluxDevNf4,
    FluxSchnell,
}

impl FluxSpec {
    pub fn select(variant: FluxVariant, quantization: QuantizationMode) -> Self {
        match (variant, quantization) {
            (FluxVariant::Schnell, _) => Self::FluxSchnell,
            (FluxVariant::Dev, QuantizationMode::Nf4) => Self::FluxDevNf4,
            (FluxVariant::Dev, _) => Self::FluxDev,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FluxDev => "flux-dev",
            Self::FluxDevNf4 => "flux-dev-nf4",
            Self::FluxSchnell => "flux-schnell",
        }
    }

    pub fn repo(&self) -> &'static str {
        match self {
            Self::FluxDev | Self::FluxDevNf4 => "black-forest-labs/FLUX.1-dev",
            Self::FluxSchnell => "black-forest-labs/FLUX.1-schnell",
        }
    }

    pub fn flow_file(&self) -> &'static str {
        match self {
            Self::FluxDev | Self::FluxDevNf4 => "flux1-dev.safetensors",
            Self::FluxSchnell => "flux1-schnell.safetensors",
        }
    }

    pub fn ae_file(&self) -> &'static str {
        "ae.safetensors"
    }

    /// Schnell is distilled without guidance embedding.
    pub fn guidance_embed(&self) -> bool {
        !matches!(self, Self::FluxSchnell)
    }
}

/// Adapter weights fetched on demand next to the photomaker models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Checkpoint {
    PhotoMakerV1,
    PhotoMakerV2,
    KolorsFaceIdPlus,
    PulidFlux,
    StoryMakerMask,
    KolorsIpAdapterPlus,
    MsAdapter,
}

impl Checkpoint {
    pub fn photomaker(version: PhotoMakerVersion) -> Self {
        match version {
            PhotoMakerVersion::V1 => Self::PhotoMakerV1,
            PhotoMakerVersion::V2 => Self::PhotoMakerV2,
        }
    }

    pub fn repo(&self) -> &'static str {
        match self {
            Self::PhotoMakerV1 => "TencentARC/PhotoMaker",
            Self::PhotoMakerV2 => "TencentARC/PhotoMaker-V2",
            Self::KolorsFaceIdPlus => "Kwai-Kolors/Kolors-IP-Adapter-FaceID-Plus",
            Self::PulidFlux => "guozinan/PuLID",
            Self::StoryMakerMask => "RED-AIGC/StoryMaker",
            Self::KolorsIpAdapterPlus => "Kwai-Kolors/Kolors-IP-Adapter-Plus",
            Self::MsAdapter => "doge1516/MS-Diffusion",
        }
    }

    pub fn file(&self) -> &'static str {
        match self {
            Self::PhotoMakerV1 => "photomaker-v1.bin",
            Self::PhotoMakerV2 => "photomaker-v2.bin",
            Self::KolorsFaceIdPlus => "ipa-faceid-plus.bin",
            Self::PulidFlux => "pulid_flux_v0.9.0.safetensors",
            Self::StoryMakerMask => "mask.bin",
            Self::KolorsIpAdapterPlus => "ip_adapter_plus_general.bin",
            Self::MsAdapter => "ms_adapter.bin",
        }
    }

    /// Location inside the shared cache mount, when the deployment provides one.
    pub fn cache_file(&self) -> Option<&'static str> {
        match self {
            Self::PhotoMakerV1 => Some("models/photomaker/photomaker-v1.bin"),
            Self::PhotoMakerV2 => Some("models/photomaker/photomaker-v2.bin"),
            Self::KolorsFaceIdPlus => Some("models/ControlNet/kolors_cn/kolors_ipa_faceid_plus.bin"),
            Self::PulidFlux => Some("models/pulid/pulid_flux_v0.9.0.safetensors"),
            Self::StoryMakerMask => Some("models/RED-AIGC/StoryMaker/mask.bin"),
            Self::KolorsIpAdapterPlus => Some("models/ControlNet/Kolors_ip_adapter_plus_general.bin"),
            Self::MsAdapter => None,
        }
    }
}

/// Which adapter checkpoints an invocation needs, and the photomaker mode
/// left after adapters that replace PhotoMaker have claimed the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointPlan {
    photomake_mode: Option<PhotoMakerVersion>,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointPlan {
    pub fn for_flags(flags: &CapabilityFlags, model_type: ModelType) -> Self {
        let mut photomake_mode = flags.photomake_mode();
        let mut checkpoints = Vec::new();

        let alternative_identity = flags.use_infinite_id()
            || flags.pulid_enabled()
            || flags.use_face_conditioning()
            || flags.use_kolor()
            || flags.use_flux()
            || flags.sd35_mode();
        if !alternative_identity {
            // An unset mode falls back to the v2 adapter.
            let version = photomake_mode.unwrap_or(PhotoMakerVersion::V2);
            checkpoints.push(Checkpoint::photomaker(version));
        }
        if flags.use_face_conditioning() {
            checkpoints.push(Checkpoint::KolorsFaceIdPlus);
            photomake_mode = None;
        }
        if flags.pulid_enabled() {
            checkpoints.push(Checkpoint::PulidFlux);
            photomake_mode = None;
        }
        if flags.use_story_maker() {
            checkpoints.push(Checkpoint::StoryMakerMask);
            photomake_mode = None;
        }
        if flags.use_kolor() && model_type == ModelType::Img2Img && !flags.use_face_conditioning() {
            checkpoints.push(Checkpoint::KolorsIpAdapterPlus);
            photomake_mode = None;
        }

        Self {
            photomake_mode,
            checkpoints,
        }
    }

    pub fn push(&mut self, checkpoint: Checkpoint) {
        if !self.checkpoints.contains(&checkpoint) {
            self.checkpoints.push(checkpoint);
        }
    }

    pub fn photomake_mode(&self) -> Option<PhotoMakerVersion> {
        self.photomake_mode
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn contains(&self, checkpoint: Checkpoint) -> bool {
        self.checkpoints.contains(&checkpoint)
    }
}

/// Finds adapter checkpoints locally, in the shared cache, or on the Hub.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    local_dir: PathBuf,
    cache_dir: Option<PathBuf>,
    hub_cache: Option<PathBuf>,
    token: Option<String>,
}

impl CheckpointStore {
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
            cache_dir: None,
            hub_cache: None,
            token: std::env::var("HF_TOKEN").ok(),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_hub_cache(mut self, hub_cache: impl Into<PathBuf>) -> Self {
        self.hub_cache = Some(hub_cache.into());
        self
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Looks for the checkpoint without touching the network.
    pub fn locate(&self, checkpoint: Checkpoint) -> Option<PathBuf> {
        let local = self.local_dir.join(checkpoint.file());
        if local.is_file() {
            return Some(local);
        }
        let cached = self
            .cache_dir
            .as_ref()
            .zip(checkpoint.cache_file())
            .map(|(dir, file)| dir.join(file))?;
        cached.is_file().then_some(cached)
    }

    pub fn get(&self, checkpoint: Checkpoint) -> Result<PathBuf, CapError> {
        if let Some(path) = self.locate(checkpoint) {
            debug!(checkpoint = checkpoint.file(), path = %path.display(), "checkpoint found");
            return Ok(path);
        }

        info!(repo = checkpoint.repo(), file = checkpoint.file(), "downloading checkpoint");
        let hub_error = |source| CapError::Hub {
            repo: checkpoint.repo().to_string(),
            file: checkpoint.file().to_string(),
            source,
        };
        let mut builder = ApiBuilder::new().with_token(self.token.clone());
        if let Some(hub_cache) = &self.hub_cache {
            builder = builder.with_cache_dir(hub_cache.clone());
        }
        let api = builder.build().map_err(hub_error)?;
        let path = api
            .model(checkpoint.repo().to_string())
            .get(checkpoint.file())
            .map_err(hub_error)?;
        info!(path = %path.display(), "checkpoint ready");
        Ok(path)
    }
}
