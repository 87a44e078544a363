//! Route selection.
//!
//! Maps a resolved [`CapabilityFlags`] bundle plus a few per-invocation
//! inputs to the pipeline family that would be built, checks the route's
//! preconditions before anything expensive is loaded, and collects what the
//! route needs: adapter checkpoints, a Flux config and the face-analysis stack.

use clap::ValueEnum;
use serde::Serialize;
use tracing::info;

use crate::flags::{CapabilityFlags, PhotoMakerVersion, QuantizationMode};
use crate::model::{Checkpoint, CheckpointPlan, FluxSpec};
use crate::selector::Selector;
use crate::CapError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    #[value(name = "txt2img")]
    Txt2Img,
    #[value(name = "img2img")]
    Img2Img,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterLayout {
    #[default]
    Single,
    Dual,
}

/// Per-invocation inputs that are not part of the capability bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequest {
    pub model_type: ModelType,
    pub layout: CharacterLayout,
    /// A diffusers repository id or directory was supplied.
    pub has_repo: bool,
    pub vae: Selector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    FluxPulid { quantization: QuantizationMode },
    InfiniteYou,
    /// No single-file checkpoint: the transformer is quantized to fp8 from the repo.
    FluxRepo,
    FluxNf4,
    FluxSingleFile,
    KolorsFaceId,
    KolorsIpAdapter,
    Kolors,
    Sd35 { nf4: bool },
    StoryMaker { dual_only: bool },
    MsDiffusion,
    StoryDiffusion { version: PhotoMakerVersion },
    Sdxl,
}

type RuleFn = fn(&CapabilityFlags, &RouteRequest) -> Option<Route>;

/// One row of the route table.
#[derive(Clone, Copy)]
pub struct RouteRule {
    pub name: &'static str,
    pub select: RuleFn,
}

impl std::fmt::Debug for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRule").field("name", &self.name).finish()
    }
}

fn pulid(flags: &CapabilityFlags, _: &RouteRequest) -> Option<Route> {
    flags.pulid_enabled().then_some(Route::FluxPulid {
        quantization: flags.quantization_mode(),
    })
}

fn infinite_you(flags: &CapabilityFlags, _: &RouteRequest) -> Option<Route> {
    flags.use_infinite_id().then_some(Route::InfiniteYou)
}

fn flux(flags: &CapabilityFlags, _: &RouteRequest) -> Option<Route> {
    if !flags.use_flux() {
        return None;
    }
    Some(match (flags.checkpoint_path(), flags.use_nf4()) {
        (None, _) => Route::FluxRepo,
        (Some(_), true) => Route::FluxNf4,
        (Some(_), false) => Route::FluxSingleFile,
    })
}

fn kolors(flags: &CapabilityFlags, request: &RouteRequest) -> Option<Route> {
    if !flags.use_kolor() {
        return None;
    }
    Some(if flags.use_face_conditioning() {
        Route::KolorsFaceId
    } else if request.model_type == ModelType::Img2Img {
        Route::KolorsIpAdapter
    } else {
        Route::Kolors
    })
}

fn sd35(flags: &CapabilityFlags, _: &RouteRequest) -> Option<Route> {
    flags.sd35_mode().then_some(Route::Sd35 { nf4: flags.use_nf4() })
}

fn story_maker(flags: &CapabilityFlags, _: &RouteRequest) -> Option<Route> {
    flags.use_story_maker().then_some(Route::StoryMaker {
        dual_only: flags.dual_only(),
    })
}

fn ms_diffusion(_: &CapabilityFlags, request: &RouteRequest) -> Option<Route> {
    (request.layout == CharacterLayout::Dual).then_some(Route::MsDiffusion)
}

fn story_diffusion(flags: &CapabilityFlags, _: &RouteRequest) -> Option<Route> {
    flags
        .photomake_mode()
        .map(|version| Route::StoryDiffusion { version })
}

/// Ordered rules; the first rule that yields a route wins.
pub static DEFAULT_RULES: &[RouteRule] = &[
    RouteRule { name: "pulid", select: pulid },
    RouteRule { name: "infinite-you", select: infinite_you },
    RouteRule { name: "flux", select: flux },
    RouteRule { name: "kolors", select: kolors },
    RouteRule { name: "sd35", select: sd35 },
    RouteRule { name: "story-maker", select: story_maker },
    RouteRule { name: "ms-diffusion", select: ms_diffusion },
    RouteRule { name: "story-diffusion", select: story_diffusion },
];

#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn select(&self, flags: &CapabilityFlags, request: &RouteRequest) -> Route {
        self.rules
            .iter()
            .find_map(|rule| (rule.select)(flags, request).map(|route| (rule.name, route)))
            .map(|(name, route)| {
                tracing::debug!(rule = name, ?route, "route selected");
                route
            })
            .unwrap_or(Route::Sdxl)
    }
}

/// Fails fast when `route` cannot be built from what was resolved.
pub fn validate(route: Route, flags: &CapabilityFlags, request: &RouteRequest) -> Result<(), CapError> {
    let invalid = |msg: &str| Err(CapError::InvalidConfiguration(msg.to_string()));
    let has_clip_vision = flags.clip_vision_path().is_some();
    let has_checkpoint = flags.checkpoint_path().is_some();

    // The mask adapter is planned for story-maker whatever route wins.
    if flags.use_story_maker() && !has_clip_vision {
        return invalid("story maker needs a clip_vision model");
    }

    match route {
        Route::FluxPulid { .. } => {
            if !has_clip_vision {
                return invalid("pulid needs the EVA02 CLIP vision model in the clip_vision menu");
            }
            if !has_checkpoint {
                return invalid("pulid needs a flux checkpoint");
            }
            if request.vae.is_none() {
                return invalid("pulid needs an ae model from the vae menu");
            }
        }
        Route::FluxNf4 | Route::FluxSingleFile if !has_checkpoint => {
            return invalid("this flux route needs a checkpoint");
        }
        Route::StoryMaker { .. } if !has_checkpoint => {
            return invalid("story maker needs an SDXL checkpoint");
        }
        Route::MsDiffusion => {
            if !has_clip_vision {
                return invalid("ms-diffusion needs a clip_vision model");
            }
            if !request.has_repo && !has_checkpoint {
                return invalid("ms-diffusion needs a diffusers repo or a checkpoint");
            }
        }
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceModel {
    /// PhotoMaker v2 insightface wrapper, detection and recognition only.
    PhotoMakerAnalyzer { auraface: bool },
    KolorsFaceInfo,
    BuffaloL,
    AntelopeV2,
    ArcFace,
}

impl FaceModel {
    pub fn pack_name(&self) -> Option<&'static str> {
        match self {
            Self::PhotoMakerAnalyzer { auraface: true } => Some("AuraFace-v1"),
            Self::PhotoMakerAnalyzer { auraface: false } => None,
            Self::KolorsFaceInfo | Self::AntelopeV2 => Some("antelopev2"),
            Self::BuffaloL => Some("buffalo_l"),
            Self::ArcFace => Some("arcface"),
        }
    }
}

/// The face-analysis models a route loads, and the ONNX providers they run on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FaceStack {
    pub primary: Option<FaceModel>,
    pub secondary: Option<FaceModel>,
    pub segmentation: Option<&'static str>,
    pub providers: Vec<&'static str>,
}

impl FaceStack {
    pub fn for_flags(flags: &CapabilityFlags, photomake_mode: Option<PhotoMakerVersion>) -> Self {
        let v2_story = flags.uses_story_diffusion() && photomake_mode == Some(PhotoMakerVersion::V2);
        let analyzer = FaceModel::PhotoMakerAnalyzer {
            auraface: flags.use_auraface(),
        };
        let (primary, secondary, segmentation) = if v2_story && !flags.use_story_maker() {
            (Some(analyzer), None, None)
        } else if flags.use_face_conditioning() {
            (Some(FaceModel::KolorsFaceInfo), None, None)
        } else if flags.use_story_maker() {
            let mask = Some("briaai/RMBG-1.4");
            if flags.dual_only() && v2_story {
                (Some(analyzer), Some(FaceModel::BuffaloL), mask)
            } else {
                (Some(FaceModel::BuffaloL), None, mask)
            }
        } else if flags.use_infinite_id() {
            (Some(FaceModel::AntelopeV2), Some(FaceModel::ArcFace), None)
        } else {
            (None, None, None)
        };
        let providers = if primary.is_some() {
            flags.onnx_provider().execution_providers().to_vec()
        } else {
            Vec::new()
        };
        Self {
            primary,
            secondary,
            segmentation,
            providers,
        }
    }
}

/// Everything decided for one invocation before any weights are loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutePlan {
    pub route: Route,
    /// PuLID generator config; the other Flux routes load from the repo or checkpoint.
    pub flux: Option<FluxSpec>,
    pub quantization: QuantizationMode,
    pub checkpoints: CheckpointPlan,
    pub faces: FaceStack,
}

impl RoutePlan {
    pub fn new(flags: &CapabilityFlags, request: &RouteRequest) -> Result<Self, CapError> {
        Self::with_table(&RouteTable::default(), flags, request)
    }

    pub fn with_table(table: &RouteTable, flags: &CapabilityFlags, request: &RouteRequest) -> Result<Self, CapError> {
        let route = table.select(flags, request);
        validate(route, flags, request)?;

        let mut checkpoints = CheckpointPlan::for_flags(flags, request.model_type);
        if route == Route::MsDiffusion {
            checkpoints.push(Checkpoint::MsAdapter);
        }
        let flux = match route {
            Route::FluxPulid { quantization } => Some(FluxSpec::select(flags.flux_variant(), quantization)),
            _ => None,
        };
        let faces = FaceStack::for_flags(flags, checkpoints.photomake_mode());

        info!(?route, flux = flux.map(|f| f.name()), "planned route");
        Ok(Self {
            route,
            flux,
            quantization: flags.quantization_mode(),
            checkpoints,
            faces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{CapabilityRequest, Resolver};
    use crate::selector::{ModelFolder, StaticPaths};

    fn paths() -> StaticPaths {
        StaticPaths::default()
            .with(ModelFolder::ClipVision, "eva.pt", "/m/clip_vision/eva.pt")
            .with(ModelFolder::Checkpoints, "base.safetensors", "/m/checkpoints/base.safetensors")
    }

    fn flags(request: CapabilityRequest) -> CapabilityFlags {
        Resolver::new(paths()).resolve(&request)
    }

    fn select(flags: &CapabilityFlags, request: &RouteRequest) -> Route {
        RouteTable::default().select(flags, request)
    }

    #[test]
    fn default_is_story_diffusion() {
        let f = flags(CapabilityRequest::new("", ""));
        assert_eq!(
            select(&f, &RouteRequest::default()),
            Route::StoryDiffusion {
                version: PhotoMakerVersion::V2
            }
        );
    }

    #[test]
    fn flux_routes_depend_on_checkpoint_and_nf4() {
        let repo_only = flags(CapabilityRequest::new("", "black-forest-labs/FLUX.1-dev"));
        assert_eq!(select(&repo_only, &RouteRequest::default()), Route::FluxRepo);

        let nf4 = flags(CapabilityRequest::new("nf4", "flux").checkpoint("base.safetensors"));
        assert_eq!(select(&nf4, &RouteRequest::default()), Route::FluxNf4);

        let single = flags(CapabilityRequest::new("fp8", "flux").checkpoint("base.safetensors"));
        assert_eq!(select(&single, &RouteRequest::default()), Route::FluxSingleFile);
    }

    #[test]
    fn pulid_wins_over_everything() {
        let f = flags(CapabilityRequest::new("pulid,maker,infinite", "Kwai-Kolors/Kolors"));
        assert_eq!(
            select(&f, &RouteRequest::default()),
            Route::FluxPulid {
                quantization: QuantizationMode::Fp16
            }
        );
    }

    #[test]
    fn kolors_routes() {
        let img2img = RouteRequest {
            model_type: ModelType::Img2Img,
            ..RouteRequest::default()
        };
        let face = flags(CapabilityRequest::new("face", "Kolors"));
        assert_eq!(select(&face, &img2img), Route::KolorsFaceId);
        let plain = flags(CapabilityRequest::new("", "Kolors"));
        assert_eq!(select(&plain, &img2img), Route::KolorsIpAdapter);
        assert_eq!(select(&plain, &RouteRequest::default()), Route::Kolors);
    }

    #[test]
    fn sd35_and_dual_layout() {
        let f = flags(CapabilityRequest::new("nf4", "stabilityai/stable-diffusion-3.5-large"));
        assert_eq!(select(&f, &RouteRequest::default()), Route::Sd35 { nf4: true });

        let dual = RouteRequest {
            layout: CharacterLayout::Dual,
            ..RouteRequest::default()
        };
        let f = flags(CapabilityRequest::new("", ""));
        assert_eq!(select(&f, &dual), Route::MsDiffusion);
        let f = flags(CapabilityRequest::new("maker,dual", ""));
        assert_eq!(select(&f, &dual), Route::StoryMaker { dual_only: true });
    }

    #[test]
    fn empty_table_falls_back_to_sdxl() {
        let f = flags(CapabilityRequest::new("pulid", ""));
        let table = RouteTable::new(Vec::new());
        assert_eq!(table.select(&f, &RouteRequest::default()), Route::Sdxl);
    }

    #[test]
    fn story_maker_without_clip_vision_is_rejected() {
        let f = flags(CapabilityRequest::new("maker", "").checkpoint("base.safetensors"));
        let err = RoutePlan::new(&f, &RouteRequest::default()).unwrap_err();
        assert!(matches!(err, CapError::InvalidConfiguration(_)));
    }

    #[test]
    fn story_maker_needs_clip_vision_on_any_family() {
        for repo in ["Kwai-Kolors/Kolors", "black-forest-labs/FLUX.1-dev", "stable-diffusion-3.5-large"] {
            let f = flags(CapabilityRequest::new("maker", repo).checkpoint("base.safetensors"));
            let err = RoutePlan::new(&f, &RouteRequest::default()).unwrap_err();
            assert!(matches!(err, CapError::InvalidConfiguration(_)), "{repo}");
        }

        let f = flags(
            CapabilityRequest::new("maker", "Kwai-Kolors/Kolors")
                .clip_vision("eva.pt")
                .checkpoint("base.safetensors"),
        );
        let plan = RoutePlan::new(&f, &RouteRequest::default()).unwrap();
        assert_eq!(plan.route, Route::Kolors);
        assert!(plan.checkpoints.contains(Checkpoint::StoryMakerMask));
    }

    #[test]
    fn flux_spec_only_for_pulid() {
        let f = flags(CapabilityRequest::new("nf4,fp8", "flux").checkpoint("base.safetensors"));
        let plan = RoutePlan::new(&f, &RouteRequest::default()).unwrap();
        assert_eq!(plan.route, Route::FluxNf4);
        assert_eq!(plan.flux, None);

        let repo_only = flags(CapabilityRequest::new("", "black-forest-labs/FLUX.1-dev"));
        assert_eq!(RoutePlan::new(&repo_only, &RouteRequest::default()).unwrap().flux, None);
    }

    #[test]
    fn pulid_preconditions() {
        let f = flags(
            CapabilityRequest::new("pulid,nf4", "")
                .clip_vision("eva.pt")
                .checkpoint("base.safetensors"),
        );
        assert!(RoutePlan::new(&f, &RouteRequest::default()).is_err());

        let request = RouteRequest {
            vae: Selector::from("ae.safetensors"),
            ..RouteRequest::default()
        };
        let plan = RoutePlan::new(&f, &request).unwrap();
        assert_eq!(plan.flux, Some(FluxSpec::FluxDevNf4));
        assert_eq!(plan.quantization, QuantizationMode::Nf4);
        assert!(plan.checkpoints.contains(Checkpoint::PulidFlux));
        assert_eq!(plan.faces.primary, None);
    }

    #[test]
    fn ms_diffusion_plan_adds_adapter() {
        let f = flags(CapabilityRequest::new("", "").clip_vision("eva.pt"));
        let request = RouteRequest {
            layout: CharacterLayout::Dual,
            has_repo: true,
            ..RouteRequest::default()
        };
        let plan = RoutePlan::new(&f, &request).unwrap();
        assert_eq!(plan.route, Route::MsDiffusion);
        assert!(plan.checkpoints.contains(Checkpoint::MsAdapter));

        let no_model = RouteRequest {
            has_repo: false,
            ..request
        };
        assert!(RoutePlan::new(&f, &no_model).is_err());
    }

    #[test]
    fn face_stack_ladder() {
        let v2 = flags(CapabilityRequest::new("auraface", ""));
        let stack = FaceStack::for_flags(&v2, v2.photomake_mode());
        assert_eq!(stack.primary, Some(FaceModel::PhotoMakerAnalyzer { auraface: true }));
        assert_eq!(stack.providers, vec!["CUDAExecutionProvider", "CPUExecutionProvider"]);

        let kolors_face = flags(CapabilityRequest::new("face,cpu", "Kolors"));
        let stack = FaceStack::for_flags(&kolors_face, None);
        assert_eq!(stack.primary, Some(FaceModel::KolorsFaceInfo));
        assert_eq!(stack.providers, vec!["CPUExecutionProvider"]);

        let dual_maker = flags(CapabilityRequest::new("maker,dual", ""));
        let stack = FaceStack::for_flags(&dual_maker, Some(PhotoMakerVersion::V2));
        assert_eq!(stack.secondary, Some(FaceModel::BuffaloL));
        assert_eq!(stack.segmentation, Some("briaai/RMBG-1.4"));

        let infinite = flags(CapabilityRequest::new("infinite", "flux"));
        let stack = FaceStack::for_flags(&infinite, None);
        assert_eq!(stack.primary, Some(FaceModel::AntelopeV2));
        assert_eq!(stack.secondary.and_then(|m| m.pack_name()), Some("arcface"));

        let plain_flux = flags(CapabilityRequest::new("", "flux"));
        assert_eq!(FaceStack::for_flags(&plain_flux, None), FaceStack::default());
    }
}
