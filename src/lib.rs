pub mod flags;
pub mod model;
pub mod route;
pub mod sampler;
pub mod selector;
pub mod session;
pub mod utils;

use std::path::PathBuf;

use anyhow::Result;
use clap::{builder::PossibleValuesParser, Parser};
use flags::PhotoMakerVersion;
use route::{CharacterLayout, ModelType};
use thiserror::Error;
use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_subscriber::{prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Error, Debug)]
pub enum CapError {
    #[error("{0}")]
    Owned(String),
    /// A flag combination the selected route cannot service.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("hub download of {repo}/{file} failed: {source}")]
    Hub {
        repo: String,
        file: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },
}

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Free-text mode string, e.g. "pulid,nf4,low".
    #[arg(long, default_value = "")]
    mode: String,

    /// Model repository identifier or local diffusers directory.
    #[arg(long, default_value = "")]
    repo: String,

    #[arg(long, value_enum, default_value = "v2")]
    photomake_mode: PhotoMakerVersion,

    /// Entry of the clip_vision menu, or "none".
    #[arg(long, default_value = "none")]
    clip_vision: String,

    /// Saved character weights directory under photomaker/pt, or "none".
    #[arg(long, default_value = "none")]
    character_weights: String,

    /// Entry of the checkpoints menu, or "none".
    #[arg(long, default_value = "none")]
    ckpt: String,

    /// Entry of the loras menu, or "none".
    #[arg(long, default_value = "none")]
    lora: String,

    /// Entry of the vae menu, or "none".
    #[arg(long, default_value = "none")]
    vae: String,

    #[arg(long, value_enum, default_value = "txt2img")]
    model_type: ModelType,

    #[arg(long, value_enum, default_value = "single")]
    layout: CharacterLayout,

    #[arg(long, default_value = "euler", value_parser = PossibleValuesParser::new(crate::sampler::SAMPLER_NAMES.iter().copied()))]
    sampler: String,

    #[arg(long, default_value = "normal", value_parser = PossibleValuesParser::new(crate::sampler::SCHEDULER_NAMES.iter().copied()))]
    scheduler: String,

    /// The host application's models directory.
    #[arg(long, env = "STORYCAPS_MODELS_DIR", default_value = "models", value_name = "DIR")]
    models_dir: PathBuf,

    /// Shared read-only checkpoint cache probed before downloading.
    #[arg(long, env = "STORYCAPS_CACHE_DIR", default_value = "/stable-diffusion-cache", value_name = "DIR")]
    cache_dir: PathBuf,

    /// Download the checkpoints the plan needs.
    #[arg(long)]
    pub fetch: bool,

    /// Enable tracing (generates a trace-timestamp.json file).
    #[arg(long)]
    tracing: bool,
}

impl Args {
    /// Installs the global subscriber. The returned guard flushes the chrome
    /// trace when dropped.
    pub fn check(&self) -> Result<Option<FlushGuard>> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        let registry = tracing_subscriber::registry().with(filter).with(fmt);
        let guard = if self.tracing {
            let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
            registry.with(chrome_layer).try_init()?;
            Some(guard)
        } else {
            registry.try_init()?;
            None
        };

        if self.repo.trim().is_empty() && selector::Selector::from(self.ckpt.as_str()).is_none() {
            tracing::warn!("neither --repo nor --ckpt given, planning without a base model");
        }
        Ok(guard)
    }
}
