use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::{
    flags::{CapabilityFlags, CapabilityRequest, Resolver},
    model::CheckpointStore,
    route::{RoutePlan, RouteRequest},
    sampler::SchedulerChoice,
    selector::{FolderPaths, ModelFolder, Selector},
    Args,
};

/// One resolved invocation: flags, route plan and scheduler choice.
#[derive(Debug, Clone, Serialize)]
pub struct PlanComponent {
    flags: CapabilityFlags,
    plan: RoutePlan,
    scheduler: SchedulerChoice,
    #[serde(skip)]
    store: CheckpointStore,
}

impl PlanComponent {
    pub fn new(args: Args) -> Result<Self> {
        let folders = FolderPaths::new(&args.models_dir);
        let store = CheckpointStore::new(folders.folder_dir(ModelFolder::PhotoMaker))
            .with_cache_dir(&args.cache_dir);

        let request = CapabilityRequest::new(args.mode, args.repo.clone())
            .photomake_mode(args.photomake_mode)
            .clip_vision(args.clip_vision)
            .character_weights(args.character_weights)
            .checkpoint(args.ckpt)
            .lora(args.lora);
        let flags = Resolver::new(folders).resolve(&request);

        let route_request = RouteRequest {
            model_type: args.model_type,
            layout: args.layout,
            has_repo: !args.repo.trim().is_empty(),
            vae: Selector::from(args.vae),
        };
        let plan = RoutePlan::new(&flags, &route_request)?;
        let scheduler = SchedulerChoice::from_names(&args.sampler, &args.scheduler);

        Ok(Self {
            flags,
            plan,
            scheduler,
            store,
        })
    }

    pub fn flags(&self) -> &CapabilityFlags {
        &self.flags
    }

    pub fn plan(&self) -> &RoutePlan {
        &self.plan
    }

    pub fn run(&self) -> Result<()> {
        let report = serde_json::to_string_pretty(self)?;
        println!("{report}");
        Ok(())
    }

    /// Fetches every planned checkpoint concurrently, each on a blocking task.
    pub async fn fetch(&self) -> Result<Vec<PathBuf>> {
        let store = Arc::new(self.store.clone());
        let handles = self
            .plan
            .checkpoints
            .checkpoints()
            .iter()
            .copied()
            .map(|checkpoint| {
                let store = Arc::clone(&store);
                tokio::task::spawn_blocking(move || store.get(checkpoint))
            })
            .collect::<Vec<_>>();

        let mut paths = Vec::with_capacity(handles.len());
        for handle in handles {
            let path = handle.await.context("checkpoint task panicked")??;
            paths.push(path);
        }
        info!(count = paths.len(), "all checkpoints available");
        Ok(paths)
    }
}
