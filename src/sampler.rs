use serde::Serialize;
use tracing::debug;

pub const SAMPLER_NAMES: &[&str] = &[
    "euler",
    "euler_cfg_pp",
    "euler_ancestral",
    "euler_ancestral_cfg_pp",
    "heun",
    "heunpp2",
    "dpm_2",
    "dpm_2_ancestral",
    "lms",
    "dpm_fast",
    "dpm_adaptive",
    "dpmpp_2s_ancestral",
    "dpmpp_2s_ancestral_cfg_pp",
    "dpmpp_sde",
    "dpmpp_sde_gpu",
    "dpmpp_2m",
    "dpmpp_2m_sde",
    "dpmpp_2m_sde_gpu",
    "dpmpp_3m_sde",
    "dpmpp_3m_sde_gpu",
    "ddpm",
    "lcm",
    "ipndm",
    "ipndm_v",
    "deis",
    "ddim",
    "uni_pc",
    "uni_pc_bh2",
];

pub const SCHEDULER_NAMES: &[&str] = &[
    "normal",
    "karras",
    "exponential",
    "sgm_uniform",
    "simple",
    "ddim_uniform",
    "beta",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SchedulerKind {
    EulerDiscrete,
    EulerAncestralDiscrete,
    Ddim,
    Ddpm,
    DpmSolverMultistep,
    DpmSolverSinglestep,
    Kdpm2Discrete,
    Kdpm2AncestralDiscrete,
    HeunDiscrete,
    Lcm,
    LmsDiscrete,
    UniPcMultistep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SchedulerChoice {
    pub kind: SchedulerKind,
    pub karras_sigmas: bool,
    /// `sde-dpmsolver++` instead of the default solver.
    pub sde: bool,
}

impl SchedulerChoice {
    fn plain(kind: SchedulerKind) -> Self {
        Self {
            kind,
            karras_sigmas: false,
            sde: false,
        }
    }

    /// Maps a sampler/schedule pair to the diffusers scheduler to build.
    ///
    /// Unknown samplers fall back to Euler. The karras schedule is currently
    /// never applied: each sampler's plain arm matches before its karras arm.
    pub fn from_names(sampler: &str, schedule: &str) -> Self {
        use SchedulerKind::*;
        let choice = match sampler {
            "euler" | "euler_cfg_pp" => Self::plain(EulerDiscrete),
            "euler_ancestral" | "euler_ancestral_cfg_pp" => Self::plain(EulerAncestralDiscrete),
            "ddim" => Self::plain(Ddim),
            "ddpm" => Self::plain(Ddpm),
            "dpmpp_2m" => Self::plain(DpmSolverMultistep),
            "dpmpp_2m_sde" => Self {
                sde: true,
                ..Self::plain(DpmSolverMultistep)
            },
            "dpmpp_sde" | "dpmpp_sde_gpu" => Self::plain(DpmSolverSinglestep),
            "dpm_2" => Self::plain(Kdpm2Discrete),
            "dpm_2_ancestral" => Self::plain(Kdpm2AncestralDiscrete),
            "heun" => Self::plain(HeunDiscrete),
            "lcm" => Self::plain(Lcm),
            "lms" => Self::plain(LmsDiscrete),
            "uni_pc" => Self::plain(UniPcMultistep),
            _ => Self::plain(EulerDiscrete),
        };
        if schedule == "karras" {
            debug!(sampler, "karras schedule requested, keeping default sigmas");
        }
        choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_samplers() {
        assert_eq!(
            SchedulerChoice::from_names("euler_ancestral_cfg_pp", "normal").kind,
            SchedulerKind::EulerAncestralDiscrete
        );
        let sde = SchedulerChoice::from_names("dpmpp_2m_sde", "normal");
        assert_eq!(sde.kind, SchedulerKind::DpmSolverMultistep);
        assert!(sde.sde);
        assert_eq!(
            SchedulerChoice::from_names("uni_pc", "normal").kind,
            SchedulerKind::UniPcMultistep
        );
    }

    #[test]
    fn unknown_sampler_is_euler() {
        for name in ["dpm_fast", "deis", "", "uni_pc_bh2"] {
            assert_eq!(
                SchedulerChoice::from_names(name, "normal").kind,
                SchedulerKind::EulerDiscrete
            );
        }
    }

    #[test]
    fn karras_is_not_applied() {
        for name in ["dpmpp_2m", "dpmpp_sde", "dpm_2", "dpm_2_ancestral", "lms"] {
            assert!(!SchedulerChoice::from_names(name, "karras").karras_sigmas);
        }
    }

    #[test]
    fn name_tables_are_consistent() {
        assert!(SAMPLER_NAMES.contains(&"euler"));
        assert!(SCHEDULER_NAMES.contains(&"karras"));
        assert_eq!(SAMPLER_NAMES.len(), 28);
    }
}
