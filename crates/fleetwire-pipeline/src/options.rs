//! Run options

use crate::stage::Stage;
use fleetwire_config::ProjectConfig;
use fleetwire_core::{CatalogueOptions, ServiceId};
use std::path::PathBuf;
use std::time::Duration;

/// Options of one pipeline run, from the project config plus CLI flags
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub skip_infra: bool,
    pub skip_images: bool,
    pub skip_cluster: bool,
    pub skip_hosts: bool,
    pub skip_frontend: bool,
    pub skip_notification_service: bool,
    pub tag: String,
    pub namespace: String,
    pub environment: String,
    pub services_dir: PathBuf,
    pub manifests_dir: PathBuf,
    pub rollout_timeout: Duration,
    pub warmup: Duration,
    pub parallelism: usize,
    /// Print the plan without executing anything
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            skip_infra: false,
            skip_images: false,
            skip_cluster: false,
            skip_hosts: false,
            skip_frontend: false,
            skip_notification_service: false,
            tag: config.image_tag.clone(),
            namespace: config.namespace.clone(),
            environment: config.environment.clone(),
            services_dir: config.services_dir.clone(),
            manifests_dir: config.manifests_dir.clone(),
            rollout_timeout: Duration::from_secs(config.rollout_timeout_secs),
            warmup: Duration::from_secs(config.warmup_timeout_secs),
            parallelism: config.host_parallelism,
            dry_run: false,
        }
    }

    pub fn skips(&self, stage: Stage) -> bool {
        match stage {
            Stage::Infra => self.skip_infra,
            Stage::Outputs | Stage::Rewire => false,
            Stage::Images => self.skip_images,
            Stage::Cluster => self.skip_cluster,
            Stage::Hosts => self.skip_hosts,
        }
    }

    /// Services removed from every stage
    pub fn excluded(&self) -> Vec<ServiceId> {
        if self.skip_notification_service {
            vec![ServiceId::NotificationService]
        } else {
            Vec::new()
        }
    }

    pub fn catalogue(&self) -> CatalogueOptions {
        CatalogueOptions {
            tag: self.tag.clone(),
            namespace: self.namespace.clone(),
            services_dir: self.services_dir.clone(),
            manifests_dir: self.manifests_dir.clone(),
            environment: self.environment.clone(),
            exclude: self.excluded(),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&ProjectConfig::default())
    }
}
