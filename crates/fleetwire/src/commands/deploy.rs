use crate::DeployArgs;
use colored::Colorize;
use fleetwire_build::{BuildOptions, DockerBackend, ImageBackend, resolve_tag};
use fleetwire_cluster::Kubectl;
use fleetwire_config::{ProjectConfig, RemoteTransport};
use fleetwire_core::{AbortSignal, Outputs};
use fleetwire_pipeline::{
    AzWebApp, Collaborators, ExecutorFactory, PipelineDriver, PipelineOptions, Plan,
    install_interrupt_handler,
};
use fleetwire_remote::{AzRunCommandExecutor, RemoteExecutor, SshExecutor};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

/// 設定ファイルの値にCLIフラグを重ねる
pub fn options(config: &ProjectConfig, args: &DeployArgs) -> anyhow::Result<PipelineOptions> {
    let mut options = PipelineOptions::from_config(config);
    options.skip_infra = args.skip_infra;
    options.skip_images = args.skip_images;
    options.skip_cluster = args.skip_cluster;
    options.skip_hosts = args.skip_hosts;
    options.skip_frontend = args.skip_frontend;
    options.skip_notification_service = args.skip_notification_service;
    options.dry_run = args.dry_run;
    options.tag = resolve_tag(args.tag.as_deref(), Some(&config.image_tag));

    if let Some(secs) = args.rollout_timeout {
        options.rollout_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.warmup_timeout {
        options.warmup = Duration::from_secs(secs);
    }
    if let Some(parallelism) = args.parallelism {
        if parallelism == 0 {
            anyhow::bail!("--parallelism は1以上を指定してください");
        }
        options.parallelism = parallelism;
    }
    Ok(options)
}

pub async fn handle(config: &ProjectConfig, args: DeployArgs) -> anyhow::Result<i32> {
    let options = options(config, &args)?;

    println!("{}", "デプロイを開始します...".blue().bold());
    println!("名前空間: {}", options.namespace.cyan());
    println!("イメージタグ: {}", options.tag.cyan());

    if options.dry_run {
        print_plan(&Plan::new(&options));
        return Ok(0);
    }

    let images: Option<Arc<dyn ImageBackend>> = if options.skip_images {
        None
    } else {
        // パイプやCIログではスピナーを出さない
        let backend = DockerBackend::connect(BuildOptions {
            no_cache: args.no_cache,
            platform: args.platform.clone(),
        })?
        .with_progress(std::io::stdout().is_terminal());
        Some(Arc::new(backend))
    };

    let terraform = Arc::new(super::terraform(config));
    let tools = Collaborators {
        provisioner: terraform.clone(),
        state: terraform,
        images,
        cluster: Arc::new(Kubectl::new()),
        remote: executor_factory(config),
        webapp: Arc::new(AzWebApp::new()),
    };

    let abort = AbortSignal::new();
    let _interrupts = install_interrupt_handler(abort.clone());

    let driver = PipelineDriver::new(options, tools).with_abort(abort);
    let report = driver.run().await;
    report.print();

    Ok(report.exit_code())
}

/// 設定された経路でVMにスクリプトを送る
fn executor_factory(config: &ProjectConfig) -> ExecutorFactory {
    match config.remote.transport {
        RemoteTransport::Ssh => {
            let executor: Arc<dyn RemoteExecutor> = Arc::new(
                SshExecutor::new(&config.remote.ssh_user).with_key(config.remote.ssh_key.clone()),
            );
            Box::new(move |_outputs: &Outputs| executor.clone())
        }
        RemoteTransport::AzRunCommand => Box::new(|outputs: &Outputs| -> Arc<dyn RemoteExecutor> {
            Arc::new(AzRunCommandExecutor::from_outputs(outputs))
        }),
    }
}

fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "実行計画 (--dry-run):".bold());
    for (stage, runs) in &plan.stages {
        if *runs {
            println!("  ✓ {}", stage.to_string().green());
        } else {
            println!("  - {} (スキップ)", stage.to_string().dimmed());
        }
    }

    println!();
    println!("{}", format!("デプロイ対象サービス ({} 個):", plan.services.len()).bold());
    for (service, target) in &plan.services {
        println!("  • {} → {}", service.name().cyan(), target);
    }

    println!();
    println!("{}", "ドライランのため何も変更していません".yellow());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = ProjectConfig {
            image_tag: "v1".to_string(),
            ..Default::default()
        };
        let args = DeployArgs {
            tag: Some("v2".to_string()),
            rollout_timeout: Some(60),
            parallelism: Some(2),
            skip_cluster: true,
            ..Default::default()
        };

        let options = options(&config, &args).unwrap();
        assert_eq!(options.tag, "v2");
        assert_eq!(options.rollout_timeout, Duration::from_secs(60));
        assert_eq!(options.parallelism, 2);
        assert_eq!(options.warmup, Duration::from_secs(20));
        assert!(options.skip_cluster);
    }

    #[test]
    fn test_configured_tag_is_default() {
        let config = ProjectConfig {
            image_tag: "v1".to_string(),
            ..Default::default()
        };
        let options = options(&config, &DeployArgs::default()).unwrap();
        assert_eq!(options.tag, "v1");
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let args = DeployArgs {
            parallelism: Some(0),
            ..Default::default()
        };
        assert!(options(&ProjectConfig::default(), &args).is_err());
    }
}
