mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetwire")]
#[command(about = "インフラ構築からエンドポイント配線まで、一度のデプロイで。", long_about = None)]
struct Cli {
    /// ログを詳細に出力（-v: info, -vv: debug）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 全ステージを実行してデモ環境をデプロイ
    Deploy(DeployArgs),
    /// インフラの出力値を表示（秘匿値は伏せ字）
    Outputs,
    /// バージョン情報を表示
    Version,
}

#[derive(clap::Args, Debug, Default)]
pub struct DeployArgs {
    /// terraform apply をスキップ（既存のインフラを使う）
    #[arg(long)]
    pub skip_infra: bool,
    /// イメージのビルド・プッシュをスキップ
    #[arg(long)]
    pub skip_images: bool,
    /// クラスタへのデプロイをスキップ
    #[arg(long)]
    pub skip_cluster: bool,
    /// VMへのデプロイをスキップ
    #[arg(long)]
    pub skip_hosts: bool,
    /// フロントエンドのアプリ設定更新をスキップ
    #[arg(long)]
    pub skip_frontend: bool,
    /// notification-service を全ステージから除外
    #[arg(long)]
    pub skip_notification_service: bool,
    /// イメージタグ（設定ファイルの image_tag より優先）
    #[arg(long, env = "FLEETWIRE_TAG")]
    pub tag: Option<String>,
    /// ロールアウト待ちのタイムアウト（秒）
    #[arg(long, value_name = "SECS")]
    pub rollout_timeout: Option<u64>,
    /// VMでコンテナ起動後に待つ時間（秒）
    #[arg(long, value_name = "SECS")]
    pub warmup_timeout: Option<u64>,
    /// 同時にデプロイするVMの数
    #[arg(long, value_name = "N")]
    pub parallelism: Option<usize>,
    /// キャッシュを使用せずにビルド
    #[arg(long)]
    pub no_cache: bool,
    /// ターゲットプラットフォーム（例: linux/amd64）
    #[arg(long)]
    pub platform: Option<String>,
    /// 実行計画を表示するだけで何も変更しない
    #[arg(long)]
    pub dry_run: bool,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("fleetwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (config, config_path) = fleetwire_config::load()?;
    match config_path {
        Some(ref path) => tracing::info!("Using config {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Deploy(args) => {
            let code = commands::deploy::handle(&config, args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Outputs => {
            commands::outputs::handle(&config).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
