pub mod deploy;
pub mod outputs;

use fleetwire_config::ProjectConfig;
use fleetwire_infra::Terraform;

/// 設定に従って terraform ラッパーを作成
pub fn terraform(config: &ProjectConfig) -> Terraform {
    let terraform = Terraform::new(&config.infra_dir);
    match config.var_file {
        Some(ref var_file) => terraform.with_var_file(var_file),
        None => terraform,
    }
}
