use colored::Colorize;
use fleetwire_config::ProjectConfig;
use fleetwire_core::Outputs;
use fleetwire_infra::OutputResolver;

const REDACTED: &str = "********";

pub async fn handle(config: &ProjectConfig) -> anyhow::Result<()> {
    let resolver = OutputResolver::new(super::terraform(config));
    let outputs = resolver.resolve().await?;
    print!("{}", render(&outputs));
    Ok(())
}

/// 秘匿値を伏せ字にしたスナップショット
pub fn render(outputs: &Outputs) -> String {
    let mut out = String::new();
    let mut line = |text: String| {
        out.push_str(&text);
        out.push('\n');
    };

    line(format!("{}", "インフラ出力値:".bold()));
    line(format!("  リソースグループ: {}", outputs.resource_group().cyan()));

    match outputs.registry() {
        Some(registry) => {
            line(format!("  レジストリ: {}", registry.login_server.cyan()));
            if let Some(ref credentials) = registry.credentials {
                line(format!("    ユーザー: {}", credentials.username));
                line(format!("    パスワード: {}", REDACTED));
            }
        }
        None => line(format!("  レジストリ: {}", "(なし)".dimmed())),
    }

    match outputs.cluster_name() {
        Some(cluster) => line(format!("  クラスタ: {}", cluster.cyan())),
        None => line(format!("  クラスタ: {}", "(なし)".dimmed())),
    }

    if !outputs.hosts().is_empty() {
        line(format!("  {}", "VM:".bold()));
        for host in outputs.hosts() {
            line(format!(
                "    {} private={} public={}",
                host.name.cyan(),
                host.private_ip,
                host.public_ip.as_deref().unwrap_or("-")
            ));
        }
    }

    let values: Vec<(&str, &str)> = outputs.values().collect();
    if !values.is_empty() {
        line(format!("  {}", "値:".bold()));
        for (key, value) in values {
            line(format!("    {} = {}", key, value));
        }
    }

    let secrets: Vec<&str> = outputs
        .connection_strings()
        .map(|(store, _)| store)
        .chain(outputs.secrets().map(|(key, _)| key))
        .collect();
    if !secrets.is_empty() {
        line(format!("  {}", "秘匿値:".bold()));
        for key in secrets {
            line(format!("    {} = {}", key, REDACTED));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_infra::parse_outputs;

    #[test]
    fn test_render_redacts_secrets() {
        let outputs = parse_outputs(
            r#"{
                "resource_group_name": {"value": "rg-otel-demo"},
                "acr_login_server": {"value": "oteldemo.azurecr.io"},
                "acr_admin_username": {"value": "oteldemo"},
                "acr_admin_password": {"value": "acr-secret", "sensitive": true},
                "redis_connection_string": {"value": "rediss://:pw@cache:6380", "sensitive": true},
                "cosmos_key": {"value": "cosmos-secret", "sensitive": true},
                "virtual_machines": {"value": {"gateway": {"public_ip": "20.0.0.1", "private_ip": "10.0.1.4"}}}
            }"#,
        )
        .unwrap();

        let text = render(&outputs);
        assert!(text.contains("rg-otel-demo"));
        assert!(text.contains("oteldemo.azurecr.io"));
        assert!(text.contains("private=10.0.1.4"));
        assert!(text.contains("redis"));
        assert!(text.contains("cosmos_key"));
        assert!(!text.contains("acr-secret"));
        assert!(!text.contains("rediss://"));
        assert!(!text.contains("cosmos-secret"));
    }
}
