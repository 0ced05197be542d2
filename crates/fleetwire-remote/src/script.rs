//! Remote script generation
//!
//! One script per host: container engine bootstrap, registry login, then
//! pull / stop / remove / run for every assigned service, a warm-up pause and a
//! running check. Secrets never appear in the script body; they travel as
//! base64 positional parameters and are unset right after use.

use base64::Engine;
use fleetwire_core::{EnvKey, Registry, Sensitive, ServiceSpec, shell_escape};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Marker prefix of every machine-readable line
pub const MARKER: &str = "@@fleetwire";

/// Exit code used when `docker login` fails
pub const EXIT_LOGIN_FAILED: i32 = 42;

/// Exit code used when the container engine cannot be installed or started
pub const EXIT_BOOTSTRAP_FAILED: i32 = 43;

/// Placeholder for `$1` so later parameters keep their positions
const NO_PASSWORD: &str = "-";

/// Number of log lines captured for a container that is not running
pub const LOG_TAIL_LINES: u32 = 50;

const PRELUDE: &str = r#"#!/usr/bin/env bash
# generated by fleetwire; secrets arrive as base64 parameters
set -u

fw_marker() { echo "@@fleetwire $*"; }
fw_exit() { fw_marker exit "$1"; exit "$1"; }
fw_decode() { printf '%s' "$1" | base64 -d; }
fw_oneline() { printf '%s' "$1" | tr '\n' ' '; }
fw_root() { if [ "$(id -u)" -eq 0 ]; then "$@"; else sudo "$@"; fi; }
fw_docker() {
  if [ "$(id -u)" -eq 0 ]; then
    docker "$@"
  elif [ -n "${FW_KEEP:-}" ]; then
    sudo --preserve-env="$FW_KEEP" docker "$@"
  else
    sudo docker "$@"
  fi
}
"#;

const BOOTSTRAP: &str = r#"
# container engine: install and enable only when absent or inactive
if ! command -v docker >/dev/null 2>&1; then
  fw_marker bootstrap install
  curl -fsSL https://get.docker.com | fw_root sh >/dev/null 2>&1 || { fw_marker bootstrap failed; fw_exit 43; }
fi
if ! systemctl is-active --quiet docker; then
  fw_root systemctl enable --now docker >/dev/null 2>&1 || { fw_marker bootstrap failed; fw_exit 43; }
fi
fw_marker bootstrap ok
"#;

const VERIFY: &str = r#"
FW_DOWN=""
for FW_NAME in $FW_STARTED; do
  if [ "$(fw_docker inspect -f '{{.State.Running}}' "$FW_NAME" 2>/dev/null)" != "true" ]; then
    FW_DOWN="$FW_DOWN $FW_NAME"
    fw_marker logs-begin "$FW_NAME"
    fw_docker logs --tail "$FW_TAIL" "$FW_NAME" 2>&1
    fw_marker logs-end "$FW_NAME"
  fi
done
# status markers last; some transports keep only the tail of stdout
for FW_NAME in $FW_STARTED; do
  case " $FW_DOWN " in
    *" $FW_NAME "*) fw_marker status "$FW_NAME" failed container not running ;;
    *) fw_marker status "$FW_NAME" running ;;
  esac
done
"#;

/// A generated script and its positional parameters
#[derive(Debug, Clone)]
pub struct RemoteScript {
    pub body: String,
    /// base64-encoded values, `$1` first
    pub params: Vec<Sensitive>,
}

/// Builds the per-host script
pub struct ScriptBuilder<'a> {
    registry: Option<&'a Registry>,
    warmup: Duration,
    log_tail: u32,
    services: Vec<&'a ServiceSpec>,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(warmup: Duration) -> Self {
        Self {
            registry: None,
            warmup,
            log_tail: LOG_TAIL_LINES,
            services: Vec::new(),
        }
    }

    /// Log lines captured per container that is not running
    pub fn log_tail(mut self, lines: u32) -> Self {
        self.log_tail = lines;
        self
    }

    pub fn registry(mut self, registry: Option<&'a Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn service(mut self, spec: &'a ServiceSpec) -> Self {
        self.services.push(spec);
        self
    }

    pub fn services(mut self, specs: impl IntoIterator<Item = &'a ServiceSpec>) -> Self {
        self.services.extend(specs);
        self
    }

    pub fn build(self) -> RemoteScript {
        let mut params = Vec::new();
        // $1: registry password, "-" when the registry has no admin user
        let credentials = self.registry.and_then(|r| r.credentials.as_ref());
        params.push(Sensitive::new(
            credentials
                .map(|c| encode(c.password.expose()))
                .unwrap_or_else(|| NO_PASSWORD.to_string()),
        ));

        // $2..: one parameter per distinct secret key
        let mut secret_slots: Vec<EnvKey> = Vec::new();
        for spec in &self.services {
            for (key, value) in spec.env().secrets() {
                if !secret_slots.contains(&key) {
                    secret_slots.push(key);
                    params.push(Sensitive::new(encode(value.expose())));
                }
            }
        }
        let slot = |key: EnvKey| {
            secret_slots
                .iter()
                .position(|k| *k == key)
                .map(|i| i + 2)
                .unwrap_or(0)
        };

        let mut body = String::from(PRELUDE);

        let _ = writeln!(body);
        for i in 1..=params.len() {
            let _ = writeln!(body, "FW_P{i}=\"${{{i}:-}}\"");
        }
        let _ = writeln!(body, "set --");
        let _ = writeln!(body, "FW_STARTED=\"\"");
        let _ = writeln!(body, "FW_KEEP=\"\"");
        let _ = writeln!(body, "FW_TAIL={}", self.log_tail);

        body.push_str(BOOTSTRAP);

        if let (Some(registry), Some(credentials)) = (self.registry, credentials) {
            let _ = write!(
                body,
                "\n# registry login\n\
                 if [ \"$FW_P1\" != '-' ]; then\n\
                 \x20 if fw_decode \"$FW_P1\" | fw_docker login {server} --username {user} --password-stdin >/dev/null 2>&1; then\n\
                 \x20   unset FW_P1\n\
                 \x20   fw_marker login ok\n\
                 \x20 else\n\
                 \x20   unset FW_P1\n\
                 \x20   fw_marker login failed\n\
                 \x20   fw_exit {code}\n\
                 \x20 fi\n\
                 fi\n",
                server = shell_escape(&registry.login_server),
                user = shell_escape(&credentials.username),
                code = EXIT_LOGIN_FAILED,
            );
        }
        let _ = writeln!(body, "unset FW_P1");

        // Index of the last service that reads each secret slot
        let mut last_use: BTreeMap<usize, usize> = BTreeMap::new();
        for (i, spec) in self.services.iter().enumerate() {
            for (key, _) in spec.env().secrets() {
                last_use.insert(slot(key), i);
            }
        }

        for (i, spec) in self.services.iter().enumerate() {
            write_service(&mut body, spec, &slot);
            let done: Vec<String> = last_use
                .iter()
                .filter(|(_, last)| **last == i)
                .map(|(slot, _)| format!("FW_P{slot}"))
                .collect();
            if !done.is_empty() {
                let _ = writeln!(body, "unset {}", done.join(" "));
            }
        }

        let warmup = self.warmup.as_secs();
        let _ = write!(
            body,
            "\n# warm-up, then check every started container\n\
             if [ -n \"$FW_STARTED\" ]; then sleep {warmup}; fi\n"
        );
        body.push_str(VERIFY);
        let _ = writeln!(body, "fw_exit 0");

        RemoteScript { body, params }
    }
}

fn write_service(body: &mut String, spec: &ServiceSpec, slot: &impl Fn(EnvKey) -> usize) {
    let name = spec.name();
    let quoted_name = shell_escape(name);
    let image = shell_escape(&spec.image);

    let mut run_args = vec![
        "-d".to_string(),
        "--name".to_string(),
        quoted_name.clone(),
        "--restart".to_string(),
        "unless-stopped".to_string(),
    ];
    if spec.host_network {
        run_args.push("--network host".to_string());
    } else {
        for port in &spec.ports {
            run_args.push(format!("-p {}", shell_escape(&port.to_publish_arg())));
        }
    }
    for (key, value) in spec.env().plain() {
        run_args.push(format!(
            "-e {}",
            shell_escape(&format!("{}={}", key.env_name(), value))
        ));
    }
    let secret_keys: Vec<EnvKey> = spec.env().secrets().map(|(k, _)| k).collect();
    for key in &secret_keys {
        run_args.push(format!("-e {}", key.env_name()));
    }
    run_args.push(image.clone());

    let _ = write!(
        body,
        "\n# {name}\n\
         if fw_docker pull {image} >/dev/null 2>&1; then\n\
         \x20 fw_docker stop {quoted_name} >/dev/null 2>&1 || true\n\
         \x20 fw_docker rm {quoted_name} >/dev/null 2>&1 || true\n"
    );

    for key in &secret_keys {
        let env = key.env_name();
        let _ = writeln!(
            body,
            "  {env}=\"$(fw_decode \"$FW_P{}\")\"; export {env}",
            slot(*key)
        );
    }
    if !secret_keys.is_empty() {
        let keep: Vec<&str> = secret_keys.iter().map(|k| k.env_name()).collect();
        let _ = writeln!(body, "  FW_KEEP={}", shell_escape(&keep.join(",")));
    }

    let _ = write!(
        body,
        "  if FW_ERR=\"$(fw_docker run {args} 2>&1 >/dev/null)\"; then\n\
         \x20   FW_STARTED=\"$FW_STARTED {name}\"\n\
         \x20   fw_marker started {name}\n\
         \x20 else\n\
         \x20   fw_marker status {name} failed \"docker run: $(fw_oneline \"$FW_ERR\")\"\n\
         \x20 fi\n",
        args = run_args.join(" "),
    );

    if !secret_keys.is_empty() {
        let names: Vec<&str> = secret_keys.iter().map(|k| k.env_name()).collect();
        let _ = writeln!(body, "  unset {}", names.join(" "));
        let _ = writeln!(body, "  FW_KEEP=\"\"");
    }

    let _ = write!(
        body,
        "else\n\
         \x20 fw_marker status {name} failed image pull failed\n\
         fi\n"
    );
}

fn encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}
