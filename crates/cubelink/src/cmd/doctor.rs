use std::path::{Path, PathBuf};

use cubelink_sim::SimConfig;
use serde::Serialize;

use crate::cmd::{Context, DoctorArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, ctx: &Context) -> CliResult<i32> {
    let (config_check, config) = config_check(ctx.config_path.as_deref());
    let checks = vec![
        platform_transport_check(),
        config_check,
        channel_dir_check(&config.channel_dir),
        qemu_binary_check(&config.qemu.bin_location),
        qemu_config_check(config.qemu.config_location.as_deref()),
        disk_image_check(config.qemu.disk_image.as_deref()),
        staging_sources_check(&config),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_doctor(&output, ctx.format);

    Ok(if has_fail { HEALTH_CHECK_FAILED } else { SUCCESS })
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("cubelink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_transport_check() -> CheckResult {
    if cfg!(unix) {
        CheckResult::new(
            "platform",
            CheckStatus::Pass,
            "Unix domain sockets and poll(2) available",
        )
    } else {
        CheckResult::new(
            "platform",
            CheckStatus::Fail,
            "cube channels require a Unix host",
        )
    }
}

/// A broken config still lets the remaining checks run against defaults.
fn config_check(path: Option<&Path>) -> (CheckResult, SimConfig) {
    match SimConfig::resolve(path) {
        Ok(config) => {
            let source = path
                .map(|p| p.display().to_string())
                .or_else(|| std::env::var(cubelink_sim::CONFIG_ENV).ok())
                .unwrap_or_else(|| "built-in defaults".to_string());
            (
                CheckResult::new("config", CheckStatus::Pass, source),
                config,
            )
        }
        Err(err) => (
            CheckResult::new("config", CheckStatus::Fail, err.to_string()),
            SimConfig::default(),
        ),
    }
}

fn channel_dir_check(dir: &Path) -> CheckResult {
    #[cfg(unix)]
    {
        let test_socket = dir.join(format!(".cubelink-doctor-{}", std::process::id()));
        let result = std::os::unix::net::UnixListener::bind(&test_socket);
        let _ = std::fs::remove_file(&test_socket);
        match result {
            Ok(_) => CheckResult::new(
                "channel_dir",
                CheckStatus::Pass,
                format!("can bind sockets in {}", dir.display()),
            ),
            Err(err) => CheckResult::new(
                "channel_dir",
                CheckStatus::Fail,
                format!("cannot bind sockets in {}: {err}", dir.display()),
            ),
        }
    }

    #[cfg(not(unix))]
    {
        CheckResult::new("channel_dir", CheckStatus::Skip, dir.display().to_string())
    }
}

fn qemu_binary_check(bin: &Path) -> CheckResult {
    match find_executable(bin) {
        Some(found) => CheckResult::new(
            "qemu_binary",
            CheckStatus::Pass,
            found.display().to_string(),
        ),
        None => CheckResult::new(
            "qemu_binary",
            CheckStatus::Fail,
            format!("{} not found", bin.display()),
        ),
    }
}

fn qemu_config_check(config: Option<&Path>) -> CheckResult {
    match config {
        None => CheckResult::new(
            "qemu_config",
            CheckStatus::Fail,
            "qemu.config_location is not set",
        ),
        Some(path) if path.is_file() => {
            CheckResult::new("qemu_config", CheckStatus::Pass, path.display().to_string())
        }
        Some(path) => CheckResult::new(
            "qemu_config",
            CheckStatus::Fail,
            format!("{} does not exist", path.display()),
        ),
    }
}

fn disk_image_check(image: Option<&Path>) -> CheckResult {
    let Some(image) = image else {
        return CheckResult::new("disk_image", CheckStatus::Skip, "no disk image configured");
    };
    if image.is_file() {
        return CheckResult::new("disk_image", CheckStatus::Pass, image.display().to_string());
    }

    let mut gz = image.as_os_str().to_owned();
    gz.push(".gz");
    let gz = PathBuf::from(gz);
    if gz.is_file() {
        CheckResult::new(
            "disk_image",
            CheckStatus::Info,
            format!("{} will be extracted on first spawn", gz.display()),
        )
    } else {
        CheckResult::new(
            "disk_image",
            CheckStatus::Fail,
            format!("neither {} nor {} exists", image.display(), gz.display()),
        )
    }
}

fn staging_sources_check(config: &SimConfig) -> CheckResult {
    let binaries = &config.binaries;
    if binaries.host_bin_dir.is_none() {
        return CheckResult::new("staging", CheckStatus::Skip, "binaries.host_bin_dir is not set");
    }

    let sources = binaries
        .start_list
        .iter()
        .chain(binaries.starter_script.iter())
        .chain(binaries.config_package.iter());
    let missing: Vec<String> = sources
        .filter(|path| !path.exists())
        .map(|path| path.display().to_string())
        .collect();

    if missing.is_empty() {
        CheckResult::new("staging", CheckStatus::Pass, "all staging sources present")
    } else {
        CheckResult::new(
            "staging",
            CheckStatus::Fail,
            format!("missing: {}", missing.join(", ")),
        )
    }
}

fn compiled_features_check() -> CheckResult {
    CheckResult::new(
        "compiled_features",
        CheckStatus::Info,
        format!("sim={}, cli=true", cfg!(feature = "sim")),
    )
}

/// Resolve `bin` the way `Command::new` would: paths as-is, bare names via `PATH`.
fn find_executable(bin: &Path) -> Option<PathBuf> {
    if bin.components().count() > 1 {
        return is_executable(bin).then(|| bin.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(bin))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
