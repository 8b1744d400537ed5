#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use common::config::{PrylockConfig, load_yaml_file};
use common::telemetry::init_telemetry;

const USAGE: &str = "Usage: prylock [--config <FILE>] [--skip-type <INDEX>]... <SOURCE> <DEST>\n";

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    init_telemetry().map_err(|e| format!("初始化日志失败: {e}"))?;

    let args = parse_args(std::env::args().skip(1))?;
    let mut cfg = match args.config_path.as_deref() {
        Some(path) => load_yaml_file(path)
            .map_err(|e| format!("加载配置失败（{}）: {e}", path.display()))?,
        None => PrylockConfig::default(),
    };
    for index in args.skip_types {
        if !cfg.resolve.skip_object_types.contains(&index) {
            cfg.resolve.skip_object_types.push(index);
        }
    }
    cfg.validate().map_err(|e| format!("配置校验失败: {e}"))?;

    copy_with_report(&cfg, args.source.as_path(), args.dest.as_path())
}

#[cfg(windows)]
fn copy_with_report(cfg: &PrylockConfig, source: &Path, dest: &Path) -> Result<(), String> {
    use common::{NtKernel, copy_locked_file};
    use sysinfo::{Pid, System};

    let source = std::path::absolute(source)
        .map_err(|e| format!("无法解析源路径（{}）: {e}", source.display()))?;

    let kernel = NtKernel::new(cfg);
    let report = copy_locked_file(&kernel, cfg, source.as_path(), dest).map_err(|e| {
        match e.code() {
            Some(code) => format!("{code}: {e}"),
            None => e.to_string(),
        }
    })?;

    let mut sys = System::new();
    let pid = Pid::from_u32(report.owner_pid);
    sys.refresh_process(pid);
    let owner = sys
        .process(pid)
        .map_or_else(|| "?".to_string(), |p| p.name().to_string());

    tracing::info!(owner_pid = report.owner_pid, owner = owner.as_str(), "copy finished");
    println!(
        "已复制 {} 字节: {} -> {} (持有进程 {} {})",
        report.bytes_written,
        source.display(),
        dest.display(),
        report.owner_pid,
        owner
    );
    Ok(())
}

#[cfg(not(windows))]
fn copy_with_report(_cfg: &PrylockConfig, _source: &Path, _dest: &Path) -> Result<(), String> {
    Err("prylock 只能在 Windows 上定位被锁定的文件".to_string())
}

#[derive(Debug)]
struct CliArgs {
    config_path: Option<PathBuf>,
    skip_types: Vec<u16>,
    source: PathBuf,
    dest: PathBuf,
}

fn parse_args<I>(mut it: I) -> Result<CliArgs, String>
where
    I: Iterator<Item = String>,
{
    let mut config_path: Option<PathBuf> = None;
    let mut skip_types: Vec<u16> = Vec::new();
    let mut positional: Vec<PathBuf> = Vec::new();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let val = it.next().ok_or("--config 缺少参数".to_string())?;
                config_path = Some(PathBuf::from(val));
            }
            "--skip-type" => {
                let val = it.next().ok_or("--skip-type 缺少参数".to_string())?;
                let index = val
                    .parse::<u16>()
                    .map_err(|_| format!("--skip-type 参数无效: {val}"))?;
                skip_types.push(index);
            }
            "--help" | "-h" => {
                return Err(USAGE.to_string());
            }
            other if other.starts_with('-') => return Err(format!("未知参数: {other}")),
            other => positional.push(PathBuf::from(other)),
        }
    }

    let mut positional = positional.into_iter();
    let (Some(source), Some(dest), None) =
        (positional.next(), positional.next(), positional.next())
    else {
        return Err(USAGE.to_string());
    };

    Ok(CliArgs {
        config_path,
        skip_types,
        source,
        dest,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_args;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|s| (*s).to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn positional_source_and_dest_are_required() {
        let parsed = parse_args(args(&[r"C:\a\b.db", r"C:\out\b.db"])).expect("two positionals");
        assert_eq!(parsed.source.to_string_lossy(), r"C:\a\b.db");
        assert_eq!(parsed.dest.to_string_lossy(), r"C:\out\b.db");
        assert!(parse_args(args(&[r"C:\a\b.db"])).is_err());
        assert!(parse_args(args(&[r"a", r"b", r"c"])).is_err());
    }

    #[test]
    fn skip_type_accumulates() {
        let parsed = parse_args(args(&["--skip-type", "17", "--skip-type", "19", "a", "b"]))
            .expect("parses");
        assert_eq!(parsed.skip_types, vec![17, 19]);
        assert!(parse_args(args(&["--skip-type", "x", "a", "b"])).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(parse_args(args(&["--frobnicate", "a", "b"])).is_err());
    }
}
