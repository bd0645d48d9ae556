//! External tool strategies.
//!
//! Each CPU strategy writes its result into a fresh candidate file next to the
//! source (or into the configured temp dir). Tools that only write to stdout
//! (jpegoptim) get their stdout redirected into the candidate.

use super::{is_disk_full, remove_candidate, Strategy, WorkerContext, WorkerInput, WorkerReport};
use crate::args;
use crate::tool_resolver::ToolPathResolver;
use crate::utils::to_string_vec;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// How a tool delivers its output
enum OutputMode {
    /// The tool writes the candidate path itself
    File,
    /// The tool prints the optimized image on stdout
    Stdout,
}

fn output_mode(strategy: Strategy) -> OutputMode {
    match strategy {
        Strategy::Jpegoptim => OutputMode::Stdout,
        _ => OutputMode::File,
    }
}

/// Command line for a strategy
fn build_args(strategy: Strategy, input: &WorkerInput, source: &str, output: &str) -> Vec<String> {
    let strip = !input.keep_metadata;

    match strategy {
        Strategy::Jpegtran => args![
            "-copy",
            if strip { "none" } else { "all" },
            "-optimize",
            "-progressive",
            "-outfile",
            output,
            source,
        ],
        Strategy::Jpegoptim => args![
            "--stdout",
            "--all-progressive",
            if strip { "--strip-all" } else { "--strip-none" },
            source,
        ],
        Strategy::Oxipng => {
            let mut args = args!["-o", input.png_level, "--force"];
            if strip {
                args.extend(args!["--strip", "safe"]);
            }
            args.extend(args!["--out", output, source]);
            args
        }
        Strategy::Optipng => {
            let mut args = args![format!("-o{}", (input.png_level + 1).min(7)), "-force", "-clobber"];
            if strip {
                args.extend(args!["-strip", "all"]);
            }
            args.extend(args!["-out", output, source]);
            args
        }
        Strategy::Pngcrush => {
            let mut args = to_string_vec(["-q", "-reduce"]);
            if strip {
                args.extend(to_string_vec(["-rem", "alla"]));
            }
            args.extend(args![source, output]);
            args
        }
        Strategy::Gifsicle => {
            let mut args = args!["-O3"];
            if strip {
                args.push("--no-comments".to_string());
            }
            args.extend(to_string_vec([source, "-o", output]));
            args
        }
        Strategy::Cwebp => args![
            "-lossless",
            "-z",
            9,
            "-mt",
            "-metadata",
            if strip { "none" } else { "all" },
            source,
            "-o",
            output,
        ],
        Strategy::StripTrailing => Vec::new(),
    }
}

pub(super) async fn run(strategy: Strategy, input: &WorkerInput, ctx: &mut WorkerContext) -> WorkerReport {
    let tool_name = match strategy.tool() {
        Some(tool) => tool,
        None => return WorkerReport::failed(format!("{} is not an external tool", strategy)),
    };

    let tool_path = match ToolPathResolver::instance().resolve_tool(tool_name) {
        Some(path) => path,
        None => return WorkerReport::failed(format!("{} is not installed", tool_name)),
    };

    let output = match input.create_candidate(strategy) {
        Ok(path) => path,
        Err(e) if is_disk_full(&e) => return WorkerReport::fatal(format!("Disk full: {}", e)),
        Err(e) => return WorkerReport::failed(format!("Cannot create temp output: {}", e)),
    };

    let (source, output_str) = match (input.source.to_str(), output.to_str()) {
        (Some(source), Some(out)) => (source.to_string(), out.to_string()),
        _ => {
            remove_candidate(&output).await;
            return WorkerReport::failed(format!("Non UTF-8 path: {}", input.source.display()));
        }
    };

    let args = build_args(strategy, input, &source, &output_str);
    debug!("Running {} {:?}", tool_path.display(), args);
    ctx.progress(0.1).await;

    let start_time = Instant::now();
    let result = tokio::select! {
        result = run_tool(&tool_path, &args, output_mode(strategy), &output) => result,
        _ = ctx.stopped() => {
            debug!("{} cancelled for {}", strategy, input.source.display());
            remove_candidate(&output).await;
            return WorkerReport::NoImprovement;
        }
    };
    let elapsed = start_time.elapsed();

    match result {
        Ok(()) => {
            debug!("{} finished in {:?}", strategy, elapsed);
            input.evaluate_candidate(output, strategy).await
        }
        Err(ToolError::Io(e)) => {
            remove_candidate(&output).await;
            if is_disk_full(&e) {
                WorkerReport::fatal(format!("Disk full: {}", e))
            } else {
                WorkerReport::failed(format!("{} could not run: {}", tool_name, e))
            }
        }
        Err(ToolError::Exit(reason)) => {
            warn!("{} failed on {} after {:?}: {}", tool_name, input.source.display(), elapsed, reason);
            remove_candidate(&output).await;
            WorkerReport::failed(format!("{}: {}", tool_name, reason))
        }
    }
}

enum ToolError {
    Io(std::io::Error),
    Exit(String),
}

/// Spawn the tool and wait for it. The child is killed if this future is dropped.
async fn run_tool(tool_path: &Path, args: &[String], mode: OutputMode, output: &Path) -> Result<(), ToolError> {
    let child = Command::new(tool_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(match mode {
            OutputMode::Stdout => Stdio::piped(),
            OutputMode::File => Stdio::null(),
        })
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ToolError::Io)?;

    let result = child.wait_with_output().await.map_err(ToolError::Io)?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let reason = stderr
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| format!("exited with {}", result.status));
        return Err(ToolError::Exit(reason));
    }

    if let OutputMode::Stdout = mode {
        tokio::fs::write(output, &result.stdout).await.map_err(ToolError::Io)?;
    }

    Ok(())
}
