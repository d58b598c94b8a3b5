use crate::{ExtractorError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

const GO_BINARY: &str = "go";
const OUTPUT_NAME: &str = "apiserver";

/// Runs `go build` for `package`, placing the binary in `out_dir`.
///
/// Each build option is passed to `go build` as one argument.
pub async fn build_package(
    package: &str,
    build_opts: &[String],
    out_dir: &Path,
    attach_output: bool,
) -> Result<PathBuf> {
    let output = out_dir.join(OUTPUT_NAME);
    let args = build_args(package, build_opts, &output);

    info!("Building api server from {}", package);
    debug!("{} {}", GO_BINARY, args.join(" "));

    let stdout = if attach_output {
        Stdio::inherit()
    } else {
        Stdio::null()
    };

    let result = Command::new(GO_BINARY)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| build_error(package, format!("failed to run {}: {}", GO_BINARY, e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(build_error(
            package,
            format!("{} ({})", stderr.trim(), result.status),
        ));
    }

    info!("Built api server binary {}", output.display());
    Ok(output)
}

fn build_args(package: &str, build_opts: &[String], output: &Path) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-o".to_string(),
        output.display().to_string(),
    ];
    args.extend(build_opts.iter().cloned());
    args.push(package.to_string());
    args
}

fn build_error(package: &str, message: String) -> ExtractorError {
    ExtractorError::BuildFailed {
        package: package.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_place_options_before_package() {
        let args = build_args(
            "./cmd/apiserver",
            &["-mod=mod".to_string(), "-trimpath".to_string()],
            Path::new("/tmp/build/apiserver"),
        );

        assert_eq!(
            args,
            vec![
                "build",
                "-o",
                "/tmp/build/apiserver",
                "-mod=mod",
                "-trimpath",
                "./cmd/apiserver",
            ]
        );
    }
}
