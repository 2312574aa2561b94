mod host;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use stage_engine::{LoopConfig, LoopStyle, StageConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use host::{run_viewer, ViewerConfig};

const LOOP_STYLE_ENV_VAR: &str = "STAGE_VIEWER_LOOP_STYLE";
const SIZE_ENV_VAR: &str = "STAGE_VIEWER_SIZE";

fn main() {
    init_tracing();

    let config = match parse_args(env::args().skip(1).collect()) {
        Ok(Some(config)) => config,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{}", usage_text());
            std::process::exit(2);
        }
    };
    info!(
        stage = %config.stage_path.display(),
        image_dir = %config.image_dir.display(),
        "viewer_startup"
    );

    if let Err(err) = run_viewer(config) {
        error!(error = %err, "viewer_failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_args(args: Vec<String>) -> Result<Option<ViewerConfig>, String> {
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            flag if flag.starts_with('-') => return Err(format!("unknown option `{flag}`")),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let stage_path = positional
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| "missing <stage.json> argument".to_string())?;
    let image_dir = match positional.next() {
        Some(dir) => PathBuf::from(dir),
        None => stage_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument `{extra}`"));
    }

    let defaults = StageConfig::default();
    let (viewport_width, viewport_height) =
        resolve_viewport_size((defaults.viewport_width, defaults.viewport_height));
    let loop_defaults = LoopConfig::default();

    Ok(Some(ViewerConfig {
        stage_path,
        image_dir,
        stage: StageConfig {
            viewport_width,
            viewport_height,
            ..defaults
        },
        render_loop: LoopConfig {
            style: resolve_loop_style(loop_defaults.style),
            ..loop_defaults
        },
    }))
}

fn resolve_loop_style(config_style: LoopStyle) -> LoopStyle {
    match env::var(LOOP_STYLE_ENV_VAR) {
        Ok(value) => match LoopStyle::from_str(value.trim()) {
            Ok(style) => style,
            Err(err) => {
                warn!(
                    env_var = LOOP_STYLE_ENV_VAR,
                    value = value.as_str(),
                    error = %err,
                    "invalid loop-style env var value; falling back to config"
                );
                config_style
            }
        },
        Err(env::VarError::NotPresent) => config_style,
        Err(err) => {
            warn!(
                env_var = LOOP_STYLE_ENV_VAR,
                error = %err,
                "unable to read loop-style env var; falling back to config"
            );
            config_style
        }
    }
}

fn resolve_viewport_size(config_size: (u32, u32)) -> (u32, u32) {
    match env::var(SIZE_ENV_VAR) {
        Ok(value) => match parse_size(&value) {
            Some(size) => size,
            None => {
                warn!(
                    env_var = SIZE_ENV_VAR,
                    value = value.as_str(),
                    "invalid viewport-size env var value; falling back to config"
                );
                config_size
            }
        },
        Err(env::VarError::NotPresent) => config_size,
        Err(err) => {
            warn!(
                env_var = SIZE_ENV_VAR,
                error = %err,
                "unable to read viewport-size env var; falling back to config"
            );
            config_size
        }
    }
}

/// `WxH` with both sides positive.
fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let (width, height) = raw.trim().split_once(['x', 'X'])?;
    let width = width.trim().parse::<u32>().ok()?;
    let height = height.trim().parse::<u32>().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

fn usage_text() -> String {
    format!(
        "usage: stage_viewer <stage.json> [image_dir]\n\
\n\
image_dir defaults to the stage file's directory.\n\
\n\
environment:\n\
  {LOOP_STYLE_ENV_VAR}=request|interval|auto\n\
  {SIZE_ENV_VAR}=<width>x<height>\n\
  RUST_LOG=<filter>\n\
\n\
keys: Esc quits, P pauses/resumes, arrows drag the view"
    )
}

fn print_usage() {
    println!("{}", usage_text());
}
