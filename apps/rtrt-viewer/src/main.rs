//! rtrt Demo Viewer
//!
//! Renders a small procedural scene either by rasterization or by hardware
//! ray tracing, switchable at runtime.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p rtrt-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--raster`: Stay on the rasterize path even if ray tracing is available
//! - `--no-overlay`: Do not draw the HUD
//! - `--api-dump`: Enable the Vulkan API dump layer
//! - `--size <W>x<H>`: Initial window size (default: 1280x720)
//! - `--vsync`: Present with FIFO
//! - `-h, --help`: Print help message
//!
//! ## Controls
//!
//! - `Space`: Toggle between the rasterize and ray-trace paths
//! - Arrow keys: Orbit the camera
//! - `Escape`: Quit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)
//! - `RTRT_API_DUMP=1`: Same as `--api-dump`
//! - `RTRT_FORCE_RASTER`: Same as `--raster` unless empty or `0`

mod app;
mod hud;
mod resources;
mod scene;

use anyhow::{bail, Context as _};
use rtrt_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const TARGET_FPS: u32 = 240;

/// Command line options.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewerOptions {
    raster: bool,
    overlay: bool,
    api_dump: bool,
    size: (u32, u32),
    vsync: bool,
    help: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            raster: false,
            overlay: true,
            api_dump: false,
            size: (WIDTH, HEIGHT),
            vsync: false,
            help: false,
        }
    }
}

impl ViewerOptions {
    /// Parse options from the arguments following the program name.
    fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--raster" => options.raster = true,
                "--no-overlay" => options.overlay = false,
                "--api-dump" => options.api_dump = true,
                "--vsync" => options.vsync = true,
                "-h" | "--help" => options.help = true,
                "--size" => {
                    let value = args.next().context("--size needs a value like 1280x720")?;
                    options.size = parse_size(&value)?;
                }
                other => bail!("Unknown option: {other}"),
            }
        }

        Ok(options)
    }

    fn into_config(self) -> AppConfig {
        let (width, height) = self.size;
        AppConfig::new("rtrt Viewer")
            .with_size(width, height)
            .with_target_fps(TARGET_FPS)
            .with_vsync(self.vsync)
            .with_api_dump(self.api_dump)
            .with_force_raster(self.raster)
            .with_overlay(self.overlay)
            .with_env_overrides()
    }
}

fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("Invalid size {value:?}, expected WxH"))?;
    let width: u32 = w.trim().parse().with_context(|| format!("Invalid width {w:?}"))?;
    let height: u32 = h.trim().parse().with_context(|| format!("Invalid height {h:?}"))?;
    if width == 0 || height == 0 {
        bail!("Window size must be non-zero, got {width}x{height}");
    }
    Ok((width, height))
}

fn main() -> anyhow::Result<()> {
    let options = match ViewerOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {e:#}\n");
            print_help();
            std::process::exit(2);
        }
    };

    if options.help {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(options.into_config())
}

fn print_help() {
    eprintln!(
        "rtrt Demo Viewer

USAGE:
    cargo run -p rtrt-viewer -- [OPTIONS]

OPTIONS:
    --raster                Stay on the rasterize path
    --no-overlay            Do not draw the HUD
    --api-dump              Enable the VK_LAYER_LUNARG_api_dump layer
    --size <W>x<H>          Initial window size (default: {WIDTH}x{HEIGHT})
    --vsync                 Present with FIFO
    -h, --help              Print this help message

CONTROLS:
    Space                   Toggle rasterize / ray-trace
    Arrow keys              Orbit the camera
    Escape                  Quit

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)
    RTRT_API_DUMP           Set to 1 to enable the API dump layer
    RTRT_FORCE_RASTER       Set to anything but empty or 0 to force rasterization"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ViewerOptions> {
        ViewerOptions::parse(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn no_arguments_gives_defaults() {
        assert_eq!(parse(&[]).unwrap(), ViewerOptions::default());
    }

    #[test]
    fn flags_are_parsed() {
        let options = parse(&["--raster", "--no-overlay", "--api-dump", "--vsync"]).unwrap();
        assert!(options.raster);
        assert!(!options.overlay);
        assert!(options.api_dump);
        assert!(options.vsync);
        assert!(!options.help);
    }

    #[test]
    fn size_is_parsed() {
        let options = parse(&["--size", "800x600"]).unwrap();
        assert_eq!(options.size, (800, 600));
        assert_eq!(parse_size("1920X1080").unwrap(), (1920, 1080));
    }

    #[test]
    fn bad_sizes_are_rejected() {
        assert!(parse(&["--size"]).is_err());
        assert!(parse_size("800").is_err());
        assert!(parse_size("0x600").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn unknown_option_is_an_error() {
        assert!(parse(&["--fast"]).is_err());
    }

    #[test]
    fn help_flag() {
        assert!(parse(&["-h"]).unwrap().help);
        assert!(parse(&["--raster", "--help"]).unwrap().help);
    }

    #[test]
    fn options_flow_into_config() {
        let options = parse(&["--raster", "--no-overlay", "--size", "640x480"]).unwrap();
        let (width, height) = options.size;
        let config = AppConfig::new("t")
            .with_size(width, height)
            .with_force_raster(options.raster)
            .with_overlay(options.overlay);
        assert_eq!((config.width, config.height), (640, 480));
        assert!(config.force_raster);
        assert!(!config.overlay);
        assert_eq!(config.effective_initial_path(), rtrt_app::RenderPath::Rasterize);
    }
}
