//! Cam-session binary for exercising a capture device end to end.

use std::path::PathBuf;
use std::process::ExitCode;

use cam_session::{ErrorKind, Field, FourCC, Format, Result, Session, V4L2Device};
use clap::Parser;
use log::{error, info, warn};

/// Field order to request.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FieldArg {
    /// Let the driver choose
    Any,
    /// Progressive frames
    None,
    /// Both fields interleaved
    Interlaced,
}

impl From<FieldArg> for Field {
    fn from(field: FieldArg) -> Self {
        match field {
            FieldArg::Any => Self::ANY,
            FieldArg::None => Self::NONE,
            FieldArg::Interlaced => Self::INTERLACED,
        }
    }
}

/// Capture frames from a V4L2 device through a buffer-owning session.
///
/// Every option can also be given through the environment variable named
/// in its help text.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Capture device path
    #[arg(short, long, env = "CAMERA", default_value = "/dev/video0")]
    device: PathBuf,

    /// Frame width in pixels
    #[arg(long, env = "CAMERA_WIDTH", default_value_t = 640)]
    width: u32,

    /// Frame height in pixels
    #[arg(long, env = "CAMERA_HEIGHT", default_value_t = 480)]
    height: u32,

    /// Pixel format as four characters
    #[arg(long, env = "CAMERA_FOURCC", default_value = "YUYV", value_parser = parse_fourcc)]
    fourcc: FourCC,

    /// Field order
    #[arg(long, env = "CAMERA_FIELD", default_value = "none", value_enum)]
    field: FieldArg,

    /// Number of buffers to request
    #[arg(short, long, env = "CAMERA_BUFFERS", default_value_t = 4)]
    buffers: u32,

    /// Frame interval in seconds as NUM/DEN, e.g. 1/30
    #[arg(long, env = "CAMERA_INTERVAL", value_parser = parse_interval)]
    interval: Option<(u32, u32)>,

    /// Number of frames to capture
    #[arg(short = 'n', long, env = "CAMERA_FRAMES", default_value_t = 10)]
    frames: u32,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn parse_fourcc(value: &str) -> std::result::Result<FourCC, String> {
    let code: [u8; 4] = value
        .as_bytes()
        .try_into()
        .map_err(|_| format!("expected four characters, got {value:?}"))?;
    Ok(FourCC(code))
}

fn parse_interval(value: &str) -> std::result::Result<(u32, u32), String> {
    let (numerator, denominator) = value
        .split_once('/')
        .ok_or_else(|| format!("expected NUM/DEN, got {value:?}"))?;
    let numerator = numerator.trim().parse().map_err(|err| format!("{err}"))?;
    let denominator = denominator.trim().parse().map_err(|err| format!("{err}"))?;
    if numerator == 0 || denominator == 0 {
        return Err("interval terms must be non-zero".to_owned());
    }
    Ok((numerator, denominator))
}

fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();
    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.os_error() {
                Some(cause) => error!("{err} (code {}): {cause}", err.kind().code()),
                None => error!("{err} (code {})", err.kind().code()),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut session = Session::with_device(V4L2Device::open(&args.device)?);

    let caps = session.read_capabilities()?;
    info!("Device: {} ({}) at {}", caps.card, caps.driver, caps.bus_info);

    let preferred = session.read_preferred_format()?;
    info!(
        "Preferred format: {}x{} {}",
        preferred.width, preferred.height, preferred.fourcc
    );

    let proposed = Format::new(args.width, args.height, args.fourcc).with_field(args.field.into());
    let format = match session.negotiate(&proposed) {
        Err(err) if err.kind() == ErrorKind::FormatRejected => {
            let substitute = *session.format();
            warn!(
                "Falling back to {}x{} {}",
                substitute.width, substitute.height, substitute.fourcc
            );
            session.negotiate(&substitute)?
        }
        other => other?,
    };
    info!(
        "Format: {}x{} {}, stride {}, {} bytes",
        format.width, format.height, format.fourcc, format.stride, format.size
    );

    if let Some((numerator, denominator)) = args.interval {
        match session.set_time_per_frame(numerator, denominator) {
            Ok(effective) => info!(
                "Frame interval {}/{} ({} fps)",
                effective.numerator,
                effective.denominator,
                effective.frames_per_second()
            ),
            Err(err) if err.kind() == ErrorKind::CustomRateUnsupported => {
                warn!("{err}, keeping {} fps", session.frames_per_second()?);
            }
            Err(err) => return Err(err),
        }
    }

    let granted = session.allocate(args.buffers)?;
    info!("Mapped {granted} buffers");
    session.start()?;
    session.queue_all()?;

    for _ in 0..args.frames {
        session.shoot_frame()?;
        if let Some(frame) = session.current_frame() {
            info!(
                "Frame {}: buffer {}, {} bytes, timestamp: {:?}",
                frame.metadata.sequence,
                frame.index,
                frame.data.len(),
                frame.metadata.timestamp
            );
        }
    }

    session.stop()?;
    drop(session.close()?);
    Ok(())
}
