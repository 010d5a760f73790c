// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Host tool for the HDMI pipeline: lists the modes a sink would get, generates EDIDs and shows the
//! scanout transfer programmed for a frame.

use std::fs;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use argh::FromArgs;
use base::syslog;
use base::Clock;
use hdmi::edid::DisplayInfo;
use hdmi::edid::Edid;
use hdmi::edid::EdidBytes;
use hdmi::fakes::FakeDdcBus;
use hdmi::fakes::FakeProvider;
use hdmi::fakes::RecordingVblank;
use hdmi::hw::DdcBus;
use hdmi::hw::PendingVblankEvent;
use hdmi::modedb;
use hdmi::resolver::ModeResolver;
use hdmi::scanout::Framebuffer;
use hdmi::scanout::PixelFormat;
use hdmi::scanout::PlaneState;
use hdmi::timing;
use hdmi::Commit;
use hdmi::DisplayPipe;
use hdmi::HardwareLimits;
use hdmi::HdmiPipeline;
use hdmi::Mode;
use hdmi::ModeStatus;
use sync::Mutex;

/// A DMT mode given as `WIDTHxHEIGHT@REFRESH`.
struct DmtMode(Mode);

impl FromStr for DmtMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || format!("expected WIDTHxHEIGHT@REFRESH, got \"{}\"", s);
        let (size, refresh) = s.split_once('@').ok_or_else(bad)?;
        let (width, height) = size.split_once('x').ok_or_else(bad)?;
        let width: u32 = width.parse().map_err(|_| bad())?;
        let height: u32 = height.parse().map_err(|_| bad())?;
        let refresh: u32 = refresh.parse().map_err(|_| bad())?;
        modedb::find_dmt(width, height, refresh)
            .map(DmtMode)
            .ok_or_else(|| format!("no DMT mode {}", s))
    }
}

/// A number, in hex when prefixed with `0x`.
struct Address(u64);

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed
            .map(Address)
            .map_err(|e| format!("invalid address \"{}\": {}", s, e))
    }
}

#[derive(FromArgs)]
#[argh(subcommand, name = "modes")]
/// List the modes offered for a sink and whether the transmitter can drive them.
struct ModesCommand {
    #[argh(option, arg_name = "FILE")]
    /// file holding the sink's EDID. Without it the fallback list is shown.
    edid: Option<String>,
    #[argh(option, arg_name = "FILE")]
    /// file holding the transmitter limits as JSON (fmax, hmax, vmax, hpref, vpref).
    limits: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "edid")]
/// Write an EDID advertising DMT modes, the first one preferred.
struct EdidCommand {
    #[argh(positional, arg_name = "OUT")]
    /// where to write the EDID.
    out: String,
    #[argh(option, default = "String::from(\"hdmi_tx\")")]
    /// monitor name.
    name: String,
    #[argh(option, arg_name = "WxH@R")]
    /// detailed timing, up to three.
    mode: Vec<DmtMode>,
    #[argh(option, arg_name = "WxH@R")]
    /// detailed timing in a CEA extension block, up to six.
    extension_mode: Vec<DmtMode>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "plan")]
/// Enable a simulated pipeline and show the scanout transfer for one frame.
struct PlanCommand {
    #[argh(option, default = "DmtMode(modedb::DMT_MODES[22])", arg_name = "WxH@R")]
    /// mode to enable, 1920x1080@60 by default.
    mode: DmtMode,
    #[argh(option, default = "Address(0)")]
    /// physical address of the framebuffer.
    addr: Address,
    #[argh(option)]
    /// framebuffer stride in bytes, packed rows by default.
    stride: Option<u32>,
    #[argh(option, default = "0")]
    /// first visible column.
    x: u32,
    #[argh(option, default = "0")]
    /// first visible line.
    y: u32,
    #[argh(option)]
    /// visible width, the mode's by default.
    width: Option<u32>,
    #[argh(option)]
    /// visible height, the mode's by default.
    height: Option<u32>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Modes(ModesCommand),
    Edid(EdidCommand),
    Plan(PlanCommand),
}

#[derive(FromArgs)]
/// HDMI scanout pipeline tool.
struct Options {
    #[argh(switch, short = 'v')]
    /// log debug messages.
    verbose: bool,
    #[argh(subcommand)]
    command: Command,
}

fn load_limits(path: Option<&str>) -> Result<HardwareLimits> {
    match path {
        Some(path) => HardwareLimits::from_path(path).context("failed to load limits"),
        None => Ok(HardwareLimits::default()),
    }
}

fn list_modes(cmd: ModesCommand) -> Result<()> {
    let limits = load_limits(cmd.limits.as_deref())?;
    let ddc = match &cmd.edid {
        Some(path) => {
            let bytes = fs::read(path).with_context(|| format!("failed to read {}", path))?;
            let edid = Edid::parse(&bytes).with_context(|| format!("invalid EDID in {}", path))?;
            if let Some(name) = edid.monitor_name() {
                println!("monitor: {}", name);
            }
            Some(Box::new(FakeDdcBus::new(edid.as_bytes().to_vec())) as Box<dyn DdcBus>)
        }
        None => None,
    };

    let mut resolver = ModeResolver::new(limits, ddc);
    for mode in resolver.enumerate_modes() {
        let verdict = match resolver.validate(&mode) {
            ModeStatus::Ok => "ok",
            ModeStatus::Bad => "bad",
        };
        let preferred = if mode.preferred { " preferred" } else { "" };
        println!("{} {}{}", mode, verdict, preferred);
    }
    Ok(())
}

fn write_edid(cmd: EdidCommand) -> Result<()> {
    let info = DisplayInfo {
        name: cmd.name,
        detailed: cmd.mode.into_iter().map(|m| m.0).collect(),
        extension_modes: cmd.extension_mode.into_iter().map(|m| m.0).collect(),
        ..Default::default()
    };
    let edid = EdidBytes::new(&info).context("failed to build EDID")?;
    fs::write(&cmd.out, edid.as_bytes()).with_context(|| format!("failed to write {}", cmd.out))?;
    println!("wrote {} bytes to {}", edid.len(), cmd.out);
    Ok(())
}

/// The plane `cmd` describes, over a framebuffer just big enough to hold it.
fn plan_plane(cmd: &PlanCommand) -> Result<PlaneState> {
    let mode = cmd.mode.0;
    let format = PixelFormat::Xrgb8888;
    let width = cmd.width.unwrap_or(mode.hdisplay);
    let height = cmd.height.unwrap_or(mode.vdisplay);
    let fb_width = cmd
        .x
        .checked_add(width)
        .ok_or_else(|| anyhow!("--x {} plus width {} overflows", cmd.x, width))?;
    let fb_height = cmd
        .y
        .checked_add(height)
        .ok_or_else(|| anyhow!("--y {} plus height {} overflows", cmd.y, height))?;
    let stride = match cmd.stride {
        Some(stride) => stride,
        None => fb_width
            .checked_mul(format.cpp())
            .ok_or_else(|| anyhow!("{} pixel wide framebuffer is too large", fb_width))?,
    };
    Ok(PlaneState {
        crtc: Some(0),
        fb: Some(Framebuffer {
            paddr: cmd.addr.0,
            width: fb_width,
            height: fb_height,
            pitch: stride,
            format,
        }),
        crtc_x: cmd.x,
        crtc_y: cmd.y,
        crtc_w: width,
        crtc_h: height,
    })
}

fn plan(cmd: PlanCommand) -> Result<()> {
    let mode = cmd.mode.0;
    let plane = plan_plane(&cmd)?;

    let mut provider = FakeProvider::new(Default::default());
    let events = Arc::new(Mutex::new(RecordingVblank::default()));
    let mut pipe = HdmiPipeline::probe(
        &mut provider,
        HardwareLimits::default(),
        events.clone(),
        Arc::new(Clock::new()),
    )
    .context("failed to set up pipeline")?;
    let dma = provider
        .dma_stats()
        .ok_or_else(|| anyhow!("no DMA channel handed out"))?;

    let mut commit = Commit {
        mode: Some(mode),
        plane,
        event: Some(PendingVblankEvent { id: 1 }),
    };
    pipe.atomic_check(&commit).context("commit rejected")?;

    println!("mode: {}", mode);
    if let Some(settle) = timing::settle_delay(&mode) {
        println!(
            "refresh: {} Hz, settle delay: {} ms",
            timing::refresh_hz(&mode),
            settle.as_millis()
        );
    }
    pipe.on_enable(&mode).context("failed to enable pipeline")?;
    let desc = pipe
        .on_frame_commit(&mut commit)
        .context("failed to queue frame")?;
    println!(
        "source: {:#x}, {} rows of {} bytes, {} byte gap",
        desc.src_start, desc.numf, desc.chunk_size, desc.icg
    );
    if let Some(template) = dma.lock().templates.last() {
        println!("template: {:?}", template);
    }
    println!("vblank events: {:?}", events.lock().delivered);
    pipe.on_disable();
    Ok(())
}

fn main() -> Result<()> {
    let options: Options = argh::from_env();
    syslog::init_with(syslog::LogConfig {
        filter: if options.verbose { "debug" } else { "info" },
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    match options.command {
        Command::Modes(cmd) => list_modes(cmd),
        Command::Edid(cmd) => write_edid(cmd),
        Command::Plan(cmd) => plan(cmd),
    }
}
