use anyhow::{bail, Context, Result};
use input_overlay::host::MemoryHost;
use input_overlay::overlay::surface::{headless_surface_factory, HeadlessDriver};
use input_overlay::overlay::{OverlayService, StartOutcome};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const SESSION_WAIT: Duration = Duration::from_secs(3600);

struct Args {
    options: PathBuf,
    debug: bool,
    log_file: Option<PathBuf>,
    headless: bool,
    owner: Option<isize>,
}

/// Parse a window handle given as decimal or `0x` hex.
fn parse_window_handle(text: &str) -> Result<isize> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => isize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("invalid window handle {text}"))
}

fn parse_args() -> Result<Args> {
    let mut options = None;
    let mut debug = false;
    let mut log_file = None;
    let mut headless = cfg!(not(windows));
    let mut owner = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => debug = true,
            "--headless" => headless = true,
            "--log" => {
                let path = args.next().context("--log needs a file path")?;
                log_file = Some(PathBuf::from(path));
            }
            "--owner" => {
                let handle = args.next().context("--owner needs a window handle")?;
                owner = Some(parse_window_handle(&handle)?);
            }
            other if other.starts_with("--") => bail!("unknown flag {other}"),
            other => options = Some(PathBuf::from(other)),
        }
    }

    let Some(options) = options else {
        bail!(
            "usage: input-overlay <options.json> [--debug] [--log <file>] [--headless] [--owner <hwnd>]"
        );
    };
    Ok(Args {
        options,
        debug,
        log_file,
        headless,
        owner,
    })
}

/// Forward stdin to the headless surface until EOF.
fn feed_stdin(driver: HeadlessDriver, service: &OverlayService) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        match line.trim() {
            ":esc" => driver.press_escape(),
            ":blur" => driver.lose_focus(),
            ":close" => driver.close_window(),
            _ => {
                driver.type_text(&line);
                driver.press_enter();
            }
        }
        if service.wait_until_idle(Duration::from_millis(50)) {
            return Ok(());
        }
    }
    service.stop()
}

fn main() -> Result<()> {
    let args = parse_args()?;
    input_overlay::logging::init(args.debug, args.log_file.clone());

    let host = MemoryHost::from_json_file(&args.options)?;
    #[cfg(windows)]
    let host = match args.owner {
        Some(owner) => host.with_window(Arc::new(input_overlay::host::NativeHostWindow(owner))),
        None => host,
    };
    #[cfg(not(windows))]
    {
        if args.owner.is_some() {
            tracing::warn!("--owner is ignored without a native host window");
        }
    }
    let host = Arc::new(host);
    let (service, driver) = if args.headless {
        let (factory, driver) = headless_surface_factory();
        (
            OverlayService::with_surface_factory(host.clone(), factory),
            Some(driver),
        )
    } else {
        (OverlayService::new(host.clone()), None)
    };
    tracing::debug!(settings = %service.settings().to_json()?, "loaded overlay options");

    if service.start()? == StartOutcome::AlreadyActive {
        bail!("input overlay already running");
    }
    if let Some(driver) = driver {
        feed_stdin(driver, &service)?;
    }
    if !service.wait_until_idle(SESSION_WAIT) {
        service.unload()?;
    }

    for command in host.executed() {
        println!("executed: {command}");
    }
    println!("text: {}", service.string());
    if let Some(reason) = service.last_close_reason() {
        println!("closed: {reason:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_window_handle;

    #[test]
    fn window_handles_parse_as_decimal_or_hex() {
        assert_eq!(parse_window_handle("132456").unwrap(), 132456);
        assert_eq!(parse_window_handle("0x1F0A2").unwrap(), 0x1F0A2);
        assert!(parse_window_handle("hwnd").is_err());
    }
}
