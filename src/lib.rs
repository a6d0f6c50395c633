pub mod host;
pub mod logging;
pub mod overlay;

pub use host::{Host, HostWindow, LogLevel, MemoryHost};
pub use overlay::{OverlayService, OverlaySettings, StartOutcome};
