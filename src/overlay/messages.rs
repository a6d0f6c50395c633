#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Escape,
    Enter,
    FocusLost,
    Stop,
    Unload,
    /// The native window went away without going through the controller.
    SurfaceClosed,
    StartFailure,
    OverlayFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainToOverlay {
    Close { reason: CloseReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayToMain {
    Shown,
    TextChanged { text: String },
    Exited { reason: CloseReason },
}
