pub mod controller;
pub mod dispatch;
pub mod fonts;
pub mod input;
pub mod messages;
pub mod service;
pub mod settings;
pub mod state;
pub mod surface;
pub mod validation;
pub mod window;

pub use dispatch::{ActionDispatcher, ActionKind, DispatchOutcome, USER_INPUT_PLACEHOLDER};
pub use messages::CloseReason;
pub use service::{OverlayService, StartOutcome};
pub use settings::OverlaySettings;
pub use state::SessionLifecycle;
pub use surface::{headless_surface_factory, HeadlessDriver, SurfaceFactory};
pub use validation::InputType;
