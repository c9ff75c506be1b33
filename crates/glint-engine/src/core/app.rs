use winit::event::WindowEvent;

use crate::target::Target;

use super::Context;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract implemented by higher layers.
///
/// Every callback runs on the thread that owns `ctx`.
pub trait App {
    /// Called once after the window target and context exist. Build pipelines
    /// and submit initial uploads here.
    fn init(&mut self, ctx: &Context, target: &Target) -> anyhow::Result<()>;

    /// Called for window events.
    fn on_window_event(&mut self, ctx: &Context, target: &Target, event: &WindowEvent) -> AppControl {
        let _ = (ctx, target, event);
        AppControl::Continue
    }

    /// Called right before the target's pipeline executes.
    fn on_redraw(&mut self, ctx: &Context, target: &Target) -> AppControl {
        let _ = (ctx, target);
        AppControl::Continue
    }
}
