use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context as _, Result};

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::window::{Window, WindowId};

use crate::core::{App, AppControl, Context, ContextConfig};
use crate::device::{BackendInit, WgpuBackend};
use crate::target::Target;
use crate::work::Notifier;

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "glint".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
        }
    }
}

/// Events posted into the winit loop from other threads.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RuntimeEvent {
    /// The upload worker finished at least one item.
    WorkFinished,
}

/// Wakes the event loop from the upload worker.
struct ProxyNotifier {
    proxy: Mutex<EventLoopProxy<RuntimeEvent>>,
}

impl Notifier for ProxyNotifier {
    fn notify(&self) {
        let proxy = self.proxy.lock().unwrap_or_else(PoisonError::into_inner);
        if proxy.send_event(RuntimeEvent::WorkFinished).is_err() {
            log::trace!("event loop closed; work notification dropped");
        }
    }
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    /// Opens one window, builds a wgpu context for it and runs `app` until the
    /// window closes.
    ///
    /// Redraws are demand-driven: the window redraws when winit asks, when the
    /// app requests it through the target, and after finished uploads are
    /// joined.
    pub fn run<A>(
        config: RuntimeConfig,
        backend_init: BackendInit,
        context_config: ContextConfig,
        app: A,
    ) -> Result<()>
    where
        A: 'static + App,
    {
        let event_loop = EventLoop::<RuntimeEvent>::with_user_event()
            .build()
            .context("failed to create winit EventLoop")?;
        let proxy = event_loop.create_proxy();
        let mut state = AppState::new(config, backend_init, context_config, app, proxy);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        Ok(())
    }
}

/// Everything tied to the open window. Fields drop in declaration order.
struct Session {
    target: Target,
    context: Context,
    window: Arc<Window>,
}

struct AppState<A>
where
    A: App + 'static,
{
    config: RuntimeConfig,
    backend_init: BackendInit,
    context_config: ContextConfig,
    app: A,
    proxy: EventLoopProxy<RuntimeEvent>,
    session: Option<Session>,
    exit_requested: bool,
}

impl<A> AppState<A>
where
    A: App + 'static,
{
    fn new(
        config: RuntimeConfig,
        backend_init: BackendInit,
        context_config: ContextConfig,
        app: A,
        proxy: EventLoopProxy<RuntimeEvent>,
    ) -> Self {
        Self {
            config,
            backend_init,
            context_config,
            app,
            proxy,
            session: None,
            exit_requested: false,
        }
    }

    fn create_session(&mut self, event_loop: &ActiveEventLoop) -> Result<Session> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let backend = pollster::block_on(WgpuBackend::new(
            self.backend_init.clone(),
            Some(window.clone()),
        ))
        .context("GPU initialization failed for window")?;

        let notifier = Arc::new(ProxyNotifier {
            proxy: Mutex::new(self.proxy.clone()),
        });
        let context = Context::new(backend, notifier, self.context_config.clone());
        let target = context.create_window_target(window.clone());

        self.app
            .init(&context, &target)
            .context("application init failed")?;

        Ok(Session {
            target,
            context,
            window,
        })
    }

    /// Joins outstanding uploads, then releases the window and GPU objects.
    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.context.shutdown();
        }
    }

    fn request_exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exit_requested = true;
        self.close_session();
        event_loop.exit();
    }
}

impl<A> ApplicationHandler<RuntimeEvent> for AppState<A>
where
    A: App + 'static,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() || self.exit_requested {
            return;
        }

        match self.create_session(event_loop) {
            Ok(session) => {
                session.window.request_redraw();
                self.session = Some(session);
            }
            Err(e) => {
                log::error!("failed to start: {e:#}");
                self.request_exit(event_loop);
            }
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: RuntimeEvent) {
        match event {
            RuntimeEvent::WorkFinished => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                if session.context.drain_finished() > 0 {
                    session.target.request_redraw();
                }
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.window.id() != window_id {
            return;
        }

        let mut control = self
            .app
            .on_window_event(&session.context, &session.target, &event);

        if control == AppControl::Continue {
            // Runtime-managed window lifecycle / resize / redraw handling.
            match &event {
                WindowEvent::CloseRequested => control = AppControl::Exit,

                WindowEvent::Resized(size) => {
                    session.target.resize(size.width, size.height);
                    session.window.request_redraw();
                }

                WindowEvent::ScaleFactorChanged { .. } => {
                    let size = session.window.inner_size();
                    session.target.resize(size.width, size.height);
                    session.window.request_redraw();
                }

                WindowEvent::RedrawRequested => {
                    control = self.app.on_redraw(&session.context, &session.target);
                    if control == AppControl::Continue {
                        session.target.redraw();
                    }
                }

                _ => {}
            }
        }

        if control == AppControl::Exit {
            self.request_exit(event_loop);
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.close_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_opens_a_landscape_window() {
        let config = RuntimeConfig::default();
        assert_eq!(config.title, "glint");
        assert!(config.initial_size.width > config.initial_size.height);
    }
}
