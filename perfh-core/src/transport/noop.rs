use std::sync::Arc;

use super::{CommandTransport, ServeFuture};
use crate::command::CommandProcessor;
use crate::signal::ShutdownSignal;

/// Accepts no commands; the run is driven by configuration alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

impl CommandTransport for NoopTransport {
    fn name(&self) -> &'static str {
        "none"
    }

    fn serve(self: Box<Self>, _processor: Arc<CommandProcessor>, shutdown: Arc<ShutdownSignal>) -> ServeFuture {
        Box::pin(async move {
            shutdown.wait().await;
            Ok(())
        })
    }
}
