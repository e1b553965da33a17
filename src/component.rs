//! Defines the Component trait, the common interface of the stages that run
//! on their own thread in the tracking pipeline. A component consumes
//! messages from the preceding stage, processes them, and passes results to
//! whoever listens on its output channel.

use log::{info, warn};
use std::fmt;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

#[derive(Debug, PartialEq, Eq)]
pub enum ComponentError {
    /// Frames arrived but the component never received its shared block,
    /// so none of them were published.
    NeverInitialized { dropped_frames: u64 },
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::NeverInitialized { dropped_frames } => write!(
                f,
                "never initialized, dropped {dropped_frames} frames"
            ),
        }
    }
}

impl std::error::Error for ComponentError {}

///
/// A stage of the tracking pipeline. Everything that runs as its own
/// thread between the measurement source and the consumers implements
/// Component, so that it can be wired up with [`run_component`].
///
pub trait Component: fmt::Display {
    type InData;
    type OutData;

    /// Converts an input of type InData into an output of type OutData
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up at termination of pipeline
    fn finalize(&mut self) -> Result<(), ComponentError>;
}

/// Runs the given Component on its own thread. On receiving data of type
/// InData on the input channel, the Component converts them to data of type
/// OutData and sends it to the output channel. The thread ends when every
/// sender of the input channel is gone.
pub fn run_component<C: Component + Send + 'static>(
    mut component: C,
    input: Receiver<C::InData>,
    output: Sender<C::OutData>,
) -> JoinHandle<()>
where
    C::InData: Send + 'static,
    C::OutData: Send + 'static,
{
    thread::spawn(move || {
        let mut listening = true;
        while let Ok(data) = input.recv() {
            let out_data = component.convert(data);
            if listening && output.send(out_data).is_err() {
                warn!("{component} : output receiver is gone, results are discarded.");
                listening = false;
            }
        }

        if let Err(component_error) = component.finalize() {
            warn!("{component} : error during terminating : {component_error}.");
        }
        info!("{component} : terminated.");
    })
}
