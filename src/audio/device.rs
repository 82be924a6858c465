use std::path::PathBuf;

use crate::config::AudioConfig;
use crate::error::Result;

use super::capture::CpalInput;
use super::file::WavInput;
use super::output::CpalOutput;
use super::{AudioBackend, FinishedCallback, InputStream, OutputContext};

/// Where session input comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Microphone(Option<String>),
    WavFile(PathBuf),
}

/// Audio resources backed by the host's sound devices.
pub struct CpalBackend {
    input: InputSource,
    output_device: Option<String>,
}

impl CpalBackend {
    #[must_use]
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input: InputSource::Microphone(config.input_device.clone()),
            output_device: config.output_device.clone(),
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self) -> Result<Box<dyn InputStream>> {
        match &self.input {
            InputSource::Microphone(name) => Ok(Box::new(CpalInput::open(name.as_deref())?)),
            InputSource::WavFile(path) => Ok(Box::new(WavInput::open(path)?)),
        }
    }

    fn open_output(
        &self,
        sample_rate: u32,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn OutputContext>> {
        Ok(Box::new(CpalOutput::open(
            self.output_device.as_deref(),
            sample_rate,
            on_finished,
        )?))
    }
}
