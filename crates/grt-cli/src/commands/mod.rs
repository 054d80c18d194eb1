//! Subcommand implementations

pub mod classes;
pub mod dump;
pub mod roundtrip;

use std::path::PathBuf;

use anyhow::Context;
use grt_engine::{Grt, GrtOptions, MessageType};

/// Global options shared by every subcommand
pub struct Setup {
    pub config: Option<PathBuf>,
    pub structs: Vec<PathBuf>,
    pub verbose: bool,
}

impl Setup {
    /// Options from the config file (if any) merged with the command line
    pub fn options(&self) -> anyhow::Result<GrtOptions> {
        let mut options = match &self.config {
            Some(path) => GrtOptions::from_file(path)
                .with_context(|| format!("failed to read options from {}", path.display()))?,
            None => GrtOptions::default().with_env_overrides(),
        };
        options.struct_paths.extend(self.structs.iter().cloned());
        options.verbose |= self.verbose;
        // documents of any schema should load without native classes
        options.bind_generic_allocators = true;
        Ok(options)
    }

    /// Context with every configured struct and module directory loaded
    pub fn context(&self) -> anyhow::Result<Grt> {
        let grt = Grt::new(self.options()?);
        grt.push_message_handler(|msg| match msg.kind {
            MessageType::Error | MessageType::Warning => {
                if msg.detail.is_empty() {
                    eprintln!("{}: {}", msg.kind.as_str(), msg.text);
                } else {
                    eprintln!("{}: {} ({})", msg.kind.as_str(), msg.text, msg.detail);
                }
                true
            }
            MessageType::Verbose | MessageType::Info => {
                eprintln!("{}", msg.text);
                true
            }
            _ => false,
        });
        grt.load_from_configured_paths()
            .context("failed to load struct and module directories")?;
        Ok(grt)
    }
}
