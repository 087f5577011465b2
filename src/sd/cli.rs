use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sysdweb", version, about = "Control systemd services through a web dashboard and REST API")]
pub struct Args {
    /// Path to config YAML
    #[arg(short = 'c', long = "config", default_value = "/etc/sysdweb.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides global.host)
    #[arg(long = "host")]
    pub host: Option<String>,

    /// Listen port (overrides global.port)
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, cfg: &mut crate::sd::config::SysdwebConfig) {
        if let Some(h) = &self.host {
            cfg.host = h.clone();
        }
        if let Some(p) = self.port {
            cfg.port = p;
        }
    }
}
