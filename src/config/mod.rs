pub mod toml_config;

pub use toml_config::ReconConfig;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};

#[cfg(feature = "cli")]
mod cli {
    use super::ReconConfig;
    use crate::domain::extraction::{DocumentType, ShipmentField};
    use crate::domain::model::Side;
    use crate::utils::error::Result;
    use clap::{ArgGroup, Parser, Subcommand};
    use std::path::PathBuf;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "shipment-recon")]
    #[command(about = "Reconcile Master and House bills of lading into shipment records")]
    pub struct CliConfig {
        #[arg(long, global = true, help = "TOML configuration file")]
        pub config: Option<PathBuf>,

        #[arg(long, global = true, help = "SQLite database path, overrides [store]")]
        pub database: Option<String>,

        #[arg(long, global = true, help = "Editor recorded on writes, overrides [identity]")]
        pub editor: Option<String>,

        #[arg(long, global = true, help = "Enable verbose output")]
        pub verbose: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum Command {
        /// Upload one extraction JSON document
        Upload {
            file: PathBuf,
            /// Overrides the document's own documentType
            #[arg(long = "type", value_parser = parse_document_type)]
            document_type: Option<DocumentType>,
        },
        /// Print a shipment, or every shipment under a master number
        #[command(group(ArgGroup::new("target").required(true).args(["shipment_id", "master"])))]
        Show {
            shipment_id: Option<String>,
            #[arg(long)]
            master: Option<String>,
        },
        /// Print the arbitration table of a shipment
        Discrepancies { shipment_id: String },
        /// Resolve mismatched fields and finalize the shipment
        Finalize {
            shipment_id: String,
            /// field=master|house, repeatable
            #[arg(long = "pick", value_parser = parse_pick)]
            picks: Vec<(ShipmentField, Side)>,
        },
        /// Print the audit trail of a shipment
        History { shipment_id: String },
    }

    impl CliConfig {
        /// Loads the TOML file (or defaults) and applies the command-line overrides.
        pub fn load_config(&self) -> Result<ReconConfig> {
            let base = match &self.config {
                Some(path) => ReconConfig::from_file(path)?,
                None => ReconConfig::default(),
            };
            Ok(base.with_overrides(self.database.clone(), self.editor.clone()))
        }

        pub fn is_verbose(&self, config: &ReconConfig) -> bool {
            self.verbose || config.logging.verbose
        }
    }

    fn parse_document_type(value: &str) -> std::result::Result<DocumentType, String> {
        value.parse().map_err(|e: crate::utils::error::ReconError| e.to_string())
    }

    fn parse_pick(value: &str) -> std::result::Result<(ShipmentField, Side), String> {
        let (field, side) = value
            .split_once('=')
            .ok_or_else(|| format!("expected field=master|house, got '{value}'"))?;
        let field: ShipmentField = field.trim().parse().map_err(|e| format!("{e}"))?;
        let side: Side = side.parse().map_err(|e| format!("{e}"))?;
        Ok((field, side))
    }

}
