//! Validation subcommand

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use super::config::load_document;
use super::CliError;
use crate::template::validator::validate;
use crate::template::TemplateKind;

/// Template schema to validate against
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    /// Request template
    Request,
    /// Export template
    Export,
}

impl From<KindArg> for TemplateKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Request => TemplateKind::Request,
            KindArg::Export => TemplateKind::Export,
        }
    }
}

/// Validate template files and report every error with its path
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Schema the files must conform to
    #[arg(long, value_enum, default_value = "request")]
    pub kind: KindArg,

    /// Template files (JSON)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl ValidateCommand {
    /// Validate every file; fails when at least one is rejected
    pub async fn execute(&self) -> Result<(), CliError> {
        let mut failed = 0;
        for path in &self.files {
            let document = match load_document(path) {
                Ok(document) => document,
                Err(e) => {
                    eprintln!("{}: {}", path.display(), e);
                    failed += 1;
                    continue;
                }
            };
            match validate(self.kind.into(), &document) {
                Ok(_) => println!("{}: valid", path.display()),
                Err(errors) => {
                    failed += 1;
                    println!("{}: {} error(s)", path.display(), errors.len());
                    for error in errors.errors() {
                        println!("  {error}");
                    }
                }
            }
        }

        if failed > 0 {
            Err(CliError::ValidationFailed(failed))
        } else {
            Ok(())
        }
    }
}
