use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use shared::{
    copy_file_to,
    link_file_to,
    log,
    Context,
    Result,
};
use crate::OptProcess;

use crate::core::AnalysisConfig;
use crate::logging::logger_redirect;
use crate::analyze::{
    analyze_impl::create_outputdir,
    Analysis,
    AnalyzeConfig,
};


#[derive(Debug, Parser)]
/// Unwrap a periodic trajectory, align it onto a reference and run PCA on the coordinates and
/// forces, with RMSD, RMSF and radius of gyration as by-products.
pub struct AnalyzeCommand {
    #[arg(short='n', long, default_value_t=0)]
    /// Number of threads for parallel alignment.
    ///
    /// If 0 is set, it will fall back to the number of logic CPU cores of you machine.
    nthreads: usize,

    #[arg(short='c', long, default_value="analyze_config.toml", aliases=["cfg", "conf"])]
    /// Config file name.
    ///
    /// Aliases: "cfg", "conf".
    config: PathBuf,

    #[arg(long, value_enum, alias="gen")]
    /// Generate auxiliary files for the analysis.
    ///
    /// The analysis will not run if this flag is set.
    ///
    /// Alias: "gen"
    generate: Option<TemplateGenerator>,
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum TemplateGenerator {
    #[value(aliases=["config", "cfg", "conf"])]
    /// Generate config template for the analysis. Aliases: "config", "cfg", "conf".
    ConfigTemplate,
}


impl OptProcess for AnalyzeCommand {
    fn process(&self) -> Result<()> {
        use TemplateGenerator::*;

        if let Some(g) = self.generate {
            return match g {
                ConfigTemplate => AnalyzeConfig::default().to_file("analyze_config_template.toml"),
            }
        }

        rayon::ThreadPoolBuilder::new().num_threads(self.nthreads).build_global()
            .context("Failed to set up the global thread pool.")?;

        let mut cfg = AnalyzeConfig::from_file(&self.config)?;
        let outdir = create_outputdir(cfg.get_outdir())?;
        cfg.set_outdir(&outdir);

        logger_redirect(&outdir)?;
        cfg.print_to_log();

        copy_file_to(&self.config, &outdir)?;
        if let Err(e) = link_file_to(cfg.get_trajectory_fname(), &outdir) {
            log::warn!("Failed to link the trajectory into {:?}: {}", outdir, e);
        }

        let analysis = Analysis::from_config(&cfg)?;
        let report = analysis.run()?;
        analysis.save_report(&report, &outdir)
    }
}
