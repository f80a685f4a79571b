use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use shared::{
    log,
    Context,
    ensure,
    Result,
};


/// TOML-backed configuration of a command.
///
/// `Display` must print a valid TOML document, it is what `to_file` writes and what
/// `--generate config-template` produces.
pub trait AnalysisConfig: Clone + Default + fmt::Display + DeserializeOwned {
    /// Semantic checks after parsing, all problems are reported at once.
    fn check_config(&self) -> Result<()> { Ok(()) }

    fn from_file<P>(fname: P) -> Result<Self>
    where P: AsRef<Path> {
        let fname = fname.as_ref();
        ensure!(fname.is_file(), "Config file {:?} not available.", fname);

        let raw = fs::read_to_string(fname)?;
        let cfg = toml::from_str::<Self>(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", fname))?;
        cfg.check_config()?;
        Ok(cfg)
    }

    fn to_file<P>(&self, fname: P) -> Result<()>
    where P: AsRef<Path> {
        let fname = fname.as_ref();
        if fname.is_file() {
            log::warn!("File {:?} exists, overwriting ...", fname);
        }
        log::info!("Writing config to file {:?}", fname);
        fs::write(fname, self.to_string())?;
        Ok(())
    }
}
